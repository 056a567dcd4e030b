// ABOUTME: BSON element type constants and the special scalar types of the format.
// ABOUTME: ObjectId, Guid, Binary, Timestamp, Decimal128, and the tick-based TimeSpan.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Default safety limits for the binary backends.
pub mod limits {
    /// Maximum container nesting depth.
    pub const MAX_DEPTH: usize = 512;
    /// Maximum document size in bytes (the server's 16 MiB cap).
    pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;
}

/// BSON element type bytes as they appear on the wire.
pub mod element_type {
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const ARRAY: u8 = 0x04;
    pub const BINARY: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const OBJECT_ID: u8 = 0x07;
    pub const BOOLEAN: u8 = 0x08;
    pub const DATE_TIME: u8 = 0x09;
    pub const NULL: u8 = 0x0A;
    pub const REGULAR_EXPRESSION: u8 = 0x0B;
    pub const JAVASCRIPT: u8 = 0x0D;
    pub const SYMBOL: u8 = 0x0E;
    pub const INT32: u8 = 0x10;
    pub const TIMESTAMP: u8 = 0x11;
    pub const INT64: u8 = 0x12;
    pub const DECIMAL128: u8 = 0x13;
    pub const MIN_KEY: u8 = 0xFF;
    pub const MAX_KEY: u8 = 0x7F;
}

/// The type of a BSON element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BsonType {
    Double,
    String,
    Document,
    Array,
    Binary,
    Undefined,
    ObjectId,
    Boolean,
    DateTime,
    Null,
    RegularExpression,
    JavaScript,
    Symbol,
    Int32,
    Timestamp,
    Int64,
    Decimal128,
    MinKey,
    MaxKey,
}

impl BsonType {
    /// Maps a wire type byte to a `BsonType`.
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            element_type::DOUBLE => BsonType::Double,
            element_type::STRING => BsonType::String,
            element_type::DOCUMENT => BsonType::Document,
            element_type::ARRAY => BsonType::Array,
            element_type::BINARY => BsonType::Binary,
            element_type::UNDEFINED => BsonType::Undefined,
            element_type::OBJECT_ID => BsonType::ObjectId,
            element_type::BOOLEAN => BsonType::Boolean,
            element_type::DATE_TIME => BsonType::DateTime,
            element_type::NULL => BsonType::Null,
            element_type::REGULAR_EXPRESSION => BsonType::RegularExpression,
            element_type::JAVASCRIPT => BsonType::JavaScript,
            element_type::SYMBOL => BsonType::Symbol,
            element_type::INT32 => BsonType::Int32,
            element_type::TIMESTAMP => BsonType::Timestamp,
            element_type::INT64 => BsonType::Int64,
            element_type::DECIMAL128 => BsonType::Decimal128,
            element_type::MIN_KEY => BsonType::MinKey,
            element_type::MAX_KEY => BsonType::MaxKey,
            other => return Err(Error::InvalidElementType(other)),
        })
    }

    /// The wire type byte of this element type.
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            BsonType::Double => element_type::DOUBLE,
            BsonType::String => element_type::STRING,
            BsonType::Document => element_type::DOCUMENT,
            BsonType::Array => element_type::ARRAY,
            BsonType::Binary => element_type::BINARY,
            BsonType::Undefined => element_type::UNDEFINED,
            BsonType::ObjectId => element_type::OBJECT_ID,
            BsonType::Boolean => element_type::BOOLEAN,
            BsonType::DateTime => element_type::DATE_TIME,
            BsonType::Null => element_type::NULL,
            BsonType::RegularExpression => element_type::REGULAR_EXPRESSION,
            BsonType::JavaScript => element_type::JAVASCRIPT,
            BsonType::Symbol => element_type::SYMBOL,
            BsonType::Int32 => element_type::INT32,
            BsonType::Timestamp => element_type::TIMESTAMP,
            BsonType::Int64 => element_type::INT64,
            BsonType::Decimal128 => element_type::DECIMAL128,
            BsonType::MinKey => element_type::MIN_KEY,
            BsonType::MaxKey => element_type::MAX_KEY,
        }
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A 12-byte BSON ObjectId.
///
/// The layout is a 4-byte big-endian seconds-since-epoch timestamp followed
/// by 8 bytes of machine/process/counter entropy. This crate treats the tail
/// as opaque; ids are constructed from raw bytes or parsed from hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Seconds since the Unix epoch, from the leading timestamp field.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Parses a 24-character lowercase or uppercase hex string.
    pub fn parse_str(s: &str) -> Result<Self> {
        let raw = parse_hex(s)?;
        let bytes: [u8; 12] = raw
            .try_into()
            .map_err(|_| Error::Format(format!("ObjectId must be 24 hex chars, got {}", s.len())))?;
        Ok(ObjectId(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::parse_str(s)
    }
}

/// A 16-byte UUID, stored on the wire as binary subtype 4.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid([u8; 16]);

impl Guid {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> [u8; 16] {
        self.0
    }

    /// Parses the hyphenated form `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
    pub fn parse_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        if s.len() == 36 {
            let expected_hyphens = [8, 13, 18, 23];
            if !expected_hyphens.iter().all(|&i| s.as_bytes()[i] == b'-') {
                return Err(Error::Format(format!("malformed UUID: {s}")));
            }
        } else if s.len() != 32 {
            return Err(Error::Format(format!("malformed UUID: {s}")));
        }
        let raw = parse_hex(&compact)?;
        let bytes: [u8; 16] = raw
            .try_into()
            .map_err(|_| Error::Format(format!("malformed UUID: {s}")))?;
        Ok(Guid(bytes))
    }

    /// The canonical hyphenated lowercase hex form.
    #[must_use]
    pub fn to_hyphenated(&self) -> String {
        let h = to_hex(&self.0);
        format!(
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.to_hyphenated())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hyphenated())
    }
}

impl FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Guid::parse_str(s)
    }
}

/// The subtype byte of a BSON binary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinarySubtype {
    Generic,
    Function,
    BinaryOld,
    UuidLegacy,
    Uuid,
    Md5,
    UserDefined(u8),
}

impl BinarySubtype {
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => BinarySubtype::Generic,
            0x01 => BinarySubtype::Function,
            0x02 => BinarySubtype::BinaryOld,
            0x03 => BinarySubtype::UuidLegacy,
            0x04 => BinarySubtype::Uuid,
            0x05 => BinarySubtype::Md5,
            other => BinarySubtype::UserDefined(other),
        }
    }

    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            BinarySubtype::Generic => 0x00,
            BinarySubtype::Function => 0x01,
            BinarySubtype::BinaryOld => 0x02,
            BinarySubtype::UuidLegacy => 0x03,
            BinarySubtype::Uuid => 0x04,
            BinarySubtype::Md5 => 0x05,
            BinarySubtype::UserDefined(other) => other,
        }
    }
}

/// A BSON binary value: a subtype byte plus a byte payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub subtype: BinarySubtype,
    pub bytes: Vec<u8>,
}

impl Binary {
    #[must_use]
    pub fn new(subtype: BinarySubtype, bytes: Vec<u8>) -> Self {
        Binary { subtype, bytes }
    }

    /// Wraps a UUID as subtype-4 binary.
    #[must_use]
    pub fn from_guid(guid: Guid) -> Self {
        Binary {
            subtype: BinarySubtype::Uuid,
            bytes: guid.bytes().to_vec(),
        }
    }

    /// Interprets a subtype-4 (or legacy subtype-3) 16-byte payload as a UUID.
    pub fn to_guid(&self) -> Result<Guid> {
        if !matches!(self.subtype, BinarySubtype::Uuid | BinarySubtype::UuidLegacy) {
            return Err(Error::Format(format!(
                "binary subtype 0x{:02x} is not a UUID",
                self.subtype.byte()
            )));
        }
        let bytes: [u8; 16] = self
            .bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Format(format!("UUID binary must be 16 bytes, got {}", self.bytes.len())))?;
        Ok(Guid::from_bytes(bytes))
    }
}

/// A BSON timestamp: an opaque 64-bit value used by the server oplog.
///
/// The high 32 bits are seconds since the epoch, the low 32 bits an
/// ordinal increment within that second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    #[must_use]
    pub fn new(time: u32, increment: u32) -> Self {
        Timestamp { time, increment }
    }

    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Timestamp {
            time: (value >> 32) as u32,
            increment: value as u32,
        }
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        (u64::from(self.time) << 32) | u64::from(self.increment)
    }
}

/// An opaque IEEE 754-2008 decimal128 value, carried as its 16 wire bytes.
///
/// Decimal arithmetic and string conversion are out of scope; the bytes
/// round-trip losslessly and compare bitwise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal128([u8; 16]);

impl Decimal128 {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Decimal128(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> [u8; 16] {
        self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    pub fn parse_hex(s: &str) -> Result<Self> {
        let raw = parse_hex(s)?;
        let bytes: [u8; 16] = raw
            .try_into()
            .map_err(|_| Error::Format(format!("decimal128 must be 32 hex chars, got {}", s.len())))?;
        Ok(Decimal128(bytes))
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal128({})", self.to_hex())
    }
}

/// Ticks per time unit for [`TimeSpan`]. One tick is 100 nanoseconds.
pub mod ticks {
    pub const PER_MICROSECOND: i64 = 10;
    pub const PER_MILLISECOND: i64 = 10_000;
    pub const PER_SECOND: i64 = 10_000_000;
    pub const PER_MINUTE: i64 = 60 * PER_SECOND;
    pub const PER_HOUR: i64 = 60 * PER_MINUTE;
    pub const PER_DAY: i64 = 24 * PER_HOUR;
}

/// A signed duration counted in 100-nanosecond ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TimeSpan {
    ticks: i64,
}

impl TimeSpan {
    #[must_use]
    pub fn from_ticks(ticks: i64) -> Self {
        TimeSpan { ticks }
    }

    #[must_use]
    pub fn from_seconds(seconds: i64) -> Self {
        TimeSpan {
            ticks: seconds * ticks::PER_SECOND,
        }
    }

    #[must_use]
    pub fn from_milliseconds(millis: i64) -> Self {
        TimeSpan {
            ticks: millis * ticks::PER_MILLISECOND,
        }
    }

    #[must_use]
    pub fn from_hms(hours: i64, minutes: i64, seconds: i64) -> Self {
        TimeSpan {
            ticks: hours * ticks::PER_HOUR + minutes * ticks::PER_MINUTE + seconds * ticks::PER_SECOND,
        }
    }

    #[must_use]
    pub fn ticks(self) -> i64 {
        self.ticks
    }

    /// Parses the canonical form `[-][d.]hh:mm:ss[.fffffff]`.
    pub fn parse_str(s: &str) -> Result<Self> {
        let bad = || Error::Format(format!("malformed TimeSpan: {s}"));
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut parts = rest.split(':');
        let head = parts.next().ok_or_else(bad)?;
        let minutes_str = parts.next().ok_or_else(bad)?;
        let seconds_str = parts.next().ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }

        let (days, hours_str) = match head.split_once('.') {
            Some((d, h)) => (d.parse::<i64>().map_err(|_| bad())?, h),
            None => (0, head),
        };
        let hours: i64 = hours_str.parse().map_err(|_| bad())?;
        let minutes: i64 = minutes_str.parse().map_err(|_| bad())?;
        let (seconds_str, frac_str) = match seconds_str.split_once('.') {
            Some((sec, frac)) => (sec, Some(frac)),
            None => (seconds_str, None),
        };
        let seconds: i64 = seconds_str.parse().map_err(|_| bad())?;
        if hours > 23 || minutes > 59 || seconds > 59 {
            return Err(bad());
        }
        let frac_ticks: i64 = match frac_str {
            Some(frac) => {
                if frac.is_empty() || frac.len() > 7 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(bad());
                }
                let scale = 10_i64.pow(7 - frac.len() as u32);
                frac.parse::<i64>().map_err(|_| bad())? * scale
            }
            None => 0,
        };

        let magnitude = days * ticks::PER_DAY
            + hours * ticks::PER_HOUR
            + minutes * ticks::PER_MINUTE
            + seconds * ticks::PER_SECOND
            + frac_ticks;
        Ok(TimeSpan {
            ticks: if negative { -magnitude } else { magnitude },
        })
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut t = self.ticks;
        if t < 0 {
            write!(f, "-")?;
            t = -t;
        }
        let days = t / ticks::PER_DAY;
        let hours = (t / ticks::PER_HOUR) % 24;
        let minutes = (t / ticks::PER_MINUTE) % 60;
        let seconds = (t / ticks::PER_SECOND) % 60;
        let frac = t % ticks::PER_SECOND;
        if days > 0 {
            write!(f, "{days}.")?;
        }
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}")?;
        if frac != 0 {
            write!(f, ".{frac:07}")?;
        }
        Ok(())
    }
}

impl FromStr for TimeSpan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TimeSpan::parse_str(s)
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

pub(crate) fn parse_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::Format(format!("odd-length hex string: {s}")));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    for i in (0..s.len()).step_by(2) {
        let pair = s
            .get(i..i + 2)
            .ok_or_else(|| Error::Format(format!("malformed hex string: {s}")))?;
        let byte =
            u8::from_str_radix(pair, 16).map_err(|_| Error::Format(format!("malformed hex string: {s}")))?;
        out.push(byte);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_hex_round_trip() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(oid.to_hex(), "507f1f77bcf86cd799439011");
        assert_eq!(oid.timestamp(), 0x507f_1f77);
        assert!(ObjectId::parse_str("507f1f77").is_err());
        assert!(ObjectId::parse_str("507f1f77bcf86cd79943901g").is_err());
    }

    #[test]
    fn guid_hyphenated_round_trip() {
        let g = Guid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(g.to_hyphenated(), "00112233-4455-6677-8899-aabbccddeeff");
        assert_eq!(g.bytes()[0], 0x00);
        assert_eq!(g.bytes()[15], 0xff);
        assert!(Guid::parse_str("0011223344556677-8899-aabbccddeeff").is_err());
    }

    #[test]
    fn timestamp_packs_into_u64() {
        let ts = Timestamp::new(5, 9);
        assert_eq!(ts.as_u64(), (5 << 32) | 9);
        assert_eq!(Timestamp::from_u64(ts.as_u64()), ts);
    }

    #[test]
    fn timespan_canonical_format() {
        assert_eq!(TimeSpan::from_hms(1, 2, 3).to_string(), "01:02:03");
        assert_eq!(
            TimeSpan::from_ticks(ticks::PER_DAY + ticks::PER_HOUR).to_string(),
            "1.01:00:00"
        );
        assert_eq!(TimeSpan::from_ticks(-ticks::PER_MINUTE).to_string(), "-00:01:00");
        assert_eq!(TimeSpan::from_ticks(1).to_string(), "00:00:00.0000001");
        assert_eq!(
            TimeSpan::from_ticks(ticks::PER_MILLISECOND * 500).to_string(),
            "00:00:00.5000000"
        );
    }

    #[test]
    fn timespan_parse_round_trip() {
        for s in ["01:02:03", "1.01:00:00", "-00:01:00", "00:00:00.0000001", "3.23:59:59.9999999"] {
            let ts = TimeSpan::parse_str(s).unwrap();
            assert_eq!(ts.to_string(), s, "round-trip of {s}");
        }
        assert!(TimeSpan::parse_str("25:00:00").is_err());
        assert!(TimeSpan::parse_str("01:60:00").is_err());
        assert!(TimeSpan::parse_str("01:02").is_err());
        assert!(TimeSpan::parse_str("01:02:03.12345678").is_err());
    }

    #[test]
    fn invalid_element_type_is_reported() {
        assert!(matches!(BsonType::from_byte(0x42), Err(Error::InvalidElementType(0x42))));
        for b in [0x01, 0x07, 0x10, 0x13, 0x7F, 0xFF] {
            let t = BsonType::from_byte(b).unwrap();
            assert_eq!(t.byte(), b);
        }
    }
}
