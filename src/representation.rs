// ABOUTME: Representation conversion: one in-memory type, several wire types.
// ABOUTME: Lossy conversions are classified as overflow or truncation and gated by flags.

use crate::codec::{expect, Codec, DecodeContext, EncodeContext};
use crate::error::{Error, Result};
use crate::reader::BsonReader;
use crate::types::{ticks, BsonType, TimeSpan};
use crate::writer::BsonWriter;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::any::{Any, TypeId};
use std::marker::PhantomData;

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
pub const EPOCH_OFFSET_TICKS: i64 = 621_355_968_000_000_000;

/// Converts values between their in-memory type and a declared wire
/// representation.
///
/// A conversion that would change a value's magnitude is an overflow; one
/// that would lose precision is a truncation. Each is an error unless its
/// allow flag is set, in which case overflow wraps and truncation rounds
/// toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converter {
    pub representation: BsonType,
    pub allow_overflow: bool,
    pub allow_truncation: bool,
}

impl Converter {
    #[must_use]
    pub fn new(representation: BsonType) -> Self {
        Converter {
            representation,
            allow_overflow: false,
            allow_truncation: false,
        }
    }

    #[must_use]
    pub fn with_flags(representation: BsonType, allow_overflow: bool, allow_truncation: bool) -> Self {
        Converter {
            representation,
            allow_overflow,
            allow_truncation,
        }
    }

    pub fn double_from_i64(&self, value: i64) -> Result<f64> {
        let d = value as f64;
        if d as i128 != i128::from(value) && !self.allow_truncation {
            return Err(Error::Truncation(format!(
                "{value} is not exactly representable as a double"
            )));
        }
        Ok(d)
    }

    pub fn double_from_u64(&self, value: u64) -> Result<f64> {
        let d = value as f64;
        if d as u128 != u128::from(value) && !self.allow_truncation {
            return Err(Error::Truncation(format!(
                "{value} is not exactly representable as a double"
            )));
        }
        Ok(d)
    }

    pub fn int64_from_f64(&self, value: f64) -> Result<i64> {
        if value.fract() != 0.0 && !self.allow_truncation {
            return Err(Error::Truncation(format!("{value} has a fractional part")));
        }
        let t = value.trunc();
        const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
        if !(t >= -LIMIT && t < LIMIT) && !self.allow_overflow {
            return Err(Error::Overflow(format!("{value} does not fit in an Int64")));
        }
        Ok(t as i64)
    }

    pub fn int64_from_i64(&self, value: i64) -> Result<i64> {
        Ok(value)
    }

    pub fn int64_from_u64(&self, value: u64) -> Result<i64> {
        match i64::try_from(value) {
            Ok(v) => Ok(v),
            Err(_) if self.allow_overflow => Ok(value as i64),
            Err(_) => Err(Error::Overflow(format!("{value} does not fit in an Int64"))),
        }
    }

    pub fn int32_from_i64(&self, value: i64) -> Result<i32> {
        match i32::try_from(value) {
            Ok(v) => Ok(v),
            Err(_) if self.allow_overflow => Ok(value as i32),
            Err(_) => Err(Error::Overflow(format!("{value} does not fit in an Int32"))),
        }
    }

    pub fn int32_from_f64(&self, value: f64) -> Result<i32> {
        self.int32_from_i64(self.int64_from_f64(value)?)
    }

    pub fn int32_from_u64(&self, value: u64) -> Result<i32> {
        match i32::try_from(value) {
            Ok(v) => Ok(v),
            Err(_) if self.allow_overflow => Ok(value as i32),
            Err(_) => Err(Error::Overflow(format!("{value} does not fit in an Int32"))),
        }
    }

    pub fn f32_from_f64(&self, value: f64) -> Result<f32> {
        let narrowed = value as f32;
        if f64::from(narrowed) == value || (value.is_nan() && narrowed.is_nan()) {
            return Ok(narrowed);
        }
        if value.is_finite() && !narrowed.is_finite() {
            if self.allow_overflow {
                return Ok(narrowed);
            }
            return Err(Error::Overflow(format!("{value} does not fit in an f32")));
        }
        if self.allow_truncation {
            return Ok(narrowed);
        }
        Err(Error::Truncation(format!(
            "{value} is not exactly representable as an f32"
        )))
    }
}

/// Name/value pairs for an enum type, with optional flags semantics.
#[derive(Debug, Clone)]
pub struct EnumTable {
    entries: Vec<(&'static str, i64)>,
    flags: bool,
}

impl EnumTable {
    #[must_use]
    pub fn new(entries: Vec<(&'static str, i64)>) -> Self {
        EnumTable { entries, flags: false }
    }

    /// Flags enums format combined values as a comma-joined name list.
    #[must_use]
    pub fn with_flags(entries: Vec<(&'static str, i64)>) -> Self {
        EnumTable { entries, flags: true }
    }

    /// Formats a raw value as its name, a joined name list for flags, or
    /// the integer's decimal text when no names cover it.
    #[must_use]
    pub fn format(&self, raw: i64) -> String {
        if let Some((name, _)) = self.entries.iter().find(|(_, v)| *v == raw) {
            return (*name).to_owned();
        }
        if self.flags && raw != 0 {
            let mut remaining = raw;
            let mut parts = Vec::new();
            for (name, value) in &self.entries {
                if *value != 0 && raw & value == *value {
                    parts.push(*name);
                    remaining &= !value;
                }
            }
            if remaining == 0 && !parts.is_empty() {
                return parts.join(", ");
            }
        }
        raw.to_string()
    }

    /// Parses a name, a comma-joined name list (flags), or decimal text.
    pub fn parse(&self, text: &str) -> Result<i64> {
        if let Some((_, value)) = self.entries.iter().find(|(n, _)| *n == text) {
            return Ok(*value);
        }
        if let Ok(raw) = text.parse::<i64>() {
            return Ok(raw);
        }
        if self.flags {
            let mut raw = 0;
            for part in text.split(',') {
                let part = part.trim();
                match self.entries.iter().find(|(n, _)| *n == part) {
                    Some((_, value)) => raw |= value,
                    None => {
                        return Err(Error::Format(format!("unrecognized enum name: {part}")))
                    }
                }
            }
            return Ok(raw);
        }
        Err(Error::Format(format!("unrecognized enum name: {text}")))
    }
}

/// Codec for a user enum, driven by an [`EnumTable`] and raw conversions.
pub struct EnumCodec<T> {
    table: EnumTable,
    converter: Converter,
    to_raw: fn(&T) -> i64,
    from_raw: fn(i64) -> Option<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> EnumCodec<T> {
    #[must_use]
    pub fn new(table: EnumTable, to_raw: fn(&T) -> i64, from_raw: fn(i64) -> Option<T>) -> Self {
        EnumCodec {
            table,
            converter: Converter::new(BsonType::Int32),
            to_raw,
            from_raw,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn with_representation(mut self, representation: BsonType) -> Self {
        self.converter = Converter::new(representation);
        self
    }
}

impl<T: 'static> Codec for EnumCodec<T> {
    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let raw = (self.to_raw)(expect::<T>(value)?);
        match converter.representation {
            BsonType::Int32 => writer.write_int32(converter.int32_from_i64(raw)?),
            BsonType::Int64 => writer.write_int64(raw),
            BsonType::Double => writer.write_double(converter.double_from_i64(raw)?),
            BsonType::String => writer.write_string(&self.table.format(raw)),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for an enum"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<crate::codec::AnyValue> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let found = reader.peek_bson_type()?;
        // A string-represented enum only accepts strings; numbers read back
        // through the numeric paths.
        let raw = if converter.representation == BsonType::String {
            if found != BsonType::String {
                return Err(Error::Format(format!(
                    "enum is represented as String but the element is {found}"
                )));
            }
            self.table.parse(&reader.read_string()?)?
        } else {
            match found {
                BsonType::Int32 => i64::from(reader.read_int32()?),
                BsonType::Int64 => reader.read_int64()?,
                BsonType::Double => converter.int64_from_f64(reader.read_double()?)?,
                other => {
                    return Err(Error::Format(format!("cannot decode an enum from {other}")))
                }
            }
        };
        let value = (self.from_raw)(raw)
            .ok_or_else(|| Error::Format(format!("{raw} is not a valid value for this enum")))?;
        Ok(Box::new(value))
    }
}

/// Codec for `chrono::DateTime<Utc>`.
///
/// Values are truncated to millisecond precision on encode regardless of
/// representation, matching the native wire type's resolution.
pub struct DateTimeCodec {
    converter: Converter,
    date_only: bool,
}

impl DateTimeCodec {
    #[must_use]
    pub fn new() -> Self {
        DateTimeCodec {
            converter: Converter::new(BsonType::DateTime),
            date_only: false,
        }
    }

    #[must_use]
    pub fn with_representation(mut self, representation: BsonType) -> Self {
        self.converter = Converter::new(representation);
        self
    }

    /// Store only the calendar date; the time of day must be midnight.
    #[must_use]
    pub fn date_only(mut self) -> Self {
        self.date_only = true;
        self
    }

    fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::Format(format!("datetime out of range: {millis} ms")))
    }
}

impl Default for DateTimeCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn millis_to_ticks(millis: i64) -> i64 {
    millis * ticks::PER_MILLISECOND + EPOCH_OFFSET_TICKS
}

fn ticks_to_millis(dotnet_ticks: i64) -> i64 {
    (dotnet_ticks - EPOCH_OFFSET_TICKS).div_euclid(ticks::PER_MILLISECOND)
}

impl Codec for DateTimeCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<DateTime<Utc>>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let dt = expect::<DateTime<Utc>>(value)?;
        let millis = dt.timestamp_millis();
        if self.date_only && millis.rem_euclid(ticks::PER_DAY / ticks::PER_MILLISECOND) != 0 {
            return Err(Error::Format(format!(
                "date-only value has a time component: {dt}"
            )));
        }
        match converter.representation {
            BsonType::DateTime => writer.write_datetime(millis),
            BsonType::Int64 => writer.write_int64(millis_to_ticks(millis)),
            BsonType::Double => writer.write_double(converter.double_from_i64(millis)?),
            BsonType::String => {
                let dt = Self::from_millis(millis)?;
                let text = if self.date_only {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
                };
                writer.write_string(&text)
            }
            BsonType::Document => {
                writer.write_start_document()?;
                writer.write_name("DateTime")?;
                writer.write_datetime(millis)?;
                writer.write_name("Ticks")?;
                writer.write_int64(millis_to_ticks(millis))?;
                writer.write_end_document()
            }
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for DateTime"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<crate::codec::AnyValue> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let millis = match reader.peek_bson_type()? {
            BsonType::DateTime => reader.read_datetime()?,
            BsonType::Int64 => ticks_to_millis(reader.read_int64()?),
            BsonType::Double => converter.int64_from_f64(reader.read_double()?)?,
            BsonType::String => {
                let text = reader.read_string()?;
                if self.date_only {
                    let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                        .map_err(|_| Error::Format(format!("malformed date: {text}")))?;
                    let dt = date
                        .and_hms_opt(0, 0, 0)
                        .ok_or_else(|| Error::Format(format!("malformed date: {text}")))?;
                    dt.and_utc().timestamp_millis()
                } else {
                    DateTime::parse_from_rfc3339(&text)
                        .map_err(|_| Error::Format(format!("malformed datetime: {text}")))?
                        .with_timezone(&Utc)
                        .timestamp_millis()
                }
            }
            BsonType::Document => {
                let doc = crate::reader::read_document(reader)?;
                match (doc.get("Ticks"), doc.get("DateTime")) {
                    (Some(crate::value::Bson::Int64(t)), _) => ticks_to_millis(*t),
                    (None, Some(crate::value::Bson::DateTime(ms))) => *ms,
                    _ => {
                        return Err(Error::Format(
                            "datetime document needs a Ticks or DateTime element".into(),
                        ))
                    }
                }
            }
            other => return Err(Error::Format(format!("cannot decode a DateTime from {other}"))),
        };
        Ok(Box::new(Self::from_millis(millis)?))
    }
}

/// The unit a numeric-represented [`TimeSpan`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeSpanUnits {
    #[default]
    Ticks,
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeSpanUnits {
    /// Ticks per unit; `None` for nanoseconds, which are finer than a tick.
    fn ticks_per_unit(self) -> Option<i64> {
        match self {
            TimeSpanUnits::Ticks => Some(1),
            TimeSpanUnits::Days => Some(ticks::PER_DAY),
            TimeSpanUnits::Hours => Some(ticks::PER_HOUR),
            TimeSpanUnits::Minutes => Some(ticks::PER_MINUTE),
            TimeSpanUnits::Seconds => Some(ticks::PER_SECOND),
            TimeSpanUnits::Milliseconds => Some(ticks::PER_MILLISECOND),
            TimeSpanUnits::Microseconds => Some(ticks::PER_MICROSECOND),
            TimeSpanUnits::Nanoseconds => None,
        }
    }

    fn value_from_ticks(self, t: i64) -> Result<i64> {
        match self.ticks_per_unit() {
            Some(per) => Ok(t / per),
            None => t
                .checked_mul(100)
                .ok_or_else(|| Error::Overflow(format!("{t} ticks does not fit in nanoseconds"))),
        }
    }

    fn ticks_from_value(self, v: i64) -> Result<i64> {
        match self.ticks_per_unit() {
            Some(per) => v
                .checked_mul(per)
                .ok_or_else(|| Error::Overflow(format!("{v} does not fit in a TimeSpan"))),
            None => Ok(v / 100),
        }
    }
}

/// Codec for [`TimeSpan`]. The default is the canonical string form.
pub struct TimeSpanCodec {
    converter: Converter,
    units: TimeSpanUnits,
}

impl TimeSpanCodec {
    #[must_use]
    pub fn new() -> Self {
        TimeSpanCodec {
            converter: Converter::new(BsonType::String),
            units: TimeSpanUnits::Ticks,
        }
    }

    #[must_use]
    pub fn with_representation(mut self, representation: BsonType, units: TimeSpanUnits) -> Self {
        self.converter = Converter::new(representation);
        self.units = units;
        self
    }
}

impl Default for TimeSpanCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for TimeSpanCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<TimeSpan>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let ts = *expect::<TimeSpan>(value)?;
        match converter.representation {
            BsonType::String => writer.write_string(&ts.to_string()),
            BsonType::Int64 => writer.write_int64(self.units.value_from_ticks(ts.ticks())?),
            BsonType::Int32 => {
                writer.write_int32(converter.int32_from_i64(self.units.value_from_ticks(ts.ticks())?)?)
            }
            BsonType::Double => {
                // Doubles carry the fractional total, like 1.5 hours.
                let per = self
                    .units
                    .ticks_per_unit()
                    .map_or(0.01, |per| per as f64);
                writer.write_double(ts.ticks() as f64 / per)
            }
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for TimeSpan"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<crate::codec::AnyValue> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let ts = match reader.peek_bson_type()? {
            BsonType::String => TimeSpan::parse_str(&reader.read_string()?)?,
            BsonType::Int32 => TimeSpan::from_ticks(self.units.ticks_from_value(i64::from(reader.read_int32()?))?),
            BsonType::Int64 => TimeSpan::from_ticks(self.units.ticks_from_value(reader.read_int64()?)?),
            BsonType::Double => {
                let v = reader.read_double()?;
                let per = self
                    .units
                    .ticks_per_unit()
                    .map_or(0.01, |per| per as f64);
                TimeSpan::from_ticks(converter.int64_from_f64(v * per)?)
            }
            other => return Err(Error::Format(format!("cannot decode a TimeSpan from {other}"))),
        };
        Ok(Box::new(ts))
    }
}
