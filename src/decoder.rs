// ABOUTME: Binary BSON reader over a byte slice with structural validation.
// ABOUTME: Length prefixes are checked against the input and every close position verified.

use crate::error::{Error, Result};
use crate::reader::BsonReader;
use crate::types::{limits, Binary, BinarySubtype, BsonType, Decimal128, ObjectId, Timestamp};

/// Validate and convert bytes to a UTF-8 string.
/// Uses simdutf8 for SIMD-accelerated validation when the feature is enabled.
#[cfg(feature = "simd-utf8")]
#[inline]
fn validate_utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
}

#[cfg(not(feature = "simd-utf8"))]
#[inline]
fn validate_utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
}

/// Configuration options for the binary reader.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Allow unconsumed bytes after the root document (default: false)
    pub allow_trailing_bytes: bool,
    /// Maximum container nesting depth
    pub max_depth: usize,
    /// Maximum document size in bytes
    pub max_document_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            allow_trailing_bytes: false,
            max_depth: limits::MAX_DEPTH,
            max_document_size: limits::MAX_DOCUMENT_SIZE,
        }
    }
}

#[derive(Clone, Copy)]
struct Frame {
    /// One past the container's final terminator byte.
    end: usize,
    is_array: bool,
    /// Expected index of the next element, in array frames.
    index: u32,
}

struct Pending {
    ty: BsonType,
    name: String,
}

/// A [`BsonReader`] that decodes from a byte slice.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    config: ReaderConfig,
    frames: Vec<Frame>,
    pending: Option<Pending>,
}

impl<'a> BinaryReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_config(data, ReaderConfig::default())
    }

    #[must_use]
    pub fn with_config(data: &'a [u8], config: ReaderConfig) -> Self {
        BinaryReader {
            data,
            pos: 0,
            config,
            frames: Vec::new(),
            pending: None,
        }
    }

    /// Current position in the input.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Verifies that the root document consumed the whole input.
    pub fn finish(&self) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(Error::Format("document was not fully read".into()));
        }
        if self.pos < self.data.len() && !self.config.allow_trailing_bytes {
            return Err(Error::TrailingBytes);
        }
        Ok(())
    }

    #[inline]
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(Error::Truncated)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    #[inline]
    fn read_i32_raw(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    #[inline]
    fn read_i64_raw(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().map_err(|_| Error::Truncated)?))
    }

    /// Reads a NUL-terminated cstring, not including the terminator.
    fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let nul = memchr::memchr(0, rest).ok_or(Error::Truncated)?;
        let s = validate_utf8(&rest[..nul])?;
        self.pos += nul + 1;
        Ok(s)
    }

    /// Reads a length-prefixed string payload (length includes the NUL).
    fn read_string_payload(&mut self) -> Result<String> {
        let len = self.read_i32_raw()?;
        if len < 1 {
            return Err(Error::Format(format!("string length must be positive, got {len}")));
        }
        let bytes = self.take(len as usize)?;
        let (payload, terminator) = bytes.split_at(bytes.len() - 1);
        if terminator != [0] {
            return Err(Error::Format("string payload is not NUL-terminated".into()));
        }
        Ok(validate_utf8(payload)?.to_owned())
    }

    /// Consumes the pending element header, checking the value type.
    fn begin_value(&mut self, expected: BsonType) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| Error::Format("value read without an element header".into()))?;
        if pending.ty != expected {
            return Err(Error::Format(format!(
                "expected {expected}, found {} (element '{}')",
                pending.ty, pending.name
            )));
        }
        Ok(())
    }

    fn open_container(&mut self, is_array: bool) -> Result<()> {
        if self.frames.len() >= self.config.max_depth {
            return Err(Error::MaxDepthExceeded);
        }
        let start = self.pos;
        let len = self.read_i32_raw()?;
        if len < 5 {
            return Err(Error::Format(format!("container length {len} is below the minimum of 5")));
        }
        let len = len as usize;
        if len > self.config.max_document_size {
            return Err(Error::MaxDocumentSizeExceeded);
        }
        let end = start.checked_add(len).ok_or(Error::Truncated)?;
        if end > self.data.len() {
            return Err(Error::Truncated);
        }
        if let Some(parent) = self.frames.last() {
            if end > parent.end {
                return Err(Error::Format("container overruns its parent".into()));
            }
        }
        self.frames.push(Frame {
            end,
            is_array,
            index: 0,
        });
        Ok(())
    }

    fn close_container(&mut self, expect_array: bool) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::Format("container closed with an unread element".into()));
        }
        let frame = self
            .frames
            .last()
            .copied()
            .ok_or_else(|| Error::Format("no open container to close".into()))?;
        if frame.is_array != expect_array {
            return Err(Error::Format("mismatched container close".into()));
        }
        let terminator = self.take(1)?;
        if terminator != [0] {
            return Err(Error::Format("container is missing its terminator".into()));
        }
        if self.pos != frame.end {
            return Err(Error::Format("container length prefix does not match its contents".into()));
        }
        self.frames.pop();
        Ok(())
    }
}

impl BsonReader for BinaryReader<'_> {
    fn read_bson_type(&mut self) -> Result<Option<BsonType>> {
        if let Some(pending) = &self.pending {
            return Ok(Some(pending.ty));
        }
        // At an unopened root the value is the top-level document itself.
        let Some(frame) = self.frames.last().copied() else {
            return Ok(Some(BsonType::Document));
        };
        let byte = *self.data.get(self.pos).ok_or(Error::Truncated)?;
        if byte == 0 {
            if self.pos + 1 != frame.end {
                return Err(Error::Format("container terminator before its declared end".into()));
            }
            return Ok(None);
        }
        self.pos += 1;
        let ty = BsonType::from_byte(byte)?;
        let name = self.read_cstring()?.to_owned();
        if frame.is_array {
            if name != frame.index.to_string() {
                return Err(Error::Format(format!(
                    "array element name '{name}' is not the expected index {}",
                    frame.index
                )));
            }
            if let Some(top) = self.frames.last_mut() {
                top.index += 1;
            }
        }
        self.pending = Some(Pending { ty, name });
        Ok(Some(ty))
    }

    fn read_name(&mut self) -> Result<String> {
        match &self.pending {
            Some(pending) => Ok(pending.name.clone()),
            None => Err(Error::Format("no element header to read a name from".into())),
        }
    }

    fn read_start_document(&mut self) -> Result<()> {
        if self.frames.is_empty() && self.pending.is_none() {
            if self.data.len() > self.config.max_document_size {
                return Err(Error::MaxDocumentSizeExceeded);
            }
        } else {
            self.begin_value(BsonType::Document)?;
        }
        self.open_container(false)
    }

    fn read_end_document(&mut self) -> Result<()> {
        self.close_container(false)
    }

    fn read_start_array(&mut self) -> Result<()> {
        self.begin_value(BsonType::Array)?;
        self.open_container(true)
    }

    fn read_end_array(&mut self) -> Result<()> {
        self.close_container(true)
    }

    fn read_double(&mut self) -> Result<f64> {
        self.begin_value(BsonType::Double)?;
        Ok(f64::from_bits(self.read_i64_raw()? as u64))
    }

    fn read_string(&mut self) -> Result<String> {
        self.begin_value(BsonType::String)?;
        self.read_string_payload()
    }

    fn read_boolean(&mut self) -> Result<bool> {
        self.begin_value(BsonType::Boolean)?;
        match self.take(1)? {
            [0] => Ok(false),
            [1] => Ok(true),
            [other] => Err(Error::Format(format!("boolean byte must be 0 or 1, got {other}"))),
            _ => unreachable!(),
        }
    }

    fn read_int32(&mut self) -> Result<i32> {
        self.begin_value(BsonType::Int32)?;
        self.read_i32_raw()
    }

    fn read_int64(&mut self) -> Result<i64> {
        self.begin_value(BsonType::Int64)?;
        self.read_i64_raw()
    }

    fn read_datetime(&mut self) -> Result<i64> {
        self.begin_value(BsonType::DateTime)?;
        self.read_i64_raw()
    }

    fn read_null(&mut self) -> Result<()> {
        self.begin_value(BsonType::Null)
    }

    fn read_undefined(&mut self) -> Result<()> {
        self.begin_value(BsonType::Undefined)
    }

    fn read_object_id(&mut self) -> Result<ObjectId> {
        self.begin_value(BsonType::ObjectId)?;
        let bytes = self.take(12)?;
        Ok(ObjectId::from_bytes(bytes.try_into().map_err(|_| Error::Truncated)?))
    }

    fn read_binary(&mut self) -> Result<Binary> {
        self.begin_value(BsonType::Binary)?;
        let len = self.read_i32_raw()?;
        if len < 0 {
            return Err(Error::Format(format!("binary length must be non-negative, got {len}")));
        }
        let subtype = BinarySubtype::from_byte(self.take(1)?[0]);
        let mut bytes = self.take(len as usize)?;
        // The deprecated "old binary" subtype nests a second length prefix.
        if subtype == BinarySubtype::BinaryOld {
            if bytes.len() < 4 {
                return Err(Error::Format("old binary payload is missing its inner length".into()));
            }
            let inner = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if inner as usize != bytes.len() - 4 {
                return Err(Error::Format("old binary inner length mismatch".into()));
            }
            bytes = &bytes[4..];
        }
        Ok(Binary::new(subtype, bytes.to_vec()))
    }

    fn read_timestamp(&mut self) -> Result<Timestamp> {
        self.begin_value(BsonType::Timestamp)?;
        Ok(Timestamp::from_u64(self.read_i64_raw()? as u64))
    }

    fn read_decimal128(&mut self) -> Result<Decimal128> {
        self.begin_value(BsonType::Decimal128)?;
        let bytes = self.take(16)?;
        Ok(Decimal128::from_bytes(bytes.try_into().map_err(|_| Error::Truncated)?))
    }

    fn read_regex(&mut self) -> Result<(String, String)> {
        self.begin_value(BsonType::RegularExpression)?;
        let pattern = self.read_cstring()?.to_owned();
        let options = self.read_cstring()?.to_owned();
        Ok((pattern, options))
    }

    fn read_javascript(&mut self) -> Result<String> {
        self.begin_value(BsonType::JavaScript)?;
        self.read_string_payload()
    }

    fn read_symbol(&mut self) -> Result<String> {
        self.begin_value(BsonType::Symbol)?;
        self.read_string_payload()
    }

    fn read_min_key(&mut self) -> Result<()> {
        self.begin_value(BsonType::MinKey)
    }

    fn read_max_key(&mut self) -> Result<()> {
        self.begin_value(BsonType::MaxKey)
    }

    fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_document;
    use crate::value::Bson;
    use crate::doc;

    fn encode(doc: &crate::document::Document) -> Vec<u8> {
        let mut w = crate::encoder::BinaryWriter::new();
        crate::writer::write_document(&mut w, doc).unwrap();
        w.into_vec().unwrap()
    }

    #[test]
    fn decodes_known_bytes() {
        let bytes = [
            0x0C, 0x00, 0x00, 0x00, 0x10, b'a', 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        let mut r = BinaryReader::new(&bytes);
        let doc = read_document(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(doc, doc! { "a" => 1 });
    }

    #[test]
    fn peeking_at_the_root_reports_a_document() {
        use crate::reader::BsonReader;
        let bytes = encode(&doc! { "a" => 1 });
        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.peek_bson_type().unwrap(), BsonType::Document);
        // Peeking must not consume anything; the document still decodes.
        let doc = read_document(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(doc, doc! { "a" => 1 });
    }

    #[test]
    fn round_trips_every_element_type() {
        let doc = doc! {
            "double" => 1.5,
            "string" => "hi",
            "doc" => doc! { "x" => 1 },
            "arr" => vec![Bson::Int32(1), Bson::from("two")],
            "bin" => Binary::new(BinarySubtype::Generic, vec![1, 2, 3]),
            "oid" => ObjectId::from_bytes([7; 12]),
            "bool" => true,
            "date" => Bson::DateTime(1_700_000_000_000),
            "null" => Bson::Null,
            "regex" => Bson::RegularExpression { pattern: "^a".into(), options: "i".into() },
            "js" => Bson::JavaScript("return 1;".into()),
            "sym" => Bson::Symbol("sym".into()),
            "i32" => i32::MIN,
            "ts" => Timestamp::new(10, 2),
            "i64" => i64::MAX,
            "dec" => Decimal128::from_bytes([9; 16]),
            "min" => Bson::MinKey,
            "max" => Bson::MaxKey,
        };
        let bytes = encode(&doc);
        let mut r = BinaryReader::new(&bytes);
        let back = read_document(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn truncated_input_is_detected() {
        let bytes = encode(&doc! { "a" => 1, "b" => "hello" });
        for cut in 1..bytes.len() {
            let mut r = BinaryReader::new(&bytes[..cut]);
            assert!(
                read_document(&mut r).is_err(),
                "prefix of {cut} bytes should not decode"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_detected() {
        let mut bytes = encode(&doc! { "a" => 1 });
        bytes.push(0xAB);
        let mut r = BinaryReader::new(&bytes);
        read_document(&mut r).unwrap();
        assert!(matches!(r.finish(), Err(Error::TrailingBytes)));

        let mut r = BinaryReader::with_config(
            &bytes,
            ReaderConfig {
                allow_trailing_bytes: true,
                ..ReaderConfig::default()
            },
        );
        read_document(&mut r).unwrap();
        r.finish().unwrap();
    }

    #[test]
    fn bad_array_index_names_are_rejected() {
        // {"v": ["0" -> true]} with the index name forged as "7".
        let bytes = [
            0x10, 0x00, 0x00, 0x00, // doc length
            0x04, b'v', 0x00, // array "v"
            0x07, 0x00, 0x00, 0x00, // array length
            0x08, b'7', 0x00, // boolean named "7"
            0x01, // true (unreachable)
            0x00, 0x00,
        ];
        let mut r = BinaryReader::new(&bytes);
        assert!(read_document(&mut r).is_err());
    }

    #[test]
    fn length_prefix_mismatch_is_rejected() {
        let mut bytes = encode(&doc! { "a" => 1 });
        // Claim the document is one byte longer than it is.
        bytes[0] += 1;
        let mut r = BinaryReader::new(&bytes);
        assert!(read_document(&mut r).is_err());
    }

    #[test]
    fn invalid_utf8_in_string_is_rejected() {
        let mut bytes = encode(&doc! { "s" => "ab" });
        // Corrupt the string payload.
        let idx = bytes.len() - 4;
        bytes[idx] = 0xFF;
        let mut r = BinaryReader::new(&bytes);
        assert!(matches!(read_document(&mut r), Err(Error::InvalidUtf8)));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut doc = doc! { "x" => 1 };
        for _ in 0..10 {
            doc = doc! { "d" => doc };
        }
        let bytes = encode(&doc);
        let mut r = BinaryReader::with_config(
            &bytes,
            ReaderConfig {
                max_depth: 5,
                ..ReaderConfig::default()
            },
        );
        assert!(matches!(read_document(&mut r), Err(Error::MaxDepthExceeded)));
    }
}
