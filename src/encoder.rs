// ABOUTME: Binary BSON writer producing length-prefixed little-endian documents.
// ABOUTME: Container lengths are back-patched when each document or array is closed.

use crate::error::{Error, Result};
use crate::types::{element_type, limits, Binary, Decimal128, ObjectId, Timestamp};
use crate::writer::{validate_element_name, BsonWriter};

/// Configuration options for the binary writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum container nesting depth
    pub max_depth: usize,
    /// Maximum encoded document size in bytes
    pub max_document_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_depth: limits::MAX_DEPTH,
            max_document_size: limits::MAX_DOCUMENT_SIZE,
        }
    }
}

#[derive(Clone, Copy)]
struct Frame {
    /// Offset of the container's 4-byte length prefix.
    start: usize,
    is_array: bool,
    /// Next auto-assigned element index, in array frames.
    index: u32,
}

/// A [`BsonWriter`] that encodes to an in-memory byte buffer.
pub struct BinaryWriter {
    buf: Vec<u8>,
    frames: Vec<Frame>,
    pending_name: Option<String>,
    config: WriterConfig,
}

impl BinaryWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WriterConfig::default())
    }

    #[must_use]
    pub fn with_config(config: WriterConfig) -> Self {
        BinaryWriter {
            buf: Vec::new(),
            frames: Vec::new(),
            pending_name: None,
            config,
        }
    }

    /// Finishes encoding and returns the document bytes.
    pub fn into_vec(self) -> Result<Vec<u8>> {
        if !self.frames.is_empty() {
            return Err(Error::Format("unclosed container".into()));
        }
        if self.buf.is_empty() {
            return Err(Error::Format("no document was written".into()));
        }
        Ok(self.buf)
    }

    /// Writes the element type byte and name for the next value.
    fn element_prefix(&mut self, type_byte: u8) -> Result<()> {
        match self.frames.last_mut() {
            Some(frame) if frame.is_array => {
                if self.pending_name.is_some() {
                    return Err(Error::Format("element names are not valid inside arrays".into()));
                }
                let index = frame.index;
                frame.index += 1;
                self.buf.push(type_byte);
                self.buf.extend_from_slice(index.to_string().as_bytes());
                self.buf.push(0);
                Ok(())
            }
            Some(_) => {
                let name = self
                    .pending_name
                    .take()
                    .ok_or_else(|| Error::Format("value written without an element name".into()))?;
                self.buf.push(type_byte);
                self.buf.extend_from_slice(name.as_bytes());
                self.buf.push(0);
                Ok(())
            }
            None => Err(Error::Format("scalar value at top level; BSON requires a document".into())),
        }
    }

    fn open_container(&mut self, is_array: bool) -> Result<()> {
        if self.frames.len() >= self.config.max_depth {
            return Err(Error::MaxDepthExceeded);
        }
        self.frames.push(Frame {
            start: self.buf.len(),
            is_array,
            index: 0,
        });
        // Length placeholder, patched on close.
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        Ok(())
    }

    fn close_container(&mut self, expect_array: bool) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::Format("no open container to close".into()))?;
        if frame.is_array != expect_array {
            return Err(Error::Format("mismatched container close".into()));
        }
        if self.pending_name.is_some() {
            return Err(Error::Format("document closed with a dangling element name".into()));
        }
        self.buf.push(0);
        let len = self.buf.len() - frame.start;
        let len = i32::try_from(len).map_err(|_| Error::MaxDocumentSizeExceeded)?;
        self.buf[frame.start..frame.start + 4].copy_from_slice(&len.to_le_bytes());
        if self.frames.is_empty() && self.buf.len() > self.config.max_document_size {
            return Err(Error::MaxDocumentSizeExceeded);
        }
        Ok(())
    }

    /// Writes a length-prefixed string payload (length includes the NUL).
    fn push_string_payload(&mut self, value: &str) -> Result<()> {
        let len = i32::try_from(value.len() + 1)
            .map_err(|_| Error::Format("string too long for a BSON length prefix".into()))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn push_cstring(&mut self, value: &str) -> Result<()> {
        if value.as_bytes().contains(&0) {
            return Err(Error::Format("cstring value contains a NUL byte".into()));
        }
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        Ok(())
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BsonWriter for BinaryWriter {
    fn write_start_document(&mut self) -> Result<()> {
        if self.frames.is_empty() {
            if !self.buf.is_empty() {
                return Err(Error::Format("a root document was already written".into()));
            }
        } else {
            self.element_prefix(element_type::DOCUMENT)?;
        }
        self.open_container(false)
    }

    fn write_end_document(&mut self) -> Result<()> {
        self.close_container(false)
    }

    fn write_start_array(&mut self) -> Result<()> {
        self.element_prefix(element_type::ARRAY)?;
        self.open_container(true)
    }

    fn write_end_array(&mut self) -> Result<()> {
        self.close_container(true)
    }

    fn write_name(&mut self, name: &str) -> Result<()> {
        validate_element_name(name)?;
        match self.frames.last() {
            Some(frame) if !frame.is_array => {
                if self.pending_name.is_some() {
                    return Err(Error::Format("element name written twice".into()));
                }
                self.pending_name = Some(name.to_owned());
                Ok(())
            }
            Some(_) => Err(Error::Format("element names are not valid inside arrays".into())),
            None => Err(Error::Format("element name outside any document".into())),
        }
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.element_prefix(element_type::DOUBLE)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.element_prefix(element_type::STRING)?;
        self.push_string_payload(value)
    }

    fn write_boolean(&mut self, value: bool) -> Result<()> {
        self.element_prefix(element_type::BOOLEAN)?;
        self.buf.push(u8::from(value));
        Ok(())
    }

    fn write_int32(&mut self, value: i32) -> Result<()> {
        self.element_prefix(element_type::INT32)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_int64(&mut self, value: i64) -> Result<()> {
        self.element_prefix(element_type::INT64)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_datetime(&mut self, millis: i64) -> Result<()> {
        self.element_prefix(element_type::DATE_TIME)?;
        self.buf.extend_from_slice(&millis.to_le_bytes());
        Ok(())
    }

    fn write_null(&mut self) -> Result<()> {
        self.element_prefix(element_type::NULL)
    }

    fn write_object_id(&mut self, oid: ObjectId) -> Result<()> {
        self.element_prefix(element_type::OBJECT_ID)?;
        self.buf.extend_from_slice(&oid.bytes());
        Ok(())
    }

    fn write_binary(&mut self, binary: &Binary) -> Result<()> {
        self.element_prefix(element_type::BINARY)?;
        let len = i32::try_from(binary.bytes.len())
            .map_err(|_| Error::Format("binary payload too long".into()))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.push(binary.subtype.byte());
        self.buf.extend_from_slice(&binary.bytes);
        Ok(())
    }

    fn write_timestamp(&mut self, ts: Timestamp) -> Result<()> {
        self.element_prefix(element_type::TIMESTAMP)?;
        self.buf.extend_from_slice(&ts.as_u64().to_le_bytes());
        Ok(())
    }

    fn write_decimal128(&mut self, value: Decimal128) -> Result<()> {
        self.element_prefix(element_type::DECIMAL128)?;
        self.buf.extend_from_slice(&value.bytes());
        Ok(())
    }

    fn write_regex(&mut self, pattern: &str, options: &str) -> Result<()> {
        self.element_prefix(element_type::REGULAR_EXPRESSION)?;
        self.push_cstring(pattern)?;
        self.push_cstring(options)
    }

    fn write_javascript(&mut self, code: &str) -> Result<()> {
        self.element_prefix(element_type::JAVASCRIPT)?;
        self.push_string_payload(code)
    }

    fn write_symbol(&mut self, symbol: &str) -> Result<()> {
        self.element_prefix(element_type::SYMBOL)?;
        self.push_string_payload(symbol)
    }

    fn write_min_key(&mut self) -> Result<()> {
        self.element_prefix(element_type::MIN_KEY)
    }

    fn write_max_key(&mut self) -> Result<()> {
        self.element_prefix(element_type::MAX_KEY)
    }

    fn depth(&self) -> usize {
        self.frames.len()
    }
}
