// ABOUTME: Extended JSON backend: a writer with Shell and Strict output modes,
// ABOUTME: and a reader that parses both shell constructor literals and $-wrappers.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::reader::{BsonReader, DocumentReader};
use crate::types::{Binary, BinarySubtype, BsonType, Decimal128, Guid, ObjectId, Timestamp};
use crate::value::Bson;
use crate::writer::{validate_element_name, BsonWriter};
use chrono::{DateTime, TimeZone, Utc};

/// The dialect emitted by [`JsonWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonOutputMode {
    /// Mongo shell syntax: `ISODate(...)`, `NumberLong(...)`, `ObjectId(...)`,
    /// `UUID(...)`, bare `NaN`/`Infinity`. Not strictly valid JSON.
    #[default]
    Shell,
    /// Strict extended JSON using `$`-prefixed wrapper documents. Valid JSON
    /// apart from non-finite doubles, which have no JSON representation.
    Strict,
}

struct JsonFrame {
    is_array: bool,
    first: bool,
}

/// A [`BsonWriter`] that renders extended JSON text.
pub struct JsonWriter {
    out: String,
    mode: JsonOutputMode,
    stack: Vec<JsonFrame>,
    pending_name: Option<String>,
    root_done: bool,
}

impl JsonWriter {
    #[must_use]
    pub fn new(mode: JsonOutputMode) -> Self {
        JsonWriter {
            out: String::new(),
            mode,
            stack: Vec::new(),
            pending_name: None,
            root_done: false,
        }
    }

    /// Finishes writing and returns the rendered text.
    pub fn into_string(self) -> Result<String> {
        if !self.stack.is_empty() {
            return Err(Error::Format("unclosed container".into()));
        }
        if !self.root_done {
            return Err(Error::Format("no document was written".into()));
        }
        Ok(self.out)
    }

    /// Emits the separator and, inside documents, the pending element name.
    fn before_value(&mut self) -> Result<()> {
        let is_array = match self.stack.last() {
            Some(frame) => frame.is_array,
            None => {
                return Err(Error::Format("scalar value at top level; BSON requires a document".into()))
            }
        };
        let first = self.stack.last().map_or(true, |f| f.first);
        if first {
            if let Some(frame) = self.stack.last_mut() {
                frame.first = false;
            }
        } else {
            self.out.push(',');
        }
        if is_array {
            if self.pending_name.is_some() {
                return Err(Error::Format("element names are not valid inside arrays".into()));
            }
        } else {
            let name = self
                .pending_name
                .take()
                .ok_or_else(|| Error::Format("value written without an element name".into()))?;
            push_quoted(&mut self.out, &name);
            self.out.push(':');
        }
        Ok(())
    }

    fn push_wrapper(&mut self, key: &str, render: impl FnOnce(&mut String)) {
        self.out.push('{');
        push_quoted(&mut self.out, key);
        self.out.push(':');
        render(&mut self.out);
        self.out.push('}');
    }
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    let s = format!("{value}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

fn format_iso_datetime(millis: i64) -> Result<String> {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Format(format!("datetime out of range: {millis} ms")))?;
    Ok(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

impl BsonWriter for JsonWriter {
    fn write_start_document(&mut self) -> Result<()> {
        if self.stack.is_empty() {
            if self.root_done {
                return Err(Error::Format("a root document was already written".into()));
            }
        } else {
            self.before_value()?;
        }
        self.out.push('{');
        self.stack.push(JsonFrame {
            is_array: false,
            first: true,
        });
        Ok(())
    }

    fn write_end_document(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(frame) if !frame.is_array => {
                if self.pending_name.is_some() {
                    return Err(Error::Format("document closed with a dangling element name".into()));
                }
                self.out.push('}');
                if self.stack.is_empty() {
                    self.root_done = true;
                }
                Ok(())
            }
            _ => Err(Error::Format("mismatched container close".into())),
        }
    }

    fn write_start_array(&mut self) -> Result<()> {
        if self.stack.is_empty() {
            return Err(Error::Format("array at top level; BSON requires a document".into()));
        }
        self.before_value()?;
        self.out.push('[');
        self.stack.push(JsonFrame {
            is_array: true,
            first: true,
        });
        Ok(())
    }

    fn write_end_array(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(frame) if frame.is_array => {
                self.out.push(']');
                Ok(())
            }
            _ => Err(Error::Format("mismatched container close".into())),
        }
    }

    fn write_name(&mut self, name: &str) -> Result<()> {
        validate_element_name(name)?;
        match self.stack.last() {
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
        self.before_value()?;
        self.out.push_str(&format_double(value));
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.before_value()?;
        push_quoted(&mut self.out, value);
        Ok(())
    }

    fn write_boolean(&mut self, value: bool) -> Result<()> {
        self.before_value()?;
        self.out.push_str(if value { "true" } else { "false" });
        Ok(())
    }

    fn write_int32(&mut self, value: i32) -> Result<()> {
        self.before_value()?;
        self.out.push_str(&value.to_string());
        Ok(())
    }

    fn write_int64(&mut self, value: i64) -> Result<()> {
        self.before_value()?;
        match self.mode {
            JsonOutputMode::Shell => self.out.push_str(&format!("NumberLong({value})")),
            JsonOutputMode::Strict => self.out.push_str(&value.to_string()),
        }
        Ok(())
    }

    fn write_datetime(&mut self, millis: i64) -> Result<()> {
        self.before_value()?;
        match self.mode {
            JsonOutputMode::Shell => {
                let iso = format_iso_datetime(millis)?;
                self.out.push_str(&format!("ISODate(\"{iso}\")"));
            }
            JsonOutputMode::Strict => {
                self.push_wrapper("$date", |out| out.push_str(&millis.to_string()));
            }
        }
        Ok(())
    }

    fn write_null(&mut self) -> Result<()> {
        self.before_value()?;
        self.out.push_str("null");
        Ok(())
    }

    fn write_object_id(&mut self, oid: ObjectId) -> Result<()> {
        self.before_value()?;
        match self.mode {
            JsonOutputMode::Shell => self.out.push_str(&format!("ObjectId(\"{}\")", oid.to_hex())),
            JsonOutputMode::Strict => {
                self.push_wrapper("$oid", |out| push_quoted(out, &oid.to_hex()));
            }
        }
        Ok(())
    }

    fn write_binary(&mut self, binary: &Binary) -> Result<()> {
        self.before_value()?;
        if self.mode == JsonOutputMode::Shell {
            if let Ok(guid) = binary.to_guid() {
                self.out.push_str(&format!("UUID(\"{}\")", guid.to_hyphenated()));
                return Ok(());
            }
        }
        let hex = crate::types::to_hex(&binary.bytes);
        match self.mode {
            JsonOutputMode::Shell => {
                self.out
                    .push_str(&format!("BinData({}, \"{hex}\")", binary.subtype.byte()));
            }
            JsonOutputMode::Strict => {
                let subtype = binary.subtype.byte();
                self.out.push('{');
                push_quoted(&mut self.out, "$binary");
                self.out.push(':');
                push_quoted(&mut self.out, &hex);
                self.out.push(',');
                push_quoted(&mut self.out, "$type");
                self.out.push(':');
                push_quoted(&mut self.out, &format!("{subtype:02x}"));
                self.out.push('}');
            }
        }
        Ok(())
    }

    fn write_timestamp(&mut self, ts: Timestamp) -> Result<()> {
        self.before_value()?;
        match self.mode {
            JsonOutputMode::Shell => {
                self.out
                    .push_str(&format!("Timestamp({}, {})", ts.time, ts.increment));
            }
            JsonOutputMode::Strict => {
                let (t, i) = (ts.time, ts.increment);
                self.push_wrapper("$timestamp", |out| {
                    out.push_str(&format!("{{\"t\":{t},\"i\":{i}}}"));
                });
            }
        }
        Ok(())
    }

    fn write_decimal128(&mut self, value: Decimal128) -> Result<()> {
        self.before_value()?;
        // The payload is the raw wire bytes as hex; decimal string conversion
        // is out of scope for the opaque Decimal128.
        match self.mode {
            JsonOutputMode::Shell => {
                self.out.push_str(&format!("NumberDecimal(\"{}\")", value.to_hex()));
            }
            JsonOutputMode::Strict => {
                self.push_wrapper("$decimal128", |out| push_quoted(out, &value.to_hex()));
            }
        }
        Ok(())
    }

    fn write_regex(&mut self, pattern: &str, options: &str) -> Result<()> {
        self.before_value()?;
        match self.mode {
            JsonOutputMode::Shell => {
                self.out.push('/');
                for c in pattern.chars() {
                    if c == '/' {
                        self.out.push('\\');
                    }
                    self.out.push(c);
                }
                self.out.push('/');
                self.out.push_str(options);
            }
            JsonOutputMode::Strict => {
                self.out.push('{');
                push_quoted(&mut self.out, "$regex");
                self.out.push(':');
                push_quoted(&mut self.out, pattern);
                self.out.push(',');
                push_quoted(&mut self.out, "$options");
                self.out.push(':');
                push_quoted(&mut self.out, options);
                self.out.push('}');
            }
        }
        Ok(())
    }

    fn write_javascript(&mut self, code: &str) -> Result<()> {
        self.before_value()?;
        self.push_wrapper("$code", |out| push_quoted(out, code));
        Ok(())
    }

    fn write_symbol(&mut self, symbol: &str) -> Result<()> {
        self.before_value()?;
        self.push_wrapper("$symbol", |out| push_quoted(out, symbol));
        Ok(())
    }

    fn write_min_key(&mut self) -> Result<()> {
        self.before_value()?;
        match self.mode {
            JsonOutputMode::Shell => self.out.push_str("MinKey"),
            JsonOutputMode::Strict => self.push_wrapper("$minKey", |out| out.push('1')),
        }
        Ok(())
    }

    fn write_max_key(&mut self) -> Result<()> {
        self.before_value()?;
        match self.mode {
            JsonOutputMode::Shell => self.out.push_str("MaxKey"),
            JsonOutputMode::Strict => self.push_wrapper("$maxKey", |out| out.push('1')),
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Parses extended JSON text into a [`Document`] tree.
///
/// Accepts both dialects that [`JsonWriter`] produces, plus unquoted element
/// names as the shell allows.
pub fn parse_json_document(text: &str) -> Result<Document> {
    let mut parser = Parser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    parser.skip_ws();
    let doc = parser.parse_document()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(Error::TrailingBytes);
    }
    Ok(doc)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while let Some(b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Result<u8> {
        self.bytes.get(self.pos).copied().ok_or(Error::Truncated)
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        let b = self.peek()?;
        if b != expected {
            return Err(Error::Format(format!(
                "expected '{}' at offset {}, found '{}'",
                expected as char, self.pos, b as char
            )));
        }
        self.pos += 1;
        Ok(())
    }

    fn parse_document(&mut self) -> Result<Document> {
        self.expect(b'{')?;
        let mut doc = Document::new();
        self.skip_ws();
        if self.peek()? == b'}' {
            self.pos += 1;
            return Ok(doc);
        }
        loop {
            self.skip_ws();
            let name = self.parse_element_name()?;
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            let value = self.parse_value()?;
            doc.push(name, value)?;
            self.skip_ws();
            match self.peek()? {
                b',' => self.pos += 1,
                b'}' => {
                    self.pos += 1;
                    return Ok(doc);
                }
                other => {
                    return Err(Error::Format(format!(
                        "expected ',' or '}}' at offset {}, found '{}'",
                        self.pos, other as char
                    )))
                }
            }
        }
    }

    fn parse_element_name(&mut self) -> Result<String> {
        if self.peek()? == b'"' {
            self.parse_string_literal()
        } else {
            let ident = self.parse_identifier()?;
            if ident.is_empty() {
                Err(Error::Format(format!("expected an element name at offset {}", self.pos)))
            } else {
                Ok(ident)
            }
        }
    }

    fn parse_identifier(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(std::str::from_utf8(&self.bytes[start..self.pos])?.to_owned())
    }

    fn parse_string_literal(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            let b = self.peek()?;
            self.pos += 1;
            match b {
                b'"' => return Ok(out),
                b'\\' => {
                    let esc = self.peek()?;
                    self.pos += 1;
                    match esc {
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'/' => out.push('/'),
                        b'b' => out.push('\u{8}'),
                        b'f' => out.push('\u{c}'),
                        b'n' => out.push('\n'),
                        b'r' => out.push('\r'),
                        b't' => out.push('\t'),
                        b'u' => {
                            let hex = self
                                .bytes
                                .get(self.pos..self.pos + 4)
                                .ok_or(Error::Truncated)?;
                            let code = u32::from_str_radix(std::str::from_utf8(hex)?, 16)
                                .map_err(|_| Error::Format("malformed \\u escape".into()))?;
                            self.pos += 4;
                            // Surrogate pairs are rejoined into one scalar.
                            let c = if (0xD800..0xDC00).contains(&code) {
                                if self.bytes.get(self.pos) != Some(&b'\\')
                                    || self.bytes.get(self.pos + 1) != Some(&b'u')
                                {
                                    return Err(Error::Format("unpaired surrogate".into()));
                                }
                                let hex2 = self
                                    .bytes
                                    .get(self.pos + 2..self.pos + 6)
                                    .ok_or(Error::Truncated)?;
                                let low = u32::from_str_radix(std::str::from_utf8(hex2)?, 16)
                                    .map_err(|_| Error::Format("malformed \\u escape".into()))?;
                                if !(0xDC00..0xE000).contains(&low) {
                                    return Err(Error::Format("unpaired surrogate".into()));
                                }
                                self.pos += 6;
                                0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00)
                            } else {
                                code
                            };
                            out.push(
                                char::from_u32(c)
                                    .ok_or_else(|| Error::Format("invalid \\u escape".into()))?,
                            );
                        }
                        other => {
                            return Err(Error::Format(format!("invalid escape '\\{}'", other as char)))
                        }
                    }
                }
                b if b < 0x80 => out.push(b as char),
                _ => {
                    // Multi-byte UTF-8: re-validate from the byte before.
                    let start = self.pos - 1;
                    let rest = &self.bytes[start..];
                    let c = (1..=rest.len().min(4))
                        .filter_map(|n| std::str::from_utf8(&rest[..n]).ok())
                        .find_map(|s| s.chars().next())
                        .ok_or(Error::InvalidUtf8)?;
                    self.pos = start + c.len_utf8();
                    out.push(c);
                }
            }
        }
    }

    fn parse_value(&mut self) -> Result<Bson> {
        match self.peek()? {
            b'{' => {
                let doc = self.parse_document()?;
                Ok(reinterpret_wrapper(doc))
            }
            b'[' => self.parse_array().map(Bson::Array),
            b'"' => self.parse_string_literal().map(Bson::String),
            b'/' => self.parse_regex(),
            b'-' | b'0'..=b'9' => self.parse_number(),
            _ => self.parse_keyword_or_constructor(),
        }
    }

    fn parse_array(&mut self) -> Result<Vec<Bson>> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek()? == b']' {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            self.skip_ws();
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek()? {
                b',' => self.pos += 1,
                b']' => {
                    self.pos += 1;
                    return Ok(items);
                }
                other => {
                    return Err(Error::Format(format!(
                        "expected ',' or ']' at offset {}, found '{}'",
                        self.pos, other as char
                    )))
                }
            }
        }
    }

    fn parse_regex(&mut self) -> Result<Bson> {
        self.expect(b'/')?;
        let mut pattern = String::new();
        loop {
            let b = self.peek()?;
            self.pos += 1;
            match b {
                b'/' => break,
                b'\\' if self.peek()? == b'/' => {
                    pattern.push('/');
                    self.pos += 1;
                }
                b'\\' => {
                    pattern.push('\\');
                }
                other => pattern.push(other as char),
            }
        }
        let mut options = String::new();
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_lowercase() {
                options.push(b as char);
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(Bson::RegularExpression { pattern, options })
    }

    fn parse_number(&mut self) -> Result<Bson> {
        if self.bytes[self.pos..].starts_with(b"-Infinity") {
            self.pos += "-Infinity".len();
            return Ok(Bson::Double(f64::NEG_INFINITY));
        }
        let start = self.pos;
        let mut is_double = false;
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'0'..=b'9' | b'-' | b'+' => self.pos += 1,
                b'.' | b'e' | b'E' => {
                    is_double = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])?;
        if is_double {
            let v: f64 = text
                .parse()
                .map_err(|_| Error::Format(format!("malformed number: {text}")))?;
            Ok(Bson::Double(v))
        } else {
            let v: i64 = text
                .parse()
                .map_err(|_| Error::Format(format!("malformed number: {text}")))?;
            Ok(match i32::try_from(v) {
                Ok(v) => Bson::Int32(v),
                Err(_) => Bson::Int64(v),
            })
        }
    }

    fn parse_keyword_or_constructor(&mut self) -> Result<Bson> {
        let ident = self.parse_identifier()?;
        match ident.as_str() {
            "true" => Ok(Bson::Boolean(true)),
            "false" => Ok(Bson::Boolean(false)),
            "null" => Ok(Bson::Null),
            "undefined" => Ok(Bson::Undefined),
            "NaN" => Ok(Bson::Double(f64::NAN)),
            "Infinity" => Ok(Bson::Double(f64::INFINITY)),
            "MinKey" => Ok(Bson::MinKey),
            "MaxKey" => Ok(Bson::MaxKey),
            "ISODate" => {
                let s = self.constructor_string()?;
                Ok(Bson::DateTime(parse_iso_datetime(&s)?))
            }
            "NumberLong" => {
                let v = self.constructor_integer()?;
                Ok(Bson::Int64(v))
            }
            "NumberInt" => {
                let v = self.constructor_integer()?;
                let v = i32::try_from(v)
                    .map_err(|_| Error::Format(format!("NumberInt out of range: {v}")))?;
                Ok(Bson::Int32(v))
            }
            "NumberDecimal" => {
                let s = self.constructor_string()?;
                Ok(Bson::Decimal128(Decimal128::parse_hex(&s)?))
            }
            "ObjectId" => {
                let s = self.constructor_string()?;
                Ok(Bson::ObjectId(ObjectId::parse_str(&s)?))
            }
            "UUID" => {
                let s = self.constructor_string()?;
                Ok(Bson::Binary(Binary::from_guid(Guid::parse_str(&s)?)))
            }
            "BinData" => {
                self.skip_ws();
                self.expect(b'(')?;
                self.skip_ws();
                let subtype = match self.parse_number()? {
                    Bson::Int32(v) if (0..=255).contains(&v) => v as u8,
                    other => {
                        return Err(Error::Format(format!("invalid BinData subtype: {other:?}")))
                    }
                };
                self.skip_ws();
                self.expect(b',')?;
                self.skip_ws();
                let hex = self.parse_string_literal()?;
                self.skip_ws();
                self.expect(b')')?;
                Ok(Bson::Binary(Binary::new(
                    BinarySubtype::from_byte(subtype),
                    crate::types::parse_hex(&hex)?,
                )))
            }
            "Timestamp" => {
                self.skip_ws();
                self.expect(b'(')?;
                self.skip_ws();
                let t = self.constructor_integer_bare()?;
                self.skip_ws();
                self.expect(b',')?;
                self.skip_ws();
                let i = self.constructor_integer_bare()?;
                self.skip_ws();
                self.expect(b')')?;
                let t = u32::try_from(t)
                    .map_err(|_| Error::Format(format!("Timestamp time out of range: {t}")))?;
                let i = u32::try_from(i)
                    .map_err(|_| Error::Format(format!("Timestamp increment out of range: {i}")))?;
                Ok(Bson::Timestamp(Timestamp::new(t, i)))
            }
            other => Err(Error::Format(format!("unrecognized token: {other}"))),
        }
    }

    fn constructor_string(&mut self) -> Result<String> {
        self.skip_ws();
        self.expect(b'(')?;
        self.skip_ws();
        let s = self.parse_string_literal()?;
        self.skip_ws();
        self.expect(b')')?;
        Ok(s)
    }

    /// Parses `(123)` or `("123")`, which the shell emits interchangeably.
    fn constructor_integer(&mut self) -> Result<i64> {
        self.skip_ws();
        self.expect(b'(')?;
        self.skip_ws();
        let v = if self.peek()? == b'"' {
            let s = self.parse_string_literal()?;
            s.parse::<i64>()
                .map_err(|_| Error::Format(format!("malformed integer literal: {s}")))?
        } else {
            self.constructor_integer_bare()?
        };
        self.skip_ws();
        self.expect(b')')?;
        Ok(v)
    }

    fn constructor_integer_bare(&mut self) -> Result<i64> {
        match self.parse_number()? {
            Bson::Int32(v) => Ok(i64::from(v)),
            Bson::Int64(v) => Ok(v),
            other => Err(Error::Format(format!("expected an integer, found {other:?}"))),
        }
    }
}

fn parse_iso_datetime(s: &str) -> Result<i64> {
    let dt = DateTime::parse_from_rfc3339(s)
        .map_err(|_| Error::Format(format!("malformed ISO datetime: {s}")))?;
    Ok(dt.with_timezone(&Utc).timestamp_millis())
}

/// Folds recognized `$`-wrapper documents back into scalar values.
fn reinterpret_wrapper(doc: Document) -> Bson {
    let unwrap = |doc: Document| -> Option<Bson> {
        match doc.len() {
            1 => {
                let (name, value) = doc.iter().next().map(|(n, v)| (n.to_owned(), v.clone()))?;
                match (name.as_str(), value) {
                    ("$code", Bson::String(code)) => Some(Bson::JavaScript(code)),
                    ("$symbol", Bson::String(s)) => Some(Bson::Symbol(s)),
                    ("$oid", Bson::String(s)) => ObjectId::parse_str(&s).ok().map(Bson::ObjectId),
                    ("$date", Bson::Int32(ms)) => Some(Bson::DateTime(i64::from(ms))),
                    ("$date", Bson::Int64(ms)) => Some(Bson::DateTime(ms)),
                    ("$date", Bson::String(s)) => parse_iso_datetime(&s).ok().map(Bson::DateTime),
                    ("$numberLong", Bson::String(s)) => s.parse().ok().map(Bson::Int64),
                    ("$decimal128", Bson::String(s)) => {
                        Decimal128::parse_hex(&s).ok().map(Bson::Decimal128)
                    }
                    ("$minKey", _) => Some(Bson::MinKey),
                    ("$maxKey", _) => Some(Bson::MaxKey),
                    ("$undefined", Bson::Boolean(true)) => Some(Bson::Undefined),
                    ("$timestamp", Bson::Document(inner)) => {
                        let t = inner.get("t")?.as_i64()?;
                        let i = inner.get("i")?.as_i64()?;
                        Some(Bson::Timestamp(Timestamp::new(
                            u32::try_from(t).ok()?,
                            u32::try_from(i).ok()?,
                        )))
                    }
                    _ => None,
                }
            }
            2 => {
                if let (Some(Bson::String(pattern)), Some(Bson::String(options))) =
                    (doc.get("$regex"), doc.get("$options"))
                {
                    return Some(Bson::RegularExpression {
                        pattern: pattern.clone(),
                        options: options.clone(),
                    });
                }
                if let (Some(Bson::String(hex)), Some(Bson::String(subtype))) =
                    (doc.get("$binary"), doc.get("$type"))
                {
                    let bytes = crate::types::parse_hex(hex).ok()?;
                    let subtype = u8::from_str_radix(subtype, 16).ok()?;
                    return Some(Bson::Binary(Binary::new(
                        BinarySubtype::from_byte(subtype),
                        bytes,
                    )));
                }
                None
            }
            _ => None,
        }
    };
    match unwrap(doc.clone()) {
        Some(value) => value,
        None => Bson::Document(doc),
    }
}

/// A [`BsonReader`] over extended JSON text.
///
/// The text is parsed into a [`Document`] tree up front; reading then
/// replays the tree.
pub struct JsonReader {
    inner: DocumentReader,
}

impl JsonReader {
    pub fn new(text: &str) -> Result<Self> {
        Ok(JsonReader {
            inner: DocumentReader::new(parse_json_document(text)?),
        })
    }

    /// Verifies that the whole document was consumed.
    pub fn finish(&self) -> Result<()> {
        self.inner.finish()
    }
}

impl BsonReader for JsonReader {
    fn read_bson_type(&mut self) -> Result<Option<BsonType>> {
        self.inner.read_bson_type()
    }

    fn read_name(&mut self) -> Result<String> {
        self.inner.read_name()
    }

    fn read_start_document(&mut self) -> Result<()> {
        self.inner.read_start_document()
    }

    fn read_end_document(&mut self) -> Result<()> {
        self.inner.read_end_document()
    }

    fn read_start_array(&mut self) -> Result<()> {
        self.inner.read_start_array()
    }

    fn read_end_array(&mut self) -> Result<()> {
        self.inner.read_end_array()
    }

    fn read_double(&mut self) -> Result<f64> {
        self.inner.read_double()
    }

    fn read_string(&mut self) -> Result<String> {
        self.inner.read_string()
    }

    fn read_boolean(&mut self) -> Result<bool> {
        self.inner.read_boolean()
    }

    fn read_int32(&mut self) -> Result<i32> {
        self.inner.read_int32()
    }

    fn read_int64(&mut self) -> Result<i64> {
        self.inner.read_int64()
    }

    fn read_datetime(&mut self) -> Result<i64> {
        self.inner.read_datetime()
    }

    fn read_null(&mut self) -> Result<()> {
        self.inner.read_null()
    }

    fn read_undefined(&mut self) -> Result<()> {
        self.inner.read_undefined()
    }

    fn read_object_id(&mut self) -> Result<ObjectId> {
        self.inner.read_object_id()
    }

    fn read_binary(&mut self) -> Result<Binary> {
        self.inner.read_binary()
    }

    fn read_timestamp(&mut self) -> Result<Timestamp> {
        self.inner.read_timestamp()
    }

    fn read_decimal128(&mut self) -> Result<Decimal128> {
        self.inner.read_decimal128()
    }

    fn read_regex(&mut self) -> Result<(String, String)> {
        self.inner.read_regex()
    }

    fn read_javascript(&mut self) -> Result<String> {
        self.inner.read_javascript()
    }

    fn read_symbol(&mut self) -> Result<String> {
        self.inner.read_symbol()
    }

    fn read_min_key(&mut self) -> Result<()> {
        self.inner.read_min_key()
    }

    fn read_max_key(&mut self) -> Result<()> {
        self.inner.read_max_key()
    }

    fn depth(&self) -> usize {
        self.inner.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::writer::write_document;

    fn shell(doc: &Document) -> String {
        let mut w = JsonWriter::new(JsonOutputMode::Shell);
        write_document(&mut w, doc).unwrap();
        w.into_string().unwrap()
    }

    fn strict(doc: &Document) -> String {
        let mut w = JsonWriter::new(JsonOutputMode::Strict);
        write_document(&mut w, doc).unwrap();
        w.into_string().unwrap()
    }

    #[test]
    fn shell_mode_uses_constructors() {
        let doc = doc! {
            "_id" => ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap(),
            "when" => Bson::DateTime(1_700_000_000_000),
            "n" => Bson::Int64(5),
            "u" => Binary::from_guid(Guid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap()),
        };
        let text = shell(&doc);
        assert!(text.contains("ObjectId(\"507f1f77bcf86cd799439011\")"));
        assert!(text.contains("ISODate(\"2023-11-14T22:13:20.000Z\")"));
        assert!(text.contains("NumberLong(5)"));
        assert!(text.contains("UUID(\"00112233-4455-6677-8899-aabbccddeeff\")"));
    }

    #[test]
    fn strict_mode_is_valid_json() {
        let doc = doc! {
            "_id" => ObjectId::from_bytes([1; 12]),
            "when" => Bson::DateTime(0),
            "n" => Bson::Int64(5),
            "x" => 1.5,
            "re" => Bson::RegularExpression { pattern: "^a+".into(), options: "im".into() },
        };
        let text = strict(&doc);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed["_id"]["$oid"],
            serde_json::json!("010101010101010101010101")
        );
        assert_eq!(parsed["n"], serde_json::json!(5));
        assert_eq!(parsed["when"]["$date"], serde_json::json!(0));
        assert_eq!(parsed["re"]["$regex"], serde_json::json!("^a+"));
    }

    #[test]
    fn doubles_keep_a_fraction_marker() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(-0.5), "-0.5");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn shell_output_round_trips_through_the_parser() {
        let doc = doc! {
            "_id" => ObjectId::from_bytes([3; 12]),
            "name" => "wid\"get\n",
            "n" => Bson::Int64(1 << 40),
            "small" => 7,
            "x" => 2.25,
            "ok" => true,
            "nothing" => Bson::Null,
            "when" => Bson::DateTime(1_700_000_000_000),
            "ts" => Timestamp::new(8, 3),
            "tags" => vec![Bson::from("a"), Bson::from("b")],
            "nested" => doc! { "deep" => vec![Bson::Int32(1)] },
            "re" => Bson::RegularExpression { pattern: "a/b".into(), options: "i".into() },
            "bin" => Binary::new(BinarySubtype::Generic, vec![0xDE, 0xAD]),
            "dec" => Decimal128::from_bytes([5; 16]),
            "min" => Bson::MinKey,
            "max" => Bson::MaxKey,
        };
        let text = shell(&doc);
        let back = parse_json_document(&text).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn strict_output_round_trips_through_the_parser() {
        let doc = doc! {
            "_id" => ObjectId::from_bytes([3; 12]),
            "when" => Bson::DateTime(86_400_000),
            "ts" => Timestamp::new(8, 3),
            "re" => Bson::RegularExpression { pattern: "^x".into(), options: "".into() },
            "bin" => Binary::new(BinarySubtype::Generic, vec![1, 2]),
            "js" => Bson::JavaScript("f()".into()),
            "sym" => Bson::Symbol("s".into()),
            "min" => Bson::MinKey,
        };
        let text = strict(&doc);
        let back = parse_json_document(&text).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn parser_accepts_unquoted_names_and_whitespace() {
        let doc = parse_json_document("{ a : 1, long_name : NumberLong(\"42\") }").unwrap();
        assert_eq!(doc.get("a"), Some(&Bson::Int32(1)));
        assert_eq!(doc.get("long_name"), Some(&Bson::Int64(42)));
    }

    #[test]
    fn parser_rejects_garbage() {
        assert!(parse_json_document("{").is_err());
        assert!(parse_json_document("{\"a\": wibble}").is_err());
        assert!(parse_json_document("{\"a\": 1} extra").is_err());
        assert!(parse_json_document("[1, 2]").is_err());
    }
}
