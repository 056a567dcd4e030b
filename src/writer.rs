// ABOUTME: The BsonWriter trait that all encode paths target, plus the Document tree backend.
// ABOUTME: Array contexts number their own elements; names are only accepted inside documents.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{Binary, Decimal128, ObjectId, Timestamp};
use crate::value::Bson;

/// An event-style sink for one BSON document.
///
/// Codecs drive a writer with start/end container calls and scalar value
/// calls. Inside a document, each value must be preceded by [`write_name`];
/// inside an array the writer assigns decimal index names itself.
///
/// [`write_name`]: BsonWriter::write_name
pub trait BsonWriter {
    fn write_start_document(&mut self) -> Result<()>;
    fn write_end_document(&mut self) -> Result<()>;
    fn write_start_array(&mut self) -> Result<()>;
    fn write_end_array(&mut self) -> Result<()>;

    /// Sets the element name for the next value. Only valid inside a document.
    fn write_name(&mut self, name: &str) -> Result<()>;

    fn write_double(&mut self, value: f64) -> Result<()>;
    fn write_string(&mut self, value: &str) -> Result<()>;
    fn write_boolean(&mut self, value: bool) -> Result<()>;
    fn write_int32(&mut self, value: i32) -> Result<()>;
    fn write_int64(&mut self, value: i64) -> Result<()>;

    /// Writes a UTC datetime as milliseconds since the Unix epoch.
    fn write_datetime(&mut self, millis: i64) -> Result<()>;

    fn write_null(&mut self) -> Result<()>;
    fn write_object_id(&mut self, oid: ObjectId) -> Result<()>;
    fn write_binary(&mut self, binary: &Binary) -> Result<()>;
    fn write_timestamp(&mut self, ts: Timestamp) -> Result<()>;
    fn write_decimal128(&mut self, value: Decimal128) -> Result<()>;
    fn write_regex(&mut self, pattern: &str, options: &str) -> Result<()>;
    fn write_javascript(&mut self, code: &str) -> Result<()>;
    fn write_symbol(&mut self, symbol: &str) -> Result<()>;
    fn write_min_key(&mut self) -> Result<()>;
    fn write_max_key(&mut self) -> Result<()>;

    /// Current container nesting depth. Zero outside the root document.
    fn depth(&self) -> usize;
}

/// Writes a dynamic [`Bson`] value, recursing into containers.
pub fn write_bson(writer: &mut dyn BsonWriter, value: &Bson) -> Result<()> {
    match value {
        Bson::Double(v) => writer.write_double(*v),
        Bson::String(s) => writer.write_string(s),
        Bson::Document(d) => write_document(writer, d),
        Bson::Array(items) => {
            writer.write_start_array()?;
            for item in items {
                write_bson(writer, item)?;
            }
            writer.write_end_array()
        }
        Bson::Binary(b) => writer.write_binary(b),
        Bson::Undefined => Err(Error::Format("undefined values cannot be written".into())),
        Bson::ObjectId(oid) => writer.write_object_id(*oid),
        Bson::Boolean(b) => writer.write_boolean(*b),
        Bson::DateTime(ms) => writer.write_datetime(*ms),
        Bson::Null => writer.write_null(),
        Bson::RegularExpression { pattern, options } => writer.write_regex(pattern, options),
        Bson::JavaScript(code) => writer.write_javascript(code),
        Bson::Symbol(s) => writer.write_symbol(s),
        Bson::Int32(n) => writer.write_int32(*n),
        Bson::Timestamp(ts) => writer.write_timestamp(*ts),
        Bson::Int64(n) => writer.write_int64(*n),
        Bson::Decimal128(d) => writer.write_decimal128(*d),
        Bson::MinKey => writer.write_min_key(),
        Bson::MaxKey => writer.write_max_key(),
    }
}

/// Writes a [`Document`] tree through a writer, including the enclosing
/// start/end calls.
pub fn write_document(writer: &mut dyn BsonWriter, doc: &Document) -> Result<()> {
    writer.write_start_document()?;
    for (name, value) in doc.iter() {
        writer.write_name(name)?;
        write_bson(writer, value)?;
    }
    writer.write_end_document()
}

pub(crate) fn validate_element_name(name: &str) -> Result<()> {
    if name.as_bytes().contains(&0) {
        return Err(Error::Format("element name contains a NUL byte".into()));
    }
    Ok(())
}

enum Node {
    Doc {
        doc: Document,
        pending_name: Option<String>,
    },
    Arr(Vec<Bson>),
}

/// A [`BsonWriter`] that materializes a [`Document`] tree in memory.
pub struct DocumentWriter {
    stack: Vec<Node>,
    root: Option<Document>,
}

impl DocumentWriter {
    #[must_use]
    pub fn new() -> Self {
        DocumentWriter {
            stack: Vec::new(),
            root: None,
        }
    }

    /// Finishes writing and returns the completed document.
    pub fn into_document(self) -> Result<Document> {
        if !self.stack.is_empty() {
            return Err(Error::Format("unclosed container".into()));
        }
        self.root
            .ok_or_else(|| Error::Format("no document was written".into()))
    }

    fn push_value(&mut self, value: Bson) -> Result<()> {
        match self.stack.last_mut() {
            Some(Node::Doc { doc, pending_name }) => {
                let name = pending_name
                    .take()
                    .ok_or_else(|| Error::Format("value written without an element name".into()))?;
                doc.push(name, value)
            }
            Some(Node::Arr(items)) => {
                items.push(value);
                Ok(())
            }
            None => Err(Error::Format("scalar value at top level; BSON requires a document".into())),
        }
    }

    fn close(&mut self, expect_array: bool) -> Result<()> {
        let node = self
            .stack
            .pop()
            .ok_or_else(|| Error::Format("no open container to close".into()))?;
        match (node, expect_array) {
            (Node::Doc { doc, pending_name }, false) => {
                if pending_name.is_some() {
                    return Err(Error::Format("document closed with a dangling element name".into()));
                }
                if self.stack.is_empty() {
                    self.root = Some(doc);
                    Ok(())
                } else {
                    self.push_value(Bson::Document(doc))
                }
            }
            (Node::Arr(items), true) => self.push_value(Bson::Array(items)),
            _ => Err(Error::Format("mismatched container close".into())),
        }
    }
}

impl Default for DocumentWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BsonWriter for DocumentWriter {
    fn write_start_document(&mut self) -> Result<()> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(Error::Format("a root document was already written".into()));
        }
        self.stack.push(Node::Doc {
            doc: Document::new(),
            pending_name: None,
        });
        Ok(())
    }

    fn write_end_document(&mut self) -> Result<()> {
        self.close(false)
    }

    fn write_start_array(&mut self) -> Result<()> {
        if self.stack.is_empty() {
            return Err(Error::Format("array at top level; BSON requires a document".into()));
        }
        self.stack.push(Node::Arr(Vec::new()));
        Ok(())
    }

    fn write_end_array(&mut self) -> Result<()> {
        self.close(true)
    }

    fn write_name(&mut self, name: &str) -> Result<()> {
        validate_element_name(name)?;
        match self.stack.last_mut() {
            Some(Node::Doc { pending_name, .. }) => {
                if pending_name.is_some() {
                    return Err(Error::Format("element name written twice".into()));
                }
                *pending_name = Some(name.to_owned());
                Ok(())
            }
            Some(Node::Arr(_)) => Err(Error::Format("element names are not valid inside arrays".into())),
            None => Err(Error::Format("element name outside any document".into())),
        }
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.push_value(Bson::Double(value))
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.push_value(Bson::String(value.to_owned()))
    }

    fn write_boolean(&mut self, value: bool) -> Result<()> {
        self.push_value(Bson::Boolean(value))
    }

    fn write_int32(&mut self, value: i32) -> Result<()> {
        self.push_value(Bson::Int32(value))
    }

    fn write_int64(&mut self, value: i64) -> Result<()> {
        self.push_value(Bson::Int64(value))
    }

    fn write_datetime(&mut self, millis: i64) -> Result<()> {
        self.push_value(Bson::DateTime(millis))
    }

    fn write_null(&mut self) -> Result<()> {
        self.push_value(Bson::Null)
    }

    fn write_object_id(&mut self, oid: ObjectId) -> Result<()> {
        self.push_value(Bson::ObjectId(oid))
    }

    fn write_binary(&mut self, binary: &Binary) -> Result<()> {
        self.push_value(Bson::Binary(binary.clone()))
    }

    fn write_timestamp(&mut self, ts: Timestamp) -> Result<()> {
        self.push_value(Bson::Timestamp(ts))
    }

    fn write_decimal128(&mut self, value: Decimal128) -> Result<()> {
        self.push_value(Bson::Decimal128(value))
    }

    fn write_regex(&mut self, pattern: &str, options: &str) -> Result<()> {
        self.push_value(Bson::RegularExpression {
            pattern: pattern.to_owned(),
            options: options.to_owned(),
        })
    }

    fn write_javascript(&mut self, code: &str) -> Result<()> {
        self.push_value(Bson::JavaScript(code.to_owned()))
    }

    fn write_symbol(&mut self, symbol: &str) -> Result<()> {
        self.push_value(Bson::Symbol(symbol.to_owned()))
    }

    fn write_min_key(&mut self) -> Result<()> {
        self.push_value(Bson::MinKey)
    }

    fn write_max_key(&mut self) -> Result<()> {
        self.push_value(Bson::MaxKey)
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn builds_nested_tree() {
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        w.write_name("a").unwrap();
        w.write_int32(1).unwrap();
        w.write_name("items").unwrap();
        w.write_start_array().unwrap();
        w.write_string("x").unwrap();
        w.write_start_document().unwrap();
        w.write_name("deep").unwrap();
        w.write_boolean(true).unwrap();
        w.write_end_document().unwrap();
        w.write_end_array().unwrap();
        w.write_end_document().unwrap();

        let doc = w.into_document().unwrap();
        assert_eq!(
            doc,
            doc! {
                "a" => 1,
                "items" => vec![Bson::from("x"), Bson::Document(doc! { "deep" => true })],
            }
        );
    }

    #[test]
    fn rejects_value_without_name() {
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        assert!(w.write_int32(1).is_err());
    }

    #[test]
    fn rejects_top_level_scalar() {
        let mut w = DocumentWriter::new();
        assert!(w.write_int32(1).is_err());
        assert!(w.write_start_array().is_err());
    }

    #[test]
    fn depth_tracks_open_containers() {
        let mut w = DocumentWriter::new();
        assert_eq!(w.depth(), 0);
        w.write_start_document().unwrap();
        assert_eq!(w.depth(), 1);
        w.write_name("a").unwrap();
        w.write_start_array().unwrap();
        assert_eq!(w.depth(), 2);
        w.write_end_array().unwrap();
        w.write_end_document().unwrap();
        assert_eq!(w.depth(), 0);
    }

    #[test]
    fn undefined_is_not_writable() {
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        w.write_name("u").unwrap();
        assert!(write_bson(&mut w, &Bson::Undefined).is_err());
    }
}
