// ABOUTME: The BsonReader trait that all decode paths consume, plus the Document tree backend.
// ABOUTME: The tree backend flattens a Document into a token stream and replays it.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{Binary, BsonType, Decimal128, ObjectId, Timestamp};
use crate::value::Bson;

/// An event-style source over one BSON document.
///
/// [`read_bson_type`] positions the reader on the next element header and is
/// idempotent until the element's value is consumed; it returns `None` at the
/// end of the current container. Element names exist only inside documents;
/// in arrays the index names are validated and discarded by the reader.
///
/// [`read_bson_type`]: BsonReader::read_bson_type
pub trait BsonReader {
    /// Advances to the next element header, returning its type, or `None`
    /// at the end of the current container.
    fn read_bson_type(&mut self) -> Result<Option<BsonType>>;

    /// Like [`read_bson_type`](BsonReader::read_bson_type), but the end of a
    /// container is an error. Used by codecs that need a value to exist.
    fn peek_bson_type(&mut self) -> Result<BsonType> {
        self.read_bson_type()?
            .ok_or_else(|| Error::Format("expected a value, found end of container".into()))
    }

    /// Consumes and returns the current element's name.
    fn read_name(&mut self) -> Result<String>;

    fn read_start_document(&mut self) -> Result<()>;
    fn read_end_document(&mut self) -> Result<()>;
    fn read_start_array(&mut self) -> Result<()>;
    fn read_end_array(&mut self) -> Result<()>;

    fn read_double(&mut self) -> Result<f64>;
    fn read_string(&mut self) -> Result<String>;
    fn read_boolean(&mut self) -> Result<bool>;
    fn read_int32(&mut self) -> Result<i32>;
    fn read_int64(&mut self) -> Result<i64>;

    /// Reads a UTC datetime as milliseconds since the Unix epoch.
    fn read_datetime(&mut self) -> Result<i64>;

    fn read_null(&mut self) -> Result<()>;
    fn read_undefined(&mut self) -> Result<()>;
    fn read_object_id(&mut self) -> Result<ObjectId>;
    fn read_binary(&mut self) -> Result<Binary>;
    fn read_timestamp(&mut self) -> Result<Timestamp>;
    fn read_decimal128(&mut self) -> Result<Decimal128>;
    fn read_regex(&mut self) -> Result<(String, String)>;
    fn read_javascript(&mut self) -> Result<String>;
    fn read_symbol(&mut self) -> Result<String>;
    fn read_min_key(&mut self) -> Result<()>;
    fn read_max_key(&mut self) -> Result<()>;

    /// Current container nesting depth. Zero outside the root document.
    fn depth(&self) -> usize;
}

/// Reads the value the reader is positioned on as a dynamic [`Bson`],
/// recursing into containers.
pub fn read_bson_value(reader: &mut dyn BsonReader) -> Result<Bson> {
    match reader.peek_bson_type()? {
        BsonType::Double => reader.read_double().map(Bson::Double),
        BsonType::String => reader.read_string().map(Bson::String),
        BsonType::Document => read_document(reader).map(Bson::Document),
        BsonType::Array => read_array(reader).map(Bson::Array),
        BsonType::Binary => reader.read_binary().map(Bson::Binary),
        BsonType::Undefined => {
            reader.read_undefined()?;
            Ok(Bson::Undefined)
        }
        BsonType::ObjectId => reader.read_object_id().map(Bson::ObjectId),
        BsonType::Boolean => reader.read_boolean().map(Bson::Boolean),
        BsonType::DateTime => reader.read_datetime().map(Bson::DateTime),
        BsonType::Null => {
            reader.read_null()?;
            Ok(Bson::Null)
        }
        BsonType::RegularExpression => {
            let (pattern, options) = reader.read_regex()?;
            Ok(Bson::RegularExpression { pattern, options })
        }
        BsonType::JavaScript => reader.read_javascript().map(Bson::JavaScript),
        BsonType::Symbol => reader.read_symbol().map(Bson::Symbol),
        BsonType::Int32 => reader.read_int32().map(Bson::Int32),
        BsonType::Timestamp => reader.read_timestamp().map(Bson::Timestamp),
        BsonType::Int64 => reader.read_int64().map(Bson::Int64),
        BsonType::Decimal128 => reader.read_decimal128().map(Bson::Decimal128),
        BsonType::MinKey => {
            reader.read_min_key()?;
            Ok(Bson::MinKey)
        }
        BsonType::MaxKey => {
            reader.read_max_key()?;
            Ok(Bson::MaxKey)
        }
    }
}

/// Reads a whole document, including the enclosing start/end calls.
pub fn read_document(reader: &mut dyn BsonReader) -> Result<Document> {
    reader.read_start_document()?;
    let mut doc = Document::new();
    while reader.read_bson_type()?.is_some() {
        let name = reader.read_name()?;
        let value = read_bson_value(reader)?;
        doc.push(name, value)?;
    }
    reader.read_end_document()?;
    Ok(doc)
}

/// Reads a whole array, including the enclosing start/end calls.
pub fn read_array(reader: &mut dyn BsonReader) -> Result<Vec<Bson>> {
    reader.read_start_array()?;
    let mut items = Vec::new();
    while reader.read_bson_type()?.is_some() {
        items.push(read_bson_value(reader)?);
    }
    reader.read_end_array()?;
    Ok(items)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    DocStart,
    DocEnd,
    ArrStart,
    ArrEnd,
    Name(String),
    Scalar(Bson),
}

fn flatten_value(value: Bson, out: &mut Vec<Tok>) {
    match value {
        Bson::Document(doc) => flatten_document(doc, out),
        Bson::Array(items) => {
            out.push(Tok::ArrStart);
            for item in items {
                flatten_value(item, out);
            }
            out.push(Tok::ArrEnd);
        }
        scalar => out.push(Tok::Scalar(scalar)),
    }
}

fn flatten_document(doc: Document, out: &mut Vec<Tok>) {
    out.push(Tok::DocStart);
    for (name, value) in doc {
        out.push(Tok::Name(name));
        flatten_value(value, out);
    }
    out.push(Tok::DocEnd);
}

/// A [`BsonReader`] over an in-memory [`Document`] tree.
///
/// Used directly by the document-level entry points, and internally to
/// re-read buffered documents during discriminator resolution.
pub struct DocumentReader {
    toks: Vec<Tok>,
    pos: usize,
    stack: Vec<bool>, // true = array frame
}

impl DocumentReader {
    #[must_use]
    pub fn new(doc: Document) -> Self {
        let mut toks = Vec::new();
        flatten_document(doc, &mut toks);
        DocumentReader {
            toks,
            pos: 0,
            stack: Vec::new(),
        }
    }

    /// Verifies that the whole tree was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.pos != self.toks.len() {
            return Err(Error::TrailingBytes);
        }
        Ok(())
    }

    fn current(&self) -> Result<&Tok> {
        self.toks.get(self.pos).ok_or(Error::Truncated)
    }

    fn take_scalar(&mut self, expected: BsonType) -> Result<Bson> {
        match self.current()? {
            Tok::Scalar(b) if b.element_type() == expected => {
                let value = b.clone();
                self.pos += 1;
                Ok(value)
            }
            Tok::Name(_) => Err(Error::Format("element name not consumed before value".into())),
            other => Err(Error::Format(format!("expected {expected}, found {other:?}"))),
        }
    }
}

impl BsonReader for DocumentReader {
    fn read_bson_type(&mut self) -> Result<Option<BsonType>> {
        let tok = match self.current()? {
            Tok::Name(_) => self
                .toks
                .get(self.pos + 1)
                .ok_or(Error::Truncated)?,
            other => other,
        };
        Ok(match tok {
            Tok::DocEnd | Tok::ArrEnd => None,
            Tok::DocStart => Some(BsonType::Document),
            Tok::ArrStart => Some(BsonType::Array),
            Tok::Scalar(b) => Some(b.element_type()),
            Tok::Name(_) => return Err(Error::Format("consecutive element names".into())),
        })
    }

    fn read_name(&mut self) -> Result<String> {
        match self.current()? {
            Tok::Name(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            other => Err(Error::Format(format!("expected an element name, found {other:?}"))),
        }
    }

    fn read_start_document(&mut self) -> Result<()> {
        match self.current()? {
            Tok::DocStart => {
                self.pos += 1;
                self.stack.push(false);
                Ok(())
            }
            other => Err(Error::Format(format!("expected a document, found {other:?}"))),
        }
    }

    fn read_end_document(&mut self) -> Result<()> {
        match self.current()? {
            Tok::DocEnd if self.stack.last() == Some(&false) => {
                self.pos += 1;
                self.stack.pop();
                Ok(())
            }
            other => Err(Error::Format(format!("expected end of document, found {other:?}"))),
        }
    }

    fn read_start_array(&mut self) -> Result<()> {
        match self.current()? {
            Tok::ArrStart => {
                self.pos += 1;
                self.stack.push(true);
                Ok(())
            }
            other => Err(Error::Format(format!("expected an array, found {other:?}"))),
        }
    }

    fn read_end_array(&mut self) -> Result<()> {
        match self.current()? {
            Tok::ArrEnd if self.stack.last() == Some(&true) => {
                self.pos += 1;
                self.stack.pop();
                Ok(())
            }
            other => Err(Error::Format(format!("expected end of array, found {other:?}"))),
        }
    }

    fn read_double(&mut self) -> Result<f64> {
        match self.take_scalar(BsonType::Double)? {
            Bson::Double(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        match self.take_scalar(BsonType::String)? {
            Bson::String(s) => Ok(s),
            _ => unreachable!(),
        }
    }

    fn read_boolean(&mut self) -> Result<bool> {
        match self.take_scalar(BsonType::Boolean)? {
            Bson::Boolean(b) => Ok(b),
            _ => unreachable!(),
        }
    }

    fn read_int32(&mut self) -> Result<i32> {
        match self.take_scalar(BsonType::Int32)? {
            Bson::Int32(n) => Ok(n),
            _ => unreachable!(),
        }
    }

    fn read_int64(&mut self) -> Result<i64> {
        match self.take_scalar(BsonType::Int64)? {
            Bson::Int64(n) => Ok(n),
            _ => unreachable!(),
        }
    }

    fn read_datetime(&mut self) -> Result<i64> {
        match self.take_scalar(BsonType::DateTime)? {
            Bson::DateTime(ms) => Ok(ms),
            _ => unreachable!(),
        }
    }

    fn read_null(&mut self) -> Result<()> {
        self.take_scalar(BsonType::Null).map(|_| ())
    }

    fn read_undefined(&mut self) -> Result<()> {
        self.take_scalar(BsonType::Undefined).map(|_| ())
    }

    fn read_object_id(&mut self) -> Result<ObjectId> {
        match self.take_scalar(BsonType::ObjectId)? {
            Bson::ObjectId(oid) => Ok(oid),
            _ => unreachable!(),
        }
    }

    fn read_binary(&mut self) -> Result<Binary> {
        match self.take_scalar(BsonType::Binary)? {
            Bson::Binary(b) => Ok(b),
            _ => unreachable!(),
        }
    }

    fn read_timestamp(&mut self) -> Result<Timestamp> {
        match self.take_scalar(BsonType::Timestamp)? {
            Bson::Timestamp(ts) => Ok(ts),
            _ => unreachable!(),
        }
    }

    fn read_decimal128(&mut self) -> Result<Decimal128> {
        match self.take_scalar(BsonType::Decimal128)? {
            Bson::Decimal128(d) => Ok(d),
            _ => unreachable!(),
        }
    }

    fn read_regex(&mut self) -> Result<(String, String)> {
        match self.take_scalar(BsonType::RegularExpression)? {
            Bson::RegularExpression { pattern, options } => Ok((pattern, options)),
            _ => unreachable!(),
        }
    }

    fn read_javascript(&mut self) -> Result<String> {
        match self.take_scalar(BsonType::JavaScript)? {
            Bson::JavaScript(code) => Ok(code),
            _ => unreachable!(),
        }
    }

    fn read_symbol(&mut self) -> Result<String> {
        match self.take_scalar(BsonType::Symbol)? {
            Bson::Symbol(s) => Ok(s),
            _ => unreachable!(),
        }
    }

    fn read_min_key(&mut self) -> Result<()> {
        self.take_scalar(BsonType::MinKey).map(|_| ())
    }

    fn read_max_key(&mut self) -> Result<()> {
        self.take_scalar(BsonType::MaxKey).map(|_| ())
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
    fn tree_round_trip_through_reader() {
        let doc = doc! {
            "a" => 1,
            "items" => vec![Bson::from("x"), Bson::from(true)],
            "nested" => doc! { "b" => 2.5 },
        };
        let mut r = DocumentReader::new(doc.clone());
        let back = read_document(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn read_bson_type_is_idempotent() {
        let mut r = DocumentReader::new(doc! { "a" => 1 });
        r.read_start_document().unwrap();
        assert_eq!(r.read_bson_type().unwrap(), Some(BsonType::Int32));
        assert_eq!(r.read_bson_type().unwrap(), Some(BsonType::Int32));
        assert_eq!(r.read_name().unwrap(), "a");
        assert_eq!(r.read_int32().unwrap(), 1);
        assert_eq!(r.read_bson_type().unwrap(), None);
        r.read_end_document().unwrap();
        assert_eq!(r.depth(), 0);
    }

    #[test]
    fn type_mismatch_is_a_format_error() {
        let mut r = DocumentReader::new(doc! { "a" => 1 });
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        r.read_name().unwrap();
        assert!(matches!(r.read_string(), Err(Error::Format(_))));
    }
}
