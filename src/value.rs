// ABOUTME: Dynamic BSON value type covering every element type of the format.
// ABOUTME: Similar in spirit to a JSON value union but with the full BSON scalar set.

use crate::document::Document;
use crate::types::{Binary, BsonType, Decimal128, ObjectId, Timestamp};
use std::fmt;

/// A BSON value of any element type.
#[derive(Clone, PartialEq, Default)]
pub enum Bson {
    /// 64-bit IEEE 754 floating point (0x01)
    Double(f64),
    /// UTF-8 string (0x02)
    String(String),
    /// Embedded document (0x03)
    Document(Document),
    /// Array, stored on the wire as a document with index keys (0x04)
    Array(Vec<Bson>),
    /// Binary data with a subtype byte (0x05)
    Binary(Binary),
    /// Deprecated undefined value (0x06); decoded for wire fidelity, never written
    Undefined,
    /// 12-byte ObjectId (0x07)
    ObjectId(ObjectId),
    /// Boolean (0x08)
    Boolean(bool),
    /// UTC instant as signed milliseconds since the Unix epoch (0x09)
    DateTime(i64),
    /// Null (0x0A)
    #[default]
    Null,
    /// Regular expression: pattern and options cstrings (0x0B)
    RegularExpression {
        pattern: String,
        options: String,
    },
    /// JavaScript code (0x0D)
    JavaScript(String),
    /// Deprecated symbol (0x0E)
    Symbol(String),
    /// 32-bit signed integer (0x10)
    Int32(i32),
    /// Server oplog timestamp (0x11)
    Timestamp(Timestamp),
    /// 64-bit signed integer (0x12)
    Int64(i64),
    /// IEEE 754-2008 decimal128, carried opaquely (0x13)
    Decimal128(Decimal128),
    /// Sorts before every other value (0xFF)
    MinKey,
    /// Sorts after every other value (0x7F)
    MaxKey,
}

impl Bson {
    /// The element type this value serializes as.
    #[must_use]
    pub fn element_type(&self) -> BsonType {
        match self {
            Bson::Double(_) => BsonType::Double,
            Bson::String(_) => BsonType::String,
            Bson::Document(_) => BsonType::Document,
            Bson::Array(_) => BsonType::Array,
            Bson::Binary(_) => BsonType::Binary,
            Bson::Undefined => BsonType::Undefined,
            Bson::ObjectId(_) => BsonType::ObjectId,
            Bson::Boolean(_) => BsonType::Boolean,
            Bson::DateTime(_) => BsonType::DateTime,
            Bson::Null => BsonType::Null,
            Bson::RegularExpression { .. } => BsonType::RegularExpression,
            Bson::JavaScript(_) => BsonType::JavaScript,
            Bson::Symbol(_) => BsonType::Symbol,
            Bson::Int32(_) => BsonType::Int32,
            Bson::Timestamp(_) => BsonType::Timestamp,
            Bson::Int64(_) => BsonType::Int64,
            Bson::Decimal128(_) => BsonType::Decimal128,
            Bson::MinKey => BsonType::MinKey,
            Bson::MaxKey => BsonType::MaxKey,
        }
    }

    /// Returns true if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }

    /// If this is a boolean, returns the value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// If this is an Int32 or Int64, returns the value widened to i64.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int32(n) => Some(i64::from(*n)),
            Bson::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// If this is a Double, returns the value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// If this is a string, returns a reference to it.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    /// If this is an array, returns a reference to it.
    #[must_use]
    pub fn as_array(&self) -> Option<&Vec<Bson>> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    /// If this is an array, returns a mutable reference to it.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Bson>> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    /// If this is a document, returns a reference to it.
    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    /// If this is a document, returns a mutable reference to it.
    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    /// If this is an ObjectId, returns it.
    #[must_use]
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    /// If this is a DateTime, returns milliseconds since the Unix epoch.
    #[must_use]
    pub fn as_datetime_millis(&self) -> Option<i64> {
        match self {
            Bson::DateTime(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Index into an array. Returns None if not an array or out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bson> {
        self.as_array().and_then(|a| a.get(index))
    }

    /// Index into a document by element name.
    #[must_use]
    pub fn get_key(&self, key: &str) -> Option<&Bson> {
        self.as_document().and_then(|d| d.get(key))
    }
}

impl fmt::Debug for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bson::Double(v) => write!(f, "Double({v})"),
            Bson::String(s) => write!(f, "String({s:?})"),
            Bson::Document(d) => fmt::Debug::fmt(d, f),
            Bson::Array(a) => f.debug_tuple("Array").field(a).finish(),
            Bson::Binary(b) => write!(f, "Binary({:?}, {} bytes)", b.subtype, b.bytes.len()),
            Bson::Undefined => write!(f, "Undefined"),
            Bson::ObjectId(oid) => fmt::Debug::fmt(oid, f),
            Bson::Boolean(b) => write!(f, "Boolean({b})"),
            Bson::DateTime(ms) => write!(f, "DateTime({ms})"),
            Bson::Null => write!(f, "Null"),
            Bson::RegularExpression { pattern, options } => {
                write!(f, "RegularExpression(/{pattern}/{options})")
            }
            Bson::JavaScript(code) => write!(f, "JavaScript({code:?})"),
            Bson::Symbol(s) => write!(f, "Symbol({s:?})"),
            Bson::Int32(n) => write!(f, "Int32({n})"),
            Bson::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts.time, ts.increment),
            Bson::Int64(n) => write!(f, "Int64({n})"),
            Bson::Decimal128(d) => fmt::Debug::fmt(d, f),
            Bson::MinKey => write!(f, "MinKey"),
            Bson::MaxKey => write!(f, "MaxKey"),
        }
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<f32> for Bson {
    fn from(v: f32) -> Self {
        Bson::Double(f64::from(v))
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<String> for Bson {
    fn from(s: String) -> Self {
        Bson::String(s)
    }
}

impl From<&str> for Bson {
    fn from(s: &str) -> Self {
        Bson::String(s.to_owned())
    }
}

impl From<ObjectId> for Bson {
    fn from(oid: ObjectId) -> Self {
        Bson::ObjectId(oid)
    }
}

impl From<Timestamp> for Bson {
    fn from(ts: Timestamp) -> Self {
        Bson::Timestamp(ts)
    }
}

impl From<Decimal128> for Bson {
    fn from(d: Decimal128) -> Self {
        Bson::Decimal128(d)
    }
}

impl From<Binary> for Bson {
    fn from(b: Binary) -> Self {
        Bson::Binary(b)
    }
}

impl From<Document> for Bson {
    fn from(d: Document) -> Self {
        Bson::Document(d)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Self {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Bson::Null,
        }
    }
}

impl<T: Into<Bson>> FromIterator<T> for Bson {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Bson::Array(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variants() {
        assert_eq!(Bson::Int32(7).as_i64(), Some(7));
        assert_eq!(Bson::Int64(7).as_i64(), Some(7));
        assert_eq!(Bson::Double(7.0).as_i64(), None);
        assert_eq!(Bson::from("x").as_str(), Some("x"));
        assert!(Bson::Null.is_null());
        assert_eq!(Bson::from(vec![1, 2]).get(1), Some(&Bson::Int32(2)));
    }

    #[test]
    fn element_types_are_stable() {
        assert_eq!(Bson::Int32(0).element_type().byte(), 0x10);
        assert_eq!(Bson::MinKey.element_type().byte(), 0xFF);
        assert_eq!(Bson::MaxKey.element_type().byte(), 0x7F);
        assert_eq!(
            Bson::Array(vec![]).element_type(),
            BsonType::Array
        );
    }
}
