// ABOUTME: Crate root: module layout, re-exports, and the encode/decode
// ABOUTME: entry points over the binary, document-tree, and JSON backends.

//! Maps Rust objects to BSON documents and back.
//!
//! Types are described by [`ClassMap`]s registered in a [`Registry`]; the
//! registry already knows the primitives, [`Bson`], [`Document`], and the
//! chrono types. Encoding and decoding run against any of three backends:
//! raw BSON bytes, an in-memory [`Document`] tree, or extended JSON text.
//!
//! ```
//! use bsonic::{ClassMapBuilder, ClassOptions, Registry};
//!
//! #[derive(Default, Debug, PartialEq)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! let registry = Registry::new();
//! registry.register_class(
//!     ClassMapBuilder::<Point>::new("Point")
//!         .member("x", |p: &Point| p.x, |p, v| p.x = v)
//!         .member("y", |p: &Point| p.y, |p, v| p.y = v)
//!         .build()?,
//!     ClassOptions::new(),
//! )?;
//!
//! let bytes = bsonic::to_vec_with(&registry, &Point { x: 1, y: 2 })?;
//! let back: Point = bsonic::from_slice_with(&registry, &bytes)?;
//! assert_eq!(back, Point { x: 1, y: 2 });
//! # Ok::<(), bsonic::Error>(())
//! ```
//!
//! Dynamic documents need no registration at all:
//!
//! ```
//! use bsonic::doc;
//!
//! let doc = doc! { "greeting" => "hello", "count" => 3 };
//! let bytes = bsonic::encode_document(&doc)?;
//! assert_eq!(bsonic::decode_document(&bytes)?, doc);
//! # Ok::<(), bsonic::Error>(())
//! ```

pub mod classmap;
pub mod codec;
pub mod collections;
pub mod decoder;
pub mod discriminator;
pub mod document;
pub mod encoder;
pub mod error;
mod guard;
pub mod json;
pub mod object;
pub mod reader;
pub mod registry;
pub mod representation;
pub mod types;
pub mod value;
pub mod writer;

pub use classmap::{ClassMap, ClassMapBuilder, ClassMapCodec, MemberOptions};
pub use codec::{
    register_option, register_shared, AnyValue, Codec, DecodeContext, EncodeContext,
};
pub use collections::{
    register_btree_map, register_btree_set, register_hash_map, register_linked_list,
    register_multi_array, register_vec, register_vec_deque, DictionaryKey,
    DictionaryRepresentation, MapCodec, MultiArray, MultiArrayCodec, SeqCodec,
};
pub use decoder::{BinaryReader, ReaderConfig};
pub use discriminator::HierarchyCodec;
pub use document::Document;
pub use encoder::{BinaryWriter, WriterConfig};
pub use error::{Error, Result};
pub use json::{parse_json_document, JsonOutputMode, JsonReader, JsonWriter};
pub use object::ObjectCodec;
pub use reader::{read_array, read_bson_value, read_document, BsonReader, DocumentReader};
pub use registry::{ClassOptions, Registry};
pub use representation::{
    Converter, DateTimeCodec, EnumCodec, EnumTable, TimeSpanCodec, TimeSpanUnits,
};
pub use types::{
    Binary, BinarySubtype, BsonType, Decimal128, Guid, ObjectId, TimeSpan, Timestamp,
};
pub use value::Bson;
pub use writer::{write_bson, write_document, BsonWriter, DocumentWriter};

use std::any::TypeId;

fn encode_value<T: 'static>(
    writer: &mut dyn BsonWriter,
    registry: &Registry,
    value: &T,
) -> Result<()> {
    let codec = registry.codec_of::<T>()?;
    let mut ctx = EncodeContext::new(registry);
    ctx.nominal = Some(TypeId::of::<T>());
    codec.encode_any(writer, &mut ctx, value)
}

fn decode_value<T: 'static>(reader: &mut dyn BsonReader, registry: &Registry) -> Result<T> {
    let codec = registry.codec_of::<T>()?;
    let mut ctx = DecodeContext::new(registry);
    ctx.nominal = Some(TypeId::of::<T>());
    codec::expect_boxed::<T>(codec.decode_any(reader, &mut ctx)?)
}

/// Encodes a value to BSON bytes using the global registry.
pub fn to_vec<T: 'static>(value: &T) -> Result<Vec<u8>> {
    to_vec_with(Registry::global(), value)
}

/// Encodes a value to BSON bytes using the given registry.
pub fn to_vec_with<T: 'static>(registry: &Registry, value: &T) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    encode_value(&mut writer, registry, value)?;
    writer.into_vec()
}

/// Decodes a value from BSON bytes using the global registry.
/// Trailing bytes after the document are an error.
pub fn from_slice<T: 'static>(data: &[u8]) -> Result<T> {
    from_slice_with(Registry::global(), data)
}

/// Decodes a value from BSON bytes using the given registry.
pub fn from_slice_with<T: 'static>(registry: &Registry, data: &[u8]) -> Result<T> {
    let mut reader = BinaryReader::new(data);
    let value = decode_value(&mut reader, registry)?;
    reader.finish()?;
    Ok(value)
}

/// Encodes a value to a [`Document`] tree using the global registry.
pub fn to_document<T: 'static>(value: &T) -> Result<Document> {
    to_document_with(Registry::global(), value)
}

/// Encodes a value to a [`Document`] tree using the given registry.
pub fn to_document_with<T: 'static>(registry: &Registry, value: &T) -> Result<Document> {
    let mut writer = DocumentWriter::new();
    encode_value(&mut writer, registry, value)?;
    writer.into_document()
}

/// Decodes a value from a [`Document`] tree using the global registry.
pub fn from_document<T: 'static>(doc: Document) -> Result<T> {
    from_document_with(Registry::global(), doc)
}

/// Decodes a value from a [`Document`] tree using the given registry.
pub fn from_document_with<T: 'static>(registry: &Registry, doc: Document) -> Result<T> {
    let mut reader = DocumentReader::new(doc);
    let value = decode_value(&mut reader, registry)?;
    reader.finish()?;
    Ok(value)
}

/// Renders a value as extended JSON using the global registry.
pub fn to_extended_json<T: 'static>(value: &T, mode: JsonOutputMode) -> Result<String> {
    to_extended_json_with(Registry::global(), value, mode)
}

/// Renders a value as extended JSON using the given registry.
pub fn to_extended_json_with<T: 'static>(
    registry: &Registry,
    value: &T,
    mode: JsonOutputMode,
) -> Result<String> {
    let mut writer = JsonWriter::new(mode);
    encode_value(&mut writer, registry, value)?;
    writer.into_string()
}

/// Decodes a value from extended JSON using the global registry.
pub fn from_extended_json<T: 'static>(text: &str) -> Result<T> {
    from_extended_json_with(Registry::global(), text)
}

/// Decodes a value from extended JSON using the given registry.
pub fn from_extended_json_with<T: 'static>(registry: &Registry, text: &str) -> Result<T> {
    let mut reader = JsonReader::new(text)?;
    let value = decode_value(&mut reader, registry)?;
    reader.finish()?;
    Ok(value)
}

/// Encodes a [`Document`] tree to BSON bytes.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    write_document(&mut writer, doc)?;
    writer.into_vec()
}

/// Decodes BSON bytes into a [`Document`] tree.
/// Trailing bytes after the document are an error.
pub fn decode_document(data: &[u8]) -> Result<Document> {
    let mut reader = BinaryReader::new(data);
    let doc = read_document(&mut reader)?;
    reader.finish()?;
    Ok(doc)
}

/// Renders a [`Document`] tree as extended JSON.
pub fn document_to_json(doc: &Document, mode: JsonOutputMode) -> Result<String> {
    let mut writer = JsonWriter::new(mode);
    write_document(&mut writer, doc)?;
    writer.into_string()
}

/// Parses extended JSON into a [`Document`] tree.
pub fn document_from_json(text: &str) -> Result<Document> {
    parse_json_document(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq, Clone)]
    struct Point {
        x: i32,
        y: i32,
    }

    fn point_registry() -> Registry {
        let registry = Registry::new();
        registry
            .register_class(
                ClassMapBuilder::<Point>::new("Point")
                    .member("x", |p: &Point| p.x, |p, v| p.x = v)
                    .member("y", |p: &Point| p.y, |p, v| p.y = v)
                    .build()
                    .unwrap(),
                ClassOptions::new(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn class_round_trips_through_all_three_backends() {
        let registry = point_registry();
        let point = Point { x: -3, y: 12 };

        let bytes = to_vec_with(&registry, &point).unwrap();
        assert_eq!(from_slice_with::<Point>(&registry, &bytes).unwrap(), point);

        let doc = to_document_with(&registry, &point).unwrap();
        assert_eq!(doc.get("x"), Some(&Bson::Int32(-3)));
        assert_eq!(from_document_with::<Point>(&registry, doc).unwrap(), point);

        let json = to_extended_json_with(&registry, &point, JsonOutputMode::Shell).unwrap();
        assert_eq!(json, r#"{"x":-3,"y":12}"#);
        assert_eq!(
            from_extended_json_with::<Point>(&registry, &json).unwrap(),
            point
        );
    }

    #[test]
    fn backends_agree_on_the_wire_bytes() {
        let registry = point_registry();
        let point = Point { x: 1, y: 2 };
        let direct = to_vec_with(&registry, &point).unwrap();
        let via_tree = encode_document(&to_document_with(&registry, &point).unwrap()).unwrap();
        assert_eq!(direct, via_tree);
    }

    #[test]
    fn trailing_bytes_after_the_document_are_rejected() {
        let registry = point_registry();
        let mut bytes = to_vec_with(&registry, &Point::default()).unwrap();
        bytes.push(0);
        assert!(matches!(
            from_slice_with::<Point>(&registry, &bytes),
            Err(Error::TrailingBytes)
        ));
    }

    #[test]
    fn dynamic_documents_need_no_registration() {
        let doc = doc! {
            "name" => "ada",
            "tags" => vec!["a", "b"],
            "nested" => doc! { "n" => 1i64 },
        };
        let bytes = encode_document(&doc).unwrap();
        assert_eq!(decode_document(&bytes).unwrap(), doc);

        let json = document_to_json(&doc, JsonOutputMode::Strict).unwrap();
        assert_eq!(document_from_json(&json).unwrap(), doc);
    }
}
