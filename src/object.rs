// ABOUTME: The dynamic codec for values whose type is only known at runtime.
// ABOUTME: Ambiguous types are wrapped as {_t, _v}; classes get a discriminator.

use crate::codec::{AnyValue, Codec, DecodeContext, EncodeContext};
use crate::discriminator::DISCRIMINATOR_ELEMENT;
use crate::doc;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::reader::{read_document, BsonReader, DocumentReader};
use crate::types::{Binary, BinarySubtype, BsonType, Decimal128, Guid, ObjectId, Timestamp};
use crate::value::Bson;
use crate::writer::BsonWriter;
use chrono::{DateTime, TimeZone, Utc};
use std::any::{Any, TypeId};

/// The element name for a wrapped dynamic value.
pub const WRAPPED_VALUE_ELEMENT: &str = "_v";

/// True for types whose BSON form is reversible without a type marker.
fn unambiguous(ty: TypeId) -> bool {
    ty == TypeId::of::<f64>()
        || ty == TypeId::of::<String>()
        || ty == TypeId::of::<bool>()
        || ty == TypeId::of::<i32>()
        || ty == TypeId::of::<i64>()
        || ty == TypeId::of::<DateTime<Utc>>()
        || ty == TypeId::of::<ObjectId>()
        || ty == TypeId::of::<Guid>()
        || ty == TypeId::of::<Binary>()
        || ty == TypeId::of::<Timestamp>()
        || ty == TypeId::of::<Decimal128>()
        || ty == TypeId::of::<Document>()
        || ty == TypeId::of::<Bson>()
        || ty == TypeId::of::<Vec<AnyValue>>()
}

/// Codec for values typed only as `Box<dyn Any>`.
///
/// Types whose BSON form already identifies them are stored bare. Mapped
/// classes are stored as their document with a forced discriminator. Every
/// other registered type is wrapped as `{_t: name, _v: value}` so decode
/// can recover the exact type.
pub struct ObjectCodec;

impl ObjectCodec {
    fn decode_array(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<Vec<AnyValue>> {
        reader.read_start_array()?;
        let mut items = Vec::new();
        while reader.read_bson_type()?.is_some() {
            let item = self.decode_any(reader, ctx)?;
            items.push(
                item.downcast::<AnyValue>()
                    .map(|b| *b)
                    .unwrap_or_else(|original| original),
            );
        }
        reader.read_end_array()?;
        Ok(items)
    }

    fn decode_document(&self, doc: Document, ctx: &mut DecodeContext<'_>) -> Result<AnyValue> {
        let Some(disc) = doc.get(DISCRIMINATOR_ELEMENT).cloned() else {
            return Ok(Box::new(doc));
        };
        let ty = ctx.registry().resolve_discriminator(None, &disc)?;
        let codec = ctx.registry().codec_for(ty)?;
        if ctx.registry().is_class(ty) {
            let mut tree = DocumentReader::new(doc);
            ctx.nominal = Some(ty);
            let value = codec.decode_any(&mut tree, ctx)?;
            tree.finish()?;
            return Ok(value);
        }
        if doc.len() != 2 {
            return Err(Error::Format(
                "a wrapped value may only hold _t and _v".into(),
            ));
        }
        let wrapped = doc
            .get(WRAPPED_VALUE_ELEMENT)
            .cloned()
            .ok_or_else(|| Error::Format("wrapped value has no _v element".into()))?;
        let mut tree = DocumentReader::new(doc! { WRAPPED_VALUE_ELEMENT => wrapped });
        tree.read_start_document()?;
        tree.read_bson_type()?;
        tree.read_name()?;
        ctx.nominal = Some(ty);
        let value = codec.decode_any(&mut tree, ctx)?;
        tree.read_end_document()?;
        tree.finish()?;
        Ok(value)
    }
}

impl Codec for ObjectCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<AnyValue>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        ctx.take_converter();
        ctx.take_nominal();
        // The member machinery hands us the box itself; entry points may
        // hand us the concrete value directly.
        let inner: &dyn Any = match value.downcast_ref::<AnyValue>() {
            Some(boxed) => boxed.as_ref(),
            None => value,
        };
        let actual = inner.type_id();
        if unambiguous(actual) {
            let codec = ctx.registry().codec_for(actual)?;
            ctx.nominal = Some(actual);
            return codec.encode_any(writer, ctx, inner);
        }
        if ctx.registry().is_class(actual) {
            let codec = ctx.registry().codec_for(actual)?;
            ctx.nominal = Some(TypeId::of::<AnyValue>());
            return codec.encode_any(writer, ctx, inner);
        }
        let name = ctx.registry().name_for(actual).ok_or_else(|| {
            Error::Configuration(
                "dynamic value's type has no registered discriminator name".into(),
            )
        })?;
        let codec = ctx.registry().codec_for(actual)?;
        writer.write_start_document()?;
        writer.write_name(DISCRIMINATOR_ELEMENT)?;
        writer.write_string(&name)?;
        writer.write_name(WRAPPED_VALUE_ELEMENT)?;
        ctx.nominal = Some(actual);
        codec.encode_any(writer, ctx, inner)?;
        writer.write_end_document()
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        ctx.take_converter();
        ctx.take_nominal();
        let value: AnyValue = match reader.peek_bson_type()? {
            BsonType::Double => Box::new(reader.read_double()?),
            BsonType::String => Box::new(reader.read_string()?),
            BsonType::Boolean => Box::new(reader.read_boolean()?),
            BsonType::Int32 => Box::new(reader.read_int32()?),
            BsonType::Int64 => Box::new(reader.read_int64()?),
            BsonType::DateTime => {
                let millis = reader.read_datetime()?;
                let dt = Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| Error::Format(format!("{millis} is out of datetime range")))?;
                Box::new(dt)
            }
            BsonType::ObjectId => Box::new(reader.read_object_id()?),
            BsonType::Timestamp => Box::new(reader.read_timestamp()?),
            BsonType::Decimal128 => Box::new(reader.read_decimal128()?),
            BsonType::Binary => {
                let binary = reader.read_binary()?;
                if binary.subtype == BinarySubtype::Uuid {
                    Box::new(binary.to_guid()?)
                } else {
                    Box::new(binary)
                }
            }
            BsonType::Null => {
                reader.read_null()?;
                Box::new(Bson::Null)
            }
            BsonType::Array => Box::new(self.decode_array(reader, ctx)?),
            BsonType::Document => self.decode_document(read_document(reader)?, ctx)?,
            // The deprecated and internal types surface as dynamic Bson.
            _ => Box::new(crate::reader::read_bson_value(reader)?),
        };
        Ok(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::expect_boxed;
    use crate::registry::Registry;
    use crate::writer::DocumentWriter;

    fn encode(registry: &Registry, value: &dyn Any) -> Document {
        let mut ctx = EncodeContext::new(registry);
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        w.write_name("v").unwrap();
        ObjectCodec.encode_any(&mut w, &mut ctx, value).unwrap();
        w.write_end_document().unwrap();
        w.into_document().unwrap()
    }

    fn decode(registry: &Registry, doc: Document) -> AnyValue {
        let mut ctx = DecodeContext::new(registry);
        let mut r = DocumentReader::new(doc);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        r.read_name().unwrap();
        let v = ObjectCodec.decode_any(&mut r, &mut ctx).unwrap();
        r.read_end_document().unwrap();
        expect_boxed::<AnyValue>(v).unwrap()
    }

    #[test]
    fn unambiguous_scalars_are_stored_bare() {
        let registry = Registry::new();
        let value: AnyValue = Box::new(42i32);
        let doc = encode(&registry, &value);
        assert_eq!(doc.get("v"), Some(&Bson::Int32(42)));
        let back = decode(&registry, doc);
        assert_eq!(*back.downcast::<i32>().unwrap(), 42);
    }

    #[test]
    fn ambiguous_scalars_are_wrapped() {
        let registry = Registry::new();
        let value: AnyValue = Box::new(7u16);
        let doc = encode(&registry, &value);
        let wrapper = doc.get("v").and_then(Bson::as_document).unwrap();
        assert_eq!(wrapper.get("_t"), Some(&Bson::String("u16".into())));
        assert_eq!(wrapper.get("_v"), Some(&Bson::Int32(7)));
        let back = decode(&registry, doc);
        assert_eq!(*back.downcast::<u16>().unwrap(), 7);
    }

    #[test]
    fn null_decodes_to_a_dynamic_null() {
        let registry = Registry::new();
        let back = decode(&registry, doc! { "v" => Bson::Null });
        assert_eq!(*back.downcast::<Bson>().unwrap(), Bson::Null);
    }

    #[test]
    fn uuid_binary_decodes_as_a_guid() {
        let registry = Registry::new();
        let guid = Guid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let value: AnyValue = Box::new(guid);
        let doc = encode(&registry, &value);
        let back = decode(&registry, doc);
        assert_eq!(*back.downcast::<Guid>().unwrap(), guid);
    }

    #[test]
    fn plain_documents_stay_documents() {
        let registry = Registry::new();
        let back = decode(&registry, doc! { "v" => doc! { "a" => 1 } });
        let inner = back.downcast::<Document>().unwrap();
        assert_eq!(inner.get("a"), Some(&Bson::Int32(1)));
    }

    #[test]
    fn mixed_arrays_round_trip_item_types() {
        let registry = Registry::new();
        let value: AnyValue = Box::new(vec![
            Box::new(1i32) as AnyValue,
            Box::new("two".to_string()) as AnyValue,
            Box::new(3u16) as AnyValue,
        ]);
        let doc = encode(&registry, &value);
        let back = decode(&registry, doc);
        let items = *back.downcast::<Vec<AnyValue>>().unwrap();
        assert_eq!(*items[0].downcast_ref::<i32>().unwrap(), 1);
        assert_eq!(items[1].downcast_ref::<String>().unwrap(), "two");
        assert_eq!(*items[2].downcast_ref::<u16>().unwrap(), 3);
    }

    #[test]
    fn malformed_wrappers_are_rejected() {
        let registry = Registry::new();
        let doc = doc! { "v" => doc! { "_t" => "u16", "_v" => 1, "extra" => 2 } };
        let mut ctx = DecodeContext::new(&registry);
        let mut r = DocumentReader::new(doc);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        r.read_name().unwrap();
        assert!(matches!(
            ObjectCodec.decode_any(&mut r, &mut ctx),
            Err(Error::Format(_))
        ));
    }
}
