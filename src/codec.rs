// ABOUTME: The type-erased Codec trait, encode/decode contexts, and primitive codecs.
// ABOUTME: Values cross the codec boundary as &dyn Any / Box<dyn Any>.

use crate::error::{Error, Result};
use crate::guard::CycleGuard;
use crate::reader::{read_bson_value, read_document, BsonReader};
use crate::registry::Registry;
use crate::representation::Converter;
use crate::types::{Binary, BsonType, Decimal128, Guid, ObjectId, Timestamp};
use crate::value::Bson;
use crate::writer::{write_bson, write_document, BsonWriter};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

/// A decoded value in type-erased form.
pub type AnyValue = Box<dyn Any>;

/// Shared state for one encode call.
pub struct EncodeContext<'r> {
    registry: &'r Registry,
    pub(crate) guard: CycleGuard,
    /// The statically declared type of the value about to be encoded.
    /// Class codecs compare it against their own type to decide whether a
    /// discriminator must be written.
    pub(crate) nominal: Option<TypeId>,
    /// Representation override declared by the enclosing member, if any.
    pub(crate) converter: Option<Converter>,
}

impl<'r> EncodeContext<'r> {
    #[must_use]
    pub fn new(registry: &'r Registry) -> Self {
        EncodeContext {
            registry,
            guard: CycleGuard::new(),
            nominal: None,
            converter: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub(crate) fn take_converter(&mut self) -> Option<Converter> {
        self.converter.take()
    }

    pub(crate) fn take_nominal(&mut self) -> Option<TypeId> {
        self.nominal.take()
    }
}

/// Shared state for one decode call.
pub struct DecodeContext<'r> {
    registry: &'r Registry,
    pub(crate) nominal: Option<TypeId>,
    pub(crate) converter: Option<Converter>,
}

impl<'r> DecodeContext<'r> {
    #[must_use]
    pub fn new(registry: &'r Registry) -> Self {
        DecodeContext {
            registry,
            nominal: None,
            converter: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub(crate) fn take_converter(&mut self) -> Option<Converter> {
        self.converter.take()
    }

    pub(crate) fn take_nominal(&mut self) -> Option<TypeId> {
        self.nominal.take()
    }
}

/// Encodes and decodes values of one Rust type.
///
/// Implementations are object safe so they can live in the registry; typed
/// values are erased to `dyn Any` at the boundary and recovered inside.
pub trait Codec: Send + Sync {
    /// The `TypeId` of the value type this codec handles.
    fn value_type(&self) -> TypeId;

    /// Encodes `value`, which must be of the codec's value type.
    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()>;

    /// Decodes the value the reader is positioned on.
    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue>;
}

/// Downcasts an erased value, reporting the expected type on failure.
pub(crate) fn expect<T: 'static>(value: &dyn Any) -> Result<&T> {
    value.downcast_ref::<T>().ok_or_else(|| {
        Error::Format(format!("value is not a {}", std::any::type_name::<T>()))
    })
}

/// Downcasts an erased boxed value, reporting the expected type on failure.
pub(crate) fn expect_boxed<T: 'static>(value: AnyValue) -> Result<T> {
    match value.downcast::<T>() {
        Ok(v) => Ok(*v),
        Err(_) => Err(Error::Format(format!(
            "decoded value is not a {}",
            std::any::type_name::<T>()
        ))),
    }
}

macro_rules! int_codec {
    ($name:ident, $ty:ty, $default_repr:expr) => {
        #[doc = concat!("Codec for `", stringify!($ty), "` with a configurable wire representation.")]
        pub struct $name {
            converter: Converter,
        }

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self {
                    converter: Converter::new($default_repr),
                }
            }

            #[must_use]
            pub fn with_converter(converter: Converter) -> Self {
                Self { converter }
            }

            fn narrow(converter: &Converter, value: i64) -> Result<$ty> {
                match <$ty>::try_from(value) {
                    Ok(v) => Ok(v),
                    Err(_) if converter.allow_overflow => Ok(value as $ty),
                    Err(_) => Err(Error::Overflow(format!(
                        "{value} does not fit in {}",
                        stringify!($ty)
                    ))),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Codec for $name {
            fn value_type(&self) -> TypeId {
                TypeId::of::<$ty>()
            }

            fn encode_any(
                &self,
                writer: &mut dyn BsonWriter,
                ctx: &mut EncodeContext<'_>,
                value: &dyn Any,
            ) -> Result<()> {
                let converter = ctx.take_converter().unwrap_or(self.converter);
                let wide = i64::from(*expect::<$ty>(value)?);
                match converter.representation {
                    BsonType::Int32 => writer.write_int32(converter.int32_from_i64(wide)?),
                    BsonType::Int64 => writer.write_int64(wide),
                    BsonType::Double => writer.write_double(converter.double_from_i64(wide)?),
                    BsonType::String => writer.write_string(&wide.to_string()),
                    other => Err(Error::Configuration(format!(
                        "representation {other} is not valid for {}",
                        stringify!($ty)
                    ))),
                }
            }

            fn decode_any(
                &self,
                reader: &mut dyn BsonReader,
                ctx: &mut DecodeContext<'_>,
            ) -> Result<AnyValue> {
                let converter = ctx.take_converter().unwrap_or(self.converter);
                let wide = match reader.peek_bson_type()? {
                    BsonType::Int32 => i64::from(reader.read_int32()?),
                    BsonType::Int64 => reader.read_int64()?,
                    BsonType::Double => converter.int64_from_f64(reader.read_double()?)?,
                    BsonType::String => {
                        let text = reader.read_string()?;
                        text.parse::<i64>()
                            .map_err(|_| Error::Format(format!("malformed integer: {text}")))?
                    }
                    other => {
                        return Err(Error::Format(format!(
                            "cannot decode {} from {other}",
                            stringify!($ty)
                        )))
                    }
                };
                Ok(Box::new(Self::narrow(&converter, wide)?))
            }
        }
    };
}

int_codec!(I8Codec, i8, BsonType::Int32);
int_codec!(I16Codec, i16, BsonType::Int32);
int_codec!(I32Codec, i32, BsonType::Int32);
int_codec!(I64Codec, i64, BsonType::Int64);
int_codec!(U8Codec, u8, BsonType::Int32);
int_codec!(U16Codec, u16, BsonType::Int32);
int_codec!(U32Codec, u32, BsonType::Int64);

/// Codec for `u64`, whose upper half does not fit in any BSON integer.
pub struct U64Codec {
    converter: Converter,
}

impl U64Codec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(BsonType::Int64),
        }
    }

    #[must_use]
    pub fn with_converter(converter: Converter) -> Self {
        Self { converter }
    }

    fn widen(converter: &Converter, value: i64) -> Result<u64> {
        match u64::try_from(value) {
            Ok(v) => Ok(v),
            Err(_) if converter.allow_overflow => Ok(value as u64),
            Err(_) => Err(Error::Overflow(format!("{value} does not fit in u64"))),
        }
    }
}

impl Default for U64Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for U64Codec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<u64>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let v = *expect::<u64>(value)?;
        match converter.representation {
            BsonType::Int64 => writer.write_int64(converter.int64_from_u64(v)?),
            BsonType::Int32 => writer.write_int32(converter.int32_from_u64(v)?),
            BsonType::Double => writer.write_double(converter.double_from_u64(v)?),
            BsonType::String => writer.write_string(&v.to_string()),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for u64"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let v = match reader.peek_bson_type()? {
            BsonType::Int32 => Self::widen(&converter, i64::from(reader.read_int32()?))?,
            BsonType::Int64 => Self::widen(&converter, reader.read_int64()?)?,
            BsonType::Double => Self::widen(&converter, converter.int64_from_f64(reader.read_double()?)?)?,
            BsonType::String => {
                let text = reader.read_string()?;
                text.parse::<u64>()
                    .map_err(|_| Error::Format(format!("malformed integer: {text}")))?
            }
            other => return Err(Error::Format(format!("cannot decode u64 from {other}"))),
        };
        Ok(Box::new(v))
    }
}

fn parse_double(text: &str) -> Result<f64> {
    match text {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        other => other
            .parse()
            .map_err(|_| Error::Format(format!("malformed double: {other}"))),
    }
}

fn format_double_text(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else {
        format!("{value}")
    }
}

/// Codec for `f64` with a configurable wire representation.
pub struct F64Codec {
    converter: Converter,
}

impl F64Codec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(BsonType::Double),
        }
    }

    #[must_use]
    pub fn with_converter(converter: Converter) -> Self {
        Self { converter }
    }
}

impl Default for F64Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for F64Codec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<f64>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let v = *expect::<f64>(value)?;
        match converter.representation {
            BsonType::Double => writer.write_double(v),
            BsonType::Int32 => writer.write_int32(converter.int32_from_f64(v)?),
            BsonType::Int64 => writer.write_int64(converter.int64_from_f64(v)?),
            BsonType::String => writer.write_string(&format_double_text(v)),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for f64"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let v = match reader.peek_bson_type()? {
            BsonType::Double => reader.read_double()?,
            BsonType::Int32 => converter.double_from_i64(i64::from(reader.read_int32()?))?,
            BsonType::Int64 => converter.double_from_i64(reader.read_int64()?)?,
            BsonType::String => parse_double(&reader.read_string()?)?,
            other => return Err(Error::Format(format!("cannot decode f64 from {other}"))),
        };
        Ok(Box::new(v))
    }
}

/// Codec for `f32`, funneled through `f64` with a precision check on read.
pub struct F32Codec {
    converter: Converter,
}

impl F32Codec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(BsonType::Double),
        }
    }

    #[must_use]
    pub fn with_converter(converter: Converter) -> Self {
        Self { converter }
    }
}

impl Default for F32Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for F32Codec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<f32>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let v = f64::from(*expect::<f32>(value)?);
        match converter.representation {
            BsonType::Double => writer.write_double(v),
            BsonType::Int32 => writer.write_int32(converter.int32_from_f64(v)?),
            BsonType::Int64 => writer.write_int64(converter.int64_from_f64(v)?),
            BsonType::String => writer.write_string(&format_double_text(v)),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for f32"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let wide = match reader.peek_bson_type()? {
            BsonType::Double => reader.read_double()?,
            BsonType::Int32 => converter.double_from_i64(i64::from(reader.read_int32()?))?,
            BsonType::Int64 => converter.double_from_i64(reader.read_int64()?)?,
            BsonType::String => parse_double(&reader.read_string()?)?,
            other => return Err(Error::Format(format!("cannot decode f32 from {other}"))),
        };
        Ok(Box::new(converter.f32_from_f64(wide)?))
    }
}

/// Codec for `bool` with a configurable wire representation.
pub struct BoolCodec {
    converter: Converter,
}

impl BoolCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(BsonType::Boolean),
        }
    }

    #[must_use]
    pub fn with_converter(converter: Converter) -> Self {
        Self { converter }
    }
}

impl Default for BoolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for BoolCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<bool>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let v = *expect::<bool>(value)?;
        match converter.representation {
            BsonType::Boolean => writer.write_boolean(v),
            BsonType::Int32 => writer.write_int32(i32::from(v)),
            BsonType::Int64 => writer.write_int64(i64::from(v)),
            BsonType::Double => writer.write_double(if v { 1.0 } else { 0.0 }),
            BsonType::String => writer.write_string(if v { "true" } else { "false" }),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for bool"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let v = match reader.peek_bson_type()? {
            BsonType::Boolean => reader.read_boolean()?,
            BsonType::Int32 => reader.read_int32()? != 0,
            BsonType::Int64 => reader.read_int64()? != 0,
            BsonType::Double => reader.read_double()? != 0.0,
            BsonType::String => match reader.read_string()?.as_str() {
                "true" => true,
                "false" => false,
                other => return Err(Error::Format(format!("malformed boolean: {other}"))),
            },
            other => return Err(Error::Format(format!("cannot decode bool from {other}"))),
        };
        Ok(Box::new(v))
    }
}

/// Codec for `String`. The ObjectId representation stores 24-hex-char
/// strings as real ObjectIds; Symbol stores the deprecated symbol type.
pub struct StringCodec {
    converter: Converter,
}

impl StringCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(BsonType::String),
        }
    }

    #[must_use]
    pub fn with_converter(converter: Converter) -> Self {
        Self { converter }
    }
}

impl Default for StringCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for StringCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<String>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let v = expect::<String>(value)?;
        match converter.representation {
            BsonType::String => writer.write_string(v),
            BsonType::ObjectId => writer.write_object_id(ObjectId::parse_str(v)?),
            BsonType::Symbol => writer.write_symbol(v),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for String"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let v = match reader.peek_bson_type()? {
            BsonType::String => reader.read_string()?,
            BsonType::Symbol => reader.read_symbol()?,
            BsonType::ObjectId => reader.read_object_id()?.to_hex(),
            other => return Err(Error::Format(format!("cannot decode String from {other}"))),
        };
        Ok(Box::new(v))
    }
}

/// Codec for [`ObjectId`], stored natively or as its hex string.
pub struct ObjectIdCodec {
    converter: Converter,
}

impl ObjectIdCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(BsonType::ObjectId),
        }
    }

    #[must_use]
    pub fn with_converter(converter: Converter) -> Self {
        Self { converter }
    }
}

impl Default for ObjectIdCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for ObjectIdCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<ObjectId>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let oid = *expect::<ObjectId>(value)?;
        match converter.representation {
            BsonType::ObjectId => writer.write_object_id(oid),
            BsonType::String => writer.write_string(&oid.to_hex()),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for ObjectId"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let oid = match reader.peek_bson_type()? {
            BsonType::ObjectId => reader.read_object_id()?,
            BsonType::String => ObjectId::parse_str(&reader.read_string()?)?,
            other => return Err(Error::Format(format!("cannot decode ObjectId from {other}"))),
        };
        Ok(Box::new(oid))
    }
}

/// Codec for [`Guid`], stored as subtype-4 binary or the hyphenated string.
pub struct GuidCodec {
    converter: Converter,
}

impl GuidCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            converter: Converter::new(BsonType::Binary),
        }
    }

    #[must_use]
    pub fn with_converter(converter: Converter) -> Self {
        Self { converter }
    }
}

impl Default for GuidCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for GuidCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<Guid>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let converter = ctx.take_converter().unwrap_or(self.converter);
        let guid = *expect::<Guid>(value)?;
        match converter.representation {
            BsonType::Binary => writer.write_binary(&Binary::from_guid(guid)),
            BsonType::String => writer.write_string(&guid.to_hyphenated()),
            other => Err(Error::Configuration(format!(
                "representation {other} is not valid for Guid"
            ))),
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let guid = match reader.peek_bson_type()? {
            BsonType::Binary => reader.read_binary()?.to_guid()?,
            BsonType::String => Guid::parse_str(&reader.read_string()?)?,
            other => return Err(Error::Format(format!("cannot decode Guid from {other}"))),
        };
        Ok(Box::new(guid))
    }
}

/// Codec for raw [`Binary`] values.
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<Binary>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        ctx.take_converter();
        writer.write_binary(expect::<Binary>(value)?)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        Ok(Box::new(reader.read_binary()?))
    }
}

/// Codec for [`Timestamp`].
pub struct TimestampCodec;

impl Codec for TimestampCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<Timestamp>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        ctx.take_converter();
        writer.write_timestamp(*expect::<Timestamp>(value)?)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        Ok(Box::new(reader.read_timestamp()?))
    }
}

/// Codec for [`Decimal128`].
pub struct Decimal128Codec;

impl Codec for Decimal128Codec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<Decimal128>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        ctx.take_converter();
        writer.write_decimal128(*expect::<Decimal128>(value)?)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        Ok(Box::new(reader.read_decimal128()?))
    }
}

/// Codec for dynamic [`Bson`] values, written and read verbatim.
pub struct BsonValueCodec;

impl Codec for BsonValueCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<Bson>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        ctx.take_converter();
        write_bson(writer, expect::<Bson>(value)?)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        Ok(Box::new(read_bson_value(reader)?))
    }
}

/// Codec for [`Document`](crate::Document) trees.
pub struct DocumentCodec;

impl Codec for DocumentCodec {
    fn value_type(&self) -> TypeId {
        TypeId::of::<crate::document::Document>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        ctx.take_converter();
        write_document(writer, expect::<crate::document::Document>(value)?)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        _ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        Ok(Box::new(read_document(reader)?))
    }
}

/// Codec for `Option<T>`: `None` is BSON null, `Some` defers to `T`'s codec.
pub struct OptionCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> OptionCodec<T> {
    #[must_use]
    pub fn new() -> Self {
        OptionCodec {
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Default for OptionCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Codec for OptionCodec<T> {
    fn value_type(&self) -> TypeId {
        TypeId::of::<Option<T>>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        match expect::<Option<T>>(value)? {
            None => {
                ctx.take_converter();
                writer.write_null()
            }
            Some(inner) => {
                let codec = ctx.registry().codec_for(TypeId::of::<T>())?;
                ctx.nominal = Some(TypeId::of::<T>());
                codec.encode_any(writer, ctx, inner)
            }
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        if reader.peek_bson_type()? == BsonType::Null {
            reader.read_null()?;
            return Ok(Box::new(None::<T>));
        }
        let codec = ctx.registry().codec_for(TypeId::of::<T>())?;
        ctx.nominal = Some(TypeId::of::<T>());
        let inner = expect_boxed::<T>(codec.decode_any(reader, ctx)?)?;
        Ok(Box::new(Some(inner)))
    }
}

/// Codec for `Rc<RefCell<T>>`, the idiomatic shape for shared, possibly
/// self-referential nodes. Encoding borrows the cell; cycles surface as
/// [`Error::CircularReference`] through the encode guard.
pub struct SharedCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> SharedCodec<T> {
    #[must_use]
    pub fn new() -> Self {
        SharedCodec {
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Default for SharedCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Codec for SharedCodec<T> {
    fn value_type(&self) -> TypeId {
        TypeId::of::<Rc<RefCell<T>>>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let cell = expect::<Rc<RefCell<T>>>(value)?;
        let borrowed = cell.borrow();
        let codec = ctx.registry().codec_for(TypeId::of::<T>())?;
        ctx.nominal = Some(TypeId::of::<T>());
        codec.encode_any(writer, ctx, &*borrowed)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let codec = ctx.registry().codec_for(TypeId::of::<T>())?;
        ctx.nominal = Some(TypeId::of::<T>());
        let inner = expect_boxed::<T>(codec.decode_any(reader, ctx)?)?;
        Ok(Box::new(Rc::new(RefCell::new(inner))))
    }
}

/// Registers an `Option<T>` codec. `T`'s own codec must also be registered.
pub fn register_option<T: 'static>(registry: &Registry) {
    registry.register_codec(std::sync::Arc::new(OptionCodec::<T>::new()));
}

/// Registers an `Rc<RefCell<T>>` codec for shared graph nodes.
pub fn register_shared<T: 'static>(registry: &Registry) {
    registry.register_codec(std::sync::Arc::new(SharedCodec::<T>::new()));
}
