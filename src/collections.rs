// ABOUTME: Codecs for sequences, rectangular multi-dimensional arrays, and
// ABOUTME: dictionaries with their document/array-of-arrays key strategies.

use crate::codec::{expect, expect_boxed, AnyValue, Codec, DecodeContext, EncodeContext};
use crate::error::{Error, Result};
use crate::reader::{read_bson_value, BsonReader};
use crate::registry::Registry;
use crate::representation::Converter;
use crate::types::BsonType;
use crate::value::Bson;
use crate::writer::{write_bson, BsonWriter};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, LinkedList, VecDeque};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

/// Codec for any sequence collection `C` of items `T`: `Vec`, `VecDeque`,
/// `BTreeSet`, and the like. Items are stored as a BSON array.
pub struct SeqCodec<C, T> {
    _marker: PhantomData<fn() -> (C, T)>,
}

impl<C, T> SeqCodec<C, T> {
    #[must_use]
    pub fn new() -> Self {
        SeqCodec {
            _marker: PhantomData,
        }
    }
}

impl<C, T> Default for SeqCodec<C, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, T> Codec for SeqCodec<C, T>
where
    C: FromIterator<T> + 'static,
    for<'a> &'a C: IntoIterator<Item = &'a T>,
    T: 'static,
{
    fn value_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let seq = expect::<C>(value)?;
        let converter = ctx.take_converter();
        let codec = ctx.registry().codec_of::<T>()?;
        writer.write_start_array()?;
        for item in seq {
            ctx.nominal = Some(TypeId::of::<T>());
            ctx.converter = converter;
            codec.encode_any(writer, ctx, item)?;
        }
        writer.write_end_array()
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let converter = ctx.take_converter();
        ctx.take_nominal();
        let codec = ctx.registry().codec_of::<T>()?;
        reader.read_start_array()?;
        let mut items = Vec::new();
        while reader.read_bson_type()?.is_some() {
            ctx.nominal = Some(TypeId::of::<T>());
            ctx.converter = converter;
            items.push(expect_boxed::<T>(codec.decode_any(reader, ctx)?)?);
        }
        reader.read_end_array()?;
        Ok(Box::new(items.into_iter().collect::<C>()))
    }
}

/// A rectangular array of `ndims` dimensions stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiArray<T> {
    dims: Vec<usize>,
    data: Vec<T>,
}

impl<T> MultiArray<T> {
    /// Creates an array from its dimension sizes and row-major data.
    pub fn new(dims: Vec<usize>, data: Vec<T>) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::Configuration(
                "a multi-dimensional array needs at least one dimension".into(),
            ));
        }
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(Error::Configuration(format!(
                "dimensions {dims:?} hold {expected} items, data has {}",
                data.len()
            )));
        }
        Ok(MultiArray { dims, data })
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// The item at a full index, or `None` when out of bounds.
    #[must_use]
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut flat = 0;
        for (&idx, &dim) in index.iter().zip(&self.dims) {
            if idx >= dim {
                return None;
            }
            flat = flat * dim + idx;
        }
        self.data.get(flat)
    }
}

/// Codec for [`MultiArray`], stored as arrays nested `ndims` deep.
/// Jagged input data is rejected on decode.
pub struct MultiArrayCodec<T> {
    ndims: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> MultiArrayCodec<T> {
    #[must_use]
    pub fn new(ndims: usize) -> Self {
        MultiArrayCodec {
            ndims,
            _marker: PhantomData,
        }
    }

    fn encode_slice(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        codec: &dyn Codec,
        converter: Option<Converter>,
        dims: &[usize],
        data: &[T],
    ) -> Result<()> {
        writer.write_start_array()?;
        if dims.len() == 1 {
            for item in data {
                ctx.nominal = Some(TypeId::of::<T>());
                ctx.converter = converter;
                codec.encode_any(writer, ctx, item)?;
            }
        } else {
            let chunk: usize = dims[1..].iter().product();
            for i in 0..dims[0] {
                self.encode_slice(
                    writer,
                    ctx,
                    codec,
                    converter,
                    &dims[1..],
                    &data[i * chunk..(i + 1) * chunk],
                )?;
            }
        }
        writer.write_end_array()
    }

    fn decode_level(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
        codec: &dyn Codec,
        converter: Option<Converter>,
        level: usize,
        dims: &mut [Option<usize>],
        data: &mut Vec<T>,
    ) -> Result<()> {
        reader.read_start_array()?;
        let mut count = 0;
        while let Some(element_type) = reader.read_bson_type()? {
            if level + 1 < self.ndims {
                if element_type != BsonType::Array {
                    return Err(Error::Format(format!(
                        "expected a nested array at depth {}, found {element_type}",
                        level + 1
                    )));
                }
                self.decode_level(reader, ctx, codec, converter, level + 1, dims, data)?;
            } else {
                ctx.nominal = Some(TypeId::of::<T>());
                ctx.converter = converter;
                data.push(expect_boxed::<T>(codec.decode_any(reader, ctx)?)?);
            }
            count += 1;
        }
        reader.read_end_array()?;
        match dims[level] {
            None => dims[level] = Some(count),
            Some(expected) if expected != count => {
                return Err(Error::Format(
                    "jagged data cannot fill a rectangular array".into(),
                ))
            }
            Some(_) => {}
        }
        Ok(())
    }
}

impl<T: 'static> Codec for MultiArrayCodec<T> {
    fn value_type(&self) -> TypeId {
        TypeId::of::<MultiArray<T>>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let array = expect::<MultiArray<T>>(value)?;
        if array.dims.len() != self.ndims {
            return Err(Error::Configuration(format!(
                "array has {} dimensions, codec expects {}",
                array.dims.len(),
                self.ndims
            )));
        }
        let converter = ctx.take_converter();
        let codec = ctx.registry().codec_of::<T>()?;
        self.encode_slice(writer, ctx, codec.as_ref(), converter, &array.dims, &array.data)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let converter = ctx.take_converter();
        ctx.take_nominal();
        let codec = ctx.registry().codec_of::<T>()?;
        let mut dims = vec![None; self.ndims];
        let mut data = Vec::new();
        self.decode_level(reader, ctx, codec.as_ref(), converter, 0, &mut dims, &mut data)?;
        let dims: Vec<usize> = dims.into_iter().map(|d| d.unwrap_or(0)).collect();
        Ok(Box::new(MultiArray::new(dims, data)?))
    }
}

/// How a dictionary is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictionaryRepresentation {
    /// Document form when every key can be an element name, otherwise
    /// the array-of-arrays form.
    #[default]
    Dynamic,
    /// Always a document; keys that cannot be element names are an error.
    Document,
    /// Always an array of `[key, value]` pairs.
    ArrayOfArrays,
}

/// A dictionary key type.
///
/// `document_name` decides whether the key can serve as an element name in
/// the document form. Only well-formed string keys qualify; every other key
/// type forces the array form, so that `{1: 2}` and `{"1": 2}` stay
/// distinguishable on the wire. `from_document_name` still accepts the
/// document form on decode for data written by other producers.
pub trait DictionaryKey: Sized {
    fn document_name(&self) -> Option<String>;
    fn to_bson(&self) -> Bson;
    fn from_document_name(name: &str) -> Result<Self>;
    fn from_bson(value: &Bson) -> Result<Self>;
}

fn string_document_name(s: &str) -> Option<String> {
    if s.is_empty() || s.starts_with('$') || s.contains('.') || s.contains('\0') {
        None
    } else {
        Some(s.to_string())
    }
}

impl DictionaryKey for String {
    fn document_name(&self) -> Option<String> {
        string_document_name(self)
    }

    fn to_bson(&self) -> Bson {
        Bson::String(self.clone())
    }

    fn from_document_name(name: &str) -> Result<Self> {
        Ok(name.to_string())
    }

    fn from_bson(value: &Bson) -> Result<Self> {
        match value {
            Bson::String(s) => Ok(s.clone()),
            other => Err(Error::Format(format!(
                "expected a string key, found {}",
                other.element_type()
            ))),
        }
    }
}

macro_rules! int_dictionary_key {
    ($ty:ty, $to_bson:expr) => {
        impl DictionaryKey for $ty {
            // Integer keys never take the document form; "1" and 1 must not collide.
            fn document_name(&self) -> Option<String> {
                None
            }

            fn to_bson(&self) -> Bson {
                $to_bson(*self)
            }

            fn from_document_name(name: &str) -> Result<Self> {
                name.parse().map_err(|_| {
                    Error::Format(format!("malformed {} key: {name}", stringify!($ty)))
                })
            }

            fn from_bson(value: &Bson) -> Result<Self> {
                let wide = value.as_i64().ok_or_else(|| {
                    Error::Format(format!(
                        "expected an integer key, found {}",
                        value.element_type()
                    ))
                })?;
                <$ty>::try_from(wide)
                    .map_err(|_| Error::Overflow(format!("{wide} does not fit in a {} key", stringify!($ty))))
            }
        }
    };
}

int_dictionary_key!(i32, |v| Bson::Int32(v));
int_dictionary_key!(i64, |v| Bson::Int64(v));
int_dictionary_key!(u32, |v: u32| Bson::Int64(i64::from(v)));

impl DictionaryKey for bool {
    fn document_name(&self) -> Option<String> {
        None
    }

    fn to_bson(&self) -> Bson {
        Bson::Boolean(*self)
    }

    fn from_document_name(name: &str) -> Result<Self> {
        match name {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::Format(format!("malformed bool key: {other}"))),
        }
    }

    fn from_bson(value: &Bson) -> Result<Self> {
        value.as_bool().ok_or_else(|| {
            Error::Format(format!(
                "expected a boolean key, found {}",
                value.element_type()
            ))
        })
    }
}

impl DictionaryKey for Bson {
    fn document_name(&self) -> Option<String> {
        match self {
            Bson::String(s) => string_document_name(s),
            _ => None,
        }
    }

    fn to_bson(&self) -> Bson {
        self.clone()
    }

    fn from_document_name(name: &str) -> Result<Self> {
        Ok(Bson::String(name.to_string()))
    }

    fn from_bson(value: &Bson) -> Result<Self> {
        Ok(value.clone())
    }
}

/// Codec for map collections `M` of `(K, V)` pairs.
pub struct MapCodec<M, K, V> {
    representation: DictionaryRepresentation,
    _marker: PhantomData<fn() -> (M, K, V)>,
}

impl<M, K, V> MapCodec<M, K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_representation(DictionaryRepresentation::Dynamic)
    }

    #[must_use]
    pub fn with_representation(representation: DictionaryRepresentation) -> Self {
        MapCodec {
            representation,
            _marker: PhantomData,
        }
    }
}

impl<M, K, V> Default for MapCodec<M, K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, K, V> Codec for MapCodec<M, K, V>
where
    M: FromIterator<(K, V)> + 'static,
    for<'a> &'a M: IntoIterator<Item = (&'a K, &'a V)>,
    K: DictionaryKey + 'static,
    V: 'static,
{
    fn value_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let map = expect::<M>(value)?;
        let converter = ctx.take_converter();
        let codec = ctx.registry().codec_of::<V>()?;
        let as_document = match self.representation {
            DictionaryRepresentation::Document => true,
            DictionaryRepresentation::ArrayOfArrays => false,
            DictionaryRepresentation::Dynamic => {
                map.into_iter().all(|(k, _)| k.document_name().is_some())
            }
        };
        if as_document {
            writer.write_start_document()?;
            for (key, item) in map {
                let name = key.document_name().ok_or_else(|| {
                    Error::Format("key cannot be used as a document element name".into())
                })?;
                writer.write_name(&name)?;
                ctx.nominal = Some(TypeId::of::<V>());
                ctx.converter = converter;
                codec.encode_any(writer, ctx, item)?;
            }
            writer.write_end_document()
        } else {
            writer.write_start_array()?;
            for (key, item) in map {
                writer.write_start_array()?;
                write_bson(writer, &key.to_bson())?;
                ctx.nominal = Some(TypeId::of::<V>());
                ctx.converter = converter;
                codec.encode_any(writer, ctx, item)?;
                writer.write_end_array()?;
            }
            writer.write_end_array()
        }
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        let converter = ctx.take_converter();
        ctx.take_nominal();
        let codec = ctx.registry().codec_of::<V>()?;
        let mut pairs: Vec<(K, V)> = Vec::new();
        match reader.peek_bson_type()? {
            BsonType::Document => {
                reader.read_start_document()?;
                while reader.read_bson_type()?.is_some() {
                    let name = reader.read_name()?;
                    let key = K::from_document_name(&name)?;
                    ctx.nominal = Some(TypeId::of::<V>());
                    ctx.converter = converter;
                    pairs.push((key, expect_boxed::<V>(codec.decode_any(reader, ctx)?)?));
                }
                reader.read_end_document()?;
            }
            BsonType::Array => {
                reader.read_start_array()?;
                while let Some(entry_type) = reader.read_bson_type()? {
                    if entry_type != BsonType::Array {
                        return Err(Error::Format(format!(
                            "dictionary entries must be two-element arrays, found {entry_type}"
                        )));
                    }
                    reader.read_start_array()?;
                    reader.peek_bson_type()?;
                    let key = K::from_bson(&read_bson_value(reader)?)?;
                    reader.peek_bson_type()?;
                    ctx.nominal = Some(TypeId::of::<V>());
                    ctx.converter = converter;
                    let item = expect_boxed::<V>(codec.decode_any(reader, ctx)?)?;
                    if reader.read_bson_type()?.is_some() {
                        return Err(Error::Format(
                            "dictionary entry has more than two elements".into(),
                        ));
                    }
                    reader.read_end_array()?;
                    pairs.push((key, item));
                }
                reader.read_end_array()?;
            }
            other => {
                return Err(Error::Format(format!(
                    "cannot decode a dictionary from {other}"
                )))
            }
        }
        Ok(Box::new(pairs.into_iter().collect::<M>()))
    }
}

/// Registers a `Vec<T>` codec.
pub fn register_vec<T: 'static>(registry: &Registry) {
    registry.register_codec(Arc::new(SeqCodec::<Vec<T>, T>::new()));
}

/// Registers a `VecDeque<T>` codec.
pub fn register_vec_deque<T: 'static>(registry: &Registry) {
    registry.register_codec(Arc::new(SeqCodec::<VecDeque<T>, T>::new()));
}

/// Registers a `LinkedList<T>` codec.
pub fn register_linked_list<T: 'static>(registry: &Registry) {
    registry.register_codec(Arc::new(SeqCodec::<LinkedList<T>, T>::new()));
}

/// Registers a `BTreeSet<T>` codec.
pub fn register_btree_set<T: Ord + 'static>(registry: &Registry) {
    registry.register_codec(Arc::new(SeqCodec::<BTreeSet<T>, T>::new()));
}

/// Registers a `HashMap<K, V>` codec with the dynamic key strategy.
pub fn register_hash_map<K, V>(registry: &Registry)
where
    K: DictionaryKey + Eq + Hash + 'static,
    V: 'static,
{
    registry.register_codec(Arc::new(MapCodec::<HashMap<K, V>, K, V>::new()));
}

/// Registers a `BTreeMap<K, V>` codec with the dynamic key strategy.
pub fn register_btree_map<K, V>(registry: &Registry)
where
    K: DictionaryKey + Ord + 'static,
    V: 'static,
{
    registry.register_codec(Arc::new(MapCodec::<BTreeMap<K, V>, K, V>::new()));
}

/// Registers a [`MultiArray<T>`] codec for arrays of `ndims` dimensions.
pub fn register_multi_array<T: 'static>(registry: &Registry, ndims: usize) {
    registry.register_codec(Arc::new(MultiArrayCodec::<T>::new(ndims)));
}
