// ABOUTME: Class maps: per-member metadata, the fluent builder, and the
// ABOUTME: codec that turns mapped structs into documents and back.

use crate::codec::{expect_boxed, AnyValue, Codec, DecodeContext, EncodeContext};
use crate::discriminator::DISCRIMINATOR_ELEMENT;
use crate::error::{Error, Result};
use crate::reader::{read_bson_value, BsonReader};
use crate::representation::Converter;
use crate::types::{BsonType, Timestamp};
use crate::writer::{write_bson, BsonWriter};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

type Getter = Box<dyn Fn(&dyn Any) -> Result<Option<AnyValue>> + Send + Sync>;
type Setter = Box<dyn Fn(&mut dyn Any, Option<AnyValue>) -> Result<()> + Send + Sync>;
type Ctor = Box<dyn Fn() -> AnyValue + Send + Sync>;
type DefaultFn = Box<dyn Fn() -> AnyValue + Send + Sync>;
type IsDefaultFn = Box<dyn Fn(&dyn Any) -> bool + Send + Sync>;

/// How one struct field maps onto one document element.
pub struct MemberMap {
    member_name: String,
    element_name: String,
    /// The member's declared value type, used to pick a codec when none is
    /// pinned on the member itself.
    nominal: TypeId,
    get: Getter,
    set: Setter,
    codec: Option<Arc<dyn Codec>>,
    converter: Option<Converter>,
    default: Option<DefaultFn>,
    is_default: Option<IsDefaultFn>,
    ignore_if_null: bool,
    ignore_if_default: bool,
    is_id: bool,
    is_timestamp: bool,
}

/// Builder for one member when the plain `member` call is not enough.
pub struct MemberOptions<T, V> {
    name: String,
    element_name: Option<String>,
    get: Box<dyn Fn(&T) -> V + Send + Sync>,
    set: Box<dyn Fn(&mut T, V) + Send + Sync>,
    codec: Option<Arc<dyn Codec>>,
    converter: Option<Converter>,
    default: Option<DefaultFn>,
    is_default: Option<IsDefaultFn>,
    ignore_if_null: bool,
    ignore_if_default: bool,
}

impl<T: 'static, V: 'static> MemberOptions<T, V> {
    pub fn new(
        name: &str,
        get: impl Fn(&T) -> V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        MemberOptions {
            name: name.to_string(),
            element_name: None,
            get: Box::new(get),
            set: Box::new(set),
            codec: None,
            converter: None,
            default: None,
            is_default: None,
            ignore_if_null: false,
            ignore_if_default: false,
        }
    }

    /// Stores the member under a different element name.
    #[must_use]
    pub fn element_name(mut self, name: &str) -> Self {
        self.element_name = Some(name.to_string());
        self
    }

    /// Pins a codec for this member instead of the registry's.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Declares the wire representation for this member.
    #[must_use]
    pub fn representation(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// The value assigned when the element is absent from a document,
    /// and the value compared against for `ignore_if_default`.
    #[must_use]
    pub fn default_value(mut self, value: V) -> Self
    where
        V: Clone + PartialEq + Send + Sync,
    {
        let probe = value.clone();
        self.default = Some(Box::new(move || Box::new(value.clone()) as AnyValue));
        self.is_default = Some(Box::new(move |candidate| {
            candidate.downcast_ref::<V>() == Some(&probe)
        }));
        self
    }

    /// Skips the element when the getter yields `None`.
    #[must_use]
    pub fn ignore_if_null(mut self) -> Self {
        self.ignore_if_null = true;
        self
    }

    /// Skips the element when the value equals the declared default.
    /// Requires `default_value`.
    #[must_use]
    pub fn ignore_if_default(mut self) -> Self {
        self.ignore_if_default = true;
        self
    }
}

fn erase_getter<T: 'static, V: 'static>(
    get: Box<dyn Fn(&T) -> V + Send + Sync>,
) -> Getter {
    Box::new(move |obj| {
        let obj = obj
            .downcast_ref::<T>()
            .ok_or_else(|| Error::Format("getter applied to a foreign object".into()))?;
        Ok(Some(Box::new(get(obj)) as AnyValue))
    })
}

fn erase_setter<T: 'static, V: 'static>(
    name: String,
    set: Box<dyn Fn(&mut T, V) + Send + Sync>,
) -> Setter {
    Box::new(move |obj, value| {
        let obj = obj
            .downcast_mut::<T>()
            .ok_or_else(|| Error::Format("setter applied to a foreign object".into()))?;
        match value {
            Some(v) => {
                set(obj, expect_boxed::<V>(v)?);
                Ok(())
            }
            None => Err(Error::Format(format!("member {name} cannot hold null"))),
        }
    })
}

/// The full element mapping of one class.
pub struct ClassMap {
    class_name: &'static str,
    type_id: TypeId,
    ctor: Ctor,
    members: Vec<MemberMap>,
    id_index: Option<usize>,
    timestamp_index: Option<usize>,
}

impl std::fmt::Debug for ClassMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassMap")
            .field("class_name", &self.class_name)
            .field("type_id", &self.type_id)
            .field("id_index", &self.id_index)
            .field("timestamp_index", &self.timestamp_index)
            .finish_non_exhaustive()
    }
}

impl ClassMap {
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    #[must_use]
    pub fn members(&self) -> impl Iterator<Item = (&str, &str)> {
        self.members
            .iter()
            .map(|m| (m.member_name.as_str(), m.element_name.as_str()))
    }
}

/// Fluent builder for a [`ClassMap`].
///
/// Members are stored in declaration order, except that an id member moves
/// to the front and a [`Timestamp`] member right after it, matching the
/// element order concurrency-token consumers expect.
pub struct ClassMapBuilder<T> {
    class_name: &'static str,
    ctor: Ctor,
    members: Vec<MemberMap>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Default + 'static> ClassMapBuilder<T> {
    #[must_use]
    pub fn new(class_name: &'static str) -> Self {
        Self::with_constructor(class_name, T::default)
    }
}

impl<T: 'static> ClassMapBuilder<T> {
    #[must_use]
    pub fn with_constructor(
        class_name: &'static str,
        ctor: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        ClassMapBuilder {
            class_name,
            ctor: Box::new(move || Box::new(ctor()) as AnyValue),
            members: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Maps a field under its own name.
    #[must_use]
    pub fn member<V: 'static>(
        self,
        name: &str,
        get: impl Fn(&T) -> V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        self.member_with(MemberOptions::new(name, get, set))
    }

    /// Maps the identity field; it is stored as `_id` and ordered first.
    #[must_use]
    pub fn id_member<V: 'static>(
        self,
        name: &str,
        get: impl Fn(&T) -> V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        let mut this = self.member_with(MemberOptions::new(name, get, set).element_name("_id"));
        if let Some(last) = this.members.last_mut() {
            last.is_id = true;
            last.is_timestamp = false;
        }
        this
    }

    /// Maps an `Option` field: `None` is stored as null (or skipped with
    /// `ignore_if_null`), and a null or absent element decodes to `None`.
    #[must_use]
    pub fn optional_member<V: 'static>(
        mut self,
        name: &str,
        get: impl Fn(&T) -> Option<V> + Send + Sync + 'static,
        set: impl Fn(&mut T, Option<V>) + Send + Sync + 'static,
    ) -> Self {
        let member_name = name.to_string();
        self.members.push(MemberMap {
            member_name: member_name.clone(),
            element_name: member_name.clone(),
            nominal: TypeId::of::<V>(),
            get: Box::new(move |obj| {
                let obj = obj
                    .downcast_ref::<T>()
                    .ok_or_else(|| Error::Format("getter applied to a foreign object".into()))?;
                Ok(get(obj).map(|v| Box::new(v) as AnyValue))
            }),
            set: Box::new(move |obj, value| {
                let obj = obj
                    .downcast_mut::<T>()
                    .ok_or_else(|| Error::Format("setter applied to a foreign object".into()))?;
                match value {
                    Some(v) => set(obj, Some(expect_boxed::<V>(v)?)),
                    None => set(obj, None),
                }
                Ok(())
            }),
            codec: None,
            converter: None,
            default: None,
            is_default: None,
            ignore_if_null: false,
            ignore_if_default: false,
            is_id: false,
            is_timestamp: false,
        });
        self
    }

    /// Maps a field with the full set of options.
    #[must_use]
    pub fn member_with<V: 'static>(mut self, options: MemberOptions<T, V>) -> Self {
        let element_name = options.element_name.unwrap_or_else(|| options.name.clone());
        self.members.push(MemberMap {
            member_name: options.name.clone(),
            element_name,
            nominal: TypeId::of::<V>(),
            get: erase_getter::<T, V>(options.get),
            set: erase_setter::<T, V>(options.name, options.set),
            codec: options.codec,
            converter: options.converter,
            default: options.default,
            is_default: options.is_default,
            ignore_if_null: options.ignore_if_null,
            ignore_if_default: options.ignore_if_default,
            is_id: false,
            is_timestamp: TypeId::of::<V>() == TypeId::of::<Timestamp>(),
        });
        self
    }

    /// Finalizes the map, checking name uniqueness and applying the id
    /// and timestamp ordering rules.
    pub fn build(self) -> Result<ClassMap> {
        let mut members = self.members;
        for (i, m) in members.iter().enumerate() {
            if m.ignore_if_default && m.is_default.is_none() {
                return Err(Error::Configuration(format!(
                    "member {} uses ignore_if_default without a default value",
                    m.member_name
                )));
            }
            for earlier in &members[..i] {
                if earlier.member_name == m.member_name {
                    return Err(Error::Configuration(format!(
                        "duplicate member name {}",
                        m.member_name
                    )));
                }
                if earlier.element_name == m.element_name {
                    return Err(Error::Configuration(format!(
                        "duplicate element name {}",
                        m.element_name
                    )));
                }
            }
        }
        if members.iter().filter(|m| m.is_id).count() > 1 {
            return Err(Error::Configuration(format!(
                "class {} declares more than one id member",
                self.class_name
            )));
        }
        if let Some(pos) = members.iter().position(|m| m.is_id) {
            let m = members.remove(pos);
            members.insert(0, m);
        }
        let id_index = members.first().filter(|m| m.is_id).map(|_| 0);
        // The timestamp slots in right after the id. Without an id it leads
        // the document instead, keeping it ahead of the discriminator.
        let after_id = id_index.map_or(0, |i| i + 1);
        if let Some(pos) = members.iter().position(|m| m.is_timestamp) {
            if pos > after_id {
                let m = members.remove(pos);
                members.insert(after_id, m);
            }
        }
        let timestamp_index = members.iter().position(|m| m.is_timestamp);
        Ok(ClassMap {
            class_name: self.class_name,
            type_id: TypeId::of::<T>(),
            ctor: self.ctor,
            members,
            id_index,
            timestamp_index,
        })
    }
}

/// Encodes and decodes instances of one mapped class.
pub struct ClassMapCodec {
    map: Arc<ClassMap>,
}

impl ClassMapCodec {
    #[must_use]
    pub fn new(map: ClassMap) -> Self {
        ClassMapCodec { map: Arc::new(map) }
    }

    /// Where the discriminator goes: after the id and timestamp members.
    fn discriminator_position(&self) -> usize {
        self.map
            .timestamp_index
            .map(|i| i + 1)
            .or_else(|| self.map.id_index.map(|i| i + 1))
            .unwrap_or(0)
    }
}

impl Codec for ClassMapCodec {
    fn value_type(&self) -> TypeId {
        self.map.type_id
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        ctx.take_converter();
        let nominal = ctx.take_nominal();
        let address = value as *const dyn Any as *const () as usize;
        ctx.guard.enter(address)?;
        let result = self.encode_document(writer, ctx, value, nominal);
        ctx.guard.exit(address);
        result
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        ctx.take_converter();
        ctx.take_nominal();
        reader.read_start_document()?;
        let mut value = (self.map.ctor)();
        let mut seen = vec![false; self.map.members.len()];
        let mut saw_disc = false;
        while let Some(element_type) = reader.read_bson_type()? {
            let name = reader.read_name()?;
            if name == DISCRIMINATOR_ELEMENT {
                saw_disc = true;
                read_bson_value(reader)?;
                continue;
            }
            let Some(idx) = self
                .map
                .members
                .iter()
                .position(|m| m.element_name == name)
            else {
                return Err(Error::Format(format!(
                    "unknown element {name} in {}",
                    self.map.class_name
                )));
            };
            let member = &self.map.members[idx];
            seen[idx] = true;
            let outcome = if element_type == BsonType::Null {
                reader
                    .read_null()
                    .and_then(|()| (member.set)(value.as_mut(), None))
            } else {
                self.decode_member(reader, ctx, value.as_mut(), member)
            };
            outcome.map_err(|e| e.for_member(self.map.class_name, &member.element_name))?;
        }
        reader.read_end_document()?;
        if !saw_disc && ctx.registry().discriminator_required(self.map.type_id) {
            return Err(Error::Format(format!(
                "{} requires a discriminator but the document has none",
                self.map.class_name
            )));
        }
        for (idx, member) in self.map.members.iter().enumerate() {
            if !seen[idx] {
                if let Some(default) = &member.default {
                    (member.set)(value.as_mut(), Some(default()))
                        .map_err(|e| e.for_member(self.map.class_name, &member.element_name))?;
                }
            }
        }
        Ok(value)
    }
}

impl ClassMapCodec {
    fn encode_document(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
        nominal: Option<TypeId>,
    ) -> Result<()> {
        let disc = ctx.registry().discriminator_to_write(nominal, self.map.type_id);
        let disc_position = self.discriminator_position();
        writer.write_start_document()?;
        for (i, member) in self.map.members.iter().enumerate() {
            if i == disc_position {
                if let Some(d) = &disc {
                    writer.write_name(DISCRIMINATOR_ELEMENT)?;
                    write_bson(writer, d)?;
                }
            }
            self.encode_member(writer, ctx, value, member)
                .map_err(|e| e.for_member(self.map.class_name, &member.element_name))?;
        }
        if disc_position >= self.map.members.len() {
            if let Some(d) = &disc {
                writer.write_name(DISCRIMINATOR_ELEMENT)?;
                write_bson(writer, d)?;
            }
        }
        writer.write_end_document()
    }

    fn encode_member(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        obj: &dyn Any,
        member: &MemberMap,
    ) -> Result<()> {
        let Some(value) = (member.get)(obj)? else {
            if member.ignore_if_null {
                return Ok(());
            }
            writer.write_name(&member.element_name)?;
            return writer.write_null();
        };
        if member.ignore_if_default {
            if let Some(is_default) = &member.is_default {
                if is_default(value.as_ref()) {
                    return Ok(());
                }
            }
        }
        let codec = match &member.codec {
            Some(c) => c.clone(),
            None => ctx.registry().codec_for(member.nominal)?,
        };
        writer.write_name(&member.element_name)?;
        ctx.nominal = Some(member.nominal);
        ctx.converter = member.converter;
        codec.encode_any(writer, ctx, value.as_ref())
    }

    fn decode_member(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
        obj: &mut dyn Any,
        member: &MemberMap,
    ) -> Result<()> {
        let codec = match &member.codec {
            Some(c) => c.clone(),
            None => ctx.registry().codec_for(member.nominal)?,
        };
        ctx.nominal = Some(member.nominal);
        ctx.converter = member.converter;
        let decoded = codec.decode_any(reader, ctx)?;
        (member.set)(obj, Some(decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::DocumentReader;
    use crate::registry::{ClassOptions, Registry};
    use crate::types::ObjectId;
    use crate::value::Bson;
    use crate::writer::DocumentWriter;
    use crate::doc;

    #[derive(Default, Debug, PartialEq, Clone)]
    struct Order {
        id: ObjectId,
        version: Timestamp,
        label: String,
        quantity: i32,
        note: Option<String>,
    }

    fn order_map() -> ClassMap {
        ClassMapBuilder::<Order>::new("Order")
            .member("label", |o: &Order| o.label.clone(), |o, v| o.label = v)
            .member("quantity", |o: &Order| o.quantity, |o, v| o.quantity = v)
            .optional_member("note", |o: &Order| o.note.clone(), |o, v| o.note = v)
            .id_member("id", |o: &Order| o.id, |o, v| o.id = v)
            .member("version", |o: &Order| o.version, |o, v| o.version = v)
            .build()
            .unwrap()
    }

    fn encode(registry: &Registry, order: &Order) -> crate::document::Document {
        let codec = registry.codec_of::<Order>().unwrap();
        let mut ctx = EncodeContext::new(registry);
        ctx.nominal = Some(TypeId::of::<Order>());
        let mut w = DocumentWriter::new();
        codec.encode_any(&mut w, &mut ctx, order).unwrap();
        w.into_document().unwrap()
    }

    fn decode(registry: &Registry, doc: crate::document::Document) -> Result<Order> {
        let codec = registry.codec_of::<Order>().unwrap();
        let mut ctx = DecodeContext::new(registry);
        ctx.nominal = Some(TypeId::of::<Order>());
        let mut r = DocumentReader::new(doc);
        let v = codec.decode_any(&mut r, &mut ctx)?;
        r.finish()?;
        Ok(expect_boxed::<Order>(v).unwrap())
    }

    #[test]
    fn id_and_timestamp_members_are_resequenced_to_the_front() {
        let map = order_map();
        let names: Vec<&str> = map.members().map(|(_, element)| element).collect();
        assert_eq!(names, ["_id", "version", "label", "quantity", "note"]);
    }

    #[test]
    fn timestamp_without_an_id_leads_the_document() {
        #[derive(Default)]
        struct Audit {
            note: String,
            version: Timestamp,
        }
        let registry = Registry::new();
        registry
            .register_class(
                ClassMapBuilder::<Audit>::new("Audit")
                    .member("note", |a: &Audit| a.note.clone(), |a, v| a.note = v)
                    .member("version", |a: &Audit| a.version, |a, v| a.version = v)
                    .build()
                    .unwrap(),
                ClassOptions::new().required(),
            )
            .unwrap();
        let codec = registry.codec_of::<Audit>().unwrap();
        let mut ctx = EncodeContext::new(&registry);
        ctx.nominal = Some(TypeId::of::<Audit>());
        let mut w = DocumentWriter::new();
        codec.encode_any(&mut w, &mut ctx, &Audit::default()).unwrap();
        let doc = w.into_document().unwrap();
        let names: Vec<&str> = doc.keys().collect();
        assert_eq!(names, ["version", "_t", "note"]);
    }

    #[test]
    fn class_round_trips_through_a_document() {
        let registry = Registry::new();
        registry
            .register_class(order_map(), ClassOptions::new())
            .unwrap();
        let order = Order {
            id: ObjectId::from_bytes([1; 12]),
            version: Timestamp { time: 9, increment: 1 },
            label: "widget".into(),
            quantity: 4,
            note: None,
        };
        let doc = encode(&registry, &order);
        assert_eq!(doc.get("note"), Some(&Bson::Null));
        assert_eq!(decode(&registry, doc).unwrap(), order);
    }

    #[test]
    fn required_discriminator_goes_after_id_and_timestamp() {
        let registry = Registry::new();
        registry
            .register_class(order_map(), ClassOptions::new().required())
            .unwrap();
        let doc = encode(&registry, &Order::default());
        let names: Vec<&str> = doc.keys().collect();
        assert_eq!(
            names,
            ["_id", "version", "_t", "label", "quantity", "note"]
        );
        assert_eq!(doc.get("_t"), Some(&Bson::String("Order".into())));
    }

    #[test]
    fn unknown_elements_are_rejected() {
        let registry = Registry::new();
        registry
            .register_class(order_map(), ClassOptions::new())
            .unwrap();
        let doc = doc! { "bogus" => 1 };
        assert!(matches!(
            decode(&registry, doc),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn null_for_a_plain_member_is_an_error_naming_the_member() {
        let registry = Registry::new();
        registry
            .register_class(order_map(), ClassOptions::new())
            .unwrap();
        let doc = doc! { "label" => Bson::Null };
        match decode(&registry, doc) {
            Err(Error::Member { class, member, .. }) => {
                assert_eq!(class, "Order");
                assert_eq!(member, "label");
            }
            other => panic!("expected a member error, got {other:?}"),
        }
    }

    #[test]
    fn missing_members_take_their_default() {
        #[derive(Default)]
        struct Config {
            retries: i32,
        }
        let registry = Registry::new();
        registry
            .register_class(
                ClassMapBuilder::<Config>::new("Config")
                    .member_with(
                        MemberOptions::new(
                            "retries",
                            |c: &Config| c.retries,
                            |c, v| c.retries = v,
                        )
                        .default_value(3),
                    )
                    .build()
                    .unwrap(),
                ClassOptions::new(),
            )
            .unwrap();
        let codec = registry.codec_of::<Config>().unwrap();
        let mut ctx = DecodeContext::new(&registry);
        let mut r = DocumentReader::new(crate::document::Document::new());
        let v = codec.decode_any(&mut r, &mut ctx).unwrap();
        assert_eq!(expect_boxed::<Config>(v).unwrap().retries, 3);
    }

    #[test]
    fn default_valued_members_can_be_skipped() {
        #[derive(Default)]
        struct Config {
            retries: i32,
        }
        let registry = Registry::new();
        registry
            .register_class(
                ClassMapBuilder::<Config>::new("Config")
                    .member_with(
                        MemberOptions::new(
                            "retries",
                            |c: &Config| c.retries,
                            |c, v| c.retries = v,
                        )
                        .default_value(3)
                        .ignore_if_default(),
                    )
                    .build()
                    .unwrap(),
                ClassOptions::new(),
            )
            .unwrap();
        let codec = registry.codec_of::<Config>().unwrap();
        let mut ctx = EncodeContext::new(&registry);
        let mut w = DocumentWriter::new();
        codec
            .encode_any(&mut w, &mut ctx, &Config { retries: 3 })
            .unwrap();
        assert!(w.into_document().unwrap().is_empty());
    }

    #[test]
    fn duplicate_element_names_fail_to_build() {
        let err = ClassMapBuilder::<Order>::new("Order")
            .member("a", |o: &Order| o.quantity, |o, v| o.quantity = v)
            .member_with(
                MemberOptions::new("b", |o: &Order| o.quantity, |o, v| o.quantity = v)
                    .element_name("a"),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
