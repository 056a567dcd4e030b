// ABOUTME: The codec registry: one codec per Rust type, plus discriminator
// ABOUTME: names, hierarchy scopes, and upcast conversions for decode.

use crate::classmap::{ClassMap, ClassMapCodec};
use crate::codec::{
    expect_boxed, AnyValue, BinaryCodec, BoolCodec, BsonValueCodec, Codec, Decimal128Codec,
    DocumentCodec, F32Codec, F64Codec, GuidCodec, I16Codec, I32Codec, I64Codec, I8Codec,
    ObjectIdCodec, StringCodec, TimestampCodec, U16Codec, U32Codec, U64Codec, U8Codec,
};
use crate::collections::SeqCodec;
use crate::discriminator::{DiscriminatorInfo, HierarchyCodec};
use crate::error::{Error, Result};
use crate::object::ObjectCodec;
use crate::representation::{DateTimeCodec, TimeSpanCodec};
use crate::value::Bson;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Upcast = Arc<dyn Fn(AnyValue) -> Result<AnyValue> + Send + Sync>;

/// Registration options for a class.
#[derive(Default)]
pub struct ClassOptions {
    discriminator: Option<String>,
    parent: Option<TypeId>,
    is_root: bool,
    required: bool,
}

impl ClassOptions {
    #[must_use]
    pub fn new() -> Self {
        ClassOptions::default()
    }

    /// Overrides the discriminator value, which defaults to the class name.
    #[must_use]
    pub fn discriminator(mut self, value: &str) -> Self {
        self.discriminator = Some(value.to_string());
        self
    }

    /// Declares `P` as this class's base. The parent must be registered
    /// first so that discriminator scopes can be chained.
    #[must_use]
    pub fn parent<P: 'static>(mut self) -> Self {
        self.parent = Some(TypeId::of::<P>());
        self
    }

    /// Marks this class as a hierarchy root; classes below a root are
    /// written with the full root-to-leaf discriminator array.
    #[must_use]
    pub fn root(mut self) -> Self {
        self.is_root = true;
        self
    }

    /// Always writes the discriminator for this class, even when the
    /// nominal type already determines it.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Default)]
struct Inner {
    codecs: HashMap<TypeId, Arc<dyn Codec>>,
    names: HashMap<TypeId, String>,
    infos: HashMap<TypeId, DiscriminatorInfo>,
    class_types: HashSet<TypeId>,
    /// Discriminator resolution scopes keyed by nominal type. A class's
    /// discriminator is visible in its own scope and every ancestor's.
    scopes: HashMap<TypeId, HashMap<String, TypeId>>,
    /// The unscoped namespace used when no nominal type is available.
    any_scope: HashMap<String, TypeId>,
    upcasts: HashMap<(TypeId, TypeId), Upcast>,
}

fn scope_insert(scope: &mut HashMap<String, TypeId>, name: &str, ty: TypeId) -> Result<()> {
    match scope.get(name) {
        Some(&existing) if existing != ty => Err(Error::Configuration(format!(
            "discriminator {name} is already taken in this scope"
        ))),
        Some(_) => Ok(()),
        None => {
            scope.insert(name.to_string(), ty);
            Ok(())
        }
    }
}

fn scope_conflicts(scope: &HashMap<String, TypeId>, name: &str, ty: TypeId) -> bool {
    matches!(scope.get(name), Some(&existing) if existing != ty)
}

/// Maps Rust types to codecs and resolves discriminators during decode.
///
/// A fresh registry already knows the primitive and BSON value types; call
/// the `register_*` methods to add classes, collections, and hierarchies.
/// Registries are internally synchronized and can be shared across threads.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    /// Creates a registry with the built-in codecs installed.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry {
            inner: RwLock::new(Inner::default()),
        };
        registry.install_builtins();
        registry
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn install_builtins(&self) {
        self.insert_builtin("i8", Arc::new(I8Codec::new()));
        self.insert_builtin("i16", Arc::new(I16Codec::new()));
        self.insert_builtin("i32", Arc::new(I32Codec::new()));
        self.insert_builtin("i64", Arc::new(I64Codec::new()));
        self.insert_builtin("u8", Arc::new(U8Codec::new()));
        self.insert_builtin("u16", Arc::new(U16Codec::new()));
        self.insert_builtin("u32", Arc::new(U32Codec::new()));
        self.insert_builtin("u64", Arc::new(U64Codec::new()));
        self.insert_builtin("f32", Arc::new(F32Codec::new()));
        self.insert_builtin("f64", Arc::new(F64Codec::new()));
        self.insert_builtin("bool", Arc::new(BoolCodec::new()));
        self.insert_builtin("String", Arc::new(StringCodec::new()));
        self.insert_builtin("ObjectId", Arc::new(ObjectIdCodec::new()));
        self.insert_builtin("Guid", Arc::new(GuidCodec::new()));
        self.insert_builtin("Binary", Arc::new(BinaryCodec));
        self.insert_builtin("Timestamp", Arc::new(TimestampCodec));
        self.insert_builtin("Decimal128", Arc::new(Decimal128Codec));
        self.insert_builtin("DateTime", Arc::new(DateTimeCodec::new()));
        self.insert_builtin("TimeSpan", Arc::new(TimeSpanCodec::new()));
        self.insert_builtin("Bson", Arc::new(BsonValueCodec));
        self.insert_builtin("Document", Arc::new(DocumentCodec));
        self.insert_builtin("Object", Arc::new(ObjectCodec));
        self.insert_builtin("Array", Arc::new(SeqCodec::<Vec<AnyValue>, AnyValue>::new()));
    }

    fn insert_builtin(&self, name: &str, codec: Arc<dyn Codec>) {
        let ty = codec.value_type();
        let mut inner = self.write();
        inner.codecs.insert(ty, codec);
        inner.names.insert(ty, name.to_string());
        inner.any_scope.insert(name.to_string(), ty);
    }

    /// Registers a codec for its value type, replacing any previous one.
    pub fn register_codec(&self, codec: Arc<dyn Codec>) {
        let ty = codec.value_type();
        self.write().codecs.insert(ty, codec);
    }

    /// Registers a codec under a name usable as a discriminator value.
    pub fn register_named_codec(&self, name: &str, codec: Arc<dyn Codec>) -> Result<()> {
        let ty = codec.value_type();
        let mut inner = self.write();
        scope_insert(&mut inner.any_scope, name, ty)?;
        inner.codecs.insert(ty, codec);
        inner.names.insert(ty, name.to_string());
        Ok(())
    }

    /// Registers a class map together with its discriminator options.
    ///
    /// The discriminator value must be unique in the class's own scope, in
    /// every ancestor's scope, and in the unscoped namespace.
    pub fn register_class(&self, map: ClassMap, options: ClassOptions) -> Result<()> {
        let ty = map.type_id();
        let disc = options
            .discriminator
            .unwrap_or_else(|| map.class_name().to_string());
        let codec: Arc<dyn Codec> = Arc::new(ClassMapCodec::new(map));

        let mut inner = self.write();
        if inner.class_types.contains(&ty) {
            return Err(Error::Configuration(format!(
                "class {disc} is already registered"
            )));
        }
        let mut ancestors = Vec::new();
        let mut parent = options.parent;
        while let Some(p) = parent {
            ancestors.push(p);
            parent = inner.infos.get(&p).and_then(|i| i.parent);
        }
        // Verify every scope before touching any of them.
        if scope_conflicts(&inner.any_scope, &disc, ty)
            || ancestors
                .iter()
                .any(|a| inner.scopes.get(a).is_some_and(|s| scope_conflicts(s, &disc, ty)))
        {
            return Err(Error::Configuration(format!(
                "discriminator {disc} is already taken in this scope"
            )));
        }
        scope_insert(&mut inner.any_scope, &disc, ty)?;
        scope_insert(inner.scopes.entry(ty).or_default(), &disc, ty)?;
        for a in ancestors {
            scope_insert(inner.scopes.entry(a).or_default(), &disc, ty)?;
        }
        inner.codecs.insert(ty, codec);
        inner.names.insert(ty, disc.clone());
        inner.class_types.insert(ty);
        inner.infos.insert(
            ty,
            DiscriminatorInfo {
                discriminator: disc,
                is_root: options.is_root,
                required: options.required,
                parent: options.parent,
            },
        );
        Ok(())
    }

    /// Registers a polymorphic handle type `B`, typically `Box<dyn Trait>`.
    /// `as_any` exposes the concrete value behind the handle for dispatch.
    pub fn register_hierarchy<B: 'static>(
        &self,
        name: &str,
        as_any: fn(&B) -> &dyn Any,
    ) -> Result<()> {
        let ty = TypeId::of::<B>();
        let mut inner = self.write();
        if inner.codecs.contains_key(&ty) {
            return Err(Error::Configuration(format!(
                "hierarchy {name} is already registered"
            )));
        }
        inner.codecs.insert(ty, Arc::new(HierarchyCodec::<B>::new(as_any)));
        inner.names.insert(ty, name.to_string());
        inner.scopes.entry(ty).or_default();
        Ok(())
    }

    /// Adds a registered class `C` to the hierarchy of handle type `B`.
    /// `upcast` wraps a decoded concrete value back into the handle.
    pub fn register_hierarchy_member<B: 'static, C: 'static>(
        &self,
        upcast: fn(C) -> B,
    ) -> Result<()> {
        let base = TypeId::of::<B>();
        let member = TypeId::of::<C>();
        let mut inner = self.write();
        let disc = inner
            .infos
            .get(&member)
            .map(|i| i.discriminator.clone())
            .ok_or_else(|| {
                Error::Configuration(
                    "a class must be registered before it can join a hierarchy".into(),
                )
            })?;
        scope_insert(inner.scopes.entry(base).or_default(), &disc, member)?;
        inner.upcasts.insert(
            (member, base),
            Arc::new(move |value| {
                let concrete = expect_boxed::<C>(value)?;
                Ok(Box::new(upcast(concrete)) as AnyValue)
            }),
        );
        Ok(())
    }

    /// Looks up the codec for a type id.
    pub fn codec_for(&self, ty: TypeId) -> Result<Arc<dyn Codec>> {
        self.read().codecs.get(&ty).cloned().ok_or_else(|| {
            Error::Configuration("no codec is registered for the value's type".into())
        })
    }

    /// Looks up the codec for `T`, naming the type on failure.
    pub fn codec_of<T: 'static>(&self) -> Result<Arc<dyn Codec>> {
        self.read()
            .codecs
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no codec is registered for {}",
                    std::any::type_name::<T>()
                ))
            })
    }

    pub(crate) fn is_class(&self, ty: TypeId) -> bool {
        self.read().class_types.contains(&ty)
    }

    pub(crate) fn name_for(&self, ty: TypeId) -> Option<String> {
        self.read().names.get(&ty).cloned()
    }

    pub(crate) fn resolve_any(&self, name: &str) -> Option<TypeId> {
        self.read().any_scope.get(name).copied()
    }

    /// True when any class on the ancestor chain demands a discriminator.
    pub(crate) fn discriminator_required(&self, ty: TypeId) -> bool {
        let inner = self.read();
        let mut current = Some(ty);
        while let Some(c) = current {
            match inner.infos.get(&c) {
                Some(info) if info.required => return true,
                Some(info) => current = info.parent,
                None => return false,
            }
        }
        false
    }

    /// The discriminator value to store for `actual`, or `None` when the
    /// nominal type already determines the class and none is demanded.
    /// Classes under a hierarchy root get the root-to-leaf array form.
    pub(crate) fn discriminator_to_write(
        &self,
        nominal: Option<TypeId>,
        actual: TypeId,
    ) -> Option<Bson> {
        let inner = self.read();
        let info = inner.infos.get(&actual)?;
        let mut chain = vec![info.clone()];
        let mut parent = info.parent;
        while let Some(p) = parent {
            match inner.infos.get(&p) {
                Some(i) => {
                    chain.push(i.clone());
                    parent = i.parent;
                }
                None => break,
            }
        }
        let needed = nominal != Some(actual) || chain.iter().any(|i| i.required);
        if !needed {
            return None;
        }
        match chain.iter().rposition(|i| i.is_root) {
            Some(root) if root > 0 => Some(Bson::Array(
                chain[..=root]
                    .iter()
                    .rev()
                    .map(|i| Bson::String(i.discriminator.clone()))
                    .collect(),
            )),
            _ => Some(Bson::String(info.discriminator.clone())),
        }
    }

    /// Resolves a stored discriminator to a concrete type. An array form
    /// resolves through its last (leaf) element.
    pub(crate) fn resolve_discriminator(
        &self,
        nominal: Option<TypeId>,
        disc: &Bson,
    ) -> Result<TypeId> {
        let name = match disc {
            Bson::String(s) => s.as_str(),
            Bson::Array(items) => items
                .last()
                .and_then(Bson::as_str)
                .ok_or_else(|| Error::Format("malformed discriminator array".into()))?,
            other => {
                return Err(Error::Format(format!(
                    "discriminator must be a string or array of strings, found {}",
                    other.element_type()
                )))
            }
        };
        let inner = self.read();
        let resolved = match nominal.and_then(|n| inner.scopes.get(&n)) {
            Some(scope) => scope.get(name).copied(),
            None => inner.any_scope.get(name).copied(),
        };
        resolved.ok_or_else(|| Error::Format(format!("unknown discriminator {name}")))
    }

    /// Converts a decoded concrete value into the nominal type it was
    /// decoded for, composing registered conversions along the parent chain.
    pub(crate) fn upcast(&self, from: TypeId, to: TypeId, value: AnyValue) -> Result<AnyValue> {
        if from == to {
            return Ok(value);
        }
        let inner = self.read();
        if let Some(f) = inner.upcasts.get(&(from, to)).cloned() {
            drop(inner);
            return f(value);
        }
        let mut current = from;
        let mut value = value;
        loop {
            let parent = inner
                .infos
                .get(&current)
                .and_then(|i| i.parent)
                .ok_or_else(|| {
                    Error::Configuration(
                        "no conversion is registered between the decoded and nominal types".into(),
                    )
                })?;
            let f = inner.upcasts.get(&(current, parent)).cloned().ok_or_else(|| {
                Error::Configuration(
                    "no conversion is registered between the decoded and nominal types".into(),
                )
            })?;
            value = f(value)?;
            current = parent;
            if current == to {
                return Ok(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classmap::ClassMapBuilder;

    #[derive(Default)]
    struct A {
        x: i32,
    }

    #[derive(Default)]
    struct B {
        x: i32,
    }

    #[derive(Default)]
    struct C {
        x: i32,
    }

    fn register_chain(registry: &Registry) {
        // A <- B (root) <- C
        registry
            .register_class(
                ClassMapBuilder::<A>::new("A")
                    .member("x", |a: &A| a.x, |a, v| a.x = v)
                    .build()
                    .unwrap(),
                ClassOptions::new(),
            )
            .unwrap();
        registry
            .register_class(
                ClassMapBuilder::<B>::new("B")
                    .member("x", |b: &B| b.x, |b, v| b.x = v)
                    .build()
                    .unwrap(),
                ClassOptions::new().parent::<A>().root(),
            )
            .unwrap();
        registry
            .register_class(
                ClassMapBuilder::<C>::new("C")
                    .member("x", |c: &C| c.x, |c, v| c.x = v)
                    .build()
                    .unwrap(),
                ClassOptions::new().parent::<B>(),
            )
            .unwrap();
    }

    #[test]
    fn builtins_are_preinstalled() {
        let registry = Registry::new();
        assert!(registry.codec_of::<i32>().is_ok());
        assert!(registry.codec_of::<String>().is_ok());
        assert!(registry.codec_of::<Bson>().is_ok());
        assert!(registry.codec_of::<std::net::IpAddr>().is_err());
    }

    #[test]
    fn matching_nominal_type_needs_no_discriminator() {
        let registry = Registry::new();
        register_chain(&registry);
        let a = TypeId::of::<A>();
        assert_eq!(registry.discriminator_to_write(Some(a), a), None);
    }

    #[test]
    fn subtree_below_a_root_uses_the_array_form() {
        let registry = Registry::new();
        register_chain(&registry);
        let disc = registry
            .discriminator_to_write(Some(TypeId::of::<A>()), TypeId::of::<C>())
            .unwrap();
        assert_eq!(
            disc,
            Bson::Array(vec![Bson::String("B".into()), Bson::String("C".into())])
        );
    }

    #[test]
    fn root_itself_gets_a_scalar_discriminator() {
        let registry = Registry::new();
        register_chain(&registry);
        let disc = registry
            .discriminator_to_write(Some(TypeId::of::<A>()), TypeId::of::<B>())
            .unwrap();
        assert_eq!(disc, Bson::String("B".into()));
    }

    #[test]
    fn array_discriminators_resolve_through_the_leaf() {
        let registry = Registry::new();
        register_chain(&registry);
        let disc = Bson::Array(vec![Bson::String("B".into()), Bson::String("C".into())]);
        let resolved = registry
            .resolve_discriminator(Some(TypeId::of::<A>()), &disc)
            .unwrap();
        assert_eq!(resolved, TypeId::of::<C>());
    }

    #[test]
    fn duplicate_discriminators_are_rejected() {
        let registry = Registry::new();
        register_chain(&registry);
        #[derive(Default)]
        struct D;
        let err = registry
            .register_class(
                ClassMapBuilder::<D>::new("D").build().unwrap(),
                ClassOptions::new().discriminator("B"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn unknown_discriminators_are_a_format_error() {
        let registry = Registry::new();
        register_chain(&registry);
        let err = registry
            .resolve_discriminator(Some(TypeId::of::<A>()), &Bson::String("Z".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
