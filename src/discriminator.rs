// ABOUTME: Discriminator metadata and the codec for polymorphic base types.
// ABOUTME: Concrete types are recovered from the "_t" element of a document.

use crate::codec::{expect, AnyValue, Codec, DecodeContext, EncodeContext};
use crate::error::{Error, Result};
use crate::reader::{read_document, BsonReader, DocumentReader};
use crate::writer::BsonWriter;
use std::any::{Any, TypeId};
use std::marker::PhantomData;

/// The element name reserved for discriminators.
pub const DISCRIMINATOR_ELEMENT: &str = "_t";

/// Per-class discriminator configuration kept by the registry.
#[derive(Clone)]
pub(crate) struct DiscriminatorInfo {
    /// The value written for this class, by default its class name.
    pub(crate) discriminator: String,
    /// Marks the top of a subtree that is serialized with the full
    /// root-to-leaf discriminator array instead of a single value.
    pub(crate) is_root: bool,
    /// Forces the discriminator even when the nominal type already
    /// determines the class.
    pub(crate) required: bool,
    pub(crate) parent: Option<TypeId>,
}

/// Codec for a polymorphic handle type `B`, typically `Box<dyn Trait>`.
///
/// Encoding dispatches on the concrete type behind the handle and forces a
/// discriminator. Decoding buffers the document, resolves `_t` in the
/// hierarchy's scope, decodes the concrete class, and upcasts the result
/// back into `B` through the conversion registered for the member type.
pub struct HierarchyCodec<B> {
    as_any: fn(&B) -> &dyn Any,
    _marker: PhantomData<fn() -> B>,
}

impl<B: 'static> HierarchyCodec<B> {
    #[must_use]
    pub fn new(as_any: fn(&B) -> &dyn Any) -> Self {
        HierarchyCodec {
            as_any,
            _marker: PhantomData,
        }
    }
}

impl<B: 'static> Codec for HierarchyCodec<B> {
    fn value_type(&self) -> TypeId {
        TypeId::of::<B>()
    }

    fn encode_any(
        &self,
        writer: &mut dyn BsonWriter,
        ctx: &mut EncodeContext<'_>,
        value: &dyn Any,
    ) -> Result<()> {
        let handle = expect::<B>(value)?;
        let concrete = (self.as_any)(handle);
        let codec = ctx.registry().codec_for(concrete.type_id())?;
        // The concrete type can never equal the handle type, so the class
        // codec always emits a discriminator.
        ctx.nominal = Some(TypeId::of::<B>());
        codec.encode_any(writer, ctx, concrete)
    }

    fn decode_any(
        &self,
        reader: &mut dyn BsonReader,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<AnyValue> {
        ctx.take_nominal();
        let doc = read_document(reader)?;
        let disc = doc
            .get(DISCRIMINATOR_ELEMENT)
            .cloned()
            .ok_or_else(|| Error::Format("document has no discriminator".into()))?;
        let base = TypeId::of::<B>();
        let concrete = ctx.registry().resolve_discriminator(Some(base), &disc)?;
        let codec = ctx.registry().codec_for(concrete)?;
        let mut tree = DocumentReader::new(doc);
        ctx.nominal = Some(concrete);
        let value = codec.decode_any(&mut tree, ctx)?;
        tree.finish()?;
        ctx.registry().upcast(concrete, base, value)
    }
}
