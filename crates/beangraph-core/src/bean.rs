// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Beans: graph objects encoded through per-type property strategies.
//!
//! A bean type describes its serializable properties once
//! ([`BeanSchema::properties`]); the lookups in [`crate::lookup`] turn that
//! description into a cached [`BeanStateWriter`] / [`BeanStateReader`].
//!
//! Bean wire layout (inside the shared-identity envelope):
//!
//! ```text
//! TypeKey(32) || property_count(LEB128) || property payloads...
//! ```
//!
//! Decoding is two-phase: the reader allocates an empty bean, binds it to its
//! shared id, then populates the properties. A property may therefore refer
//! back to the bean that contains it. Properties are populated through `&B`,
//! so bean fields use interior mutability (typically [`OnceLock`]).

use std::any::Any;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use crate::context::{ReadContext, WriteContext};
use crate::error::{CodecError, IntrospectionError, ProtocolViolation};
use crate::ident::BeanType;

/// Writes one property of `B`.
pub type WriteProperty<B> = fn(&B, &mut WriteContext<'_>) -> Result<(), CodecError>;
/// Reads one property of `B` into an already-allocated bean.
pub type ReadProperty<B> = fn(&B, &mut ReadContext<'_>) -> Result<(), CodecError>;

/// A named, serializable property of bean type `B`.
pub struct Property<B> {
    name: &'static str,
    write: WriteProperty<B>,
    read: ReadProperty<B>,
}

impl<B> Property<B> {
    /// Describes a property by its write and read steps.
    pub const fn new(name: &'static str, write: WriteProperty<B>, read: ReadProperty<B>) -> Self {
        Self { name, write, read }
    }

    /// Property name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<B> std::fmt::Debug for Property<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property").field("name", &self.name).finish()
    }
}

/// Static description of a bean type.
pub trait BeanSchema: Sized + Send + Sync + 'static {
    /// Registered type name; hashed into the type's [`TypeKey`](crate::TypeKey).
    const TYPE_NAME: &'static str;

    /// Allocates a bean whose properties are not yet populated.
    fn new_empty() -> Self;

    /// Discovers the serializable properties, in wire order.
    ///
    /// Called at most once per lookup for each type.
    fn properties() -> Result<Vec<Property<Self>>, IntrospectionError>;
}

/// Object-safe view of any bean.
pub trait Bean: Any + Send + Sync {
    /// Runtime type descriptor.
    fn bean_type(&self) -> BeanType;
    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
    /// Owned upcast for downcasting an `Arc<dyn Bean>`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<B: BeanSchema> Bean for B {
    fn bean_type(&self) -> BeanType {
        BeanType::named(B::TYPE_NAME)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Populates a write-once bean field, rejecting a second population.
pub fn populate<T>(
    cell: &OnceLock<T>,
    value: T,
    bean: &'static str,
    property: &'static str,
) -> Result<(), CodecError> {
    cell.set(value)
        .map_err(|_| ProtocolViolation::PropertyAlreadySet { bean, property }.into())
}

/// Per-type strategy that writes a bean's state.
pub trait BeanStateWriter: Send + Sync {
    /// Type this strategy handles.
    fn bean_type(&self) -> BeanType;
    /// Writes every property of `bean`.
    fn write_state_of(&self, ctx: &mut WriteContext<'_>, bean: &dyn Bean) -> Result<(), CodecError>;
}

/// Per-type strategy that allocates and populates beans.
pub trait BeanStateReader: Send + Sync {
    /// Type this strategy handles.
    fn bean_type(&self) -> BeanType;
    /// Allocates an unpopulated bean.
    fn new_bean(&self) -> Arc<dyn Bean>;
    /// Reads every property into `bean`.
    fn read_state_of(&self, ctx: &mut ReadContext<'_>, bean: &dyn Bean) -> Result<(), CodecError>;
}

fn property_count<B>(properties: &[Property<B>]) -> u32 {
    u32::try_from(properties.len()).unwrap_or(u32::MAX)
}

/// [`BeanStateWriter`] driven by `B`'s introspected properties.
pub struct BeanPropertyWriter<B> {
    bean_type: BeanType,
    properties: Vec<Property<B>>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: BeanSchema> BeanPropertyWriter<B> {
    /// Introspects `B`.
    pub fn introspect() -> Result<Self, IntrospectionError> {
        Ok(Self {
            bean_type: BeanType::named(B::TYPE_NAME),
            properties: B::properties()?,
            _marker: PhantomData,
        })
    }

    /// Property names in wire order.
    pub fn property_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().map(Property::name)
    }
}

impl<B: BeanSchema> BeanStateWriter for BeanPropertyWriter<B> {
    fn bean_type(&self) -> BeanType {
        self.bean_type
    }

    fn write_state_of(&self, ctx: &mut WriteContext<'_>, bean: &dyn Bean) -> Result<(), CodecError> {
        let bean = bean
            .as_any()
            .downcast_ref::<B>()
            .ok_or(CodecError::BeanTypeMismatch {
                expected: B::TYPE_NAME,
            })?;
        ctx.write_small_u32(property_count(&self.properties));
        for property in &self.properties {
            (property.write)(bean, ctx)?;
        }
        Ok(())
    }
}

/// [`BeanStateReader`] driven by `B`'s introspected properties.
pub struct BeanPropertyReader<B> {
    bean_type: BeanType,
    properties: Vec<Property<B>>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: BeanSchema> BeanPropertyReader<B> {
    /// Introspects `B`.
    pub fn introspect() -> Result<Self, IntrospectionError> {
        Ok(Self {
            bean_type: BeanType::named(B::TYPE_NAME),
            properties: B::properties()?,
            _marker: PhantomData,
        })
    }
}

impl<B: BeanSchema> BeanStateReader for BeanPropertyReader<B> {
    fn bean_type(&self) -> BeanType {
        self.bean_type
    }

    fn new_bean(&self) -> Arc<dyn Bean> {
        Arc::new(B::new_empty())
    }

    fn read_state_of(&self, ctx: &mut ReadContext<'_>, bean: &dyn Bean) -> Result<(), CodecError> {
        let bean = bean
            .as_any()
            .downcast_ref::<B>()
            .ok_or(CodecError::BeanTypeMismatch {
                expected: B::TYPE_NAME,
            })?;
        let expected = property_count(&self.properties);
        let found = ctx.read_small_u32()?;
        if found != expected {
            return Err(ProtocolViolation::PropertyCountMismatch {
                bean: B::TYPE_NAME,
                expected,
                found,
            }
            .into());
        }
        for property in &self.properties {
            (property.read)(bean, ctx)?;
        }
        Ok(())
    }
}

impl WriteContext<'_> {
    /// Writes a bean through the shared-identity protocol.
    ///
    /// The writer strategy for the bean's type comes from the session's
    /// [`BeanStateWriterLookup`](crate::BeanStateWriterLookup).
    pub fn write_bean(&mut self, bean: &Arc<dyn Bean>) -> Result<(), CodecError> {
        self.encode_preserving_shared_identity_of(bean, |ctx| {
            let bean_type = bean.bean_type();
            let writer = ctx.beans().writer_for(&bean_type)?;
            ctx.write_type_key(bean_type.key());
            writer.write_state_of(ctx, &**bean)
        })
    }

    /// Typed convenience for [`write_bean`](Self::write_bean).
    pub fn write_bean_of<B: BeanSchema>(&mut self, bean: &Arc<B>) -> Result<(), CodecError> {
        let erased: Arc<dyn Bean> = Arc::clone(bean) as Arc<dyn Bean>;
        self.write_bean(&erased)
    }
}

impl ReadContext<'_> {
    /// Reads a bean written by [`WriteContext::write_bean`].
    pub fn read_bean(&mut self) -> Result<Arc<dyn Bean>, CodecError> {
        self.decode_preserving_shared_identity(|ctx, id| {
            let key = ctx.read_type_key()?;
            let reader = ctx.beans().reader_for(&key).map_err(|err| match err {
                IntrospectionError::UnknownType(key) => {
                    CodecError::from(ProtocolViolation::UnknownBeanType { key })
                }
                other => CodecError::from(other),
            })?;
            let bean = reader.new_bean();
            ctx.register_shared(id, &bean)?;
            reader.read_state_of(ctx, &*bean)?;
            Ok(bean)
        })
    }

    /// Reads a bean and downcasts it to `B`.
    pub fn read_bean_of<B: BeanSchema>(&mut self) -> Result<Arc<B>, CodecError> {
        let bean = self.read_bean()?;
        bean.into_any()
            .downcast::<B>()
            .map_err(|_| CodecError::BeanTypeMismatch {
                expected: B::TYPE_NAME,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lookup::BeanCatalog;

    #[derive(Default)]
    struct Label {
        text: OnceLock<String>,
    }

    impl BeanSchema for Label {
        const TYPE_NAME: &'static str = "test.Label";

        fn new_empty() -> Self {
            Self::default()
        }

        fn properties() -> Result<Vec<Property<Self>>, IntrospectionError> {
            Ok(vec![Property::<Self>::new(
                "text",
                |bean, ctx| ctx.write_string(bean.text.get().map_or("", String::as_str)),
                |bean, ctx| {
                    let text = ctx.read_string()?;
                    populate(&bean.text, text, Label::TYPE_NAME, "text")
                },
            )])
        }
    }

    fn label(text: &str) -> Arc<Label> {
        let bean = Label::default();
        bean.text.set(text.to_string()).unwrap();
        Arc::new(bean)
    }

    #[test]
    fn typed_bean_round_trip() {
        let (writers, readers) = BeanCatalog::new().with::<Label>().unwrap().into_lookups();
        let original = label("hello");

        let mut w = WriteContext::new(&writers);
        w.write_bean_of(&original).unwrap();
        w.write_bean_of(&original).unwrap();
        let bytes = w.finish().unwrap();

        let mut r = ReadContext::new(&bytes, &readers);
        let first = r.read_bean_of::<Label>().unwrap();
        let second = r.read_bean_of::<Label>().unwrap();
        r.finish().unwrap();

        assert_eq!(first.text.get().unwrap(), "hello");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(writers.cached_len(), 1);
        assert_eq!(readers.cached_len(), 1);
    }

    #[test]
    fn populate_rejects_second_value() {
        let cell = OnceLock::new();
        populate(&cell, 1, "B", "p").unwrap();
        let err = populate(&cell, 2, "B", "p").unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn property_writer_lists_names_in_order() {
        let writer = BeanPropertyWriter::<Label>::introspect().unwrap();
        assert_eq!(writer.property_names().collect::<Vec<_>>(), vec!["text"]);
    }
}
