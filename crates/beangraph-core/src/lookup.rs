// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-type strategy registries.
//!
//! [`BeanStateWriterLookup`] and [`BeanStateReaderLookup`] cache one strategy
//! per bean type for the lifetime of the lookup. Both are built on
//! [`TypeLookup`], a concurrent compute-if-absent map.
//!
//! # Construction Invariants
//!
//! - At most one strategy is constructed per [`TypeKey`], even when many
//!   threads ask for the same type at once; the others wait and receive the
//!   winner's instance.
//! - Construction of different types proceeds in parallel. The map's write
//!   lock is held only to install an empty per-type cell, never while a
//!   strategy is being built.
//! - A failed construction caches nothing. The next lookup for that type
//!   constructs again, and an empty cell nobody is waiting on is dropped
//!   from the map, so unknown keys read from a stream do not accumulate.

use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::bean::{
    BeanPropertyReader, BeanPropertyWriter, BeanSchema, BeanStateReader, BeanStateWriter,
};
use crate::error::IntrospectionError;
use crate::ident::{BeanType, TypeKey};

/// Concurrent compute-if-absent map keyed by [`TypeKey`].
pub struct TypeLookup<V> {
    cells: RwLock<FxHashMap<TypeKey, Arc<OnceCell<V>>>>,
}

impl<V> Default for TypeLookup<V> {
    fn default() -> Self {
        Self {
            cells: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<V: Clone> TypeLookup<V> {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value cached for `key`, building it with `build` if absent.
    ///
    /// Concurrent callers for the same key block until the first `build`
    /// finishes. If it fails, its error is returned to that caller alone and
    /// the next waiter (or a later call) runs its own `build`.
    pub fn get_or_try_insert_with<E, F>(&self, key: TypeKey, build: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let cell = self.cell_for(key);
        match cell.get_or_try_init(build) {
            Ok(value) => Ok(value.clone()),
            Err(err) => {
                let failed = Arc::as_ptr(&cell);
                drop(cell);
                self.discard_empty(key, failed);
                Err(err)
            }
        }
    }

    /// Returns the cached value for `key` without building.
    pub fn get(&self, key: &TypeKey) -> Option<V> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys with a constructed value.
    pub fn len(&self) -> usize {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Returns `true` if no value has been constructed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, key: TypeKey) -> Arc<OnceCell<V>> {
        {
            let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cell) = cells.get(&key) {
                return Arc::clone(cell);
            }
        }
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cells.entry(key).or_default())
    }

    /// Removes the cell at `key` if it is still `failed`, empty and unshared.
    ///
    /// Clones of a cell are only handed out under the map lock, so a strong
    /// count of one under the write lock means no caller is waiting on it.
    fn discard_empty(&self, key: TypeKey, failed: *const OnceCell<V>) {
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        let idle = cells.get(&key).is_some_and(|cell| {
            std::ptr::eq(Arc::as_ptr(cell), failed)
                && Arc::strong_count(cell) == 1
                && cell.get().is_none()
        });
        if idle {
            cells.remove(&key);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.cells.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Builds per-type strategies on demand.
///
/// This is the seam where a type's serializable properties are discovered.
/// [`BeanCatalog`] is the in-crate implementation; hosts with their own type
/// metadata can supply another.
pub trait BeanIntrospector: Send + Sync {
    /// Builds the writer strategy for `bean_type`.
    fn writer_for(&self, bean_type: &BeanType) -> Result<Arc<dyn BeanStateWriter>, IntrospectionError>;

    /// Builds the reader strategy for the type tagged `key` on the wire.
    fn reader_for(&self, key: &TypeKey) -> Result<Arc<dyn BeanStateReader>, IntrospectionError>;
}

/// Cache of writer strategies, one per bean type.
pub struct BeanStateWriterLookup {
    introspector: Arc<dyn BeanIntrospector>,
    writers: TypeLookup<Arc<dyn BeanStateWriter>>,
}

impl BeanStateWriterLookup {
    /// Creates an empty cache backed by `introspector`.
    pub fn new(introspector: Arc<dyn BeanIntrospector>) -> Self {
        Self {
            introspector,
            writers: TypeLookup::new(),
        }
    }

    /// Cache over an empty catalog, for graphs without beans.
    pub fn empty() -> Self {
        Self::new(Arc::new(BeanCatalog::new()))
    }

    /// Writer strategy for `bean_type`, constructed on first request.
    pub fn writer_for(
        &self,
        bean_type: &BeanType,
    ) -> Result<Arc<dyn BeanStateWriter>, IntrospectionError> {
        self.writers.get_or_try_insert_with(bean_type.key(), || {
            let writer = self.introspector.writer_for(bean_type)?;
            debug!(
                bean = bean_type.name(),
                key = %bean_type.key().short_hex(),
                "built bean state writer"
            );
            Ok(writer)
        })
    }

    /// Number of writer strategies constructed so far.
    pub fn cached_len(&self) -> usize {
        self.writers.len()
    }
}

impl std::fmt::Debug for BeanStateWriterLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanStateWriterLookup")
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

/// Cache of reader strategies, one per bean type. Same contract as
/// [`BeanStateWriterLookup`], keyed by the type tag read from the stream.
pub struct BeanStateReaderLookup {
    introspector: Arc<dyn BeanIntrospector>,
    readers: TypeLookup<Arc<dyn BeanStateReader>>,
}

impl BeanStateReaderLookup {
    /// Creates an empty cache backed by `introspector`.
    pub fn new(introspector: Arc<dyn BeanIntrospector>) -> Self {
        Self {
            introspector,
            readers: TypeLookup::new(),
        }
    }

    /// Cache over an empty catalog, for graphs without beans.
    pub fn empty() -> Self {
        Self::new(Arc::new(BeanCatalog::new()))
    }

    /// Reader strategy for the type tagged `key`, constructed on first request.
    pub fn reader_for(&self, key: &TypeKey) -> Result<Arc<dyn BeanStateReader>, IntrospectionError> {
        self.readers.get_or_try_insert_with(*key, || {
            let reader = self.introspector.reader_for(key)?;
            debug!(
                bean = reader.bean_type().name(),
                key = %key.short_hex(),
                "built bean state reader"
            );
            Ok(reader)
        })
    }

    /// Number of reader strategies constructed so far.
    pub fn cached_len(&self) -> usize {
        self.readers.len()
    }
}

impl std::fmt::Debug for BeanStateReaderLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanStateReaderLookup")
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

type WriterFactory = fn() -> Result<Arc<dyn BeanStateWriter>, IntrospectionError>;
type ReaderFactory = fn() -> Result<Arc<dyn BeanStateReader>, IntrospectionError>;

struct CatalogEntry {
    bean_type: BeanType,
    writer: WriterFactory,
    reader: ReaderFactory,
}

fn build_writer<B: BeanSchema>() -> Result<Arc<dyn BeanStateWriter>, IntrospectionError> {
    Ok(Arc::new(BeanPropertyWriter::<B>::introspect()?))
}

fn build_reader<B: BeanSchema>() -> Result<Arc<dyn BeanStateReader>, IntrospectionError> {
    Ok(Arc::new(BeanPropertyReader::<B>::introspect()?))
}

/// Errors returned when registering bean types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Two bean types hash to the same key (same registered name).
    #[error("duplicate bean registration for {name} (key {key})")]
    DuplicateTypeKey {
        /// Name of the rejected type.
        name: &'static str,
        /// Key already taken.
        key: TypeKey,
    },
}

/// Registry of known bean types and how to introspect them.
///
/// Registration only records a factory; properties are discovered when a
/// lookup first asks for the type.
#[derive(Default)]
pub struct BeanCatalog {
    entries: FxHashMap<TypeKey, CatalogEntry>,
}

impl BeanCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers bean type `B`.
    pub fn register<B: BeanSchema>(&mut self) -> Result<(), CatalogError> {
        let bean_type = BeanType::named(B::TYPE_NAME);
        let key = bean_type.key();
        if self.entries.contains_key(&key) {
            return Err(CatalogError::DuplicateTypeKey {
                name: B::TYPE_NAME,
                key,
            });
        }
        self.entries.insert(
            key,
            CatalogEntry {
                bean_type,
                writer: build_writer::<B>,
                reader: build_reader::<B>,
            },
        );
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<B: BeanSchema>(mut self) -> Result<Self, CatalogError> {
        self.register::<B>()?;
        Ok(self)
    }

    /// Returns `true` if a type is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writer and reader lookups sharing this catalog.
    #[must_use]
    pub fn into_lookups(self) -> (BeanStateWriterLookup, BeanStateReaderLookup) {
        let shared: Arc<dyn BeanIntrospector> = Arc::new(self);
        (
            BeanStateWriterLookup::new(Arc::clone(&shared)),
            BeanStateReaderLookup::new(shared),
        )
    }

    fn entry(&self, key: &TypeKey) -> Result<&CatalogEntry, IntrospectionError> {
        self.entries
            .get(key)
            .ok_or(IntrospectionError::UnknownType(*key))
    }
}

impl BeanIntrospector for BeanCatalog {
    fn writer_for(&self, bean_type: &BeanType) -> Result<Arc<dyn BeanStateWriter>, IntrospectionError> {
        (self.entry(&bean_type.key())?.writer)()
    }

    fn reader_for(&self, key: &TypeKey) -> Result<Arc<dyn BeanStateReader>, IntrospectionError> {
        let entry = self.entry(key)?;
        debug_assert_eq!(entry.bean_type.key(), *key);
        (entry.reader)()
    }
}

impl std::fmt::Debug for BeanCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.entries.values().map(|e| e.bean_type.name()).collect();
        names.sort_unstable();
        f.debug_struct("BeanCatalog").field("types", &names).finish()
    }
}
