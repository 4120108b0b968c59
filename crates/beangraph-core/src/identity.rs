// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session-scoped identity tables.
//!
//! The write side maps an object (by allocation address) to the [`SharedId`]
//! it received on first sighting. The read side maps ids back to the
//! materialized objects, in the same dense order.
//!
//! # Identity Invariants
//!
//! - Identity is pointer identity of the `Arc` allocation, never `Eq`.
//! - Every registered `Arc` is retained until the table is dropped, so an
//!   address observed in a session cannot be recycled for another object
//!   while that session is alive.
//! - Ids are assigned `0, 1, 2, ...` and never reused within a session.

use std::any::{type_name, Any};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::ProtocolViolation;
use crate::ident::SharedId;

type Retained = Box<dyn Any + Send + Sync>;

/// Allocation address of the value behind an `Arc`, ignoring pointer metadata.
pub(crate) fn identity_of<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value).cast::<()>().addr()
}

/// Write-side identity table.
#[derive(Default)]
pub struct WriteIdentities {
    ids: FxHashMap<usize, SharedId>,
    retained: Vec<Retained>,
}

impl WriteIdentities {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id previously assigned to `value`, if any.
    pub fn get_id<T: ?Sized>(&self, value: &Arc<T>) -> Option<SharedId> {
        self.ids.get(&identity_of(value)).copied()
    }

    /// Assigns the next id to `value` and retains it for the session.
    ///
    /// Callers check [`get_id`](Self::get_id) first; registering the same
    /// allocation twice returns the original id.
    pub fn put_instance<T>(&mut self, value: &Arc<T>) -> SharedId
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = identity_of(value);
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let id = SharedId(self.next_raw());
        self.ids.insert(key, id);
        self.retained.push(Box::new(Arc::clone(value)));
        id
    }

    /// Number of distinct objects registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    /// Returns `true` if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    fn next_raw(&self) -> u32 {
        // Contexts cap the table well below u32::MAX via `CodecLimits`.
        u32::try_from(self.retained.len()).unwrap_or(u32::MAX)
    }
}

impl std::fmt::Debug for WriteIdentities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteIdentities")
            .field("len", &self.len())
            .finish()
    }
}

enum Slot {
    /// Announced by a new-object marker; decode in progress.
    Pending,
    /// Materialized object (an `Arc<T>` behind `dyn Any`).
    Bound(Retained),
}

/// Read-side identity table.
#[derive(Default)]
pub struct ReadIdentities {
    slots: Vec<Slot>,
}

impl ReadIdentities {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next new-object entry must carry.
    #[must_use]
    pub fn next_id(&self) -> SharedId {
        SharedId(u32::try_from(self.slots.len()).unwrap_or(u32::MAX))
    }

    /// Records that decode of `id` has started.
    pub fn announce(&mut self, id: SharedId) -> Result<(), ProtocolViolation> {
        let expected = self.next_id();
        if id != expected {
            return Err(ProtocolViolation::UnexpectedId {
                expected,
                found: id,
            });
        }
        self.slots.push(Slot::Pending);
        Ok(())
    }

    /// Binds `value` to an announced id.
    ///
    /// Binding the same allocation twice is a no-op, which lets a decode step
    /// bind early (before recursing) and the wrapper bind again afterwards.
    pub fn bind<T>(&mut self, id: SharedId, value: &Arc<T>) -> Result<(), ProtocolViolation>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or(ProtocolViolation::UnknownReference { id })?;
        match slot {
            Slot::Pending => {
                *slot = Slot::Bound(Box::new(Arc::clone(value)));
                Ok(())
            }
            Slot::Bound(existing) => match existing.downcast_ref::<Arc<T>>() {
                Some(bound) if identity_of(bound) == identity_of(value) => Ok(()),
                _ => Err(ProtocolViolation::Rebound { id }),
            },
        }
    }

    /// Object bound to `id`.
    pub fn get<T>(&self, id: SharedId) -> Result<Arc<T>, ProtocolViolation>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.slots.get(id.index()) {
            None => Err(ProtocolViolation::UnknownReference { id }),
            Some(Slot::Pending) => Err(ProtocolViolation::UnboundReference { id }),
            Some(Slot::Bound(existing)) => existing
                .downcast_ref::<Arc<T>>()
                .map(Arc::clone)
                .ok_or_else(|| ProtocolViolation::SharedTypeMismatch {
                    id,
                    expected: type_name::<T>(),
                }),
        }
    }

    /// Number of ids announced so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no id has been announced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for ReadIdentities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = self
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Bound(_)))
            .count();
        f.debug_struct("ReadIdentities")
            .field("len", &self.len())
            .field("bound", &bound)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn write_ids_are_dense_and_stable() {
        let a = Arc::new(String::from("a"));
        let b = Arc::new(String::from("a"));
        let mut ids = WriteIdentities::new();
        assert_eq!(ids.put_instance(&a), SharedId(0));
        assert_eq!(ids.put_instance(&b), SharedId(1), "equal but distinct objects get distinct ids");
        assert_eq!(ids.put_instance(&Arc::clone(&a)), SharedId(0));
        assert_eq!(ids.get_id(&b), Some(SharedId(1)));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn write_identity_ignores_trait_object_metadata() {
        let concrete = Arc::new(5u64);
        let erased: Arc<dyn Any + Send + Sync> = concrete.clone();
        let mut ids = WriteIdentities::new();
        let id = ids.put_instance(&concrete);
        assert_eq!(ids.get_id(&erased), Some(id));
    }

    #[test]
    fn retained_objects_outlive_caller_handles() {
        let mut ids = WriteIdentities::new();
        let first = Arc::new(1u32);
        ids.put_instance(&first);
        let weak = Arc::downgrade(&first);
        drop(first);
        assert!(weak.upgrade().is_some());
        drop(ids);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn read_announce_enforces_dense_order() {
        let mut ids = ReadIdentities::new();
        ids.announce(SharedId(0)).unwrap();
        let err = ids.announce(SharedId(2)).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::UnexpectedId {
                expected: SharedId(1),
                found: SharedId(2)
            }
        );
    }

    #[test]
    fn read_get_distinguishes_unknown_unbound_and_mismatched() {
        let mut ids = ReadIdentities::new();
        assert_eq!(
            ids.get::<u32>(SharedId(0)).unwrap_err(),
            ProtocolViolation::UnknownReference { id: SharedId(0) }
        );
        ids.announce(SharedId(0)).unwrap();
        assert_eq!(
            ids.get::<u32>(SharedId(0)).unwrap_err(),
            ProtocolViolation::UnboundReference { id: SharedId(0) }
        );
        let value = Arc::new(9u32);
        ids.bind(SharedId(0), &value).unwrap();
        assert!(Arc::ptr_eq(&ids.get::<u32>(SharedId(0)).unwrap(), &value));
        assert!(matches!(
            ids.get::<String>(SharedId(0)),
            Err(ProtocolViolation::SharedTypeMismatch { .. })
        ));
    }

    #[test]
    fn rebinding_is_idempotent_only_for_the_same_object() {
        let mut ids = ReadIdentities::new();
        ids.announce(SharedId(0)).unwrap();
        let value = Arc::new(1u8);
        ids.bind(SharedId(0), &value).unwrap();
        ids.bind(SharedId(0), &Arc::clone(&value)).unwrap();
        assert_eq!(
            ids.bind(SharedId(0), &Arc::new(1u8)).unwrap_err(),
            ProtocolViolation::Rebound { id: SharedId(0) }
        );
    }
}
