// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! beangraph-core: binary serialization of object graphs with shared identity.
//!
//! A write session assigns each distinct shared object a dense [`SharedId`]
//! the first time it is encoded and emits a back-reference on every later
//! encounter. The matching read session rebuilds the graph so that objects
//! shared on the writer side are shared (same `Arc` allocation) on the reader
//! side, cycles included.
//!
//! Wire layout of one shared-identity site:
//!
//! ```text
//! NEW_OBJECT (0x01) | id: LEB128 u32 | payload...
//! REFERENCE  (0x02) | id: LEB128 u32
//! ```
//!
//! Ids start at `0` in every session and grow by one per new object. Any
//! disagreement between the two sides (an unknown id, an id out of order, an
//! unexpected marker) surfaces as a [`ProtocolViolation`] and poisons the
//! session.
//!
//! Beans (record types described by a [`BeanSchema`]) are written through a
//! per-type [`BeanStateWriter`] that the [`BeanStateWriterLookup`] builds at
//! most once per type, even under concurrent first use.
#![forbid(unsafe_code)]

/// Bean schemas and the property-walking writers/readers built from them.
pub mod bean;
/// [`Codec`]/[`NodeCodec`] traits and one-shot session helpers.
pub mod codec;
/// Codec limits and the config-store seam.
pub mod config;
/// Write/read sessions.
pub mod context;
/// Error types.
pub mod error;
mod ident;
/// Per-session identity tables.
pub mod identity;
/// Type-keyed caches of bean state writers/readers.
pub mod lookup;
/// Low-level byte stream.
pub mod stream;
/// Transform-step graph nodes and their codecs.
pub mod transform;

pub use bean::{Bean, BeanSchema, Property, populate};
pub use codec::{Codec, NodeCodec, decode_from_bytes, encode_to_vec};
pub use config::{CodecLimits, ConfigError, ConfigService, ConfigStore};
pub use context::{NEW_OBJECT, REFERENCE, ReadContext, WriteContext};
pub use error::{CodecError, IntrospectionError, ProtocolViolation};
pub use ident::{BeanType, Hash, SharedId, TypeKey, make_type_key};
pub use lookup::{
    BeanCatalog, BeanIntrospector, BeanStateReaderLookup, BeanStateWriterLookup, CatalogError,
};
pub use stream::StreamError;
