// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Codec traits and session entry points.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::CodecLimits;
use crate::context::{ReadContext, WriteContext};
use crate::error::CodecError;
use crate::ident::SharedId;
use crate::lookup::{BeanStateReaderLookup, BeanStateWriterLookup};

/// Encodes and decodes values of one type within a session.
pub trait Codec {
    /// Value handled by this codec.
    type Value;

    /// Writes `value`.
    fn encode(&self, ctx: &mut WriteContext<'_>, value: &Self::Value) -> Result<(), CodecError>;

    /// Reads a value written by [`encode`](Self::encode).
    fn decode(&self, ctx: &mut ReadContext<'_>) -> Result<Self::Value, CodecError>;
}

/// Codec for a shareable graph node.
///
/// Implementors supply only the payload steps. Every `NodeCodec` is a
/// [`Codec`] for `Arc<Node>` through a blanket impl that wraps those steps in
/// the shared-identity protocol, so a node codec cannot skip identity
/// tracking: coherence forbids a second `Codec` impl for the same type.
pub trait NodeCodec {
    /// Node type; shared through `Arc`.
    type Node: Send + Sync + 'static;

    /// Writes the node's payload. Runs once per node per session.
    fn encode_payload(&self, ctx: &mut WriteContext<'_>, node: &Self::Node) -> Result<(), CodecError>;

    /// Reads a payload and materializes the node announced as `id`.
    ///
    /// If the payload can reach the node itself, bind it early with
    /// [`ReadContext::register_shared`] before recursing.
    fn decode_payload(
        &self,
        ctx: &mut ReadContext<'_>,
        id: SharedId,
    ) -> Result<Arc<Self::Node>, CodecError>;
}

impl<C: NodeCodec> Codec for C {
    type Value = Arc<C::Node>;

    fn encode(&self, ctx: &mut WriteContext<'_>, value: &Self::Value) -> Result<(), CodecError> {
        ctx.encode_preserving_shared_identity_of(value, |ctx| self.encode_payload(ctx, value))
    }

    fn decode(&self, ctx: &mut ReadContext<'_>) -> Result<Self::Value, CodecError> {
        ctx.decode_preserving_shared_identity(|ctx, id| self.decode_payload(ctx, id))
    }
}

/// Encodes `value` in a fresh write session.
#[instrument(level = "debug", skip_all)]
pub fn encode_to_vec<C: Codec>(
    codec: &C,
    value: &C::Value,
    writers: &BeanStateWriterLookup,
    limits: CodecLimits,
) -> Result<Vec<u8>, CodecError> {
    let mut ctx = WriteContext::with_limits(writers, limits);
    codec.encode(&mut ctx, value)?;
    let shared = ctx.shared_count();
    let bytes = ctx.finish()?;
    debug!(shared_objects = shared, bytes = bytes.len(), "graph encoded");
    Ok(bytes)
}

/// Decodes one value from `bytes` in a fresh read session.
///
/// Fails with [`CodecError::TrailingBytes`] if `bytes` holds more than one value.
#[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
pub fn decode_from_bytes<C: Codec>(
    codec: &C,
    bytes: &[u8],
    readers: &BeanStateReaderLookup,
    limits: CodecLimits,
) -> Result<C::Value, CodecError> {
    let mut ctx = ReadContext::with_limits(bytes, readers, limits);
    let value = codec.decode(&mut ctx)?;
    let shared = ctx.shared_count();
    ctx.finish()?;
    debug!(shared_objects = shared, "graph decoded");
    Ok(value)
}
