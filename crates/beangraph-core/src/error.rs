// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for encode/decode sessions and strategy construction.

use thiserror::Error;

use crate::ident::{SharedId, TypeKey};
use crate::stream::StreamError;

/// Writer/reader desynchronization or a corrupted stream.
///
/// Protocol violations are fatal for the session that raised them: the
/// stream cannot be resynchronized, so the session is aborted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Marker byte was neither new-object nor reference.
    #[error("[SHARED_MARKER_INVALID] invalid identity marker {0:#04x}")]
    InvalidMarker(u8),
    /// A new-object entry did not carry the next dense id.
    #[error("[SHARED_ID_OUT_OF_ORDER] expected new object {expected}, found {found}")]
    UnexpectedId {
        /// Next id the session would have assigned.
        expected: SharedId,
        /// Id found in the stream.
        found: SharedId,
    },
    /// Back-reference to an id that was never announced as a new object.
    #[error("[SHARED_ID_UNKNOWN] reference to unregistered shared id {id}")]
    UnknownReference {
        /// Offending id.
        id: SharedId,
    },
    /// Back-reference to an object whose decode has started but not bound it yet.
    #[error("[SHARED_ID_UNBOUND] reference to shared id {id} before its object was bound")]
    UnboundReference {
        /// Offending id.
        id: SharedId,
    },
    /// Back-reference resolved to an object of a different static type.
    #[error("[SHARED_TYPE_MISMATCH] shared id {id} is not a {expected}")]
    SharedTypeMismatch {
        /// Offending id.
        id: SharedId,
        /// Type the caller asked for.
        expected: &'static str,
    },
    /// An id was bound twice to different objects.
    #[error("[SHARED_ID_REBOUND] shared id {id} bound to a second object")]
    Rebound {
        /// Offending id.
        id: SharedId,
    },
    /// Bean type tag in the stream names no type known to the reader.
    #[error("[BEAN_TYPE_UNKNOWN] stream names unregistered bean type {key}")]
    UnknownBeanType {
        /// Tag read from the stream.
        key: TypeKey,
    },
    /// Bean payload carried a different property count than the local schema.
    #[error("[BEAN_PROPERTY_COUNT] {bean}: expected {expected} properties, found {found}")]
    PropertyCountMismatch {
        /// Bean type name.
        bean: &'static str,
        /// Local property count.
        expected: u32,
        /// Count found in the stream.
        found: u32,
    },
    /// A bean property was populated twice.
    #[error("[BEAN_PROPERTY_REPOPULATED] {bean}.{property} populated twice")]
    PropertyAlreadySet {
        /// Bean type name.
        bean: &'static str,
        /// Property name.
        property: &'static str,
    },
    /// An enum tag had no matching variant.
    #[error("[TAG_INVALID] invalid {what} tag {tag}")]
    InvalidTag {
        /// Kind of value being decoded.
        what: &'static str,
        /// Offending tag.
        tag: u8,
    },
}

/// Failure to build a per-type strategy.
///
/// Construction failures are never cached: a later lookup for the same type
/// attempts construction again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntrospectionError {
    /// No bean type is registered under the key.
    #[error("no bean type registered for key {0}")]
    UnknownType(TypeKey),
    /// The type's properties could not be described.
    #[error("cannot introspect {type_name}: {reason}")]
    Unsupported {
        /// Bean type name.
        type_name: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

/// Errors raised by write and read sessions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Low-level stream failure (truncation, bounds, utf-8).
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// Fatal writer/reader desynchronization.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    /// Strategy construction failed.
    #[error(transparent)]
    Introspection(#[from] IntrospectionError),
    /// A configured session limit was exceeded.
    #[error("[LIMIT_EXCEEDED] {limit} exceeded (max {max})")]
    LimitExceeded {
        /// Limit name as it appears in `CodecLimits`.
        limit: &'static str,
        /// Configured maximum.
        max: u64,
    },
    /// A bean strategy was handed an instance of another type.
    #[error("bean strategy for {expected} received another type")]
    BeanTypeMismatch {
        /// Type the strategy handles.
        expected: &'static str,
    },
    /// Payload-specific failure raised by an inner encode/decode step.
    #[error("payload error: {0}")]
    Payload(String),
    /// Decode finished with unread input.
    #[error("[TRAILING_BYTES] {0} unread bytes after decode")]
    TrailingBytes(usize),
    /// The session already failed; it must be discarded.
    #[error("session aborted by an earlier error")]
    SessionAborted,
}

impl CodecError {
    /// Returns `true` for writer/reader desynchronization.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` when a fresh session may succeed where this one failed.
    ///
    /// Only strategy construction failures qualify; everything else reflects
    /// the stream or the graph itself. An unknown type tag read from a stream
    /// is a [`ProtocolViolation::UnknownBeanType`], not a construction failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Introspection(_))
    }
}
