// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Write and read sessions, and the shared-identity protocol.
//!
//! Wire layout of an identity-wrapped value:
//!
//! ```text
//! NEW_OBJECT(0x01) || id(LEB128) || payload    first sighting
//! REFERENCE(0x02)  || id(LEB128)               every later sighting
//! ```
//!
//! Ids are dense, start at `0` and follow first-encounter order. A reader
//! consumes them in the same order, so the protocol is not random-access.
//!
//! A session that hits an error through either wrapper is marked failed and
//! refuses further use; partial identity state is never resumable.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::config::CodecLimits;
use crate::error::{CodecError, ProtocolViolation};
use crate::ident::{SharedId, TypeKey};
use crate::identity::{ReadIdentities, WriteIdentities};
use crate::lookup::{BeanStateReaderLookup, BeanStateWriterLookup};
use crate::stream::{Reader, StreamError, Writer};

/// Marker preceding the first sighting of an object.
pub const NEW_OBJECT: u8 = 0x01;
/// Marker preceding a back-reference to an earlier sighting.
pub const REFERENCE: u8 = 0x02;

fn limit_exceeded(limit: &'static str, max: u32) -> CodecError {
    CodecError::LimitExceeded {
        limit,
        max: u64::from(max),
    }
}

/// `len` as a `u32`, if it fits within `max`.
fn bounded(len: usize, max: u32) -> Option<u32> {
    u32::try_from(len).ok().filter(|len| *len <= max)
}

/// One write session over an object graph.
pub struct WriteContext<'a> {
    writer: Writer,
    identities: WriteIdentities,
    beans: &'a BeanStateWriterLookup,
    limits: CodecLimits,
    depth: u32,
    failed: bool,
}

impl<'a> WriteContext<'a> {
    /// Starts a session with default limits.
    pub fn new(beans: &'a BeanStateWriterLookup) -> Self {
        Self::with_limits(beans, CodecLimits::default())
    }

    /// Starts a session with explicit limits.
    pub fn with_limits(beans: &'a BeanStateWriterLookup, limits: CodecLimits) -> Self {
        Self {
            writer: Writer::default(),
            identities: WriteIdentities::new(),
            beans,
            limits,
            depth: 0,
            failed: false,
        }
    }

    /// Bean writer registry shared by this session.
    pub fn beans(&self) -> &'a BeanStateWriterLookup {
        self.beans
    }

    /// Limits in force for this session.
    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    /// Distinct objects written so far.
    pub fn shared_count(&self) -> usize {
        self.identities.len()
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.writer.len()
    }

    /// Returns `true` once an error has aborted this session.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Writes `value` once per session and back-references afterwards.
    ///
    /// On first sighting `value` receives the next [`SharedId`], the
    /// new-object marker and id are written, then `encode` writes the payload.
    /// Later sightings write a reference marker and the same id; `encode` is
    /// not invoked. Id assignment is not rolled back if `encode` fails.
    pub fn encode_preserving_shared_identity_of<T, F>(
        &mut self,
        value: &Arc<T>,
        encode: F,
    ) -> Result<(), CodecError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&mut Self) -> Result<(), CodecError>,
    {
        self.ensure_live()?;
        if let Some(id) = self.identities.get_id(value) {
            trace!(id = id.0, "write shared reference");
            self.writer.write_u8(REFERENCE);
            self.writer.write_small_u32(id.0);
            return Ok(());
        }
        let result = self.encode_first_sighting(value, encode);
        self.track(result)
    }

    fn encode_first_sighting<T, F>(&mut self, value: &Arc<T>, encode: F) -> Result<(), CodecError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&mut Self) -> Result<(), CodecError>,
    {
        if bounded(self.identities.len() + 1, self.limits.max_shared_objects).is_none() {
            return Err(limit_exceeded(
                "max_shared_objects",
                self.limits.max_shared_objects,
            ));
        }
        if self.depth >= self.limits.max_depth {
            return Err(limit_exceeded("max_depth", self.limits.max_depth));
        }
        let id = self.identities.put_instance(value);
        self.writer.write_u8(NEW_OBJECT);
        self.writer.write_small_u32(id.0);
        self.depth += 1;
        let result = encode(self);
        self.depth -= 1;
        result
    }

    fn ensure_live(&self) -> Result<(), CodecError> {
        if self.failed {
            return Err(CodecError::SessionAborted);
        }
        Ok(())
    }

    fn track<R>(&mut self, result: Result<R, CodecError>) -> Result<R, CodecError> {
        if let Err(err) = &result {
            if !self.failed {
                warn!(error = %err, shared = self.identities.len(), "write session aborted");
                self.failed = true;
            }
        }
        result
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.writer.write_u8(value);
    }

    /// Write a boolean.
    pub fn write_bool(&mut self, value: bool) {
        self.writer.write_bool(value);
    }

    /// Write a LEB128 small int.
    pub fn write_small_u32(&mut self, value: u32) {
        self.writer.write_small_u32(value);
    }

    /// Write a little-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.writer.write_i64_le(value);
    }

    /// Write a string bounded by `max_string_len`.
    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        self.writer
            .write_string(value, self.limits.max_string_len as usize)?;
        Ok(())
    }

    /// Write length-prefixed raw bytes bounded by `max_collection_len`.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bounded(bytes.len(), self.limits.max_collection_len).is_none() {
            return Err(StreamError::LengthTooLarge.into());
        }
        self.writer.write_len_prefixed_bytes(bytes)?;
        Ok(())
    }

    /// Write a bean type tag.
    pub fn write_type_key(&mut self, key: TypeKey) {
        self.writer.write_bytes(key.as_bytes());
    }

    /// Write a collection length bounded by `max_collection_len`.
    pub fn write_len(&mut self, len: usize) -> Result<(), CodecError> {
        let max = self.limits.max_collection_len;
        let len =
            bounded(len, max).ok_or_else(|| limit_exceeded("max_collection_len", max))?;
        self.writer.write_small_u32(len);
        Ok(())
    }

    /// Write a length followed by every element.
    pub fn write_collection<I, F>(&mut self, items: I, mut write: F) -> Result<(), CodecError>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
        F: FnMut(&mut Self, I::Item) -> Result<(), CodecError>,
    {
        let items = items.into_iter();
        self.write_len(items.len())?;
        for item in items {
            write(self, item)?;
        }
        Ok(())
    }

    /// Ends the session and returns the encoded bytes.
    pub fn finish(self) -> Result<Vec<u8>, CodecError> {
        self.ensure_live()?;
        Ok(self.writer.into_vec())
    }
}

impl std::fmt::Debug for WriteContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteContext")
            .field("identities", &self.identities)
            .field("bytes", &self.writer.len())
            .field("depth", &self.depth)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// One read session over bytes produced by a [`WriteContext`].
pub struct ReadContext<'a> {
    reader: Reader<'a>,
    identities: ReadIdentities,
    beans: &'a BeanStateReaderLookup,
    limits: CodecLimits,
    depth: u32,
    failed: bool,
}

impl<'a> ReadContext<'a> {
    /// Starts a session over `bytes` with default limits.
    pub fn new(bytes: &'a [u8], beans: &'a BeanStateReaderLookup) -> Self {
        Self::with_limits(bytes, beans, CodecLimits::default())
    }

    /// Starts a session over `bytes` with explicit limits.
    pub fn with_limits(
        bytes: &'a [u8],
        beans: &'a BeanStateReaderLookup,
        limits: CodecLimits,
    ) -> Self {
        Self {
            reader: Reader::new(bytes),
            identities: ReadIdentities::new(),
            beans,
            limits,
            depth: 0,
            failed: false,
        }
    }

    /// Bean reader registry shared by this session.
    pub fn beans(&self) -> &'a BeanStateReaderLookup {
        self.beans
    }

    /// Limits in force for this session.
    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    /// Distinct objects announced so far.
    pub fn shared_count(&self) -> usize {
        self.identities.len()
    }

    /// Returns `true` once an error has aborted this session.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Reads a value written by
    /// [`WriteContext::encode_preserving_shared_identity_of`].
    ///
    /// A new-object entry runs `decode` with the announced id and binds the
    /// result to it; a reference returns the object bound earlier without
    /// running `decode`. `decode` may call [`register_shared`] before it
    /// recurses, which is required when the payload can refer back to the
    /// object being decoded.
    ///
    /// [`register_shared`]: ReadContext::register_shared
    pub fn decode_preserving_shared_identity<T, F>(&mut self, decode: F) -> Result<Arc<T>, CodecError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&mut Self, SharedId) -> Result<Arc<T>, CodecError>,
    {
        self.ensure_live()?;
        let result = self.decode_entry(decode);
        self.track(result)
    }

    fn decode_entry<T, F>(&mut self, decode: F) -> Result<Arc<T>, CodecError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&mut Self, SharedId) -> Result<Arc<T>, CodecError>,
    {
        match self.reader.read_u8()? {
            NEW_OBJECT => {
                let id = SharedId(self.reader.read_small_u32()?);
                if bounded(self.identities.len() + 1, self.limits.max_shared_objects).is_none() {
                    return Err(limit_exceeded(
                        "max_shared_objects",
                        self.limits.max_shared_objects,
                    ));
                }
                if self.depth >= self.limits.max_depth {
                    return Err(limit_exceeded("max_depth", self.limits.max_depth));
                }
                self.identities.announce(id)?;
                self.depth += 1;
                let decoded = decode(self, id);
                self.depth -= 1;
                let value = decoded?;
                self.identities.bind(id, &value)?;
                Ok(value)
            }
            REFERENCE => {
                let id = SharedId(self.reader.read_small_u32()?);
                trace!(id = id.0, "read shared reference");
                Ok(self.identities.get::<T>(id)?)
            }
            other => Err(ProtocolViolation::InvalidMarker(other).into()),
        }
    }

    /// Binds `value` to `id` before its payload is fully decoded.
    ///
    /// Later references to `id` (including ones reached while `value` is still
    /// being populated) resolve to `value`.
    pub fn register_shared<T>(&mut self, id: SharedId, value: &Arc<T>) -> Result<(), CodecError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let result = self.identities.bind(id, value).map_err(CodecError::from);
        self.track(result)
    }

    fn ensure_live(&self) -> Result<(), CodecError> {
        if self.failed {
            return Err(CodecError::SessionAborted);
        }
        Ok(())
    }

    fn track<R>(&mut self, result: Result<R, CodecError>) -> Result<R, CodecError> {
        if let Err(err) = &result {
            if !self.failed {
                warn!(
                    error = %err,
                    offset = self.reader.offset(),
                    "read session aborted"
                );
                self.failed = true;
            }
        }
        result
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.reader.read_u8()?)
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.reader.read_bool()?)
    }

    /// Read a LEB128 small int.
    pub fn read_small_u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.reader.read_small_u32()?)
    }

    /// Read a little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(self.reader.read_i64_le()?)
    }

    /// Read a string bounded by `max_string_len`.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        Ok(self
            .reader
            .read_string(self.limits.max_string_len as usize)?)
    }

    /// Read length-prefixed raw bytes bounded by `max_collection_len`.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let bytes = self
            .reader
            .read_len_prefixed_bytes(self.limits.max_collection_len as usize)?;
        Ok(bytes.to_vec())
    }

    /// Read a bean type tag.
    pub fn read_type_key(&mut self) -> Result<TypeKey, CodecError> {
        let bytes = self.reader.read_exact(32)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(TypeKey(key))
    }

    /// Read a collection length bounded by `max_collection_len`.
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        let len = self.reader.read_small_u32()?;
        if len > self.limits.max_collection_len {
            return Err(limit_exceeded(
                "max_collection_len",
                self.limits.max_collection_len,
            ));
        }
        Ok(len as usize)
    }

    /// Read a length followed by that many elements.
    pub fn read_collection<T, F>(&mut self, mut read: F) -> Result<Vec<T>, CodecError>
    where
        F: FnMut(&mut Self) -> Result<T, CodecError>,
    {
        let len = self.read_len()?;
        // `len` is untrusted; grow past the first 1024 elements on demand.
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(read(self)?);
        }
        Ok(out)
    }

    /// Ends the session, requiring every input byte to have been consumed.
    pub fn finish(self) -> Result<(), CodecError> {
        self.ensure_live()?;
        if !self.reader.is_exhausted() {
            return Err(CodecError::TrailingBytes(self.reader.remaining()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReadContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext")
            .field("identities", &self.identities)
            .field("offset", &self.reader.offset())
            .field("depth", &self.depth)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}
