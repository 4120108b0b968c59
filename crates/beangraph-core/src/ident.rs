// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Type descriptors and shared-object ids.
use blake3::Hasher;

/// Canonical 256-bit hash used for type keys.
pub type Hash = [u8; 32];

/// Stable descriptor of a bean's runtime type.
///
/// `TypeKey` values are produced by [`make_type_key`], which hashes the type's
/// registered name. The same key is used to cache per-type strategies and as
/// the type tag written in front of every bean payload.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TypeKey(pub Hash);

impl TypeKey {
    /// Returns the canonical byte representation of this key.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Short lowercase-hex prefix for log lines.
    #[must_use]
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Produces a stable type key: `blake3("bean-type:" || name)`.
#[must_use]
pub fn make_type_key(name: &str) -> TypeKey {
    let mut hasher = Hasher::new();
    hasher.update(b"bean-type:");
    hasher.update(name.as_bytes());
    TypeKey(hasher.finalize().into())
}

/// Descriptor pairing a human-readable type name with its [`TypeKey`].
///
/// Equality and hashing only consider the key.
#[derive(Clone, Copy, Debug)]
pub struct BeanType {
    name: &'static str,
    key: TypeKey,
}

impl BeanType {
    /// Descriptor for the type registered under `name`.
    #[must_use]
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            key: make_type_key(name),
        }
    }

    /// Registered type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stable key derived from the name.
    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.key
    }
}

impl PartialEq for BeanType {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for BeanType {}

impl std::hash::Hash for BeanType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Id assigned to an object the first time a write session sees it.
///
/// Ids form a dense sequence starting at `0`, in first-encounter order.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SharedId(pub u32);

impl SharedId {
    /// Returns the id as a table index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SharedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
