// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use beangraph_core::config::{ConfigError, ConfigStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory [`ConfigStore`] with call counters and failure injection.
///
/// Clones share state, so a test can hand one clone to a
/// [`ConfigService`](beangraph_core::ConfigService) and inspect the other.
///
/// # Example
///
/// ```
/// use beangraph_dry_tests::InMemoryConfigStore;
/// use beangraph_core::{CodecLimits, ConfigService};
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// CodecLimits::default().save(&service).unwrap();
/// assert!(store.contains_key(CodecLimits::CONFIG_KEY));
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `value` under `key`.
    pub fn with_entry(key: &str, value: &[u8]) -> Self {
        let store = Self::new();
        store.lock().data.insert(key.to_string(), value.to_vec());
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make subsequent loads fail with [`ConfigError::Other`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Make subsequent saves fail with [`ConfigError::Other`].
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` calls, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` calls, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Returns `true` if `key` holds a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use beangraph_core::{CodecLimits, ConfigService};

    #[test]
    fn missing_limits_fall_back_to_defaults() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        assert_eq!(
            CodecLimits::load_or_default(&service).unwrap(),
            CodecLimits::default()
        );
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn stored_limits_are_loaded() {
        let store = InMemoryConfigStore::with_entry(
            CodecLimits::CONFIG_KEY,
            br#"{ "max_collection_len": 4 }"#,
        );
        let limits = CodecLimits::load_or_default(&ConfigService::new(store)).unwrap();
        assert_eq!(limits.max_collection_len, 4);
    }

    #[test]
    fn load_failure_propagates() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_load(true);
        let err = CodecLimits::load_or_default(&ConfigService::new(store)).unwrap_err();
        assert!(matches!(err, ConfigError::Other(_)));
    }

    #[test]
    fn failed_save_is_counted_but_not_stored() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(store.save_raw("k", b"v").is_err());
        assert_eq!(store.save_count(), 1);
        assert!(!store.contains_key("k"));
    }

    #[test]
    fn malformed_json_is_a_serde_error() {
        let store = InMemoryConfigStore::with_entry(CodecLimits::CONFIG_KEY, b"{ nope");
        let err = CodecLimits::load_or_default(&ConfigService::new(store)).unwrap_err();
        assert!(matches!(err, ConfigError::Serde(_)));
    }
}
