// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bean introspector double that counts strategy builds.

use beangraph_core::bean::{BeanStateReader, BeanStateWriter};
use beangraph_core::{BeanIntrospector, BeanType, IntrospectionError, TypeKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps another [`BeanIntrospector`], counting every build request.
///
/// `fail_next(n)` makes the next `n` builds fail with
/// [`IntrospectionError::Unsupported`] before delegating. `with_build_delay`
/// stretches each build so concurrent first lookups overlap.
pub struct CountingIntrospector {
    inner: Arc<dyn BeanIntrospector>,
    writer_builds: AtomicUsize,
    reader_builds: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl CountingIntrospector {
    /// Counts builds delegated to `inner`.
    pub fn new(inner: impl BeanIntrospector + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            writer_builds: AtomicUsize::new(0),
            reader_builds: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` inside every build.
    #[must_use]
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `n` builds (writer or reader).
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Writer builds attempted so far, failed ones included.
    pub fn writer_builds(&self) -> usize {
        self.writer_builds.load(Ordering::SeqCst)
    }

    /// Reader builds attempted so far, failed ones included.
    pub fn reader_builds(&self) -> usize {
        self.reader_builds.load(Ordering::SeqCst)
    }

    fn attempt(&self, counter: &AtomicUsize, type_name: &'static str) -> Result<(), IntrospectionError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(IntrospectionError::Unsupported {
                type_name,
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

impl BeanIntrospector for CountingIntrospector {
    fn writer_for(&self, bean_type: &BeanType) -> Result<Arc<dyn BeanStateWriter>, IntrospectionError> {
        self.attempt(&self.writer_builds, bean_type.name())?;
        self.inner.writer_for(bean_type)
    }

    fn reader_for(&self, key: &TypeKey) -> Result<Arc<dyn BeanStateReader>, IntrospectionError> {
        self.attempt(&self.reader_builds, "<wire type>")?;
        self.inner.reader_for(key)
    }
}
