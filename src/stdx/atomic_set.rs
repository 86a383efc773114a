//! Concurrent string set with single-operation test-and-insert.
//!
//! [`AtomicSet`] backs the recorder set's seen-sbuf dedup and each carving
//! recorder's content-hash cache. `check_and_insert` is the whole contract:
//! membership test and insertion happen under one lock acquisition, so two
//! threads racing on the same key see exactly one "first time".
//!
//! # Thread safety
//! All operations take `&self` and are safe to call concurrently.

use std::sync::Mutex;

use ahash::AHashSet;

/// Mutex-guarded set of owned strings.
#[derive(Debug, Default)]
pub struct AtomicSet {
    inner: Mutex<AHashSet<String>>,
}

impl AtomicSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key`, returning `true` if it was already present.
    ///
    /// The test and the insert are a single atomic operation with respect to
    /// other callers.
    pub fn check_and_insert(&self, key: &str) -> bool {
        let mut set = self.inner.lock().unwrap();
        if set.contains(key) {
            return true;
        }
        set.insert(key.to_string());
        false
    }

    /// Returns whether `key` is present, without inserting.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().contains(key)
    }

    /// Number of distinct keys inserted so far.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
