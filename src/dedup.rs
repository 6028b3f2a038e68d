use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Exact-match set of keys already accepted during one run.
#[derive(Debug, Default)]
pub(crate) struct DedupCache {
    seen: Mutex<HashSet<String>>,
}

impl DedupCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `key` and returns `true` if it had not been seen before.
    /// Check and insert happen under one lock acquisition.
    pub(crate) fn insert(&self, key: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_string())
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
