//! Warn-once cache.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Remembers which warnings were already logged.
///
/// One cache is owned by each `EventModel` and shared with its calendars
/// and loaders, so that an unknown property name found in a thousand events
/// is only reported once per model.
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: Mutex<HashSet<String>>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `key` is seen.
    pub fn first(&self, key: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_only_once() {
        let cache = WarnOnce::new();
        assert!(cache.first("X-FOO"));
        assert!(!cache.first("X-FOO"));
        assert!(cache.first("X-BAR"));
        assert_eq!(cache.len(), 2);
    }
}
