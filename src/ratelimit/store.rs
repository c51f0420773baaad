//! Expiring key-value store.
//!
//! Each key decays to absent a fixed TTL after its last write. Expiry is lazy:
//! an expired entry reads as absent even before it is swept. Writes
//! opportunistically purge expired entries at most once per TTL, so memory
//! stays bounded by the set of keys seen within roughly one window.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use super::limit::MAX_WINDOW_SECS;
use crate::clock::Clock;
use crate::error::{Result, WardenError};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A concurrent map whose entries expire a fixed time after their last write.
pub struct ExpiringStore<V> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    last_sweep: Mutex<Instant>,
}

impl<V: Clone> ExpiringStore<V> {
    /// Create a store whose entries live for `ttl` after each write.
    ///
    /// `ttl` is capped at [`MAX_WINDOW_SECS`] so expiry instants never overflow.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = ttl.min(Duration::from_secs(MAX_WINDOW_SECS));
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
            last_sweep: Mutex::new(now),
        }
    }

    /// The time-to-live applied on every write.
    pub fn expires(&self) -> Duration {
        self.ttl
    }

    /// Get the live value for a key.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    /// Get the live value for a key, or `default` if absent or expired.
    pub fn get_or(&self, key: &str, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Write a value and restart its TTL.
    pub fn set(&self, key: &str, value: V) {
        let now = self.clock.now();
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
        self.maybe_sweep(now);
    }

    /// Time left before a key expires.
    pub fn ttl(&self, key: &str) -> Result<Duration> {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Ok(entry.expires_at - now),
            _ => Err(WardenError::NotFound(key.to_string())),
        }
    }

    /// Atomically replace a key's value with `f(current)`, restarting its TTL.
    ///
    /// `current` is `default` when the key is absent or expired. The closure
    /// runs while the key's shard is locked, so concurrent updates to the same
    /// key are serialized. Returns the new value and its remaining TTL.
    pub fn update<F>(&self, key: &str, default: V, f: F) -> (V, Duration)
    where
        F: FnOnce(V) -> V,
    {
        let now = self.clock.now();
        let expires_at = now + self.ttl;

        let value = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry {
                    value: default.clone(),
                    expires_at,
                });

            let current = if now < entry.expires_at {
                entry.value.clone()
            } else {
                default
            };
            let next = f(current);
            entry.value = next.clone();
            entry.expires_at = expires_at;
            next
        };

        self.maybe_sweep(now);
        (value, self.ttl)
    }

    /// Remove a key regardless of expiry.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(self.clock.now())
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before.saturating_sub(self.entries.len())
    }

    fn maybe_sweep(&self, now: Instant) {
        // Another writer is already sweeping.
        let Some(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last_sweep) < self.ttl {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let removed = self.purge_expired_at(now);
        if removed > 0 {
            trace!(removed = removed, ttl = ?self.ttl, "Purged expired entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store(ttl_secs: u64) -> (Arc<ManualClock>, ExpiringStore<u64>) {
        let clock = Arc::new(ManualClock::new());
        let store = ExpiringStore::new(Duration::from_secs(ttl_secs), clock.clone());
        (clock, store)
    }

    #[test]
    fn test_value_lives_until_ttl() {
        let (clock, store) = store(10);
        store.set("k", 1);

        for _ in 0..10 {
            assert_eq!(store.get_or("k", 0), 1);
            clock.advance(Duration::from_millis(999));
        }

        // t = 9.99s
        assert_eq!(store.get("k"), Some(1));
        clock.advance(Duration::from_millis(10));
        assert_eq!(store.get("k"), None);
        assert_eq!(store.get_or("k", 0), 0);
    }

    #[test]
    fn test_write_refreshes_ttl() {
        let (clock, store) = store(10);
        store.set("k", 1);
        clock.advance_secs(8);
        store.set("k", 2);
        clock.advance_secs(8);

        assert_eq!(store.get("k"), Some(2));
        assert_eq!(store.ttl("k").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_ttl_counts_down() {
        let (clock, store) = store(10);
        store.set("k", 5);
        assert_eq!(store.ttl("k").unwrap(), Duration::from_secs(10));

        clock.advance_secs(4);
        assert_eq!(store.ttl("k").unwrap(), Duration::from_secs(6));
    }

    #[test]
    fn test_ttl_missing_key() {
        let (clock, store) = store(1);
        assert!(matches!(store.ttl("nope"), Err(WardenError::NotFound(_))));

        store.set("k", 1);
        clock.advance_secs(1);
        assert!(matches!(store.ttl("k"), Err(WardenError::NotFound(_))));
    }

    #[test]
    fn test_update_starts_from_default_after_expiry() {
        let (clock, store) = store(10);
        let (value, ttl) = store.update("k", 0, |n| n + 1);
        assert_eq!((value, ttl), (1, Duration::from_secs(10)));

        let (value, _) = store.update("k", 0, |n| n + 1);
        assert_eq!(value, 2);

        clock.advance_secs(10);
        let (value, _) = store.update("k", 0, |n| n + 1);
        assert_eq!(value, 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (_clock, store) = store(60);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        store.update("shared", 0, |n| n + 1);
                    }
                });
            }
        });

        assert_eq!(store.get("shared"), Some(8000));
    }

    #[test]
    fn test_purge_expired() {
        let (clock, store) = store(5);
        store.set("a", 1);
        store.set("b", 2);
        clock.advance_secs(3);
        store.set("c", 3);
        clock.advance_secs(2);

        assert_eq!(store.len(), 3);
        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("c"), Some(3));
    }

    #[test]
    fn test_writes_sweep_once_per_ttl() {
        let (clock, store) = store(5);
        store.set("old", 1);
        clock.advance_secs(5);

        // First write after a full TTL sweeps "old" away.
        store.set("new", 1);
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_huge_ttl_is_capped() {
        let clock = Arc::new(ManualClock::new());
        let store = ExpiringStore::new(Duration::MAX, clock);

        let (value, ttl) = store.update("k", 0u64, |n| n + 1);
        assert_eq!(value, 1);
        assert_eq!(ttl, Duration::from_secs(MAX_WINDOW_SECS));
        assert_eq!(store.expires(), Duration::from_secs(MAX_WINDOW_SECS));
    }

    #[test]
    fn test_remove() {
        let (_clock, store) = store(5);
        store.set("k", 9);
        assert_eq!(store.remove("k"), Some(9));
        assert_eq!(store.get("k"), None);
    }
}
