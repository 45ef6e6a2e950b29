//! Concurrent, TTL-expiring storage for token buckets.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::Clock;

use super::bucket::TokenBucket;

/// Outcome of charging one key against its bucket.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    /// Whether a token was consumed
    pub allowed: bool,
    /// Post-consumption token balance
    pub remaining: f64,
    /// When the entry expires, in Unix seconds
    pub reset: u64,
}

struct StoreEntry {
    bucket: Mutex<TokenBucket>,
    /// Fixed at creation; the entry is not refreshed on access
    expires_at: Duration,
    generation: u64,
}

struct QueueRecord {
    key: String,
    generation: u64,
}

/// A concurrent mapping from composite key to [`TokenBucket`] with fixed
/// per-entry TTL and bounded key cardinality.
///
/// Buckets are created lazily on first access. An entry idle past its TTL
/// is removed and replaced with a fresh full bucket on the next access, so
/// an identity's budget resets entirely after inactivity. At `max_keys`
/// the oldest entries are evicted first; with a fixed TTL, insertion order
/// is expiry order, so the eviction queue is a plain FIFO. Generation tags
/// keep a stale queue record from evicting a re-created entry.
pub struct BucketStore {
    entries: DashMap<String, StoreEntry>,
    /// Insertion-ordered eviction queue; may hold stale records for keys
    /// already removed, skipped via the generation check
    order: Mutex<VecDeque<QueueRecord>>,
    generation: AtomicU64,
    capacity: u64,
    window: Duration,
    ttl: Duration,
    max_keys: usize,
    clock: Arc<dyn Clock>,
}

impl BucketStore {
    /// Create a store whose buckets all share one capacity and window.
    pub fn new(
        capacity: u64,
        window: Duration,
        ttl: Duration,
        max_keys: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            generation: AtomicU64::new(0),
            capacity,
            window,
            ttl,
            max_keys,
            clock,
        }
    }

    /// Charge `key` one token, creating its bucket on first access.
    ///
    /// The check-or-create sequence is atomic per key: two concurrent
    /// first-accesses for the same key share a single bucket. Mutation of
    /// an existing bucket happens under its own lock, so unrelated keys
    /// never serialize on each other.
    pub fn check(&self, key: &str) -> Admission {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                let mut bucket = entry.bucket.lock();
                let allowed = bucket.allow(now);
                let remaining = bucket.tokens_at(now);
                return Admission {
                    allowed,
                    remaining,
                    reset: entry.expires_at.as_secs(),
                };
            }
            // Fixed TTL: an idle entry is replaced, not refreshed in place.
            drop(entry);
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }

        self.reserve_slot(now);

        let (admission, inserted) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get();
                let mut bucket = entry.bucket.lock();
                let allowed = bucket.allow(now);
                let remaining = bucket.tokens_at(now);
                (
                    Admission {
                        allowed,
                        remaining,
                        reset: entry.expires_at.as_secs(),
                    },
                    None,
                )
            }
            Entry::Vacant(vacant) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                debug!(key, capacity = self.capacity, "Creating new token bucket");

                let mut bucket = TokenBucket::new(self.capacity, self.window, now);
                let allowed = bucket.allow(now);
                let remaining = bucket.tokens_at(now);
                let expires_at = now + self.ttl;

                vacant.insert(StoreEntry {
                    bucket: Mutex::new(bucket),
                    expires_at,
                    generation,
                });

                (
                    Admission {
                        allowed,
                        remaining,
                        reset: expires_at.as_secs(),
                    },
                    Some(generation),
                )
            }
        };

        // The queue lock is only taken once the map entry guard is gone.
        if let Some(generation) = inserted {
            self.order.lock().push_back(QueueRecord {
                key: key.to_string(),
                generation,
            });
        }

        admission
    }

    /// When an entry becomes eligible for removal, in Unix seconds.
    ///
    /// Read-only; does not touch the bucket or extend the entry.
    pub fn expiration_of(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|e| e.expires_at.as_secs())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` currently has an entry, expired or not.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop all entries. Primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
        self.order.lock().clear();
    }

    /// Make room for one new key when the store is at `max_keys`.
    ///
    /// Expired entries are swept first; if the store is still full, the
    /// oldest live entries are evicted. The bound is approximate under
    /// concurrent inserts of distinct new keys.
    fn reserve_slot(&self, now: Duration) {
        if self.entries.len() < self.max_keys {
            return;
        }

        self.entries.retain(|_, e| e.expires_at > now);

        while self.entries.len() >= self.max_keys {
            let record = self.order.lock().pop_front();
            match record {
                None => return,
                Some(record) => {
                    let removed = self
                        .entries
                        .remove_if(&record.key, |_, e| e.generation == record.generation);
                    if removed.is_some() {
                        debug!(key = record.key.as_str(), "Evicted oldest bucket at capacity");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const WINDOW: Duration = Duration::from_secs(1);

    fn store_with_clock(capacity: u64, max_keys: usize) -> (BucketStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1_000)));
        let store = BucketStore::new(capacity, WINDOW, WINDOW, max_keys, clock.clone());
        (store, clock)
    }

    #[test]
    fn test_creates_bucket_on_first_access() {
        let (store, _) = store_with_clock(5, 100);
        assert!(store.is_empty());

        let admission = store.check("ip1");
        assert!(admission.allowed);
        assert_eq!(store.len(), 1);
        assert!(store.contains_key("ip1"));
    }

    #[test]
    fn test_budget_is_bounded_by_capacity() {
        let (store, _) = store_with_clock(3, 100);

        for _ in 0..3 {
            assert!(store.check("ip1").allowed);
        }
        let denied = store.check("ip1");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining.floor(), 0.0);
    }

    #[test]
    fn test_keys_are_isolated() {
        let (store, _) = store_with_clock(1, 100);

        assert!(store.check("ip1").allowed);
        assert!(!store.check("ip1").allowed);
        assert!(store.check("ip2").allowed);
    }

    #[test]
    fn test_reset_reports_entry_expiration() {
        let (store, _) = store_with_clock(5, 100);

        let admission = store.check("ip1");
        assert_eq!(admission.reset, 1_001);
        assert_eq!(store.expiration_of("ip1"), Some(1_001));
        assert_eq!(store.expiration_of("missing"), None);
    }

    #[test]
    fn test_ttl_is_fixed_not_sliding() {
        let (store, clock) = store_with_clock(5, 100);

        store.check("ip1");
        let first = store.expiration_of("ip1").unwrap();

        clock.advance(Duration::from_millis(500));
        store.check("ip1");
        assert_eq!(store.expiration_of("ip1"), Some(first));
    }

    #[test]
    fn test_expired_entry_gets_fresh_budget() {
        let (store, clock) = store_with_clock(2, 100);

        assert!(store.check("ip1").allowed);
        assert!(store.check("ip1").allowed);
        assert!(!store.check("ip1").allowed);

        // Past the TTL the entry is replaced, not refilled in place.
        clock.advance(Duration::from_secs(2));
        let admission = store.check("ip1");
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 1.0);
        assert_eq!(store.expiration_of("ip1"), Some(1_003));
    }

    #[test]
    fn test_evicts_oldest_key_at_max_keys() {
        let (store, _) = store_with_clock(5, 2);

        store.check("ip1");
        store.check("ip2");
        store.check("ip3");

        assert_eq!(store.len(), 2);
        assert!(!store.contains_key("ip1"));
        assert!(store.contains_key("ip2"));
        assert!(store.contains_key("ip3"));
    }

    #[test]
    fn test_sweeps_expired_before_evicting_live_keys() {
        let (store, clock) = store_with_clock(5, 2);

        store.check("ip1");
        clock.advance(Duration::from_secs(2));
        store.check("ip2");
        store.check("ip3");

        // ip1 had expired, so ip2 survives the sweep.
        assert!(!store.contains_key("ip1"));
        assert!(store.contains_key("ip2"));
        assert!(store.contains_key("ip3"));
    }

    #[test]
    fn test_stale_queue_record_does_not_evict_recreated_entry() {
        let (store, clock) = store_with_clock(5, 2);

        store.check("ip1");
        clock.advance(Duration::from_secs(2));
        // ip1 expired; the next access re-creates it with a new generation
        // while the old queue record still names it.
        store.check("ip1");
        store.check("ip2");
        store.check("ip3");

        assert_eq!(store.len(), 2);
        assert!(store.contains_key("ip3"));
    }

    #[test]
    fn test_clear_drops_all_entries() {
        let (store, _) = store_with_clock(5, 100);

        store.check("ip1");
        store.check("ip2");
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_first_access_creates_single_bucket() {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1_000)));
        let store = Arc::new(BucketStore::new(
            100,
            Duration::from_secs(60),
            Duration::from_secs(60),
            1_000,
            clock,
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0u64;
                for _ in 0..125 {
                    if store.check("shared").allowed {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
        assert_eq!(store.len(), 1);
    }
}
