//! A single cache level with its own TTL, capacity and eviction policy

use super::CacheEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Fraction of entries removed by one LRU or LFU eviction batch
pub const FREQUENCY_EVICTION_FRACTION: f64 = 0.2;

/// Fraction of entries removed by the oldest-first pass of TTL eviction
pub const TTL_EVICTION_FRACTION: f64 = 0.3;

/// Rule selecting which entries leave a full level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    Lru,
    /// Least frequently used
    Lfu,
    /// Expired first, then oldest by creation
    Ttl,
}

/// Outcome of probing one level
#[derive(Debug)]
pub enum Lookup<V> {
    Hit(CacheEntry<V>),
    Expired,
    Absent,
}

/// Entries owned by one level
#[derive(Debug)]
pub struct CacheLevel<V> {
    ttl: Duration,
    max_entries: usize,
    policy: EvictionPolicy,
    entries: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
}

impl<V: Clone> CacheLevel<V> {
    pub fn new(ttl: Duration, max_entries: usize, policy: EvictionPolicy) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            policy,
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        entry.age(now) > self.ttl
    }

    /// Probe for `key`, touching it on a hit and dropping it if expired
    pub fn lookup(&mut self, key: &str, now: Instant) -> Lookup<V> {
        let expired = match self.entries.get(key) {
            None => return Lookup::Absent,
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            self.entries.remove(key);
            return Lookup::Expired;
        }

        let seq = self.next_seq();
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                entry.access_seq = seq;
                Lookup::Hit(entry.clone())
            }
            None => Lookup::Absent,
        }
    }

    /// Insert or replace an entry, evicting first if the level is full
    ///
    /// Returns the number of entries evicted to make room.
    pub fn insert(&mut self, mut entry: CacheEntry<V>, now: Instant) -> usize {
        let mut evicted = 0;
        if !self.entries.contains_key(&entry.key) {
            while self.entries.len() >= self.max_entries {
                let removed = self.evict_batch(now, false);
                if removed == 0 {
                    break;
                }
                evicted += removed;
            }
        }

        let seq = self.next_seq();
        entry.insert_seq = seq;
        entry.access_seq = seq;
        self.entries.insert(entry.key.clone(), entry);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Drop every entry older than the TTL
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.age(now) <= ttl);
        before - self.entries.len()
    }

    /// Run one eviction batch of this level's policy
    ///
    /// Without `force`, TTL eviction stops after the expired pass if that
    /// alone freed a slot. Always removes at least one entry when the level
    /// is non-empty and eviction is needed.
    pub fn evict_batch(&mut self, now: Instant, force: bool) -> usize {
        if self.entries.is_empty() {
            return 0;
        }

        match self.policy {
            EvictionPolicy::Lru => {
                let count = batch_size(self.entries.len(), FREQUENCY_EVICTION_FRACTION);
                self.evict_by(count, |e| (e.access_seq, 0))
            }
            EvictionPolicy::Lfu => {
                let count = batch_size(self.entries.len(), FREQUENCY_EVICTION_FRACTION);
                self.evict_by(count, |e| (e.access_count, e.access_seq))
            }
            EvictionPolicy::Ttl => {
                let expired = self.purge_expired(now);
                if !force && self.entries.len() < self.max_entries {
                    return expired;
                }
                if self.entries.is_empty() {
                    return expired;
                }
                let count = batch_size(self.entries.len(), TTL_EVICTION_FRACTION);
                expired + self.evict_by(count, |e| (e.insert_seq, 0))
            }
        }
    }

    /// Evict until the level fits its capacity
    pub fn trim_to_capacity(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.max_entries {
            let removed = self.evict_batch(now, true);
            if removed == 0 {
                break;
            }
            evicted += removed;
        }
        evicted
    }

    /// Change TTL and capacity, trimming any overflow
    pub fn set_limits(&mut self, ttl: Duration, max_entries: usize, now: Instant) -> usize {
        self.ttl = ttl;
        self.max_entries = max_entries.max(1);
        self.purge_expired(now) + self.trim_to_capacity(now)
    }

    /// Remove the `count` entries with the smallest `rank`
    fn evict_by<F>(&mut self, count: usize, rank: F) -> usize
    where
        F: Fn(&CacheEntry<V>) -> (u64, u64),
    {
        let mut ranked: Vec<(u64, u64, String)> = self
            .entries
            .values()
            .map(|e| {
                let (a, b) = rank(e);
                (a, b, e.key.clone())
            })
            .collect();
        ranked.sort_unstable();

        ranked
            .into_iter()
            .take(count)
            .filter(|(_, _, key)| self.entries.remove(key).is_some())
            .count()
    }
}

/// Entries to remove for a batch of `fraction`, at least one
fn batch_size(len: usize, fraction: f64) -> usize {
    ((len as f64 * fraction).ceil() as usize).clamp(1, len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CachePriority;

    fn entry(key: &str, now: Instant) -> CacheEntry<String> {
        CacheEntry::new(key.to_string(), format!("value-{}", key), CachePriority::Medium, now)
    }

    #[test]
    fn test_batch_size() {
        assert_eq!(batch_size(1, 0.2), 1);
        assert_eq!(batch_size(2, 0.2), 1);
        assert_eq!(batch_size(10, 0.2), 2);
        assert_eq!(batch_size(11, 0.2), 3);
        assert_eq!(batch_size(10, 0.3), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_evicts_least_recently_used() {
        let now = Instant::now();
        let mut level = CacheLevel::new(Duration::from_secs(60), 5, EvictionPolicy::Lru);
        for key in ["a", "b", "c", "d", "e"] {
            level.insert(entry(key, now), now);
        }

        // Touch "a" so "b" becomes the oldest access
        assert!(matches!(level.lookup("a", now), Lookup::Hit(_)));
        let evicted = level.insert(entry("f", now), now);

        assert_eq!(evicted, 1);
        assert!(level.contains("a"));
        assert!(!level.contains("b"));
        assert!(level.contains("f"));
        assert_eq!(level.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lfu_evicts_least_frequently_used() {
        let now = Instant::now();
        let mut level = CacheLevel::new(Duration::from_secs(60), 5, EvictionPolicy::Lfu);
        for key in ["a", "b", "c", "d", "e"] {
            level.insert(entry(key, now), now);
        }
        for key in ["a", "b", "d", "e"] {
            level.lookup(key, now);
        }
        level.lookup("a", now);

        level.insert(entry("f", now), now);
        assert!(!level.contains("c"));
        assert!(level.contains("a"));
        assert!(level.contains("f"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_evicts_expired_before_oldest() {
        let start = Instant::now();
        let mut level = CacheLevel::new(Duration::from_secs(10), 4, EvictionPolicy::Ttl);
        level.insert(entry("old", start), start);

        tokio::time::advance(Duration::from_secs(8)).await;
        let mid = Instant::now();
        for key in ["b", "c", "d"] {
            level.insert(entry(key, mid), mid);
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        let now = Instant::now();
        let evicted = level.insert(entry("e", now), now);

        // Only the expired entry had to go
        assert_eq!(evicted, 1);
        assert!(!level.contains("old"));
        assert_eq!(level.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_evicts_oldest_thirty_percent_when_nothing_expired() {
        let now = Instant::now();
        let mut level = CacheLevel::new(Duration::from_secs(60), 10, EvictionPolicy::Ttl);
        for i in 0..10 {
            level.insert(entry(&format!("k{}", i), now), now);
        }

        let evicted = level.insert(entry("new", now), now);
        assert_eq!(evicted, 3);
        for i in 0..3 {
            assert!(!level.contains(&format!("k{}", i)));
        }
        assert!(level.contains("k3"));
        assert_eq!(level.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lookup_removes_entry() {
        let now = Instant::now();
        let mut level = CacheLevel::new(Duration::from_secs(5), 10, EvictionPolicy::Lru);
        level.insert(entry("a", now), now);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(matches!(level.lookup("a", Instant::now()), Lookup::Expired));
        assert!(level.is_empty());
        assert!(matches!(level.lookup("a", Instant::now()), Lookup::Absent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_does_not_evict() {
        let now = Instant::now();
        let mut level = CacheLevel::new(Duration::from_secs(60), 2, EvictionPolicy::Lru);
        level.insert(entry("a", now), now);
        level.insert(entry("b", now), now);

        assert_eq!(level.insert(entry("a", now), now), 0);
        assert_eq!(level.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_limits_trims_overflow() {
        let now = Instant::now();
        let mut level = CacheLevel::new(Duration::from_secs(60), 10, EvictionPolicy::Lfu);
        for i in 0..10 {
            level.insert(entry(&format!("k{}", i), now), now);
        }

        let evicted = level.set_limits(Duration::from_secs(30), 4, now);
        assert!(evicted >= 6);
        assert!(level.len() <= 4);
        assert_eq!(level.ttl(), Duration::from_secs(30));
    }
}
