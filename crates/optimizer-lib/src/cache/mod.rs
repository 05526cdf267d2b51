//! Three-level cache with per-level eviction policies
//!
//! - Level 1: short TTL, small capacity, LRU
//! - Level 2: medium TTL and capacity, LFU
//! - Level 3: long TTL, large capacity, expire-then-oldest
//!
//! Lookups probe level 1 first. Entries hit often enough below level 1 are
//! copied up into level 1 and stay where they were. Every level has its own
//! lock, and no operation here ever fails.

mod entry;
mod level;

pub use entry::{CacheEntry, CacheValue, UNKNOWN_SIZE};
pub use level::{
    CacheLevel, EvictionPolicy, Lookup, FREQUENCY_EVICTION_FRACTION, TTL_EVICTION_FRACTION,
};

use crate::config::CacheLevelConfig;
use crate::models::CachePriority;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

/// Entries below this size are placed in level 1
pub const SMALL_ENTRY_SIZE: usize = 1_000;

/// Entries below this size are placed in level 2
pub const MEDIUM_ENTRY_SIZE: usize = 10_000;

/// Lower bound of the cumulative adaptive scale
pub const MIN_SCALE: f64 = 0.25;

/// Upper bound of the cumulative adaptive scale
pub const MAX_SCALE: f64 = 4.0;

/// Identifies one cache level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    L1,
    L2,
    L3,
}

impl CacheTier {
    /// Probe order
    pub const ALL: [CacheTier; 3] = [CacheTier::L1, CacheTier::L2, CacheTier::L3];

    pub fn index(&self) -> usize {
        match self {
            CacheTier::L1 => 0,
            CacheTier::L2 => 1,
            CacheTier::L3 => 2,
        }
    }
}

/// Adjustments the optimization controller makes to a cache
pub trait CacheControl: Send + Sync {
    /// Multiply every level's TTL and capacity; returns the resulting scale
    fn scale(&self, factor: f64) -> f64;

    /// Run one eviction batch on `tier`; returns the entries removed
    fn force_evict(&self, tier: CacheTier) -> usize;

    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    expirations: AtomicU64,
    level_hits: [AtomicU64; 3],
}

/// Occupancy and limits of one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    pub tier: CacheTier,
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_ms: u64,
    pub policy: EvictionPolicy,
    pub hits: u64,
}

/// Point-in-time cache statistics; counters only ever increase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    /// Current multiplier applied to the configured TTLs and capacities
    pub scale: f64,
    pub levels: Vec<LevelStats>,
}

/// The three-level cache
pub struct TieredCache<V> {
    levels: [Mutex<CacheLevel<V>>; 3],
    base: [CacheLevelConfig; 3],
    scale: Mutex<f64>,
    promotion_threshold: u64,
    counters: CacheCounters,
}

impl<V: CacheValue> TieredCache<V> {
    /// Build from validated level configs (level 1 first)
    pub fn new(levels: [CacheLevelConfig; 3], promotion_threshold: u64) -> Self {
        Self {
            levels: std::array::from_fn(|i| {
                let cfg = &levels[i];
                Mutex::new(CacheLevel::new(cfg.ttl(), cfg.max_entries, cfg.eviction_policy))
            }),
            base: levels,
            scale: Mutex::new(1.0),
            promotion_threshold,
            counters: CacheCounters::default(),
        }
    }

    /// Level chosen for a new entry
    pub fn placement(priority: CachePriority, size: usize) -> CacheTier {
        if priority == CachePriority::High || size < SMALL_ENTRY_SIZE {
            CacheTier::L1
        } else if priority == CachePriority::Medium || size < MEDIUM_ENTRY_SIZE {
            CacheTier::L2
        } else {
            CacheTier::L3
        }
    }

    /// Look up `key`, probing level 1, then 2, then 3
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        for tier in CacheTier::ALL {
            let lookup = self.levels[tier.index()].lock().lookup(key, now);
            match lookup {
                Lookup::Hit(entry) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.counters.level_hits[tier.index()].fetch_add(1, Ordering::Relaxed);

                    let value = entry.value.clone();
                    if tier != CacheTier::L1 && entry.access_count > self.promotion_threshold {
                        self.promote(entry, tier, now);
                    }
                    return Some(value);
                }
                Lookup::Expired => {
                    self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
                Lookup::Absent => {}
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value`, replacing any copy of `key` in any level
    pub fn put(&self, key: impl Into<String>, value: V, priority: CachePriority) {
        let now = Instant::now();
        let entry = CacheEntry::new(key.into(), value, priority, now);
        let tier = Self::placement(priority, entry.size_estimate);

        for other in CacheTier::ALL.iter().filter(|t| **t != tier) {
            self.levels[other.index()].lock().remove(&entry.key);
        }

        let evicted = self.levels[tier.index()].lock().insert(entry, now);
        self.record_evictions(evicted);
    }

    /// Copy a hot lower-level entry into level 1
    fn promote(&self, entry: CacheEntry<V>, from: CacheTier, now: Instant) {
        // Fresh level-1 residency so the level-1 TTL bounds the copy
        let promoted = CacheEntry {
            created_at: now,
            last_accessed_at: now,
            ..entry
        };
        debug!(key = %promoted.key, from = ?from, "Promoting cache entry to level 1");

        let evicted = self.levels[CacheTier::L1.index()].lock().insert(promoted, now);
        self.record_evictions(evicted);
        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove `key` from every level
    pub fn remove(&self, key: &str) -> bool {
        let mut removed = false;
        for level in &self.levels {
            removed |= level.lock().remove(key);
        }
        removed
    }

    pub fn clear(&self) {
        for level in &self.levels {
            level.lock().clear();
        }
    }

    /// Total entries across levels (promoted entries count twice)
    pub fn len(&self) -> usize {
        self.levels.iter().map(|l| l.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Levels currently holding `key`, without touching it
    pub fn locate(&self, key: &str) -> Vec<CacheTier> {
        CacheTier::ALL
            .into_iter()
            .filter(|t| self.levels[t.index()].lock().contains(key))
            .collect()
    }

    /// Purge expired entries from every level
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let purged: usize = self
            .levels
            .iter()
            .map(|l| l.lock().purge_expired(now))
            .sum();
        self.counters
            .expirations
            .fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// Run one eviction batch on `tier` regardless of capacity pressure
    pub fn force_evict(&self, tier: CacheTier) -> usize {
        let evicted = self.levels[tier.index()]
            .lock()
            .evict_batch(Instant::now(), true);
        self.record_evictions(evicted);
        evicted
    }

    /// Multiply every level's TTL and capacity by `factor`
    ///
    /// The cumulative scale is clamped to `[MIN_SCALE, MAX_SCALE]` of the
    /// configured base. Strict level ordering is restored after rounding and
    /// levels above their new capacity are trimmed. Returns the new scale.
    pub fn scale(&self, factor: f64) -> f64 {
        let mut scale = self.scale.lock();
        let target = (*scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        if (target - *scale).abs() < f64::EPSILON {
            return *scale;
        }
        *scale = target;

        let mut ttls: [u64; 3] = std::array::from_fn(|i| {
            ((self.base[i].ttl_ms as f64 * target).round() as u64).max(1)
        });
        let mut caps: [usize; 3] = std::array::from_fn(|i| {
            ((self.base[i].max_entries as f64 * target).round() as usize).max(1)
        });
        for i in 1..3 {
            ttls[i] = ttls[i].max(ttls[i - 1] + 1);
            caps[i] = caps[i].max(caps[i - 1] + 1);
        }

        let now = Instant::now();
        let mut evicted = 0;
        for tier in CacheTier::ALL {
            let i = tier.index();
            evicted += self.levels[i]
                .lock()
                .set_limits(Duration::from_millis(ttls[i]), caps[i], now);
        }
        self.record_evictions(evicted);

        info!(
            scale = target,
            l1_ttl_ms = ttls[0],
            l1_max_entries = caps[0],
            evicted = evicted,
            "Cache levels resized"
        );
        target
    }

    fn record_evictions(&self, count: usize) {
        if count > 0 {
            self.counters
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        let levels = CacheTier::ALL
            .iter()
            .map(|tier| {
                let level = self.levels[tier.index()].lock();
                LevelStats {
                    tier: *tier,
                    entries: level.len(),
                    max_entries: level.max_entries(),
                    ttl_ms: level.ttl().as_millis() as u64,
                    policy: level.policy(),
                    hits: self.counters.level_hits[tier.index()].load(Ordering::Relaxed),
                }
            })
            .collect();

        CacheStats {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            scale: *self.scale.lock(),
            levels,
        }
    }

    /// Run the periodic expiry sweep until shutdown
    pub async fn run(self: Arc<Self>, sweep_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = sweep_interval.as_millis() as u64,
            "Starting cache sweep loop"
        );

        let mut ticker = interval(sweep_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.sweep();
                    if purged > 0 {
                        debug!(purged = purged, "Cache sweep complete");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down cache sweep loop");
                    break;
                }
            }
        }
    }
}

impl<V: CacheValue> CacheControl for TieredCache<V> {
    fn scale(&self, factor: f64) -> f64 {
        TieredCache::scale(self, factor)
    }

    fn force_evict(&self, tier: CacheTier) -> usize {
        TieredCache::force_evict(self, tier)
    }

    fn stats(&self) -> CacheStats {
        TieredCache::stats(self)
    }
}
