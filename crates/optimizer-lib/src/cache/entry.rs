//! Cache entries and value sizing

use crate::models::CachePriority;
use tokio::time::Instant;

/// Size assumed when a value cannot be measured; lands in the slowest level
pub const UNKNOWN_SIZE: usize = usize::MAX / 2;

/// Values that can be stored in the tiered cache
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Approximate size in bytes, `None` when it cannot be estimated
    fn size_estimate(&self) -> Option<usize>;
}

impl CacheValue for serde_json::Value {
    fn size_estimate(&self) -> Option<usize> {
        serde_json::to_vec(self).ok().map(|b| b.len())
    }
}

impl CacheValue for String {
    fn size_estimate(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl CacheValue for Vec<u8> {
    fn size_estimate(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// A value resident in one cache level
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub priority: CachePriority,
    pub size_estimate: usize,
    /// Level-local insertion order, breaks ties between equal timestamps
    pub(crate) insert_seq: u64,
    /// Level-local order of the latest access
    pub(crate) access_seq: u64,
}

impl<V: CacheValue> CacheEntry<V> {
    pub fn new(key: String, value: V, priority: CachePriority, now: Instant) -> Self {
        let size_estimate = value.size_estimate().unwrap_or(UNKNOWN_SIZE);
        Self {
            key,
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            priority,
            size_estimate,
            insert_seq: 0,
            access_seq: 0,
        }
    }
}

impl<V> CacheEntry<V> {
    /// Age relative to `now`
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn touch(&mut self, now: Instant) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}
