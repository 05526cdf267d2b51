//! A single elastic pool of interchangeable resource units

use crate::config::PoolDefinition;
use crate::error::PoolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Utilization above which a pool grows on rebalance
pub const EXPAND_THRESHOLD: f64 = 0.8;

/// Utilization below which a pool shrinks on rebalance
pub const CONTRACT_THRESHOLD: f64 = 0.3;

/// Growth factor applied when expanding
pub const EXPAND_FACTOR: f64 = 1.2;

/// Shrink factor applied when contracting
pub const CONTRACT_FACTOR: f64 = 0.9;

/// Proof of one leased unit, returned to the pool on release
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    pool: String,
    id: u64,
}

impl ResourceHandle {
    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Capacity change made by a rebalance or expansion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityChange {
    pub pool: String,
    pub from: usize,
    pub to: usize,
}

/// Snapshot of one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub capacity: usize,
    pub in_use: usize,
    pub available: usize,
    pub min_capacity: usize,
    pub max_capacity: usize,
    pub utilization: f64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_reclaimed: u64,
}

#[derive(Debug)]
struct PoolState {
    capacity: usize,
    min_capacity: usize,
    max_capacity: usize,
    /// Lease id to acquisition time; ids grow, so iteration is oldest first
    leases: BTreeMap<u64, Instant>,
    next_id: u64,
    /// Bumped on every acquire, release and reclaim
    activity: u64,
    /// Activity value seen by the last rebalance
    rebalanced_at: Option<u64>,
    total_acquired: u64,
    total_released: u64,
    total_reclaimed: u64,
}

impl PoolState {
    fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.leases.len() as f64 / self.capacity as f64
    }

    fn expanded(&self, factor: f64) -> usize {
        let grown = (self.capacity as f64 * factor).round() as usize;
        grown.max(self.capacity + 1).min(self.max_capacity)
    }
}

/// Elastic pool bounded by `[min_capacity, max_capacity]`
#[derive(Debug)]
pub struct ResourcePool {
    name: String,
    state: parking_lot::Mutex<PoolState>,
    notify: Notify,
}

impl ResourcePool {
    pub fn new(definition: &PoolDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            state: parking_lot::Mutex::new(PoolState {
                capacity: definition.capacity,
                min_capacity: definition.min_capacity,
                max_capacity: definition.max_capacity,
                leases: BTreeMap::new(),
                next_id: 0,
                activity: 0,
                rebalanced_at: None,
                total_acquired: 0,
                total_released: 0,
                total_reclaimed: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lease a unit if one is free
    pub fn try_acquire(&self) -> Option<ResourceHandle> {
        let mut state = self.state.lock();
        if state.leases.len() >= state.capacity {
            return None;
        }

        state.next_id += 1;
        let id = state.next_id;
        state.leases.insert(id, Instant::now());
        state.activity += 1;
        state.total_acquired += 1;

        Some(ResourceHandle {
            pool: self.name.clone(),
            id,
        })
    }

    /// Lease a unit, waiting until one is released or capacity grows
    pub async fn acquire(&self) -> ResourceHandle {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();

            if let Some(handle) = self.try_acquire() {
                return handle;
            }
            notified.await;
        }
    }

    /// Return a leased unit
    pub fn release(&self, handle: ResourceHandle) -> Result<(), PoolError> {
        if handle.pool != self.name {
            return Err(PoolError::StaleHandle {
                pool: self.name.clone(),
                handle: handle.id,
            });
        }

        {
            let mut state = self.state.lock();
            if state.leases.remove(&handle.id).is_none() {
                return Err(PoolError::StaleHandle {
                    pool: self.name.clone(),
                    handle: handle.id,
                });
            }
            state.activity += 1;
            state.total_released += 1;
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Grow or shrink by utilization; untouched pools are skipped
    pub fn rebalance(&self) -> Option<CapacityChange> {
        let change = {
            let mut state = self.state.lock();
            if state.rebalanced_at == Some(state.activity) {
                return None;
            }
            state.rebalanced_at = Some(state.activity);

            let utilization = state.utilization();
            let from = state.capacity;
            let to = if utilization > EXPAND_THRESHOLD {
                state.expanded(EXPAND_FACTOR)
            } else if utilization < CONTRACT_THRESHOLD && from > state.min_capacity {
                let shrunk = (from as f64 * CONTRACT_FACTOR).floor() as usize;
                shrunk.max(state.min_capacity).max(state.leases.len())
            } else {
                from
            };

            if to == from {
                return None;
            }
            state.capacity = to;
            debug!(
                pool = %self.name,
                utilization = utilization,
                from = from,
                to = to,
                "Pool rebalanced"
            );
            CapacityChange {
                pool: self.name.clone(),
                from,
                to,
            }
        };

        if change.to > change.from {
            self.notify.notify_waiters();
        }
        Some(change)
    }

    /// Grow by `factor` (at least one unit, never past the ceiling)
    pub fn expand(&self, factor: f64) -> Option<CapacityChange> {
        let change = {
            let mut state = self.state.lock();
            let from = state.capacity;
            let to = state.expanded(factor);
            if to <= from {
                return None;
            }
            state.capacity = to;
            CapacityChange {
                pool: self.name.clone(),
                from,
                to,
            }
        };

        self.notify.notify_waiters();
        Some(change)
    }

    /// Reclaim the oldest `fraction` of outstanding leases
    ///
    /// Reclaimed handles become stale; releasing them later is an error.
    pub fn reclaim(&self, fraction: f64) -> usize {
        let reclaimed = {
            let mut state = self.state.lock();
            let in_use = state.leases.len();
            if in_use == 0 || fraction <= 0.0 {
                return 0;
            }

            let count = ((in_use as f64 * fraction).ceil() as usize).min(in_use);
            let oldest: Vec<u64> = state.leases.keys().take(count).copied().collect();
            for id in &oldest {
                state.leases.remove(id);
            }
            state.activity += 1;
            state.total_reclaimed += count as u64;
            count
        };

        debug!(pool = %self.name, reclaimed = reclaimed, "Reclaimed pool leases");
        self.notify.notify_waiters();
        reclaimed
    }

    pub fn utilization(&self) -> f64 {
        self.state.lock().utilization()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().leases.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let in_use = state.leases.len();
        PoolStats {
            name: self.name.clone(),
            capacity: state.capacity,
            in_use,
            available: state.capacity.saturating_sub(in_use),
            min_capacity: state.min_capacity,
            max_capacity: state.max_capacity,
            utilization: state.utilization(),
            total_acquired: state.total_acquired,
            total_released: state.total_released,
            total_reclaimed: state.total_reclaimed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize, min: usize, max: usize) -> ResourcePool {
        ResourcePool::new(&PoolDefinition::new("test", capacity, min, max))
    }

    #[test]
    fn test_try_acquire_respects_capacity() {
        let pool = pool(2, 1, 4);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());

        pool.release(a).unwrap();
        assert!(pool.try_acquire().is_some());
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_release_foreign_handle_rejected() {
        let pool = pool(2, 1, 4);
        let other = ResourcePool::new(&PoolDefinition::new("other", 2, 1, 4));
        let handle = other.try_acquire().unwrap();

        let err = pool.release(handle).unwrap_err();
        assert!(matches!(err, PoolError::StaleHandle { .. }));
    }

    #[test]
    fn test_rebalance_expands_busy_pool() {
        let pool = pool(10, 2, 100);
        let _leases: Vec<_> = (0..9).map(|_| pool.try_acquire().unwrap()).collect();

        let change = pool.rebalance().unwrap();
        assert_eq!((change.from, change.to), (10, 12));
        assert_eq!(pool.capacity(), 12);
    }

    #[test]
    fn test_rebalance_is_idempotent() {
        let pool = pool(10, 2, 100);
        let _leases: Vec<_> = (0..10).map(|_| pool.try_acquire().unwrap()).collect();

        assert!(pool.rebalance().is_some());
        assert!(pool.rebalance().is_none());
        assert_eq!(pool.capacity(), 12);
    }

    #[test]
    fn test_rebalance_contracts_idle_pool_to_floor() {
        let pool = pool(10, 8, 100);
        let change = pool.rebalance().unwrap();
        assert_eq!(change.to, 9);

        // No activity since: untouched
        assert!(pool.rebalance().is_none());

        let h = pool.try_acquire().unwrap();
        pool.release(h).unwrap();
        assert_eq!(pool.rebalance().unwrap().to, 8);

        let h = pool.try_acquire().unwrap();
        pool.release(h).unwrap();
        assert!(pool.rebalance().is_none());
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn test_expand_capped_at_ceiling() {
        let pool = pool(2, 1, 3);
        assert_eq!(pool.expand(1.2).unwrap().to, 3);
        assert!(pool.expand(1.2).is_none());
    }

    #[test]
    fn test_reclaim_oldest_leases() {
        let pool = pool(10, 2, 100);
        let handles: Vec<_> = (0..10).map(|_| pool.try_acquire().unwrap()).collect();

        assert_eq!(pool.reclaim(0.1), 1);
        assert_eq!(pool.in_use(), 9);

        let mut handles = handles.into_iter();
        let oldest = handles.next().unwrap();
        assert!(matches!(
            pool.release(oldest),
            Err(PoolError::StaleHandle { handle: 1, .. })
        ));
        assert!(pool.release(handles.next().unwrap()).is_ok());
        assert_eq!(pool.stats().total_reclaimed, 1);
    }
}
