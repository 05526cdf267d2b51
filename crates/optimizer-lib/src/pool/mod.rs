//! Elastic resource pools
//!
//! Each named pool leases interchangeable units up to its current capacity.
//! A periodic rebalance grows busy pools and shrinks idle ones within their
//! configured bounds. Only [`ResourcePoolManager::acquire`] ever waits.

mod resource;

pub use resource::{
    CapacityChange, PoolStats, ResourceHandle, ResourcePool, CONTRACT_FACTOR, CONTRACT_THRESHOLD,
    EXPAND_FACTOR, EXPAND_THRESHOLD,
};

use crate::config::PoolDefinition;
use crate::error::PoolError;
use crate::observability::OptimizerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

/// Owns every configured pool
pub struct ResourcePoolManager {
    pools: Vec<Arc<ResourcePool>>,
    rebalance_lock: parking_lot::Mutex<()>,
    metrics: OptimizerMetrics,
}

impl ResourcePoolManager {
    pub fn new(definitions: &[PoolDefinition], metrics: OptimizerMetrics) -> Self {
        Self {
            pools: definitions
                .iter()
                .map(|d| Arc::new(ResourcePool::new(d)))
                .collect(),
            rebalance_lock: parking_lot::Mutex::new(()),
            metrics,
        }
    }

    pub fn pool(&self, name: &str) -> Result<&Arc<ResourcePool>, PoolError> {
        self.pools
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| PoolError::UnknownPool(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.iter().map(|p| p.name().to_string()).collect()
    }

    /// Lease a unit from `name`, waiting for capacity
    pub async fn acquire(&self, name: &str) -> Result<ResourceHandle, PoolError> {
        let pool = self.pool(name)?;
        Ok(pool.acquire().await)
    }

    pub fn try_acquire(&self, name: &str) -> Result<Option<ResourceHandle>, PoolError> {
        Ok(self.pool(name)?.try_acquire())
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`
    pub async fn acquire_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<ResourceHandle, PoolError> {
        let pool = self.pool(name)?;
        tokio::time::timeout(timeout, pool.acquire())
            .await
            .map_err(|_| PoolError::Timeout {
                pool: name.to_string(),
                waited: timeout,
            })
    }

    pub fn release(&self, name: &str, handle: ResourceHandle) -> Result<(), PoolError> {
        self.pool(name)?.release(handle)
    }

    /// Rebalance every pool by utilization
    ///
    /// Only one rebalance runs at a time; a concurrent call returns no
    /// changes. Pools without activity since their last rebalance are left
    /// alone, so repeating the call is a no-op.
    pub fn rebalance(&self) -> Vec<CapacityChange> {
        let Some(_guard) = self.rebalance_lock.try_lock() else {
            debug!("Rebalance already in progress, skipping");
            return Vec::new();
        };

        let changes: Vec<CapacityChange> = self.pools.iter().filter_map(|p| p.rebalance()).collect();
        for change in &changes {
            info!(
                pool = %change.pool,
                from = change.from,
                to = change.to,
                "Pool capacity adjusted"
            );
        }

        self.metrics.set_pool_stats(&self.stats());
        changes
    }

    /// Grow one pool by `factor`
    pub fn expand(&self, name: &str, factor: f64) -> Result<Option<CapacityChange>, PoolError> {
        let change = self.pool(name)?.expand(factor);
        if let Some(ref c) = change {
            info!(pool = %c.pool, from = c.from, to = c.to, "Pool expanded");
        }
        Ok(change)
    }

    /// Grow every pool by `factor`
    pub fn expand_all(&self, factor: f64) -> Vec<CapacityChange> {
        self.pools.iter().filter_map(|p| p.expand(factor)).collect()
    }

    /// Reclaim the oldest `fraction` of leases in every pool
    pub fn reclaim(&self, fraction: f64) -> usize {
        self.pools.iter().map(|p| p.reclaim(fraction)).sum()
    }

    /// Mean utilization across pools
    pub fn efficiency(&self) -> f64 {
        if self.pools.is_empty() {
            return 0.0;
        }
        self.pools.iter().map(|p| p.utilization()).sum::<f64>() / self.pools.len() as f64
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(|p| p.stats()).collect()
    }

    /// Run the periodic rebalance loop until shutdown
    pub async fn run(self: Arc<Self>, rebalance_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = rebalance_interval.as_millis() as u64,
            pools = self.pools.len(),
            "Starting pool rebalance loop"
        );

        let mut ticker = interval(rebalance_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let changes = self.rebalance();
                    debug!(
                        changed = changes.len(),
                        efficiency = self.efficiency(),
                        "Rebalance cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down pool rebalance loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn manager() -> ResourcePoolManager {
        ResourcePoolManager::new(
            &[
                PoolDefinition::new("connections", 2, 1, 4),
                PoolDefinition::new("workers", 10, 2, 64),
            ],
            OptimizerMetrics::new(),
        )
    }

    #[test]
    fn test_unknown_pool() {
        let manager = manager();
        assert_eq!(
            manager.try_acquire("nope").unwrap_err(),
            PoolError::UnknownPool("nope".to_string())
        );
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let manager = manager();
        let a = manager.try_acquire("connections").unwrap().unwrap();
        let _b = manager.try_acquire("connections").unwrap().unwrap();

        let mut waiter = task::spawn(manager.acquire("connections"));
        assert_pending!(waiter.poll());

        manager.release("connections", a).unwrap();
        assert!(waiter.is_woken());
        let handle = assert_ready!(waiter.poll()).unwrap();
        assert_eq!(handle.pool(), "connections");
    }

    #[test]
    fn test_acquire_wakes_on_expansion() {
        let manager = manager();
        let _held: Vec<_> = (0..2)
            .map(|_| manager.try_acquire("connections").unwrap().unwrap())
            .collect();

        let mut waiter = task::spawn(manager.acquire("connections"));
        assert_pending!(waiter.poll());

        manager.expand("connections", 1.2).unwrap();
        assert!(waiter.is_woken());
        assert!(assert_ready!(waiter.poll()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout() {
        let manager = manager();
        let _held: Vec<_> = (0..2)
            .map(|_| manager.try_acquire("connections").unwrap().unwrap())
            .collect();

        let err = manager
            .acquire_timeout("connections", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout { .. }));
    }

    #[test]
    fn test_second_rebalance_is_noop() {
        let manager = manager();
        let _held: Vec<_> = (0..9)
            .map(|_| manager.try_acquire("workers").unwrap().unwrap())
            .collect();

        let first = manager.rebalance();
        assert!(first.iter().any(|c| c.pool == "workers" && c.to == 12));
        assert!(manager.rebalance().is_empty());
    }

    #[test]
    fn test_capacity_bounds_hold() {
        let manager = manager();
        let mut held = Vec::new();
        for _ in 0..20 {
            while let Some(h) = manager.try_acquire("connections").unwrap() {
                held.push(h);
            }
            manager.rebalance();
            for stats in manager.stats() {
                assert!(stats.in_use <= stats.capacity);
                assert!(stats.capacity <= stats.max_capacity);
                assert!(stats.capacity >= stats.min_capacity);
            }
        }
        assert_eq!(manager.pool("connections").unwrap().capacity(), 4);
    }

    #[test]
    fn test_efficiency_is_mean_utilization() {
        let manager = manager();
        let _c = manager.try_acquire("connections").unwrap().unwrap();
        // connections 1/2, workers 0/10
        assert!((manager.efficiency() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_release_to_wrong_pool_is_stale() {
        let manager = manager();
        let handle = manager.try_acquire("workers").unwrap().unwrap();
        assert!(matches!(
            manager.release("connections", handle),
            Err(PoolError::StaleHandle { .. })
        ));
    }
}
