//! Probe with explicitly set readings
//!
//! For hosts that already have their own instrumentation and push values
//! in, and for tests. Readings change only when set.

use super::SystemProbe;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Probe returning whatever was last stored
#[derive(Debug)]
pub struct StaticProbe {
    cpu_bits: AtomicU64,
    memory_bits: AtomicU64,
    failing: AtomicBool,
}

impl StaticProbe {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu_bits: AtomicU64::new(cpu_percent.to_bits()),
            memory_bits: AtomicU64::new(memory_percent.to_bits()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_cpu(&self, percent: f64) {
        self.cpu_bits.store(percent.to_bits(), Ordering::SeqCst);
    }

    pub fn set_memory(&self, percent: f64) {
        self.memory_bits.store(percent.to_bits(), Ordering::SeqCst);
    }

    /// Make every read fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("metric source unavailable");
        }
        Ok(())
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[async_trait]
impl SystemProbe for StaticProbe {
    async fn cpu_percent(&self) -> Result<f64> {
        self.check()?;
        Ok(f64::from_bits(self.cpu_bits.load(Ordering::SeqCst)))
    }

    async fn memory_percent(&self) -> Result<f64> {
        self.check()?;
        Ok(f64::from_bits(self.memory_bits.load(Ordering::SeqCst)))
    }
}
