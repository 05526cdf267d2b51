//! Host metrics from the proc filesystem
//!
//! Reads:
//! - /proc/stat for CPU busy time (percent of ticks since the previous read)
//! - /proc/meminfo for memory in use (1 - MemAvailable / MemTotal)

use super::SystemProbe;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

/// Cumulative CPU tick counters from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

/// Probe backed by `/proc`
pub struct ProcfsProbe {
    proc_path: PathBuf,
    previous: Mutex<Option<CpuTimes>>,
}

impl ProcfsProbe {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create a probe reading from a custom proc root (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            previous: Mutex::new(None),
        }
    }

    /// Parse the aggregate `cpu` line of /proc/stat
    ///
    /// idle time includes iowait.
    pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .context("no aggregate cpu line in /proc/stat")?;

        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if fields.len() < 4 {
            anyhow::bail!("truncated cpu line in /proc/stat: {}", line);
        }

        // guest and guest_nice are already counted in user and nice
        let total: u64 = fields.iter().take(8).sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);

        Ok(CpuTimes { total, idle })
    }

    /// Parse /proc/meminfo into kB values keyed by field name
    pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
        let mut stats = HashMap::new();

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                if let Ok(value) = value.parse::<u64>() {
                    stats.insert(name.trim_end_matches(':').to_string(), value);
                }
            }
        }

        stats
    }

    /// Memory in use as a percentage of MemTotal
    pub fn memory_percent_from(stats: &HashMap<String, u64>) -> Result<f64> {
        let total = stats
            .get("MemTotal")
            .copied()
            .filter(|t| *t > 0)
            .context("MemTotal missing from /proc/meminfo")?;

        let available = match stats.get("MemAvailable") {
            Some(v) => *v,
            // Kernels before 3.14 have no MemAvailable
            None => ["MemFree", "Buffers", "Cached"]
                .iter()
                .filter_map(|k| stats.get(*k))
                .sum(),
        };

        let used = total.saturating_sub(available);
        Ok(used as f64 / total as f64 * 100.0)
    }

    /// Busy percentage between two readings
    pub fn busy_percent(previous: Option<CpuTimes>, current: CpuTimes) -> f64 {
        let (total, idle) = match previous {
            Some(prev) if current.total > prev.total => (
                current.total - prev.total,
                current.idle.saturating_sub(prev.idle),
            ),
            _ => (current.total, current.idle),
        };
        if total == 0 {
            return 0.0;
        }
        (total.saturating_sub(idle) as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemProbe for ProcfsProbe {
    async fn cpu_percent(&self) -> Result<f64> {
        let path = self.proc_path.join("stat");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let current = Self::parse_cpu_times(&content)?;

        let previous = self.previous.lock().replace(current);
        Ok(Self::busy_percent(previous, current))
    }

    async fn memory_percent(&self) -> Result<f64> {
        let path = self.proc_path.join("meminfo");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::memory_percent_from(&Self::parse_meminfo(&content))
    }
}
