//! Error types for the optimizer
//!
//! Only configuration errors are fatal, and only at construction time. Pool and
//! task errors stay scoped to the operation that produced them.

use std::time::Duration;
use thiserror::Error;

/// Invalid configuration detected by [`crate::config::OptimizerConfig::validate`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cache level {level} must have a non-zero {field}")]
    ZeroCacheLevel { level: usize, field: &'static str },

    #[error("cache level {lower} {field} ({lower_value}) must be below level {upper} ({upper_value})")]
    CacheLevelOrdering {
        lower: usize,
        upper: usize,
        field: &'static str,
        lower_value: u64,
        upper_value: u64,
    },

    #[error("max_capacity must be greater than zero")]
    ZeroCapacity,

    #[error("pool `{name}`: {reason}")]
    InvalidPool { name: String, reason: String },

    #[error("duplicate pool definition `{0}`")]
    DuplicatePool(String),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("invalid forecast horizon {0}h (expected 1..=168)")]
    InvalidHorizon(u32),

    #[error("at least one forecast horizon is required")]
    NoHorizons,

    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Errors returned by the resource pool manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("unknown resource pool `{0}`")]
    UnknownPool(String),

    #[error("handle {handle} is not an outstanding lease of pool `{pool}`")]
    StaleHandle { pool: String, handle: u64 },

    #[error("timed out after {waited:?} waiting for pool `{pool}`")]
    Timeout { pool: String, waited: Duration },
}

/// Failure of a single task, carried on its completion event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}
