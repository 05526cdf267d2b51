//! Adaptive processing optimizer
//!
//! This crate provides the core functionality for:
//! - Metric collection and trend analysis
//! - A three-level adaptive cache
//! - Priority scheduling with admission control
//! - Elastic resource pools
//! - Time-of-week load forecasting
//! - Rule-based runtime optimization
//! - Health checks and observability

pub mod cache;
pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod forecast;
pub mod health;
pub mod models;
pub mod observability;
pub mod optimizer;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod stats;

pub use cache::{CacheStats, CacheTier, TieredCache};
pub use config::OptimizerConfig;
pub use controller::{AppliedAction, FlagSnapshot, OptimizationRule};
pub use error::{ConfigError, PoolError, TaskError};
pub use forecast::ForecastSummary;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
pub use optimizer::Optimizer;
pub use pool::ResourceHandle;
pub use report::OptimizationReport;
pub use scheduler::{QueueDepths, TaskSpec};
