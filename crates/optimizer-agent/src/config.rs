//! Agent configuration

use anyhow::{Context, Result};
use optimizer_lib::OptimizerConfig;
use serde::Deserialize;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "OPTIMIZER_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name, also stamped on every structured log line
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health, metrics and reports
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "local".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional config file and environment
    ///
    /// Nested keys use a double underscore, e.g.
    /// `OPTIMIZER_OPTIMIZER__MAX_CAPACITY=200`.
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::from_sources(file.as_deref())
    }

    pub fn from_sources(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("OPTIMIZER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read agent configuration")?;

        let mut agent: AgentConfig = config
            .try_deserialize()
            .context("invalid agent configuration")?;
        agent.optimizer.node_name = agent.node_name.clone();
        agent
            .optimizer
            .validate()
            .context("invalid optimizer configuration")?;
        Ok(agent)
    }
}
