//! Configuration.
//!
//! Hierarchical loading from:
//! - `entiql.toml` (base configuration)
//! - `entiql.local.toml` (git-ignored local overrides)
//! - Environment variables (`ENTIQL_*` prefix, `__` section separator)
//!
//! ```toml
//! # entiql.toml
//! [evaluation]
//! caching = true
//! cartesian_warn_threshold = 20
//!
//! [logging]
//! level = "info"
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Evaluator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Enable the caching fast-paths (indexed caches, right-branch caches).
    #[serde(default = "default_true")]
    pub caching: bool,

    /// Warn when an unbound selected variable's domain exceeds this size;
    /// such a query performs a Cartesian product join.
    #[serde(default = "default_warn_threshold")]
    pub cartesian_warn_threshold: usize,
}

/// Logging configuration, consumed by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_warn_threshold() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig { caching: true, cartesian_warn_threshold: default_warn_threshold() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level(), format: default_log_format() }
    }
}

impl EngineConfig {
    /// Load configuration from the default locations.
    ///
    /// Merges in order: `entiql.toml`, `entiql.local.toml`, then `ENTIQL_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Figment::new()
            .merge(Toml::file("entiql.toml"))
            .merge(Toml::file("entiql.local.toml"))
            .merge(Env::prefixed("ENTIQL_").split("__"))
            .extract()
            .map_err(|e| Box::new(e).into())
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ENTIQL_").split("__"))
            .extract()
            .map_err(|e| Box::new(e).into())
    }
}
