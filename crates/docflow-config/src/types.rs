//! Core configuration types and data structures

use std::collections::HashSet;
use std::path::PathBuf;

use docflow_common::{LogLevel, LogOptions};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Batch packing limits
    pub batching: BatchingConfig,
    /// Synthetic task options applied to every new queue
    pub queue: QueueConfig,
    /// Logging setup
    pub logging: LoggingConfig,
    /// Snapshot storage
    pub storage: StorageConfig,
    /// Pipeline step declarations; the built-in documentation pipeline is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Vec<StepConfig>>,
}

/// Batch packing limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchingConfig {
    /// Approximate token ceiling per batch
    pub token_budget: usize,
    /// Maximum number of work items per batch
    pub max_items_per_batch: usize,
    /// Characters per token used by the token estimator
    pub chars_per_token: usize,
}

/// Queue options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct QueueConfig {
    /// Add an analysis task ahead of the first batch
    pub analysis_task: bool,
    /// Add a summary task after the last batch
    pub summary_task: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit ANSI colour codes
    pub ansi: bool,
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one snapshot file per workflow
    pub state_dir: PathBuf,
}

/// A declared pipeline step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepConfig {
    /// Step id (1-based in the documentation pipeline)
    pub id: u32,
    /// Human readable name
    pub name: String,
    /// Predecessor step ids
    #[serde(default)]
    pub depends_on: Vec<u32>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            token_budget: 8000,
            max_items_per_batch: 20,
            chars_per_token: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("docflow")
                .join("workflows"),
        }
    }
}

impl LoggingConfig {
    /// Convert into options for `docflow_common::logging::init`
    pub fn log_options(&self) -> Result<LogOptions> {
        let level: LogLevel = self
            .level
            .parse()
            .map_err(|e: docflow_common::logging::LoggingError| {
                ConfigError::Validation(e.to_string())
            })?;

        Ok(LogOptions {
            level,
            ansi: self.ansi,
            with_target: false,
        })
    }
}

impl EngineConfig {
    /// Check limits and pipeline declarations.
    ///
    /// Cycle detection happens when the engine builds its pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.batching.token_budget == 0 {
            return Err(ConfigError::Validation(
                "batching.token_budget must be greater than 0".to_string(),
            ));
        }
        if self.batching.max_items_per_batch == 0 {
            return Err(ConfigError::Validation(
                "batching.max_items_per_batch must be greater than 0".to_string(),
            ));
        }
        if self.batching.chars_per_token == 0 {
            return Err(ConfigError::Validation(
                "batching.chars_per_token must be greater than 0".to_string(),
            ));
        }

        self.logging.log_options()?;

        if let Some(steps) = &self.pipeline {
            if steps.is_empty() {
                return Err(ConfigError::Validation(
                    "pipeline must declare at least one step".to_string(),
                ));
            }

            let mut seen = HashSet::new();
            for step in steps {
                if !seen.insert(step.id) {
                    return Err(ConfigError::Validation(format!(
                        "duplicate pipeline step id {}",
                        step.id
                    )));
                }
            }

            for step in steps {
                if let Some(missing) = step.depends_on.iter().find(|dep| !seen.contains(dep)) {
                    return Err(ConfigError::Validation(format!(
                        "step {} depends on undeclared step {}",
                        step.id, missing
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Configuration manager trait
pub trait ConfigManager {
    /// Load configuration
    fn load_config(&self) -> Result<EngineConfig>;
    /// Save configuration
    fn save_config(&self, config: &EngineConfig) -> Result<()>;
}
