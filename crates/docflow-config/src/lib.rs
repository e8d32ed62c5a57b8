//! DocFlow configuration
//!
//! Loads [`EngineConfig`] from a TOML file with `DOCFLOW__` environment
//! overrides, and validates batching and pipeline settings before the engine
//! is built from them.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use manager::FileConfigManager;
pub use types::{
    BatchingConfig, ConfigManager, EngineConfig, LoggingConfig, QueueConfig, StepConfig,
    StorageConfig,
};
