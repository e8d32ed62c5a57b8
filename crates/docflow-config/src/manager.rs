//! File + environment configuration manager

use std::path::PathBuf;

use config::{Config, Environment, File, FileFormat};

use crate::{
    error::Result,
    types::{ConfigManager, EngineConfig},
};

/// Loads [`EngineConfig`] from a TOML file layered under environment overrides.
///
/// Environment keys use a double underscore between sections, e.g.
/// `DOCFLOW__BATCHING__TOKEN_BUDGET=12000`.
pub struct FileConfigManager {
    /// Configuration file path
    config_path: PathBuf,
    /// Environment prefix
    env_prefix: String,
}

impl FileConfigManager {
    /// Create a manager reading the default config path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            env_prefix: "DOCFLOW".to_string(),
        }
    }

    /// Create with custom config path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            env_prefix: "DOCFLOW".to_string(),
        }
    }

    /// Override the environment prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Path the manager reads from and writes to
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docflow")
            .join("config.toml")
    }
}

impl ConfigManager for FileConfigManager {
    fn load_config(&self) -> Result<EngineConfig> {
        let builder = Config::builder()
            .add_source(
                File::from(self.config_path.clone())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            path = %self.config_path.display(),
            token_budget = config.batching.token_budget,
            max_items_per_batch = config.batching.max_items_per_batch,
            "Loaded engine configuration"
        );
        Ok(config)
    }

    fn save_config(&self, config: &EngineConfig) -> Result<()> {
        config.validate()?;
        let toml = toml::to_string(config)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, toml)?;
        Ok(())
    }
}

impl Default for FileConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
