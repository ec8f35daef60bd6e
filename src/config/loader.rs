//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in order:
//!
//! 1. Built-in defaults (every field is `#[serde(default)]`)
//! 2. Base file `delivery.{toml,yaml,json}` in the configuration directory
//! 3. Environment file `delivery.{environment}.{toml,yaml,json}`
//! 4. Explicit file passed to [`ConfigLoader::with_file`]
//! 5. `CHATFLOW__*` environment variables (`__` separates nested keys)
//!
//! The merged result is validated before it is returned.

use config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::FallbackConfig;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "CHATFLOW";
/// Separator for environment variable overrides
pub const ENV_SEPARATOR: &str = "__";
/// Stem of configuration file names
pub const CONFIG_FILE_STEM: &str = "delivery";

const CONFIG_EXTENSIONS: [&str; 3] = ["toml", "yaml", "json"];

/// Builder for layered configuration loading
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_directory: Option<PathBuf>,
    environment: Option<String>,
    explicit_file: Option<PathBuf>,
    env_overrides: Option<HashMap<String, String>>,
    skip_environment: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search `directory` for base and environment-specific files
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config_directory = Some(directory.into());
        self
    }

    /// Use an explicit environment name instead of detecting it
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Layer a specific file; it must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(path.into());
        self
    }

    /// Read overrides from this map instead of the process environment
    ///
    /// Keys use the same `CHATFLOW__...` form as real environment variables.
    /// Useful for testing without modifying global environment variables.
    pub fn with_env_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.env_overrides = Some(overrides);
        self
    }

    /// Ignore environment variable overrides entirely
    pub fn without_environment_overrides(mut self) -> Self {
        self.skip_environment = true;
        self
    }

    /// Merge all sources, deserialize and validate
    pub fn load(self) -> ConfigResult<FallbackConfig> {
        let environment = self
            .environment
            .clone()
            .unwrap_or_else(detect_environment);

        let mut builder = Config::builder();
        let mut loaded_files = Vec::new();

        if let Some(directory) = &self.config_directory {
            if let Some(base) = find_config_file(directory, CONFIG_FILE_STEM) {
                builder = builder.add_source(File::from(base.as_path()).required(true));
                loaded_files.push(base);
            }
            let env_stem = format!("{CONFIG_FILE_STEM}.{environment}");
            if let Some(overlay) = find_config_file(directory, &env_stem) {
                builder = builder.add_source(File::from(overlay.as_path()).required(true));
                loaded_files.push(overlay);
            }
        }

        if let Some(path) = &self.explicit_file {
            if !path.exists() {
                return Err(ConfigurationError::ConfigFileNotFound { path: path.clone() });
            }
            builder = builder.add_source(File::from(path.as_path()).required(true));
            loaded_files.push(path.clone());
        }

        if !self.skip_environment {
            let source = Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(self.env_overrides.clone());
            builder = builder.add_source(source);
        }

        let merged = builder
            .build()
            .map_err(|e| ConfigurationError::load_error(describe(&loaded_files), e))?;
        let config: FallbackConfig = merged
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error(describe(&loaded_files), e))?;

        config.validate()?;

        let effective = serde_json::to_string(&config)
            .unwrap_or_else(|_| "[serialization error]".to_string());
        debug!(config = %effective, "Effective delivery configuration");
        info!(
            environment = %environment,
            files = ?loaded_files,
            polling_interval_ms = config.polling_interval_ms,
            health_check_interval_ms = config.health_check_interval_ms,
            "Delivery configuration loaded"
        );

        Ok(config)
    }
}

/// Current environment from environment variables
pub fn detect_environment() -> String {
    env::var("CHATFLOW_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn find_config_file(directory: &Path, stem: &str) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| directory.join(format!("{stem}.{ext}")))
        .find(|candidate| candidate.is_file())
}

fn describe(files: &[PathBuf]) -> String {
    if files.is_empty() {
        "environment".to_string()
    } else {
        files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
