use crate::models::ReloadConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use ::config::{Config, Environment, File, FileFormat};
use std::fs;

/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE: &str = "reload.yaml";

/// Prefix of environment overrides, e.g. `PROJECT_RELOAD__RELOAD__MAX_RETRIES=3`.
pub const ENV_PREFIX: &str = "PROJECT_RELOAD";

/// Loads and saves [`ReloadConfig`].
///
/// Values are layered: built-in defaults, then `reload.yaml` in the
/// configuration directory if present, then environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE),
            config_dir,
        })
    }

    /// Load the configuration.
    ///
    /// # Returns
    /// The layered configuration; defaults fill in anything not set
    pub fn load_config(&self) -> Result<ReloadConfig> {
        if !self.config_path.exists() {
            tracing::debug!(
                "Config file not found at {}, using defaults and environment",
                self.config_path
            );
        }

        let config: ReloadConfig = Config::builder()
            .add_source(File::new(self.config_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_dir);
        Ok(config)
    }

    /// Save the configuration file.
    pub fn save_config(&self, config: &ReloadConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}
