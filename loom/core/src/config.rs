//! Application Configuration
//!
//! Loaded from a TOML file (XDG config directory by default) and/or the
//! environment; environment variables override file values.
//!
//! # Environment Variables
//!
//! - `SERVER_ADDR`: generation backend address (required when no file)
//! - `DEBUG`: any non-empty value enables debug behavior
//! - `MOCK`: any non-empty value switches to the mock token producer
//! - `MOCK_NODE_AMOUNT`: number of nodes to seed the mock tree with

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::settings::GenerationSettings;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No server address in the environment or config file.
    #[error("missing SERVER_ADDR environment variable")]
    MissingServerAddress,
    /// A variable was present but unparsable.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// The offending variable name.
        key: &'static str,
        /// The raw value.
        value: String,
    },
    /// Failed to read the config file.
    #[error("failed to read config file {path}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse the config file.
    #[error("failed to parse config file {path}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level application configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address of the generation backend (host:port).
    pub server_address: String,
    /// Verbose/debug behavior.
    #[serde(default)]
    pub debug: bool,
    /// Use the mock token producer instead of a real backend.
    #[serde(default)]
    pub mock: bool,
    /// Seed the mock tree with this many nodes.
    #[serde(default)]
    pub mock_node_amount: Option<usize>,
    /// Sampling parameters for generation requests.
    #[serde(default)]
    pub generation: GenerationSettings,
}

impl Config {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a config from a TOML file, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_address = lookup("SERVER_ADDR").ok_or(ConfigError::MissingServerAddress)?;
        let mut config = Self {
            server_address,
            debug: false,
            mock: false,
            mock_node_amount: None,
            generation: GenerationSettings::llama_defaults(),
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("SERVER_ADDR") {
            self.server_address = address;
        }
        if let Some(value) = lookup("DEBUG") {
            self.debug = !value.is_empty();
        }
        if let Some(value) = lookup("MOCK") {
            self.mock = !value.is_empty();
        }
        if let Some(value) = lookup("MOCK_NODE_AMOUNT") {
            let amount = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "MOCK_NODE_AMOUNT",
                    value,
                })?;
            self.mock_node_amount = Some(amount);
        }
        Ok(())
    }
}

/// Default config file location (`$XDG_CONFIG_HOME/loom/loom.toml`).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("loom").join("loom.toml"))
}
