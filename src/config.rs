//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::registry::JobRegistryOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Job registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    pub identifier_length: usize,
    /// Seconds a finished job may sit unpolled. 0 keeps jobs forever.
    pub idle_eviction_secs: u64,
    pub sweep_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// One of "json", "pretty" or "compact"
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        let registry = JobRegistryOptions::default();
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9002,
            },
            jobs: JobsConfig {
                identifier_length: registry.identifier_length,
                idle_eviction_secs: registry
                    .idle_eviction_threshold
                    .map(|t| t.as_secs())
                    .unwrap_or(0),
                sweep_interval_secs: registry.sweep_interval.as_secs(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
            },
        }
    }
}

impl Config {
    /// Loads the defaults, then `config/vuln-jobs.*` if present, then any
    /// `VULN_JOBS__<SECTION>__<KEY>` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_from(
            config::Environment::with_prefix("VULN_JOBS")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn load_from(environment: config::Environment) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Config::default())?;

        let loaded: Config = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name("config/vuln-jobs").required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        Ok(loaded)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl JobsConfig {
    pub fn registry_options(&self) -> JobRegistryOptions {
        JobRegistryOptions {
            identifier_length: self.identifier_length,
            idle_eviction_threshold: match self.idle_eviction_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}
