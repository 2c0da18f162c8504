//! Configuration management for the Qualtrics ETL services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Qualtrics API configuration
    pub qualtrics: QualtricsConfig,

    /// Extract file storage configuration
    pub storage: StorageConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualtricsConfig {
    /// Static API token sent with every request
    pub api_token: String,

    /// Data center subdomain, e.g. "syd1" or "fra1"
    pub data_center: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Sleep between export status checks in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub export_poll_interval_ms: u64,

    /// Ceiling on total time spent polling one export in seconds
    #[serde(default = "default_poll_max_secs")]
    pub export_poll_max_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory extract files are written to
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Prefix for generated extract file names
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 300 }
fn default_request_timeout() -> u64 { 30 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_poll_max_secs() -> u64 { 300 }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_file_prefix() -> String { "qualtrics_data".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "qualtrics-etl".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__QUALTRICS__DATA_CENTER=syd1
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations that would only fail later at first use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qualtrics.api_token.trim().is_empty() {
            return Err(ConfigError::Message(
                "qualtrics.api_token must not be empty".to_string(),
            ));
        }
        if self.qualtrics.data_center.trim().is_empty() {
            return Err(ConfigError::Message(
                "qualtrics.data_center must not be empty".to_string(),
            ));
        }
        if self.database.min_connections < 1 {
            return Err(ConfigError::Message(
                "database.min_connections must be at least 1".to_string(),
            ));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "database.max_connections must be >= database.min_connections".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the Qualtrics request timeout as Duration
    pub fn qualtrics_request_timeout(&self) -> Duration {
        Duration::from_secs(self.qualtrics.request_timeout_secs)
    }

    /// Get the export status poll interval as Duration
    pub fn export_poll_interval(&self) -> Duration {
        Duration::from_millis(self.qualtrics.export_poll_interval_ms)
    }

    /// Get the export polling ceiling as Duration
    pub fn export_poll_max(&self) -> Duration {
        Duration::from_secs(self.qualtrics.export_poll_max_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/qualtrics_etl".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            qualtrics: QualtricsConfig {
                api_token: String::new(),
                data_center: "syd1".to_string(),
                request_timeout_secs: default_request_timeout(),
                export_poll_interval_ms: default_poll_interval_ms(),
                export_poll_max_secs: default_poll_max_secs(),
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
                file_prefix: default_file_prefix(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                service_name: default_service_name(),
            },
        }
    }
}
