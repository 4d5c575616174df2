//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod discovery;
mod server;
mod storage;

pub use discovery::{
    DiscoveryConfig, DEFAULT_PORT_ANNOTATION, DEFAULT_RPC_PORT, DEFAULT_SCRAPE_ANNOTATION,
};
pub use server::WorkerConfig;
pub use storage::StorageConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TOPOMESH_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TOPOMESH";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TOPOMESH_LOG";

use serde::Deserialize;

/// Errors raised while assembling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pod discovery and reconciliation settings.
    pub discovery: DiscoveryConfig,
    /// Topology store settings.
    pub storage: StorageConfig,
    /// Worker-side RPC server settings.
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the control plane spin or never scrape.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "discovery.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.discovery.scrape_deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "discovery.scrape_deadline_secs must be greater than zero".to_string(),
            ));
        }
        if self.discovery.scrape_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "discovery.scrape_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.worker.stream_buffer == 0 {
            return Err(ConfigError::Invalid(
                "worker.stream_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.discovery.interval(), Duration::from_secs(30));
        assert_eq!(config.discovery.scrape_deadline(), Duration::from_secs(120));
        assert_eq!(config.discovery.default_port, 9090);
        assert_eq!(config.discovery.scrape_annotation, "topomesh.io/scrape");
        assert_eq!(config.discovery.port_annotation, "topomesh.io/port");
        assert!(config.discovery.namespace.is_none());
        assert_eq!(config.storage.sqlite_path, "./data/topology.db");
        assert_eq!(config.worker.port, 9090);
    }

    #[test]
    fn test_config_for_test_is_valid() {
        assert!(Config::for_test().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::for_test();
        config.discovery.interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_blank_namespace_means_all() {
        let mut config = Config::for_test();
        assert_eq!(config.discovery.pod_namespace(), None);
        config.discovery.namespace = Some("  ".to_string());
        assert_eq!(config.discovery.pod_namespace(), None);
        config.discovery.namespace = Some("streams".to_string());
        assert_eq!(config.discovery.pod_namespace().as_deref(), Some("streams"));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topomesh.yaml");
        std::fs::write(
            &path,
            "discovery:\n  interval_secs: 5\n  default_port: 7000\nstorage:\n  sqlite_path: /tmp/t.db\n",
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.discovery.interval_secs, 5);
        assert_eq!(config.discovery.default_port, 7000);
        // untouched fields keep their defaults
        assert_eq!(config.discovery.scrape_deadline_secs, 120);
        assert_eq!(config.storage.sqlite_path, "/tmp/t.db");
    }
}
