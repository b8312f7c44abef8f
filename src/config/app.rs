//! Application configuration structures.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::source::DEFAULT_MAX_CONNECTIONS;

use super::collector::CollectorsConfig;
use super::validation::{ConfigError, expand_env_vars};

/// Default scrape port.
pub const DEFAULT_PORT: u16 = 9292;

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Scrape server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 9292).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Listen address; `bind` may be an IPv4 or IPv6 address.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if `bind` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!("invalid server bind address: '{}'", self.bind))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

// =============================================================================
// Source Configuration
// =============================================================================

/// Data source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connection URL; `${VAR}` and `${VAR:-default}` are expanded at load.
    pub url: String,

    /// Connection pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data.db".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scrape server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Data source configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// Inline query collectors.
    #[serde(default)]
    pub collectors: CollectorsConfig,

    /// Path to a directory with additional collector config files.
    #[serde(default)]
    pub collector_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Inline `query_file` paths resolve against the file's directory.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)?;

        config.source.url = expand_env_vars(&config.source.url);
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.collectors.resolve_query_files(base_dir)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.source.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source url cannot be empty".to_string(),
            ));
        }

        if self.source.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "source max_connections must be positive".to_string(),
            ));
        }

        self.collectors.validate()?;

        Ok(())
    }

    /// Load configuration including collector_path directory.
    ///
    /// If `collector_path` is specified, scans the directory for YAML files
    /// and merges their collector configurations after the inline ones.
    pub fn load_with_collector_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;

        if let Some(ref collector_dir) = config.collector_path {
            let additional = CollectorsConfig::load_from_dir(collector_dir)?;
            config.collectors = config.collectors.merge(additional);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::QueryConfig;

    fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("config.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 9292);
    }

    #[test]
    fn test_source_config_default() {
        let config = SourceConfig::default();
        assert_eq!(config.url, "sqlite:data.db");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = AppConfig {
            server: ServerConfig {
                bind: "127.0.0.1".to_string(),
                port: 9292,
            },
            source: SourceConfig::default(),
            collectors: CollectorsConfig {
                queries: vec![QueryConfig::new("bq_ndt_tests", "SELECT 1 AS value")],
            },
            collector_path: None,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let config = AppConfig {
            server: ServerConfig {
                bind: "0.0.0.0".to_string(),
                port: 0,
            },
            ..AppConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_bind_address() {
        let config = AppConfig {
            server: ServerConfig {
                bind: "not-an-ip".to_string(),
                port: 9292,
            },
            ..AppConfig::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server bind address")
        );
    }

    #[test]
    fn test_server_socket_addr_ipv6() {
        let server = ServerConfig {
            bind: "::".to_string(),
            port: 9292,
        };

        let addr = server.socket_addr().unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.to_string(), "[::]:9292");

        let config = AppConfig {
            server,
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_pool() {
        let config = AppConfig {
            source: SourceConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 0,
            },
            ..AppConfig::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("max_connections"));
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ndt.sql"), "SELECT 7 AS value").unwrap();
        let path = write_config(
            dir.path(),
            r#"
server:
  bind: 127.0.0.1
  port: 9393
source:
  url: "sqlite:${QE_APP_TEST_UNSET_DB:-warehouse.db}"
collectors:
  - name: bq_ndt_tests
    help: Current number of tests.
    query_file: ndt.sql
    interval: 15m
  - name: bq_daily
    query: SELECT 1 AS value
    cron: "0 0 * * * *"
"#,
        );

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9393);
        assert_eq!(config.source.url, "sqlite:warehouse.db");
        assert_eq!(config.source.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.collectors.queries.len(), 2);
        assert_eq!(
            config.collectors.queries[0].query.as_deref(),
            Some("SELECT 7 AS value")
        );
        assert_eq!(config.collectors.queries[1].cron.as_deref(), Some("0 0 * * * *"));
    }

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "collectors: []\n");

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.source.url, "sqlite:data.db");
        assert!(config.collectors.queries.is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_collector() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "collectors:\n  - name: bad-name\n    query: SELECT 1 AS value\n",
        );

        let result = AppConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load("/nonexistent/config.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_load_with_collector_path() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("collectors.d");
        std::fs::create_dir(&include).unwrap();
        std::fs::write(
            include.join("extra.yaml"),
            "- name: extra_rows\n  query: SELECT 2 AS value\n",
        )
        .unwrap();

        let path = write_config(
            dir.path(),
            &format!(
                "collector_path: {}\ncollectors:\n  - name: inline_rows\n    query: SELECT 1 AS value\n",
                include.display()
            ),
        );

        let config = AppConfig::load_with_collector_path(&path).unwrap();
        let names: Vec<_> = config.collectors.queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["inline_rows", "extra_rows"]);
    }

    #[test]
    fn test_load_with_collector_path_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("collectors.d");
        std::fs::create_dir(&include).unwrap();
        std::fs::write(
            include.join("dup.yaml"),
            "- name: rows\n  query: SELECT 2 AS value\n",
        )
        .unwrap();

        let path = write_config(
            dir.path(),
            &format!(
                "collector_path: {}\ncollectors:\n  - name: rows\n    query: SELECT 1 AS value\n",
                include.display()
            ),
        );

        let result = AppConfig::load_with_collector_path(&path);
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }
}
