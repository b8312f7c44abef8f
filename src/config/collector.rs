//! Collector configuration structures.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use prometheus::core::Desc;
use serde::{Deserialize, Serialize};

use crate::collector::QueryConfig;

use super::validation::ConfigError;

/// Query collector configurations, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectorsConfig {
    pub queries: Vec<QueryConfig>,
}

impl CollectorsConfig {
    /// Merge another CollectorsConfig into this one.
    #[must_use]
    pub fn merge(mut self, other: CollectorsConfig) -> Self {
        self.queries.extend(other.queries);
        self
    }

    /// Collectors with `enabled: true`.
    pub fn enabled(&self) -> impl Iterator<Item = &QueryConfig> {
        self.queries.iter().filter(|query| query.enabled)
    }

    /// Load `query_file` contents into `query`.
    ///
    /// Relative paths are resolved against `base_dir`. Must run once, right
    /// after parsing: afterwards both fields are set.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if a collector names both or
    /// neither of `query`/`query_file`, and `ConfigError::IoError` if a
    /// query file cannot be read.
    pub fn resolve_query_files(&mut self, base_dir: &Path) -> Result<(), ConfigError> {
        for config in &mut self.queries {
            match (&config.query, &config.query_file) {
                (Some(_), Some(_)) => {
                    return Err(ConfigError::ValidationError(format!(
                        "collector '{}': cannot specify both query and query_file",
                        config.name
                    )));
                }
                (None, None) => {
                    return Err(ConfigError::ValidationError(format!(
                        "collector '{}': one of query or query_file is required",
                        config.name
                    )));
                }
                (Some(_), None) => {}
                (None, Some(file)) => {
                    let path = resolve_path(base_dir, file);
                    tracing::debug!(
                        collector = %config.name,
                        "Loading query from: {}",
                        path.display()
                    );
                    config.query = Some(std::fs::read_to_string(&path)?);
                    config.query_file = Some(path);
                }
            }
        }
        Ok(())
    }

    /// Validate all collector configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = HashSet::new();

        for config in &self.queries {
            if config.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "collector name cannot be empty".to_string(),
                ));
            }
            // Label names are only known once rows arrive; name and help
            // are checked now.
            Desc::new(
                config.name.clone(),
                config.help.clone(),
                Vec::new(),
                HashMap::new(),
            )
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "collector '{}': invalid metric descriptor: {}",
                    config.name, e
                ))
            })?;
            if !seen_names.insert(&config.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate collector name: '{}'",
                    config.name
                )));
            }
            if config.query.as_deref().is_none_or(|q| q.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "collector '{}': query text is empty",
                    config.name
                )));
            }
            if config.interval.is_some() && config.cron.is_some() {
                return Err(ConfigError::ValidationError(format!(
                    "collector '{}': cannot specify both interval and cron",
                    config.name
                )));
            }
            if config.timeout.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "collector '{}': timeout must be positive",
                    config.name
                )));
            }
            config.schedule().map_err(|e| {
                ConfigError::ValidationError(format!("collector '{}': {}", config.name, e))
            })?;
        }

        Ok(())
    }

    /// Load collector configurations from all YAML files in a directory.
    ///
    /// Files are read in name order; `query_file` paths resolve against the
    /// directory.
    pub fn load_from_dir(dir_path: &str) -> Result<Self, ConfigError> {
        let dir = Path::new(dir_path);
        if !dir.exists() {
            return Err(ConfigError::ValidationError(format!(
                "collector_path '{}' does not exist",
                dir_path
            )));
        }
        if !dir.is_dir() {
            return Err(ConfigError::ValidationError(format!(
                "collector_path '{}' is not a directory",
                dir_path
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if path.is_file() && (ext == "yaml" || ext == "yml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged = Self::default();
        for path in paths {
            tracing::debug!("Loading collector config from: {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let mut file_config: Self = serde_yaml::from_str(&content).map_err(|e| {
                ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
            })?;
            file_config.resolve_query_files(dir)?;
            merged = merged.merge(file_config);
        }

        Ok(merged)
    }
}

fn resolve_path(base_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base_dir.join(file)
    }
}
