//! Configuration validation utilities.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
///
/// ```
/// use query_exporter::config::expand_env_vars;
///
/// assert_eq!(
///     expand_env_vars("sqlite:${QE_DOC_UNSET_DIR:-/var/lib}/data.db"),
///     "sqlite:/var/lib/data.db"
/// );
/// ```
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &Captures| {
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("sqlite:${QE_TEST_UNSET_PATH_9137:-metrics.db}");
        assert_eq!(result, "sqlite:metrics.db");
    }

    #[test]
    fn test_expand_env_vars_missing_without_default() {
        assert_eq!(expand_env_vars("a${QE_TEST_UNSET_VAR_4410}b"), "ab");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: only this test touches this variable.
        unsafe {
            std::env::set_var("QE_TEST_WAREHOUSE_DIR", "/data");
        }
        let result = expand_env_vars("sqlite:${QE_TEST_WAREHOUSE_DIR}/warehouse.db");
        assert_eq!(result, "sqlite:/data/warehouse.db");
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("QE_TEST_WAREHOUSE_DIR");
        }
    }
}
