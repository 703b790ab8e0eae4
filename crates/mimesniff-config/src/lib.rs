#![deny(unsafe_code)]

//! Configuration loading and validation for mimesniff.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure: which rule databases to load, how the
//! request dispatcher is sized, and how verbose logging is.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Rule database locations.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Background request dispatcher settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where glob and magic rule databases come from.
///
/// Explicit files are loaded first, in order. When `use_xdg_dirs` is set the
/// `mime/globs2` and `mime/magic` files found under the XDG data directories
/// are loaded afterwards. Files loaded later never override earlier entries.
///
/// ## TOML Example
///
/// ```toml
/// [database]
/// glob_files = ["/opt/app/share/mime/globs2"]
/// magic_files = ["/opt/app/share/mime/magic"]
/// use_xdg_dirs = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Glob databases (`weight:mime:pattern` lines).
    #[serde(default)]
    pub glob_files: Vec<PathBuf>,

    /// Binary magic databases (`MIME-Magic\0\n` signature).
    #[serde(default)]
    pub magic_files: Vec<PathBuf>,

    /// Also search `$XDG_DATA_HOME` and `$XDG_DATA_DIRS`.
    #[serde(default = "default_use_xdg_dirs")]
    pub use_xdg_dirs: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            glob_files: Vec::new(),
            magic_files: Vec::new(),
            use_xdg_dirs: default_use_xdg_dirs(),
        }
    }
}

fn default_use_xdg_dirs() -> bool {
    true
}

/// Configuration for the background request dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of classifications running at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Extended attribute consulted before running the matchers.
    /// An empty string disables the cache probe.
    #[serde(default = "default_cache_attribute")]
    pub cache_attribute: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            cache_attribute: default_cache_attribute(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_cache_attribute() -> String {
    "user.mime_type".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.max_workers == 0 {
            return Err(ConfigError::Validation(
                "dispatcher.max_workers must be at least 1".to_string(),
            ));
        }

        let attr = &self.dispatcher.cache_attribute;
        if !attr.is_empty() && !attr.starts_with("user.") {
            return Err(ConfigError::Validation(format!(
                "dispatcher.cache_attribute must be empty or start with \"user.\", got {attr:?}"
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        for (i, path) in self.database.glob_files.iter().enumerate() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "database.glob_files[{i}] must not be empty"
                )));
            }
        }
        for (i, path) in self.database.magic_files.iter().enumerate() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "database.magic_files[{i}] must not be empty"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.database.glob_files.is_empty());
        assert!(config.database.use_xdg_dirs);
        assert_eq!(config.dispatcher.max_workers, 4);
        assert_eq!(config.dispatcher.cache_attribute, "user.mime_type");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.dispatcher.max_workers, 4);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [database]
            glob_files = ["/opt/mime/globs2", "/opt/extra/globs2"]
            magic_files = ["/opt/mime/magic"]
            use_xdg_dirs = false

            [dispatcher]
            max_workers = 8
            cache_attribute = "user.xdg.mime"

            [logging]
            level = "debug"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.database.glob_files.len(), 2);
        assert_eq!(
            config.database.magic_files[0],
            PathBuf::from("/opt/mime/magic")
        );
        assert!(!config.database.use_xdg_dirs);
        assert_eq!(config.dispatcher.max_workers, 8);
        assert_eq!(config.dispatcher.cache_attribute, "user.xdg.mime");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_cache_attribute_disables_probe() {
        let toml = r#"
            [dispatcher]
            cache_attribute = ""
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert!(config.dispatcher.cache_attribute.is_empty());
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let toml = r#"
            [dispatcher]
            max_workers = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_foreign_attribute_namespace() {
        let toml = r#"
            [dispatcher]
            cache_attribute = "security.selinux"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let toml = r#"
            [logging]
            level = "loud"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_database_path() {
        let toml = r#"
            [database]
            magic_files = [""]
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[test_log::test(tokio::test)]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mimesniff.toml");
        tokio::fs::write(&path, b"[dispatcher]\nmax_workers = 2\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.dispatcher.max_workers, 2);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/file.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
