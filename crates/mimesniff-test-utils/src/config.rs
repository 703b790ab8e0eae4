//! Configuration builders for tests.

use std::path::PathBuf;

use mimesniff_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from the defaults with XDG discovery switched off, so tests only see
/// the databases they add.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .glob_file(dir.join("globs2"))
///     .max_workers(1)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.database.use_xdg_dirs = false;
        Self { config }
    }

    pub fn glob_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database.glob_files.push(path.into());
        self
    }

    pub fn magic_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database.magic_files.push(path.into());
        self
    }

    pub fn use_xdg_dirs(mut self, enabled: bool) -> Self {
        self.config.database.use_xdg_dirs = enabled;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.dispatcher.max_workers = n;
        self
    }

    pub fn cache_attribute(mut self, attr: &str) -> Self {
        self.config.dispatcher.cache_attribute = attr.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
