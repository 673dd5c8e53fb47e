use anyhow::{bail, Result};
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Capacity of the status bus and the renderer channel. Matches the original
/// default so a stalled consumer applies back-pressure instead of losing
/// status updates.
pub const DEFAULT_STATUS_CHANNEL_CAPACITY: usize = 128;

const DEFAULT_LOG_DIR: &str = "_build/logs";
const DEFAULT_CACHE_DIR: &str = "_build/cache";
const SESSION_DIR_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Session configuration for one build run.
///
/// All instances must be constructed via [`Config::builder`] or [`Config::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    log_dir: PathBuf,
    cache_dir: PathBuf,
    module_path: String,
    version: String,
    print_config: bool,
    plain_progress: bool,
    import_env: HashMap<String, String>,
    status_channel_capacity: usize,
}

pub struct ConfigParams {
    pub log_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub module_path: String,
    pub version: String,
    pub print_config: bool,
    pub plain_progress: bool,
    pub import_env: HashMap<String, String>,
    pub status_channel_capacity: usize,
}

impl Config {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn new(params: ConfigParams) -> Result<Self> {
        let ConfigParams {
            log_dir,
            cache_dir,
            module_path,
            version,
            print_config,
            plain_progress,
            import_env,
            status_channel_capacity,
        } = params;

        let config = Self {
            log_dir,
            cache_dir,
            module_path: module_path.trim().to_owned(),
            version: version.trim().to_owned(),
            print_config,
            plain_progress,
            import_env,
            status_channel_capacity,
        };

        config.validate()?;
        Ok(config)
    }

    /// Root directory that session-scoped log directories are created under.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Root for content-addressed build caches, consumed by build scripts.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Module path shown in the printed header. Metadata only.
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// Version shown in the printed header. Metadata only.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether to print a one-time configuration header before the first target.
    pub fn print_config(&self) -> bool {
        self.print_config
    }

    /// Forces the flat renderer mode even on an interactive terminal.
    pub fn plain_progress(&self) -> bool {
        self.plain_progress
    }

    /// Externally supplied key/value overrides for the env-var registry.
    pub fn import_env(&self) -> &HashMap<String, String> {
        &self.import_env
    }

    pub fn status_channel_capacity(&self) -> usize {
        self.status_channel_capacity
    }

    /// Timestamp-named directory holding this session's per-target log files.
    pub fn session_log_dir(&self) -> PathBuf {
        self.log_dir
            .join(Local::now().format(SESSION_DIR_TIME_FORMAT).to_string())
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            bail!("log_dir cannot be empty");
        }

        if self.cache_dir.as_os_str().is_empty() {
            bail!("cache_dir cannot be empty");
        }

        if self.status_channel_capacity == 0 {
            bail!("status_channel_capacity must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    log_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    module_path: Option<String>,
    version: Option<String>,
    print_config: bool,
    plain_progress: bool,
    import_env: Option<HashMap<String, String>>,
    status_channel_capacity: Option<usize>,
}

impl ConfigBuilder {
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn module_path(mut self, path: impl Into<String>) -> Self {
        self.module_path = Some(path.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn print_config(mut self, print: bool) -> Self {
        self.print_config = print;
        self
    }

    pub fn plain_progress(mut self, plain: bool) -> Self {
        self.plain_progress = plain;
        self
    }

    pub fn import_env(mut self, imported: HashMap<String, String>) -> Self {
        self.import_env = Some(imported);
        self
    }

    pub fn status_channel_capacity(mut self, capacity: usize) -> Self {
        self.status_channel_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<Config> {
        let params = ConfigParams {
            log_dir: self
                .log_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            cache_dir: self
                .cache_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            module_path: self.module_path.unwrap_or_default(),
            version: self.version.unwrap_or_default(),
            print_config: self.print_config,
            plain_progress: self.plain_progress,
            import_env: self.import_env.unwrap_or_default(),
            status_channel_capacity: self
                .status_channel_capacity
                .unwrap_or(DEFAULT_STATUS_CHANNEL_CAPACITY),
        };

        Config::new(params)
    }
}
