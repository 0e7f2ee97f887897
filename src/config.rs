//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `PERFTEST_*` environment overrides;
//! command-line flags are applied last by the binary.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::loadgen::LoadConfig;
use crate::query::EngineConfig;
use crate::report::ReportConfig;
use crate::scrape::ScrapeConfig;
use crate::storage::StoreConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scrape: ScrapeSettings,

    #[serde(default)]
    pub load: LoadSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub report: ReportSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metrics endpoint scraping
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScrapeSettings {
    /// Metrics endpoint URL
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_scrape_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_scrape_timeout")]
    pub timeout_secs: u64,

    /// Instant query logged after every scrape
    #[serde(default = "default_scrape_query")]
    pub query: Option<String>,
}

fn default_scrape_interval() -> u64 {
    10
}

fn default_scrape_timeout() -> u64 {
    5
}

fn default_scrape_query() -> Option<String> {
    Some("jvm_memory_bytes_used".to_string())
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            interval_secs: default_scrape_interval(),
            timeout_secs: default_scrape_timeout(),
            query: default_scrape_query(),
        }
    }
}

/// Generated traffic
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadSettings {
    /// Target URL
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_duration")]
    pub duration_minutes: u64,

    #[serde(default = "default_vhosts")]
    pub vhosts: usize,

    #[serde(default = "default_vhost_prefix")]
    pub vhost_prefix: String,

    #[serde(default = "default_parallel")]
    pub parallel: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_duration() -> u64 {
    5
}

fn default_vhosts() -> usize {
    5
}

fn default_vhost_prefix() -> String {
    "galeb-test".to_string()
}

fn default_parallel() -> usize {
    5
}

fn default_request_timeout() -> u64 {
    10
}

fn default_probe_interval() -> u64 {
    30
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            duration_minutes: default_duration(),
            vhosts: default_vhosts(),
            vhost_prefix: default_vhost_prefix(),
            parallel: default_parallel(),
            request_timeout_secs: default_request_timeout(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

/// Store and query engine limits
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,

    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_step")]
    pub default_step_secs: u64,

    /// How long a writer waits for the store lock
    #[serde(default = "default_writer_wait")]
    pub writer_wait_secs: u64,
}

fn default_lookback() -> u64 {
    300
}

fn default_max_samples() -> usize {
    50_000_000
}

fn default_query_timeout() -> u64 {
    10
}

fn default_step() -> u64 {
    15
}

fn default_writer_wait() -> u64 {
    5
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lookback_secs: default_lookback(),
            max_samples: default_max_samples(),
            query_timeout_secs: default_query_timeout(),
            default_step_secs: default_step(),
            writer_wait_secs: default_writer_wait(),
        }
    }
}

/// Report output
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_window")]
    pub window_minutes: u64,
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_window() -> u64 {
    60
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            window_minutes: default_window(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("perftest").join("config.toml")),
            Some(PathBuf::from("/etc/perftest/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `PERFTEST_*` environment overrides to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>, target: &mut T) {
            if let Some(v) = value.and_then(|v| v.parse().ok()) {
                *target = v;
            }
        }

        // Scrape overrides
        if let Some(url) = lookup("PERFTEST_METRICS_URL") {
            self.scrape.url = url;
        }
        parsed(lookup("PERFTEST_SCRAPE_INTERVAL"), &mut self.scrape.interval_secs);
        if let Some(query) = lookup("PERFTEST_QUERY") {
            self.scrape.query = if query.is_empty() { None } else { Some(query) };
        }

        // Load overrides
        if let Some(endpoint) = lookup("PERFTEST_ENDPOINT") {
            self.load.endpoint = endpoint;
        }
        parsed(lookup("PERFTEST_DURATION"), &mut self.load.duration_minutes);
        parsed(lookup("PERFTEST_VHOSTS"), &mut self.load.vhosts);
        parsed(lookup("PERFTEST_PARALLEL"), &mut self.load.parallel);

        // Report overrides
        if let Some(dir) = lookup("PERFTEST_REPORT_DIR") {
            self.report.output_dir = dir;
        }

        // Logging overrides
        if let Some(level) = lookup("PERFTEST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("PERFTEST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject settings that cannot drive a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scrape.interval_secs == 0 {
            return Err(ConfigError::Invalid("scrape.interval_secs must be positive".into()));
        }
        if self.scrape.timeout_secs == 0 {
            return Err(ConfigError::Invalid("scrape.timeout_secs must be positive".into()));
        }
        if self.load.vhosts == 0 {
            return Err(ConfigError::Invalid("load.vhosts must be at least 1".into()));
        }
        if self.engine.default_step_secs == 0 {
            return Err(ConfigError::Invalid("engine.default_step_secs must be positive".into()));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }

    pub fn scrape_config(&self) -> ScrapeConfig {
        ScrapeConfig {
            interval: Duration::from_secs(self.scrape.interval_secs),
            fetch_timeout: Duration::from_secs(self.scrape.timeout_secs),
            query: self.scrape.query.clone(),
        }
    }

    pub fn load_config(&self) -> LoadConfig {
        LoadConfig {
            endpoint: self.load.endpoint.clone(),
            vhosts: self.load.vhosts,
            vhost_prefix: self.load.vhost_prefix.clone(),
            parallel: self.load.parallel,
            probe_interval: Duration::from_secs(self.load.probe_interval_secs),
            request_timeout: Duration::from_secs(self.load.request_timeout_secs),
            ..LoadConfig::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_lookback(Duration::from_secs(self.engine.lookback_secs))
            .with_max_samples(self.engine.max_samples)
            .with_timeout(Duration::from_secs(self.engine.query_timeout_secs))
            .with_default_step(Duration::from_secs(self.engine.default_step_secs))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new().with_writer_wait(Duration::from_secs(self.engine.writer_wait_secs))
    }

    pub fn report_config(&self) -> ReportConfig {
        ReportConfig::new(&self.report.output_dir)
            .with_window(Duration::from_secs(self.report.window_minutes * 60))
    }

    /// Length of the load phase
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.load.duration_minutes * 60)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# perftest Configuration
#
# Environment variables override these settings:
# - PERFTEST_METRICS_URL
# - PERFTEST_SCRAPE_INTERVAL
# - PERFTEST_QUERY
# - PERFTEST_ENDPOINT
# - PERFTEST_DURATION
# - PERFTEST_VHOSTS
# - PERFTEST_PARALLEL
# - PERFTEST_REPORT_DIR
# - PERFTEST_LOG_LEVEL
# - PERFTEST_LOG_FORMAT

[scrape]
# Metrics endpoint (Prometheus text or OpenMetrics)
url = ""

# Seconds between scrapes
interval_secs = 10

# Per-scrape deadline (seconds)
timeout_secs = 5

# Instant query logged after every scrape
query = "jvm_memory_bytes_used"

[load]
# Endpoint receiving the generated traffic
endpoint = ""

# Test duration (minutes)
duration_minutes = 5

# Number of virtual hosts, named <vhost_prefix>-<n>
vhosts = 5
vhost_prefix = "galeb-test"

# Concurrent request workers, one request per second each
parallel = 5

# Per-request deadline (seconds)
request_timeout_secs = 10

# Seconds between __ping__ / __info__ probes
probe_interval_secs = 30

[engine]
# How far back an instant selector looks for a sample (seconds)
lookback_secs = 300

# Samples a single query may load
max_samples = 50000000

# Query deadline (seconds)
query_timeout_secs = 10

# Range query resolution (seconds)
default_step_secs = 15

# How long a scrape waits for the store write lock (seconds)
writer_wait_secs = 5

[report]
# Parent directory of report_<timestamp>/
output_dir = "."

# Charted window (minutes)
window_minutes = 60

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
