//! Configuration module for the restore split client
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use br_core::StoreId;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Metadata service configuration
    #[serde(default)]
    pub pd: PdConfig,
    /// TLS configuration
    #[serde(default)]
    pub security: SecurityConfig,
    /// Split and scatter configuration
    #[serde(default)]
    pub split: SplitConfig,
    /// Online restore configuration
    #[serde(default)]
    pub online: OnlineConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.pd.merge(other.pd);
        self.security.merge(other.security);
        self.split.merge(other.split);
        self.online.merge(other.online);
        self.log.merge(other.log);
    }
}

/// Metadata service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdConfig {
    /// Metadata service addresses
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// gRPC connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for PdConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl PdConfig {
    fn merge(&mut self, other: Self) {
        if !other.endpoints.is_empty() {
            self.endpoints = other.endpoints;
        }
        if other.request_timeout_secs > 0 {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.connect_timeout_secs > 0 {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// TLS configuration
///
/// TLS is enabled as soon as `ca_path` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// CA certificate (PEM)
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// Client certificate (PEM)
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// Client private key (PEM)
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl SecurityConfig {
    fn merge(&mut self, other: Self) {
        if other.ca_path.is_some() {
            self.ca_path = other.ca_path;
        }
        if other.cert_path.is_some() {
            self.cert_path = other.cert_path;
        }
        if other.key_path.is_some() {
            self.key_path = other.key_path;
        }
    }
}

/// Split and scatter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Regions fetched per scan request
    #[serde(default = "default_scan_region_batch")]
    pub scan_region_batch: usize,
    /// Attempts of the whole scan/split round
    #[serde(default = "default_split_retry_times")]
    pub split_retry_times: usize,
    /// Initial backoff between split rounds in milliseconds
    #[serde(default = "default_split_retry_interval_ms")]
    pub split_retry_interval_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_split_max_retry_interval_ms")]
    pub split_max_retry_interval_ms: u64,
    /// Attempts of a paginated scan that came back inconsistent
    #[serde(default = "default_scan_retry_times")]
    pub scan_retry_times: usize,
    /// Regions split in parallel
    #[serde(default = "default_split_concurrency")]
    pub split_concurrency: usize,
    /// Wait for scatter operators to finish
    #[serde(default)]
    pub wait_for_scatter: bool,
    /// Upper bound of the scatter wait in seconds
    #[serde(default = "default_scatter_wait_upper_secs")]
    pub scatter_wait_upper_secs: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            scan_region_batch: default_scan_region_batch(),
            split_retry_times: default_split_retry_times(),
            split_retry_interval_ms: default_split_retry_interval_ms(),
            split_max_retry_interval_ms: default_split_max_retry_interval_ms(),
            scan_retry_times: default_scan_retry_times(),
            split_concurrency: default_split_concurrency(),
            wait_for_scatter: false,
            scatter_wait_upper_secs: default_scatter_wait_upper_secs(),
        }
    }
}

impl SplitConfig {
    fn merge(&mut self, other: Self) {
        if other.scan_region_batch > 0 {
            self.scan_region_batch = other.scan_region_batch;
        }
        if other.split_retry_times > 0 {
            self.split_retry_times = other.split_retry_times;
        }
        if other.split_retry_interval_ms > 0 {
            self.split_retry_interval_ms = other.split_retry_interval_ms;
        }
        if other.split_max_retry_interval_ms > 0 {
            self.split_max_retry_interval_ms = other.split_max_retry_interval_ms;
        }
        if other.scan_retry_times > 0 {
            self.scan_retry_times = other.scan_retry_times;
        }
        if other.split_concurrency > 0 {
            self.split_concurrency = other.split_concurrency;
        }
        if other.wait_for_scatter {
            self.wait_for_scatter = true;
        }
        if other.scatter_wait_upper_secs > 0 {
            self.scatter_wait_upper_secs = other.scatter_wait_upper_secs;
        }
    }

    /// Get initial split backoff as Duration
    pub fn split_retry_interval(&self) -> Duration {
        Duration::from_millis(self.split_retry_interval_ms)
    }

    /// Get split backoff ceiling as Duration
    pub fn split_max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.split_max_retry_interval_ms)
    }

    /// Get scatter wait upper bound as Duration
    pub fn scatter_wait_upper(&self) -> Duration {
        Duration::from_secs(self.scatter_wait_upper_secs)
    }
}

/// Online restore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineConfig {
    /// Restore into a live cluster with restore-only stores
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_label_key")]
    pub label_key: String,
    #[serde(default = "default_label_value")]
    pub label_value: String,
    /// Stores reserved for restored data
    #[serde(default)]
    pub stores: Vec<StoreId>,
    #[serde(default = "default_rule_group")]
    pub rule_group: String,
    #[serde(default = "default_rule_id")]
    pub rule_id: String,
}

impl Default for OnlineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            label_key: default_label_key(),
            label_value: default_label_value(),
            stores: Vec::new(),
            rule_group: default_rule_group(),
            rule_id: default_rule_id(),
        }
    }
}

impl OnlineConfig {
    fn merge(&mut self, other: Self) {
        if other.enabled {
            self.enabled = true;
        }
        if !other.label_key.is_empty() {
            self.label_key = other.label_key;
        }
        if !other.label_value.is_empty() {
            self.label_value = other.label_value;
        }
        if !other.stores.is_empty() {
            self.stores = other.stores;
        }
        if !other.rule_group.is_empty() {
            self.rule_group = other.rule_group;
        }
        if !other.rule_id.is_empty() {
            self.rule_id = other.rule_id;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }

    /// Parse level string, unknown values fall back to info
    pub fn level(&self) -> tracing::Level {
        match self.level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

// Default value functions

fn default_endpoints() -> Vec<String> {
    vec!["127.0.0.1:2379".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_scan_region_batch() -> usize {
    128
}

fn default_split_retry_times() -> usize {
    32
}

fn default_split_retry_interval_ms() -> u64 {
    50
}

fn default_split_max_retry_interval_ms() -> u64 {
    1000 // 1 second
}

fn default_scan_retry_times() -> usize {
    3
}

fn default_split_concurrency() -> usize {
    4
}

fn default_scatter_wait_upper_secs() -> u64 {
    180 // 3 minutes
}

fn default_label_key() -> String {
    "exclusive".to_string()
}

fn default_label_value() -> String {
    "restore".to_string()
}

fn default_rule_group() -> String {
    "pd".to_string()
}

fn default_rule_id() -> String {
    "br-restore".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}
