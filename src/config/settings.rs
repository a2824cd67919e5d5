//! Application settings and configuration

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::fetcher::RetryPolicy;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Upstream source configuration
    #[serde(default)]
    pub source: SourceSettings,
    /// Collection schedule
    #[serde(default)]
    pub schedule: ScheduleSettings,
    /// Storage layout and retention
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Snapshot source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Market-data page visited to establish the session
    #[serde(default = "default_page_url")]
    pub page_url: String,
    /// Endpoint serving the snapshot spreadsheet
    #[serde(default = "default_data_url")]
    pub data_url: String,
    /// User agent presented to the source site
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout ceiling in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum plausible snapshot size in bytes
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,
    /// Retry/backoff parameters
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_page_url() -> String {
    "https://www.nseindia.com/market-data/oi-spurts".to_string()
}

fn default_data_url() -> String {
    "https://www.nseindia.com/api/live-analysis-oi-spurts-underlyings?csv=true".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
        .to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_min_bytes() -> usize {
    100
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            page_url: default_page_url(),
            data_url: default_data_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            min_bytes: default_min_bytes(),
            retry: RetrySettings::default(),
        }
    }
}

impl SourceSettings {
    /// Per-request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry/backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random fraction added on top of each delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    /// Convert into the fetcher's retry policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// Collection schedule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Trading window opening time, "HH:MM" local
    #[serde(default = "default_window_start")]
    pub window_start: String,
    /// Trading window closing time, "HH:MM" local (exclusive)
    #[serde(default = "default_window_end")]
    pub window_end: String,
    /// Minutes between cycles inside the window
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

fn default_window_start() -> String {
    "10:00".to_string()
}

fn default_window_end() -> String {
    "14:30".to_string()
}

fn default_interval_minutes() -> u64 {
    20
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            window_start: default_window_start(),
            window_end: default_window_end(),
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl ScheduleSettings {
    /// Cycle interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory for raw files and series
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Maximum raw download files to retain
    #[serde(default = "default_max_raw_files")]
    pub max_raw_files: usize,
    /// Days of persisted series to retain
    #[serde(default = "default_keep_series_days")]
    pub keep_series_days: u32,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_max_raw_files() -> usize {
    50
}

fn default_keep_series_days() -> u32 {
    7
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_raw_files: default_max_raw_files(),
            keep_series_days: default_keep_series_days(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("OI_TRACKER")
    }

    /// Load settings with a custom environment variable prefix.
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific configuration
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables (e.g., OI_TRACKER__SOURCE__DATA_URL)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Get the configuration directory path.
    fn config_dir() -> String {
        std::env::var("OI_TRACKER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Create default settings (useful for testing).
    pub fn default_settings() -> Self {
        Settings {
            source: SourceSettings::default(),
            schedule: ScheduleSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}
