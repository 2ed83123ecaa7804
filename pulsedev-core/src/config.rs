//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pulsedev/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pulsedev/` (~/.config/pulsedev/)
//! - State/Logs: `$XDG_STATE_HOME/pulsedev/` (~/.local/state/pulsedev/)
//!
//! Sections that fail validation are handled in two ways. Capture, session and
//! logging settings are load-bearing for the whole client, so [`Config::load`]
//! refuses them. Backend sync, flow inference and rewards can be isolated, so
//! [`Config::features`] switches the broken feature off and reports why.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Scoring backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Activity buffering
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Flow-state classifier thresholds
    #[serde(default)]
    pub flow: FlowConfig,

    /// Optimistic XP rewards
    #[serde(default)]
    pub rewards: RewardsConfig,

    /// Session timers and shutdown
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scoring backend configuration
///
/// When disabled (or misconfigured) the client runs in offline capture mode:
/// events are still normalized, buffered and classified locally.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Enable/disable backend sync
    #[serde(default)]
    pub enabled: bool,

    /// Backend base URL (e.g., `https://pulse.example.com`)
    pub server_url: Option<String>,

    /// Path prefix joined between `server_url` and endpoint paths
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Bearer token, if the backend wants one
    pub api_key: Option<String>,

    /// Platform name reported on session sync (vscode, nvim, browser, ...)
    #[serde(default = "default_platform")]
    pub platform: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Retries after a failed delivery before a batch or award is given up;
    /// each gets at most `retry_count + 1` attempts
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            api_prefix: default_api_prefix(),
            api_key: None,
            platform: default_platform(),
            timeout_secs: default_backend_timeout(),
            retry_count: default_retry_count(),
        }
    }
}

impl BackendConfig {
    /// Check if the backend is enabled and has somewhere to talk to
    pub fn is_ready(&self) -> bool {
        self.enabled && self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let url = self.server_url.as_deref().ok_or_else(|| {
            Error::Config("backend.server_url is required when backend is enabled".to_string())
        })?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "backend.server_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "backend.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.retry_count > 10 {
            return Err(Error::Config(
                "backend.retry_count must be at most 10".to_string(),
            ));
        }
        if self.platform.trim().is_empty() {
            return Err(Error::Config("backend.platform must not be empty".to_string()));
        }
        Ok(())
    }

    /// HTTP request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_prefix() -> String {
    "/api/v1/gamification".to_string()
}

fn default_platform() -> String {
    "editor".to_string()
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3
}

/// Activity buffer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Queue length that triggers an immediate flush
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Max milliseconds before flushing an incomplete batch
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Records kept for the flow classifier's sliding window
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || self.max_batch_size > 500 {
            return Err(Error::Config(
                "capture.max_batch_size must be between 1 and 500".to_string(),
            ));
        }
        if self.flush_interval_ms < 100 {
            return Err(Error::Config(
                "capture.flush_interval_ms must be at least 100".to_string(),
            ));
        }
        if self.history_limit < self.max_batch_size {
            return Err(Error::Config(
                "capture.history_limit must be at least capture.max_batch_size".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

fn default_max_batch_size() -> usize {
    20
}

fn default_flush_interval_ms() -> u64 {
    30_000
}

fn default_history_limit() -> usize {
    2048
}

/// Flow-state classifier configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FlowConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between classifier evaluations
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,

    /// Sliding window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Silence after which the developer is considered idle
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// Edits per second needed to climb the flow ladder
    #[serde(default = "default_keystroke_threshold")]
    pub keystroke_threshold: f64,

    /// Distinct files in the window above which flow is interrupted
    #[serde(default = "default_context_switch_threshold")]
    pub context_switch_threshold: u32,

    /// Touches of the same few files beyond which the developer is going in
    /// circles; stuck needs strictly more than this many
    #[serde(default = "default_stuck_repeat_threshold")]
    pub stuck_repeat_threshold: u32,

    /// Upper bound on the file set considered "the same few files"
    #[serde(default = "default_stuck_max_files")]
    pub stuck_max_files: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval_secs: default_evaluation_interval(),
            window_secs: default_window(),
            idle_threshold_secs: default_idle_threshold(),
            keystroke_threshold: default_keystroke_threshold(),
            context_switch_threshold: default_context_switch_threshold(),
            stuck_repeat_threshold: default_stuck_repeat_threshold(),
            stuck_max_files: default_stuck_max_files(),
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_secs == 0 {
            return Err(Error::Config(
                "flow.evaluation_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.window_secs < self.evaluation_interval_secs {
            return Err(Error::Config(
                "flow.window_secs must be at least flow.evaluation_interval_secs".to_string(),
            ));
        }
        if self.idle_threshold_secs == 0 {
            return Err(Error::Config(
                "flow.idle_threshold_secs must be greater than zero".to_string(),
            ));
        }
        if !self.keystroke_threshold.is_finite() || self.keystroke_threshold <= 0.0 {
            return Err(Error::Config(
                "flow.keystroke_threshold must be a positive number".to_string(),
            ));
        }
        if self.stuck_max_files == 0 || self.stuck_repeat_threshold == 0 {
            return Err(Error::Config(
                "flow.stuck_max_files and flow.stuck_repeat_threshold must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_evaluation_interval() -> u64 {
    10
}

fn default_window() -> u64 {
    60
}

fn default_idle_threshold() -> u64 {
    30
}

fn default_keystroke_threshold() -> f64 {
    5.0
}

fn default_context_switch_threshold() -> u32 {
    5
}

fn default_stuck_repeat_threshold() -> u32 {
    6
}

fn default_stuck_max_files() -> usize {
    2
}

/// Optimistic XP reward configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RewardsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds a provisional award may stay unconfirmed
    #[serde(default = "default_award_timeout")]
    pub award_timeout_secs: u64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            award_timeout_secs: default_award_timeout(),
        }
    }
}

impl RewardsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.award_timeout_secs == 0 {
            return Err(Error::Config(
                "rewards.award_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn award_timeout(&self) -> Duration {
        Duration::from_secs(self.award_timeout_secs)
    }
}

fn default_award_timeout() -> u64 {
    30
}

/// Session timer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Seconds between active-session syncs
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// How long `stop()` waits for in-flight requests
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(Error::Config(
                "session.sync_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn default_sync_interval() -> u64 {
    300
}

fn default_drain_timeout() -> u64 {
    5_000
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Features that survived validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Batches and session syncs go to the backend
    pub sync: bool,
    /// Flow classifier runs on its interval
    pub flow: bool,
    /// Optimistic XP awards are requested
    pub rewards: bool,
}

impl Features {
    /// Everything off: capture and buffering only
    pub fn offline() -> Self {
        Self {
            sync: false,
            flow: false,
            rewards: false,
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.capture.validate()?;
        config.session.validate()?;

        Ok(config)
    }

    /// Resolve which optional features can run.
    ///
    /// A feature whose section is invalid is disabled and its error returned;
    /// rewards also need a working backend.
    pub fn features(&self) -> (Features, Vec<Error>) {
        let mut problems = Vec::new();

        let sync = self.backend.is_ready()
            && match self.backend.validate() {
                Ok(()) => true,
                Err(e) => {
                    problems.push(e);
                    false
                }
            };
        // An enabled backend with no URL never reaches is_ready(); still worth reporting.
        if self.backend.enabled && self.backend.server_url.is_none() {
            if let Err(e) = self.backend.validate() {
                problems.push(e);
            }
        }

        let flow = self.flow.enabled
            && match self.flow.validate() {
                Ok(()) => true,
                Err(e) => {
                    problems.push(e);
                    false
                }
            };

        let rewards = self.rewards.enabled
            && sync
            && match self.rewards.validate() {
                Ok(()) => true,
                Err(e) => {
                    problems.push(e);
                    false
                }
            };

        (Features { sync, flow, rewards }, problems)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pulsedev/config.toml` (~/.config/pulsedev/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pulsedev").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/pulsedev/` (~/.local/state/pulsedev/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pulsedev")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pulsedev/pulsedev.log` (~/.local/state/pulsedev/pulsedev.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pulsedev.log")
    }
}
