//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionOptions;
use crate::coordinator::CoordinatorOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Capture engine endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_status_path")]
    pub status_path: String,

    #[serde(default = "default_stats_path")]
    pub stats_path: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_status_path() -> String {
    "/api/capture/status".to_string()
}

fn default_stats_path() -> String {
    "/api/packets/stats".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_path: default_ws_path(),
            status_path: default_status_path(),
            stats_path: default_stats_path(),
        }
    }
}

impl EngineConfig {
    /// Push endpoint derived from the HTTP base (`http` → `ws`)
    pub fn ws_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", base, self.ws_path)
    }
}

/// Reconnection policy
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_fixed_delay")]
    pub fixed_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_fixed_delay() -> u64 {
    3000 // 3 seconds
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            fixed_delay_ms: default_fixed_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Throttle, fallback and liveness timing
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_throttle_window")]
    pub throttle_window_ms: u64,

    #[serde(default = "default_fallback_timeout")]
    pub fallback_timeout_ms: u64,

    #[serde(default = "default_fallback_poll_interval")]
    pub fallback_poll_interval_ms: u64,

    /// Restart an exhausted connection on this cadence; unset disables probing
    #[serde(default)]
    pub probe_interval_ms: Option<u64>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// 0 disables the idle watchdog
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_throttle_window() -> u64 {
    1000
}

fn default_fallback_timeout() -> u64 {
    5000
}

fn default_fallback_poll_interval() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_idle_timeout() -> u64 {
    15_000 // three missed 5s heartbeats
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_window_ms: default_throttle_window(),
            fallback_timeout_ms: default_fallback_timeout(),
            fallback_poll_interval_ms: default_fallback_poll_interval(),
            probe_interval_ms: None,
            request_timeout_ms: default_request_timeout(),
            idle_timeout_ms: default_idle_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

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

        config.validate()?;
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
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("rustshark").join("config.toml")),
            Some(PathBuf::from("/etc/rustshark/config.toml")),
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

    /// Reject settings the sync loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The WebSocket connector is built without TLS
        let base = self.engine.base_url.as_str();
        if !(base.starts_with("http://") || base.starts_with("ws://")) {
            return Err(ConfigError::Invalid(format!(
                "engine.base_url must start with http:// or ws://, got {:?}",
                base
            )));
        }
        if self.sync.throttle_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.throttle_window_ms must be greater than 0".to_string(),
            ));
        }
        if self.sync.fallback_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.fallback_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.sync.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sync.probe_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "sync.probe_interval_ms must be greater than 0 when set".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            fixed_delay: Duration::from_millis(self.reconnect.fixed_delay_ms),
            max_attempts: self.reconnect.max_attempts,
            idle_timeout: match self.sync.idle_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            connect_timeout: Duration::from_millis(self.sync.connect_timeout_ms),
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            throttle_window: Duration::from_millis(self.sync.throttle_window_ms),
            fallback_timeout: Duration::from_millis(self.sync.fallback_timeout_ms),
            fallback_poll_interval: Duration::from_millis(self.sync.fallback_poll_interval_ms),
            probe_interval: self.sync.probe_interval_ms.map(Duration::from_millis),
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Engine overrides
        if let Some(url) = var("RUSTSHARK_ENGINE_URL") {
            self.engine.base_url = url;
        }
        if let Some(path) = var("RUSTSHARK_WS_PATH") {
            self.engine.ws_path = path;
        }

        // Reconnect overrides
        if let Some(delay) = var("RUSTSHARK_RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.reconnect.fixed_delay_ms = delay;
        }
        if let Some(max) = var("RUSTSHARK_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.reconnect.max_attempts = max;
        }

        // Sync overrides
        if let Some(window) = var("RUSTSHARK_THROTTLE_MS").and_then(|v| v.parse().ok()) {
            self.sync.throttle_window_ms = window;
        }
        if let Some(timeout) = var("RUSTSHARK_FALLBACK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.sync.fallback_timeout_ms = timeout;
        }
        if let Some(interval) =
            var("RUSTSHARK_FALLBACK_POLL_INTERVAL_MS").and_then(|v| v.parse().ok())
        {
            self.sync.fallback_poll_interval_ms = interval;
        }
        if let Some(probe) = var("RUSTSHARK_PROBE_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.sync.probe_interval_ms = Some(probe);
        }
        if let Some(timeout) = var("RUSTSHARK_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.sync.request_timeout_ms = timeout;
        }
        if let Some(timeout) = var("RUSTSHARK_IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.sync.idle_timeout_ms = timeout;
        }
        if let Some(timeout) = var("RUSTSHARK_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.sync.connect_timeout_ms = timeout;
        }

        // Logging overrides
        if let Some(level) = var("RUSTSHARK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("RUSTSHARK_LOG_FORMAT") {
            self.logging.format = format;
        }
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
    r#"# RustShark sync client configuration
#
# Environment variables override these settings:
# - RUSTSHARK_ENGINE_URL
# - RUSTSHARK_WS_PATH
# - RUSTSHARK_RECONNECT_DELAY_MS
# - RUSTSHARK_MAX_ATTEMPTS
# - RUSTSHARK_THROTTLE_MS
# - RUSTSHARK_FALLBACK_TIMEOUT_MS
# - RUSTSHARK_FALLBACK_POLL_INTERVAL_MS
# - RUSTSHARK_PROBE_INTERVAL_MS
# - RUSTSHARK_REQUEST_TIMEOUT_MS
# - RUSTSHARK_IDLE_TIMEOUT_MS
# - RUSTSHARK_CONNECT_TIMEOUT_MS
# - RUSTSHARK_LOG_LEVEL
# - RUSTSHARK_LOG_FORMAT

[engine]
# Capture engine HTTP base (http:// only); the push endpoint uses ws:// on the same host
base_url = "http://127.0.0.1:3000"

# Push endpoint path
ws_path = "/ws"

# Pull endpoints
status_path = "/api/capture/status"
stats_path = "/api/packets/stats"

[reconnect]
# Delay before each reconnect attempt (ms)
fixed_delay_ms = 3000

# Attempts per failure episode before giving up
max_attempts = 5

[sync]
# Minimum spacing between surfaced updates of one kind (ms)
throttle_window_ms = 1000

# How long to wait for the push connection before pulling (ms)
fallback_timeout_ms = 5000

# Pull cadence while the push connection is down (ms)
fallback_poll_interval_ms = 5000

# Restart an exhausted connection on this cadence (ms); unset disables probing
# probe_interval_ms = 30000

# Pull request timeout (ms)
request_timeout_ms = 10000

# Treat the push connection as dead after this long without a frame (ms); 0 disables
idle_timeout_ms = 15000

# Give up on a push connection attempt after this long (ms)
connect_timeout_ms = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.base_url, "http://127.0.0.1:3000");
        assert_eq!(config.engine.ws_url(), "ws://127.0.0.1:3000/ws");
        assert_eq!(config.reconnect.fixed_delay_ms, 3000);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.sync.throttle_window_ms, 1000);
        assert_eq!(config.sync.probe_interval_ms, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ws_url_scheme() {
        let mut engine = EngineConfig {
            base_url: "http://capture.example.com/".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(engine.ws_url(), "ws://capture.example.com/ws");

        engine.base_url = "ws://10.0.0.2:3000".to_string();
        engine.ws_path = "/live".to_string();
        assert_eq!(engine.ws_url(), "ws://10.0.0.2:3000/live");
    }

    #[test]
    fn test_tls_base_url_is_rejected() {
        let mut config = Config::default();
        config.engine.base_url = "https://capture.example.com".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.engine.base_url = "wss://capture.example.com".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.engine.base_url = "ws://10.0.0.2:3000".to_string();
        assert!(config.validate().is_ok());

        let file = write_config("[engine]\nbase_url = \"https://capture.example.com\"\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let file = write_config(&generate_default_config());
        let config = Config::load(file.path()).unwrap();
        let defaults = Config::default();

        assert_eq!(config.engine.base_url, defaults.engine.base_url);
        assert_eq!(config.engine.stats_path, defaults.engine.stats_path);
        assert_eq!(config.reconnect.max_attempts, defaults.reconnect.max_attempts);
        assert_eq!(config.sync.idle_timeout_ms, defaults.sync.idle_timeout_ms);
        assert_eq!(config.sync.connect_timeout_ms, defaults.sync.connect_timeout_ms);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
[reconnect]
max_attempts = 2

[sync]
probe_interval_ms = 30000
"#,
        );
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.fixed_delay_ms, 3000);
        assert_eq!(
            config.coordinator_options().probe_interval,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.engine.ws_path, "/ws");
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/rustshark/config.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let file = write_config("[reconnect\nmax_attempts = ");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        let file = write_config("[sync]\nthrottle_window_ms = 0\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let file = write_config("[sync]\nconnect_timeout_ms = 0\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RUSTSHARK_ENGINE_URL", "http://192.168.1.10:3000"),
            ("RUSTSHARK_MAX_ATTEMPTS", "9"),
            ("RUSTSHARK_RECONNECT_DELAY_MS", "not a number"),
            ("RUSTSHARK_LOG_FORMAT", "json"),
            ("RUSTSHARK_FALLBACK_POLL_INTERVAL_MS", "2500"),
            ("RUSTSHARK_REQUEST_TIMEOUT_MS", "4000"),
            ("RUSTSHARK_IDLE_TIMEOUT_MS", "0"),
            ("RUSTSHARK_CONNECT_TIMEOUT_MS", "1500"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.engine.ws_url(), "ws://192.168.1.10:3000/ws");
        assert_eq!(config.reconnect.max_attempts, 9);
        assert_eq!(config.reconnect.fixed_delay_ms, 3000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.sync.fallback_poll_interval_ms, 2500);
        assert_eq!(config.sync.request_timeout(), Duration::from_secs(4));
        assert_eq!(config.connection_options().idle_timeout, None);
        assert_eq!(
            config.connection_options().connect_timeout,
            Duration::from_millis(1500)
        );

        let template = generate_default_config();
        for key in [
            "RUSTSHARK_FALLBACK_POLL_INTERVAL_MS",
            "RUSTSHARK_REQUEST_TIMEOUT_MS",
            "RUSTSHARK_IDLE_TIMEOUT_MS",
            "RUSTSHARK_CONNECT_TIMEOUT_MS",
        ] {
            assert!(template.contains(key), "{} missing from template", key);
        }
    }

    #[test]
    fn test_option_conversion() {
        let mut config = Config::default();
        config.sync.idle_timeout_ms = 0;

        let connection = config.connection_options();
        assert_eq!(connection.fixed_delay, Duration::from_secs(3));
        assert_eq!(connection.idle_timeout, None);
        assert_eq!(connection.connect_timeout, Duration::from_secs(10));

        let coordinator = config.coordinator_options();
        assert_eq!(coordinator.throttle_window, Duration::from_secs(1));
        assert_eq!(coordinator.fallback_timeout, Duration::from_secs(5));
    }
}
