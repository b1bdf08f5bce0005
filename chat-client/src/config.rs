//! Client configuration.
//!
//! Loaded from a TOML file or built in code with the `with_*` methods.
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_core::ReconnectPolicy;
use serde::Deserialize;
use url::Url;

/// Configuration for [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Realtime endpoint (`ws://` or `wss://`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Keep-alive ping interval, in seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Idle time after the last keystroke before `typing.stop`, in milliseconds.
    #[serde(default = "default_typing_idle_timeout_ms")]
    pub typing_idle_timeout_ms: u64,
    /// Window for matching confirmations to optimistic messages, in milliseconds.
    #[serde(default = "default_reconcile_window_ms")]
    pub reconcile_window_ms: u64,
    /// Local expiry of remote typing indicators, in milliseconds (0 disables).
    #[serde(default = "default_remote_typing_ttl_ms")]
    pub remote_typing_ttl_ms: u64,
    /// How long a peer counts as online after any event, in seconds.
    #[serde(default = "default_online_window_secs")]
    pub online_window_secs: u64,
    /// Envelopes held while offline before the oldest is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Bound on one connection attempt, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound on one outbound frame write, in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

// Default value functions
fn default_endpoint() -> String {
    "ws://localhost:8000/ws/chat/".to_string()
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_typing_idle_timeout_ms() -> u64 {
    2000
}

fn default_reconcile_window_ms() -> u64 {
    5000
}

fn default_remote_typing_ttl_ms() -> u64 {
    8000
}

fn default_online_window_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    chat_core::DEFAULT_QUEUE_CAPACITY
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_send_timeout_secs() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            typing_idle_timeout_ms: default_typing_idle_timeout_ms(),
            reconcile_window_ms: default_reconcile_window_ms(),
            remote_typing_ttl_ms: default_remote_typing_ttl_ms(),
            online_window_secs: default_online_window_secs(),
            queue_capacity: default_queue_capacity(),
            connect_timeout_secs: default_connect_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Default configuration for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check values that would make the client misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::Invalid(format!("endpoint {}: {}", self.endpoint, e)))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "endpoint must use ws:// or wss://, got {}",
                self.endpoint
            )));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be positive".into(),
            ));
        }
        if self.typing_idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "typing_idle_timeout_ms must be positive".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_secs and send_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Set the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the reconnect base delay.
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay_ms = millis(delay);
        self
    }

    /// Set the reconnect attempt limit.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the heartbeat interval (whole seconds).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs();
        self
    }

    /// Set the typing idle timeout.
    pub fn with_typing_idle_timeout(mut self, timeout: Duration) -> Self {
        self.typing_idle_timeout_ms = millis(timeout);
        self
    }

    /// Set the reconciliation window.
    pub fn with_reconcile_window(mut self, window: Duration) -> Self {
        self.reconcile_window_ms = millis(window);
        self
    }

    /// Set the remote typing expiry; `None` keeps indicators until `typing.stop`.
    pub fn with_remote_typing_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.remote_typing_ttl_ms = ttl.map_or(0, millis);
        self
    }

    /// Set the online window (whole seconds).
    pub fn with_online_window(mut self, window: Duration) -> Self {
        self.online_window_secs = window.as_secs();
        self
    }

    /// Set the offline queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the connect timeout (whole seconds).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the send timeout (whole seconds).
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_secs = timeout.as_secs();
        self
    }

    /// Reconnect and keep-alive policy for the state machine.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_attempts: self.max_reconnect_attempts,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
        }
    }

    /// Typing idle timeout.
    pub fn typing_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_idle_timeout_ms)
    }

    /// Reconciliation window.
    pub fn reconcile_window(&self) -> Duration {
        Duration::from_millis(self.reconcile_window_ms)
    }

    /// Remote typing expiry, if enabled.
    pub fn remote_typing_ttl(&self) -> Option<Duration> {
        (self.remote_typing_ttl_ms > 0).then(|| Duration::from_millis(self.remote_typing_ttl_ms))
    }

    /// Online window.
    pub fn online_window(&self) -> Duration {
        Duration::from_secs(self.online_window_secs)
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.typing_idle_timeout(), Duration::from_secs(2));
        assert_eq!(config.reconcile_window(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.send_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn default_policy_matches_backoff_contract() {
        let policy = ClientConfig::default().reconnect_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
endpoint = "wss://chat.example.com/ws/chat/"
reconnect_base_delay_ms = 500
max_reconnect_attempts = 3
remote_typing_ttl_ms = 0
queue_capacity = 16
"#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.endpoint, "wss://chat.example.com/ws/chat/");
        assert_eq!(config.reconnect_policy().base_delay, Duration::from_millis(500));
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.remote_typing_ttl(), None);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.heartbeat_interval_secs, 30);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn builder_pattern() {
        let config = ClientConfig::new("ws://10.0.0.2:8000/ws/chat/")
            .with_max_reconnect_attempts(2)
            .with_reconnect_base_delay(Duration::from_millis(250))
            .with_remote_typing_ttl(Some(Duration::from_secs(4)))
            .with_queue_capacity(3);

        assert_eq!(config.endpoint, "ws://10.0.0.2:8000/ws/chat/");
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_base_delay_ms, 250);
        assert_eq!(config.remote_typing_ttl(), Some(Duration::from_secs(4)));
        assert_eq!(config.queue_capacity, 3);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let config = ClientConfig::new("http://localhost:8000/api/");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unparseable_endpoint_is_rejected() {
        let config = ClientConfig::new("ws://");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = ClientConfig::new("ws//missing-colon/ws/chat/");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let config = ClientConfig::default().with_queue_capacity(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(ClientConfig::default().with_queue_capacity(1).validate().is_ok());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = ClientConfig::default().with_connect_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = ClientConfig::default().with_send_timeout(Duration::from_millis(500));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let config = ClientConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = ClientConfig::from_file(Path::new("/nonexistent/relaychat.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let path = std::env::temp_dir().join(format!("relaychat-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "max_reconnect_attempts = \"many\"").unwrap();
        let result = ClientConfig::from_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
