//! Configuration loading, validation, and management for Conclave.
//!
//! Loads configuration from `~/.conclave/config.toml` (or the path in
//! `CONCLAVE_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Provider keys with a built-in adapter.
pub const KNOWN_PROVIDERS: [&str; 4] = ["openai", "anthropic", "google", "openrouter"];

/// The root configuration structure.
///
/// Maps directly to `~/.conclave/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider-specific configurations, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// HTTP surface
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Identity collaborator
    #[serde(default)]
    pub auth: AuthConfig,

    /// Persistent store
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sliding-window request limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Credit costs
    #[serde(default)]
    pub billing: BillingConfig,

    /// Deliberation defaults
    #[serde(default)]
    pub council: CouncilConfig,

    /// Token streaming
    #[serde(default)]
    pub streaming: StreamingConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (proxies, regional endpoints, test servers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Allowed CORS origins; empty means any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token → user id, checked before `verify_url`
    #[serde(default)]
    pub static_tokens: HashMap<String, String>,

    /// Remote verification endpoint. Called with the caller's bearer token;
    /// answers `{"id": "<user id>"}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_url: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "static_tokens",
                &format!("[{} redacted]", self.static_tokens.len()),
            )
            .field("verify_url", &self.verify_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// SQLite database file; defaults to `~/.conclave/conclave.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("conclave.db"))
    }
}

/// One sliding window: at most `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Per-endpoint overrides ("council", "stream")
    #[serde(default = "default_endpoint_limits")]
    pub endpoints: HashMap<String, WindowConfig>,
}

fn default_window_secs() -> u64 {
    60
}
fn default_max_requests() -> u32 {
    60
}
fn default_endpoint_limits() -> HashMap<String, WindowConfig> {
    HashMap::from([
        (
            "council".to_string(),
            WindowConfig {
                window_secs: 60,
                max_requests: 10,
            },
        ),
        (
            "stream".to_string(),
            WindowConfig {
                window_secs: 60,
                max_requests: 60,
            },
        ),
    ])
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            endpoints: default_endpoint_limits(),
        }
    }
}

impl RateLimitConfig {
    /// Effective window for an endpoint.
    pub fn for_endpoint(&self, endpoint: &str) -> WindowConfig {
        self.endpoints.get(endpoint).copied().unwrap_or(WindowConfig {
            window_secs: self.window_secs,
            max_requests: self.max_requests,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Credits per agent per deliberation
    #[serde(default = "default_per_agent_cost")]
    pub per_agent_cost: i64,

    /// Flat charge for step-metered tasks
    #[serde(default = "default_step_base")]
    pub base: i64,

    /// Timeout minutes billed at most
    #[serde(default = "default_timeout_cap")]
    pub timeout_cap_minutes: i64,
}

fn default_true() -> bool {
    true
}
fn default_per_agent_cost() -> i64 {
    1
}
fn default_step_base() -> i64 {
    1
}
fn default_timeout_cap() -> i64 {
    5
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_agent_cost: default_per_agent_cost(),
            base: default_step_base(),
            timeout_cap_minutes: default_timeout_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilConfig {
    #[serde(default = "default_max_rounds")]
    pub default_max_rounds: u32,

    #[serde(default = "default_max_rounds_cap")]
    pub max_rounds_cap: u32,

    /// Deadline for one agent call
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_rounds() -> u32 {
    3
}
fn default_max_rounds_cap() -> u32 {
    10
}
fn default_agent_timeout() -> u64 {
    120
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            default_max_rounds: default_max_rounds(),
            max_rounds_cap: default_max_rounds_cap(),
            agent_timeout_secs: default_agent_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Emit a heartbeat after this many tokens
    #[serde(default = "default_heartbeat_tokens")]
    pub heartbeat_every_tokens: u32,

    /// Emit a heartbeat when no frame was sent for this long
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// A read stalled longer than this fails the attempt
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_streams")]
    pub max_concurrent_streams: u32,
}

fn default_heartbeat_tokens() -> u32 {
    30
}
fn default_heartbeat_interval() -> u64 {
    15
}
fn default_read_timeout() -> u64 {
    60
}
fn default_backoff_base() -> u64 {
    1000
}
fn default_backoff_max() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_streams() -> u32 {
    5
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            heartbeat_every_tokens: default_heartbeat_tokens(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            read_timeout_secs: default_read_timeout(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            max_retries: default_max_retries(),
            max_concurrent_streams: default_max_streams(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `CONCLAVE_CONFIG` or the default path
    /// (~/.conclave/config.toml), then apply environment overrides:
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GOOGLE_API_KEY`,
    ///   `OPENROUTER_API_KEY` (only when the file sets no key)
    /// - `CONCLAVE_PORT`, `CONCLAVE_DB`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONCLAVE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in KNOWN_PROVIDERS {
            let var = format!("{}_API_KEY", provider.to_uppercase());
            if let Some(key) = lookup(&var).filter(|k| !k.is_empty()) {
                let entry = self.providers.entry(provider.to_string()).or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }

        if let Some(port) = lookup("CONCLAVE_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("CONCLAVE_PORT is not a port: {port}"))
            })?;
        }

        if let Some(db) = lookup("CONCLAVE_DB") {
            self.storage.path = Some(PathBuf::from(db));
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".conclave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.council.temperature) {
            return Err(ConfigError::ValidationError(
                "council.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.council.default_max_rounds == 0
            || self.council.default_max_rounds > self.council.max_rounds_cap
        {
            return Err(ConfigError::ValidationError(
                "council.default_max_rounds must be between 1 and max_rounds_cap".into(),
            ));
        }

        if self.council.agent_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "council.agent_timeout_secs must be > 0".into(),
            ));
        }

        if self.rate_limit.window_secs == 0 || self.rate_limit.max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit window_secs and max_requests must be > 0".into(),
            ));
        }

        for (name, window) in &self.rate_limit.endpoints {
            if window.window_secs == 0 || window.max_requests == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate_limit.endpoints.{name} must have a non-zero window and limit"
                )));
            }
        }

        if self.billing.per_agent_cost < 0 || self.billing.base < 0 {
            return Err(ConfigError::ValidationError(
                "billing costs must not be negative".into(),
            ));
        }

        let s = &self.streaming;
        if s.backoff_base_ms == 0 || s.backoff_base_ms > s.backoff_max_ms {
            return Err(ConfigError::ValidationError(
                "streaming.backoff_base_ms must be > 0 and <= backoff_max_ms".into(),
            ));
        }

        if s.read_timeout_secs == 0 || s.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "streaming timeouts must be > 0".into(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "storage.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// Settings for one provider key, defaulted when absent.
    pub fn provider(&self, key: &str) -> ProviderConfig {
        self.providers.get(key).cloned().unwrap_or_default()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for conclave_core::Error {
    fn from(err: ConfigError) -> Self {
        conclave_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 42618);
        assert_eq!(config.council.default_max_rounds, 3);
        assert_eq!(config.streaming.heartbeat_every_tokens, 30);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.rate_limit.for_endpoint("council").max_requests, 10);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.council.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_base_above_max_rejected() {
        let mut config = AppConfig::default();
        config.streaming.backoff_base_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.storage.backend, "sqlite");
    }

    #[test]
    fn endpoint_limits_fall_back_to_global() {
        let config = RateLimitConfig::default();
        assert_eq!(
            config.for_endpoint("council"),
            WindowConfig {
                window_secs: 60,
                max_requests: 10
            }
        );
        assert_eq!(config.for_endpoint("other").max_requests, 60);
    }

    #[test]
    fn load_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[providers.anthropic]
api_key = "sk-ant-test"

[council]
default_max_rounds = 5

[auth.static_tokens]
dev-token = "user-1"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.council.default_max_rounds, 5);
        assert_eq!(config.council.max_tokens, 1024);
        assert_eq!(
            config.provider("anthropic").api_key.as_deref(),
            Some("sk-ant-test")
        );
        assert_eq!(config.auth.static_tokens["dev-token"], "user-1");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "council = 3").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_fill_missing_keys_only() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("from-file".into()),
                ..Default::default()
            },
        );

        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "from-env"),
            ("GOOGLE_API_KEY", "g-key"),
            ("CONCLAVE_PORT", "9000"),
            ("CONCLAVE_DB", "/tmp/c.db"),
        ]);
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.provider("openai").api_key.as_deref(), Some("from-file"));
        assert_eq!(config.provider("google").api_key.as_deref(), Some("g-key"));
        assert!(config.provider("anthropic").api_key.is_none());
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.storage.resolved_path(), PathBuf::from("/tmp/c.db"));
    }

    #[test]
    fn bad_port_env_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|name| (name == "CONCLAVE_PORT").then(|| "high".into()));
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-very-secret".into()),
                ..Default::default()
            },
        );
        config
            .auth
            .static_tokens
            .insert("tok-secret".into(), "u".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("tok-secret"));
    }
}
