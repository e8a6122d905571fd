//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::LimitPolicy;

/// Environment variable prefix, e.g. `TOLLGATE__RATE_LIMITING__MAX_REQUESTS`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Longest accepted window: 365 days.
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Which request paths pass through the limiter
    #[serde(default)]
    pub routes: RouteConfig,

    /// Session detection for protected routes
    #[serde(default)]
    pub auth: AuthConfig,

    /// Counter storage
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Base URL that unmatched requests are forwarded to
    #[serde(default)]
    pub upstream: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            upstream: None,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// What to do with a request when the store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request and log the failure
    #[default]
    Open,
    /// Reject the request with 503
    Closed,
}

/// How to treat requests whose client identity cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownClientPolicy {
    /// All unresolvable clients share one counter
    #[default]
    Shared,
    /// Unresolvable clients bypass the limiter
    Exempt,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests admitted per key per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    #[serde(default)]
    pub failure_mode: FailureMode,

    #[serde(default)]
    pub unknown_client: UnknownClientPolicy,

    /// Interval between sweeps of expired records, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            failure_mode: FailureMode::default(),
            unknown_client: UnknownClientPolicy::default(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitingConfig {
    /// The limit policy handed to the limiter and the store.
    pub fn policy(&self) -> Result<LimitPolicy> {
        let window = i64::try_from(self.window_secs)
            .ok()
            .filter(|secs| *secs > 0 && self.window_secs <= MAX_WINDOW_SECS)
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                TollgateError::Config(format!(
                    "window_secs must be between 1 and {}, got {}",
                    MAX_WINDOW_SECS, self.window_secs
                ))
            })?;
        Ok(LimitPolicy::new(self.max_requests, window))
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    100
}

fn default_sweep_interval() -> u64 {
    300
}

/// Route prefixes that the limiter applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Prefixes that are rate limited
    #[serde(default = "default_api_prefixes")]
    pub api_prefixes: Vec<String>,

    /// Prefixes that require a session before being rate limited
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            api_prefixes: default_api_prefixes(),
            protected_prefixes: default_protected_prefixes(),
        }
    }
}

fn default_api_prefixes() -> Vec<String> {
    vec!["/api".to_string()]
}

fn default_protected_prefixes() -> Vec<String> {
    ["/dashboard", "/profile", "/groups", "/api/protected"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Session detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Cookie names that carry a session token
    #[serde(default = "default_session_cookies")]
    pub session_cookies: Vec<String>,

    /// Whether `Authorization: Bearer` counts as a session
    #[serde(default = "default_accept_bearer")]
    pub accept_bearer: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookies: default_session_cookies(),
            accept_bearer: default_accept_bearer(),
        }
    }
}

fn default_session_cookies() -> Vec<String> {
    vec![
        "next-auth.session-token".to_string(),
        "__Secure-next-auth.session-token".to_string(),
    ]
}

fn default_accept_bearer() -> bool {
    true
}

/// Which store backs the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Counter storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default)]
    pub redis: RedisConfig,
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.policy()?;
        if self.rate_limiting.max_requests == 0 {
            return Err(TollgateError::Config("max_requests must be positive".into()));
        }
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(TollgateError::Config("sweep_interval_secs must be positive".into()));
        }

        let prefixes = self
            .routes
            .api_prefixes
            .iter()
            .chain(self.routes.protected_prefixes.iter());
        for prefix in prefixes {
            if !prefix.starts_with('/') {
                return Err(TollgateError::Config(format!(
                    "route prefix {:?} must start with '/'",
                    prefix
                )));
            }
        }

        Ok(())
    }
}
