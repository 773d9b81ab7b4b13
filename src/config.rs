//! Configuration management for Chatgate.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use url::{Host, Url};

use crate::error::{GateError, Result};
use crate::ratelimit::StoreErrorPolicy;

/// Prefix for configuration environment variables (`CHATGATE__LIMITER__MAX_REQUESTS`).
pub const ENV_PREFIX: &str = "CHATGATE";
/// Conventional variable holding the counter store REST URL.
pub const STORE_URL_VAR: &str = "UPSTASH_REDIS_REST_URL";
/// Conventional variable holding the counter store REST token.
pub const STORE_TOKEN_VAR: &str = "UPSTASH_REDIS_REST_TOKEN";

/// Main configuration for the Chatgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// The chat application requests are forwarded to
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Counter store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Which request paths are rate limited
    #[serde(default)]
    pub paths: PathsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Gateway listener address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Admin listener address (health and metrics)
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

/// Upstream chat application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Upstream request timeout in milliseconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_ms: u64,

    /// Largest request body forwarded
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_ms: default_upstream_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_upstream_timeout() -> u64 {
    60_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Counter store connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// REST endpoint of the store
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer token for the store
    #[serde(default)]
    pub token: Option<String>,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,

    /// Prefix of every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_ms: default_store_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_timeout() -> u64 {
    500
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Requests admitted per identity per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// What to do when the counter store fails
    #[serde(default)]
    pub on_store_error: StoreErrorPolicy,

    /// Whether decisions carry `X-RateLimit-Reset`
    #[serde(default = "default_emit_reset_header")]
    pub emit_reset_header: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            on_store_error: StoreErrorPolicy::default(),
            emit_reset_header: default_emit_reset_header(),
        }
    }
}

impl LimiterConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_max_requests() -> u64 {
    50
}

fn default_window_secs() -> u64 {
    3600
}

fn default_emit_reset_header() -> bool {
    true
}

/// Path patterns selecting rate-limited requests.
///
/// A path is limited when it matches some `include` pattern (or `include` is
/// empty) and no `exclude` pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: Vec::new(),
        }
    }
}

fn default_include() -> Vec<String> {
    vec!["/api/chat".to_string()]
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl GatewayConfig {
    /// Load configuration from defaults, an optional YAML file and the
    /// environment.
    ///
    /// Store credentials fall back to the conventional Upstash variables.
    /// The result is not validated; call [`GatewayConfig::validate`] once
    /// command-line overrides have been applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: GatewayConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GateError::Config(format!("Failed to load configuration: {}", e)))?;

        config.apply_store_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Fill unset store credentials from `UPSTASH_REDIS_REST_URL` and
    /// `UPSTASH_REDIS_REST_TOKEN`.
    pub fn apply_store_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.store.url.is_none() {
            self.store.url = lookup(STORE_URL_VAR);
        }
        if self.store.token.is_none() {
            self.store.token = lookup(STORE_TOKEN_VAR);
        }
    }

    /// Check the configuration. Every failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let store_url = self
            .store
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                GateError::Config(format!(
                    "counter store url is required (set store.url or {})",
                    STORE_URL_VAR
                ))
            })?;
        let store_url = Url::parse(store_url)
            .map_err(|e| GateError::Config(format!("invalid counter store url: {}", e)))?;
        match store_url.scheme() {
            "https" => {}
            "http" if is_loopback(&store_url) => {}
            scheme => {
                return Err(GateError::Config(format!(
                    "counter store url must use https, got {}",
                    scheme
                )))
            }
        }

        if self
            .store
            .token
            .as_deref()
            .map_or(true, |t| t.trim().is_empty())
        {
            return Err(GateError::Config(format!(
                "counter store token is required (set store.token or {})",
                STORE_TOKEN_VAR
            )));
        }

        if self.store.timeout_ms == 0 {
            return Err(GateError::Config("store.timeout_ms must be at least 1".to_string()));
        }
        if self.limiter.max_requests == 0 {
            return Err(GateError::Config("limiter.max_requests must be at least 1".to_string()));
        }
        if self.limiter.window_secs == 0 {
            return Err(GateError::Config("limiter.window_secs must be at least 1".to_string()));
        }

        let upstream = Url::parse(&self.upstream.url)
            .map_err(|e| GateError::Config(format!("invalid upstream url: {}", e)))?;
        if !matches!(upstream.scheme(), "http" | "https") || upstream.cannot_be_a_base() {
            return Err(GateError::Config(format!(
                "upstream url must be an absolute http(s) url: {}",
                self.upstream.url
            )));
        }

        Ok(())
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.store.url = Some("https://eu1-example.upstash.io".to_string());
        config.store.token = Some("token".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.limiter.max_requests, 50);
        assert_eq!(config.limiter.window(), Duration::from_secs(3600));
        assert_eq!(config.limiter.on_store_error, StoreErrorPolicy::Allow);
        assert_eq!(config.store.timeout(), Duration::from_millis(500));
        assert_eq!(config.store.key_prefix, "ratelimit");
        assert_eq!(config.paths.include, vec!["/api/chat".to_string()]);
        assert!(config.paths.exclude.is_empty());
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
store:
  url: https://eu1-example.upstash.io
  token: abc
  timeout_ms: 250
limiter:
  max_requests: 10
  window_secs: 60
  on_store_error: block
paths:
  include: []
  exclude: ["/_next/static", "/_next/image", "/favicon.ico"]
logging:
  format: json
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.max_requests, 10);
        assert_eq!(config.limiter.window_secs, 60);
        assert_eq!(config.limiter.on_store_error, StoreErrorPolicy::Block);
        assert!(config.limiter.emit_reset_header);
        assert_eq!(config.store.timeout_ms, 250);
        assert!(config.paths.include.is_empty());
        assert_eq!(config.paths.exclude.len(), 3);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let yaml = "limiter:\n  on_store_error: maybe\n";
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let config = GatewayConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(STORE_URL_VAR));

        let mut config = valid_config();
        config.store.token = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(STORE_TOKEN_VAR));
    }

    #[test]
    fn test_store_env_fallback() {
        let mut config = GatewayConfig::default();
        config.apply_store_env(|name| match name {
            STORE_URL_VAR => Some("https://from-env.upstash.io".to_string()),
            STORE_TOKEN_VAR => Some("env-token".to_string()),
            _ => None,
        });
        assert_eq!(config.store.url.as_deref(), Some("https://from-env.upstash.io"));
        assert_eq!(config.store.token.as_deref(), Some("env-token"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_credentials_win_over_env() {
        let mut config = valid_config();
        config.apply_store_env(|_| Some("ignored".to_string()));
        assert_eq!(
            config.store.url.as_deref(),
            Some("https://eu1-example.upstash.io")
        );
        assert_eq!(config.store.token.as_deref(), Some("token"));
    }

    #[test]
    fn test_plain_http_only_on_loopback() {
        let mut config = valid_config();
        config.store.url = Some("http://store.example.com".to_string());
        assert!(config.validate().is_err());

        for url in ["http://127.0.0.1:8079", "http://localhost:8079", "http://[::1]:8079"] {
            config.store.url = Some(url.to_string());
            assert!(config.validate().is_ok(), "{} should be accepted", url);
        }
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = valid_config();
        config.limiter.max_requests = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.limiter.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.store.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_upstream_rejected() {
        let mut config = valid_config();
        config.upstream.url = "ftp://files.example.com".to_string();
        assert!(config.validate().is_err());

        config.upstream.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = valid_config();
        let rendered = format!("{:?}", config.store);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"token\""));
    }
}
