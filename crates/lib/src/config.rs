//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.derailed/config.json`) and environment.
//! Environment variables override the file for the gateway URL, API URL, and token.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::ReconnectPolicy;

/// Top-level client config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway (WebSocket) settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// HTTP API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Stored credential settings.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Gateway URL, handshake deadline, and reconnect behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway (default "ws://127.0.0.1:4000/"). Overridden by DERAILED_GATEWAY_URL env.
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// How long to wait for hello after the socket opens before reconnecting (default 10000).
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt (default 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay (default 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Symmetric jitter applied to each delay, 0.0..=1.0 (default 0.2).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Consecutive failed attempts before giving up. `null` retries forever (default 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

/// HTTP API base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL for register/login (default "http://127.0.0.1:8000"). Overridden by DERAILED_API_URL env.
    #[serde(default = "default_api_url")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Bearer token. Overridden by DERAILED_TOKEN env.
    pub token: Option<String>,
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:4000/".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_hello_timeout_ms() -> u64 {
    10_000
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_max_attempts() -> Option<u32> {
    Some(10)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            hello_timeout_ms: default_hello_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
        }
    }
}

impl GatewayConfig {
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }
}

impl ReconnectConfig {
    /// Build the runtime backoff policy from these settings.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
            max_attempts: self.max_attempts,
        }
    }
}

/// Read a trimmed, non-empty env var.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the gateway URL: env DERAILED_GATEWAY_URL overrides config.
pub fn resolve_gateway_url(config: &Config) -> String {
    env_override("DERAILED_GATEWAY_URL").unwrap_or_else(|| config.gateway.url.trim().to_string())
}

/// Resolve the API base URL: env DERAILED_API_URL overrides config. Trailing slashes are dropped.
pub fn resolve_api_url(config: &Config) -> String {
    env_override("DERAILED_API_URL")
        .unwrap_or_else(|| config.api.url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the bearer token: env DERAILED_TOKEN overrides config.
pub fn resolve_token(config: &Config) -> Option<String> {
    env_override("DERAILED_TOKEN").or_else(|| {
        config
            .auth
            .token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Directory holding config and the stored token (~/.derailed).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".derailed"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DERAILED_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

/// Load config from the given path, or the default path. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
