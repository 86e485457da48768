//! Configuration parsing for the Meridian client.
//!
//! All components read their settings from a single JSON config file.
//! Credentials may be omitted from the file and supplied via the
//! `MERIDIAN_API_KEY` / `MERIDIAN_API_SECRET` environment variables instead.
//!
//! # Example config
//!
//! ```json
//! {
//!   "credentials": { "api_key": "mk-...", "api_secret": "..." },
//!   "endpoints": {
//!     "rest_url": "https://api.meridian.example",
//!     "md_stream_url": "wss://stream.meridian.example/v1/md",
//!     "td_stream_url": "wss://stream.meridian.example/v1/td"
//!   },
//!   "reconnect": { "min_delay_ms": 500, "max_delay_ms": 30000, "max_attempts": 10 },
//!   "throttle": { "max_attempts": 4, "request_timeout_ms": 10000 },
//!   "pagination": { "page_size": 1000 }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::MeridianError;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// API credentials. Optional in the file — see [`Credentials::resolve`].
    #[serde(default)]
    pub credentials: Credentials,

    /// Service endpoint URLs.
    #[serde(default)]
    pub endpoints: Endpoints,

    /// Streaming reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Unary request retry/throttle policy.
    #[serde(default)]
    pub throttle: ThrottlePolicy,

    /// Pagination defaults.
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// API key pair used for both REST and streaming authentication.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl Credentials {
    /// Return the effective `(key, secret)` pair, falling back to the
    /// `MERIDIAN_API_KEY` / `MERIDIAN_API_SECRET` environment variables for
    /// any field the config file leaves unset.
    pub fn resolve(&self) -> Result<(String, String), MeridianError> {
        let key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("MERIDIAN_API_KEY").ok())
            .ok_or_else(|| MeridianError::Config("api_key not configured".into()))?;
        let secret = self
            .api_secret
            .clone()
            .or_else(|| std::env::var("MERIDIAN_API_SECRET").ok())
            .ok_or_else(|| MeridianError::Config("api_secret not configured".into()))?;
        Ok((key, secret))
    }
}

/// Service endpoint URLs, with production defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    #[serde(default = "default_md_stream_url")]
    pub md_stream_url: String,

    #[serde(default = "default_td_stream_url")]
    pub td_stream_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            md_stream_url: default_md_stream_url(),
            td_stream_url: default_td_stream_url(),
        }
    }
}

fn default_rest_url() -> String {
    "https://api.meridian.example".to_string()
}

fn default_md_stream_url() -> String {
    "wss://stream.meridian.example/v1/md".to_string()
}

fn default_td_stream_url() -> String {
    "wss://stream.meridian.example/v1/td".to_string()
}

/// Streaming reconnect policy.
///
/// The computed delay on attempt `n` (0-based) is
/// `clamp(min_delay * 2^n, min_delay, max_delay)`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectPolicy {
    /// First reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Delay ceiling in milliseconds.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Consecutive failed attempts before the session terminates.
    #[serde(default = "default_reconnect_max_attempts")]
    pub max_attempts: u32,

    /// Vendor fault codes on the stream that are retried rather than treated
    /// as fatal (connection-limit and throttling codes by default; credential
    /// rejections are never listed here).
    #[serde(default = "default_retryable_fault_codes")]
    pub retryable_fault_codes: Vec<u16>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay_ms: default_reconnect_min_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            max_attempts: default_reconnect_max_attempts(),
            retryable_fault_codes: default_retryable_fault_codes(),
        }
    }
}

impl ReconnectPolicy {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_reconnect_min_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

fn default_retryable_fault_codes() -> Vec<u16> {
    vec![406, 429]
}

/// Unary request retry/throttle policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottlePolicy {
    /// Total attempts per request, including the first.
    #[serde(default = "default_throttle_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds.
    #[serde(default = "default_throttle_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Delay ceiling in milliseconds.
    #[serde(default = "default_throttle_max_delay_ms")]
    pub max_delay_ms: u64,

    /// HTTP statuses treated as transient server faults.
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,

    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_throttle_max_attempts(),
            min_delay_ms: default_throttle_min_delay_ms(),
            max_delay_ms: default_throttle_max_delay_ms(),
            retryable_statuses: default_retryable_statuses(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ThrottlePolicy {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_throttle_max_attempts() -> u32 {
    4
}

fn default_throttle_min_delay_ms() -> u64 {
    250
}

fn default_throttle_max_delay_ms() -> u64 {
    10_000
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![502, 503, 504]
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Pagination defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    /// Default page size sent with listing requests; individual requests may
    /// override it.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    1_000
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
