//! Throttled REST transport.
//!
//! [`RestClient`] funnels every unary request through the
//! [`RetryEngine`](crate::retry::RetryEngine): it maps HTTP statuses onto the
//! [`MeridianError`] taxonomy, extracts rate-limit headers into the shared
//! snapshot, and decodes the vendor's structured error body for fatal
//! responses.
//!
//! # Response headers
//!
//! | Header                  | Meaning                           |
//! |-------------------------|-----------------------------------|
//! | `x-ratelimit-limit`     | Requests allowed per window       |
//! | `x-ratelimit-remaining` | Requests left in the window       |
//! | `x-ratelimit-reset`     | Window reset (epoch seconds)      |
//! | `retry-after`           | Seconds to wait after a 429       |

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::config::ThrottlePolicy;
use crate::error::{MeridianError, RetryHint};
use crate::retry::{RateLimit, ResponseMeta, RetryEngine};

/// Header carrying the API key on every request.
pub const API_KEY_HEADER: &str = "X-MRD-API-KEY";

/// Policy-wrapped HTTP client bound to one base URL.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    engine: RetryEngine,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, policy: ThrottlePolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            engine: RetryEngine::new(policy),
        }
    }

    /// Read-only view of the most recent rate-limit standing.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.engine.rate_limit()
    }

    /// GET `path` with query parameters, decoding the JSON response.
    pub async fn get<T>(&self, path: &str, query: Vec<(String, String)>) -> Result<T, MeridianError>
    where
        T: DeserializeOwned,
    {
        self.request_with(Method::GET, path, move |rb| rb.query(&query))
            .await
    }

    /// Issue a request, rebuilding it per attempt via `build` (so signatures
    /// and timestamps stay fresh across retries), and decode the JSON
    /// response.
    pub async fn request_with<T, B>(&self, method: Method, path: &str, build: B) -> Result<T, MeridianError>
    where
        T: DeserializeOwned,
        B: Fn(RequestBuilder) -> RequestBuilder,
    {
        self.request_inner(method, path, build, None).await
    }

    /// Like [`request_with`](Self::request_with), but a pending retry delay
    /// aborts promptly when `cancel` flips to `true`.
    pub async fn request_with_cancel<T, B>(
        &self,
        method: Method,
        path: &str,
        build: B,
        cancel: watch::Receiver<bool>,
    ) -> Result<T, MeridianError>
    where
        T: DeserializeOwned,
        B: Fn(RequestBuilder) -> RequestBuilder,
    {
        self.request_inner(method, path, build, Some(cancel)).await
    }

    /// Issue a request whose success response carries no meaningful body
    /// (DELETE endpoints answering 204).
    pub async fn request_empty<B>(&self, method: Method, path: &str, build: B) -> Result<(), MeridianError>
    where
        B: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = format!("{}{}", self.base_url, path);
        self.engine
            .execute(|| async {
                let rb = self
                    .http
                    .request(method.clone(), &url)
                    .header(API_KEY_HEADER, &self.api_key);
                let response = build(rb)
                    .send()
                    .await
                    .map_err(|e| MeridianError::Network(e.to_string()))?;
                let meta = parse_meta(response.headers());
                let status = response.status();
                if status.is_success() {
                    Ok(((), meta))
                } else {
                    Err(error_for_status(status, response).await)
                }
            })
            .await
    }

    async fn request_inner<T, B>(
        &self,
        method: Method,
        path: &str,
        build: B,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<T, MeridianError>
    where
        T: DeserializeOwned,
        B: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = format!("{}{}", self.base_url, path);
        self.engine
            .execute_with_cancel(
                || async {
                    let rb = self
                        .http
                        .request(method.clone(), &url)
                        .header(API_KEY_HEADER, &self.api_key);
                    let response = build(rb)
                        .send()
                        .await
                        .map_err(|e| MeridianError::Network(e.to_string()))?;

                    let meta = parse_meta(response.headers());
                    let status = response.status();
                    if status.is_success() {
                        let value = response
                            .json::<T>()
                            .await
                            .map_err(|e| MeridianError::Parse(e.to_string()))?;
                        Ok((value, meta))
                    } else {
                        Err(error_for_status(status, response).await)
                    }
                },
                cancel,
            )
            .await
    }
}

/// Map a non-success response onto the error taxonomy, keeping as much
/// server-supplied diagnostic payload as could be parsed.
async fn error_for_status(status: StatusCode, response: reqwest::Response) -> MeridianError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let hint = parse_retry_hint(response.headers());
        return MeridianError::RateLimited { hint };
    }

    let raw = response.text().await.unwrap_or_default();
    let body = serde_json::from_str(&raw).ok();
    MeridianError::Http {
        status: status.as_u16(),
        body,
        raw,
    }
}

/// Rate-limit standing from response headers; absent fields stay `None`.
fn parse_meta(headers: &HeaderMap) -> ResponseMeta {
    ResponseMeta {
        limit: header_u64(headers, "x-ratelimit-limit").map(|v| v as u32),
        remaining: header_u64(headers, "x-ratelimit-remaining").map(|v| v as u32),
        reset_at: header_u64(headers, "x-ratelimit-reset").and_then(epoch_to_datetime),
    }
}

/// Resume hint for a 429: prefer the relative `retry-after`, fall back to the
/// absolute window reset.
fn parse_retry_hint(headers: &HeaderMap) -> Option<RetryHint> {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(RetryHint::After(Duration::from_secs(secs)));
    }
    header_u64(headers, "x-ratelimit-reset")
        .and_then(epoch_to_datetime)
        .map(RetryHint::Until)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn epoch_to_datetime(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
}
