//! REST client for an Upstash-compatible Redis counter service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};
use url::Url;

use super::{CounterStore, StoreError, WindowState};
use crate::config::StoreConfig;
use crate::error::{GateError, Result};

/// Fixed-window check-and-increment, evaluated atomically by the store.
///
/// KEYS[1] = counter key, ARGV[1] = limit, ARGV[2] = window in seconds.
/// Returns `{allowed, count, ttl}`.
const FIXED_WINDOW_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
if current >= limit then
  local ttl = redis.call('TTL', KEYS[1])
  if ttl < 0 then
    redis.call('EXPIRE', KEYS[1], window)
    ttl = window
  end
  return {0, current, ttl}
end
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('EXPIRE', KEYS[1], window)
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
  redis.call('EXPIRE', KEYS[1], window)
  ttl = window
end
return {1, count, ttl}
"#;

/// Envelope of every REST response: either `result` or `error`.
#[derive(Debug, Deserialize)]
struct RestResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Counter store reached over authenticated HTTPS.
///
/// Each call is a single request bounded by the configured timeout. No call
/// is retried.
#[derive(Clone)]
pub struct UpstashStore {
    client: Client,
    base_url: Url,
    token: String,
    timeout: Duration,
}

impl std::fmt::Debug for UpstashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstashStore")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl UpstashStore {
    /// Create a client from store configuration.
    ///
    /// Missing or malformed credentials are a configuration error.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| GateError::Config("counter store url is not set".to_string()))?;
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| GateError::Config("counter store token is not set".to_string()))?;

        let base_url = Url::parse(url.trim())
            .map_err(|e| GateError::Config(format!("invalid counter store url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GateError::Config(format!(
                "counter store url cannot be used as a base: {}",
                base_url
            )));
        }

        let timeout = config.timeout();
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token: token.trim().to_string(),
            timeout,
        })
    }

    /// Build an endpoint URL from path segments, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request and unwrap the `result` field of the response.
    async fn send(&self, request: RequestBuilder) -> std::result::Result<Value, StoreError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let parsed: Option<RestResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|r| r.error)
                .unwrap_or_else(|| status_text(status));
            debug!(status = status.as_u16(), message = %message, "Counter store returned an error");
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed = parsed.ok_or_else(|| StoreError::Malformed(truncate(&body)))?;
        if let Some(error) = parsed.error {
            return Err(StoreError::Status {
                status: status.as_u16(),
                message: error,
            });
        }

        trace!(result = %parsed.result, "Counter store response");
        Ok(parsed.result)
    }

    fn transport_error(&self, error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl CounterStore for UpstashStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<u64>, StoreError> {
        let result = self.send(self.client.get(self.endpoint(&["get", key]))).await?;
        match result {
            Value::Null => Ok(None),
            other => as_count(&other).map(Some),
        }
    }

    async fn incr(&self, key: &str) -> std::result::Result<u64, StoreError> {
        let result = self.send(self.client.post(self.endpoint(&["incr", key]))).await?;
        as_count(&result)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> std::result::Result<(), StoreError> {
        let seconds = whole_seconds(ttl).to_string();
        self.send(self.client.post(self.endpoint(&["expire", key, seconds.as_str()])))
            .await?;
        Ok(())
    }

    async fn hit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> std::result::Result<WindowState, StoreError> {
        let command = json!([
            "EVAL",
            FIXED_WINDOW_SCRIPT,
            "1",
            key,
            limit.to_string(),
            whole_seconds(window).to_string(),
        ]);
        let result = self
            .send(self.client.post(self.base_url.clone()).json(&command))
            .await?;

        let values = result
            .as_array()
            .filter(|values| values.len() == 3)
            .ok_or_else(|| StoreError::Malformed(format!("unexpected script result: {}", result)))?;

        let allowed = as_count(&values[0])? == 1;
        let count = as_count(&values[1])?;
        let ttl = Duration::from_secs(as_count(&values[2])?);

        Ok(WindowState {
            allowed,
            count,
            ttl,
        })
    }
}

/// Interpret a JSON value as a non-negative counter. Redis answers `GET`
/// with a string and `INCR` with a number.
fn as_count(value: &Value) -> std::result::Result<u64, StoreError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| StoreError::Malformed(format!("not a counter: {}", n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| StoreError::Malformed(format!("not a counter: {:?}", s))),
        other => Err(StoreError::Malformed(format!("not a counter: {}", other))),
    }
}

/// Redis expiries are whole seconds; never round a window down to zero.
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_u16().to_string())
}

fn truncate(body: &str) -> String {
    body.chars().take(128).collect()
}
