//! Forwarding of admitted requests to the upstream chat application.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::admission::ErrorBody;
use crate::config::UpstreamConfig;
use crate::error::{GateError, Result};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[derive(Debug)]
enum ProxyError {
    PayloadTooLarge,
    Timeout,
    Unavailable,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ProxyError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "request body too large"),
            ProxyError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "upstream timed out"),
            ProxyError::Unavailable => (StatusCode::BAD_GATEWAY, "upstream unavailable"),
        };
        (status, Json(ErrorBody::new(error))).into_response()
    }
}

/// Reverse proxy to the chat application.
///
/// The request's method, path, query, headers and body are forwarded; the
/// upstream response body is streamed back.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    client: Client,
    base_url: Url,
    max_body_bytes: usize,
}

impl UpstreamProxy {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| GateError::Config(format!("invalid upstream url: {}", e)))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("chatgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Upstream URL for a request path and query.
    fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base_path, path));
        url.set_query(query);
        url
    }

    async fn forward(&self, request: Request) -> std::result::Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| ProxyError::PayloadTooLarge)?;

        let url = self.target(parts.uri.path(), parts.uri.query());
        debug!(method = %parts.method, url = %url, "Forwarding request upstream");

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(forwardable(&parts.headers))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Upstream request failed");
                if e.is_timeout() {
                    ProxyError::Timeout
                } else {
                    ProxyError::Unavailable
                }
            })?;

        let status = upstream.status();
        let headers = forwardable(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Fallback handler forwarding every request to the upstream.
pub async fn forward(State(proxy): State<Arc<UpstreamProxy>>, request: Request) -> Response {
    match proxy.forward(request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
