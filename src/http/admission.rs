//! Admission middleware.
//!
//! Runs once per inbound request. Requests on matched paths are checked
//! against the limiter and either forwarded with `X-RateLimit-*` headers or
//! answered with 429. Unmatched paths pass through without rate-limit
//! headers. Every path is first rewritten to its canonical form.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info_span, trace, Instrument};
use uuid::Uuid;

use super::matcher::{canonical_path, PathMatcher};
use crate::config::GatewayConfig;
use crate::metrics::AdmissionMetrics;
use crate::ratelimit::{ClientIdentity, Decision, Degraded, DegradationPolicy, RateLimiter};
use crate::store::CounterStore;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// JSON body of every error answered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Responses the middleware answers instead of forwarding.
#[derive(Debug)]
pub enum AdmissionRejection {
    /// The identity used up its window. Answered with 429.
    RateLimited {
        decision: Decision,
        include_reset: bool,
    },
    /// The request path has no canonical form. Answered with 400.
    InvalidPath,
    /// The check itself failed. Answered with 500.
    Internal(String),
}

impl IntoResponse for AdmissionRejection {
    fn into_response(self) -> Response {
        match self {
            AdmissionRejection::RateLimited {
                decision,
                include_reset,
            } => {
                let body = ErrorBody::new("Rate limit exceeded")
                    .with_message("Too many requests, please try again later.");
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                let headers = response.headers_mut();
                decision.apply_headers(headers, include_reset);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after));
                response
            }
            AdmissionRejection::InvalidPath => {
                let body = ErrorBody::new("Invalid request path");
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            AdmissionRejection::Internal(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody::new(error))).into_response()
            }
        }
    }
}

/// Everything the admission middleware needs, constructed once at startup.
#[derive(Debug)]
pub struct Admission {
    limiter: RateLimiter,
    matcher: PathMatcher,
    degradation: DegradationPolicy,
    metrics: Arc<AdmissionMetrics>,
    emit_reset_header: bool,
}

impl Admission {
    pub fn new(
        limiter: RateLimiter,
        matcher: PathMatcher,
        degradation: DegradationPolicy,
        metrics: Arc<AdmissionMetrics>,
    ) -> Self {
        Self {
            limiter,
            matcher,
            degradation,
            metrics,
            emit_reset_header: true,
        }
    }

    /// Build the admission stack described by `config` over `store`.
    pub fn from_config(
        config: &GatewayConfig,
        store: Arc<dyn CounterStore>,
        metrics: Arc<AdmissionMetrics>,
    ) -> Self {
        let limiter = RateLimiter::new(store, config.limiter.max_requests, config.limiter.window())
            .with_key_prefix(config.store.key_prefix.clone());
        let degradation = DegradationPolicy::new(config.limiter.on_store_error, metrics.clone());

        Self::new(limiter, PathMatcher::from_config(&config.paths), degradation, metrics)
            .with_reset_header(config.limiter.emit_reset_header)
    }

    pub fn with_reset_header(mut self, emit: bool) -> Self {
        self.emit_reset_header = emit;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn degradation(&self) -> &DegradationPolicy {
        &self.degradation
    }

    pub fn metrics(&self) -> &Arc<AdmissionMetrics> {
        &self.metrics
    }

    /// Check `request` and either run `next` or answer directly.
    async fn admit(&self, identity: ClientIdentity, request: Request, next: Next) -> Response {
        match self.limiter.check(&identity).await {
            Ok(decision) => {
                self.degradation.on_success();

                if !decision.allowed {
                    self.metrics.record_rejected();
                    return AdmissionRejection::RateLimited {
                        decision,
                        include_reset: self.emit_reset_header,
                    }
                    .into_response();
                }

                self.metrics.record_admitted();
                trace!(remaining = decision.remaining, "Request admitted");

                let mut response = next.run(request).await;
                decision.apply_headers(response.headers_mut(), self.emit_reset_header);
                response
            }
            Err(err) => match self.degradation.on_failure(&identity, &err) {
                Degraded::Forward => next.run(request).await,
                Degraded::Block => {
                    AdmissionRejection::Internal("Rate limiter unavailable".to_string())
                        .into_response()
                }
            },
        }
    }
}

/// `uri` with its path replaced, keeping scheme, authority and query.
fn with_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

/// Axum middleware enforcing [`Admission`].
///
/// The request path is rewritten to its canonical form before matching, so
/// the path that was checked is the path that is forwarded.
///
/// Install with `axum::middleware::from_fn_with_state(admission, admission_middleware)`.
pub async fn admission_middleware(
    State(admission): State<Arc<Admission>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(path) = canonical_path(request.uri().path()) else {
        debug!(path = %request.uri().path(), "Rejecting request path without canonical form");
        return AdmissionRejection::InvalidPath.into_response();
    };
    if path != request.uri().path() {
        match with_path(request.uri(), &path) {
            Some(uri) => *request.uri_mut() = uri,
            None => return AdmissionRejection::InvalidPath.into_response(),
        }
    }

    if !admission.matcher.matches(&path) {
        admission.metrics.record_bypassed();
        return next.run(request).await;
    }

    let identity = ClientIdentity::from_headers(request.headers());
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "admission",
        identity = %identity,
        path = %path,
        request_id = %request_id,
    );

    admission.admit(identity, request, next).instrument(span).await
}

/// Converts a panic inside the request pipeline into a 500 JSON response.
pub fn panic_response(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Request handler panicked");

    AdmissionRejection::Internal("Internal server error".to_string()).into_response()
}
