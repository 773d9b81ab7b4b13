//! Admin listener: liveness and metrics. Never rate limited.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::admission::Admission;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    /// Most recent counter store failure, while an outage is ongoing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
}

/// Router for the admin listener.
pub fn admin_router(admission: Arc<Admission>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(admission)
}

/// The gateway is live whenever it can answer; a failing store degrades
/// admission but does not make the process unhealthy.
async fn healthz(State(admission): State<Arc<Admission>>) -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        store_error: admission.degradation().last_error().map(|e| e.to_string()),
    })
}

async fn metrics(State(admission): State<Arc<Admission>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        admission.metrics().snapshot().to_prometheus(),
    )
}
