//! HTTP surface: webhook endpoint, health check, and metrics export.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::metrics;

use super::ingest::{IngestOutcome, RejectReason, WebhookIngestor};

/// The GitLab webhook token header.
const TOKEN_HEADER: &str = "x-gitlab-token";

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<WebhookIngestor>,
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/gitlab", post(handle_gitlab_webhook))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_export))
        .with_state(state)
}

/// Binds and serves until the shutdown future resolves.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "webhook server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_gitlab_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.ingestor.ingest(token, &body).await {
        Ok(IngestOutcome::Accepted { review_id, job_id }) => {
            metrics::record_webhook("accepted");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "accepted",
                    "review_id": review_id,
                    "job_id": job_id.map(|id| id.to_string()),
                })),
            )
        }
        Ok(IngestOutcome::Ignored { reason }) => {
            metrics::record_webhook("ignored");
            (
                StatusCode::OK,
                Json(json!({"status": "ignored", "reason": reason})),
            )
        }
        Ok(IngestOutcome::Rejected(RejectReason::Malformed(message))) => {
            metrics::record_webhook("rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "rejected", "reason": message})),
            )
        }
        Ok(IngestOutcome::Rejected(RejectReason::InvalidToken)) => {
            metrics::record_webhook("rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"status": "rejected", "reason": "invalid webhook token"})),
            )
        }
        Err(e) => {
            error!(error = %e, "webhook ingestion failed");
            metrics::record_webhook("error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "reason": "internal error"})),
            )
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_export() -> String {
    metrics::export_metrics()
}
