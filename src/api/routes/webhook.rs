//! Provider webhook route.
//!
//! Backends call `POST /webhooks/:provider` with the shared secret in the
//! `X-Webhook-Secret` header. Authentication happens before any payload
//! inspection; a rejected delivery never touches the store.

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Create the webhook router.
pub fn router() -> Router<AppState> {
    Router::new().route("/:provider", post(handle_webhook))
}

/// POST /webhooks/:provider - Reconcile a delivery from a backend.
async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    if let Some(expected) = state.service.webhook_secret() {
        let presented = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != expected {
            warn!("Rejected webhook for provider '{}': bad secret", provider);
            return Err(ApiError::unauthorized("Invalid webhook secret"));
        }
    }

    let outcome = state.service.apply_webhook(&provider, &payload).await?;

    info!(
        "Webhook from '{}' moved meeting {} to {}",
        provider,
        outcome.meeting_id,
        outcome.status.as_str()
    );

    Ok(Json(json!({
        "success": true,
        "meeting_id": outcome.meeting_id,
        "status": outcome.status,
        "ingested": outcome.ingested,
    })))
}
