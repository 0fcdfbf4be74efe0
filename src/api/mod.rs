//! REST API server for Meetscribe.
//!
//! Provides HTTP endpoints for:
//! - Meeting lifecycle (create, upload audio, list, get)
//! - Transcription control (submit, status poll, manual sync)
//! - Transcript read model (segments, speakers, metadata)
//! - Provider webhook ingestion

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

use crate::blob::BlobStore;
use crate::store::MeetingStore;
use crate::transcription::TranscriptionService;

/// Shared handler state: every collaborator behind an `Arc`, cloned per
/// request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MeetingStore>,
    pub blob: Arc<dyn BlobStore>,
    pub service: Arc<TranscriptionService>,
}

pub struct ApiServer {
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    pub async fn start(self) -> Result<()> {
        let app = router(self.state);

        // Webhook callbacks arrive from outside, so bind all interfaces.
        let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", self.port)).await?;

        info!("API server listening on http://0.0.0.0:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /version       - Get version info");
        info!("  POST /meetings      - Create a meeting");
        info!("  GET  /meetings      - List meetings");
        info!("  GET  /meetings/:id  - Get a meeting");
        info!("  POST /meetings/:id/audio - Upload audio and transcribe");
        info!("  POST /meetings/:id/transcription - Resubmit transcription");
        info!("  GET  /meetings/:id/transcription/status - Poll job status");
        info!("  POST /meetings/:id/transcription/sync - Fetch and apply result");
        info!("  GET  /meetings/:id/transcript - Full transcript read model");
        info!("  POST /webhooks/:provider - Provider callback");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Build the full application router. Separate from `start` so tests can
/// drive it without a listener.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Root and version endpoints
        .route("/", get(status))
        .route("/version", get(version))
        .nest("/meetings", routes::meetings::router())
        .nest("/webhooks", routes::webhook::router())
        .layer(ServiceBuilder::new())
        .with_state(state)
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "meetscribe",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "meetscribe"
    }))
}
