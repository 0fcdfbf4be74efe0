//! Meeting API routes.
//!
//! Covers the meeting lifecycle: create, upload audio (which submits the
//! transcription), poll, sync, and read the transcript back out.

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::store::{Meeting, MetadataRow, SegmentRow, SpeakerRow};
use crate::transcription::{JobState, TranscribeOverrides, TranscriptionError};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize, Default)]
pub struct CreateMeetingRequest {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    /// Maximum results (default 50)
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UploadParams {
    /// Stored blob filename (default audio.wav)
    pub filename: Option<String>,
}

/// Full transcript read model for one meeting.
#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub meeting: Meeting,
    pub segments: Vec<SegmentRow>,
    pub speakers: Vec<SpeakerRow>,
    pub metadata: Vec<MetadataRow>,
}

/// Create the meetings router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_meeting).get(list_meetings))
        .route("/:id", get(get_meeting))
        .route("/:id/audio", post(upload_audio))
        .route("/:id/transcription", post(start_transcription))
        .route("/:id/transcription/status", get(transcription_status))
        .route("/:id/transcription/sync", post(sync_transcription))
        .route("/:id/transcript", get(get_transcript))
}

/// POST /meetings - Create a meeting shell awaiting audio.
async fn create_meeting(
    State(state): State<AppState>,
    Json(req): Json<CreateMeetingRequest>,
) -> ApiResult<(StatusCode, Json<Meeting>)> {
    let meeting = state
        .store
        .create_meeting(crate::store::NewMeeting {
            user_id: req.user_id,
            title: req.title,
            language: req.language,
        })
        .await?;

    info!("Created meeting {}", meeting.id);
    Ok((StatusCode::CREATED, Json(meeting)))
}

/// GET /meetings - List recent meetings.
async fn list_meetings(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Meeting>>> {
    let meetings = state
        .store
        .list_meetings(params.limit.unwrap_or(50))
        .await?;
    Ok(Json(meetings))
}

/// GET /meetings/:id - Get a single meeting.
async fn get_meeting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Meeting>> {
    let meeting = state
        .store
        .get_meeting(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Meeting {} not found", id)))?;
    Ok(Json(meeting))
}

/// POST /meetings/:id/audio - Store the recording and submit transcription.
async fn upload_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Audio body is empty"));
    }

    state
        .store
        .get_meeting(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Meeting {} not found", id)))?;

    let filename = params.filename.unwrap_or_else(|| "audio.wav".to_string());
    // Blob paths are flat per meeting; no client-controlled directories.
    let filename = filename.replace(['/', '\\'], "_");

    let audio_url = state
        .blob
        .upload(&format!("meetings/{}/{}", id, filename), &body)
        .await?;
    state.store.set_audio_url(&id, &audio_url).await?;

    let job_id = state
        .service
        .transcribe(&id, &audio_url, &TranscribeOverrides::default())
        .await?;

    Ok(Json(json!({
        "audio_url": audio_url,
        "job_id": job_id,
        "status": "processing",
    })))
}

/// POST /meetings/:id/transcription - (Re)submit stored audio, with optional
/// per-request feature overrides.
async fn start_transcription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(overrides): Json<TranscribeOverrides>,
) -> ApiResult<Json<Value>> {
    let meeting = state
        .store
        .get_meeting(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Meeting {} not found", id)))?;

    let audio_url = meeting
        .audio_url
        .ok_or(TranscriptionError::NoAudio(id.clone()))?;

    let job_id = state.service.transcribe(&id, &audio_url, &overrides).await?;
    Ok(Json(json!({ "job_id": job_id, "status": "processing" })))
}

/// GET /meetings/:id/transcription/status - Poll the provider directly.
async fn transcription_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobState>> {
    let status = state.service.get_status(&id).await?;
    Ok(Json(status))
}

/// POST /meetings/:id/transcription/sync - Fetch the full result and apply
/// it, for deliveries that never arrived.
async fn sync_transcription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.sync_result(&id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /meetings/:id/transcript - Segments, speakers, and metadata.
async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TranscriptResponse>> {
    let meeting = state
        .store
        .get_meeting(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Meeting {} not found", id)))?;

    let segments = state.store.get_segments(&id).await?;
    let speakers = state.store.get_speakers(&id).await?;
    let metadata = state.store.get_metadata(&id).await?;

    Ok(Json(TranscriptResponse {
        meeting,
        segments,
        speakers,
        metadata,
    }))
}
