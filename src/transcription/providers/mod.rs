//! Transcription backend abstraction.
//!
//! Each backend module translates the generic submit/status/fetch contract
//! into its own wire protocol and normalizes results into the canonical
//! shapes below, keeping field names and units (milliseconds, 0-1 relevance)
//! backend-agnostic for the rest of the system.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::capabilities::FeatureSet;
use super::error::TranscriptionError;

pub mod assembly_ai;
pub mod whisper_api;

pub use assembly_ai::AssemblyAiProvider;
pub use whisper_api::WhisperApiProvider;

/// Coarse job lifecycle as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Terminal statuses accept no further transitions without a new job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// Status poll result: coarse status plus optional progress and error text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl JobState {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            error: None,
        }
    }
}

/// Options for a transcription submission, assembled by the service from
/// configuration and per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    pub language: Option<String>,
    pub diarization: bool,
    pub sentiment: bool,
    pub topics: bool,
    pub entities: bool,
    pub highlights: bool,
    pub chapters: bool,
    /// Callback URL + shared secret the backend embeds in future webhooks.
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

/// A contiguous span of speech with millisecond offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentData {
    pub start_ms: i64,
    pub end_ms: i64,
    pub speaker: Option<String>,
    pub text: String,
    pub confidence: Option<f64>,
    pub sentiment: Option<String>,
}

/// A diarized participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerData {
    pub label: String,
    pub display_name: Option<String>,
}

/// A topic derived from backend highlight/category structures, mapped back
/// onto the segments whose time ranges intersect it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicData {
    pub label: String,
    /// 0-1 relevance score.
    pub relevance: f64,
    /// Indices into `TranscriptionResult::segments`.
    pub segment_indexes: Vec<usize>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityData {
    pub label: String,
    pub entity_type: String,
    pub segment_indexes: Vec<usize>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightData {
    pub text: String,
    pub relevance: f64,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterData {
    pub headline: String,
    pub summary: Option<String>,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Canonical result model every backend normalizes into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub job_id: String,
    pub language: Option<String>,
    pub duration_ms: Option<i64>,
    pub segments: Vec<SegmentData>,
    pub speakers: Vec<SpeakerData>,
    pub topics: Vec<TopicData>,
    pub entities: Vec<EntityData>,
    pub highlights: Vec<HighlightData>,
    pub chapters: Vec<ChapterData>,
}

/// A parsed inbound callback: the backend job it refers to, the reported
/// state, and the normalized result when the payload carried one.
#[derive(Debug)]
pub struct WebhookEvent {
    pub job_id: String,
    pub state: JobState,
    pub result: Option<TranscriptionResult>,
}

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Static capability declaration used for provider selection.
    fn features(&self) -> FeatureSet;

    /// Build the backend-specific payload, submit the job, and return the
    /// backend's job identifier. The caller transitions the meeting on
    /// failure; this method only reports it.
    async fn submit(
        &self,
        audio_url: &str,
        options: &TranscribeOptions,
    ) -> Result<String, TranscriptionError>;

    /// Synchronous poll path, used when webhooks are delayed or disabled.
    async fn status(&self, job_id: &str) -> Result<JobState, TranscriptionError>;

    /// Retrieve and normalize the full result. Errors with `NotReady` if the
    /// job has not completed.
    async fn fetch(&self, job_id: &str) -> Result<TranscriptionResult, TranscriptionError>;

    /// Parse a backend-specific webhook payload. Pure; no network or store
    /// access.
    fn parse_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<WebhookEvent, TranscriptionError>;
}
