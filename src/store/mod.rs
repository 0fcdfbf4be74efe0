//! Persistent-store collaborator interface.
//!
//! The pipeline only touches storage through `MeetingStore`; the SQLite
//! implementation lives in `store::sqlite`. Meeting status and job id are
//! mutated only by the transcription service (on submit) and webhook
//! ingestion (on callback).

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::transcription::providers::JobStatus;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Coarse transcription status of a meeting.
///
/// Lifecycle: `uploaded → processing → {completed | error}`, with `queued`
/// as a recorded intermediate that stays in the in-flight category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Error,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Uploaded => "uploaded",
            MeetingStatus::Queued => "queued",
            MeetingStatus::Processing => "processing",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(MeetingStatus::Uploaded),
            "queued" => Some(MeetingStatus::Queued),
            "processing" => Some(MeetingStatus::Processing),
            "completed" => Some(MeetingStatus::Completed),
            "error" => Some(MeetingStatus::Error),
            _ => None,
        }
    }

    /// A non-terminal job is attached; resubmission must be rejected.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, MeetingStatus::Queued | MeetingStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MeetingStatus::Completed | MeetingStatus::Error)
    }
}

impl From<JobStatus> for MeetingStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => MeetingStatus::Queued,
            JobStatus::Processing => MeetingStatus::Processing,
            JobStatus::Completed => MeetingStatus::Completed,
            JobStatus::Error => MeetingStatus::Error,
        }
    }
}

/// One recording under analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub audio_url: Option<String>,
    /// Backend job identifier; at most one non-terminal job per meeting.
    pub job_id: Option<String>,
    /// Provider that owns `job_id`.
    pub provider: Option<String>,
    pub status: MeetingStatus,
    pub error: Option<String>,
    pub language: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewMeeting {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
}

/// A stored segment row. Upsert key: meeting + time range + speaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRow {
    pub start_ms: i64,
    pub end_ms: i64,
    pub speaker: Option<String>,
    pub text: String,
    pub confidence: Option<f64>,
    pub sentiment: Option<String>,
    pub is_question: bool,
    pub is_action_item: bool,
}

/// Aggregate stats for one diarized participant, derived from segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerRow {
    pub label: String,
    pub display_name: Option<String>,
    pub speaking_time_ms: i64,
    pub word_count: i64,
    pub interruptions: i64,
    /// Sentiment label -> segment count, serialized as JSON.
    pub sentiment_distribution: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    Topic,
    Entity,
    Highlight,
    Chapter,
    ActionItem,
    Question,
}

impl MetadataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKind::Topic => "topic",
            MetadataKind::Entity => "entity",
            MetadataKind::Highlight => "highlight",
            MetadataKind::Chapter => "chapter",
            MetadataKind::ActionItem => "action_item",
            MetadataKind::Question => "question",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topic" => Some(MetadataKind::Topic),
            "entity" => Some(MetadataKind::Entity),
            "highlight" => Some(MetadataKind::Highlight),
            "chapter" => Some(MetadataKind::Chapter),
            "action_item" => Some(MetadataKind::ActionItem),
            "question" => Some(MetadataKind::Question),
            _ => None,
        }
    }
}

/// Secondary analytical artifact (topic/entity/highlight/chapter), scoped to
/// one meeting. Upsert key: meeting + kind + value + start offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRow {
    pub kind: MetadataKind,
    pub value: String,
    /// Kind-specific extra (entity type, chapter summary).
    pub detail: Option<String>,
    pub confidence: Option<f64>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn create_meeting(&self, meeting: NewMeeting) -> Result<Meeting>;

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>>;

    /// Resolve a meeting by its backend job identifier.
    async fn find_meeting_by_job(&self, job_id: &str) -> Result<Option<Meeting>>;

    async fn list_meetings(&self, limit: usize) -> Result<Vec<Meeting>>;

    async fn set_audio_url(&self, id: &str, audio_url: &str) -> Result<()>;

    /// Attach a job and transition to `processing` in one conditional write.
    /// Returns false (and writes nothing) when the meeting already has a
    /// non-terminal job, so concurrent double submissions cannot both win.
    async fn assign_job(&self, id: &str, job_id: &str, provider: &str) -> Result<bool>;

    async fn update_meeting_status(
        &self,
        id: &str,
        status: MeetingStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Record language/duration reported with a completed result.
    async fn update_meeting_result(
        &self,
        id: &str,
        language: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<()>;

    async fn upsert_segments(&self, meeting_id: &str, segments: &[SegmentRow]) -> Result<()>;

    async fn upsert_speakers(&self, meeting_id: &str, speakers: &[SpeakerRow]) -> Result<()>;

    async fn upsert_metadata(&self, meeting_id: &str, metadata: &[MetadataRow]) -> Result<()>;

    async fn get_segments(&self, meeting_id: &str) -> Result<Vec<SegmentRow>>;

    async fn get_speakers(&self, meeting_id: &str) -> Result<Vec<SpeakerRow>>;

    async fn get_metadata(&self, meeting_id: &str) -> Result<Vec<MetadataRow>>;
}
