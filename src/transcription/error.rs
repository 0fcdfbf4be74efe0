//! Error taxonomy for the transcription pipeline.
//!
//! Configuration problems surface at provider construction, transient
//! backend failures at the call site, and capability mismatches at
//! selection time. Handlers map these onto HTTP statuses in `api::error`.

use thiserror::Error;

use super::capabilities::Feature;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Provider is disabled or missing credentials. Fatal at construction,
    /// never retried automatically.
    #[error("Provider '{provider}' is not configured: {reason}")]
    ProviderNotConfigured { provider: String, reason: String },

    /// No enabled provider covers the required feature set.
    #[error("No capable provider for features: {}", format_features(.missing))]
    NoCapableProvider { missing: Vec<Feature> },

    /// A specific provider was asked for features it does not declare.
    #[error("Provider '{provider}' does not support: {}", format_features(.missing))]
    UnsupportedFeatures {
        provider: String,
        missing: Vec<Feature>,
    },

    /// The meeting already has a non-terminal job; resubmission requires the
    /// prior job to reach a terminal state first.
    #[error("Meeting '{meeting_id}' already has transcription job '{job_id}' in progress")]
    JobAlreadyInProgress { meeting_id: String, job_id: String },

    /// `fetch` was called before the backend reported completion.
    #[error("Transcription '{job_id}' is not ready (status: {status})")]
    NotReady { job_id: String, status: String },

    /// Non-2xx response or network failure from the backend.
    #[error("Provider request failed{}: {message}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Request {
        status: Option<u16>,
        message: String,
    },

    #[error("Meeting '{0}' not found")]
    MeetingNotFound(String),

    /// Stale or duplicate callback for a job no meeting references.
    #[error("No meeting found for transcription job '{0}'")]
    MeetingNotFoundForJob(String),

    #[error("Malformed provider payload: {0}")]
    MalformedPayload(String),

    #[error("Meeting '{0}' has no stored audio to transcribe")]
    NoAudio(String),

    #[error("Meeting '{0}' has no transcription job")]
    NoJob(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn format_features(features: &[Feature]) -> String {
    features
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl TranscriptionError {
    /// Translate a reqwest failure into a `Request` error, preserving the
    /// backend status where one exists.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        Self::Request {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_capable_provider_names_features() {
        let err = TranscriptionError::NoCapableProvider {
            missing: vec![Feature::Diarization, Feature::Topics],
        };
        assert_eq!(
            err.to_string(),
            "No capable provider for features: diarization, topics"
        );
    }

    #[test]
    fn test_request_error_with_status() {
        let err = TranscriptionError::Request {
            status: Some(503),
            message: "service unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("service unavailable"));
    }
}
