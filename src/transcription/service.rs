//! Transcription orchestration.
//!
//! The service owns the provider registry and the store handle: it submits
//! jobs (rejecting double submissions), answers status polls, and
//! reconciles webhook callbacks and poll-driven fetches through the shared
//! ingestion path.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::capabilities::Feature;
use super::error::TranscriptionError;
use super::ingest;
use super::providers::{JobState, JobStatus, TranscribeOptions, TranscriptionProvider};
use super::registry::ProviderRegistry;
use crate::store::{MeetingStatus, MeetingStore};

/// Per-request overrides applied over the configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscribeOverrides {
    pub language: Option<String>,
    pub diarization: Option<bool>,
    pub sentiment: Option<bool>,
    pub topics: Option<bool>,
    pub entities: Option<bool>,
    pub highlights: Option<bool>,
    pub chapters: Option<bool>,
}

/// What a processed webhook did, for logging and the HTTP response.
#[derive(Debug)]
pub struct WebhookOutcome {
    pub meeting_id: String,
    pub status: MeetingStatus,
    pub ingested: bool,
}

pub struct TranscriptionService {
    store: Arc<dyn MeetingStore>,
    registry: Arc<ProviderRegistry>,
    webhook_secret: Option<String>,
    webhook_base_url: String,
}

impl TranscriptionService {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        registry: Arc<ProviderRegistry>,
        webhook_secret: Option<String>,
        webhook_base_url: String,
    ) -> Self {
        Self {
            store,
            registry,
            webhook_secret,
            webhook_base_url: webhook_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Submit a meeting's audio for transcription.
    ///
    /// Rejects meetings that already have a non-terminal job. On provider
    /// failure the meeting is transitioned to `error` with the captured
    /// message and the error is rethrown; retry is the caller's decision.
    pub async fn transcribe(
        &self,
        meeting_id: &str,
        audio_url: &str,
        overrides: &TranscribeOverrides,
    ) -> Result<String, TranscriptionError> {
        let meeting = self
            .store
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| TranscriptionError::MeetingNotFound(meeting_id.to_string()))?;

        if meeting.status.is_in_flight() {
            return Err(TranscriptionError::JobAlreadyInProgress {
                meeting_id: meeting_id.to_string(),
                job_id: meeting.job_id.unwrap_or_default(),
            });
        }

        let options = self.build_options(meeting.language.as_deref(), overrides);
        let required = required_features(&options);
        let provider = self.registry.get_with_features(&required)?;

        let options = TranscribeOptions {
            webhook_url: Some(format!(
                "{}/webhooks/{}",
                self.webhook_base_url,
                provider.name()
            )),
            webhook_secret: self.webhook_secret.clone(),
            ..options
        };

        info!(
            "Submitting meeting {} to provider {}",
            meeting_id,
            provider.name()
        );

        let job_id = match provider.submit(audio_url, &options).await {
            Ok(job_id) => job_id,
            Err(e) => {
                error!("Transcription submit failed for {}: {}", meeting_id, e);
                self.store
                    .update_meeting_status(meeting_id, MeetingStatus::Error, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        // The conditional write loses against a concurrent submission that
        // attached a job after our in-flight check.
        if !self
            .store
            .assign_job(meeting_id, &job_id, provider.name())
            .await?
        {
            warn!(
                "Meeting {} gained job while submitting; dropping duplicate {}",
                meeting_id, job_id
            );
            return Err(TranscriptionError::JobAlreadyInProgress {
                meeting_id: meeting_id.to_string(),
                job_id,
            });
        }

        info!("Meeting {} is processing under job {}", meeting_id, job_id);
        Ok(job_id)
    }

    /// Synchronous status poll via the provider, independent of webhooks.
    pub async fn get_status(&self, meeting_id: &str) -> Result<JobState, TranscriptionError> {
        let (provider, job_id) = self.provider_for_meeting(meeting_id).await?;
        provider.status(&job_id).await
    }

    /// Poll-driven fallback: fetch the full result and apply it through the
    /// same ingestion path webhooks use.
    pub async fn sync_result(&self, meeting_id: &str) -> Result<(), TranscriptionError> {
        let (provider, job_id) = self.provider_for_meeting(meeting_id).await?;
        let result = provider.fetch(&job_id).await?;

        self.store
            .update_meeting_status(meeting_id, MeetingStatus::Completed, None)
            .await?;
        ingest::apply_result(self.store.as_ref(), meeting_id, &result).await?;
        Ok(())
    }

    /// Reconcile an authenticated webhook callback: resolve the meeting by
    /// job id, apply the reported status, and ingest delivered results
    /// (fetching from the provider when the payload carried none).
    pub async fn apply_webhook(
        &self,
        provider_name: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookOutcome, TranscriptionError> {
        let provider = self.registry.get(provider_name)?;
        let event = provider.parse_webhook(payload)?;

        let meeting = self
            .store
            .find_meeting_by_job(&event.job_id)
            .await?
            .ok_or_else(|| TranscriptionError::MeetingNotFoundForJob(event.job_id.clone()))?;

        let status = MeetingStatus::from(event.state.status);

        match event.state.status {
            JobStatus::Completed => {
                self.store
                    .update_meeting_status(&meeting.id, status, None)
                    .await?;

                let result = match event.result {
                    Some(result) => result,
                    None => provider.fetch(&event.job_id).await?,
                };
                ingest::apply_result(self.store.as_ref(), &meeting.id, &result).await?;

                Ok(WebhookOutcome {
                    meeting_id: meeting.id,
                    status,
                    ingested: true,
                })
            }
            JobStatus::Error => {
                // Error message is written verbatim; no partial ingestion.
                self.store
                    .update_meeting_status(&meeting.id, status, event.state.error.as_deref())
                    .await?;
                Ok(WebhookOutcome {
                    meeting_id: meeting.id,
                    status,
                    ingested: false,
                })
            }
            JobStatus::Queued | JobStatus::Processing => {
                self.store
                    .update_meeting_status(&meeting.id, status, None)
                    .await?;
                Ok(WebhookOutcome {
                    meeting_id: meeting.id,
                    status,
                    ingested: false,
                })
            }
        }
    }

    /// Constant comparison target for webhook authentication.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    async fn provider_for_meeting(
        &self,
        meeting_id: &str,
    ) -> Result<(Arc<dyn TranscriptionProvider>, String), TranscriptionError> {
        let meeting = self
            .store
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| TranscriptionError::MeetingNotFound(meeting_id.to_string()))?;

        let job_id = meeting
            .job_id
            .ok_or_else(|| TranscriptionError::NoJob(meeting_id.to_string()))?;

        let provider = match meeting.provider {
            Some(name) => self.registry.get(&name)?,
            None => self.registry.get_default()?,
        };

        Ok((provider, job_id))
    }

    fn build_options(
        &self,
        meeting_language: Option<&str>,
        overrides: &TranscribeOverrides,
    ) -> TranscribeOptions {
        let settings = self.registry.settings();
        TranscribeOptions {
            language: overrides
                .language
                .clone()
                .or_else(|| meeting_language.map(|l| l.to_string()))
                .or_else(|| settings.language.clone()),
            diarization: overrides.diarization.unwrap_or(settings.diarization),
            sentiment: overrides.sentiment.unwrap_or(settings.sentiment),
            topics: overrides.topics.unwrap_or(settings.topics),
            entities: overrides.entities.unwrap_or(settings.entities),
            highlights: overrides.highlights.unwrap_or(settings.highlights),
            chapters: overrides.chapters.unwrap_or(settings.chapters),
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

fn required_features(options: &TranscribeOptions) -> Vec<Feature> {
    let mut required = vec![Feature::Transcription];
    if options.diarization {
        required.push(Feature::Diarization);
    }
    if options.sentiment {
        required.push(Feature::Sentiment);
    }
    if options.topics {
        required.push(Feature::Topics);
    }
    if options.entities {
        required.push(Feature::Entities);
    }
    if options.highlights {
        required.push(Feature::Highlights);
    }
    if options.chapters {
        required.push(Feature::Chapters);
    }
    required
}
