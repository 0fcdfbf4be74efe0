//! Whisper jobs-API backend.
//!
//! A plain transcription backend with no analytical features: submit a job,
//! poll its status, fetch text plus second-offset segments. Exists so
//! provider selection has something to fall back from (or to) when a
//! feature set rules a backend out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{
    JobState, JobStatus, SegmentData, TranscribeOptions, TranscriptionProvider,
    TranscriptionResult, WebhookEvent,
};
use crate::transcription::capabilities::{Feature, FeatureSet};
use crate::transcription::error::TranscriptionError;

#[derive(Debug, Serialize)]
struct SubmitRequest {
    audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    timestamps: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job: Job,
}

#[derive(Debug, Deserialize)]
struct Job {
    #[serde(default)]
    id: Option<String>,
    status: String,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResult {
    text: String,
    #[serde(default)]
    language: Option<String>,
    /// Segment offsets in seconds.
    #[serde(default)]
    segments: Option<Vec<JobSegment>>,
}

#[derive(Debug, Deserialize)]
struct JobSegment {
    start: f64,
    end: f64,
    text: String,
}

pub struct WhisperApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl WhisperApiProvider {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranscriptionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TranscriptionError::from_reqwest)?;
        let base_url = endpoint.trim_end_matches('/').to_string();

        info!("Initialized whisper jobs provider with base URL: {}", base_url);

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn read_body(
        response: reqwest::Response,
    ) -> Result<(u16, String), TranscriptionError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(TranscriptionError::from_reqwest)?;
        Ok((status, body))
    }
}

fn parse_status(status: &str) -> JobStatus {
    match status {
        "pending" | "queued" => JobStatus::Queued,
        "completed" => JobStatus::Completed,
        "failed" | "cancelled" | "error" => JobStatus::Error,
        _ => JobStatus::Processing,
    }
}

fn normalize(job_id: &str, result: JobResult) -> TranscriptionResult {
    let segments = match result.segments {
        Some(segments) if !segments.is_empty() => segments
            .into_iter()
            .map(|s| SegmentData {
                start_ms: (s.start * 1000.0) as i64,
                end_ms: (s.end * 1000.0) as i64,
                speaker: None,
                text: s.text.trim().to_string(),
                confidence: None,
                sentiment: None,
            })
            .collect(),
        // No timestamps: the whole transcript becomes one segment.
        _ => vec![SegmentData {
            start_ms: 0,
            end_ms: 0,
            speaker: None,
            text: result.text.trim().to_string(),
            confidence: None,
            sentiment: None,
        }],
    };

    TranscriptionResult {
        job_id: job_id.to_string(),
        language: result.language,
        duration_ms: segments.last().map(|s| s.end_ms).filter(|ms| *ms > 0),
        segments,
        ..TranscriptionResult::default()
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperApiProvider {
    fn name(&self) -> &'static str {
        "whisper-api"
    }

    fn features(&self) -> FeatureSet {
        FeatureSet::new([Feature::Transcription])
    }

    async fn submit(
        &self,
        audio_url: &str,
        options: &TranscribeOptions,
    ) -> Result<String, TranscriptionError> {
        let request = SubmitRequest {
            audio_url: audio_url.to_string(),
            language: options.language.clone(),
            timestamps: true,
            callback_url: options.webhook_url.clone(),
            callback_secret: options.webhook_secret.clone(),
        };

        debug!("Submitting transcription job to {}", self.base_url);

        let response = self
            .authorized(self.client.post(format!("{}/jobs", self.base_url)))
            .json(&request)
            .send()
            .await
            .map_err(TranscriptionError::from_reqwest)?;

        let (status, body) = Self::read_body(response).await?;
        if status >= 300 {
            error!("Job submission failed with status {}: {}", status, body);
            return Err(TranscriptionError::Request {
                status: Some(status),
                message: body,
            });
        }

        let submitted: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| TranscriptionError::MalformedPayload(e.to_string()))?;

        debug!("Transcription job submitted: {}", submitted.job_id);
        Ok(submitted.job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobState, TranscriptionError> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/jobs/{}/status", self.base_url, job_id)),
            )
            .send()
            .await
            .map_err(TranscriptionError::from_reqwest)?;

        let (status, body) = Self::read_body(response).await?;
        if status >= 300 {
            return Err(TranscriptionError::Request {
                status: Some(status),
                message: body,
            });
        }

        let parsed: StatusResponse = serde_json::from_str(&body)
            .map_err(|e| TranscriptionError::MalformedPayload(e.to_string()))?;

        Ok(JobState {
            status: parse_status(&parsed.status),
            progress: parsed.progress,
            error: parsed.error,
        })
    }

    async fn fetch(&self, job_id: &str) -> Result<TranscriptionResult, TranscriptionError> {
        let response = self
            .authorized(self.client.get(format!("{}/jobs/{}", self.base_url, job_id)))
            .send()
            .await
            .map_err(TranscriptionError::from_reqwest)?;

        let (status, body) = Self::read_body(response).await?;
        if status >= 300 {
            return Err(TranscriptionError::Request {
                status: Some(status),
                message: body,
            });
        }

        let parsed: JobResponse = serde_json::from_str(&body)
            .map_err(|e| TranscriptionError::MalformedPayload(e.to_string()))?;

        if parse_status(&parsed.job.status) != JobStatus::Completed {
            return Err(TranscriptionError::NotReady {
                job_id: job_id.to_string(),
                status: parsed.job.status,
            });
        }

        let result = parsed.job.result.ok_or_else(|| {
            TranscriptionError::MalformedPayload("completed job has no result".into())
        })?;

        Ok(normalize(job_id, result))
    }

    fn parse_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<WebhookEvent, TranscriptionError> {
        let job: Job = serde_json::from_value(payload.clone())
            .map_err(|e| TranscriptionError::MalformedPayload(e.to_string()))?;

        let job_id = job
            .id
            .ok_or_else(|| TranscriptionError::MalformedPayload("missing job id".into()))?;

        let status = parse_status(&job.status);
        let result = match (status, job.result) {
            (JobStatus::Completed, Some(result)) => Some(normalize(&job_id, result)),
            _ => None,
        };

        Ok(WebhookEvent {
            job_id,
            state: JobState {
                status,
                progress: None,
                error: job.error,
            },
            result,
        })
    }
}
