//! AssemblyAI backend.
//!
//! Translates the generic submit/status/fetch contract into the AssemblyAI
//! v2 transcript API and normalizes its result shape: utterances become
//! segments, auto-highlights and IAB categories become topics (rank mapped
//! to a 0-1 relevance), and entities/highlights are mapped back onto
//! segments by time-range intersection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{
    ChapterData, EntityData, HighlightData, JobState, JobStatus, SegmentData, SpeakerData,
    TopicData, TranscribeOptions, TranscriptionProvider, TranscriptionResult, WebhookEvent,
};
use crate::transcription::capabilities::{Feature, FeatureSet};
use crate::transcription::error::TranscriptionError;

const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com/v2";

/// Consecutive words from one speaker are merged into a segment until the
/// silence gap between them exceeds this.
const WORD_GAP_SPLIT_MS: i64 = 1500;

#[derive(Debug, Serialize)]
struct TranscriptRequest {
    audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<String>,
    speaker_labels: bool,
    sentiment_analysis: bool,
    iab_categories: bool,
    entity_detection: bool,
    auto_highlights: bool,
    auto_chapters: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_auth_header_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_auth_header_value: Option<String>,
}

/// Transcript resource as returned by creation, polling, and webhooks.
/// Webhook payloads carry a subset of these fields.
#[derive(Debug, Default, Deserialize)]
struct Transcript {
    #[serde(default)]
    id: Option<String>,
    /// Webhook payloads name the job `transcript_id`.
    #[serde(default)]
    transcript_id: Option<String>,
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    language_code: Option<String>,
    /// Seconds.
    #[serde(default)]
    audio_duration: Option<f64>,
    #[serde(default)]
    words: Option<Vec<Word>>,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
    #[serde(default)]
    sentiment_analysis_results: Option<Vec<SentimentResult>>,
    #[serde(default)]
    entities: Option<Vec<EntityResult>>,
    #[serde(default)]
    auto_highlights_result: Option<HighlightsResult>,
    #[serde(default)]
    iab_categories_result: Option<IabResult>,
    #[serde(default)]
    chapters: Option<Vec<Chapter>>,
}

#[derive(Debug, Deserialize)]
struct Word {
    text: String,
    start: i64,
    end: i64,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    speaker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    speaker: String,
    text: String,
    start: i64,
    end: i64,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SentimentResult {
    start: i64,
    end: i64,
    sentiment: String,
}

#[derive(Debug, Deserialize)]
struct EntityResult {
    entity_type: String,
    text: String,
    start: i64,
    end: i64,
}

#[derive(Debug, Deserialize)]
struct HighlightsResult {
    results: Vec<Highlight>,
}

#[derive(Debug, Deserialize)]
struct Highlight {
    text: String,
    rank: f64,
    #[serde(default)]
    timestamps: Vec<TimeRange>,
}

#[derive(Debug, Deserialize)]
struct TimeRange {
    start: i64,
    end: i64,
}

#[derive(Debug, Deserialize)]
struct IabResult {
    #[serde(default)]
    summary: std::collections::BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct Chapter {
    headline: String,
    #[serde(default)]
    summary: Option<String>,
    start: i64,
    end: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

pub struct AssemblyAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AssemblyAiProvider {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranscriptionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TranscriptionError::from_reqwest)?;
        let base_url = endpoint.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        info!("Initialized AssemblyAI provider with base URL: {}", base_url);

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    async fn get_transcript(&self, job_id: &str) -> Result<Transcript, TranscriptionError> {
        let url = format!("{}/transcript/{}", self.base_url, job_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(TranscriptionError::from_reqwest)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(TranscriptionError::from_reqwest)?;

        if !status.is_success() {
            error!(
                "AssemblyAI transcript request failed with status {}: {}",
                status, body
            );
            return Err(request_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| TranscriptionError::MalformedPayload(e.to_string()))
    }
}

fn request_error(status: u16, body: &str) -> TranscriptionError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.to_string(),
    };
    TranscriptionError::Request {
        status: Some(status),
        message,
    }
}

fn parse_status(status: &str) -> JobStatus {
    match status {
        "queued" => JobStatus::Queued,
        "completed" => JobStatus::Completed,
        "error" => JobStatus::Error,
        // "processing" and any vendor-specific intermediate statuses.
        _ => JobStatus::Processing,
    }
}

#[async_trait]
impl TranscriptionProvider for AssemblyAiProvider {
    fn name(&self) -> &'static str {
        "assemblyai"
    }

    fn features(&self) -> FeatureSet {
        FeatureSet::new([
            Feature::Transcription,
            Feature::Diarization,
            Feature::Sentiment,
            Feature::Topics,
            Feature::Entities,
            Feature::Highlights,
            Feature::Chapters,
        ])
    }

    async fn submit(
        &self,
        audio_url: &str,
        options: &TranscribeOptions,
    ) -> Result<String, TranscriptionError> {
        self.features().validate(
            self.name(),
            &required_features(options),
        )?;

        let request = TranscriptRequest {
            audio_url: audio_url.to_string(),
            language_code: options.language.clone(),
            speaker_labels: options.diarization,
            sentiment_analysis: options.sentiment,
            iab_categories: options.topics,
            entity_detection: options.entities,
            auto_highlights: options.highlights,
            auto_chapters: options.chapters,
            webhook_url: options.webhook_url.clone(),
            webhook_auth_header_name: options
                .webhook_secret
                .as_ref()
                .map(|_| "X-Webhook-Secret".to_string()),
            webhook_auth_header_value: options.webhook_secret.clone(),
        };

        debug!("Submitting transcription request to AssemblyAI");

        let response = self
            .client
            .post(format!("{}/transcript", self.base_url))
            .header("Authorization", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(TranscriptionError::from_reqwest)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(TranscriptionError::from_reqwest)?;

        if !status.is_success() {
            error!(
                "AssemblyAI transcription request failed with status {}: {}",
                status, body
            );
            return Err(request_error(status.as_u16(), &body));
        }

        let transcript: Transcript = serde_json::from_str(&body)
            .map_err(|e| TranscriptionError::MalformedPayload(e.to_string()))?;

        let job_id = transcript
            .id
            .ok_or_else(|| TranscriptionError::MalformedPayload("missing transcript id".into()))?;

        debug!("Transcription submitted with ID: {}", job_id);
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobState, TranscriptionError> {
        let transcript = self.get_transcript(job_id).await?;

        Ok(JobState {
            status: parse_status(&transcript.status),
            progress: None,
            error: transcript.error,
        })
    }

    async fn fetch(&self, job_id: &str) -> Result<TranscriptionResult, TranscriptionError> {
        let transcript = self.get_transcript(job_id).await?;

        if parse_status(&transcript.status) != JobStatus::Completed {
            return Err(TranscriptionError::NotReady {
                job_id: job_id.to_string(),
                status: transcript.status,
            });
        }

        Ok(normalize(job_id, transcript))
    }

    fn parse_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<WebhookEvent, TranscriptionError> {
        let transcript: Transcript = serde_json::from_value(payload.clone())
            .map_err(|e| TranscriptionError::MalformedPayload(e.to_string()))?;

        let job_id = transcript
            .transcript_id
            .clone()
            .or_else(|| transcript.id.clone())
            .ok_or_else(|| {
                TranscriptionError::MalformedPayload("missing transcript_id".into())
            })?;

        let status = parse_status(&transcript.status);
        let state = JobState {
            status,
            progress: None,
            error: transcript.error.clone(),
        };

        // AssemblyAI's minimal callback carries only transcript_id + status;
        // a result is built only when the payload delivered word data.
        let has_result_data = transcript.utterances.is_some() || transcript.words.is_some();
        let result = if status == JobStatus::Completed && has_result_data {
            Some(normalize(&job_id, transcript))
        } else {
            None
        };

        Ok(WebhookEvent {
            job_id,
            state,
            result,
        })
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

/// Map the AssemblyAI transcript shape into the canonical result model.
fn normalize(job_id: &str, transcript: Transcript) -> TranscriptionResult {
    let mut segments = match transcript.utterances {
        Some(utterances) if !utterances.is_empty() => utterances
            .into_iter()
            .map(|u| SegmentData {
                start_ms: u.start,
                end_ms: u.end,
                speaker: Some(u.speaker),
                text: u.text,
                confidence: u.confidence,
                sentiment: None,
            })
            .collect(),
        _ => group_words(transcript.words.unwrap_or_default()),
    };
    segments.sort_by_key(|s| (s.start_ms, s.end_ms));

    if let Some(sentiments) = transcript.sentiment_analysis_results {
        apply_sentiment(&mut segments, &sentiments);
    }

    let speakers = derive_speakers(&segments);

    let mut topics = Vec::new();
    let mut highlights = Vec::new();
    if let Some(highlight_result) = transcript.auto_highlights_result {
        for highlight in highlight_result.results {
            // AssemblyAI ranks highlights 0-10; normalize to a 0-1 relevance.
            let relevance = (highlight.rank / 10.0).clamp(0.0, 1.0);
            let mut segment_indexes = Vec::new();
            for range in &highlight.timestamps {
                segment_indexes.extend(segments_intersecting(&segments, range.start, range.end));
            }
            segment_indexes.dedup();

            let first = highlight.timestamps.first();
            topics.push(TopicData {
                label: highlight.text.clone(),
                relevance,
                segment_indexes,
                start_ms: first.map(|r| r.start),
                end_ms: first.map(|r| r.end),
            });
            highlights.push(HighlightData {
                text: highlight.text,
                relevance,
                start_ms: first.map(|r| r.start),
                end_ms: first.map(|r| r.end),
            });
        }
    }

    if let Some(iab) = transcript.iab_categories_result {
        for (label, score) in iab.summary {
            topics.push(TopicData {
                label,
                relevance: score.clamp(0.0, 1.0),
                segment_indexes: Vec::new(),
                start_ms: None,
                end_ms: None,
            });
        }
    }

    let entities = transcript
        .entities
        .unwrap_or_default()
        .into_iter()
        .map(|e| EntityData {
            segment_indexes: segments_intersecting(&segments, e.start, e.end),
            label: e.text,
            entity_type: e.entity_type,
            start_ms: Some(e.start),
            end_ms: Some(e.end),
        })
        .collect();

    let chapters = transcript
        .chapters
        .unwrap_or_default()
        .into_iter()
        .map(|c| ChapterData {
            headline: c.headline,
            summary: c.summary,
            start_ms: c.start,
            end_ms: c.end,
        })
        .collect();

    TranscriptionResult {
        job_id: job_id.to_string(),
        language: transcript.language_code,
        duration_ms: transcript.audio_duration.map(|d| (d * 1000.0) as i64),
        segments,
        speakers,
        topics,
        entities,
        highlights,
        chapters,
    }
}

/// Merge consecutive same-speaker words into segments, splitting on long
/// silence gaps. Used when a payload carries words but no utterances.
fn group_words(words: Vec<Word>) -> Vec<SegmentData> {
    let mut segments: Vec<SegmentData> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();

    for word in words {
        let split = match segments.last() {
            Some(last) => {
                last.speaker != word.speaker || word.start - last.end_ms > WORD_GAP_SPLIT_MS
            }
            None => true,
        };

        if split {
            if let (Some(last), false) = (segments.last_mut(), confidences.is_empty()) {
                last.confidence =
                    Some(confidences.iter().sum::<f64>() / confidences.len() as f64);
                confidences.clear();
            }
            segments.push(SegmentData {
                start_ms: word.start,
                end_ms: word.end,
                speaker: word.speaker,
                text: word.text,
                confidence: None,
                sentiment: None,
            });
        } else if let Some(last) = segments.last_mut() {
            last.end_ms = word.end;
            last.text.push(' ');
            last.text.push_str(&word.text);
        }

        if let Some(confidence) = word.confidence {
            confidences.push(confidence);
        }
    }

    if let (Some(last), false) = (segments.last_mut(), confidences.is_empty()) {
        last.confidence = Some(confidences.iter().sum::<f64>() / confidences.len() as f64);
    }

    segments
}

/// Attach sentiment labels to segments by time-range intersection.
fn apply_sentiment(segments: &mut [SegmentData], sentiments: &[SentimentResult]) {
    for sentiment in sentiments {
        let indexes: Vec<usize> = segments_intersecting(segments, sentiment.start, sentiment.end);
        for index in indexes {
            if segments[index].sentiment.is_none() {
                segments[index].sentiment = Some(sentiment.sentiment.clone());
            }
        }
    }
}

fn derive_speakers(segments: &[SegmentData]) -> Vec<SpeakerData> {
    let mut speakers: Vec<SpeakerData> = Vec::new();
    for segment in segments {
        if let Some(label) = &segment.speaker {
            if !speakers.iter().any(|s| &s.label == label) {
                speakers.push(SpeakerData {
                    label: label.clone(),
                    display_name: Some(format!("Speaker {}", speakers.len() + 1)),
                });
            }
        }
    }
    speakers
}

/// Indices of segments whose time range intersects [start, end].
///
/// Segments are sorted by start offset, so a partition-point cut replaces
/// the nested loop the naive mapping would need. End offsets are not
/// monotonic when speakers overlap, so every candidate before the cut is
/// still checked against `start`.
fn segments_intersecting(segments: &[SegmentData], start: i64, end: i64) -> Vec<usize> {
    let upper = segments.partition_point(|s| s.start_ms <= end);
    segments[..upper]
        .iter()
        .enumerate()
        .filter(|(_, segment)| segment.end_ms >= start)
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> AssemblyAiProvider {
        AssemblyAiProvider::new("test-key".to_string(), None, Duration::from_secs(5)).unwrap()
    }

    fn completed_payload() -> serde_json::Value {
        json!({
            "transcript_id": "t1",
            "status": "completed",
            "language_code": "en",
            "audio_duration": 12.5,
            "words": [
                { "text": "Hello", "start": 0, "end": 400, "confidence": 0.9, "speaker": "A" },
                { "text": "there", "start": 450, "end": 800, "confidence": 0.8, "speaker": "A" },
                { "text": "Hi", "start": 900, "end": 1100, "confidence": 0.95, "speaker": "B" },
                { "text": "again", "start": 4000, "end": 4300, "confidence": 0.7, "speaker": "B" }
            ],
            "auto_highlights_result": {
                "results": [
                    { "text": "hello there", "rank": 8.0, "timestamps": [{ "start": 0, "end": 800 }] }
                ]
            },
            "entities": [
                { "entity_type": "person", "text": "Hi", "start": 900, "end": 1100 }
            ]
        })
    }

    #[test]
    fn test_word_grouping_splits_on_speaker_and_gap() {
        let event = provider().parse_webhook(&completed_payload()).unwrap();
        let result = event.result.unwrap();

        // A(Hello there), B(Hi), B(again after a 2.9s gap)
        assert_eq!(result.segments.len(), 3);
        assert_eq!(result.segments[0].text, "Hello there");
        assert_eq!(result.segments[0].speaker.as_deref(), Some("A"));
        assert_eq!(result.segments[1].text, "Hi");
        assert_eq!(result.segments[2].text, "again");
        assert_eq!(result.speakers.len(), 2);
    }

    #[test]
    fn test_highlights_become_topics_referencing_segments() {
        let event = provider().parse_webhook(&completed_payload()).unwrap();
        let result = event.result.unwrap();

        assert_eq!(result.topics.len(), 1);
        let topic = &result.topics[0];
        assert_eq!(topic.label, "hello there");
        assert!((topic.relevance - 0.8).abs() < f64::EPSILON);
        // The 0-800ms highlight intersects the first segment only.
        assert_eq!(topic.segment_indexes, vec![0]);
    }

    #[test]
    fn test_entities_mapped_by_time_intersection() {
        let event = provider().parse_webhook(&completed_payload()).unwrap();
        let result = event.result.unwrap();

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].entity_type, "person");
        assert_eq!(result.entities[0].segment_indexes, vec![1]);
    }

    #[test]
    fn test_utterances_preferred_over_words() {
        let payload = json!({
            "id": "t2",
            "status": "completed",
            "words": [
                { "text": "ignored", "start": 0, "end": 100 }
            ],
            "utterances": [
                { "speaker": "A", "text": "Full utterance", "start": 0, "end": 2000, "confidence": 0.92 }
            ]
        });

        let event = provider().parse_webhook(&payload).unwrap();
        let result = event.result.unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].text, "Full utterance");
        assert_eq!(result.segments[0].confidence, Some(0.92));
    }

    #[test]
    fn test_sentiment_attached_to_overlapping_segments() {
        let payload = json!({
            "id": "t3",
            "status": "completed",
            "utterances": [
                { "speaker": "A", "text": "Great work", "start": 0, "end": 1000 },
                { "speaker": "B", "text": "Thanks", "start": 1100, "end": 1500 }
            ],
            "sentiment_analysis_results": [
                { "text": "Great work", "start": 0, "end": 1000, "sentiment": "POSITIVE" }
            ]
        });

        let event = provider().parse_webhook(&payload).unwrap();
        let result = event.result.unwrap();
        assert_eq!(result.segments[0].sentiment.as_deref(), Some("POSITIVE"));
        assert!(result.segments[1].sentiment.is_none());
    }

    #[test]
    fn test_minimal_webhook_has_no_result() {
        let payload = json!({ "transcript_id": "t4", "status": "completed" });
        let event = provider().parse_webhook(&payload).unwrap();

        assert_eq!(event.job_id, "t4");
        assert_eq!(event.state.status, JobStatus::Completed);
        assert!(event.result.is_none());
    }

    #[test]
    fn test_error_webhook_carries_message() {
        let payload = json!({
            "transcript_id": "t5",
            "status": "error",
            "error": "Audio file could not be downloaded"
        });
        let event = provider().parse_webhook(&payload).unwrap();

        assert_eq!(event.state.status, JobStatus::Error);
        assert_eq!(
            event.state.error.as_deref(),
            Some("Audio file could not be downloaded")
        );
        assert!(event.result.is_none());
    }

    #[test]
    fn test_webhook_missing_job_id_rejected() {
        let payload = json!({ "status": "completed" });
        let err = provider().parse_webhook(&payload).unwrap_err();
        assert!(matches!(err, TranscriptionError::MalformedPayload(_)));
    }

    #[test]
    fn test_segments_intersecting_sorted_scan() {
        let segments = vec![
            SegmentData {
                start_ms: 0,
                end_ms: 1000,
                speaker: None,
                text: "a".into(),
                confidence: None,
                sentiment: None,
            },
            SegmentData {
                start_ms: 1200,
                end_ms: 2000,
                speaker: None,
                text: "b".into(),
                confidence: None,
                sentiment: None,
            },
            SegmentData {
                start_ms: 2500,
                end_ms: 3000,
                speaker: None,
                text: "c".into(),
                confidence: None,
                sentiment: None,
            },
        ];

        assert_eq!(segments_intersecting(&segments, 500, 1500), vec![0, 1]);
        assert_eq!(segments_intersecting(&segments, 2100, 2400), Vec::<usize>::new());
        assert_eq!(segments_intersecting(&segments, 0, 5000), vec![0, 1, 2]);
    }

    #[test]
    fn test_segments_intersecting_with_overlapping_speech() {
        // A long segment spans shorter interjections, so end offsets are not
        // sorted even though start offsets are.
        let segment = |start_ms, end_ms| SegmentData {
            start_ms,
            end_ms,
            speaker: None,
            text: "x".into(),
            confidence: None,
            sentiment: None,
        };
        let segments = vec![segment(0, 5000), segment(1000, 2000), segment(2500, 3000)];

        // A range past every interjection still hits the long segment.
        assert_eq!(segments_intersecting(&segments, 4500, 4800), vec![0]);
        assert_eq!(segments_intersecting(&segments, 1500, 2700), vec![0, 1, 2]);
        assert_eq!(segments_intersecting(&segments, 5500, 6000), Vec::<usize>::new());
    }

    #[test]
    fn test_entity_mapped_onto_overlapping_long_segment() {
        let payload = json!({
            "transcript_id": "t9",
            "status": "completed",
            "utterances": [
                { "speaker": "A", "text": "Long monologue", "start": 0, "end": 5000, "confidence": 0.9 },
                { "speaker": "B", "text": "Quick aside", "start": 1000, "end": 2000, "confidence": 0.9 },
                { "speaker": "C", "text": "Another aside", "start": 2500, "end": 3000, "confidence": 0.9 }
            ],
            "entities": [
                { "entity_type": "date", "text": "Friday", "start": 4500, "end": 4800 }
            ]
        });

        let event = provider().parse_webhook(&payload).unwrap();
        let result = event.result.unwrap();

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].segment_indexes, vec![0]);
    }

    #[test]
    fn test_iab_categories_become_topics() {
        let payload = json!({
            "id": "t6",
            "status": "completed",
            "utterances": [
                { "speaker": "A", "text": "Quarterly numbers", "start": 0, "end": 1000 }
            ],
            "iab_categories_result": {
                "summary": { "Business>Finance": 0.93 }
            }
        });

        let event = provider().parse_webhook(&payload).unwrap();
        let result = event.result.unwrap();
        assert_eq!(result.topics.len(), 1);
        assert_eq!(result.topics[0].label, "Business>Finance");
        assert!((result.topics[0].relevance - 0.93).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duration_converted_to_milliseconds() {
        let event = provider().parse_webhook(&completed_payload()).unwrap();
        assert_eq!(event.result.unwrap().duration_ms, Some(12500));
    }
}
