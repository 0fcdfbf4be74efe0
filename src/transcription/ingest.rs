//! Reconciliation of completed transcription results into the store.
//!
//! Both ingestion paths (webhook delivery and poll-driven fetch) converge
//! here: segments are upserted by natural key, speaker aggregates are
//! re-derived from segments, and secondary artifacts are upserted, so
//! duplicate or out-of-order delivery of the same completed result is a
//! no-op beyond the first application.

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::info;

use super::providers::{SegmentData, SpeakerData, TranscriptionResult};
use crate::store::{MeetingStore, MetadataKind, MetadataRow, SegmentRow, SpeakerRow};

fn action_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(action item|follow[ -]up|i'?ll take|we need to|let'?s schedule|to[ -]do)\b")
            .expect("invalid action item pattern")
    })
}

/// Apply a completed result to the store. Idempotent: re-applying the same
/// result leaves identical rows.
pub async fn apply_result(
    store: &dyn MeetingStore,
    meeting_id: &str,
    result: &TranscriptionResult,
) -> Result<()> {
    let segments = segment_rows(&result.segments);
    store.upsert_segments(meeting_id, &segments).await?;

    let speakers = derive_speakers(&segments, &result.speakers);
    store.upsert_speakers(meeting_id, &speakers).await?;

    let metadata = metadata_rows(result, &segments);
    store.upsert_metadata(meeting_id, &metadata).await?;

    store
        .update_meeting_result(meeting_id, result.language.as_deref(), result.duration_ms)
        .await?;

    info!(
        "Ingested result for meeting {}: {} segments, {} speakers, {} metadata rows",
        meeting_id,
        segments.len(),
        speakers.len(),
        metadata.len()
    );

    Ok(())
}

fn segment_rows(segments: &[SegmentData]) -> Vec<SegmentRow> {
    segments
        .iter()
        .map(|segment| {
            let text = segment.text.trim();
            SegmentRow {
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
                speaker: segment.speaker.clone(),
                text: text.to_string(),
                confidence: segment.confidence,
                sentiment: segment.sentiment.clone(),
                is_question: text.ends_with('?'),
                is_action_item: action_item_re().is_match(text),
            }
        })
        .collect()
}

/// Re-derive speaker aggregates from segment rows. Segments are the source
/// of truth; speaker rows are never hand-edited.
pub fn derive_speakers(segments: &[SegmentRow], declared: &[SpeakerData]) -> Vec<SpeakerRow> {
    struct Stats {
        speaking_time_ms: i64,
        word_count: i64,
        interruptions: i64,
        sentiments: BTreeMap<String, u32>,
    }

    let mut order: Vec<String> = Vec::new();
    let mut stats: BTreeMap<String, Stats> = BTreeMap::new();
    let mut previous: Option<(&str, i64)> = None;

    for segment in segments {
        let Some(label) = segment.speaker.as_deref() else {
            continue;
        };

        if !order.iter().any(|l| l == label) {
            order.push(label.to_string());
        }
        let entry = stats.entry(label.to_string()).or_insert(Stats {
            speaking_time_ms: 0,
            word_count: 0,
            interruptions: 0,
            sentiments: BTreeMap::new(),
        });

        entry.speaking_time_ms += (segment.end_ms - segment.start_ms).max(0);
        entry.word_count += segment.text.split_whitespace().count() as i64;
        if let Some(sentiment) = &segment.sentiment {
            *entry.sentiments.entry(sentiment.clone()).or_insert(0) += 1;
        }

        // Starting before the previous speaker finished counts as an
        // interruption by this speaker.
        if let Some((prev_label, prev_end)) = previous {
            if prev_label != label && segment.start_ms < prev_end {
                entry.interruptions += 1;
            }
        }
        previous = Some((label, segment.end_ms));
    }

    order
        .into_iter()
        .map(|label| {
            let s = &stats[&label];
            let display_name = declared
                .iter()
                .find(|d| d.label == label)
                .and_then(|d| d.display_name.clone());
            SpeakerRow {
                display_name,
                speaking_time_ms: s.speaking_time_ms,
                word_count: s.word_count,
                interruptions: s.interruptions,
                sentiment_distribution: if s.sentiments.is_empty() {
                    None
                } else {
                    serde_json::to_string(&s.sentiments).ok()
                },
                label,
            }
        })
        .collect()
}

fn metadata_rows(result: &TranscriptionResult, segments: &[SegmentRow]) -> Vec<MetadataRow> {
    let mut rows = Vec::new();

    for topic in &result.topics {
        rows.push(MetadataRow {
            kind: MetadataKind::Topic,
            value: topic.label.clone(),
            detail: None,
            confidence: Some(topic.relevance),
            start_ms: topic.start_ms,
            end_ms: topic.end_ms,
        });
    }

    for entity in &result.entities {
        rows.push(MetadataRow {
            kind: MetadataKind::Entity,
            value: entity.label.clone(),
            detail: Some(entity.entity_type.clone()),
            confidence: None,
            start_ms: entity.start_ms,
            end_ms: entity.end_ms,
        });
    }

    for highlight in &result.highlights {
        rows.push(MetadataRow {
            kind: MetadataKind::Highlight,
            value: highlight.text.clone(),
            detail: None,
            confidence: Some(highlight.relevance),
            start_ms: highlight.start_ms,
            end_ms: highlight.end_ms,
        });
    }

    for chapter in &result.chapters {
        rows.push(MetadataRow {
            kind: MetadataKind::Chapter,
            value: chapter.headline.clone(),
            detail: chapter.summary.clone(),
            confidence: None,
            start_ms: Some(chapter.start_ms),
            end_ms: Some(chapter.end_ms),
        });
    }

    for segment in segments {
        if segment.is_question {
            rows.push(MetadataRow {
                kind: MetadataKind::Question,
                value: segment.text.clone(),
                detail: segment.speaker.clone(),
                confidence: segment.confidence,
                start_ms: Some(segment.start_ms),
                end_ms: Some(segment.end_ms),
            });
        }
        if segment.is_action_item {
            rows.push(MetadataRow {
                kind: MetadataKind::ActionItem,
                value: segment.text.clone(),
                detail: segment.speaker.clone(),
                confidence: segment.confidence,
                start_ms: Some(segment.start_ms),
                end_ms: Some(segment.end_ms),
            });
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewMeeting, SqliteStore};
    use crate::transcription::providers::TopicData;

    fn segment(start_ms: i64, end_ms: i64, speaker: &str, text: &str) -> SegmentData {
        SegmentData {
            start_ms,
            end_ms,
            speaker: Some(speaker.to_string()),
            text: text.to_string(),
            confidence: Some(0.9),
            sentiment: None,
        }
    }

    fn sample_result() -> TranscriptionResult {
        TranscriptionResult {
            job_id: "j1".to_string(),
            language: Some("en".to_string()),
            duration_ms: Some(10_000),
            segments: vec![
                segment(0, 2000, "A", "We need to finalize the budget."),
                segment(2100, 4000, "B", "What is the deadline?"),
                segment(3800, 6000, "A", "Friday."),
            ],
            topics: vec![TopicData {
                label: "budget".to_string(),
                relevance: 0.8,
                segment_indexes: vec![0],
                start_ms: Some(0),
                end_ms: Some(2000),
            }],
            ..TranscriptionResult::default()
        }
    }

    #[test]
    fn test_question_and_action_flags() {
        let rows = segment_rows(&sample_result().segments);
        assert!(rows[0].is_action_item);
        assert!(!rows[0].is_question);
        assert!(rows[1].is_question);
        assert!(!rows[2].is_question);
    }

    #[test]
    fn test_derive_speakers_aggregates() {
        let rows = segment_rows(&sample_result().segments);
        let speakers = derive_speakers(&rows, &[]);

        assert_eq!(speakers.len(), 2);
        let a = speakers.iter().find(|s| s.label == "A").unwrap();
        assert_eq!(a.speaking_time_ms, 2000 + 2200);
        assert_eq!(a.word_count, 7);
        // A started at 3800 while B spoke until 4000.
        assert_eq!(a.interruptions, 1);

        let b = speakers.iter().find(|s| s.label == "B").unwrap();
        assert_eq!(b.interruptions, 0);
    }

    #[test]
    fn test_sentiment_distribution_serialized() {
        let mut result = sample_result();
        result.segments[0].sentiment = Some("NEUTRAL".to_string());
        result.segments[2].sentiment = Some("POSITIVE".to_string());

        let speakers = derive_speakers(&segment_rows(&result.segments), &[]);
        let a = speakers.iter().find(|s| s.label == "A").unwrap();
        assert_eq!(
            a.sentiment_distribution.as_deref(),
            Some(r#"{"NEUTRAL":1,"POSITIVE":1}"#)
        );
    }

    #[test]
    fn test_metadata_rows_include_questions_and_actions() {
        let result = sample_result();
        let rows = metadata_rows(&result, &segment_rows(&result.segments));

        assert!(rows.iter().any(|r| r.kind == MetadataKind::Topic));
        assert!(rows
            .iter()
            .any(|r| r.kind == MetadataKind::Question && r.value == "What is the deadline?"));
        assert!(rows.iter().any(|r| r.kind == MetadataKind::ActionItem));
    }

    #[tokio::test]
    async fn test_apply_result_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();
        let meeting = store.create_meeting(NewMeeting::default()).await.unwrap();
        let result = sample_result();

        apply_result(&store, &meeting.id, &result).await.unwrap();
        let segments_once = store.get_segments(&meeting.id).await.unwrap();
        let speakers_once = store.get_speakers(&meeting.id).await.unwrap();
        let metadata_once = store.get_metadata(&meeting.id).await.unwrap();

        apply_result(&store, &meeting.id, &result).await.unwrap();
        assert_eq!(
            store.get_segments(&meeting.id).await.unwrap().len(),
            segments_once.len()
        );
        assert_eq!(
            store.get_speakers(&meeting.id).await.unwrap().len(),
            speakers_once.len()
        );
        assert_eq!(
            store.get_metadata(&meeting.id).await.unwrap().len(),
            metadata_once.len()
        );

        let meeting = store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(meeting.language.as_deref(), Some("en"));
        assert_eq!(meeting.duration_ms, Some(10_000));
    }
}
