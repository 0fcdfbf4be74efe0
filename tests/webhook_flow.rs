//! End-to-end webhook ingestion tests against the HTTP router.
//!
//! Drives the router directly with `tower::ServiceExt::oneshot`; no
//! listener and no outbound network. Payloads carry full result arrays so
//! ingestion never needs to call back to the backend.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use meetscribe::api::{router, AppState};
use meetscribe::blob::LocalBlobStore;
use meetscribe::config::{ProviderSettings, TranscriptionSettings};
use meetscribe::store::{MeetingStatus, MeetingStore, NewMeeting, SqliteStore};
use meetscribe::transcription::{ProviderRegistry, TranscriptionService};

const SECRET: &str = "hook-secret";

struct TestApp {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    app: Router,
}

fn test_app(settings: TranscriptionSettings) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("test.db")).unwrap());
    let blob = Arc::new(LocalBlobStore::new(
        dir.path().join("media"),
        "http://localhost:3737/media".to_string(),
    ));
    let registry = Arc::new(ProviderRegistry::new(settings));
    let service = Arc::new(TranscriptionService::new(
        store.clone(),
        registry,
        Some(SECRET.to_string()),
        "http://localhost:3737".to_string(),
    ));

    let app = router(AppState {
        store: store.clone(),
        blob,
        service,
    });

    TestApp {
        _dir: dir,
        store,
        app,
    }
}

fn assemblyai_settings() -> TranscriptionSettings {
    TranscriptionSettings {
        default_provider: "assemblyai".to_string(),
        assemblyai: ProviderSettings {
            enabled: true,
            api_key: Some("test-key".to_string()),
            endpoint: None,
        },
        ..TranscriptionSettings::default()
    }
}

fn webhook_request(secret: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/assemblyai")
        .header("content-type", "application/json")
        .header("x-webhook-secret", secret)
        .body(Body::from(payload.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn completed_payload(job_id: &str) -> Value {
    json!({
        "transcript_id": job_id,
        "status": "completed",
        "language_code": "en",
        "audio_duration": 12,
        "utterances": [
            {
                "text": "We need to finalize the budget.",
                "start": 0,
                "end": 4000,
                "speaker": "A",
                "confidence": 0.95
            },
            {
                "text": "What is the deadline?",
                "start": 4200,
                "end": 6000,
                "speaker": "B",
                "confidence": 0.91
            }
        ]
    })
}

#[tokio::test]
async fn test_wrong_secret_rejected_without_store_writes() {
    let t = test_app(assemblyai_settings());
    let meeting = t.store.create_meeting(NewMeeting::default()).await.unwrap();
    t.store
        .assign_job(&meeting.id, "j1", "assemblyai")
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(webhook_request("wrong", &completed_payload("j1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let loaded = t.store.get_meeting(&meeting.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, MeetingStatus::Processing);
    assert!(t.store.get_segments(&meeting.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_returns_404() {
    let t = test_app(assemblyai_settings());

    let response = t
        .app
        .clone()
        .oneshot(webhook_request(SECRET, &completed_payload("ghost")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_completed_webhook_ingests_transcript() {
    let t = test_app(assemblyai_settings());
    let meeting = t.store.create_meeting(NewMeeting::default()).await.unwrap();
    t.store
        .assign_job(&meeting.id, "j1", "assemblyai")
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(webhook_request(SECRET, &completed_payload("j1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["status"], json!("completed"));

    let loaded = t.store.get_meeting(&meeting.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, MeetingStatus::Completed);
    assert_eq!(loaded.language.as_deref(), Some("en"));
    assert_eq!(loaded.duration_ms, Some(12_000));

    let segments = t.store.get_segments(&meeting.id).await.unwrap();
    assert_eq!(segments.len(), 2);
    assert!(segments[1].is_question);
    assert!(segments[0].is_action_item);

    let speakers = t.store.get_speakers(&meeting.id).await.unwrap();
    assert_eq!(speakers.len(), 2);
}

#[tokio::test]
async fn test_webhook_redelivery_is_idempotent() {
    let t = test_app(assemblyai_settings());
    let meeting = t.store.create_meeting(NewMeeting::default()).await.unwrap();
    t.store
        .assign_job(&meeting.id, "j1", "assemblyai")
        .await
        .unwrap();

    for _ in 0..3 {
        let response = t
            .app
            .clone()
            .oneshot(webhook_request(SECRET, &completed_payload("j1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let segments = t.store.get_segments(&meeting.id).await.unwrap();
    assert_eq!(segments.len(), 2);
    let speakers = t.store.get_speakers(&meeting.id).await.unwrap();
    assert_eq!(speakers.len(), 2);
}

#[tokio::test]
async fn test_error_webhook_records_message_verbatim() {
    let t = test_app(assemblyai_settings());
    let meeting = t.store.create_meeting(NewMeeting::default()).await.unwrap();
    t.store
        .assign_job(&meeting.id, "j1", "assemblyai")
        .await
        .unwrap();

    let payload = json!({
        "transcript_id": "j1",
        "status": "error",
        "error": "Audio file is unreachable"
    });
    let response = t
        .app
        .clone()
        .oneshot(webhook_request(SECRET, &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let loaded = t.store.get_meeting(&meeting.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, MeetingStatus::Error);
    assert_eq!(loaded.error.as_deref(), Some("Audio file is unreachable"));
    assert!(t.store.get_segments(&meeting.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_and_fetch_meeting() {
    let t = test_app(assemblyai_settings());

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/meetings")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "title": "Weekly sync", "language": "en" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["title"], json!("Weekly sync"));
    assert_eq!(created["status"], json!("uploaded"));

    let id = created["id"].as_str().unwrap();
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/meetings/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_without_capable_provider_still_stores_audio() {
    // No provider enabled; submission fails after the blob and URL are
    // recorded, so a later resubmission can succeed without re-uploading.
    let t = test_app(TranscriptionSettings::default());
    let meeting = t.store.create_meeting(NewMeeting::default()).await.unwrap();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/meetings/{}/audio", meeting.id))
                .header("content-type", "application/octet-stream")
                .body(Body::from(&b"RIFFdata"[..]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let loaded = t.store.get_meeting(&meeting.id).await.unwrap().unwrap();
    assert_eq!(
        loaded.audio_url.as_deref(),
        Some(format!("http://localhost:3737/media/meetings/{}/audio.wav", meeting.id).as_str())
    );
    assert_eq!(loaded.status, MeetingStatus::Uploaded);
}

#[tokio::test]
async fn test_transcript_read_model_after_ingestion() {
    let t = test_app(assemblyai_settings());
    let meeting = t.store.create_meeting(NewMeeting::default()).await.unwrap();
    t.store
        .assign_job(&meeting.id, "j1", "assemblyai")
        .await
        .unwrap();

    t.app
        .clone()
        .oneshot(webhook_request(SECRET, &completed_payload("j1")))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/meetings/{}/transcript", meeting.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["meeting"]["status"], json!("completed"));
    assert_eq!(body["segments"].as_array().unwrap().len(), 2);
    assert_eq!(body["speakers"].as_array().unwrap().len(), 2);
    // Question metadata derived from the second utterance.
    assert!(body["metadata"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["kind"] == json!("question")));
}
