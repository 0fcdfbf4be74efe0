//! SQLite implementation of `MeetingStore`.
//!
//! Raw SQL with rusqlite, no ORM. Connections are opened per operation and
//! every call runs under `spawn_blocking`, so no lock is held across awaits.
//! Upserts use natural keys (`ON CONFLICT ... DO UPDATE`) because providers
//! may redeliver the same completed webhook.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{
    Meeting, MeetingStatus, MeetingStore, MetadataKind, MetadataRow, NewMeeting, SegmentRow,
    SpeakerRow,
};

#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and run migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open database connection")?;
        migrate(&conn)?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("Failed to open database connection")
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            f(&conn)
        })
        .await
        .context("Store task panicked")?
    }
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meetings (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            title TEXT,
            audio_url TEXT,
            job_id TEXT,
            provider TEXT,
            status TEXT NOT NULL DEFAULT 'uploaded',
            error TEXT,
            language TEXT,
            duration_ms INTEGER,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_meetings_job_id ON meetings(job_id);

        CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_id TEXT NOT NULL,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            speaker TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            confidence REAL,
            sentiment TEXT,
            is_question INTEGER NOT NULL DEFAULT 0,
            is_action_item INTEGER NOT NULL DEFAULT 0,
            UNIQUE(meeting_id, start_ms, end_ms, speaker)
        );
        CREATE INDEX IF NOT EXISTS idx_segments_meeting ON segments(meeting_id, start_ms);

        CREATE TABLE IF NOT EXISTS speakers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_id TEXT NOT NULL,
            label TEXT NOT NULL,
            display_name TEXT,
            speaking_time_ms INTEGER NOT NULL DEFAULT 0,
            word_count INTEGER NOT NULL DEFAULT 0,
            interruptions INTEGER NOT NULL DEFAULT 0,
            sentiment_distribution TEXT,
            UNIQUE(meeting_id, label)
        );

        CREATE TABLE IF NOT EXISTS meeting_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            value TEXT NOT NULL,
            detail TEXT,
            confidence REAL,
            start_ms INTEGER NOT NULL DEFAULT -1,
            end_ms INTEGER,
            UNIQUE(meeting_id, kind, value, start_ms)
        );",
    )
    .context("Failed to run migrations")?;

    Ok(())
}

fn meeting_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Meeting> {
    let status: String = row.get("status")?;
    Ok(Meeting {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        audio_url: row.get("audio_url")?,
        job_id: row.get("job_id")?,
        provider: row.get("provider")?,
        status: MeetingStatus::parse(&status).unwrap_or(MeetingStatus::Uploaded),
        error: row.get("error")?,
        language: row.get("language")?,
        duration_ms: row.get("duration_ms")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const MEETING_COLUMNS: &str = "id, user_id, title, audio_url, job_id, provider, status, error, \
     language, duration_ms, created_at, updated_at";

#[async_trait]
impl MeetingStore for SqliteStore {
    async fn create_meeting(&self, meeting: NewMeeting) -> Result<Meeting> {
        let id = Uuid::new_v4().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO meetings (id, user_id, title, language, status) \
                 VALUES (?1, ?2, ?3, ?4, 'uploaded')",
                params![id, meeting.user_id, meeting.title, meeting.language],
            )
            .context("Failed to insert meeting")?;

            let created = conn
                .query_row(
                    &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"),
                    params![id],
                    meeting_from_row,
                )
                .context("Failed to read back meeting")?;
            Ok(created)
        })
        .await
    }

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"),
                params![id],
                meeting_from_row,
            )
            .optional()
            .context("Failed to query meeting")
        })
        .await
    }

    async fn find_meeting_by_job(&self, job_id: &str) -> Result<Option<Meeting>> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE job_id = ?1"),
                params![job_id],
                meeting_from_row,
            )
            .optional()
            .context("Failed to query meeting by job id")
        })
        .await
    }

    async fn list_meetings(&self, limit: usize) -> Result<Vec<Meeting>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MEETING_COLUMNS} FROM meetings \
                     ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))
                .context("Failed to prepare meetings list query")?;

            let rows = stmt
                .query_map(params![limit as i64], meeting_from_row)
                .context("Failed to list meetings")?;

            let mut meetings = Vec::new();
            for row in rows {
                meetings.push(row?);
            }
            Ok(meetings)
        })
        .await
    }

    async fn set_audio_url(&self, id: &str, audio_url: &str) -> Result<()> {
        let (id, audio_url) = (id.to_string(), audio_url.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE meetings SET audio_url = ?1, updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ?2",
                params![audio_url, id],
            )
            .context("Failed to set audio url")?;
            Ok(())
        })
        .await
    }

    async fn assign_job(&self, id: &str, job_id: &str, provider: &str) -> Result<bool> {
        let (id, job_id, provider) = (id.to_string(), job_id.to_string(), provider.to_string());
        self.with_conn(move |conn| {
            // Single conditional statement so a concurrent submit cannot
            // also attach a job to a meeting that is already in flight.
            let changed = conn
                .execute(
                    "UPDATE meetings SET job_id = ?1, provider = ?2, status = 'processing', \
                     error = NULL, updated_at = CURRENT_TIMESTAMP \
                     WHERE id = ?3 AND status NOT IN ('queued', 'processing')",
                    params![job_id, provider, id],
                )
                .context("Failed to assign transcription job")?;
            Ok(changed > 0)
        })
        .await
    }

    async fn update_meeting_status(
        &self,
        id: &str,
        status: MeetingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let (id, error) = (id.to_string(), error.map(|e| e.to_string()));
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE meetings SET status = ?1, error = ?2, updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ?3",
                params![status.as_str(), error, id],
            )
            .context("Failed to update meeting status")?;
            Ok(())
        })
        .await
    }

    async fn update_meeting_result(
        &self,
        id: &str,
        language: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        let (id, language) = (id.to_string(), language.map(|l| l.to_string()));
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE meetings SET language = COALESCE(?1, language), \
                 duration_ms = COALESCE(?2, duration_ms), updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ?3",
                params![language, duration_ms, id],
            )
            .context("Failed to update meeting result fields")?;
            Ok(())
        })
        .await
    }

    async fn upsert_segments(&self, meeting_id: &str, segments: &[SegmentRow]) -> Result<()> {
        let meeting_id = meeting_id.to_string();
        let segments = segments.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "INSERT INTO segments \
                     (meeting_id, start_ms, end_ms, speaker, text, confidence, sentiment, \
                      is_question, is_action_item) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(meeting_id, start_ms, end_ms, speaker) DO UPDATE SET \
                     text = excluded.text, confidence = excluded.confidence, \
                     sentiment = excluded.sentiment, is_question = excluded.is_question, \
                     is_action_item = excluded.is_action_item",
                )
                .context("Failed to prepare segment upsert")?;

            for segment in &segments {
                stmt.execute(params![
                    meeting_id,
                    segment.start_ms,
                    segment.end_ms,
                    segment.speaker.as_deref().unwrap_or(""),
                    segment.text,
                    segment.confidence,
                    segment.sentiment,
                    segment.is_question,
                    segment.is_action_item,
                ])
                .context("Failed to upsert segment")?;
            }
            Ok(())
        })
        .await
    }

    async fn upsert_speakers(&self, meeting_id: &str, speakers: &[SpeakerRow]) -> Result<()> {
        let meeting_id = meeting_id.to_string();
        let speakers = speakers.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "INSERT INTO speakers \
                     (meeting_id, label, display_name, speaking_time_ms, word_count, \
                      interruptions, sentiment_distribution) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(meeting_id, label) DO UPDATE SET \
                     display_name = excluded.display_name, \
                     speaking_time_ms = excluded.speaking_time_ms, \
                     word_count = excluded.word_count, \
                     interruptions = excluded.interruptions, \
                     sentiment_distribution = excluded.sentiment_distribution",
                )
                .context("Failed to prepare speaker upsert")?;

            for speaker in &speakers {
                stmt.execute(params![
                    meeting_id,
                    speaker.label,
                    speaker.display_name,
                    speaker.speaking_time_ms,
                    speaker.word_count,
                    speaker.interruptions,
                    speaker.sentiment_distribution,
                ])
                .context("Failed to upsert speaker")?;
            }
            Ok(())
        })
        .await
    }

    async fn upsert_metadata(&self, meeting_id: &str, metadata: &[MetadataRow]) -> Result<()> {
        let meeting_id = meeting_id.to_string();
        let metadata = metadata.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "INSERT INTO meeting_metadata \
                     (meeting_id, kind, value, detail, confidence, start_ms, end_ms) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(meeting_id, kind, value, start_ms) DO UPDATE SET \
                     detail = excluded.detail, confidence = excluded.confidence, \
                     end_ms = excluded.end_ms",
                )
                .context("Failed to prepare metadata upsert")?;

            for row in &metadata {
                stmt.execute(params![
                    meeting_id,
                    row.kind.as_str(),
                    row.value,
                    row.detail,
                    row.confidence,
                    row.start_ms.unwrap_or(-1),
                    row.end_ms,
                ])
                .context("Failed to upsert metadata")?;
            }
            Ok(())
        })
        .await
    }

    async fn get_segments(&self, meeting_id: &str) -> Result<Vec<SegmentRow>> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT start_ms, end_ms, speaker, text, confidence, sentiment, \
                     is_question, is_action_item \
                     FROM segments WHERE meeting_id = ?1 ORDER BY start_ms, end_ms",
                )
                .context("Failed to prepare segments query")?;

            let rows = stmt
                .query_map(params![meeting_id], |row| {
                    let speaker: String = row.get(2)?;
                    Ok(SegmentRow {
                        start_ms: row.get(0)?,
                        end_ms: row.get(1)?,
                        speaker: if speaker.is_empty() {
                            None
                        } else {
                            Some(speaker)
                        },
                        text: row.get(3)?,
                        confidence: row.get(4)?,
                        sentiment: row.get(5)?,
                        is_question: row.get(6)?,
                        is_action_item: row.get(7)?,
                    })
                })
                .context("Failed to query segments")?;

            let mut segments = Vec::new();
            for row in rows {
                segments.push(row?);
            }
            Ok(segments)
        })
        .await
    }

    async fn get_speakers(&self, meeting_id: &str) -> Result<Vec<SpeakerRow>> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT label, display_name, speaking_time_ms, word_count, interruptions, \
                     sentiment_distribution \
                     FROM speakers WHERE meeting_id = ?1 ORDER BY label",
                )
                .context("Failed to prepare speakers query")?;

            let rows = stmt
                .query_map(params![meeting_id], |row| {
                    Ok(SpeakerRow {
                        label: row.get(0)?,
                        display_name: row.get(1)?,
                        speaking_time_ms: row.get(2)?,
                        word_count: row.get(3)?,
                        interruptions: row.get(4)?,
                        sentiment_distribution: row.get(5)?,
                    })
                })
                .context("Failed to query speakers")?;

            let mut speakers = Vec::new();
            for row in rows {
                speakers.push(row?);
            }
            Ok(speakers)
        })
        .await
    }

    async fn get_metadata(&self, meeting_id: &str) -> Result<Vec<MetadataRow>> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT kind, value, detail, confidence, start_ms, end_ms \
                     FROM meeting_metadata WHERE meeting_id = ?1 ORDER BY kind, start_ms",
                )
                .context("Failed to prepare metadata query")?;

            let rows = stmt
                .query_map(params![meeting_id], |row| {
                    let kind: String = row.get(0)?;
                    let start_ms: i64 = row.get(4)?;
                    Ok(MetadataRow {
                        kind: MetadataKind::parse(&kind).unwrap_or(MetadataKind::Topic),
                        value: row.get(1)?,
                        detail: row.get(2)?,
                        confidence: row.get(3)?,
                        start_ms: if start_ms < 0 { None } else { Some(start_ms) },
                        end_ms: row.get(5)?,
                    })
                })
                .context("Failed to query metadata")?;

            let mut metadata = Vec::new();
            for row in rows {
                metadata.push(row?);
            }
            Ok(metadata)
        })
        .await
    }
}
