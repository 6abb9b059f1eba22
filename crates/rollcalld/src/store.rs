//! Attendance storage: the known-face registry, identity records, the
//! attendance event log and upload audits.
//!
//! [`AttendanceStore`] is the seam the pipeline depends on; [`SqliteStore`]
//! is the production implementation, running SQLite on its own thread via
//! `tokio-rusqlite`.

use crate::records::{AttendanceEvent, IdentityRecord, KnownFaceInfo, UploadAudit};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::{Embedding, KnownFaceEntry};
use rusqlite::{params, OptionalExtension};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS known_faces (
    identity      TEXT PRIMARY KEY,
    dimension     INTEGER NOT NULL,
    embedding     BLOB NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS identities (
    identity        TEXT PRIMARY KEY,
    cohort          TEXT,
    program         TEXT,
    program_code    TEXT,
    course          TEXT,
    course_code     TEXT,
    faculty         TEXT,
    faculty_id      TEXT,
    registration_no TEXT,
    created_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance_events (
    id              TEXT PRIMARY KEY,
    identity        TEXT NOT NULL REFERENCES identities(identity),
    cohort          TEXT,
    program         TEXT,
    program_code    TEXT,
    course          TEXT,
    course_code     TEXT,
    faculty         TEXT,
    faculty_id      TEXT,
    registration_no TEXT,
    period          TEXT NOT NULL,
    year            INTEGER NOT NULL,
    requester       TEXT NOT NULL,
    presence        INTEGER NOT NULL,
    timestamp       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_identity_time
    ON attendance_events (identity, timestamp);
CREATE TABLE IF NOT EXISTS upload_audits (
    id            TEXT PRIMARY KEY,
    image_sha256  TEXT NOT NULL,
    image_bytes   INTEGER NOT NULL,
    requester     TEXT NOT NULL,
    cohort        TEXT,
    recognized    TEXT NOT NULL,
    unknown_count INTEGER NOT NULL,
    total_faces   INTEGER NOT NULL,
    timestamp     TEXT NOT NULL
);
";

const IDENTITY_COLUMNS: &str = "identity, cohort, program, program_code, course, course_code, \
                                faculty, faculty_id, registration_no";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("identity not found: {0}")]
    NotFound(String),
}

/// Storage operations consumed by the registry, recorder and pipeline.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Every registered embedding, ordered by identity.
    async fn list_known_faces(&self) -> Result<Vec<KnownFaceEntry>, StoreError>;
    /// Registry metadata, ordered by identity.
    async fn known_face_info(&self) -> Result<Vec<KnownFaceInfo>, StoreError>;
    /// Insert or replace the embedding for an identity.
    async fn upsert_known_face(&self, identity: &str, embedding: &Embedding) -> Result<KnownFaceInfo, StoreError>;
    async fn remove_known_face(&self, identity: &str) -> Result<bool, StoreError>;

    /// Create a bare record if absent; an existing record is left untouched.
    async fn upsert_identity(&self, identity: &str) -> Result<IdentityRecord, StoreError>;
    async fn get_identity(&self, identity: &str) -> Result<Option<IdentityRecord>, StoreError>;
    /// Create or fully replace an identity's contextual attributes.
    async fn put_identity(&self, record: &IdentityRecord) -> Result<(), StoreError>;

    async fn latest_attendance(&self, identity: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
    async fn append_attendance_event(&self, event: &AttendanceEvent) -> Result<(), StoreError>;
    async fn append_upload_audit(&self, audit: &UploadAudit) -> Result<(), StoreError>;
}

/// Run a storage call with an upper bound on its duration.
pub async fn bounded<T, F>(limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

/// SQLite-backed [`AttendanceStore`].
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

/// (identity, dimension, model_version, created_at, updated_at)
type InfoRow = (String, i64, Option<String>, String, String);

impl SqliteStore {
    /// Open or create the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.pragma_update(None, "foreign_keys", 1)?;
            c.busy_timeout(Duration::from_secs(2))?;
            c.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        tracing::debug!("attendance schema ready");
        Ok(Self { conn })
    }
}

#[async_trait]
impl AttendanceStore for SqliteStore {
    async fn list_known_faces(&self) -> Result<Vec<KnownFaceEntry>, StoreError> {
        let rows = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(
                    "SELECT identity, dimension, embedding, model_version
                     FROM known_faces ORDER BY identity",
                )?;
                let rows = stmt
                    .query_map([], |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, i64>(1)?,
                            r.get::<_, Vec<u8>>(2)?,
                            r.get::<_, Option<String>>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        // A corrupt row only costs that identity its registration.
        Ok(rows
            .into_iter()
            .filter_map(|(identity, dimension, blob, model_version)| {
                let decoded = usize::try_from(dimension)
                    .map_err(|_| format!("invalid dimension {dimension}"))
                    .and_then(|dimension| decode_embedding(&blob, dimension));
                match decoded {
                    Ok(values) => Some(KnownFaceEntry {
                        identity,
                        embedding: Embedding { values, model_version },
                    }),
                    Err(e) => {
                        tracing::warn!(identity = %identity, error = %e, "skipping corrupt known face");
                        None
                    }
                }
            })
            .collect())
    }

    async fn known_face_info(&self) -> Result<Vec<KnownFaceInfo>, StoreError> {
        let rows: Vec<InfoRow> = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(
                    "SELECT identity, dimension, model_version, created_at, updated_at
                     FROM known_faces ORDER BY identity",
                )?;
                let rows = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(info_from_row).collect()
    }

    async fn upsert_known_face(&self, identity: &str, embedding: &Embedding) -> Result<KnownFaceInfo, StoreError> {
        if embedding.values.is_empty() || embedding.values.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidValue(format!(
                "embedding for {identity} is empty or contains non-finite values"
            )));
        }
        let identity = identity.to_string();
        let dimension = embedding.dim() as i64;
        let blob = encode_embedding(&embedding.values);
        let model_version = embedding.model_version.clone();
        let now = encode_time(&Utc::now());

        let row: InfoRow = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                tx.execute(
                    "INSERT INTO known_faces (identity, dimension, embedding, model_version, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(identity) DO UPDATE SET
                        dimension = excluded.dimension,
                        embedding = excluded.embedding,
                        model_version = excluded.model_version,
                        updated_at = excluded.updated_at",
                    params![identity, dimension, blob, model_version, now],
                )?;
                let row = tx.query_row(
                    "SELECT identity, dimension, model_version, created_at, updated_at
                     FROM known_faces WHERE identity = ?1",
                    params![identity],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
                )?;
                tx.commit()?;
                Ok(row)
            })
            .await?;
        info_from_row(row)
    }

    async fn remove_known_face(&self, identity: &str) -> Result<bool, StoreError> {
        let identity = identity.to_string();
        let deleted = self
            .conn
            .call(move |c| Ok(c.execute("DELETE FROM known_faces WHERE identity = ?1", params![identity])?))
            .await?;
        Ok(deleted > 0)
    }

    async fn upsert_identity(&self, identity: &str) -> Result<IdentityRecord, StoreError> {
        let identity = identity.to_string();
        let now = encode_time(&Utc::now());
        let record = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                tx.execute(
                    "INSERT INTO identities (identity, created_at) VALUES (?1, ?2)
                     ON CONFLICT(identity) DO NOTHING",
                    params![identity, now],
                )?;
                let record = tx.query_row(
                    &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE identity = ?1"),
                    params![identity],
                    identity_from_row,
                )?;
                tx.commit()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn get_identity(&self, identity: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let identity = identity.to_string();
        let record = self
            .conn
            .call(move |c| {
                Ok(c
                    .query_row(
                        &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE identity = ?1"),
                        params![identity],
                        identity_from_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(record)
    }

    async fn put_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        let r = record.clone();
        let now = encode_time(&Utc::now());
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO identities (identity, cohort, program, program_code, course, course_code,
                                             faculty, faculty_id, registration_no, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(identity) DO UPDATE SET
                        cohort = excluded.cohort,
                        program = excluded.program,
                        program_code = excluded.program_code,
                        course = excluded.course,
                        course_code = excluded.course_code,
                        faculty = excluded.faculty,
                        faculty_id = excluded.faculty_id,
                        registration_no = excluded.registration_no",
                    params![
                        r.identity,
                        r.cohort,
                        r.program,
                        r.program_code,
                        r.course,
                        r.course_code,
                        r.faculty,
                        r.faculty_id,
                        r.registration_no,
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn latest_attendance(&self, identity: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let identity = identity.to_string();
        let latest: Option<String> = self
            .conn
            .call(move |c| {
                Ok(c.query_row(
                    "SELECT MAX(timestamp) FROM attendance_events WHERE identity = ?1",
                    params![identity],
                    |r| r.get(0),
                )?)
            })
            .await?;
        latest.as_deref().map(decode_time).transpose()
    }

    async fn append_attendance_event(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        let e = event.clone();
        let timestamp = encode_time(&e.timestamp);
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO attendance_events (id, identity, cohort, program, program_code, course,
                                                    course_code, faculty, faculty_id, registration_no,
                                                    period, year, requester, presence, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    params![
                        e.id.to_string(),
                        e.identity,
                        e.cohort,
                        e.program,
                        e.program_code,
                        e.course,
                        e.course_code,
                        e.faculty,
                        e.faculty_id,
                        e.registration_no,
                        e.period,
                        e.year,
                        e.requester,
                        e.presence,
                        timestamp
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn append_upload_audit(&self, audit: &UploadAudit) -> Result<(), StoreError> {
        let a = audit.clone();
        let recognized =
            serde_json::to_string(&a.recognized).map_err(|e| StoreError::InvalidValue(e.to_string()))?;
        let timestamp = encode_time(&a.timestamp);
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO upload_audits (id, image_sha256, image_bytes, requester, cohort,
                                                recognized, unknown_count, total_faces, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        a.id.to_string(),
                        a.image_sha256,
                        a.image_bytes as i64,
                        a.requester,
                        a.cohort,
                        recognized,
                        a.unknown_count as i64,
                        a.total_faces as i64,
                        timestamp
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn identity_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRecord> {
    Ok(IdentityRecord {
        identity: r.get(0)?,
        cohort: r.get(1)?,
        program: r.get(2)?,
        program_code: r.get(3)?,
        course: r.get(4)?,
        course_code: r.get(5)?,
        faculty: r.get(6)?,
        faculty_id: r.get(7)?,
        registration_no: r.get(8)?,
    })
}

fn info_from_row((identity, dimension, model_version, created_at, updated_at): InfoRow) -> Result<KnownFaceInfo, StoreError> {
    Ok(KnownFaceInfo {
        dimension: usize::try_from(dimension)
            .map_err(|_| StoreError::InvalidValue(format!("negative dimension for {identity}")))?,
        identity,
        model_version,
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidValue(format!("timestamp {s:?}: {e}")))
}

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8], dimension: usize) -> Result<Vec<f32>, String> {
    let expected = dimension
        .checked_mul(4)
        .ok_or_else(|| format!("dimension {dimension} is out of range"))?;
    if blob.len() != expected {
        return Err(format!(
            "embedding blob is {} bytes, expected {expected} for dimension {dimension}",
            blob.len()
        ));
    }
    let values: Vec<f32> = blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err("embedding contains non-finite values".to_string());
    }
    Ok(values)
}

#[cfg(test)]
impl SqliteStore {
    pub(crate) async fn count(&self, table: &'static str, identity: &str) -> i64 {
        let identity = identity.to_string();
        self.conn
            .call(move |c| {
                Ok(c.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE identity = ?1"),
                    params![identity],
                    |r| r.get(0),
                )?)
            })
            .await
            .unwrap()
    }

    /// Write a known-face row without validation.
    pub(crate) async fn insert_raw_known_face(&self, identity: &str, dimension: i64, blob: Vec<u8>) {
        let identity = identity.to_string();
        let now = encode_time(&Utc::now());
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO known_faces (identity, dimension, embedding, model_version, created_at, updated_at)
                     VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
                    params![identity, dimension, blob, now],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    /// Attendance events for an identity, oldest first.
    pub(crate) async fn events_for(&self, identity: &str) -> Vec<AttendanceEvent> {
        let identity = identity.to_string();
        let rows: Vec<(String, AttendanceEvent)> = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(
                    "SELECT id, identity, cohort, program, program_code, course, course_code, faculty,
                            faculty_id, registration_no, period, year, requester, presence, timestamp
                     FROM attendance_events WHERE identity = ?1 ORDER BY timestamp",
                )?;
                let rows = stmt
                    .query_map(params![identity], |r| {
                        let timestamp: String = r.get(14)?;
                        Ok((
                            timestamp,
                            AttendanceEvent {
                                id: uuid::Uuid::parse_str(&r.get::<_, String>(0)?).unwrap(),
                                identity: r.get(1)?,
                                cohort: r.get(2)?,
                                program: r.get(3)?,
                                program_code: r.get(4)?,
                                course: r.get(5)?,
                                course_code: r.get(6)?,
                                faculty: r.get(7)?,
                                faculty_id: r.get(8)?,
                                registration_no: r.get(9)?,
                                period: r.get(10)?,
                                year: r.get(11)?,
                                requester: r.get(12)?,
                                presence: r.get(13)?,
                                timestamp: Utc::now(),
                            },
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .unwrap();
        rows.into_iter()
            .map(|(timestamp, mut event)| {
                event.timestamp = decode_time(&timestamp).unwrap();
                event
            })
            .collect()
    }

    /// (image_sha256, image_bytes) of every audit row.
    pub(crate) async fn audit_digests(&self) -> Vec<(String, i64)> {
        self.conn
            .call(|c| {
                let mut stmt = c.prepare("SELECT image_sha256, image_bytes FROM upload_audits ORDER BY timestamp")?;
                let rows = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .unwrap()
    }

    pub(crate) async fn audit_count(&self) -> i64 {
        self.conn
            .call(|c| Ok(c.query_row("SELECT COUNT(*) FROM upload_audits", [], |r| r.get(0))?))
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::UploadContext;

    fn embedding(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[tokio::test]
    async fn test_known_faces_roundtrip_sorted() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_known_face("zoe", &embedding(&[0.1, 0.2])).await.unwrap();
        store.upsert_known_face("adam", &embedding(&[0.3, -0.4])).await.unwrap();

        let faces = store.list_known_faces().await.unwrap();
        let names: Vec<&str> = faces.iter().map(|f| f.identity.as_str()).collect();
        assert_eq!(names, vec!["adam", "zoe"]);
        assert_eq!(faces[0].embedding.values, vec![0.3, -0.4]);
    }

    #[tokio::test]
    async fn test_empty_registry_is_ok() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.list_known_faces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reregister_replaces_embedding() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store.upsert_known_face("amy", &embedding(&[1.0, 0.0])).await.unwrap();
        let second = store.upsert_known_face("amy", &embedding(&[0.0, 1.0, 0.0])).await.unwrap();

        let faces = store.list_known_faces().await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].embedding.values, vec![0.0, 1.0, 0.0]);
        assert_eq!(second.dimension, 3);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn test_remove_known_face() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_known_face("ben", &embedding(&[1.0])).await.unwrap();
        assert!(store.remove_known_face("ben").await.unwrap());
        assert!(!store.remove_known_face("ben").await.unwrap());
        assert!(store.known_face_info().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_identity_preserves_existing_metadata() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let roster = IdentityRecord {
            cohort: Some("CSE-A".into()),
            course: Some("Compilers".into()),
            ..IdentityRecord::bare("cara")
        };
        store.put_identity(&roster).await.unwrap();

        let upserted = store.upsert_identity("cara").await.unwrap();
        assert_eq!(upserted, roster);
        assert_eq!(store.upsert_identity("cara").await.unwrap(), roster);
        assert_eq!(store.count("identities", "cara").await, 1);
    }

    #[tokio::test]
    async fn test_upsert_identity_creates_bare_record() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert_eq!(store.get_identity("dan").await.unwrap(), None);
        let record = store.upsert_identity("dan").await.unwrap();
        assert_eq!(record, IdentityRecord::bare("dan"));
        assert_eq!(store.get_identity("dan").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_latest_attendance_tracks_newest_event() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let record = store.upsert_identity("eve").await.unwrap();
        assert_eq!(store.latest_attendance("eve").await.unwrap(), None);

        let mut ctx = UploadContext::new("prof", "Morning");
        let older = ctx.timestamp - chrono::Duration::hours(2);
        store.append_attendance_event(&AttendanceEvent::new(&record, &ctx)).await.unwrap();
        ctx.timestamp = older;
        store.append_attendance_event(&AttendanceEvent::new(&record, &ctx)).await.unwrap();

        let latest = store.latest_attendance("eve").await.unwrap().unwrap();
        assert!(latest > older);
        assert_eq!(store.count("attendance_events", "eve").await, 2);
    }

    #[tokio::test]
    async fn test_event_requires_identity_record() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let ctx = UploadContext::new("prof", "Morning");
        let orphan = AttendanceEvent::new(&IdentityRecord::bare("ghost"), &ctx);
        assert!(store.append_attendance_event(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("rollcall-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested/attendance.db");
        let store = SqliteStore::open(&path).await.unwrap();
        store.upsert_identity("fay").await.unwrap();
        assert!(path.exists());
        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_upsert_rejects_non_finite_embedding() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        for bad in [vec![f32::NAN, 0.0], vec![f32::INFINITY], Vec::new()] {
            let err = store.upsert_known_face("hal", &embedding(&bad)).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidValue(_)));
        }
        assert!(store.known_face_info().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_skipped_not_fatal() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert_known_face("alice", &embedding(&[0.0, 0.0])).await.unwrap();
        store.insert_raw_known_face("bob", 2, encode_embedding(&[f32::NAN, 0.0])).await;
        store.insert_raw_known_face("cat", 3, encode_embedding(&[1.0])).await;
        store.insert_raw_known_face("dov", -1, Vec::new()).await;

        let faces = store.list_known_faces().await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].identity, "alice");
    }

    #[tokio::test]
    async fn test_event_roundtrips_every_column() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let roster = IdentityRecord {
            cohort: Some("CSE-A".into()),
            faculty_id: Some("F-12".into()),
            ..IdentityRecord::bare("ida")
        };
        store.put_identity(&roster).await.unwrap();
        let event = AttendanceEvent::new(&roster, &UploadContext::new("prof", "Evening"));
        store.append_attendance_event(&event).await.unwrap();

        let stored = store.events_for("ida").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, event.id);
        assert_eq!(stored[0].cohort.as_deref(), Some("CSE-A"));
        assert_eq!(stored[0].faculty_id.as_deref(), Some("F-12"));
        assert_eq!(stored[0].period, "Evening");
        assert_eq!(stored[0].presence, 1);
        assert_eq!(encode_time(&stored[0].timestamp), encode_time(&event.timestamp));
    }

    #[test]
    fn test_decode_embedding_rejects_bad_blobs() {
        assert!(decode_embedding(&[], usize::MAX).is_err());
        assert!(decode_embedding(&[0u8; 7], 2).is_err());
        assert!(decode_embedding(&f32::NAN.to_le_bytes(), 1).is_err());
        let blob = encode_embedding(&[1.5, -2.0]);
        assert_eq!(decode_embedding(&blob, 2).unwrap(), vec![1.5, -2.0]);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), StoreError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }
}
