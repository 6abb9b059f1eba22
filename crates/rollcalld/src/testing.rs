//! Test doubles for the store and extractor seams.

use crate::records::{AttendanceEvent, IdentityRecord, KnownFaceInfo, UploadAudit};
use crate::store::{AttendanceStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_core::{BoundingBox, DetectedFace, Embedding, EmbeddingExtractor, ExtractionError, KnownFaceEntry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn injected(what: &str) -> StoreError {
    StoreError::InvalidValue(format!("injected failure: {what}"))
}

/// Wraps a real store and fails or stalls chosen operations.
pub struct FlakyStore {
    inner: Arc<dyn AttendanceStore>,
    registry_down: bool,
    audit_down: bool,
    failing_events: HashSet<String>,
    write_delay: Option<Duration>,
    read_delay: Option<Duration>,
    stale_upserts: bool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn AttendanceStore>) -> Self {
        Self {
            inner,
            registry_down: false,
            audit_down: false,
            failing_events: HashSet::new(),
            write_delay: None,
            read_delay: None,
            stale_upserts: false,
        }
    }

    pub fn registry_down(mut self) -> Self {
        self.registry_down = true;
        self
    }

    pub fn audit_down(mut self) -> Self {
        self.audit_down = true;
        self
    }

    pub fn fail_events_for(mut self, identity: &str) -> Self {
        self.failing_events.insert(identity.to_string());
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Delay registry reads after the inner store has answered, so the
    /// caller holds a result older than the delay.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// `upsert_identity` reports a bare record whatever is stored.
    pub fn with_stale_upserts(mut self) -> Self {
        self.stale_upserts = true;
        self
    }

    async fn stall(&self) {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AttendanceStore for FlakyStore {
    async fn list_known_faces(&self) -> Result<Vec<KnownFaceEntry>, StoreError> {
        if self.registry_down {
            return Err(injected("registry"));
        }
        let entries = self.inner.list_known_faces().await;
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        entries
    }

    async fn known_face_info(&self) -> Result<Vec<KnownFaceInfo>, StoreError> {
        if self.registry_down {
            return Err(injected("registry"));
        }
        self.inner.known_face_info().await
    }

    async fn upsert_known_face(&self, identity: &str, embedding: &Embedding) -> Result<KnownFaceInfo, StoreError> {
        self.inner.upsert_known_face(identity, embedding).await
    }

    async fn remove_known_face(&self, identity: &str) -> Result<bool, StoreError> {
        self.inner.remove_known_face(identity).await
    }

    async fn upsert_identity(&self, identity: &str) -> Result<IdentityRecord, StoreError> {
        self.stall().await;
        let record = self.inner.upsert_identity(identity).await?;
        if self.stale_upserts {
            return Ok(IdentityRecord::bare(identity));
        }
        Ok(record)
    }

    async fn get_identity(&self, identity: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.inner.get_identity(identity).await
    }

    async fn put_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        self.inner.put_identity(record).await
    }

    async fn latest_attendance(&self, identity: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.latest_attendance(identity).await
    }

    async fn append_attendance_event(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        if self.failing_events.contains(&event.identity) {
            return Err(injected("attendance event"));
        }
        self.stall().await;
        self.inner.append_attendance_event(event).await
    }

    async fn append_upload_audit(&self, audit: &UploadAudit) -> Result<(), StoreError> {
        if self.audit_down {
            return Err(injected("audit"));
        }
        self.inner.append_upload_audit(audit).await
    }
}

/// What a [`ScriptedExtractor`] does with the image it is given.
#[derive(Clone)]
pub enum Script {
    Faces(Vec<Vec<f32>>),
    Fail(String),
    Hang(Duration),
}

/// Extractor that ignores the image bytes and follows a script.
pub struct ScriptedExtractor {
    script: Script,
}

impl ScriptedExtractor {
    pub fn faces(embeddings: Vec<Vec<f32>>) -> Self {
        Self {
            script: Script::Faces(embeddings),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Script::Fail(message.to_string()),
        }
    }

    pub fn hanging(delay: Duration) -> Self {
        Self {
            script: Script::Hang(delay),
        }
    }
}

impl EmbeddingExtractor for ScriptedExtractor {
    fn extract(&mut self, _image_bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractionError> {
        match &self.script {
            Script::Faces(embeddings) => Ok(embeddings
                .iter()
                .enumerate()
                .map(|(i, values)| DetectedFace {
                    bbox: BoundingBox {
                        x: i as f32 * 60.0,
                        y: 0.0,
                        width: 50.0,
                        height: 50.0,
                        confidence: 0.9,
                    },
                    embedding: Embedding::new(values.clone()),
                })
                .collect()),
            Script::Fail(message) => Err(ExtractionError::Decode(message.clone())),
            Script::Hang(delay) => {
                std::thread::sleep(*delay);
                Ok(Vec::new())
            }
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
