//! Upload pipeline: extract -> load registry -> match -> record -> audit.

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::error::{PipelineError, RegistrationError};
use crate::recorder::{AttendanceRecorder, RecordOutcome, RecorderPolicy};
use crate::records::{IdentityRecord, ImageDigest, KnownFaceInfo, UploadAudit, UploadContext};
use crate::registry::KnownFaceRegistry;
use crate::store::{bounded, AttendanceStore, StoreError};
use rollcall_core::{match_faces, DetectedFace, EuclideanMatcher, MatchReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Everything the caller learns about one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    #[serde(flatten)]
    pub matches: MatchReport,
    #[serde(flatten)]
    pub recording: RecordOutcome,
    /// Set when the audit record could not be written. The attendance
    /// result above is still valid.
    pub audit_error: Option<String>,
}

/// Tunables the pipeline takes from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub match_threshold: f32,
    pub extract_timeout: Duration,
    pub store_timeout: Duration,
    pub duplicate_window: Option<Duration>,
    pub cache_registry: bool,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            match_threshold: config.match_threshold,
            extract_timeout: config.extract_timeout,
            store_timeout: config.store_timeout,
            duplicate_window: config.duplicate_window,
            cache_registry: config.cache_registry,
        }
    }
}

pub struct Pipeline {
    engine: EngineHandle,
    store: Arc<dyn AttendanceStore>,
    registry: KnownFaceRegistry,
    recorder: AttendanceRecorder,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(engine: EngineHandle, store: Arc<dyn AttendanceStore>, settings: PipelineSettings) -> Self {
        let registry = KnownFaceRegistry::new(store.clone(), settings.store_timeout, settings.cache_registry);
        let recorder = AttendanceRecorder::new(
            store.clone(),
            settings.store_timeout,
            RecorderPolicy {
                duplicate_window: settings.duplicate_window,
            },
        );
        Self {
            engine,
            store,
            registry,
            recorder,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn engine_description(&self) -> &str {
        self.engine.description()
    }

    /// Match the faces in one class photo and record attendance for them.
    ///
    /// Extraction and registry failures abort the upload. Recording
    /// failures are per identity and come back in the result.
    pub async fn process_upload(&self, image: Vec<u8>, ctx: UploadContext) -> Result<UploadResult, PipelineError> {
        let digest = ImageDigest::of(&image);
        let faces = self.extract(image).await.map_err(PipelineError::ExtractionFailed)?;

        let registry = self.registry.snapshot().await?;
        let matches = match_faces(&EuclideanMatcher, &faces, &registry, self.settings.match_threshold);
        tracing::info!(
            total = matches.total_faces,
            recognized = matches.recognized.len(),
            unknown = matches.unknown_count,
            registry = registry.len(),
            "upload matched"
        );

        let recording = self.recorder.record(&matches.recognized, &ctx).await;

        let audit = UploadAudit::new(&digest, &ctx, &matches);
        let audit_error = match bounded(self.settings.store_timeout, self.store.append_upload_audit(&audit)).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(audit = %audit.id, error = %e, "upload audit write failed");
                Some(e.to_string())
            }
        };

        if !recording.failed.is_empty() {
            tracing::warn!(failed = recording.failed.len(), "upload finished with unrecorded identities");
        }

        Ok(UploadResult {
            matches,
            recording,
            audit_error,
        })
    }

    /// Register (or re-register) the reference face for an identity.
    ///
    /// The most confident face in the image is used.
    pub async fn register_face(&self, identity: &str, image: Vec<u8>) -> Result<KnownFaceInfo, RegistrationError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(RegistrationError::InvalidIdentity);
        }

        let faces = self.extract(image).await.map_err(RegistrationError::ExtractionFailed)?;
        let face = faces
            .into_iter()
            .max_by(|a, b| a.bbox.confidence.total_cmp(&b.bbox.confidence))
            .ok_or(RegistrationError::NoFaceFound)?;
        if face.embedding.values.iter().any(|v| !v.is_finite()) {
            return Err(RegistrationError::ExtractionFailed(
                "embedding contains non-finite values".to_string(),
            ));
        }

        let info = bounded(self.settings.store_timeout, self.store.upsert_known_face(identity, &face.embedding))
            .await
            .map_err(|e| RegistrationError::Storage(e.to_string()))?;
        self.registry.invalidate().await;

        tracing::info!(identity, dimension = info.dimension, confidence = face.bbox.confidence, "face registered");
        Ok(info)
    }

    pub async fn list_known_faces(&self) -> Result<Vec<KnownFaceInfo>, StoreError> {
        bounded(self.settings.store_timeout, self.store.known_face_info()).await
    }

    /// Remove an identity's reference face. Attendance history is kept.
    pub async fn remove_known_face(&self, identity: &str) -> Result<bool, StoreError> {
        let removed = bounded(self.settings.store_timeout, self.store.remove_known_face(identity)).await?;
        self.registry.invalidate().await;
        tracing::info!(identity, removed, "known face removal");
        Ok(removed)
    }

    /// Create or replace roster metadata for an identity.
    pub async fn put_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        bounded(self.settings.store_timeout, self.store.put_identity(record)).await
    }

    pub async fn registry_size(&self) -> Result<usize, PipelineError> {
        Ok(self.registry.snapshot().await?.len())
    }

    pub fn registry_caching(&self) -> bool {
        self.registry.caching()
    }

    async fn extract(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, String> {
        match tokio::time::timeout(self.settings.extract_timeout, self.engine.extract(image)).await {
            Ok(Ok(faces)) => Ok(faces),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "face extraction failed");
                Err(e.to_string())
            }
            Err(_) => {
                tracing::error!(timeout = ?self.settings.extract_timeout, "face extraction timed out");
                Err(format!("timed out after {:?}", self.settings.extract_timeout))
            }
        }
    }
}
