use crate::error::{PipelineError, RegistrationError};
use crate::pipeline::Pipeline;
use crate::records::{IdentityRecord, UploadContext};
use crate::store::StoreError;
use serde::Deserialize;
use std::sync::Arc;
use zbus::{fdo, interface};

/// Well-known bus name and object path of the attendance daemon.
pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// Upload metadata passed alongside the image bytes.
#[derive(Debug, Deserialize)]
struct UploadRequest {
    requester: String,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    cohort: Option<String>,
}

/// D-Bus interface for the attendance daemon.
///
/// Every method that returns data replies with a JSON string.
pub struct RollcallService {
    pipeline: Arc<Pipeline>,
    default_period: String,
}

impl RollcallService {
    pub fn new(pipeline: Arc<Pipeline>, default_period: String) -> Self {
        Self {
            pipeline,
            default_period,
        }
    }

    fn upload_context(&self, context_json: &str) -> fdo::Result<UploadContext> {
        let req: UploadRequest = serde_json::from_str(context_json)
            .map_err(|e| fdo::Error::InvalidArgs(format!("invalid upload context: {e}")))?;
        let requester = req.requester.trim();
        if requester.is_empty() {
            return Err(fdo::Error::InvalidArgs("requester must not be empty".into()));
        }
        let period = req
            .period
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.default_period.clone());
        Ok(UploadContext::new(requester, &period).with_cohort(req.cohort))
    }
}

fn pipeline_error(e: PipelineError) -> fdo::Error {
    match e {
        PipelineError::ExtractionFailed(_) => fdo::Error::InvalidArgs(e.to_string()),
        PipelineError::RegistryUnavailable(_) => fdo::Error::Failed(e.to_string()),
    }
}

fn registration_error(e: RegistrationError) -> fdo::Error {
    match e {
        RegistrationError::Storage(_) => fdo::Error::Failed(e.to_string()),
        _ => fdo::Error::InvalidArgs(e.to_string()),
    }
}

fn store_error(e: StoreError) -> fdo::Error {
    fdo::Error::Failed(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallService {
    /// Match the faces in a class photo and record attendance.
    ///
    /// `context_json` is `{"requester": .., "period": .., "cohort": ..}`;
    /// period and cohort are optional.
    async fn process_upload(&self, image: Vec<u8>, context_json: &str) -> fdo::Result<String> {
        let ctx = self.upload_context(context_json)?;
        tracing::info!(requester = %ctx.requester, period = %ctx.period, bytes = image.len(), "upload received");
        let result = self.pipeline.process_upload(image, ctx).await.map_err(|e| {
            tracing::error!(error = %e, retryable = e.is_retryable(), "upload rejected");
            pipeline_error(e)
        })?;
        to_json(&result)
    }

    /// Register or replace the reference face for an identity.
    async fn register_face(&self, identity: &str, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(identity, bytes = image.len(), "register_face requested");
        let info = self
            .pipeline
            .register_face(identity, image)
            .await
            .map_err(registration_error)?;
        to_json(&info)
    }

    /// List registered identities without their embeddings.
    async fn list_known_faces(&self) -> fdo::Result<String> {
        let faces = self.pipeline.list_known_faces().await.map_err(store_error)?;
        to_json(&faces)
    }

    async fn remove_known_face(&self, identity: &str) -> fdo::Result<bool> {
        self.pipeline.remove_known_face(identity).await.map_err(store_error)
    }

    /// Create or replace roster metadata. `record_json` is an identity record.
    async fn put_identity(&self, record_json: &str) -> fdo::Result<()> {
        let mut record: IdentityRecord = serde_json::from_str(record_json)
            .map_err(|e| fdo::Error::InvalidArgs(format!("invalid identity record: {e}")))?;
        record.identity = record.identity.trim().to_string();
        if record.identity.is_empty() {
            return Err(fdo::Error::InvalidArgs("identity must not be empty".into()));
        }
        tracing::info!(identity = %record.identity, "put_identity requested");
        self.pipeline.put_identity(&record).await.map_err(store_error)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let registry = match self.pipeline.registry_size().await {
            Ok(n) => serde_json::json!(n),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        let settings = self.pipeline.settings();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "engine": self.pipeline.engine_description(),
            "models_loaded": true,
            "match_threshold": settings.match_threshold,
            "registry_size": registry,
            "registry_cached": self.pipeline.registry_caching(),
            "duplicate_window_secs": settings.duplicate_window.map(|d| d.as_secs()),
            "default_period": self.default_period,
        })
        .to_string())
    }
}
