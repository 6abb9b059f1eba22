use rollcall_core::{DetectedFace, EmbeddingExtractor, ExtractionError, OnnxExtractor};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the pipeline to the engine thread.
enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, ExtractionError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    description: String,
}

impl EngineHandle {
    /// Request embeddings for every face in an encoded image.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Load the ONNX models and start the engine. Fails fast if a model is missing.
pub fn spawn_onnx_engine(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let extractor = OnnxExtractor::load(scrfd_path, arcface_path)?;
    tracing::info!(scrfd = scrfd_path, arcface = arcface_path, "face models loaded");
    spawn_engine(extractor)
}

/// Spawn the engine on a dedicated OS thread.
///
/// Inference sessions need exclusive access, so all extraction is
/// serialized through one request loop.
pub fn spawn_engine<E: EmbeddingExtractor + 'static>(mut extractor: E) -> Result<EngineHandle, EngineError> {
    let description = extractor.describe();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        let result = extractor.extract(&image);
                        if let Err(e) = &result {
                            tracing::debug!(error = %e, bytes = image.len(), "extraction failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, description })
}
