//! Embedding extraction: image bytes in, one embedding per detected face out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{crop_rect, FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces face embeddings from raw image bytes.
///
/// A decodable image with no faces yields `Ok(vec![])`; only undecodable
/// input or inference failure is an error. Implementations may hold
/// inference sessions that need exclusive access, hence `&mut self`.
pub trait EmbeddingExtractor: Send {
    fn extract(&mut self, image_bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractionError>;

    /// Short description for status reporting.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

/// SCRFD + ArcFace extractor backed by ONNX Runtime.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, ExtractionError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&mut self, image_bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractionError> {
        let image = image::load_from_memory(image_bytes)
            .map_err(|e| ExtractionError::Decode(e.to_string()))?
            .to_rgb8();

        let boxes = self.detector.detect(&image)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            // Boxes decoded entirely off-canvas have nothing to embed.
            if crop_rect(&bbox, image.width(), image.height()).is_none() {
                tracing::debug!(?bbox, "skipping face box outside image bounds");
                continue;
            }
            let embedding = self.recognizer.extract(&image, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            faces = faces.len(),
            "extracted face embeddings"
        );
        Ok(faces)
    }

    fn describe(&self) -> String {
        "onnx (SCRFD det_10g + ArcFace w600k_r50)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_detector_model() {
        let err = OnnxExtractor::load("/nonexistent/det_10g.onnx", "/nonexistent/w600k_r50.onnx")
            .err()
            .expect("missing model must fail");
        assert!(matches!(err, ExtractionError::Detector(DetectorError::ModelNotFound(_))));
    }

    #[test]
    fn test_default_describe() {
        struct Fixed;
        impl EmbeddingExtractor for Fixed {
            fn extract(&mut self, _image_bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractionError> {
                Ok(Vec::new())
            }
        }
        assert_eq!(Fixed.describe(), "custom");
        assert!(Fixed.extract(b"anything").unwrap().is_empty());
    }
}
