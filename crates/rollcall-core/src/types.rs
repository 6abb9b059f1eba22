use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Bounding box for a detected face, in source image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimensions come from different extractor
    /// configurations and are not comparable; the distance is `+inf`.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered identity and its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownFaceEntry {
    pub identity: String,
    pub embedding: Embedding,
}

/// One face found in an uploaded image. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Classification of a single detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { identity: String, distance: f32 },
    Unknown,
}

impl MatchOutcome {
    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { identity, .. } => Some(identity),
            MatchOutcome::Unknown => None,
        }
    }
}

/// Aggregated match result for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// Identities matched by at least one face, deduplicated.
    pub recognized: BTreeSet<String>,
    pub unknown_count: usize,
    pub total_faces: usize,
    /// One outcome per detected face, in detection order.
    pub outcomes: Vec<MatchOutcome>,
}

impl MatchReport {
    /// Number of faces that matched some identity, before deduplication.
    pub fn matched_face_count(&self) -> usize {
        self.total_faces - self.unknown_count
    }
}
