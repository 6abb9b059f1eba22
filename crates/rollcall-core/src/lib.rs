//! rollcall-core: face embedding extraction and known-face matching.
//!
//! The extractor turns raw image bytes into per-face embeddings (SCRFD for
//! detection, ArcFace for recognition, both via ONNX Runtime). The matcher
//! classifies each embedding against the known-face registry.

pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use extractor::{EmbeddingExtractor, ExtractionError, OnnxExtractor};
pub use matcher::{match_faces, EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use types::{BoundingBox, DetectedFace, Embedding, KnownFaceEntry, MatchOutcome, MatchReport};
