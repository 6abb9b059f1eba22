//! Nearest-neighbour matching of detected faces against the known-face registry.

use crate::types::{DetectedFace, Embedding, KnownFaceEntry, MatchOutcome, MatchReport};

/// Maximum Euclidean distance at which a face is accepted as a known identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;

/// Strategy for classifying a query embedding against the registry.
pub trait Matcher {
    fn compare(&self, query: &Embedding, registry: &[KnownFaceEntry], threshold: f32) -> MatchOutcome;
}

/// Euclidean nearest-neighbour matcher.
///
/// The closest registry entry wins; ties go to the earliest entry in
/// registry order. The winner is accepted only if its distance is strictly
/// below the threshold.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Embedding, registry: &[KnownFaceEntry], threshold: f32) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in registry.iter().enumerate() {
            let dist = query.euclidean_distance(&entry.embedding);
            // Strict comparison keeps the first of equal distances.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchOutcome::Matched {
                identity: registry[idx].identity.clone(),
                distance: best_dist,
            },
            _ => MatchOutcome::Unknown,
        }
    }
}

/// Classify every detected face and aggregate the result for one image.
pub fn match_faces<M: Matcher + ?Sized>(
    matcher: &M,
    faces: &[DetectedFace],
    registry: &[KnownFaceEntry],
    threshold: f32,
) -> MatchReport {
    let mut report = MatchReport {
        total_faces: faces.len(),
        ..MatchReport::default()
    };

    if let Some(query_dim) = faces.first().map(|f| f.embedding.dim()) {
        for entry in registry.iter().filter(|e| e.embedding.dim() != query_dim) {
            tracing::warn!(
                identity = %entry.identity,
                expected = query_dim,
                found = entry.embedding.dim(),
                "registry entry has a different embedding dimension and cannot match"
            );
        }
    }

    for (i, face) in faces.iter().enumerate() {
        let outcome = matcher.compare(&face.embedding, registry, threshold);
        match &outcome {
            MatchOutcome::Matched { identity, distance } => {
                tracing::debug!(face = i, identity = %identity, distance, "face matched");
                report.recognized.insert(identity.clone());
            }
            MatchOutcome::Unknown => {
                tracing::debug!(face = i, "face unknown");
                report.unknown_count += 1;
            }
        }
        report.outcomes.push(outcome);
    }

    report
}
