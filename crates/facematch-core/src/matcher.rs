//! Nearest-neighbour match decisions with an ambiguity margin.

use crate::config::EngineConfig;
use crate::types::{BoundingBox, DetectedFace, Embedding, GalleryEntry, MatchResult};

/// Why a face was classified unknown.
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownReason {
    TooSmall,
    EmptyGallery,
    NoDistances,
    AboveThreshold { distance: f32 },
    Ambiguous { best: f32, second_best: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Matched {
        identity_id: String,
        confidence: f32,
        gallery_index: usize,
    },
    Unknown(UnknownReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Maximum accepted distance (inclusive).
    pub threshold: f32,
    /// Required gap between best and second-best distance.
    pub margin: f32,
    pub min_face_size: i32,
}

impl From<&EngineConfig> for MatchPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            threshold: config.match_threshold,
            margin: config.match_margin,
            min_face_size: config.min_face_size,
        }
    }
}

impl MatchPolicy {
    /// Classify one face. `distance` is only invoked once the size and
    /// gallery checks pass, and must return one distance per gallery entry.
    pub fn decide<F>(&self, face: &DetectedFace, gallery: &[GalleryEntry], distance: F) -> Decision
    where
        F: FnOnce(&[GalleryEntry], &Embedding) -> Vec<f32>,
    {
        if !face.bbox.meets_min_size(self.min_face_size) {
            return Decision::Unknown(UnknownReason::TooSmall);
        }
        if gallery.is_empty() {
            return Decision::Unknown(UnknownReason::EmptyGallery);
        }
        let distances = distance(gallery, &face.embedding);
        self.decide_distances(&distances, gallery)
    }

    /// Apply threshold and margin to precomputed distances.
    pub fn decide_distances(&self, distances: &[f32], gallery: &[GalleryEntry]) -> Decision {
        let Some((best_index, best)) = argmin(distances) else {
            return Decision::Unknown(UnknownReason::NoDistances);
        };
        let Some(entry) = gallery.get(best_index) else {
            return Decision::Unknown(UnknownReason::NoDistances);
        };

        if best > self.threshold {
            return Decision::Unknown(UnknownReason::AboveThreshold { distance: best });
        }
        if let Some(second_best) = second_smallest(distances) {
            if second_best - best < self.margin {
                return Decision::Unknown(UnknownReason::Ambiguous { best, second_best });
            }
        }

        Decision::Matched {
            identity_id: entry.identity_id.clone(),
            confidence: (1.0 - best).clamp(0.0, 1.0),
            gallery_index: best_index,
        }
    }
}

/// Smallest distance and its index. Ties go to the earliest entry.
fn argmin(distances: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &d) in distances.iter().enumerate() {
        if d.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if d >= b => {}
            _ => best = Some((i, d)),
        }
    }
    best
}

/// Second entry of the ascending sort of `distances`, if there are two.
fn second_smallest(distances: &[f32]) -> Option<f32> {
    if distances.len() < 2 {
        return None;
    }
    let mut sorted: Vec<f32> = distances.iter().copied().filter(|d| !d.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.get(1).copied()
}

/// Insert `candidate` unless the same identity already has an equal or
/// better result. Keeps first-seen order.
pub fn keep_best(matches: &mut Vec<MatchResult>, candidate: MatchResult) {
    match matches.iter_mut().find(|m| m.identity_id == candidate.identity_id) {
        Some(existing) if candidate.confidence > existing.confidence => *existing = candidate,
        Some(_) => {}
        None => matches.push(candidate),
    }
}

/// Build the result for a matched face, without a snapshot yet.
pub fn match_result(identity_id: String, confidence: f32, bbox: BoundingBox) -> MatchResult {
    MatchResult {
        identity_id,
        confidence,
        bbox,
        snapshot: None,
    }
}
