use serde::{Deserialize, Serialize};

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Encoded (JPEG) face crop attached to a result.
pub type Snapshot = Vec<u8>;

/// Axis-aligned face box in integer pixel coordinates, stored as
/// (top, right, bottom, left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Area in pixels; boxes with inverted edges count as zero.
    pub fn area(&self) -> i64 {
        i64::from(self.width().max(0)) * i64::from(self.height().max(0))
    }

    /// True when both sides are at least `min_size` pixels.
    pub fn meets_min_size(&self, min_size: i32) -> bool {
        self.height() >= min_size && self.width() >= min_size
    }
}

/// Face embedding vector (128-d for dlib-style models, 512-d for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Scale to unit length in place. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.values {
                *v /= norm;
            }
        }
    }
}

/// A face location reported by the embedding provider, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLocation {
    pub bbox: BoundingBox,
    pub landmarks: Option<Landmarks>,
    pub score: f32,
}

impl FaceLocation {
    pub fn from_bbox(bbox: BoundingBox) -> Self {
        Self { bbox, landmarks: None, score: 1.0 }
    }
}

/// Identity record as held by the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub image_path: String,
}

/// One known embedding. An identity may own several entries, one per face
/// found in its reference image.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub embedding: Embedding,
}

/// A face found in the frame under analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A face matched to a known identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity_id: String,
    /// `1 - distance`, clamped to [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub snapshot: Option<Snapshot>,
}

/// A face that did not match any identity.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownFace {
    pub bbox: BoundingBox,
    pub snapshot: Option<Snapshot>,
}

/// Outcome of analysing one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnalysis {
    /// At most one entry per identity, in first-seen order.
    pub matches: Vec<MatchResult>,
    pub unknown_faces: Vec<UnknownFace>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut e = Embedding::new(vec![3.0, 4.0]);
        e.normalize();
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);

        let mut zero = Embedding::new(vec![0.0, 0.0]);
        zero.normalize();
        assert_eq!(zero.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_bbox_dimensions() {
        let b = BoundingBox::new(10, 60, 40, 20);
        assert_eq!(b.width(), 40);
        assert_eq!(b.height(), 30);
        assert_eq!(b.area(), 1200);
        assert!(b.meets_min_size(30));
        assert!(!b.meets_min_size(31));
    }

    #[test]
    fn test_bbox_inverted_area_is_zero() {
        let b = BoundingBox::new(40, 10, 10, 40);
        assert_eq!(b.area(), 0);
    }
}
