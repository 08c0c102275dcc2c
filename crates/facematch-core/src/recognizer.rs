//! ArcFace face recognizer via ONNX Runtime.
//!
//! Produces 512-d L2-normalised embeddings from 112×112 aligned crops.

use crate::alignment::{self, SimilarityTransform, ALIGNED_SIDE};
use crate::geometry::clip_to_frame;
use crate::types::{Embedding, FaceLocation};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// Pixel offsets applied to the aligned crop for jitter samples after the
/// original and its mirror.
const JITTER_SHIFTS: [(f32, f32); 4] = [(2.0, 0.0), (-2.0, 0.0), (0.0, 2.0), (0.0, -2.0)];

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed one face. With `jitters` > 1 the embeddings of several
    /// perturbed crops are averaged and renormalised.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &FaceLocation,
        jitters: u32,
    ) -> Result<Embedding, RecognizerError> {
        let aligned = aligned_crop(image, face).ok_or(RecognizerError::EmptyCrop)?;

        let mut sum = vec![0.0f32; ARCFACE_EMBEDDING_DIM];
        let variants = jitter_variants(&aligned, jitters);
        for crop in &variants {
            let values = self.infer(crop)?;
            for (acc, v) in sum.iter_mut().zip(values) {
                *acc += v;
            }
        }

        let mut embedding = Embedding {
            values: sum,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        };
        embedding.normalize();
        Ok(embedding)
    }

    fn infer(&mut self, crop: &RgbImage) -> Result<Vec<f32>, RecognizerError> {
        let input = preprocess(crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let mut e = Embedding::new(raw.to_vec());
        e.normalize();
        Ok(e.values)
    }
}

/// Landmark-aligned crop, or a plain resized box crop when the detector
/// gave no landmarks.
fn aligned_crop(image: &RgbImage, face: &FaceLocation) -> Option<RgbImage> {
    if let Some(landmarks) = &face.landmarks {
        return Some(alignment::align_face(image, landmarks));
    }
    let b = clip_to_frame(&face.bbox, image.width(), image.height())?;
    let crop = imageops::crop_imm(image, b.left as u32, b.top as u32, b.width() as u32, b.height() as u32)
        .to_image();
    Some(imageops::resize(&crop, ALIGNED_SIDE, ALIGNED_SIDE, FilterType::Triangle))
}

/// The crop itself, its mirror, then small shifts; `jitters` samples total.
fn jitter_variants(aligned: &RgbImage, jitters: u32) -> Vec<RgbImage> {
    let count = jitters.max(1) as usize;
    let mut out = Vec::with_capacity(count);
    out.push(aligned.clone());
    if count > 1 {
        out.push(imageops::flip_horizontal(aligned));
    }
    for i in 2..count {
        let (dx, dy) = JITTER_SHIFTS[(i - 2) % JITTER_SHIFTS.len()];
        let t = SimilarityTransform::IDENTITY.shifted(dx, dy);
        out.push(alignment::warp(aligned, &t, ALIGNED_SIDE));
    }
    out
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
    for (x, y, pixel) in crop.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= ARCFACE_INPUT_SIZE || y >= ARCFACE_INPUT_SIZE {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    #[test]
    fn test_preprocess_normalisation_per_channel() {
        let crop = RgbImage::from_pixel(112, 112, image::Rgb([255, 0, 128]));
        let t = preprocess(&crop);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((t[[0, 2, 5, 5]] - 0.5 / 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_crop_fallback_without_landmarks() {
        let img = RgbImage::from_pixel(300, 200, image::Rgb([10, 20, 30]));
        let face = FaceLocation::from_bbox(BoundingBox::new(20, 90, 80, 30));
        let crop = aligned_crop(&img, &face).unwrap();
        assert_eq!(crop.dimensions(), (112, 112));
        assert_eq!(crop.get_pixel(56, 56).0, [10, 20, 30]);

        let outside = FaceLocation::from_bbox(BoundingBox::new(250, 400, 300, 350));
        assert!(aligned_crop(&img, &outside).is_none());
    }

    #[test]
    fn test_jitter_variants_count_and_mirror() {
        let mut img = RgbImage::new(112, 112);
        img.put_pixel(0, 50, image::Rgb([255, 255, 255]));

        assert_eq!(jitter_variants(&img, 0).len(), 1);
        assert_eq!(jitter_variants(&img, 1).len(), 1);

        let v = jitter_variants(&img, 7);
        assert_eq!(v.len(), 7);
        assert_eq!(v[0], img);
        assert_eq!(v[1].get_pixel(111, 50).0, [255, 255, 255]);
        // first shift moves content two pixels right
        assert_eq!(v[2].get_pixel(2, 50).0, [255, 255, 255]);
        assert!(v.iter().all(|c| c.dimensions() == (112, 112)));
    }
}
