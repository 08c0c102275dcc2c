//! SCRFD + ArcFace provider over ONNX Runtime.

use crate::config::DetectionModel;
use crate::detector::FaceDetector;
use crate::provider::{FaceEmbeddingProvider, ProviderError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceLocation, GalleryEntry};
use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Detectors are loaded on first use per model; the recognizer up front.
pub struct OnnxProvider {
    model_dir: PathBuf,
    detectors: HashMap<DetectionModel, FaceDetector>,
    recognizer: FaceRecognizer,
}

impl OnnxProvider {
    pub fn load(model_dir: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let model_dir = model_dir.into();
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { model_dir, detectors: HashMap::new(), recognizer })
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Load the detector for `model` now instead of on the first frame.
    pub fn preload(&mut self, model: DetectionModel) -> Result<(), ProviderError> {
        self.detector(model).map(|_| ())
    }

    fn detector(&mut self, model: DetectionModel) -> Result<&mut FaceDetector, ProviderError> {
        if !self.detectors.contains_key(&model) {
            let path = self.model_dir.join(model.file_name());
            tracing::info!(%model, path = %path.display(), "loading detector");
            let detector = FaceDetector::load(&path)?;
            self.detectors.insert(model, detector);
        }
        self.detectors
            .get_mut(&model)
            .ok_or_else(|| ProviderError::Other(format!("detector {model} unavailable")))
    }
}

impl FaceEmbeddingProvider for OnnxProvider {
    fn detect(
        &mut self,
        image: &RgbImage,
        upsample: u32,
        model: DetectionModel,
    ) -> Result<Vec<FaceLocation>, ProviderError> {
        Ok(self.detector(model)?.detect(image, upsample)?)
    }

    fn embed(
        &mut self,
        image: &RgbImage,
        faces: &[FaceLocation],
        jitters: u32,
    ) -> Result<Vec<Embedding>, ProviderError> {
        let mut out = Vec::with_capacity(faces.len());
        for face in faces {
            match self.recognizer.extract(image, face, jitters) {
                Ok(e) => out.push(e),
                Err(RecognizerError::EmptyCrop) => {
                    tracing::debug!(bbox = ?face.bbox, "face outside frame; no embedding");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    /// ArcFace embeddings compare by angle, so distance is `1 - cosine`.
    fn distance(&self, gallery: &[GalleryEntry], probe: &Embedding) -> Vec<f32> {
        cosine_distances(gallery, probe)
    }
}

pub fn cosine_distances(gallery: &[GalleryEntry], probe: &Embedding) -> Vec<f32> {
    gallery
        .iter()
        .map(|entry| 1.0 - entry.embedding.similarity(probe))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;

    #[test]
    fn test_cosine_distances() {
        let gallery = vec![
            GalleryEntry { identity_id: "same".into(), embedding: Embedding::new(vec![2.0, 0.0]) },
            GalleryEntry { identity_id: "orth".into(), embedding: Embedding::new(vec![0.0, 1.0]) },
            GalleryEntry { identity_id: "opp".into(), embedding: Embedding::new(vec![-1.0, 0.0]) },
        ];
        let d = cosine_distances(&gallery, &Embedding::new(vec![1.0, 0.0]));
        assert!(d[0].abs() < 1e-6);
        assert!((d[1] - 1.0).abs() < 1e-6);
        assert!((d[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_reports_missing_recognizer() {
        let dir = tempfile::tempdir().unwrap();
        match OnnxProvider::load(dir.path()) {
            Err(ProviderError::Recognizer(RecognizerError::ModelNotFound(path))) => {
                assert!(path.ends_with(RECOGNIZER_MODEL_FILE));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loaded without model files"),
        }
    }

    #[test]
    fn test_missing_detector_model_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = FaceDetector::load(&dir.path().join(DetectionModel::Full.file_name()));
        assert!(matches!(err, Err(DetectorError::ModelNotFound(_))));
    }
}
