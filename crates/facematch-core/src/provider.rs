//! Collaborator seams: face embedding provider, identity store, image codec.

use crate::config::DetectionModel;
use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{Embedding, FaceLocation, GalleryEntry, IdentityRecord};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
    #[error("identity store query failed: {0}")]
    Query(String),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty image data")]
    Empty,
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Face detection and embedding.
///
/// Implementations hold inference sessions that need exclusive access,
/// hence `&mut self`.
pub trait FaceEmbeddingProvider {
    /// Locate faces. Boxes are in `image` coordinates.
    fn detect(
        &mut self,
        image: &RgbImage,
        upsample: u32,
        model: DetectionModel,
    ) -> Result<Vec<FaceLocation>, ProviderError>;

    /// One embedding per face, in the order given.
    fn embed(
        &mut self,
        image: &RgbImage,
        faces: &[FaceLocation],
        jitters: u32,
    ) -> Result<Vec<Embedding>, ProviderError>;

    /// Distance from `probe` to each gallery entry, in gallery order.
    /// Lower = more similar.
    fn distance(&self, gallery: &[GalleryEntry], probe: &Embedding) -> Vec<f32> {
        gallery
            .iter()
            .map(|entry| entry.embedding.euclidean_distance(probe))
            .collect()
    }
}

/// Read access to the identity gallery's backing store.
pub trait IdentityStore {
    fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError>;
}

/// Image decode / encode / resize.
pub trait ImageCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, CodecError>;

    /// Compress to JPEG at `quality` (1-100).
    fn encode(&self, image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError>;

    /// Resize both sides by `scale`.
    fn resize(&self, image: &RgbImage, scale: f32) -> RgbImage;

    fn open(&self, path: &Path) -> Result<RgbImage, CodecError> {
        let bytes = std::fs::read(path).map_err(|source| CodecError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.decode(&bytes)
    }
}

impl<T: IdentityStore + ?Sized> IdentityStore for &T {
    fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        (**self).list_identities()
    }
}

impl<T: ImageCodec + ?Sized> ImageCodec for &T {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, CodecError> {
        (**self).decode(bytes)
    }

    fn encode(&self, image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        (**self).encode(image, quality)
    }

    fn resize(&self, image: &RgbImage, scale: f32) -> RgbImage {
        (**self).resize(image, scale)
    }

    fn open(&self, path: &Path) -> Result<RgbImage, CodecError> {
        (**self).open(path)
    }
}
