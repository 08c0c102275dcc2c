//! In-memory fakes for the collaborator traits.

use crate::config::DetectionModel;
use crate::provider::{
    CodecError, FaceEmbeddingProvider, IdentityStore, ImageCodec, ProviderError, StoreError,
};
use crate::types::{BoundingBox, Embedding, FaceLocation, IdentityRecord};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn face(bbox: BoundingBox, values: Vec<f32>) -> (FaceLocation, Embedding) {
    (FaceLocation::from_bbox(bbox), Embedding::new(values))
}

pub fn frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, image::Rgb([90, 120, 150]))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectCall {
    pub width: u32,
    pub height: u32,
    pub upsample: u32,
    pub model: DetectionModel,
}

/// Provider that replays queued detections. Each `detect` call pops one
/// script entry (an empty result once the queue runs dry); the following
/// `embed` call returns the embeddings queued with those faces.
#[derive(Default)]
pub struct ScriptedProvider {
    script: VecDeque<Result<Vec<(FaceLocation, Embedding)>, String>>,
    pending: Vec<(FaceLocation, Embedding)>,
    pub detect_calls: Vec<DetectCall>,
    pub embed_jitters: Vec<u32>,
}

impl ScriptedProvider {
    pub fn push_detection(&mut self, faces: Vec<(FaceLocation, Embedding)>) {
        self.script.push_back(Ok(faces));
    }

    pub fn push_failure(&mut self, message: &str) {
        self.script.push_back(Err(message.to_string()));
    }
}

impl FaceEmbeddingProvider for ScriptedProvider {
    fn detect(
        &mut self,
        image: &RgbImage,
        upsample: u32,
        model: DetectionModel,
    ) -> Result<Vec<FaceLocation>, ProviderError> {
        self.detect_calls.push(DetectCall {
            width: image.width(),
            height: image.height(),
            upsample,
            model,
        });
        match self.script.pop_front() {
            Some(Ok(faces)) => {
                let locations = faces.iter().map(|(l, _)| l.clone()).collect();
                self.pending = faces;
                Ok(locations)
            }
            Some(Err(message)) => Err(ProviderError::Other(message)),
            None => {
                self.pending.clear();
                Ok(Vec::new())
            }
        }
    }

    fn embed(
        &mut self,
        _image: &RgbImage,
        faces: &[FaceLocation],
        jitters: u32,
    ) -> Result<Vec<Embedding>, ProviderError> {
        self.embed_jitters.push(jitters);
        Ok(faces
            .iter()
            .filter_map(|f| {
                self.pending
                    .iter()
                    .find(|(l, _)| l.bbox == f.bbox)
                    .map(|(_, e)| e.clone())
            })
            .collect())
    }
}

pub struct MemoryStore {
    records: Mutex<Vec<IdentityRecord>>,
    fail: bool,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(records: Vec<IdentityRecord>) -> Self {
        Self { records: Mutex::new(records), fail: false, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { records: Mutex::new(Vec::new()), fail: true, calls: AtomicUsize::new(0) }
    }

    pub fn set_records(&self, records: Vec<IdentityRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn list_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityStore for MemoryStore {
    fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

/// Codec whose "JPEG" output is the crop dimensions as text, so tests can
/// check what was encoded.
pub struct FakeCodec;

impl FakeCodec {
    pub const CORRUPT: &'static [u8] = b"corrupt";
    pub const REFERENCE_SIZE: u32 = 200;
}

impl ImageCodec for FakeCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        if bytes == Self::CORRUPT {
            return Err(CodecError::Decode("bad header".into()));
        }
        Ok(frame(Self::REFERENCE_SIZE, Self::REFERENCE_SIZE))
    }

    fn encode(&self, image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        Ok(format!("{}x{}@{}", image.width(), image.height(), quality).into_bytes())
    }

    fn resize(&self, image: &RgbImage, scale: f32) -> RgbImage {
        let w = ((image.width() as f32 * scale).round() as u32).max(1);
        let h = ((image.height() as f32 * scale).round() as u32).max(1);
        image::imageops::resize(image, w, h, image::imageops::FilterType::Nearest)
    }
}
