//! Multi-pass face detection.
//!
//! A primary pass runs on every frame. A secondary pass at a different
//! scale runs on every Nth live frame, or, when the primary pass finds
//! nothing and far scanning is enabled, a far pass tuned for small faces
//! runs instead. Secondary detections that duplicate an existing one are
//! dropped.

use crate::config::{DetectionModel, EngineConfig, PassConfig};
use crate::geometry::{iou, rescale};
use crate::provider::{FaceEmbeddingProvider, ImageCodec, ProviderError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};

/// Secondary detections overlapping a kept one above this IoU are duplicates.
pub const DUPLICATE_IOU_THRESHOLD: f32 = 0.45;

/// Process-wide count of analysed live frames.
#[derive(Debug, Default)]
pub struct LiveFrameCounter(AtomicU64);

impl LiveFrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new count (first frame is 1).
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Which pass produced a set of detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Primary,
    Secondary,
    Far,
}

/// Result of one detection pass. A failed pass counts as finding nothing.
#[derive(Debug)]
pub enum PassOutcome {
    Detected(Vec<DetectedFace>),
    Failed(ProviderError),
}

impl PassOutcome {
    pub fn into_faces(self, kind: PassKind) -> Vec<DetectedFace> {
        match self {
            PassOutcome::Detected(faces) => faces,
            PassOutcome::Failed(err) => {
                tracing::warn!(pass = ?kind, error = %err, "detection pass failed; treating as empty");
                Vec::new()
            }
        }
    }
}

/// Settings for all passes of one frame.
#[derive(Debug, Clone)]
pub struct MultiPassSettings {
    pub model: DetectionModel,
    pub primary: PassConfig,
    pub secondary: PassConfig,
    pub far: PassConfig,
    pub secondary_every_n_frames: u64,
    pub far_scan_on_empty: bool,
    pub jitters: u32,
}

impl From<&EngineConfig> for MultiPassSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            model: config.detection_model,
            primary: config.primary,
            secondary: config.secondary,
            far: config.far,
            secondary_every_n_frames: config.secondary_every_n_frames.max(1),
            far_scan_on_empty: config.far_scan_on_empty,
            jitters: config.frame_num_jitters.max(1),
        }
    }
}

/// Run one pass: resize a copy of `frame` by `pass.scale`, detect and embed
/// on the copy, then map boxes back onto `frame`.
pub fn run_pass<P, C>(
    provider: &mut P,
    codec: &C,
    frame: &RgbImage,
    pass: PassConfig,
    model: DetectionModel,
    jitters: u32,
) -> PassOutcome
where
    P: FaceEmbeddingProvider + ?Sized,
    C: ImageCodec + ?Sized,
{
    let resized;
    let detect_image = if pass.scale != 1.0 {
        resized = codec.resize(frame, pass.scale);
        &resized
    } else {
        frame
    };

    let locations = match provider.detect(detect_image, pass.upsample, model) {
        Ok(l) => l,
        Err(e) => return PassOutcome::Failed(e),
    };
    if locations.is_empty() {
        return PassOutcome::Detected(Vec::new());
    }

    let embeddings = match provider.embed(detect_image, &locations, jitters.max(1)) {
        Ok(e) => e,
        Err(e) => return PassOutcome::Failed(e),
    };

    let faces = locations
        .iter()
        .zip(embeddings)
        .map(|(location, embedding)| DetectedFace {
            bbox: rescale(&location.bbox, pass.scale, frame.height(), frame.width()),
            embedding,
        })
        .collect();
    PassOutcome::Detected(faces)
}

/// Append secondary detections to the primary ones, skipping any that
/// overlap an already kept detection above [`DUPLICATE_IOU_THRESHOLD`].
pub fn merge(primary: Vec<DetectedFace>, secondary: Vec<DetectedFace>) -> Vec<DetectedFace> {
    let mut merged = primary;
    for candidate in secondary {
        let duplicate = merged
            .iter()
            .any(|kept| iou(&candidate.bbox, &kept.bbox) > DUPLICATE_IOU_THRESHOLD);
        if !duplicate {
            merged.push(candidate);
        }
    }
    merged
}

/// Pick the extra pass (if any) to run for a frame.
pub fn plan_extra_pass(
    settings: &MultiPassSettings,
    frame_number: u64,
    primary_found: usize,
) -> Option<(PassKind, PassConfig)> {
    if settings.far_scan_on_empty && primary_found == 0 {
        return Some((PassKind::Far, settings.far));
    }
    if frame_number % settings.secondary_every_n_frames.max(1) == 0 {
        return Some((PassKind::Secondary, settings.secondary));
    }
    None
}

pub struct MultiPassDetector<'a> {
    settings: &'a MultiPassSettings,
    counter: &'a LiveFrameCounter,
}

impl<'a> MultiPassDetector<'a> {
    pub fn new(settings: &'a MultiPassSettings, counter: &'a LiveFrameCounter) -> Self {
        Self { settings, counter }
    }

    /// Detect faces in `frame`. Bumps the live frame counter once.
    pub fn detect<P, C>(&self, provider: &mut P, codec: &C, frame: &RgbImage) -> Vec<DetectedFace>
    where
        P: FaceEmbeddingProvider + ?Sized,
        C: ImageCodec + ?Sized,
    {
        let s = self.settings;
        let frame_number = self.counter.next();

        let primary = run_pass(provider, codec, frame, s.primary, s.model, s.jitters)
            .into_faces(PassKind::Primary);

        let Some((kind, pass)) = plan_extra_pass(s, frame_number, primary.len()) else {
            return primary;
        };

        let extra = run_pass(provider, codec, frame, pass, s.model, s.jitters).into_faces(kind);
        tracing::trace!(
            frame = frame_number,
            pass = ?kind,
            primary = primary.len(),
            extra = extra.len(),
            "multi-pass detection"
        );
        merge(primary, extra)
    }
}
