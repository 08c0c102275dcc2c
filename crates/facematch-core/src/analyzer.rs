//! Single-frame analysis: detect, decide, attach snapshots.

use crate::config::EngineConfig;
use crate::geometry::{clip_to_frame, fit_scale};
use crate::matcher::{keep_best, match_result, Decision, MatchPolicy};
use crate::multipass::{LiveFrameCounter, MultiPassDetector, MultiPassSettings};
use crate::provider::{FaceEmbeddingProvider, ImageCodec};
use crate::throttle::SnapshotThrottle;
use crate::types::{BoundingBox, FrameAnalysis, GalleryEntry, Snapshot, UnknownFace};
use image::RgbImage;
use std::borrow::Cow;

pub struct FrameAnalyzer<'a> {
    config: &'a EngineConfig,
    passes: MultiPassSettings,
    policy: MatchPolicy,
    counter: &'a LiveFrameCounter,
    throttle: &'a SnapshotThrottle,
}

impl<'a> FrameAnalyzer<'a> {
    pub fn new(
        config: &'a EngineConfig,
        counter: &'a LiveFrameCounter,
        throttle: &'a SnapshotThrottle,
    ) -> Self {
        Self {
            config,
            passes: MultiPassSettings::from(config),
            policy: MatchPolicy::from(config),
            counter,
            throttle,
        }
    }

    /// Analyse one decoded frame against `gallery`.
    ///
    /// Returned boxes are in the coordinates of the frame after the
    /// processing-size cap has been applied.
    pub fn analyze<P, C>(
        &self,
        provider: &mut P,
        codec: &C,
        frame: &RgbImage,
        gallery: &[GalleryEntry],
    ) -> FrameAnalysis
    where
        P: FaceEmbeddingProvider + ?Sized,
        C: ImageCodec + ?Sized,
    {
        let frame = cap_frame(codec, frame, self.config.max_frame_side);
        let faces = MultiPassDetector::new(&self.passes, self.counter).detect(provider, codec, &frame);

        let mut analysis = FrameAnalysis::default();
        for face in &faces {
            let decision = self
                .policy
                .decide(face, gallery, |g, probe| provider.distance(g, probe));
            match decision {
                Decision::Matched { identity_id, confidence, .. } => {
                    keep_best(&mut analysis.matches, match_result(identity_id, confidence, face.bbox));
                }
                Decision::Unknown(reason) => {
                    tracing::trace!(?reason, bbox = ?face.bbox, "unknown face");
                    let snapshot = if self.config.return_unknown_snapshots {
                        self.snapshot(codec, &frame, &face.bbox)
                    } else {
                        None
                    };
                    analysis.unknown_faces.push(UnknownFace { bbox: face.bbox, snapshot });
                }
            }
        }

        // Throttle only the per-identity winners so a weaker duplicate
        // cannot consume the identity's snapshot slot.
        for m in &mut analysis.matches {
            if self.throttle.should_emit(&m.identity_id) {
                m.snapshot = self.snapshot(codec, &frame, &m.bbox);
            }
        }

        tracing::debug!(
            faces = faces.len(),
            matches = analysis.matches.len(),
            unknown = analysis.unknown_faces.len(),
            "frame analysed"
        );
        analysis
    }

    fn snapshot<C: ImageCodec + ?Sized>(
        &self,
        codec: &C,
        frame: &RgbImage,
        bbox: &BoundingBox,
    ) -> Option<Snapshot> {
        encode_snapshot(
            codec,
            frame,
            bbox,
            self.config.snapshot_max_side,
            self.config.snapshot_quality(),
        )
    }
}

/// Downscale `frame` so its longest side is at most `max_side`.
pub fn cap_frame<'f, C: ImageCodec + ?Sized>(
    codec: &C,
    frame: &'f RgbImage,
    max_side: u32,
) -> Cow<'f, RgbImage> {
    match fit_scale(frame.width(), frame.height(), max_side) {
        Some(scale) => Cow::Owned(codec.resize(frame, scale)),
        None => Cow::Borrowed(frame),
    }
}

/// Crop `bbox` out of `frame`, shrink it to `max_side`, and JPEG-encode it.
/// Degenerate crops and encoder failures yield `None`.
pub fn encode_snapshot<C: ImageCodec + ?Sized>(
    codec: &C,
    frame: &RgbImage,
    bbox: &BoundingBox,
    max_side: u32,
    quality: u8,
) -> Option<Snapshot> {
    let clipped = clip_to_frame(bbox, frame.width(), frame.height())?;
    let crop = image::imageops::crop_imm(
        frame,
        clipped.left as u32,
        clipped.top as u32,
        clipped.width() as u32,
        clipped.height() as u32,
    )
    .to_image();

    let crop = match fit_scale(crop.width(), crop.height(), max_side) {
        Some(scale) => codec.resize(&crop, scale),
        None => crop,
    };

    match codec.encode(&crop, quality) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "snapshot encode failed");
            None
        }
    }
}
