//! Clip-level aggregation: best match per identity across sampled frames.

use crate::types::{FrameAnalysis, MatchResult};
use image::RgbImage;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("video could not be opened: {0}")]
    Open(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Sequential source of decoded frames.
pub trait FrameSource {
    /// Next frame, or `None` at end of input.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError>;
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        (**self).next_frame()
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        (**self).next_frame()
    }
}

/// Frames already in memory, e.g. a single uploaded still.
pub struct VecFrameSource {
    frames: std::vec::IntoIter<RgbImage>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self { frames: frames.into_iter() }
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        Ok(self.frames.next())
    }
}

/// Running best-of per identity.
#[derive(Debug, Default)]
pub struct BestMatches {
    by_identity: HashMap<String, MatchResult>,
}

impl BestMatches {
    /// Replace the held result only on strictly higher confidence.
    pub fn offer(&mut self, candidate: MatchResult) {
        match self.by_identity.get(&candidate.identity_id) {
            Some(existing) if candidate.confidence <= existing.confidence => {}
            _ => {
                self.by_identity.insert(candidate.identity_id.clone(), candidate);
            }
        }
    }

    pub fn absorb(&mut self, analysis: FrameAnalysis) {
        for m in analysis.matches {
            self.offer(m);
        }
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    pub fn into_matches(self) -> Vec<MatchResult> {
        self.by_identity.into_values().collect()
    }
}

/// Samples every `stride`-th frame and folds per-frame matches.
pub struct VideoAggregator {
    stride: u64,
}

impl VideoAggregator {
    pub fn new(stride: u64) -> Self {
        Self { stride: stride.max(1) }
    }

    /// Run `analyze` on each sampled frame and return the best match per
    /// identity, unordered. Unknown faces are not aggregated.
    pub fn aggregate<S, F>(&self, source: &mut S, mut analyze: F) -> Result<Vec<MatchResult>, VideoError>
    where
        S: FrameSource + ?Sized,
        F: FnMut(&RgbImage) -> FrameAnalysis,
    {
        let mut best = BestMatches::default();
        let mut index: u64 = 0;
        let mut sampled: u64 = 0;

        while let Some(frame) = source.next_frame()? {
            if index % self.stride == 0 {
                best.absorb(analyze(&frame));
                sampled += 1;
            }
            index += 1;
        }

        tracing::info!(
            frames = index,
            sampled,
            identities = best.len(),
            "video aggregated"
        );
        Ok(best.into_matches())
    }
}
