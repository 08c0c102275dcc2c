//! Recognition engine: shared process state plus the provider and codec
//! that a single worker drives.

use crate::analyzer::FrameAnalyzer;
use crate::cache::{CacheError, CacheSettings, GallerySnapshot, KnownFaceCache};
use crate::config::EngineConfig;
use crate::multipass::LiveFrameCounter;
use crate::provider::{CodecError, FaceEmbeddingProvider, ImageCodec, IdentityStore};
use crate::throttle::SnapshotThrottle;
use crate::types::{FrameAnalysis, MatchResult};
use crate::video::{FrameSource, VideoAggregator, VideoError};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("empty frame image")]
    EmptyFrame,
    #[error("invalid frame image: {0}")]
    InvalidFrame(#[from] CodecError),
    #[error("invalid video: {0}")]
    InvalidVideo(#[from] VideoError),
    #[error("known faces: {0}")]
    Cache(#[from] CacheError),
}

impl EngineError {
    /// True for errors caused by the caller's input rather than the service.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyFrame | EngineError::InvalidFrame(_) | EngineError::InvalidVideo(_)
        )
    }
}

/// State shared by every engine in the process.
pub struct SharedState {
    pub cache: KnownFaceCache,
    pub frame_counter: LiveFrameCounter,
    pub throttle: SnapshotThrottle,
}

impl SharedState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: KnownFaceCache::new(CacheSettings::from(config)),
            frame_counter: LiveFrameCounter::new(),
            throttle: SnapshotThrottle::new(
                config.return_match_snapshots,
                config.match_snapshot_interval(),
            ),
        }
    }
}

pub struct FaceMatchEngine<P, C> {
    provider: P,
    codec: C,
    config: Arc<EngineConfig>,
    state: Arc<SharedState>,
}

impl<P, C> FaceMatchEngine<P, C>
where
    P: FaceEmbeddingProvider,
    C: ImageCodec,
{
    /// Engine with its own fresh shared state.
    pub fn new(provider: P, codec: C, config: EngineConfig) -> Self {
        let config = config.sanitized();
        let state = Arc::new(SharedState::new(&config));
        Self::with_state(provider, codec, Arc::new(config), state)
    }

    /// Engine that shares cache, counter and throttle with others.
    pub fn with_state(
        provider: P,
        codec: C,
        config: Arc<EngineConfig>,
        state: Arc<SharedState>,
    ) -> Self {
        Self { provider, codec, config, state }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Current gallery, refreshed if expired.
    pub fn gallery<S: IdentityStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<Arc<GallerySnapshot>, EngineError> {
        Ok(self.state.cache.get(false, store, &mut self.provider, &self.codec)?)
    }

    /// Rebuild the gallery now.
    pub fn reload<S: IdentityStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<Arc<GallerySnapshot>, EngineError> {
        Ok(self.state.cache.get(true, store, &mut self.provider, &self.codec)?)
    }

    /// Analyse a frame against an explicit gallery snapshot.
    pub fn analyze_frame(
        &mut self,
        frame: &RgbImage,
        gallery: &GallerySnapshot,
    ) -> Result<FrameAnalysis, EngineError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(EngineError::EmptyFrame);
        }
        let analyzer = FrameAnalyzer::new(
            &self.config,
            &self.state.frame_counter,
            &self.state.throttle,
        );
        Ok(analyzer.analyze(&mut self.provider, &self.codec, frame, &gallery.entries))
    }

    /// Decode and analyse one still image.
    pub fn recognize_image<S: IdentityStore + ?Sized>(
        &mut self,
        store: &S,
        bytes: &[u8],
    ) -> Result<FrameAnalysis, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::EmptyFrame);
        }
        let frame = self.codec.decode(bytes)?;
        self.recognize_frame(store, &frame)
    }

    pub fn recognize_frame<S: IdentityStore + ?Sized>(
        &mut self,
        store: &S,
        frame: &RgbImage,
    ) -> Result<FrameAnalysis, EngineError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(EngineError::EmptyFrame);
        }
        let gallery = self.gallery(store)?;
        self.analyze_frame(frame, &gallery)
    }

    /// Best match per identity over a whole clip.
    pub fn recognize_video<S, F>(
        &mut self,
        store: &S,
        source: &mut F,
    ) -> Result<Vec<MatchResult>, EngineError>
    where
        S: IdentityStore + ?Sized,
        F: FrameSource + ?Sized,
    {
        let gallery = self.gallery(store)?;
        if gallery.is_empty() {
            tracing::info!("gallery empty; skipping video analysis");
            return Ok(Vec::new());
        }

        let analyzer = FrameAnalyzer::new(
            &self.config,
            &self.state.frame_counter,
            &self.state.throttle,
        );
        let provider = &mut self.provider;
        let codec = &self.codec;
        let matches = VideoAggregator::new(self.config.frame_interval).aggregate(source, |frame| {
            if frame.width() == 0 || frame.height() == 0 {
                return FrameAnalysis::default();
            }
            analyzer.analyze(provider, codec, frame, &gallery.entries)
        })?;
        Ok(matches)
    }
}
