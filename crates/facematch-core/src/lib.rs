//! facematch-core: known-face gallery, multi-pass detection and match
//! decisions.
//!
//! The orchestration layer (cache, multipass, matcher, throttle, analyzer,
//! video, engine) is written against the collaborator traits in
//! [`provider`]. [`onnx::OnnxProvider`] implements them with SCRFD for
//! detection and ArcFace for embeddings.

pub mod alignment;
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod detector;
pub mod engine;
pub mod geometry;
pub mod matcher;
pub mod multipass;
pub mod onnx;
pub mod provider;
pub mod recognizer;
pub mod throttle;
pub mod types;
pub mod video;

#[cfg(test)]
mod test_support;

pub use cache::{GallerySnapshot, KnownFaceCache, RefreshReport, SkipReason};
pub use config::{DetectionModel, EngineConfig, PassConfig};
pub use engine::{EngineError, FaceMatchEngine, SharedState};
pub use onnx::OnnxProvider;
pub use provider::{
    CodecError, FaceEmbeddingProvider, IdentityStore, ImageCodec, ProviderError, StoreError,
};
pub use types::{
    BoundingBox, DetectedFace, Embedding, FaceLocation, FrameAnalysis, IdentityRecord,
    MatchResult, Snapshot, UnknownFace,
};
pub use video::{FrameSource, VecFrameSource, VideoError};
