//! Engine tuning knobs.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which SCRFD detection model the provider runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionModel {
    /// `scrfd_500m_bnkps.onnx`: fast, lower recall on small faces.
    #[default]
    Light,
    /// `det_10g.onnx`: slower, higher recall.
    Full,
}

impl DetectionModel {
    pub fn file_name(&self) -> &'static str {
        match self {
            DetectionModel::Light => "scrfd_500m_bnkps.onnx",
            DetectionModel::Full => "det_10g.onnx",
        }
    }
}

impl fmt::Display for DetectionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionModel::Light => f.write_str("light"),
            DetectionModel::Full => f.write_str("full"),
        }
    }
}

impl FromStr for DetectionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(DetectionModel::Light),
            "full" => Ok(DetectionModel::Full),
            other => Err(format!("unknown detection model: {other} (expected light or full)")),
        }
    }
}

/// Scale / upsample pair for one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PassConfig {
    /// Resize factor applied to the frame before detection.
    pub scale: f32,
    /// Provider upsample level (0 = single full-frame inference).
    pub upsample: u32,
}

impl PassConfig {
    pub const fn new(scale: f32, upsample: u32) -> Self {
        Self { scale, upsample }
    }
}

/// All recognition options. Defaults mirror the production service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detection_model: DetectionModel,
    pub primary: PassConfig,
    pub secondary: PassConfig,
    /// Run the secondary pass on every Nth live frame.
    pub secondary_every_n_frames: u64,
    pub far: PassConfig,
    /// Replace the secondary pass with a far pass when the primary finds nothing.
    pub far_scan_on_empty: bool,
    /// Embedding jitters for reference images.
    pub known_num_jitters: u32,
    /// Embedding jitters for live frames.
    pub frame_num_jitters: u32,
    /// Maximum accepted distance for a match (inclusive).
    pub match_threshold: f32,
    /// Minimum gap between best and second-best distance.
    pub match_margin: f32,
    /// Minimum face width and height in pixels.
    pub min_face_size: i32,
    pub cache_ttl_secs: u64,
    /// Longest frame side before detection; larger frames are downscaled.
    pub max_frame_side: u32,
    pub snapshot_max_side: u32,
    pub snapshot_jpeg_quality: u8,
    pub return_match_snapshots: bool,
    pub match_snapshot_interval_ms: u64,
    pub return_unknown_snapshots: bool,
    /// Process every Kth video frame.
    pub frame_interval: u64,
    /// Root for relative reference image paths.
    pub image_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_model: DetectionModel::Light,
            primary: PassConfig::new(1.45, 1),
            secondary: PassConfig::new(1.6, 1),
            secondary_every_n_frames: 4,
            far: PassConfig::new(1.9, 2),
            far_scan_on_empty: true,
            known_num_jitters: 1,
            frame_num_jitters: 1,
            match_threshold: 0.50,
            match_margin: 0.04,
            min_face_size: 20,
            cache_ttl_secs: 600,
            max_frame_side: 1600,
            snapshot_max_side: 96,
            snapshot_jpeg_quality: 55,
            return_match_snapshots: true,
            match_snapshot_interval_ms: 1100,
            return_unknown_snapshots: false,
            frame_interval: 1,
            image_root: PathBuf::from("."),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Self>(src).map(Self::sanitized)
    }

    /// Enforce lower bounds on strides and jitter counts.
    pub fn sanitized(mut self) -> Self {
        self.secondary_every_n_frames = self.secondary_every_n_frames.max(1);
        self.frame_interval = self.frame_interval.max(1);
        self.known_num_jitters = self.known_num_jitters.max(1);
        self.frame_num_jitters = self.frame_num_jitters.max(1);
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn match_snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.match_snapshot_interval_ms)
    }

    /// JPEG quality actually used for snapshots.
    pub fn snapshot_quality(&self) -> u8 {
        self.snapshot_jpeg_quality.clamp(20, 95)
    }
}
