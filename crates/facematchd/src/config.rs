use anyhow::Context;
use facematch_core::{DetectionModel, EngineConfig};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_BIND: &str = "127.0.0.1:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Daemon configuration.
pub struct Config {
    /// Listen address for the HTTP API.
    pub bind: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite identity database.
    pub db_path: PathBuf,
    /// Largest accepted multipart body.
    pub max_upload_bytes: usize,
    pub engine: EngineConfig,
}

impl Config {
    /// Load from `FACEMATCH_*` environment variables. Engine options not set
    /// in the environment come from the TOML file named by
    /// `FACEMATCH_CONFIG`, then from built-in defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match lookup("FACEMATCH_CONFIG") {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                EngineConfig::from_toml(&text).with_context(|| format!("parsing config file {path}"))?
            }
            None => EngineConfig::default(),
        };

        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facematch");

        Ok(Self {
            bind: lookup("FACEMATCH_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            model_dir: lookup("FACEMATCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models")),
            db_path: lookup("FACEMATCH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("identities.db")),
            max_upload_bytes: env_parse(&lookup, "FACEMATCH_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            engine: engine_from_lookup(&lookup, base),
        })
    }
}

fn engine_from_lookup<F>(lookup: &F, base: EngineConfig) -> EngineConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut c = base;
    c.detection_model = env_parse::<DetectionModel, _>(lookup, "FACEMATCH_DETECTION_MODEL", c.detection_model);
    c.primary.scale = env_parse(lookup, "FACEMATCH_PRIMARY_DETECTION_SCALE", c.primary.scale);
    c.primary.upsample = env_parse(lookup, "FACEMATCH_PRIMARY_UPSAMPLE", c.primary.upsample);
    c.secondary.scale = env_parse(lookup, "FACEMATCH_SECONDARY_DETECTION_SCALE", c.secondary.scale);
    c.secondary.upsample = env_parse(lookup, "FACEMATCH_SECONDARY_UPSAMPLE", c.secondary.upsample);
    c.secondary_every_n_frames =
        env_parse(lookup, "FACEMATCH_SECONDARY_EVERY_N_FRAMES", c.secondary_every_n_frames);
    c.far.scale = env_parse(lookup, "FACEMATCH_FAR_DETECTION_SCALE", c.far.scale);
    c.far.upsample = env_parse(lookup, "FACEMATCH_FAR_UPSAMPLE", c.far.upsample);
    c.far_scan_on_empty = env_bool(lookup, "FACEMATCH_FAR_SCAN_ON_EMPTY", c.far_scan_on_empty);
    c.known_num_jitters = env_parse(lookup, "FACEMATCH_KNOWN_NUM_JITTERS", c.known_num_jitters);
    c.frame_num_jitters = env_parse(lookup, "FACEMATCH_FRAME_NUM_JITTERS", c.frame_num_jitters);
    c.match_threshold = env_parse(lookup, "FACEMATCH_MATCH_THRESHOLD", c.match_threshold);
    c.match_margin = env_parse(lookup, "FACEMATCH_MATCH_MARGIN", c.match_margin);
    c.min_face_size = env_parse(lookup, "FACEMATCH_MIN_FACE_SIZE", c.min_face_size);
    c.cache_ttl_secs = env_parse(lookup, "FACEMATCH_CACHE_TTL_SECONDS", c.cache_ttl_secs);
    c.max_frame_side = env_parse(lookup, "FACEMATCH_MAX_FRAME_SIDE", c.max_frame_side);
    c.snapshot_max_side = env_parse(lookup, "FACEMATCH_SNAPSHOT_MAX_SIDE", c.snapshot_max_side);
    c.snapshot_jpeg_quality = env_parse(lookup, "FACEMATCH_SNAPSHOT_JPEG_QUALITY", c.snapshot_jpeg_quality);
    c.return_match_snapshots = env_bool(lookup, "FACEMATCH_RETURN_MATCH_SNAPSHOTS", c.return_match_snapshots);
    c.match_snapshot_interval_ms =
        env_parse(lookup, "FACEMATCH_MATCH_SNAPSHOT_INTERVAL_MS", c.match_snapshot_interval_ms);
    c.return_unknown_snapshots =
        env_bool(lookup, "FACEMATCH_RETURN_UNKNOWN_SNAPSHOTS", c.return_unknown_snapshots);
    c.frame_interval = env_parse(lookup, "FACEMATCH_FRAME_INTERVAL", c.frame_interval);
    if let Some(root) = lookup("FACEMATCH_IMAGE_ROOT") {
        c.image_root = PathBuf::from(root);
    }
    c.sanitized()
}

/// Unset or unparsable values fall back to `default`.
fn env_parse<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

fn env_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim() != "0").unwrap_or(default)
}
