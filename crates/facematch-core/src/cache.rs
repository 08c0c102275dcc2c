//! Known-identity gallery cache with TTL refresh.
//!
//! Readers take an `Arc` of the current snapshot; a refresh builds a whole
//! new snapshot off to the side and swaps it in under a write lock, so no
//! reader ever sees a partially built gallery.

use crate::config::{DetectionModel, EngineConfig};
use crate::provider::{FaceEmbeddingProvider, ImageCodec, IdentityStore, StoreError};
use crate::types::{GalleryEntry, IdentityRecord};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("identity store: {0}")]
    Store(#[from] StoreError),
}

/// Why a record contributed nothing to the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingImagePath,
    ImageNotFound(PathBuf),
    Unreadable(String),
    DetectionFailed(String),
    NoFaces,
    NoEmbeddings,
    /// Faces were found but all were below the minimum size.
    FacesTooSmall,
}

/// Per-record refresh outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Loaded { faces: usize },
    Skipped(SkipReason),
}

/// Summary of the last refresh, kept alongside the gallery for diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub outcomes: Vec<(String, RecordOutcome)>,
}

impl RefreshReport {
    pub fn loaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::Loaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&str, &SkipReason)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            RecordOutcome::Skipped(reason) => Some((id.as_str(), reason)),
            RecordOutcome::Loaded { .. } => None,
        })
    }

    pub fn skip_reason(&self, identity_id: &str) -> Option<&SkipReason> {
        self.skipped().find(|(id, _)| *id == identity_id).map(|(_, r)| r)
    }
}

/// Immutable gallery snapshot.
#[derive(Debug, Default)]
pub struct GallerySnapshot {
    /// `None` until the first refresh.
    pub loaded_at: Option<Instant>,
    pub entries: Vec<GalleryEntry>,
    pub report: RefreshReport,
}

impl GallerySnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Settings used when rebuilding the gallery.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub image_root: PathBuf,
    pub model: DetectionModel,
    pub upsample: u32,
    pub jitters: u32,
    pub min_face_size: i32,
}

impl From<&EngineConfig> for CacheSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            ttl: config.cache_ttl(),
            image_root: config.image_root.clone(),
            model: config.detection_model,
            upsample: config.primary.upsample,
            jitters: config.known_num_jitters.max(1),
            min_face_size: config.min_face_size,
        }
    }
}

pub struct KnownFaceCache {
    settings: CacheSettings,
    snapshot: RwLock<Arc<GallerySnapshot>>,
    /// Serializes refreshes so concurrent expired readers rebuild once.
    refresh_lock: Mutex<()>,
}

impl KnownFaceCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            snapshot: RwLock::new(Arc::new(GallerySnapshot::default())),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current snapshot, without any freshness check.
    pub fn current(&self) -> Arc<GallerySnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.current().loaded_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.settings.ttl,
        }
    }

    /// Return the gallery, rebuilding it first when forced or expired.
    pub fn get<S, P, C>(
        &self,
        force_reload: bool,
        store: &S,
        provider: &mut P,
        codec: &C,
    ) -> Result<Arc<GallerySnapshot>, CacheError>
    where
        S: IdentityStore + ?Sized,
        P: FaceEmbeddingProvider + ?Sized,
        C: ImageCodec + ?Sized,
    {
        self.get_at(force_reload, Instant::now(), store, provider, codec)
    }

    pub fn get_at<S, P, C>(
        &self,
        force_reload: bool,
        now: Instant,
        store: &S,
        provider: &mut P,
        codec: &C,
    ) -> Result<Arc<GallerySnapshot>, CacheError>
    where
        S: IdentityStore + ?Sized,
        P: FaceEmbeddingProvider + ?Sized,
        C: ImageCodec + ?Sized,
    {
        if !force_reload && !self.is_stale(now) {
            return Ok(self.current());
        }

        let _guard = match self.refresh_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Another caller may have refreshed while we waited.
        if !force_reload && !self.is_stale(now) {
            return Ok(self.current());
        }

        let records = store.list_identities()?;
        let mut entries = Vec::new();
        let mut report = RefreshReport::default();

        for record in &records {
            let outcome = self.load_record(record, provider, codec, &mut entries);
            if let RecordOutcome::Skipped(reason) = &outcome {
                tracing::debug!(identity = %record.id, ?reason, "skipping identity");
            }
            report.outcomes.push((record.id.clone(), outcome));
        }

        tracing::info!(
            identities = records.len(),
            loaded = report.loaded(),
            skipped = records.len() - report.loaded(),
            embeddings = entries.len(),
            forced = force_reload,
            "known faces refreshed"
        );

        let fresh = Arc::new(GallerySnapshot {
            loaded_at: Some(now),
            entries,
            report,
        });
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Arc::clone(&fresh),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&fresh),
        }
        Ok(fresh)
    }

    fn load_record<P, C>(
        &self,
        record: &IdentityRecord,
        provider: &mut P,
        codec: &C,
        entries: &mut Vec<GalleryEntry>,
    ) -> RecordOutcome
    where
        P: FaceEmbeddingProvider + ?Sized,
        C: ImageCodec + ?Sized,
    {
        let s = &self.settings;
        if record.image_path.trim().is_empty() {
            return RecordOutcome::Skipped(SkipReason::MissingImagePath);
        }
        let path = resolve_image_path(&s.image_root, &record.image_path);
        if !path.exists() {
            return RecordOutcome::Skipped(SkipReason::ImageNotFound(path));
        }

        let image = match codec.open(&path) {
            Ok(img) => img,
            Err(e) => return RecordOutcome::Skipped(SkipReason::Unreadable(e.to_string())),
        };

        let locations = match provider.detect(&image, s.upsample, s.model) {
            Ok(l) if l.is_empty() => return RecordOutcome::Skipped(SkipReason::NoFaces),
            Ok(l) => l,
            Err(e) => return RecordOutcome::Skipped(SkipReason::DetectionFailed(e.to_string())),
        };

        let embeddings = match provider.embed(&image, &locations, s.jitters) {
            Ok(e) if e.is_empty() => return RecordOutcome::Skipped(SkipReason::NoEmbeddings),
            Ok(e) => e,
            Err(e) => return RecordOutcome::Skipped(SkipReason::DetectionFailed(e.to_string())),
        };

        let mut faces = 0;
        for (location, embedding) in locations.iter().zip(embeddings) {
            if !location.bbox.meets_min_size(s.min_face_size) {
                continue;
            }
            entries.push(GalleryEntry {
                identity_id: record.id.clone(),
                embedding,
            });
            faces += 1;
        }

        if faces == 0 {
            RecordOutcome::Skipped(SkipReason::FacesTooSmall)
        } else {
            RecordOutcome::Loaded { faces }
        }
    }
}

/// Absolute paths are used as-is; relative ones hang off `root`.
pub fn resolve_image_path(root: &Path, image_path: &str) -> PathBuf {
    let p = Path::new(image_path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}
