//! Uploaded clips spooled to disk for the frame decoder.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to spool upload: {0}")]
    Spool(#[from] io::Error),
}

/// A `video-*.mp4` temp file removed on [`cleanup`](Self::cleanup) or drop.
pub struct UploadTempFile {
    file: NamedTempFile,
}

impl UploadTempFile {
    /// Write `bytes` to a fresh temp file in the system temp dir.
    pub fn write(bytes: &[u8]) -> Result<Self, MediaError> {
        Self::write_in(&std::env::temp_dir(), bytes)
    }

    pub fn write_in(dir: &Path, bytes: &[u8]) -> Result<Self, MediaError> {
        let mut file = tempfile::Builder::new()
            .prefix("video-")
            .suffix(".mp4")
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        tracing::debug!(path = %file.path().display(), bytes = bytes.len(), "upload spooled");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now, logging rather than failing if that goes wrong.
    pub fn cleanup(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temp video");
        }
    }
}
