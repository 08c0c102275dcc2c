//! Sequential frame decoding through an `ffmpeg` child process.
//!
//! `ffprobe` reports the stream dimensions, then `ffmpeg` writes raw rgb24
//! frames to a pipe which are read one frame-sized chunk at a time.

use facematch_core::video::{FrameSource, VideoError};
use image::RgbImage;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

pub struct FfmpegVideoSource {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Child,
    stdout: Option<ChildStdout>,
    frames_read: u64,
}

impl FfmpegVideoSource {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        if !path.exists() {
            return Err(VideoError::Open(format!("{} does not exist", path.display())));
        }
        let (width, height) = probe_dimensions(path)?;

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VideoError::Open(format!("failed to run ffmpeg: {e}")))?;
        let stdout = child.stdout.take();

        tracing::debug!(path = %path.display(), width, height, "video opened");
        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            child,
            stdout,
            frames_read: 0,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Reap the child once the pipe is drained. A failing decoder that
    /// produced no frames at all is reported as a decode error.
    fn finish(&mut self) -> Result<(), VideoError> {
        self.stdout = None;
        let status = self
            .child
            .wait()
            .map_err(|e| VideoError::Decode(format!("waiting for ffmpeg: {e}")))?;
        if !status.success() {
            if self.frames_read == 0 {
                return Err(VideoError::Decode(format!(
                    "ffmpeg exited with {status} for {}",
                    self.path.display()
                )));
            }
            tracing::warn!(%status, frames = self.frames_read, "ffmpeg exited early; using frames read so far");
        }
        Ok(())
    }
}

impl FrameSource for FfmpegVideoSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        match read_frame(stdout, self.width, self.height) {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                self.finish()?;
                Ok(None)
            }
            Err(e) => Err(VideoError::Decode(e.to_string())),
        }
    }
}

impl Drop for FfmpegVideoSource {
    fn drop(&mut self) {
        if self.stdout.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn probe_dimensions(path: &Path) -> Result<(u32, u32), VideoError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| VideoError::Open(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VideoError::Open(format!("ffprobe failed: {}", stderr.trim())));
    }
    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's `WIDTHxHEIGHT` line.
fn parse_dimensions(text: &str) -> Result<(u32, u32), VideoError> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let parsed = line
        .split_once('x')
        .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)));
    match parsed {
        Some((w, h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(VideoError::Open(format!("no video stream (ffprobe said {line:?})"))),
    }
}

/// Read one packed rgb24 frame. A clean EOF or a truncated trailing frame
/// both end the stream.
fn read_frame<R: Read>(reader: &mut R, width: u32, height: u32) -> io::Result<Option<RgbImage>> {
    let size = width as usize * height as usize * 3;
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if filled < size {
        if filled > 0 {
            tracing::debug!(bytes = filled, expected = size, "dropping truncated trailing frame");
        }
        return Ok(None);
    }
    Ok(RgbImage::from_raw(width, height, buf))
}
