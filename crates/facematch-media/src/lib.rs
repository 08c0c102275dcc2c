//! facematch-media: image and video adapters for the recognition engine.
//!
//! [`ImageRsCodec`] decodes and encodes stills with the `image` crate,
//! [`FfmpegVideoSource`] streams decoded RGB frames out of an `ffmpeg`
//! child process, and [`UploadTempFile`] holds uploaded clips on disk
//! while they are read.

pub mod codec;
pub mod upload;
pub mod video;

pub use codec::ImageRsCodec;
pub use upload::{MediaError, UploadTempFile};
pub use video::FfmpegVideoSource;
