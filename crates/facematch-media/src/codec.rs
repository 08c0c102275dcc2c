//! Still-image codec backed by the `image` crate.

use facematch_core::provider::{CodecError, ImageCodec};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Decodes any format `image` recognises; encodes JPEG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRsCodec;

impl ImageCodec for ImageRsCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        let img = image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(img.to_rgb8())
    }

    fn encode(&self, image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode_image(image)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(out)
    }

    fn resize(&self, image: &RgbImage, scale: f32) -> RgbImage {
        let w = ((image.width() as f32 * scale).round() as u32).max(1);
        let h = ((image.height() as f32 * scale).round() as u32).max(1);
        imageops::resize(image, w, h, FilterType::Triangle)
    }
}
