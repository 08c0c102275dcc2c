//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-based decoding over three strides, letterboxed 640×640 input and
//! NMS post-processing. Upsampling is emulated by also scanning an
//! overlapping tile grid, which gives small faces more input pixels.

use crate::types::{BoundingBox, FaceLocation, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Fraction of a tile shared with its neighbour.
const TILE_OVERLAP: f32 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Raw detection in floating-point frame coordinates.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: Option<Landmarks>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let iw = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let ih = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    fn offset(mut self, dx: f32, dy: f32) -> Self {
        self.x1 += dx;
        self.x2 += dx;
        self.y1 += dy;
        self.y2 += dy;
        if let Some(lms) = self.landmarks.as_mut() {
            for p in lms.iter_mut() {
                p.0 += dx;
                p.1 += dy;
            }
        }
        self
    }

    /// Round to integer pixels, clipped to a `width`×`height` frame.
    fn into_location(self, width: u32, height: u32) -> Option<FaceLocation> {
        let clamp_x = |v: f32| (v.round() as i32).clamp(0, width as i32);
        let clamp_y = |v: f32| (v.round() as i32).clamp(0, height as i32);
        let bbox = BoundingBox::new(clamp_y(self.y1), clamp_x(self.x2), clamp_y(self.y2), clamp_x(self.x1));
        if bbox.width() <= 0 || bbox.height() <= 0 {
            return None;
        }
        Some(FaceLocation { bbox, landmarks: self.landmarks, score: self.score })
    }
}

/// Sub-rectangle of the input frame scanned as one detector input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Per-stride output tensor indices: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self { session, stride_indices })
    }

    /// Detect faces in an RGB frame, highest score first.
    ///
    /// `upsample` > 0 adds an (upsample+1)² grid of overlapping tiles on top
    /// of the full-frame scan; duplicates across tiles are removed by NMS.
    pub fn detect(&mut self, image: &RgbImage, upsample: u32) -> Result<Vec<FaceLocation>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for region in tile_regions(image.width(), image.height(), upsample) {
            let found = self.detect_region(image, region)?;
            candidates.extend(found);
        }

        let kept = nms(candidates, SCRFD_NMS_THRESHOLD);
        Ok(kept
            .into_iter()
            .filter_map(|c| c.into_location(image.width(), image.height()))
            .collect())
    }

    fn detect_region(&mut self, image: &RgbImage, region: Region) -> Result<Vec<Candidate>, DetectorError> {
        let view: Cow<'_, RgbImage> = if region.x == 0
            && region.y == 0
            && region.width == image.width()
            && region.height == image.height()
        {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
        };

        let (input, letterbox) = preprocess(&view);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut found = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            found.extend(
                decode_stride(scores, bboxes, kps, stride, &letterbox, SCRFD_CONFIDENCE_THRESHOLD)
                    .into_iter()
                    .map(|c| c.offset(region.x as f32, region.y as f32)),
            );
        }
        Ok(found)
    }
}

/// Full frame first, then an (upsample+1)² grid of overlapping tiles.
fn tile_regions(width: u32, height: u32, upsample: u32) -> Vec<Region> {
    let mut regions = vec![Region { x: 0, y: 0, width, height }];
    if upsample == 0 {
        return regions;
    }

    let n = upsample + 1;
    let span = |dim: u32| -> (u32, Vec<u32>) {
        let coverage = n as f32 - (n - 1) as f32 * TILE_OVERLAP;
        let tile = ((dim as f32 / coverage).ceil() as u32).clamp(1, dim);
        let free = dim - tile;
        let starts = (0..n)
            .map(|i| ((free as f32 * i as f32) / (n - 1) as f32).round() as u32)
            .collect();
        (tile, starts)
    };

    let (tile_w, xs) = span(width);
    let (tile_h, ys) = span(height);
    for &y in &ys {
        for &x in &xs {
            regions.push(Region { x, y, width: tile_w, height: tile_h });
        }
    }
    regions
}

/// Letterbox into a 640×640 NCHW tensor. Padding normalises to zero.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / width).min(size / height);

    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) / 2;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = Letterbox { scale, pad_x: pad_x as f32, pad_y: pad_y as f32 };
    (tensor, letterbox)
}

/// Map SCRFD outputs to stride slots by name ("score_8", "bbox_16", ...),
/// falling back to positional [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0, 0); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => named[slot] = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD output names not recognised; using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

/// Decode one stride level into frame-space candidates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let unmap = |x: f32, y: f32| ((x - letterbox.pad_x) / letterbox.scale, (y - letterbox.pad_y) / letterbox.scale);

    let mut out = Vec::new();
    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * s;
        let ay = (cell / grid) as f32 * s;

        let (x1, y1) = unmap(ax - d[0] * s, ay - d[1] * s);
        let (x2, y2) = unmap(ax + d[2] * s, ay + d[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, p) in lms.iter_mut().enumerate() {
                *p = unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s);
            }
            lms
        });

        out.push(Candidate { x1, y1, x2, y2, score, landmarks });
    }
    out
}

/// Greedy NMS, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| k.iou(&c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate { x1, y1, x2, y2, score, landmarks: None }
    }

    #[test]
    fn test_candidate_iou() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 15.0, 10.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&cand(20.0, 20.0, 30.0, 30.0, 1.0)), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let kept = nms(
            vec![
                cand(5.0, 5.0, 105.0, 105.0, 0.8),
                cand(0.0, 0.0, 100.0, 100.0, 0.9),
                cand(200.0, 200.0, 250.0, 250.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.7).abs() < 1e-6);
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_offset_moves_box_and_landmarks() {
        let mut c = cand(1.0, 2.0, 3.0, 4.0, 0.9);
        c.landmarks = Some([(1.0, 1.0); 5]);
        let c = c.offset(10.0, 20.0);
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (11.0, 22.0, 13.0, 24.0));
        assert_eq!(c.landmarks.unwrap()[4], (11.0, 21.0));
    }

    #[test]
    fn test_into_location_rounds_and_clips() {
        let loc = cand(-3.4, 10.6, 120.2, 55.5, 0.8).into_location(100, 50).unwrap();
        assert_eq!(loc.bbox, BoundingBox::new(11, 100, 50, 0));
        assert!((loc.score - 0.8).abs() < 1e-6);
        assert!(cand(150.0, 0.0, 180.0, 20.0, 0.9).into_location(100, 50).is_none());
    }

    #[test]
    fn test_tile_regions_without_upsample() {
        assert_eq!(tile_regions(640, 480, 0), vec![Region { x: 0, y: 0, width: 640, height: 480 }]);
    }

    #[test]
    fn test_tile_regions_cover_frame_with_overlap() {
        let regions = tile_regions(1000, 600, 1);
        assert_eq!(regions.len(), 5);
        let tiles = &regions[1..];
        // tile = ceil(1000 / 1.8) = 556; neighbours share ≥ 20%
        assert!(tiles.iter().all(|r| r.width == 556 && r.height == 334));
        assert_eq!(tiles[0].x, 0);
        assert_eq!(tiles[1].x + tiles[1].width, 1000);
        assert_eq!(tiles[3].y + tiles[3].height, 600);
        let shared = tiles[0].x + tiles[0].width - tiles[1].x;
        assert!(shared as f32 >= 0.2 * 556.0);
    }

    #[test]
    fn test_tile_regions_grid_grows_with_upsample() {
        assert_eq!(tile_regions(900, 900, 2).len(), 1 + 9);
        // tiny frames still produce valid tiles
        assert!(tile_regions(1, 1, 2).iter().all(|r| r.width == 1 && r.height == 1));
    }

    #[test]
    fn test_preprocess_letterbox() {
        let img = RgbImage::from_pixel(320, 160, image::Rgb([255, 0, 128]));
        let (tensor, lb) = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 160.0));
        // padding normalises to zero, content keeps per-channel values
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert!((tensor[[0, 0, 320, 320]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-4);
        assert!((tensor[[0, 1, 320, 320]] - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_maps_through_letterbox() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let n = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; n];
        let mut bboxes = vec![0.0f32; n * 4];
        let kps = vec![0.0f32; n * 10];

        // anchor at cell (x=2, y=1) → (64, 32) in input space
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let lb = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&scores, &bboxes, &kps, stride, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (16.0, 0.0, 48.0, 32.0));
        assert_eq!(d.landmarks.unwrap()[0], (32.0, 16.0));
    }

    #[test]
    fn test_discover_output_indices() {
        let to_names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let shuffled = to_names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]);
        assert_eq!(discover_output_indices(&shuffled), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numeric: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
