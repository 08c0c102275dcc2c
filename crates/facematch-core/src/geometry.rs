//! Box overlap and coordinate mapping between detection and frame space.

use crate::types::BoundingBox;

/// Intersection-over-Union of two boxes. Returns 0.0 when the union is empty.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_top = a.top.max(b.top);
    let inter_left = a.left.max(b.left);
    let inter_bottom = a.bottom.min(b.bottom);
    let inter_right = a.right.min(b.right);

    let inter_w = i64::from((inter_right - inter_left).max(0));
    let inter_h = i64::from((inter_bottom - inter_top).max(0));
    let inter = inter_w * inter_h;

    let union = a.area() + b.area() - inter;
    if union <= 0 {
        return 0.0;
    }
    inter as f32 / union as f32
}

/// Map a box found in an image resized by `scale` back onto the
/// `max_height` x `max_width` frame it was resized from.
///
/// Top/left are clamped to `[0, dim - 1]`, bottom/right to `[0, dim]`.
/// A non-positive scale yields the all-zero box.
pub fn rescale(bbox: &BoundingBox, scale: f32, max_height: u32, max_width: u32) -> BoundingBox {
    if scale <= 0.0 || !scale.is_finite() {
        return BoundingBox::default();
    }

    let back = |v: i32| (f64::from(v) / f64::from(scale)).round() as i64;
    let max_h = i64::from(max_height);
    let max_w = i64::from(max_width);

    let clamp = |v: i64, hi: i64| v.min(hi).max(0) as i32;

    BoundingBox {
        top: clamp(back(bbox.top), max_h - 1),
        right: clamp(back(bbox.right), max_w),
        bottom: clamp(back(bbox.bottom), max_h),
        left: clamp(back(bbox.left), max_w - 1),
    }
}

/// Scale factor that brings the longest side of a `width` x `height` frame
/// down to `max_side`, or `None` when the frame already fits.
pub fn fit_scale(width: u32, height: u32, max_side: u32) -> Option<f32> {
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return None;
    }
    Some(max_side as f32 / longest as f32)
}

/// Clip a box to a `width` x `height` frame. Returns `None` if nothing
/// of the box remains inside the frame.
pub fn clip_to_frame(bbox: &BoundingBox, width: u32, height: u32) -> Option<BoundingBox> {
    let w = i32::try_from(width).unwrap_or(i32::MAX);
    let h = i32::try_from(height).unwrap_or(i32::MAX);
    let clipped = BoundingBox {
        top: bbox.top.clamp(0, h),
        right: bbox.right.clamp(0, w),
        bottom: bbox.bottom.clamp(0, h),
        left: bbox.left.clamp(0, w),
    };
    (clipped.width() > 0 && clipped.height() > 0).then_some(clipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(bbox: &BoundingBox, scale: f32) -> BoundingBox {
        let f = |v: i32| (v as f32 * scale).round() as i32;
        BoundingBox::new(f(bbox.top), f(bbox.right), f(bbox.bottom), f(bbox.left))
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0, 100, 100, 0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_symmetric() {
        let a = BoundingBox::new(0, 10, 10, 0);
        let b = BoundingBox::new(3, 14, 12, 5);
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0, 10, 10, 0);
        let b = BoundingBox::new(20, 30, 30, 20);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_touching_edges() {
        let a = BoundingBox::new(0, 10, 10, 0);
        let b = BoundingBox::new(0, 20, 10, 10);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_partial() {
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let a = BoundingBox::new(0, 10, 10, 0);
        let b = BoundingBox::new(0, 15, 10, 5);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_degenerate() {
        let a = BoundingBox::default();
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn test_rescale_divides_and_rounds() {
        let b = BoundingBox::new(145, 290, 290, 145);
        let r = rescale(&b, 1.45, 1000, 1000);
        assert_eq!(r, BoundingBox::new(100, 200, 200, 100));
    }

    #[test]
    fn test_rescale_clamps_to_frame() {
        let b = BoundingBox::new(-10, 500, 500, -3);
        let r = rescale(&b, 2.0, 100, 120);
        assert_eq!(r.top, 0);
        assert_eq!(r.left, 0);
        assert_eq!(r.bottom, 100);
        assert_eq!(r.right, 120);

        // top/left never reach the far edge
        let edge = BoundingBox::new(400, 400, 400, 400);
        let r = rescale(&edge, 1.0, 100, 120);
        assert_eq!(r.top, 99);
        assert_eq!(r.left, 119);
    }

    #[test]
    fn test_rescale_non_positive_scale() {
        let b = BoundingBox::new(1, 2, 3, 4);
        assert_eq!(rescale(&b, 0.0, 100, 100), BoundingBox::default());
        assert_eq!(rescale(&b, -1.5, 100, 100), BoundingBox::default());
    }

    #[test]
    fn test_rescale_left_inverse_of_forward_scale() {
        let (h, w) = (720u32, 1280u32);
        for &scale in &[0.5f32, 1.0, 1.45, 1.6, 1.9, 2.0] {
            for &(top, right, bottom, left) in &[
                (10, 200, 180, 40),
                (0, 1280, 720, 0),
                (333, 901, 601, 777),
            ] {
                let orig = BoundingBox::new(top, right, bottom, left);
                let scaled = forward(&orig, scale);
                let back = rescale(&scaled, scale, h, w);
                let again = forward(&back, scale);
                assert!((again.top - scaled.top).abs() <= 1, "{scale} {orig:?}");
                assert!((again.right - scaled.right).abs() <= 1, "{scale} {orig:?}");
                assert!((again.bottom - scaled.bottom).abs() <= 1, "{scale} {orig:?}");
                assert!((again.left - scaled.left).abs() <= 1, "{scale} {orig:?}");
                assert!((back.top - orig.top).abs() <= 1, "{scale} {orig:?} -> {back:?}");
                assert!((back.right - orig.right).abs() <= 1, "{scale} {orig:?} -> {back:?}");
                assert!((back.bottom - orig.bottom).abs() <= 1, "{scale} {orig:?} -> {back:?}");
                assert!((back.left - orig.left).abs() <= 1, "{scale} {orig:?} -> {back:?}");
                assert!(back.top >= 0 && back.top <= h as i32 - 1);
                assert!(back.left >= 0 && back.left <= w as i32 - 1);
                assert!(back.bottom <= h as i32 && back.right <= w as i32);
            }
        }
    }

    #[test]
    fn test_fit_scale() {
        assert_eq!(fit_scale(800, 600, 1600), None);
        assert_eq!(fit_scale(1600, 900, 1600), None);
        let s = fit_scale(3200, 1800, 1600).unwrap();
        assert!((s - 0.5).abs() < 1e-6);
        let s = fit_scale(1000, 4000, 1600).unwrap();
        assert!((s - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_clip_to_frame() {
        let b = BoundingBox::new(-5, 50, 30, 10);
        assert_eq!(clip_to_frame(&b, 40, 20), Some(BoundingBox::new(0, 40, 20, 10)));
        let outside = BoundingBox::new(30, 80, 60, 50);
        assert_eq!(clip_to_frame(&outside, 40, 20), None);
    }
}
