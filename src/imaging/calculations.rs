//! Pure calculation functions for transform planning.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! Planning order:
//! 1. Orientation and right-angle user rotation decide the *working*
//!    dimensions (90°/270° swap width and height).
//! 2. The crop rect, normalized to the working image, is clamped and
//!    converted to pixels.
//! 3. Resize bounds are applied to the crop (or the whole working image).

use super::orientation::OrientationTag;
use super::params::{CropRect, Dimensions, PixelRect, ResizeSpec, TransformPlan};

/// Everything the planner needs besides the source dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlanRequest {
    pub resize: ResizeSpec,
    pub crop: Option<CropRect>,
    pub rotation_degrees: f64,
    pub flip_h: bool,
    pub flip_v: bool,
}

/// Normalize an angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let d = degrees % 360.0;
    if d < 0.0 { d + 360.0 } else { d }
}

/// True when the angle is a quarter turn that lays the image on its side.
pub fn is_side_rotation(degrees: f64) -> bool {
    let d = normalize_degrees(degrees);
    (d - 90.0).abs() < f64::EPSILON || (d - 270.0).abs() < f64::EPSILON
}

/// Dimensions after orientation correction and any right-angle rotation.
pub fn working_dimensions(
    original: Dimensions,
    orientation: OrientationTag,
    rotation_degrees: f64,
) -> Dimensions {
    let mut dims = original;
    if orientation.swaps_dimensions() {
        dims = dims.swapped();
    }
    if is_side_rotation(rotation_degrees) {
        dims = dims.swapped();
    }
    dims
}

/// Clamp a normalized crop per axis and convert it to pixels of `working`.
///
/// The result is at least 1×1 and never extends past the working bounds.
pub fn crop_to_pixels(crop: CropRect, working: Dimensions) -> PixelRect {
    let clamp01 = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };

    let x0 = clamp01(crop.x);
    let y0 = clamp01(crop.y);
    let x1 = clamp01(crop.x + crop.width.max(0.0));
    let y1 = clamp01(crop.y + crop.height.max(0.0));

    let w = working.width.max(1);
    let h = working.height.max(1);

    let px = ((x0 * w as f64).floor() as u32).min(w - 1);
    let py = ((y0 * h as f64).floor() as u32).min(h - 1);
    let pw = ((x1 - x0) * w as f64).round() as u32;
    let ph = ((y1 - y0) * h as f64).round() as u32;

    PixelRect {
        x: px,
        y: py,
        width: pw.clamp(1, w - px),
        height: ph.clamp(1, h - py),
    }
}

/// Compute output dimensions for `source` under `resize`.
///
/// - Both bounds + aspect kept: scale by `min(width_ratio, height_ratio)`.
/// - Both bounds, aspect ignored: use them as given.
/// - One bound: derive the other from the source aspect ratio.
/// - No bounds: keep the source size.
///
/// Without `allow_upscale` the result never exceeds `source`. The result
/// is always at least 1×1.
pub fn calculate_target_dimensions(source: Dimensions, resize: &ResizeSpec) -> Dimensions {
    let src_w = source.width.max(1) as f64;
    let src_h = source.height.max(1) as f64;

    let (w, h) = match (resize.width, resize.height) {
        (Some(tw), Some(th)) if resize.maintain_aspect_ratio => {
            let scale = (tw as f64 / src_w).min(th as f64 / src_h);
            (src_w * scale, src_h * scale)
        }
        (Some(tw), Some(th)) => (tw as f64, th as f64),
        (Some(tw), None) => (tw as f64, tw as f64 * src_h / src_w),
        (None, Some(th)) => (th as f64 * src_w / src_h, th as f64),
        (None, None) => (src_w, src_h),
    };

    let (w, h) = if resize.allow_upscale {
        (w, h)
    } else if resize.maintain_aspect_ratio && (w > src_w || h > src_h) {
        // Shrink uniformly so the aspect ratio survives the clamp
        let scale = (src_w / w).min(src_h / h);
        (w * scale, h * scale)
    } else {
        (w.min(src_w), h.min(src_h))
    };

    Dimensions::new((w.round() as u32).max(1), (h.round() as u32).max(1))
}

/// Build a [`TransformPlan`] for an image of `original` size.
pub fn plan_transform(
    original: Dimensions,
    orientation: OrientationTag,
    request: &PlanRequest,
) -> TransformPlan {
    let rotation = normalize_degrees(request.rotation_degrees);
    let working = working_dimensions(original, orientation, rotation);

    let crop = request.crop.map(|c| crop_to_pixels(c, working));
    let base = crop
        .map(|c| Dimensions::new(c.width, c.height))
        .unwrap_or(working);

    let target = calculate_target_dimensions(base, &request.resize);

    TransformPlan {
        target_width: target.width,
        target_height: target.height,
        crop,
        rotation_degrees: rotation,
        flip_h: request.flip_h,
        flip_v: request.flip_v,
        maintain_aspect_ratio: request.resize.maintain_aspect_ratio,
        allow_upscale: request.resize.allow_upscale,
    }
}

/// Scale both dimensions so the longer edge is at most `max_edge`.
///
/// Never upscales; returns `source` unchanged when it already fits.
pub fn fit_within(source: Dimensions, max_edge: u32) -> Dimensions {
    let max_edge = max_edge.max(1);
    calculate_target_dimensions(source, &ResizeSpec::fit(max_edge, max_edge))
}
