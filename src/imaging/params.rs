//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. The planner in
//! [`calculations`](super::calculations) produces a [`TransformPlan`]; the
//! [`raster`](super::raster) engine executes it against decoded pixels.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`Dimensions`]: Width/height pair.
//! - [`CropRect`]: Crop region in normalized `[0, 1]` coordinates.
//! - [`PixelRect`]: Crop region resolved to pixels.
//! - [`ResizeSpec`]: Requested output bounds.
//! - [`TransformPlan`]: Fully resolved geometry for one render.

use serde::{Deserialize, Serialize};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Build from the `0.0..=1.0` scale used by upload forms.
    pub fn from_fraction(value: f32) -> Self {
        let value = if value.is_finite() { value } else { 0.0 };
        Self::new((value.clamp(0.0, 1.0) * 100.0).round() as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    pub fn pixels(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect_ratio(self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }
}

/// Crop region with coordinates normalized to the upright image.
///
/// Values outside `[0, 1]` are clamped per axis when the plan is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Crop region resolved to pixels within the working image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Requested output bounds.
///
/// Either dimension may be omitted; the missing one follows the working
/// aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub maintain_aspect_ratio: bool,
    pub allow_upscale: bool,
}

impl Default for ResizeSpec {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            maintain_aspect_ratio: true,
            allow_upscale: false,
        }
    }
}

impl ResizeSpec {
    pub fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Self::default()
        }
    }

    pub fn fit(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }
}

/// Resolved geometry for a single render.
///
/// `target_width`/`target_height` are always at least 1. `crop` is in pixels
/// of the working image (after orientation and right-angle rotation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformPlan {
    pub target_width: u32,
    pub target_height: u32,
    pub crop: Option<PixelRect>,
    pub rotation_degrees: f64,
    pub flip_h: bool,
    pub flip_v: bool,
    pub maintain_aspect_ratio: bool,
    pub allow_upscale: bool,
}

impl TransformPlan {
    pub fn target(&self) -> Dimensions {
        Dimensions::new(self.target_width, self.target_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn quality_from_fraction() {
        assert_eq!(Quality::from_fraction(0.8).value(), 80);
        assert_eq!(Quality::from_fraction(0.0).value(), 1);
        assert_eq!(Quality::from_fraction(2.0).value(), 100);
        assert_eq!(Quality::from_fraction(f32::NAN).value(), 1);
    }

    #[test]
    fn dimensions_helpers() {
        let d = Dimensions::new(4000, 3000);
        assert_eq!(d.swapped(), Dimensions::new(3000, 4000));
        assert_eq!(d.pixels(), 12_000_000);
        assert!((d.aspect_ratio() - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(Dimensions::new(10, 0).aspect_ratio(), 0.0);
    }
}
