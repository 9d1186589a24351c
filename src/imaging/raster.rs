//! Raster engine: executes a [`TransformPlan`] against decoded pixels.
//!
//! Stage order is fixed:
//!
//! 1. EXIF orientation correction (one of eight fixed transforms)
//! 2. User rotation: quarter turns are exact, other angles rotate about the
//!    centre on an unchanged canvas with transparent corners
//! 3. Horizontal / vertical flips
//! 4. Crop, in pixels of the upright working image
//! 5. Draw onto a [`Surface`] sized to the target dimensions
//! 6. Encode through the [`RasterBackend`]
//!
//! The surface is an owned buffer released on drop, so it is freed on every
//! path out of [`render`], including early returns on encode failure.

use super::backend::RasterBackend;
use super::calculations::normalize_degrees;
use super::format::OutputFormat;
use super::orientation::OrientationTag;
use super::params::{Quality, TransformPlan};
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use rayon::prelude::*;
use thiserror::Error;

/// Largest surface handed out by default: 100 megapixels.
pub const DEFAULT_MAX_SURFACE_PIXELS: u64 = 100_000_000;

/// Highest supported device pixel ratio.
pub const MAX_PIXEL_RATIO: f32 = 4.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RasterError {
    #[error("Drawing surface of {width}x{height} is unavailable")]
    SurfaceUnavailable { width: u32, height: u32 },
    #[error("Source decode failed: {0}")]
    Decode(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Knobs for the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    /// Device pixel ratio. Values above 1 supersample the draw before the
    /// result is brought back to the logical target size.
    pub pixel_ratio: f32,
    pub max_surface_pixels: u64,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            pixel_ratio: 1.0,
            max_surface_pixels: DEFAULT_MAX_SURFACE_PIXELS,
        }
    }
}

impl RasterOptions {
    fn effective_ratio(&self) -> f32 {
        if self.pixel_ratio.is_finite() {
            self.pixel_ratio.clamp(1.0, MAX_PIXEL_RATIO)
        } else {
            1.0
        }
    }
}

/// A temporary RGBA drawing surface.
///
/// The backing store is `logical × pixel_ratio`; [`Surface::snapshot`]
/// returns pixels at the logical size.
pub struct Surface {
    width: u32,
    height: u32,
    pixels: RgbaImage,
}

impl Surface {
    /// Allocate a logical `width × height` surface.
    ///
    /// Fails when either side is zero or the backing store would exceed
    /// `options.max_surface_pixels`.
    pub fn allocate(width: u32, height: u32, options: &RasterOptions) -> Result<Self, RasterError> {
        let unavailable = RasterError::SurfaceUnavailable { width, height };
        if width == 0 || height == 0 {
            return Err(unavailable);
        }

        let ratio = options.effective_ratio() as f64;
        let backing_w = (width as f64 * ratio).round() as u64;
        let backing_h = (height as f64 * ratio).round() as u64;
        if backing_w * backing_h > options.max_surface_pixels || backing_w > u32::MAX as u64 {
            tracing::warn!(width, height, ratio, "drawing surface too large");
            return Err(unavailable);
        }

        tracing::trace!(width, height, backing_w, backing_h, "allocated drawing surface");
        Ok(Self {
            width,
            height,
            pixels: RgbaImage::new(backing_w as u32, backing_h as u32),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Draw `source` scaled to fill the whole surface.
    pub fn draw(&mut self, source: &DynamicImage) {
        let (bw, bh) = self.pixels.dimensions();
        self.pixels = if source.width() == bw && source.height() == bh {
            source.to_rgba8()
        } else {
            source.resize_exact(bw, bh, FilterType::Lanczos3).to_rgba8()
        };
    }

    /// Read back one pixel in logical coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let (bw, bh) = self.pixels.dimensions();
        let bx = (x as u64 * bw as u64 / self.width as u64) as u32;
        let by = (y as u64 * bh as u64 / self.height as u64) as u32;
        self.pixels.get_pixel_checked(bx, by).map(|p| p.0)
    }

    /// Copy of the surface at its logical size.
    pub fn snapshot(&self) -> DynamicImage {
        let img = DynamicImage::ImageRgba8(self.pixels.clone());
        if self.pixels.dimensions() == (self.width, self.height) {
            img
        } else {
            img.resize_exact(self.width, self.height, FilterType::Triangle)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        tracing::trace!(width = self.width, height = self.height, "released drawing surface");
    }
}

/// An encoded render.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

/// Apply orientation, rotation, flips and crop. No resampling happens here.
pub fn apply_geometry(
    mut image: DynamicImage,
    plan: &TransformPlan,
    orientation: OrientationTag,
) -> DynamicImage {
    image.apply_orientation(orientation.to_image_orientation());

    let degrees = normalize_degrees(plan.rotation_degrees);
    image = match degrees {
        d if d == 0.0 => image,
        d if d == 90.0 => image.rotate90(),
        d if d == 180.0 => image.rotate180(),
        d if d == 270.0 => image.rotate270(),
        d => rotate_about_centre(&image, d),
    };

    if plan.flip_h {
        image = image.fliph();
    }
    if plan.flip_v {
        image = image.flipv();
    }

    match plan.crop {
        Some(c) => {
            // Clamp again: the plan may have been built for other dimensions
            let x = c.x.min(image.width().saturating_sub(1));
            let y = c.y.min(image.height().saturating_sub(1));
            let w = c.width.clamp(1, image.width() - x);
            let h = c.height.clamp(1, image.height() - y);
            image.crop_imm(x, y, w, h)
        }
        None => image,
    }
}

/// Rotate clockwise by `degrees` about the centre, keeping the canvas size.
///
/// Output rows are filled in parallel by inverse-mapping each pixel into the
/// source; samples that land outside stay transparent.
fn rotate_about_centre(image: &DynamicImage, degrees: f64) -> DynamicImage {
    let src = image.to_rgba8();
    let (w, h) = src.dimensions();
    let mut out = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]));

    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;

    out.par_chunks_mut(w as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let dy = y as f64 + 0.5 - cy;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let dx = x as f64 + 0.5 - cx;
                let sx = (cx + dx * cos + dy * sin).floor();
                let sy = (cy - dx * sin + dy * cos).floor();
                if sx < 0.0 || sy < 0.0 || sx >= w as f64 || sy >= h as f64 {
                    continue;
                }
                px.copy_from_slice(&src.get_pixel(sx as u32, sy as u32).0);
            }
        });

    DynamicImage::ImageRgba8(out)
}

/// Execute `plan` on already-decoded pixels and encode the result.
pub fn render(
    backend: &(impl RasterBackend + ?Sized),
    source: &DynamicImage,
    plan: &TransformPlan,
    orientation: OrientationTag,
    format: OutputFormat,
    quality: Quality,
    options: &RasterOptions,
) -> Result<Rendered, RasterError> {
    let working = apply_geometry(source.clone(), plan, orientation);

    let mut surface = Surface::allocate(plan.target_width, plan.target_height, options)?;
    surface.draw(&working);
    let output = surface.snapshot();
    drop(surface);

    let bytes = backend
        .encode(&output, format, quality)
        .map_err(|e| RasterError::Encode(e.to_string()))?;

    Ok(Rendered {
        bytes,
        format,
        width: output.width(),
        height: output.height(),
    })
}

/// Decode `bytes` through the backend, then [`render`].
pub fn render_bytes(
    backend: &(impl RasterBackend + ?Sized),
    bytes: &[u8],
    plan: &TransformPlan,
    orientation: OrientationTag,
    format: OutputFormat,
    quality: Quality,
    options: &RasterOptions,
) -> Result<Rendered, RasterError> {
    let source = backend
        .decode(bytes)
        .map_err(|e| RasterError::Decode(e.to_string()))?;
    render(backend, &source, plan, orientation, format, quality, options)
}
