//! Shared test utilities for the photoprep test suite.
//!
//! Provides synthetic images and ready-made [`ImageAsset`]s so tests never
//! depend on fixture files.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let asset = jpeg_asset("shot.jpg", 640, 480);
//! let rotated = with_orientation(&asset, 6);
//! ```

use crate::imaging::{OutputFormat, Quality, RasterBackend, RustBackend};
use crate::types::ImageAsset;
use image::{DynamicImage, RgbImage, Rgba, RgbaImage};

// =========================================================================
// Pixel sources
// =========================================================================

/// A smooth gradient; compresses well.
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

/// Deterministic pseudo-random noise; compresses badly, which makes byte
/// budgets meaningful at small dimensions.
pub fn noise(width: u32, height: u32) -> DynamicImage {
    let mut state: u32 = 0x1234_5678;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state & 0xFF) as u8
    };
    let mut img = RgbImage::new(width, height);
    for px in img.pixels_mut() {
        *px = image::Rgb([next(), next(), next()]);
    }
    DynamicImage::ImageRgb8(img)
}

/// Half-transparent image for alpha-dependent negotiation.
pub fn translucent(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, _| {
        Rgba([200, 40, 40, if x % 2 == 0 { 0 } else { 255 }])
    }))
}

// =========================================================================
// Encoded bytes and assets
// =========================================================================

pub fn encode(img: &DynamicImage, format: OutputFormat, quality: u32) -> Vec<u8> {
    RustBackend::new()
        .encode(img, format, Quality::new(quality))
        .unwrap()
}

pub fn jpeg_asset(name: &str, width: u32, height: u32) -> ImageAsset {
    let bytes = encode(&gradient(width, height), OutputFormat::Jpeg, 90);
    ImageAsset::new(name, "image/jpeg", bytes)
}

pub fn noisy_jpeg_asset(name: &str, width: u32, height: u32) -> ImageAsset {
    let bytes = encode(&noise(width, height), OutputFormat::Jpeg, 98);
    ImageAsset::new(name, "image/jpeg", bytes)
}

pub fn png_asset(name: &str, width: u32, height: u32) -> ImageAsset {
    let bytes = encode(&gradient(width, height), OutputFormat::Png, 90);
    ImageAsset::new(name, "image/png", bytes)
}

/// PNG of noise, so tiny dimensions still produce a realistic file size.
pub fn noisy_png_asset(name: &str, width: u32, height: u32) -> ImageAsset {
    let bytes = encode(&noise(width, height), OutputFormat::Png, 90);
    ImageAsset::new(name, "image/png", bytes)
}

pub fn translucent_png_asset(name: &str, width: u32, height: u32) -> ImageAsset {
    let bytes = encode(&translucent(width, height), OutputFormat::Png, 90);
    ImageAsset::new(name, "image/png", bytes)
}

/// Splice an APP1 EXIF segment with the given orientation code right after
/// the SOI marker of a JPEG asset.
pub fn with_orientation(asset: &ImageAsset, code: u16) -> ImageAsset {
    let exif_prefix = crate::imaging::orientation::tests::jpeg_with_orientation(code, false);
    // Synthetic prefix is SOI, an 8-byte APP0, APP1, then a 4-byte SOS stub
    let app1 = &exif_prefix[10..exif_prefix.len() - 4];

    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend_from_slice(app1);
    bytes.extend_from_slice(&asset.bytes()[2..]);
    ImageAsset::new(asset.name(), asset.declared_type(), bytes)
}
