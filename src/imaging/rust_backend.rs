//! Pure Rust raster backend over the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, WebP) | `image::ImageReader` with guessed format |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (alpha flattened onto white) |
//! | Encode → PNG | `image::codecs::png::PngEncoder` (best compression) |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless only) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 8) |

use super::backend::{BackendError, RasterBackend};
use super::format::OutputFormat;
use super::params::Quality;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageReader, RgbImage};
use std::io::Cursor;

/// AVIF encoder speed (1 = slowest/smallest, 10 = fastest). Uploads favour
/// latency over the last few percent of size.
const AVIF_SPEED: u8 = 8;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Copy)]
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite any alpha channel onto a white background.
///
/// JPEG has no alpha; dropping the channel would turn transparent areas
/// black.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

fn encode_error(format: OutputFormat) -> impl Fn(image::ImageError) -> BackendError {
    move |e| BackendError::Encode {
        format,
        message: e.to_string(),
    }
}

impl RasterBackend for RustBackend {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| BackendError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        let mut out = Vec::new();
        match format {
            OutputFormat::Jpeg => {
                let rgb = flatten_onto_white(image);
                let encoder = JpegEncoder::new_with_quality(&mut out, quality.value() as u8);
                DynamicImage::ImageRgb8(rgb)
                    .write_with_encoder(encoder)
                    .map_err(encode_error(format))?;
            }
            OutputFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut out,
                    CompressionType::Best,
                    PngFilter::Adaptive,
                );
                image.write_with_encoder(encoder).map_err(encode_error(format))?;
            }
            OutputFormat::WebP => {
                let encoder = WebPEncoder::new_lossless(&mut out);
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_with_encoder(encoder)
                    .map_err(encode_error(format))?;
            }
            OutputFormat::Avif => {
                let encoder =
                    AvifEncoder::new_with_speed_quality(&mut out, AVIF_SPEED, quality.value() as u8);
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_with_encoder(encoder)
                    .map_err(encode_error(format))?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::gradient;
    use crate::types::ImageType;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_each_baseline_format_with_signature() {
        let backend = RustBackend::new();
        let img = gradient(32, 24);
        for format in [OutputFormat::Jpeg, OutputFormat::Png, OutputFormat::WebP] {
            let bytes = backend.encode(&img, format, Quality::new(80)).unwrap();
            assert_eq!(ImageType::sniff(&bytes), Some(format.image_type()), "{format}");
        }
    }

    #[test]
    fn decode_what_was_encoded() {
        let backend = RustBackend::new();
        let bytes = backend
            .encode(&gradient(40, 30), OutputFormat::Png, Quality::default())
            .unwrap();
        let decoded = backend.decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn decode_garbage_errors() {
        let backend = RustBackend::new();
        assert!(matches!(
            backend.decode(b"definitely not an image"),
            Err(BackendError::Decode(_))
        ));
    }

    #[test]
    fn lower_jpeg_quality_is_smaller() {
        let backend = RustBackend::new();
        let img = gradient(128, 128);
        let high = backend.encode(&img, OutputFormat::Jpeg, Quality::new(95)).unwrap();
        let low = backend.encode(&img, OutputFormat::Jpeg, Quality::new(10)).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn jpeg_flattens_transparency_to_white() {
        let transparent = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let flat = flatten_onto_white(&transparent);
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
    }
}
