//! Output formats, capability detection and format negotiation.
//!
//! [`OutputFormat`] is the closed set of encodings the engine can write.
//! Which of them actually work depends on the backend, so a
//! [`CapabilityDetector`] probes each modern format once by encoding a 1×1
//! image and checking the signature of what comes back. Backends that cannot
//! encode a format tend to hand back a PNG instead of failing, which is why the
//! probe checks the bytes rather than trusting `Ok`.
//!
//! Negotiation is deterministic:
//!
//! | Requested | Supported? | Result |
//! |---|---|---|
//! | any | yes | requested |
//! | any | no, source needs alpha | PNG (lossless) |
//! | any | no, photographic | JPEG (universal lossy) |

use super::backend::RasterBackend;
use super::params::Quality;
use crate::types::ImageType;
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Encodings the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Avif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Avif,
    ];

    /// Formats every backend is expected to encode.
    pub const BASELINE: [OutputFormat; 2] = [OutputFormat::Jpeg, OutputFormat::Png];

    /// Formats whose support must be probed.
    pub const MODERN: [OutputFormat; 2] = [OutputFormat::Avif, OutputFormat::WebP];

    pub fn mime(self) -> &'static str {
        self.image_type().mime()
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    pub fn image_type(self) -> ImageType {
        match self {
            OutputFormat::Jpeg => ImageType::Jpeg,
            OutputFormat::Png => ImageType::Png,
            OutputFormat::WebP => ImageType::WebP,
            OutputFormat::Avif => ImageType::Avif,
        }
    }

    /// The output format matching an input type, if the engine can write it.
    pub fn from_image_type(t: ImageType) -> Option<Self> {
        match t {
            ImageType::Jpeg => Some(OutputFormat::Jpeg),
            ImageType::Png => Some(OutputFormat::Png),
            ImageType::WebP => Some(OutputFormat::WebP),
            ImageType::Avif => Some(OutputFormat::Avif),
            ImageType::Gif => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::WebP),
            "avif" => Some(OutputFormat::Avif),
            other => ImageType::from_mime(other).and_then(Self::from_image_type),
        }
    }

    pub fn supports_transparency(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }

    /// Whether the quality setting changes the output size.
    pub fn is_lossy(self) -> bool {
        // The WebP encoder available to the backend is lossless-only
        matches!(self, OutputFormat::Jpeg | OutputFormat::Avif)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// The set of formats a backend was found to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub jpeg: bool,
    pub png: bool,
    pub webp: bool,
    pub avif: bool,
}

impl Capabilities {
    /// Only the baseline formats. This is what a failed probe leaves behind.
    pub fn baseline() -> Self {
        Self {
            jpeg: true,
            png: true,
            webp: false,
            avif: false,
        }
    }

    pub fn from_formats(formats: &[OutputFormat]) -> Self {
        let mut caps = Self {
            jpeg: false,
            png: false,
            webp: false,
            avif: false,
        };
        for f in formats {
            caps.set(*f, true);
        }
        caps
    }

    pub fn supports(&self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::Jpeg => self.jpeg,
            OutputFormat::Png => self.png,
            OutputFormat::WebP => self.webp,
            OutputFormat::Avif => self.avif,
        }
    }

    fn set(&mut self, format: OutputFormat, supported: bool) {
        match format {
            OutputFormat::Jpeg => self.jpeg = supported,
            OutputFormat::Png => self.png = supported,
            OutputFormat::WebP => self.webp = supported,
            OutputFormat::Avif => self.avif = supported,
        }
    }

    pub fn supported(&self) -> Vec<OutputFormat> {
        OutputFormat::ALL
            .into_iter()
            .filter(|f| self.supports(*f))
            .collect()
    }
}

/// Probe a backend for every modern format. Never fails: a probe that errors
/// or returns the wrong signature counts as unsupported.
pub fn probe_capabilities(backend: &(impl RasterBackend + ?Sized)) -> Capabilities {
    let probe = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        1,
        1,
        image::Rgba([255, 255, 255, 255]),
    ));

    let mut caps = Capabilities::baseline();
    for format in OutputFormat::MODERN {
        let supported = match backend.encode(&probe, format, Quality::new(50)) {
            Ok(bytes) => ImageType::sniff(&bytes) == Some(format.image_type()),
            Err(e) => {
                tracing::debug!(%format, error = %e, "capability probe failed");
                false
            }
        };
        tracing::debug!(%format, supported, "capability probe");
        caps.set(format, supported);
    }
    caps
}

/// Runs [`probe_capabilities`] at most once and hands out the cached result.
#[derive(Debug, Default)]
pub struct CapabilityDetector {
    detected: OnceLock<Capabilities>,
}

impl CapabilityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector whose answer is fixed up front.
    pub fn with_capabilities(caps: Capabilities) -> Self {
        let detector = Self::new();
        let _ = detector.detected.set(caps);
        detector
    }

    pub fn detect(&self, backend: &(impl RasterBackend + ?Sized)) -> Capabilities {
        *self.detected.get_or_init(|| {
            let caps = probe_capabilities(backend);
            tracing::info!(formats = ?caps.supported(), "detected output capabilities");
            caps
        })
    }

    pub fn cached(&self) -> Option<Capabilities> {
        self.detected.get().copied()
    }
}

/// Outcome of negotiating an output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiated {
    pub requested: OutputFormat,
    pub format: OutputFormat,
    pub used_fallback: bool,
}

/// The deterministic fallback for an unsupported target.
pub fn fallback_format(needs_transparency: bool) -> OutputFormat {
    if needs_transparency {
        OutputFormat::Png
    } else {
        OutputFormat::Jpeg
    }
}

/// Pick the format to actually encode with.
///
/// `needs_transparency` should be true when the source carries alpha; a
/// photographic source falls back to JPEG, anything with alpha to PNG.
pub fn negotiate_format(
    requested: OutputFormat,
    caps: &Capabilities,
    needs_transparency: bool,
) -> Negotiated {
    if caps.supports(requested) {
        return Negotiated {
            requested,
            format: requested,
            used_fallback: false,
        };
    }
    let format = fallback_format(needs_transparency);
    tracing::debug!(%requested, fallback = %format, "requested format unsupported");
    Negotiated {
        requested,
        format,
        used_fallback: true,
    }
}

/// The most efficient supported format, most modern first.
pub fn best_available(caps: &Capabilities, needs_transparency: bool) -> OutputFormat {
    let ranked: [OutputFormat; 3] = if needs_transparency {
        [OutputFormat::Avif, OutputFormat::WebP, OutputFormat::Png]
    } else {
        [OutputFormat::Avif, OutputFormat::WebP, OutputFormat::Jpeg]
    };
    ranked
        .into_iter()
        .find(|f| caps.supports(*f))
        .unwrap_or_else(|| fallback_format(needs_transparency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::RustBackend;

    #[test]
    fn parse_names_and_mimes() {
        assert_eq!(OutputFormat::parse("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("image/webp"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::parse("avif"), Some(OutputFormat::Avif));
        assert_eq!(OutputFormat::parse("gif"), None);
        assert_eq!(OutputFormat::parse("image/gif"), None);
    }

    #[test]
    fn supported_target_is_kept() {
        let caps = Capabilities::from_formats(&OutputFormat::ALL);
        let n = negotiate_format(OutputFormat::WebP, &caps, false);
        assert_eq!(n.format, OutputFormat::WebP);
        assert!(!n.used_fallback);
    }

    #[test]
    fn photographic_falls_back_to_jpeg() {
        let caps = Capabilities::baseline();
        let n = negotiate_format(OutputFormat::Avif, &caps, false);
        assert_eq!(n.format, OutputFormat::Jpeg);
        assert!(n.used_fallback);
    }

    #[test]
    fn transparent_falls_back_to_png() {
        let caps = Capabilities::baseline();
        let n = negotiate_format(OutputFormat::WebP, &caps, true);
        assert_eq!(n.format, OutputFormat::Png);
        assert!(n.used_fallback);
    }

    #[test]
    fn best_available_prefers_modern() {
        let all = Capabilities::from_formats(&OutputFormat::ALL);
        assert_eq!(best_available(&all, false), OutputFormat::Avif);

        let webp_only = Capabilities::from_formats(&[
            OutputFormat::Jpeg,
            OutputFormat::Png,
            OutputFormat::WebP,
        ]);
        assert_eq!(best_available(&webp_only, true), OutputFormat::WebP);

        assert_eq!(best_available(&Capabilities::baseline(), false), OutputFormat::Jpeg);
        assert_eq!(best_available(&Capabilities::baseline(), true), OutputFormat::Png);
    }

    #[test]
    fn probe_detects_signature_mismatch() {
        let backend = MockBackend::without_formats(&[OutputFormat::Avif, OutputFormat::WebP]);
        let caps = probe_capabilities(&backend);
        assert_eq!(caps, Capabilities::baseline());
    }

    #[test]
    fn probe_real_backend_finds_webp() {
        let caps = probe_capabilities(&RustBackend::new());
        assert!(caps.jpeg && caps.png);
        assert!(caps.webp);
    }

    #[test]
    fn detector_probes_once() {
        let backend = MockBackend::without_formats(&[OutputFormat::Avif]);
        let detector = CapabilityDetector::new();
        assert_eq!(detector.cached(), None);

        let first = detector.detect(&backend);
        let probes_after_first = backend.get_operations().len();
        let second = detector.detect(&backend);

        assert_eq!(first, second);
        assert_eq!(backend.get_operations().len(), probes_after_first);
        assert!(!first.avif);
    }

    #[test]
    fn fixed_detector_skips_probe() {
        let backend = MockBackend::new();
        let detector = CapabilityDetector::with_capabilities(Capabilities::baseline());
        assert_eq!(detector.detect(&backend), Capabilities::baseline());
        assert!(backend.get_operations().is_empty());
    }
}
