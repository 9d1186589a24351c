//! Validator: structural, dimension, aspect and corruption checks.
//!
//! Checks run in a fixed order and the cheap ones short-circuit:
//!
//! | # | Check | Needs decode | On failure |
//! |---|---|---|---|
//! | 1 | file size bounds | no | error, stop |
//! | 2 | declared type allow-list | no | error, stop |
//! | 3 | byte signature vs declared type | no | error, stop |
//! | 4 | decode | yes | error, stop |
//! | 5 | dimension bounds (upright) | yes | error |
//! | 6 | aspect ratio bounds | yes | error |
//! | 7 | corruption probe (stream completeness, draw + read-back) | yes | error |
//! | 8 | memory footprint, resolution | yes | warning |
//!
//! Decoders pad a stream that ends early with filler pixels, so a truncated
//! upload still decodes. The probe catches that by requiring the format's
//! terminator after the image data (JPEG EOI after the last scan, PNG
//! `IEND` chunk). With `check_corruption` off, a missing terminator is only
//! a `TruncatedData` warning.
//!
//! Custom validators run last and append to the error list. Nothing here
//! panics or returns `Err`: malformed input becomes an issue in the report.

use crate::error::ProcessError;
use crate::imaging::{
    Dimensions, OrientationTag, RasterBackend, RasterOptions, Surface, read_orientation,
    working_dimensions,
};
use crate::types::{ImageAsset, ImageType};
use serde::{Deserialize, Serialize};

/// Thresholds for [`validate_image`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Smallest accepted file, in bytes.
    pub min_file_size: u64,
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    pub allowed_types: Vec<ImageType>,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Lowest accepted width / height.
    pub min_aspect_ratio: f64,
    /// Highest accepted width / height.
    pub max_aspect_ratio: f64,
    /// Compare the leading bytes against the declared type.
    pub check_signature: bool,
    /// Reject streams that end before their terminator and check that the
    /// decoded image can be drawn and read back.
    pub check_corruption: bool,
    /// Warn when width × height × 4 exceeds this many bytes.
    pub memory_warning_bytes: u64,
    /// Warn when the longer edge is below this many pixels.
    pub recommended_min_dimension: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_file_size: 100,
            max_file_size: 20 * 1024 * 1024,
            allowed_types: vec![ImageType::Jpeg, ImageType::Png, ImageType::WebP],
            min_width: 16,
            min_height: 16,
            max_width: 8192,
            max_height: 8192,
            min_aspect_ratio: 0.1,
            max_aspect_ratio: 10.0,
            check_signature: true,
            check_corruption: true,
            memory_warning_bytes: 100 * 1024 * 1024,
            recommended_min_dimension: 512,
        }
    }
}

/// Machine-readable classification of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    FileTooSmall,
    FileTooLarge,
    UnsupportedType,
    HeaderMismatch,
    DecodeFailed,
    DimensionsTooSmall,
    DimensionsTooLarge,
    AspectRatioOutOfRange,
    Corrupted,
    Custom,
    HighMemoryUsage,
    LowResolution,
    TruncatedData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    /// What the user can do about it.
    pub suggestion: String,
}

impl ValidationIssue {
    pub fn new(code: IssueCode, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}

/// Facts learned from a successful decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Upright width, after EXIF orientation.
    pub width: u32,
    /// Upright height, after EXIF orientation.
    pub height: u32,
    pub format: ImageType,
    pub orientation: OrientationTag,
    pub aspect_ratio: f64,
    pub estimated_memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub metadata: Option<ImageMetadata>,
}

impl ValidationReport {
    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors.iter().any(|i| i.code == code)
    }

    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|i| i.code == code)
    }

    /// The caller-facing error for an invalid report, `None` when valid.
    pub fn to_error(&self) -> Option<ProcessError> {
        if self.valid {
            return None;
        }
        let message = self
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Some(ProcessError::Validation {
            message,
            suggestions: self.errors.iter().map(|e| e.suggestion.clone()).collect(),
        })
    }
}

/// A pluggable check appended after the built-in ones.
///
/// `metadata` is `None` when the built-in checks stopped before decoding.
pub trait CustomValidator: Send + Sync {
    fn validate(&self, asset: &ImageAsset, metadata: Option<&ImageMetadata>)
    -> Option<ValidationIssue>;
}

impl<F> CustomValidator for F
where
    F: Fn(&ImageAsset, Option<&ImageMetadata>) -> Option<ValidationIssue> + Send + Sync,
{
    fn validate(
        &self,
        asset: &ImageAsset,
        metadata: Option<&ImageMetadata>,
    ) -> Option<ValidationIssue> {
        self(asset, metadata)
    }
}

/// Built-in checks plus any registered custom validators.
#[derive(Default)]
pub struct Validator {
    config: ValidationConfig,
    custom: Vec<Box<dyn CustomValidator>>,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            custom: Vec::new(),
        }
    }

    pub fn with_validator(mut self, validator: impl CustomValidator + 'static) -> Self {
        self.custom.push(Box::new(validator));
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate(
        &self,
        backend: &(impl RasterBackend + ?Sized),
        asset: &ImageAsset,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let metadata = run_builtin_checks(backend, asset, &self.config, &mut errors, &mut warnings);

        for validator in &self.custom {
            if let Some(issue) = validator.validate(asset, metadata.as_ref()) {
                errors.push(issue);
            }
        }

        tracing::debug!(
            asset = asset.name(),
            errors = errors.len(),
            warnings = warnings.len(),
            "validated"
        );
        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            metadata,
        }
    }
}

/// Validate `asset` against `config` with the built-in checks only.
pub fn validate_image(
    backend: &(impl RasterBackend + ?Sized),
    asset: &ImageAsset,
    config: &ValidationConfig,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let metadata = run_builtin_checks(backend, asset, config, &mut errors, &mut warnings);
    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
        metadata,
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn type_list(types: &[ImageType]) -> String {
    types.iter().map(|t| t.mime()).collect::<Vec<_>>().join(", ")
}

fn run_builtin_checks(
    backend: &(impl RasterBackend + ?Sized),
    asset: &ImageAsset,
    config: &ValidationConfig,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) -> Option<ImageMetadata> {
    // 1. size
    if asset.size() < config.min_file_size {
        errors.push(ValidationIssue::new(
            IssueCode::FileTooSmall,
            format!(
                "File is {} but at least {} is required",
                format_bytes(asset.size()),
                format_bytes(config.min_file_size)
            ),
            "The file may be empty or incomplete; choose the original photo again",
        ));
        return None;
    }
    if asset.size() > config.max_file_size {
        errors.push(ValidationIssue::new(
            IssueCode::FileTooLarge,
            format!(
                "File is {} which exceeds the {} limit",
                format_bytes(asset.size()),
                format_bytes(config.max_file_size)
            ),
            "Compress the image or export it at a lower resolution",
        ));
        return None;
    }

    // 2. declared type
    let declared = match asset.declared_image_type() {
        Some(t) if config.allowed_types.contains(&t) => t,
        _ => {
            errors.push(ValidationIssue::new(
                IssueCode::UnsupportedType,
                format!("File type '{}' is not supported", asset.declared_type()),
                format!("Use one of: {}", type_list(&config.allowed_types)),
            ));
            return None;
        }
    };

    // 3. signature
    if config.check_signature {
        match asset.sniffed_type() {
            Some(actual) if actual == declared => {}
            Some(actual) => {
                errors.push(ValidationIssue::new(
                    IssueCode::HeaderMismatch,
                    format!("File is declared as {declared} but its contents are {actual}"),
                    "Re-export the image so its extension matches its format",
                ));
                return None;
            }
            None => {
                errors.push(ValidationIssue::new(
                    IssueCode::HeaderMismatch,
                    format!("File is declared as {declared} but has no recognised image signature"),
                    "The file is not an image or is damaged; choose a different file",
                ));
                return None;
            }
        }
    }

    // 4. decode
    let image = match backend.decode(asset.bytes()) {
        Ok(img) => img,
        Err(e) => {
            errors.push(ValidationIssue::new(
                IssueCode::DecodeFailed,
                format!("Image could not be decoded: {e}"),
                "The file appears damaged; try exporting it again",
            ));
            return None;
        }
    };

    let orientation = if declared == ImageType::Jpeg {
        read_orientation(asset.bytes()).unwrap_or_default()
    } else {
        OrientationTag::Normal
    };
    let upright = working_dimensions(
        Dimensions::new(image.width(), image.height()),
        orientation,
        0.0,
    );
    let metadata = ImageMetadata {
        width: upright.width,
        height: upright.height,
        format: declared,
        orientation,
        aspect_ratio: upright.aspect_ratio(),
        estimated_memory_bytes: upright.pixels() * 4,
    };

    // 5. dimensions
    if upright.width < config.min_width || upright.height < config.min_height {
        errors.push(ValidationIssue::new(
            IssueCode::DimensionsTooSmall,
            format!(
                "Image is {}x{} but at least {}x{} is required",
                upright.width, upright.height, config.min_width, config.min_height
            ),
            "Use a higher-resolution photo",
        ));
    }
    if upright.width > config.max_width || upright.height > config.max_height {
        errors.push(ValidationIssue::new(
            IssueCode::DimensionsTooLarge,
            format!(
                "Image is {}x{} which exceeds {}x{}",
                upright.width, upright.height, config.max_width, config.max_height
            ),
            format!(
                "Resize the image to at most {}x{}",
                config.max_width, config.max_height
            ),
        ));
    }

    // 6. aspect ratio
    let ratio = metadata.aspect_ratio;
    if ratio < config.min_aspect_ratio || ratio > config.max_aspect_ratio {
        errors.push(ValidationIssue::new(
            IssueCode::AspectRatioOutOfRange,
            format!(
                "Aspect ratio {ratio:.2} is outside {:.2}..{:.2}",
                config.min_aspect_ratio, config.max_aspect_ratio
            ),
            "Crop the image closer to a standard photo shape",
        ));
    }

    // 7. corruption probe
    let complete = has_stream_trailer(asset.bytes(), declared);
    if config.check_corruption {
        if let Some(reason) = corruption_probe(&image, complete) {
            errors.push(ValidationIssue::new(
                IssueCode::Corrupted,
                reason,
                "The file appears corrupted or cut short; try exporting or uploading it again",
            ));
        }
    } else if !complete {
        warnings.push(ValidationIssue::new(
            IssueCode::TruncatedData,
            "The file ends without its end-of-image marker",
            "The upload may have been cut short; check the image looks complete",
        ));
    }

    // 8. warnings
    if metadata.estimated_memory_bytes > config.memory_warning_bytes {
        warnings.push(ValidationIssue::new(
            IssueCode::HighMemoryUsage,
            format!(
                "Decoding needs about {}",
                format_bytes(metadata.estimated_memory_bytes)
            ),
            "Processing may be slow on low-memory devices; consider a smaller image",
        ));
    }
    if upright.width.max(upright.height) < config.recommended_min_dimension {
        warnings.push(ValidationIssue::new(
            IssueCode::LowResolution,
            format!(
                "Image is {}x{}, below the recommended {}px",
                upright.width, upright.height, config.recommended_min_dimension
            ),
            "Results look best with larger source photos",
        ));
    }

    Some(metadata)
}

/// Reason the decoded pixels cannot be trusted, if any.
fn corruption_probe(image: &image::DynamicImage, complete: bool) -> Option<String> {
    if !complete {
        return Some("Image data ends before its end-of-image marker".into());
    }
    let (w, h) = (image.width().min(8), image.height().min(8));
    if w == 0 || h == 0 {
        return Some("Decoded image has no pixels".into());
    }
    let readable = Surface::allocate(w, h, &RasterOptions::default())
        .ok()
        .and_then(|mut surface| {
            surface.draw(image);
            surface.pixel(w - 1, h - 1)
        })
        .is_some();
    (!readable).then(|| "Decoded pixels could not be read back".into())
}

/// Whether the image data is followed by its format's terminator.
///
/// JPEG needs an EOI marker (`FF D9`) after the last start-of-scan; entropy
/// coded data cannot contain either marker, so anything after EOI (camera
/// trailers, padding) is tolerated. PNG needs a complete `IEND` chunk
/// reached by walking the chunk list. Other formats always pass.
pub fn has_stream_trailer(bytes: &[u8], image_type: ImageType) -> bool {
    match image_type {
        ImageType::Jpeg => {
            let Some(sos) = bytes.windows(2).rposition(|w| w == [0xFF, 0xDA]) else {
                return false;
            };
            bytes[sos..].windows(2).any(|w| w == [0xFF, 0xD9])
        }
        ImageType::Png => png_has_iend(bytes),
        _ => true,
    }
}

/// Chunk layout: length (4, big-endian), type (4), data, CRC (4).
fn png_has_iend(bytes: &[u8]) -> bool {
    let mut pos: usize = 8;
    while let Some(header) = bytes.get(pos..pos.saturating_add(8)) {
        if header.len() < 8 {
            return false;
        }
        if &header[4..8] == b"IEND" {
            return bytes.len() >= pos.saturating_add(12);
        }
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        pos = match pos.checked_add(12).and_then(|p| p.checked_add(len)) {
            Some(p) => p,
            None => return false,
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use crate::imaging::backend::tests::MockBackend;
    use crate::test_helpers::*;

    fn validate(asset: &ImageAsset) -> ValidationReport {
        validate_image(&RustBackend::new(), asset, &ValidationConfig::default())
    }

    #[test]
    fn valid_jpeg_passes() {
        let report = validate(&jpeg_asset("ok.jpg", 640, 480));
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.errors.is_empty());
        let meta = report.metadata.unwrap();
        assert_eq!((meta.width, meta.height), (640, 480));
        assert_eq!(meta.estimated_memory_bytes, 640 * 480 * 4);
    }

    #[test]
    fn valid_png_passes() {
        let report = validate(&png_asset("ok.png", 600, 600));
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn header_mismatch_stops_before_decode() {
        let png = png_asset("x.png", 64, 64);
        let lying = ImageAsset::new("x.jpg", "image/jpeg", png.bytes().to_vec());
        let backend = MockBackend::new();

        let report = validate_image(&backend, &lying, &ValidationConfig::default());
        assert!(!report.valid);
        assert!(report.has_error(IssueCode::HeaderMismatch));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn unknown_signature_is_header_mismatch() {
        let junk = ImageAsset::new("x.jpg", "image/jpeg", vec![0x42; 500]);
        assert!(validate(&junk).has_error(IssueCode::HeaderMismatch));
    }

    #[test]
    fn size_bounds() {
        let tiny = ImageAsset::new("t.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF]);
        let report = validate(&tiny);
        assert_eq!(report.errors.len(), 1);
        assert!(report.has_error(IssueCode::FileTooSmall));
        assert!(report.metadata.is_none());

        let config = ValidationConfig {
            max_file_size: 200,
            ..ValidationConfig::default()
        };
        let report = validate_image(&RustBackend::new(), &jpeg_asset("a.jpg", 256, 256), &config);
        assert!(report.has_error(IssueCode::FileTooLarge));
    }

    #[test]
    fn disallowed_type() {
        let gif = ImageAsset::new("a.gif", "image/gif", b"GIF89a".repeat(40));
        let report = validate(&gif);
        assert!(report.has_error(IssueCode::UnsupportedType));
        assert!(report.errors[0].suggestion.contains("image/jpeg"));
    }

    #[test]
    fn decode_failure_is_reported() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend(std::iter::repeat_n(0x11, 300));
        let report = validate(&ImageAsset::new("bad.jpg", "image/jpeg", bytes));
        assert!(report.has_error(IssueCode::DecodeFailed));
        assert!(report.metadata.is_none());
    }

    #[test]
    fn dimension_and_aspect_bounds() {
        let report = validate(&noisy_png_asset("small.png", 8, 8));
        assert!(report.has_error(IssueCode::DimensionsTooSmall));

        let report = validate(&png_asset("strip.png", 400, 20));
        assert!(report.has_error(IssueCode::AspectRatioOutOfRange));
        assert!(!report.has_error(IssueCode::DimensionsTooSmall));

        let config = ValidationConfig {
            max_width: 100,
            ..ValidationConfig::default()
        };
        let report = validate_image(&RustBackend::new(), &png_asset("w.png", 200, 100), &config);
        assert!(report.has_error(IssueCode::DimensionsTooLarge));
    }

    #[test]
    fn dimensions_are_checked_upright() {
        let asset = with_orientation(&jpeg_asset("p.jpg", 80, 40), 6);
        let meta = validate(&asset).metadata.unwrap();
        assert_eq!(meta.orientation, OrientationTag::Rotate90Cw);
        assert_eq!((meta.width, meta.height), (40, 80));
    }

    #[test]
    fn warnings_do_not_invalidate() {
        let config = ValidationConfig {
            memory_warning_bytes: 1000,
            ..ValidationConfig::default()
        };
        let report = validate_image(&RustBackend::new(), &jpeg_asset("a.jpg", 64, 64), &config);
        assert!(report.valid);
        assert!(report.has_warning(IssueCode::HighMemoryUsage));
        assert!(report.has_warning(IssueCode::LowResolution));
    }

    #[test]
    fn stream_trailers() {
        let jpeg = jpeg_asset("a.jpg", 32, 32);
        assert!(has_stream_trailer(jpeg.bytes(), ImageType::Jpeg));
        let cut = &jpeg.bytes()[..jpeg.bytes().len() - 2];
        assert!(!has_stream_trailer(cut, ImageType::Jpeg));
        let mut padded = jpeg.bytes().to_vec();
        padded.extend_from_slice(&[0, 0, 0]);
        assert!(has_stream_trailer(&padded, ImageType::Jpeg));
        let mut trailer = jpeg.bytes().to_vec();
        trailer.extend_from_slice(b"CAMERA-TRAILER");
        assert!(has_stream_trailer(&trailer, ImageType::Jpeg));
        // Header only, no scan at all
        assert!(!has_stream_trailer(&jpeg.bytes()[..20], ImageType::Jpeg));

        let png = png_asset("a.png", 32, 32);
        assert!(has_stream_trailer(png.bytes(), ImageType::Png));
        assert!(!has_stream_trailer(&png.bytes()[..20], ImageType::Png));
        let len = png.bytes().len();
        assert!(!has_stream_trailer(&png.bytes()[..len - 4], ImageType::Png));
        let mut png_trailer = png.bytes().to_vec();
        png_trailer.extend_from_slice(&[0; 16]);
        assert!(has_stream_trailer(&png_trailer, ImageType::Png));
        assert!(has_stream_trailer(&[], ImageType::WebP));
    }

    fn first_third(asset: &ImageAsset) -> ImageAsset {
        let bytes = asset.bytes();
        ImageAsset::new(asset.name(), asset.declared_type(), bytes[..bytes.len() / 3].to_vec())
    }

    #[test]
    fn truncated_jpeg_is_corrupted() {
        let cut = first_third(&jpeg_asset("cut.jpg", 800, 600));
        let report = validate(&cut);

        assert!(!report.valid);
        assert!(report.has_error(IssueCode::Corrupted), "{:?}", report.errors);
        assert!(!report.has_warning(IssueCode::TruncatedData));
        assert!(report.errors.iter().all(|e| !e.suggestion.is_empty()));
    }

    #[test]
    fn truncation_is_a_warning_without_corruption_check() {
        let cut = first_third(&jpeg_asset("cut.jpg", 800, 600));
        let config = ValidationConfig {
            check_corruption: false,
            ..ValidationConfig::default()
        };
        let report = validate_image(&RustBackend::new(), &cut, &config);

        assert!(!report.has_error(IssueCode::Corrupted));
        assert!(report.has_warning(IssueCode::TruncatedData));
    }

    #[test]
    fn trailing_bytes_after_end_marker_are_not_corruption() {
        let mut bytes = jpeg_asset("t.jpg", 640, 480).bytes().to_vec();
        bytes.extend_from_slice(b"vendor trailer data");
        let report = validate(&ImageAsset::new("t.jpg", "image/jpeg", bytes));
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn custom_validators_append_errors() {
        let validator = Validator::new(ValidationConfig::default()).with_validator(
            |asset: &ImageAsset, meta: Option<&ImageMetadata>| {
                let square = meta.is_some_and(|m| m.width == m.height);
                (!square).then(|| {
                    ValidationIssue::new(
                        IssueCode::Custom,
                        format!("{} must be square", asset.name()),
                        "Crop to 1:1",
                    )
                })
            },
        );
        let backend = RustBackend::new();

        assert!(validator.validate(&backend, &png_asset("sq.png", 64, 64)).valid);
        let report = validator.validate(&backend, &png_asset("wide.png", 128, 64));
        assert!(report.has_error(IssueCode::Custom));
    }

    #[test]
    fn invalid_report_converts_to_error_with_suggestions() {
        let report = validate(&noisy_png_asset("small.png", 8, 8));
        match report.to_error() {
            Some(ProcessError::Validation { suggestions, .. }) => assert!(!suggestions.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(validate(&jpeg_asset("ok.jpg", 640, 480)).to_error().is_none());
    }
}
