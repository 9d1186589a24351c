//! Compressor: shrink an asset toward a byte budget.
//!
//! Assets already within budget are returned untouched (ratio 0). Otherwise
//! the image is re-rendered in a loop:
//!
//! 1. First pass at `initial_quality`, longer edge capped at `max_dimension`.
//! 2. While over budget and the format is lossy, lower quality by
//!    `quality_step` down to `min_quality`.
//! 3. Then shrink dimensions by [`SCALE_FACTOR`] per pass.
//!
//! The loop stops at the budget or after `max_iterations` renders. The
//! smallest output wins; if nothing beat the original, the original is kept.
//! Missing the budget is reported as `shortfall_bytes`, not as a failure.
//!
//! Re-encoding drops EXIF, so orientation is baked into the pixels.

use crate::error::ProcessError;
use crate::imaging::{
    Capabilities, Dimensions, OrientationTag, OutputFormat, PlanRequest, Quality, RasterBackend,
    RasterOptions, Rendered, ResizeSpec, fit_within, negotiate_format, plan_transform,
    read_orientation, render, working_dimensions,
};
use crate::types::ImageAsset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Per-pass dimension shrink once quality is exhausted.
pub const SCALE_FACTOR: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressConfig {
    /// Target upper bound for the output, in bytes.
    pub max_size_bytes: u64,
    /// Longer-edge cap applied on the first pass.
    pub max_dimension: u32,
    pub initial_quality: u32,
    pub min_quality: u32,
    pub quality_step: u32,
    pub max_iterations: u32,
    /// Output encoding. `None` keeps the source format when it can be
    /// written, JPEG otherwise.
    pub output_format: Option<OutputFormat>,
    pub correct_orientation: bool,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 1024 * 1024,
            max_dimension: 2048,
            initial_quality: 85,
            min_quality: 40,
            quality_step: 10,
            max_iterations: 10,
            output_format: None,
            correct_orientation: true,
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a running job.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CompressResult {
    /// The compressed asset, or the original on failure or no gain.
    pub asset: ImageAsset,
    pub original_size: u64,
    pub compressed_size: u64,
    /// `1 - compressed / original`; 0 when nothing changed.
    pub ratio: f64,
    pub time_ms: u64,
    pub success: bool,
    pub error: Option<ProcessError>,
    /// Bytes still over budget after the last pass.
    pub shortfall_bytes: u64,
    pub format: Option<OutputFormat>,
    pub iterations: u32,
}

impl CompressResult {
    fn unchanged(asset: &ImageAsset, started: Instant) -> Self {
        Self {
            asset: asset.clone(),
            original_size: asset.size(),
            compressed_size: asset.size(),
            ratio: 0.0,
            time_ms: started.elapsed().as_millis() as u64,
            success: true,
            error: None,
            shortfall_bytes: 0,
            format: None,
            iterations: 0,
        }
    }

    fn failed(asset: &ImageAsset, started: Instant, error: ProcessError) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::unchanged(asset, started)
        }
    }
}

/// Build the replacement asset for re-encoded bytes.
///
/// Keeps the file stem and last-modified time, swaps the extension and
/// declared type.
pub(crate) fn derived_asset(source: &ImageAsset, bytes: Vec<u8>, format: OutputFormat) -> ImageAsset {
    let name = format!("{}.{}", source.stem(), format.extension());
    let asset = ImageAsset::new(name, format.mime(), bytes);
    match source.last_modified() {
        Some(t) => asset.with_last_modified(t),
        None => asset,
    }
}

/// Output format when none is requested.
pub(crate) fn default_output_format(asset: &ImageAsset) -> OutputFormat {
    asset
        .sniffed_type()
        .and_then(OutputFormat::from_image_type)
        .unwrap_or(OutputFormat::Jpeg)
}

pub fn compress_image(
    backend: &(impl RasterBackend + ?Sized),
    capabilities: &Capabilities,
    asset: &ImageAsset,
    config: &CompressConfig,
    abort: Option<&AbortSignal>,
) -> CompressResult {
    let started = Instant::now();
    let aborted = || abort.is_some_and(AbortSignal::is_aborted);

    if aborted() {
        return CompressResult::failed(asset, started, ProcessError::Aborted);
    }
    if asset.size() <= config.max_size_bytes {
        tracing::debug!(asset = asset.name(), size = asset.size(), "already within budget");
        return CompressResult::unchanged(asset, started);
    }

    let image = match backend.decode(asset.bytes()) {
        Ok(img) => img,
        Err(e) => return CompressResult::failed(asset, started, e.into()),
    };
    let orientation = if config.correct_orientation {
        read_orientation(asset.bytes()).unwrap_or_default()
    } else {
        OrientationTag::Normal
    };

    let requested = config
        .output_format
        .unwrap_or_else(|| default_output_format(asset));
    let format = negotiate_format(requested, capabilities, image.color().has_alpha()).format;

    let original = Dimensions::new(image.width(), image.height());
    let mut target = fit_within(
        working_dimensions(original, orientation, 0.0),
        config.max_dimension,
    );
    let min_quality = config.min_quality.clamp(1, 100);
    let mut quality = config.initial_quality.clamp(min_quality, 100);
    let step = config.quality_step.max(1);

    let mut best: Option<Rendered> = None;
    let mut iterations = 0;

    while iterations < config.max_iterations.max(1) {
        if aborted() {
            tracing::debug!(asset = asset.name(), iterations, "compression aborted");
            return CompressResult::failed(asset, started, ProcessError::Aborted);
        }

        let request = PlanRequest {
            resize: ResizeSpec::fit(target.width, target.height),
            ..PlanRequest::default()
        };
        let plan = plan_transform(original, orientation, &request);
        let rendered = match render(
            backend,
            &image,
            &plan,
            orientation,
            format,
            Quality::new(quality),
            &RasterOptions::default(),
        ) {
            Ok(r) => r,
            Err(e) => return CompressResult::failed(asset, started, e.into()),
        };
        iterations += 1;

        let size = rendered.bytes.len() as u64;
        tracing::trace!(
            asset = asset.name(),
            iteration = iterations,
            quality,
            width = rendered.width,
            height = rendered.height,
            size,
            "compression pass"
        );
        if best.as_ref().is_none_or(|b| size < b.bytes.len() as u64) {
            best = Some(rendered);
        }
        if size <= config.max_size_bytes {
            break;
        }

        if format.is_lossy() && quality > min_quality {
            quality = quality.saturating_sub(step).max(min_quality);
        } else if target.width == 1 && target.height == 1 {
            break;
        } else {
            target = Dimensions::new(
                ((target.width as f64 * SCALE_FACTOR).floor() as u32).max(1),
                ((target.height as f64 * SCALE_FACTOR).floor() as u32).max(1),
            );
        }
    }

    let original_size = asset.size();
    let (out_asset, compressed_size, out_format) = match best {
        Some(r) if (r.bytes.len() as u64) < original_size => {
            let size = r.bytes.len() as u64;
            (derived_asset(asset, r.bytes, r.format), size, Some(r.format))
        }
        _ => (asset.clone(), original_size, None),
    };

    let shortfall_bytes = compressed_size.saturating_sub(config.max_size_bytes);
    if shortfall_bytes > 0 {
        tracing::info!(
            asset = asset.name(),
            shortfall_bytes,
            budget = config.max_size_bytes,
            "size budget not reached"
        );
    }

    CompressResult {
        asset: out_asset,
        original_size,
        compressed_size,
        ratio: 1.0 - compressed_size as f64 / original_size as f64,
        time_ms: started.elapsed().as_millis() as u64,
        success: true,
        error: None,
        shortfall_bytes,
        format: out_format,
        iterations,
    }
}
