//! Format conversion and full transform processing.
//!
//! Both operations decode once, plan geometry, render through the raster
//! engine and wrap the outcome in a result object. Neither returns `Err`:
//! failures set `success = false`, carry the error, and keep the original
//! asset so the caller always has something to submit.
//!
//! ## Conversion
//!
//! [`convert_format`] re-encodes to a target format, negotiated against the
//! detected capabilities. Orientation is baked in and, optionally, the longer
//! edge is capped.
//!
//! ## Processing
//!
//! [`process_image`] applies a [`TransformConfig`]: orientation correction,
//! rotation, flips, crop and resize, in that order. An identity config on an
//! upright image keeps the pixel dimensions exactly.

use crate::compress::{default_output_format, derived_asset};
use crate::error::ProcessError;
use crate::imaging::{
    Capabilities, CropRect, Dimensions, OrientationTag, OutputFormat, PlanRequest, Quality,
    RasterBackend, RasterOptions, ResizeSpec, fit_within, negotiate_format, normalize_degrees,
    plan_transform, read_orientation, render, working_dimensions,
};
use crate::types::ImageAsset;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionConfig {
    pub quality: u32,
    /// Optional longer-edge cap.
    pub max_dimension: Option<u32>,
    pub correct_orientation: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            quality: 85,
            max_dimension: None,
            correct_orientation: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertResult {
    pub asset: ImageAsset,
    pub requested_format: OutputFormat,
    pub actual_format: OutputFormat,
    pub used_fallback: bool,
    /// Percentage saved relative to the original; negative when it grew.
    pub size_reduction_pct: f64,
    pub time_ms: u64,
    pub success: bool,
    pub error: Option<ProcessError>,
}

pub fn convert_format(
    backend: &(impl RasterBackend + ?Sized),
    capabilities: &Capabilities,
    asset: &ImageAsset,
    target: OutputFormat,
    config: &ConversionConfig,
) -> ConvertResult {
    let started = Instant::now();

    let image = match backend.decode(asset.bytes()) {
        Ok(img) => img,
        Err(e) => {
            let negotiated = negotiate_format(target, capabilities, false);
            return ConvertResult {
                asset: asset.clone(),
                requested_format: target,
                actual_format: negotiated.format,
                used_fallback: negotiated.used_fallback,
                size_reduction_pct: 0.0,
                time_ms: started.elapsed().as_millis() as u64,
                success: false,
                error: Some(e.into()),
            };
        }
    };

    let negotiated = negotiate_format(target, capabilities, image.color().has_alpha());
    let orientation = if config.correct_orientation {
        read_orientation(asset.bytes()).unwrap_or_default()
    } else {
        OrientationTag::Normal
    };

    let original = Dimensions::new(image.width(), image.height());
    let resize = match config.max_dimension {
        Some(edge) => {
            let capped = fit_within(working_dimensions(original, orientation, 0.0), edge);
            ResizeSpec::fit(capped.width, capped.height)
        }
        None => ResizeSpec::default(),
    };
    let plan = plan_transform(
        original,
        orientation,
        &PlanRequest {
            resize,
            ..PlanRequest::default()
        },
    );

    let rendered = render(
        backend,
        &image,
        &plan,
        orientation,
        negotiated.format,
        Quality::new(config.quality),
        &RasterOptions::default(),
    );

    let (out, success, error) = match rendered {
        Ok(r) => (derived_asset(asset, r.bytes, r.format), true, None),
        Err(e) => (asset.clone(), false, Some(e.into())),
    };
    let size_reduction_pct = if asset.size() == 0 || !success {
        0.0
    } else {
        (1.0 - out.size() as f64 / asset.size() as f64) * 100.0
    };

    tracing::debug!(
        asset = asset.name(),
        requested = %target,
        actual = %negotiated.format,
        fallback = negotiated.used_fallback,
        success,
        "converted"
    );
    ConvertResult {
        asset: out,
        requested_format: target,
        actual_format: negotiated.format,
        used_fallback: negotiated.used_fallback,
        size_reduction_pct,
        time_ms: started.elapsed().as_millis() as u64,
        success,
        error,
    }
}

/// Geometry and encoding for [`process_image`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub resize: ResizeSpec,
    /// Normalized to the upright image (after orientation and any quarter
    /// turn of `rotation_degrees`).
    pub crop: Option<CropRect>,
    /// Clockwise.
    pub rotation_degrees: f64,
    pub flip_h: bool,
    pub flip_v: bool,
    pub correct_orientation: bool,
    /// `None` keeps the source format when it can be written.
    pub output_format: Option<OutputFormat>,
    pub quality: u32,
    pub pixel_ratio: f32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            resize: ResizeSpec::default(),
            crop: None,
            rotation_degrees: 0.0,
            flip_h: false,
            flip_v: false,
            correct_orientation: true,
            output_format: None,
            quality: 90,
            pixel_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub asset: ImageAsset,
    /// Stored pixel dimensions; 0×0 when decoding failed.
    pub original_dims: Dimensions,
    /// Output dimensions; 0×0 when decoding failed.
    pub final_dims: Dimensions,
    pub orientation: OrientationTag,
    pub orientation_corrected: bool,
    pub format: Option<OutputFormat>,
    pub time_ms: u64,
    pub success: bool,
    pub error: Option<ProcessError>,
}

pub fn process_image(
    backend: &(impl RasterBackend + ?Sized),
    capabilities: &Capabilities,
    asset: &ImageAsset,
    config: &TransformConfig,
) -> ProcessResult {
    let started = Instant::now();
    let orientation = if config.correct_orientation {
        read_orientation(asset.bytes()).unwrap_or_default()
    } else {
        OrientationTag::Normal
    };
    let failed = |original_dims: Dimensions, error: ProcessError| ProcessResult {
        asset: asset.clone(),
        original_dims,
        final_dims: Dimensions::new(0, 0),
        orientation,
        orientation_corrected: false,
        format: None,
        time_ms: started.elapsed().as_millis() as u64,
        success: false,
        error: Some(error),
    };

    let image = match backend.decode(asset.bytes()) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(asset = asset.name(), error = %e, "decode failed");
            return failed(Dimensions::new(0, 0), e.into());
        }
    };
    let original = Dimensions::new(image.width(), image.height());

    let request = PlanRequest {
        resize: config.resize,
        crop: config.crop,
        rotation_degrees: config.rotation_degrees,
        flip_h: config.flip_h,
        flip_v: config.flip_v,
    };
    let plan = plan_transform(original, orientation, &request);

    // Off-axis rotation exposes transparent corners
    let off_axis = normalize_degrees(config.rotation_degrees) % 90.0 != 0.0;
    let requested = config
        .output_format
        .unwrap_or_else(|| default_output_format(asset));
    let negotiated = negotiate_format(requested, capabilities, image.color().has_alpha() || off_axis);

    let options = RasterOptions {
        pixel_ratio: config.pixel_ratio,
        ..RasterOptions::default()
    };
    let rendered = match render(
        backend,
        &image,
        &plan,
        orientation,
        negotiated.format,
        Quality::new(config.quality),
        &options,
    ) {
        Ok(r) => r,
        Err(e) => return failed(original, e.into()),
    };

    let final_dims = Dimensions::new(rendered.width, rendered.height);
    tracing::debug!(
        asset = asset.name(),
        from = ?original,
        to = ?final_dims,
        orientation = ?orientation,
        format = %rendered.format,
        "processed"
    );
    ProcessResult {
        format: Some(rendered.format),
        asset: derived_asset(asset, rendered.bytes, rendered.format),
        original_dims: original,
        final_dims,
        orientation,
        orientation_corrected: !orientation.is_identity(),
        time_ms: started.elapsed().as_millis() as u64,
        success: true,
        error: None,
    }
}
