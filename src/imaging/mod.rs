//! Image processing in pure Rust via the `image` crate.
//!
//! | Stage | Module | Crate / function |
//! |---|---|---|
//! | **Orientation** | [`orientation`] | custom EXIF reader (JPEG APP1 + TIFF IFD0) |
//! | **Planning** | `calculations` | pure dimension math |
//! | **Raster** | [`raster`] | `apply_orientation`, rotate/flip/crop, Lanczos3 draw |
//! | **Encode/decode** | [`rust_backend`] | `image` codecs (JPEG, PNG, WebP, AVIF) |
//! | **Capabilities** | [`format`] | 1×1 probe + signature check |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`RasterBackend`] trait + [`RustBackend`]
//! - **Raster**: Executes a plan against pixels through a backend

pub mod backend;
mod calculations;
pub mod format;
pub mod orientation;
mod params;
pub mod raster;
pub mod rust_backend;

pub use backend::{BackendError, RasterBackend};
pub use calculations::{
    PlanRequest, calculate_target_dimensions, crop_to_pixels, fit_within, normalize_degrees,
    plan_transform, working_dimensions,
};
pub use format::{
    Capabilities, CapabilityDetector, Negotiated, OutputFormat, best_available, fallback_format,
    negotiate_format, probe_capabilities,
};
pub use orientation::{OrientationTag, read_orientation};
pub use params::{CropRect, Dimensions, PixelRect, Quality, ResizeSpec, TransformPlan};
pub use raster::{RasterError, RasterOptions, Rendered, Surface, apply_geometry, render, render_bytes};
pub use rust_backend::RustBackend;
