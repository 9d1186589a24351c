//! Raster backend trait and shared error type.
//!
//! The [`RasterBackend`] trait is the seam to the host's decoding and
//! encoding capability. It has exactly two operations, decode and encode;
//! geometry lives in the [`raster`](super::raster) engine so every backend
//! gets identical transforms.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust via the
//! `image` crate.

use super::format::OutputFormat;
use super::params::Quality;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encode to {format} failed: {message}")]
    Encode {
        format: OutputFormat,
        message: String,
    },
}

/// Trait for raster backends.
///
/// Implementations must be `Send + Sync`: worker slots share one backend.
pub trait RasterBackend: Send + Sync {
    /// Decode an encoded image into pixels.
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError>;

    /// Encode pixels. `quality` is ignored by lossless formats.
    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError>;
}

impl<B: RasterBackend + ?Sized> RasterBackend for std::sync::Arc<B> {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError> {
        (**self).decode(bytes)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        (**self).encode(image, format, quality)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use std::sync::Mutex;

    /// Backend that delegates to [`RustBackend`] while recording every call.
    ///
    /// Formats listed in `unsupported` behave like a host that silently
    /// substitutes PNG. Uses Mutex (not RefCell) so it is Sync.
    #[derive(Default)]
    pub struct MockBackend {
        inner: RustBackend,
        pub unsupported: Vec<OutputFormat>,
        pub fail_decode: bool,
        pub fail_encode: bool,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Decode {
            len: usize,
        },
        Encode {
            format: OutputFormat,
            width: u32,
            height: u32,
            quality: u32,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn without_formats(formats: &[OutputFormat]) -> Self {
            Self {
                unsupported: formats.to_vec(),
                ..Self::default()
            }
        }

        pub fn failing_decode() -> Self {
            Self {
                fail_decode: true,
                ..Self::default()
            }
        }

        pub fn failing_encode() -> Self {
            Self {
                fail_encode: true,
                ..Self::default()
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn encodes(&self) -> Vec<RecordedOp> {
            self.get_operations()
                .into_iter()
                .filter(|op| matches!(op, RecordedOp::Encode { .. }))
                .collect()
        }
    }

    impl RasterBackend for MockBackend {
        fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Decode { len: bytes.len() });
            if self.fail_decode {
                return Err(BackendError::Decode("mock decode failure".into()));
            }
            self.inner.decode(bytes)
        }

        fn encode(
            &self,
            image: &DynamicImage,
            format: OutputFormat,
            quality: Quality,
        ) -> Result<Vec<u8>, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Encode {
                format,
                width: image.width(),
                height: image.height(),
                quality: quality.value(),
            });
            if self.fail_encode {
                return Err(BackendError::Encode {
                    format,
                    message: "mock encode failure".into(),
                });
            }
            if self.unsupported.contains(&format) {
                return self.inner.encode(image, OutputFormat::Png, quality);
            }
            self.inner.encode(image, format, quality)
        }
    }

    #[test]
    fn mock_records_encode() {
        let backend = MockBackend::new();
        let img = DynamicImage::new_rgb8(8, 4);
        backend
            .encode(&img, OutputFormat::Jpeg, Quality::new(70))
            .unwrap();

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0],
            RecordedOp::Encode {
                format: OutputFormat::Jpeg,
                width: 8,
                height: 4,
                quality: 70
            }
        ));
    }

    #[test]
    fn mock_substitutes_png_for_unsupported() {
        let backend = MockBackend::without_formats(&[OutputFormat::WebP]);
        let img = DynamicImage::new_rgb8(2, 2);
        let bytes = backend
            .encode(&img, OutputFormat::WebP, Quality::default())
            .unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn mock_decode_failure() {
        let backend = MockBackend::failing_decode();
        assert!(backend.decode(&[0xFF, 0xD8]).is_err());
        assert_eq!(backend.get_operations(), vec![RecordedOp::Decode { len: 2 }]);
    }
}
