//! # photoprep
//!
//! Prepares user photographs for upload to an image service: corrects camera
//! orientation, resizes and crops to bounds, compresses to a byte budget,
//! negotiates the best output encoding the host can produce, validates
//! structure and integrity, and renders fast low-resolution previews while
//! full processing runs on a bounded background pool.
//!
//! Everything operates on in-memory byte payloads ([`types::ImageAsset`]).
//! No file format or wire protocol is owned here.
//!
//! # Data Flow
//!
//! ```text
//! ImageAsset ─► validate ─► orientation ─► plan ─► pool task ─► raster ─► encode
//!                                                      │
//!              preview (fast path, cached) ◄───────────┘
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | `ImageAsset` and byte-signature sniffing |
//! | [`imaging`] | EXIF orientation, transform planning, raster engine, format negotiation |
//! | [`validate`] | Size, type, signature, dimension, aspect and corruption checks |
//! | [`compress`] | Quality descent then down-scaling toward a byte budget |
//! | [`process`] | Format conversion and full transform pipelines |
//! | [`preview`] | Preview rendering behind a TTL/LRU cache |
//! | [`pool`] | Bounded worker slots with timeouts, crash recovery and shutdown |
//! | [`engine`] | Facade owning the backend, capability cache, previews and pool |
//! | [`config`] | `photoprep.toml` loading, merging and validation |
//! | [`output`] | CLI report formatting |
//!
//! # Design Decisions
//!
//! ## Results, Not Errors
//!
//! Compression, conversion and processing return result structs with a
//! `success` flag and keep the original asset on failure, so a caller
//! always has something to upload. Only configuration misuse fails with
//! `Err`.
//!
//! ## One Seam to the Host
//!
//! Decoding and encoding go through the [`imaging::RasterBackend`] trait.
//! Geometry is done once, in [`imaging::raster`], so every backend produces
//! identical transforms and tests can substitute a recording mock.
//!
//! ## Threads, Not an Async Runtime
//!
//! The pool is a scheduler thread plus worker-slot threads talking over
//! channels. Task handles are futures (`futures::channel::oneshot`) so async
//! callers can await them, while synchronous callers use
//! [`pool::TaskHandle::wait`].

pub mod compress;
pub mod config;
pub mod engine;
pub mod error;
pub mod imaging;
pub mod output;
pub mod pool;
pub mod preview;
pub mod process;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_helpers;
