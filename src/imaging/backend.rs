//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two primitives the variant cache
//! needs: identify (probe dimensions from raw bytes) and resize (scale to a
//! target size and encode to an output format, writing the result to disk).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording `MockBackend` below.

use super::params::ResizeParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// Backends work on in-memory bytes because sources may come from the network
/// as well as from disk. `Sync` is required so the tree walker can share one
/// backend across rayon workers.
pub trait ImageBackend: Sync {
    /// Read intrinsic dimensions without a full decode where the format allows.
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError>;

    /// Resize `params.source` to exactly `params.width` x `params.height` and
    /// encode it as `params.format` into `params.output`.
    ///
    /// Returns the dimensions of the written image.
    fn resize(&self, params: &ResizeParams<'_>) -> Result<Dimensions, BackendError>;
}
