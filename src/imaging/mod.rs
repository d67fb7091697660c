//! Image processing primitives.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Resize → JPEG/WebP/AVIF** | Lanczos3 + `image` encoders (rav1e for AVIF) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{DEFAULT_MAX_WIDTH, target_dimensions, target_width};
pub use params::{OutputFormat, Quality, ResizeParams};
pub use rust_backend::RustBackend;
