//! Image processing in pure Rust, on the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **IPTC metadata** | custom parser (JPEG APP13 + TIFF IFD) |
//! | **Resize / Fit / Fill** | `resize_exact`, `thumbnail_exact`, `crop_imm` |
//! | **Filter chains** | `image` color and blur operations |
//! | **Palette preservation** | `imageops::dither` with the source PNG palette |
//!
//! The module is split into:
//! - **Spec**: parsing transformation strings into a [`TransformConfig`]
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Quality and filter value types
//! - **Operations**: Planning the geometry steps of one transformation
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
pub mod calculations;
pub mod iptc;
pub mod operations;
pub mod palette;
pub mod params;
pub mod rust_backend;
pub mod spec;

pub use backend::{BackendError, Dimensions, ImageBackend, ImageMetadata, PixelFormat};
pub use params::{Filter, FilterParseError, Quality};
pub use rust_backend::RustBackend;
pub use spec::{Action, Anchor, ResampleFilter, SpecError, TransformConfig};
