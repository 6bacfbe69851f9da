//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the seam between the derivation core and the
//! pixel library. The core decides *when* to decode, transform, encode or
//! read metadata and how often; the backend decides *how*.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests wrap it in a counting backend to observe how many times the
//! expensive operations actually run.

use super::params::Quality;
use super::spec::TransformConfig;
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

/// Backend failures. `Clone` so one failed build can be reported to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("transform failed: {0}")]
    Transform(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("metadata decode failed: {0}")]
    Metadata(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Encoded pixel format of a resource, taken from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Jpeg,
    Png,
    Gif,
    Tiff,
    WebP,
    Bmp,
}

impl PixelFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(PixelFormat::Jpeg),
            "png" => Some(PixelFormat::Png),
            "gif" => Some(PixelFormat::Gif),
            "tif" | "tiff" => Some(PixelFormat::Tiff),
            "webp" => Some(PixelFormat::WebP),
            "bmp" => Some(PixelFormat::Bmp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether encoding takes a quality setting.
    pub fn is_lossy(self) -> bool {
        self == PixelFormat::Jpeg
    }

    /// Whether the format can carry embedded structured metadata.
    pub fn supports_metadata(self) -> bool {
        matches!(self, PixelFormat::Jpeg | PixelFormat::Tiff)
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            PixelFormat::Jpeg => image::ImageFormat::Jpeg,
            PixelFormat::Png => image::ImageFormat::Png,
            PixelFormat::Gif => image::ImageFormat::Gif,
            PixelFormat::Tiff => image::ImageFormat::Tiff,
            PixelFormat::WebP => image::ImageFormat::WebP,
            PixelFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

/// Embedded image metadata extracted from IPTC fields.
///
/// Field mapping:
/// - `title`: IPTC Object Name (`2:05`)
/// - `keywords`: IPTC Keywords (`2:25`), repeatable
/// - `date_created`: IPTC Date Created (`2:55`), `YYYYMMDD` as stored
/// - `byline`: IPTC By-line (`2:80`)
/// - `city`: IPTC City (`2:90`)
/// - `copyright`: IPTC Copyright Notice (`2:116`)
/// - `caption`: IPTC Caption-Abstract (`2:120`)
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImageMetadata {
    pub title: Option<String>,
    pub caption: Option<String>,
    pub keywords: Vec<String>,
    pub byline: Option<String>,
    pub copyright: Option<String>,
    pub city: Option<String>,
    pub date_created: Option<String>,
}

impl ImageMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Trait for image processing backends.
///
/// Implementations must be shareable across worker threads: the derivation
/// core calls them concurrently for different keys.
pub trait ImageBackend: Send + Sync {
    /// Read dimensions without a full decode where the format allows it.
    fn identify(&self, bytes: &[u8], format: PixelFormat) -> Result<Dimensions, BackendError>;

    /// Decode encoded bytes to pixels.
    fn decode(&self, bytes: &[u8], format: PixelFormat) -> Result<DynamicImage, BackendError>;

    /// Apply one transformation (resize, fit, fill or filter chain).
    fn transform(
        &self,
        image: DynamicImage,
        config: &TransformConfig,
    ) -> Result<DynamicImage, BackendError>;

    /// Encode pixels. `quality` is only meaningful for lossy formats.
    fn encode(
        &self,
        image: &DynamicImage,
        format: PixelFormat,
        quality: Option<Quality>,
    ) -> Result<Vec<u8>, BackendError>;

    /// Decode embedded structured metadata from the original bytes.
    fn read_metadata(
        &self,
        bytes: &[u8],
        format: PixelFormat,
    ) -> Result<ImageMetadata, BackendError>;
}
