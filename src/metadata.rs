//! Lazily extracted, memoized image metadata.
//!
//! Structured metadata (IPTC title, caption, keywords, ...) belongs to an
//! original source, never to a derivative: a resized copy carries whatever
//! its source carried. Every [`SourceImage`](crate::process::SourceImage)
//! owns one [`MetadataCell`], and every resource derived from it reads
//! through that same cell.
//!
//! ## Once per source
//!
//! The first query decides:
//!
//! - the format cannot carry metadata (PNG, GIF, WebP, BMP) → `Ok(None)`,
//!   without touching the file;
//! - otherwise the original bytes are read and decoded, and the metadata or
//!   the error is stored.
//!
//! Either outcome is kept for the life of the source. Concurrent first
//! queries block on the one running extraction and then share its result.
//!
//! ## Title resolution
//!
//! A resource's display title comes from the first non-empty of: an
//! explicitly assigned title, the embedded IPTC title, the file stem. See
//! [`resolve`].

use crate::imaging::{BackendError, ImageMetadata, PixelFormat};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone)]
pub enum MetadataError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: Arc<io::Error>,
    },
    #[error(transparent)]
    Decode(#[from] BackendError),
}

pub type MetadataResult = Result<Option<Arc<ImageMetadata>>, MetadataError>;

/// Compute-once cell for one source's metadata.
#[derive(Debug, Default)]
pub struct MetadataCell {
    cell: OnceLock<MetadataResult>,
}

impl MetadataCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized metadata, running `load` on the first call only.
    ///
    /// `load` is skipped entirely when `format` cannot carry metadata.
    pub fn get_or_load<F>(&self, format: PixelFormat, load: F) -> MetadataResult
    where
        F: FnOnce() -> Result<ImageMetadata, MetadataError>,
    {
        self.cell
            .get_or_init(|| {
                if !format.supports_metadata() {
                    debug!(?format, "format carries no metadata");
                    return Ok(None);
                }
                load().map(|meta| Some(Arc::new(meta)))
            })
            .clone()
    }

    /// Whether extraction has already run (or been skipped).
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Resolve a metadata field from multiple sources.
///
/// Takes a list of optional values in priority order and returns the first
/// non-None, non-empty value.
///
/// ```text
/// title: resolve(&[assigned_title, iptc_title, file_stem])
/// ```
pub fn resolve(sources: &[Option<&str>]) -> Option<String> {
    sources
        .iter()
        .filter_map(|opt| {
            opt.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        })
        .next()
}
