//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Derivations
//!
//! ```text
//! Sunset (900x562)
//!     Source: content/a/sunset.jpg
//!     300x200 → /a/sunset_hu3f5a…_90587_300x200_resize_q75_box.jpg (300x200)
//!     x200 r90 → /a/sunset_hu3f5a…_90587_0x200_resize_q75_r90_box.jpg (125x200)
//!     200x q300: resize content/a/sunset.jpg: quality "q300" out of range, must be 1-100
//! Cache: 2 built
//! ```
//!
//! ## Metadata
//!
//! ```text
//! Sunset (900x562)
//!     Source: content/a/sunset.jpg
//!     Title: Sunset
//!     Keywords: beach, evening
//! ```
//!
//! ## Cache listing
//!
//! ```text
//! resources/_gen/images
//!     a/sunset_hu3f5a…_90587_300x200_resize_q75_box.jpg (14.2 KiB)
//! 1 artifact, 14.2 KiB
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions do no I/O.

use crate::cache::PersistedArtifact;
use crate::imaging::ImageMetadata;
use crate::process::{ImageResource, ProcessError};
use std::path::Path;

const CAPTION_WIDTH: usize = 72;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Byte count in B, KiB or MiB with one decimal.
fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < KIB * KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{:.1} MiB", b / (KIB * KIB))
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Source and derivations
// ============================================================================

/// Header for a source image: title and size, then its file.
pub fn format_source(img: &ImageResource, title: Option<&str>) -> Vec<String> {
    let name = title.unwrap_or(img.target_path());
    vec![
        format!("{} ({}x{})", name, img.width(), img.height()),
        format!("{}Source: {}", indent(1), img.root().source_file().display()),
    ]
}

pub fn print_source(img: &ImageResource) {
    for line in format_source(img, img.display_title().as_deref()) {
        println!("{}", line);
    }
}

/// One line per requested derivation: target path and size, or the error.
pub fn format_derivation(label: &str, result: &Result<ImageResource, ProcessError>) -> String {
    match result {
        Ok(img) => format!(
            "{}{} → {} ({}x{})",
            indent(1),
            label,
            img.target_path(),
            img.width(),
            img.height()
        ),
        Err(e) => format!("{}{}: {}", indent(1), label, e),
    }
}

pub fn print_derivation(label: &str, result: &Result<ImageResource, ProcessError>) {
    println!("{}", format_derivation(label, result));
}

// ============================================================================
// Metadata
// ============================================================================

/// Embedded metadata fields, skipping the empty ones.
pub fn format_metadata(metadata: Option<&ImageMetadata>) -> Vec<String> {
    let Some(meta) = metadata.filter(|m| !m.is_empty()) else {
        return vec![format!("{}(no embedded metadata)", indent(1))];
    };

    let keywords = (!meta.keywords.is_empty()).then(|| meta.keywords.join(", "));
    let caption = meta.caption.as_deref().map(|c| truncate(c, CAPTION_WIDTH));
    let fields = [
        ("Title", meta.title.as_deref()),
        ("Caption", caption.as_deref()),
        ("Keywords", keywords.as_deref()),
        ("By-line", meta.byline.as_deref()),
        ("Copyright", meta.copyright.as_deref()),
        ("City", meta.city.as_deref()),
        ("Date created", meta.date_created.as_deref()),
    ];

    fields
        .into_iter()
        .filter_map(|(label, value)| value.map(|v| format!("{}{}: {}", indent(1), label, v)))
        .collect()
}

pub fn print_metadata(metadata: Option<&ImageMetadata>) {
    for line in format_metadata(metadata) {
        println!("{}", line);
    }
}

// ============================================================================
// Cache listing
// ============================================================================

pub fn format_artifacts(cache_dir: &Path, artifacts: &[PersistedArtifact]) -> Vec<String> {
    let mut lines = vec![cache_dir.display().to_string()];
    lines.extend(
        artifacts
            .iter()
            .map(|a| format!("{}{} ({})", indent(1), a.path, human_bytes(a.bytes))),
    );
    let total: u64 = artifacts.iter().map(|a| a.bytes).sum();
    lines.push(format!(
        "{}, {}",
        plural(artifacts.len(), "artifact"),
        human_bytes(total)
    ));
    lines
}

pub fn print_artifacts(cache_dir: &Path, artifacts: &[PersistedArtifact]) {
    for line in format_artifacts(cache_dir, artifacts) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
