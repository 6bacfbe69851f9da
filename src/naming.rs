//! Deterministic target paths for derived images.
//!
//! A target path is built from the path of the resource being transformed,
//! the identity tag of the original source, and the config key:
//!
//! ```text
//! /a/sunset.jpg
//!   → /a/sunset_hu<hash>_90587_300x200_resize_q68_linear.jpg
//!   → /a/sunset_hu<hash>_90587_<hash of base + key + ext>.jpg
//! ```
//!
//! The second step is a derivative of the first; with a full-length tag the
//! chained name is already past the length bound and collapses.
//!
//! ## Identity Tag
//!
//! `_hu<hash>_<size>`: the first 32 hex digits of the SHA-256 of the source
//! bytes, plus the byte size. Every derivative of a source carries the same
//! tag, so a chained name repeats it only once.
//!
//! ## Length Bound
//!
//! When base name, tag and extension together exceed [`HASH_THRESHOLD`]
//! characters the readable key is replaced with a hash of
//! `base + key + ext`, and the base is cut back to the text before its first
//! `_hu` marker, or dropped entirely if it has none.
//! Readability is traded for a bounded name.

use crate::imaging::Action;
use sha2::{Digest, Sha256};

/// Names longer than this (base + tag + extension) are collapsed.
pub const HASH_THRESHOLD: usize = 100;

const TAG_MARKER: &str = "_hu";

/// First 32 hex digits of the SHA-256 of `data`.
pub fn short_hash(data: impl AsRef<[u8]>) -> String {
    let digest = format!("{:x}", Sha256::digest(data.as_ref()));
    digest[..32].to_string()
}

/// `_hu<hash>_<size>` for a source with the given content hash and byte size.
pub fn identity_tag(content_hash: &str, size: u64) -> String {
    format!("{TAG_MARKER}{content_hash}_{size}")
}

/// Split `path` into directory (with trailing `/`), base name and extension
/// (with leading `.`). Missing parts are empty.
pub fn split_path(path: &str) -> (&str, &str, &str) {
    let (dir, file) = match path.rfind('/') {
        Some(i) => path.split_at(i + 1),
        None => ("", path),
    };
    match file.rfind('.') {
        Some(i) if i > 0 => {
            let (base, ext) = file.split_at(i);
            (dir, base, ext)
        }
        _ => (dir, file, ""),
    }
}

/// Target path for transforming the resource at `origin` with config `key`.
///
/// `tag` is the identity tag of the root source. Pure: the same inputs always
/// produce the same path.
pub fn target_path(origin: &str, tag: &str, key: &str, action: Action) -> String {
    let (dir, base, ext) = split_path(origin);
    let ext = if action == Action::Trace { ".svg" } else { ext };

    let mut base = base;
    let mut tag = tag;
    let key = if base.len() + tag.len() + ext.len() > HASH_THRESHOLD {
        let hashed = short_hash(format!("{base}{key}{ext}"));
        base = match base.find(TAG_MARKER) {
            Some(i) => &base[..i],
            None => "",
        };
        hashed
    } else {
        if base.contains(tag) {
            tag = "";
        }
        key.to_string()
    };

    format!("{dir}{base}{tag}_{key}{ext}")
}
