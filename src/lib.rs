//! # derivo
//!
//! On-demand image derivation with a build-once cache.
//!
//! Open a source image, ask for `resize`, `fit`, `fill` or a filter chain,
//! and get back a new image resource with a deterministic, content-addressed
//! file name. Identical requests are computed at most once, even when many
//! threads ask at the same moment, and the results survive restarts in a
//! persisted cache directory.
//!
//! ```no_run
//! use derivo::config::ImagingConfig;
//! use derivo::process::Processor;
//!
//! let processor = Processor::new(ImagingConfig::default());
//! let img = processor.open("content/a/sunset.jpg", "/a/sunset.jpg")?;
//! let thumb = img.fill("200x100 bottomLeft q80")?;
//! println!("{} ({}x{})", thumb.target_path(), thumb.width(), thumb.height());
//! # Ok::<(), derivo::process::ProcessError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! spec string ─► imaging::spec ─► naming ─► cache ─► throttle ─► imaging backend
//!                  (config key)   (target    (single    (bounded     (decode, transform,
//!                                  path)      flight)    slots)       encode)
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`process`] | Orchestrator: `Processor`, source images, derived images and their lineage |
//! | [`cache`] | Single-flight derivation cache over a memory tier and a persisted file tier |
//! | [`naming`] | Content-addressed target paths with a bounded length |
//! | [`throttle`] | Caps concurrent decode+transform work |
//! | [`metadata`] | Lazily extracted, memoized IPTC metadata and title resolution |
//! | [`imaging`] | Spec parsing, dimension math, and the `image`-crate backend |
//! | [`config`] | `derivo.toml` loading, merging, and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Replay From The Root
//!
//! A derived image never keeps pixels. It records the ordered configs that
//! produced it, and building it always starts from the root's original
//! bytes. Chains like `fit` then `fill` therefore pay for one JPEG
//! generation, not two.
//!
//! ## Names Are Keys
//!
//! A derived file name embeds a hash of the source bytes and the canonical
//! config key, so the persisted cache needs no index: if the file exists, it
//! is the right one. Changing the source changes every name derived from it.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate only. No ImageMagick, no
//! system libraries: the binary is self-contained.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod process;
pub mod throttle;

#[cfg(test)]
pub(crate) mod test_helpers;
