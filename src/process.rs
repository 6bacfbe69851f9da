//! Resource lineage and the transformation orchestrator.
//!
//! A [`Processor`] opens source images and derives new images from them.
//! Every derivation goes through the same steps:
//!
//! ```text
//! spec string ──parse──► TransformConfig ──key──► target path + cache key
//!                                                        │
//!                                      DerivationCache::get_or_create
//!                                        │ hit         │ persisted     │ miss
//!                                        ▼             ▼               ▼
//!                                     rendition    identify bytes   throttle slot
//!                                                                   decode root bytes
//!                                                                   replay lineage + step
//!                                                                   re-quantize palette
//!                                                                   encode, persist
//! ```
//!
//! ## Lineage
//!
//! Derived images never hold pixels. Each one records the ordered list of
//! configs that produced it from its root, and a build always decodes the
//! root's original bytes and replays that list. Re-encoding losses therefore
//! never accumulate along a chain.
//!
//! Every [`ImageResource`] points straight at its root [`SourceImage`]: the
//! topology is a star, not a chain of parents, so identity and metadata
//! lookups are one hop from any derivative.
//!
//! ## Errors
//!
//! Errors carry the operation (`resize`, `fit`, `fill`, `filter`, `trace`,
//! `metadata` or `open`) and the path of the originating source file.

use crate::cache::{CacheError, CacheKey, CacheStats, DerivationCache, PersistedArtifact};
use crate::config::ImagingConfig;
use crate::imaging::palette::{self, Palette};
use crate::imaging::{
    Action, BackendError, Filter, ImageBackend, ImageMetadata, PixelFormat, Quality, RustBackend,
    SpecError, TransformConfig,
};
use crate::metadata::{self, MetadataCell, MetadataError};
use crate::naming;
use crate::throttle::Throttle;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: OperationError,
    },
    #[error("{op} {}: {source}", path.display())]
    Operation {
        op: Action,
        path: PathBuf,
        source: OperationError,
    },
    #[error("metadata {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        source: MetadataError,
    },
}

/// What went wrong inside one operation.
#[derive(Error, Debug, Clone)]
pub enum OperationError {
    #[error(transparent)]
    Config(#[from] SpecError),
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("cannot read source: {0}")]
    Read(Arc<io::Error>),
    #[error("target path {0:?} leaves the output root")]
    UnsafeTarget(String),
    #[error("source changed since it was opened")]
    SourceChanged,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<io::Error> for OperationError {
    fn from(e: io::Error) -> Self {
        OperationError::Read(Arc::new(e))
    }
}

/// Content identity of a source: hash of its bytes plus byte size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub hash: String,
    pub size: u64,
}

impl Identity {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            hash: naming::short_hash(bytes),
            size: bytes.len() as u64,
        }
    }

    /// `_hu<hash>_<size>`, shared by every derivative of the source.
    pub fn tag(&self) -> String {
        naming::identity_tag(&self.hash, self.size)
    }
}

/// An original image: head of every derivation chain.
#[derive(Debug)]
pub struct SourceImage {
    source_file: PathBuf,
    identity: Identity,
    tag: String,
    format: PixelFormat,
    palette: Option<Palette>,
    metadata: MetadataCell,
}

impl SourceImage {
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Palette of an indexed PNG source.
    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    /// Whether metadata extraction has run for this source.
    pub fn metadata_loaded(&self) -> bool {
        self.metadata.is_loaded()
    }
}

/// Pixel-free description of one image: where it lives and how it was made.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub target_path: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Configs applied to the root, in order. Empty for a root.
    pub lineage: Vec<TransformConfig>,
}

type RenditionCache = DerivationCache<Arc<Rendition>, OperationError>;

struct Inner {
    config: ImagingConfig,
    backend: Arc<dyn ImageBackend>,
    cache: RenditionCache,
    throttle: Throttle,
    sources: Mutex<HashMap<(PathBuf, Identity), Arc<SourceImage>>>,
}

/// Entry point: opens sources and owns the cache, throttle and backend
/// shared by everything derived from them. Cheap to clone.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

impl Processor {
    pub fn new(config: ImagingConfig) -> Self {
        Self::with_backend(config, Arc::new(RustBackend::new()))
    }

    pub fn with_backend(config: ImagingConfig, backend: Arc<dyn ImageBackend>) -> Self {
        let cache = DerivationCache::new(config.cache_dir.clone());
        let throttle = Throttle::new(config.workers);
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                cache,
                throttle,
                sources: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ImagingConfig {
        &self.inner.config
    }

    /// Open `source_file`, published at `target_path` (e.g. `/a/sunset.jpg`).
    ///
    /// Opening the same unchanged file twice yields the same [`SourceImage`],
    /// so its metadata is still extracted only once.
    pub fn open(
        &self,
        source_file: impl AsRef<Path>,
        target_path: &str,
    ) -> Result<ImageResource, ProcessError> {
        let source_file = source_file.as_ref();
        let open_err = |source: OperationError| ProcessError::Open {
            path: source_file.to_path_buf(),
            source,
        };

        let format = PixelFormat::from_path(source_file)
            .ok_or_else(|| open_err(OperationError::UnsupportedFormat))?;
        let target_path = normalize_target(target_path).map_err(open_err)?;
        let bytes = fs::read(source_file).map_err(|e| open_err(e.into()))?;
        let dims = self
            .inner
            .backend
            .identify(&bytes, format)
            .map_err(|e| open_err(e.into()))?;
        let identity = Identity::of(&bytes);

        let root = {
            let mut sources = self
                .inner
                .sources
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let entry = sources
                .entry((source_file.to_path_buf(), identity.clone()))
                .or_insert_with(|| {
                    Arc::new(SourceImage {
                        source_file: source_file.to_path_buf(),
                        tag: identity.tag(),
                        identity,
                        format,
                        palette: palette::source_palette(format, &bytes),
                        metadata: MetadataCell::new(),
                    })
                });
            Arc::clone(entry)
        };

        debug!(
            path = %source_file.display(),
            width = dims.width,
            height = dims.height,
            "opened source image"
        );

        Ok(ImageResource {
            processor: self.clone(),
            root,
            rendition: Arc::new(Rendition {
                target_path,
                width: dims.width,
                height: dims.height,
                format,
                lineage: Vec::new(),
            }),
            title: None,
        })
    }

    /// Drop every derived image held in memory. Persisted artifacts stay, so
    /// later requests rehydrate instead of rebuilding.
    pub fn clear_memory_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn cache_dir(&self) -> &Path {
        self.inner.cache.root()
    }

    pub fn persisted_artifacts(&self) -> Result<Vec<PersistedArtifact>, CacheError> {
        self.inner.cache.persisted_artifacts()
    }
}

/// `/`-separated with a single leading `/`, no empty or `.` segments.
/// Paths with `..` or without a file name are rejected.
fn normalize_target(path: &str) -> Result<String, OperationError> {
    let unsafe_target = || OperationError::UnsafeTarget(path.to_string());
    let slashed = path.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in slashed.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(unsafe_target()),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(unsafe_target());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// A source image or one of its derivatives.
///
/// Immutable: every transformation returns a new resource (or the cached
/// one for an identical request).
#[derive(Clone)]
pub struct ImageResource {
    processor: Processor,
    root: Arc<SourceImage>,
    rendition: Arc<Rendition>,
    title: Option<String>,
}

impl fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResource")
            .field("target_path", &self.rendition.target_path)
            .field("width", &self.rendition.width)
            .field("height", &self.rendition.height)
            .field("title", &self.title)
            .finish()
    }
}

impl ImageResource {
    pub fn resize(&self, spec: &str) -> Result<ImageResource, ProcessError> {
        self.transform(Action::Resize, spec)
    }

    pub fn fit(&self, spec: &str) -> Result<ImageResource, ProcessError> {
        self.transform(Action::Fit, spec)
    }

    pub fn fill(&self, spec: &str) -> Result<ImageResource, ProcessError> {
        self.transform(Action::Fill, spec)
    }

    /// Apply an ordered filter chain.
    pub fn filter(&self, filters: Vec<Filter>) -> Result<ImageResource, ProcessError> {
        let config = TransformConfig::from_filters(filters, &self.processor.inner.config);
        self.derive(config)
    }

    /// Parse `spec` for `action` and derive.
    pub fn transform(&self, action: Action, spec: &str) -> Result<ImageResource, ProcessError> {
        let config = TransformConfig::parse(action, spec, &self.processor.inner.config)
            .map_err(|e| self.op_error(action, e.into()))?;
        self.derive(config)
    }

    fn op_error(&self, op: Action, source: OperationError) -> ProcessError {
        ProcessError::Operation {
            op,
            path: self.root.source_file.clone(),
            source,
        }
    }

    #[instrument(level = "debug", skip_all, fields(action = %config.action, origin = %self.rendition.target_path))]
    fn derive(&self, config: TransformConfig) -> Result<ImageResource, ProcessError> {
        let inner = &self.processor.inner;
        let root = &self.root;
        let op = config.action;
        let format = self.rendition.format;

        let config = config.with_default_quality(format, Quality::new(inner.config.quality));
        let config_key = config.key(format);
        let target_path =
            naming::target_path(&self.rendition.target_path, &root.tag, &config_key, op);
        let key = CacheKey {
            source: format!("{}{}", root.tag, self.rendition.target_path),
            config: config_key,
        };
        let lineage: Vec<TransformConfig> = self
            .rendition
            .lineage
            .iter()
            .cloned()
            .chain(iter::once(config.clone()))
            .collect();

        let rehydrate = |bytes: &[u8]| -> Result<Arc<Rendition>, OperationError> {
            let dims = inner.backend.identify(bytes, format)?;
            Ok(Arc::new(Rendition {
                target_path: target_path.clone(),
                width: dims.width,
                height: dims.height,
                format,
                lineage: lineage.clone(),
            }))
        };

        let build = || -> Result<(Arc<Rendition>, Vec<u8>), OperationError> {
            let _permit = inner.throttle.acquire();
            let bytes = fs::read(&root.source_file)?;
            if Identity::of(&bytes) != root.identity {
                return Err(OperationError::SourceChanged);
            }
            let mut img = inner.backend.decode(&bytes, root.format)?;
            for step in &lineage {
                img = inner.backend.transform(img, step)?;
            }
            if let Some(palette) = &root.palette {
                img = palette::requantize(img, palette);
            }
            let encoded = inner.backend.encode(&img, format, config.quality)?;
            let rendition = Rendition {
                target_path: target_path.clone(),
                width: img.width(),
                height: img.height(),
                format,
                lineage: lineage.clone(),
            };
            Ok((Arc::new(rendition), encoded))
        };

        let rendition = inner
            .cache
            .get_or_create(&key, &target_path, rehydrate, build)
            .map_err(|e| self.op_error(op, e))?;

        Ok(ImageResource {
            processor: self.processor.clone(),
            root: Arc::clone(root),
            rendition,
            title: self.title.clone(),
        })
    }

    /// Embedded metadata of the root source, extracted at most once no matter
    /// how many derivatives ask.
    pub fn metadata(&self) -> Result<Option<Arc<ImageMetadata>>, ProcessError> {
        let root = &self.root;
        let backend = &self.processor.inner.backend;
        root.metadata
            .get_or_load(root.format, || {
                let bytes = fs::read(&root.source_file).map_err(|e| MetadataError::Read {
                    path: root.source_file.clone(),
                    source: Arc::new(e),
                })?;
                backend
                    .read_metadata(&bytes, root.format)
                    .map_err(MetadataError::from)
            })
            .map_err(|source| ProcessError::Metadata {
                path: root.source_file.clone(),
                source,
            })
    }

    /// A copy with a different title. Pixels, target path and cache entry
    /// are shared, nothing is rebuilt.
    pub fn with_title(&self, title: impl Into<String>) -> ImageResource {
        ImageResource {
            title: Some(title.into()),
            ..self.clone()
        }
    }

    /// Explicitly assigned title, inherited along derivations.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// First non-empty of: assigned title, embedded title, source file stem.
    pub fn display_title(&self) -> Option<String> {
        let embedded = self.metadata().ok().flatten();
        let stem = self.root.source_file.file_stem().and_then(|s| s.to_str());
        metadata::resolve(&[
            self.title.as_deref(),
            embedded.as_ref().and_then(|m| m.title.as_deref()),
            stem,
        ])
    }

    pub fn width(&self) -> u32 {
        self.rendition.width
    }

    pub fn height(&self) -> u32 {
        self.rendition.height
    }

    pub fn format(&self) -> PixelFormat {
        self.rendition.format
    }

    pub fn target_path(&self) -> &str {
        &self.rendition.target_path
    }

    pub fn rendition(&self) -> &Rendition {
        &self.rendition
    }

    pub fn root(&self) -> &SourceImage {
        &self.root
    }

    pub fn is_root(&self) -> bool {
        self.rendition.lineage.is_empty()
    }

    /// File holding this image's bytes: the source file for a root, the
    /// persisted artifact for a derivative.
    pub fn file_path(&self) -> PathBuf {
        if self.is_root() {
            self.root.source_file.clone()
        } else {
            self.processor
                .inner
                .cache
                .artifact_path(&self.rendition.target_path)
        }
    }

    /// Whether both resources share one rendition (a cache hit or a clone).
    pub fn same_rendition(&self, other: &ImageResource) -> bool {
        Arc::ptr_eq(&self.rendition, &other.rendition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::CountingBackend;
    use crate::imaging::{Anchor, ResampleFilter};
    use crate::test_helpers::*;
    use std::sync::atomic::Ordering;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(backend: CountingBackend) -> (TempDir, Processor, Arc<CountingBackend>) {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(backend);
        let processor = Processor::with_backend(test_config(tmp.path()), backend.clone());
        (tmp, processor, backend)
    }

    fn open_sunset(tmp: &TempDir, processor: &Processor) -> ImageResource {
        let file = write_file(tmp.path(), "sunset.jpg", &jpeg_bytes(900, 562));
        processor.open(&file, "/a/sunset.jpg").unwrap()
    }

    // =========================================================================
    // Open
    // =========================================================================

    #[test]
    fn open_reads_identity_and_dimensions() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let bytes = jpeg_bytes(900, 562);
        let file = write_file(tmp.path(), "sunset.jpg", &bytes);
        let img = processor.open(&file, "a/sunset.jpg").unwrap();

        assert_eq!((img.width(), img.height()), (900, 562));
        assert_eq!(img.target_path(), "/a/sunset.jpg");
        assert!(img.is_root());
        assert_eq!(img.root().identity().size, bytes.len() as u64);
        assert_eq!(img.root().identity().hash, naming::short_hash(&bytes));
        assert_eq!(img.file_path(), file);
    }

    #[test]
    fn open_unsupported_extension() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "notes.txt", b"hello");
        let err = processor.open(&file, "/notes.txt").unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Open {
                source: OperationError::UnsupportedFormat,
                ..
            }
        ));
    }

    #[test]
    fn open_normalizes_target_path() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "sunset.jpg", &jpeg_bytes(40, 30));
        let img = processor.open(&file, "./a//b\\sunset.jpg").unwrap();
        assert_eq!(img.target_path(), "/a/b/sunset.jpg");
    }

    #[test]
    fn open_rejects_target_outside_output_root() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "sunset.jpg", &jpeg_bytes(40, 30));

        for target in ["/../../escaped/sunset.jpg", "a/../../sunset.jpg", "..\\x.jpg", "/", ""] {
            let err = processor.open(&file, target).unwrap_err();
            assert!(
                matches!(
                    err,
                    ProcessError::Open {
                        source: OperationError::UnsafeTarget(_),
                        ..
                    }
                ),
                "{target}: {err}"
            );
        }
        assert_eq!(backend.decodes(), 0);
        assert!(!tmp.path().parent().unwrap().join("escaped").exists());
    }

    #[test]
    fn open_missing_file() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let err = processor
            .open(tmp.path().join("gone.jpg"), "/gone.jpg")
            .unwrap_err();
        assert!(err.to_string().starts_with("open "));
        assert!(err.to_string().contains("gone.jpg"));
    }

    // =========================================================================
    // Derivation
    // =========================================================================

    #[test]
    fn resize_examples() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);

        for (spec, expected) in [
            ("300x200", (300, 200)),
            ("x200", (320, 200)),
            ("200x", (200, 125)),
            ("x200 r90", (125, 200)),
        ] {
            let out = img.resize(spec).unwrap();
            assert_eq!((out.width(), out.height()), expected, "{spec}");
        }
    }

    #[test]
    fn resize_target_path_carries_identity_and_key() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);
        let out = img.resize("300x200").unwrap();

        let tag = img.root().identity().tag();
        assert_eq!(
            out.target_path(),
            format!("/a/sunset{tag}_300x200_resize_q68_linear.jpg")
        );
        assert!(out.file_path().exists());
        assert!(out.file_path().starts_with(processor.cache_dir()));
    }

    #[test]
    fn fill_bottom_left_exact_size() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);
        let out = img.fill("200x100 bottomLeft").unwrap();
        assert_eq!((out.width(), out.height()), (200, 100));
        assert!(
            out.target_path()
                .ends_with("_200x100_fill_q68_linear_bottomleft.jpg")
        );
    }

    #[test]
    fn chained_fit_replays_from_root() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "small.jpg", &jpeg_bytes(300, 200));
        let img = processor.open(&file, "/small.jpg").unwrap();

        let fitted = img.fit("50x50").unwrap();
        assert_eq!((fitted.width(), fitted.height()), (50, 33));
        let again = fitted.fit("10x20").unwrap();
        assert_eq!((again.width(), again.height()), (10, 7));
        assert_eq!(again.rendition().lineage.len(), 2);

        // Two builds, each decoding the root once.
        assert_eq!(backend.decodes(), 2);
        assert_eq!(backend.transforms(), 3);
    }

    #[test]
    fn repeat_request_hits_memory() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);

        let a = img.resize("300x200").unwrap();
        let b = img.resize("300x200 linear").unwrap();
        assert!(a.same_rendition(&b));
        assert_eq!(backend.transforms(), 1);
        assert_eq!(processor.cache_stats().hits, 1);
    }

    #[test]
    fn concurrent_requests_build_once() {
        let (tmp, processor, backend) = setup(CountingBackend::slow(Duration::from_millis(100)));
        let img = open_sunset(&tmp, &processor);
        let barrier = Barrier::new(6);

        let paths: Vec<String> = thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        img.resize("x200").unwrap().target_path().to_string()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(backend.decodes(), 1);
        assert_eq!(backend.transforms(), 1);
    }

    #[test]
    fn clear_then_rehydrate() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);

        let before = img.resize("200x").unwrap();
        processor.clear_memory_cache();
        let after = img.resize("200x").unwrap();

        assert_eq!(before.target_path(), after.target_path());
        assert_eq!((before.width(), before.height()), (after.width(), after.height()));
        assert!(!before.same_rendition(&after));
        assert_eq!(backend.transforms(), 1);
        assert_eq!(processor.cache_stats().rehydrations, 1);
    }

    #[test]
    fn failed_build_is_reported_and_retried() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);

        backend.fail_transforms.store(true, Ordering::SeqCst);
        let err = img.resize("300x200").unwrap_err();
        assert!(err.to_string().starts_with("resize "));
        assert!(err.to_string().contains("sunset.jpg"));
        assert!(processor.persisted_artifacts().unwrap().is_empty());

        backend.fail_transforms.store(false, Ordering::SeqCst);
        let ok = img.resize("300x200").unwrap();
        assert_eq!((ok.width(), ok.height()), (300, 200));
        assert_eq!(backend.transforms(), 2);
    }

    #[test]
    fn bad_spec_names_operation_and_token() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);
        let err = img.fill("200x100 q300").unwrap_err();
        assert!(matches!(
            &err,
            ProcessError::Operation {
                op: Action::Fill,
                source: OperationError::Config(SpecError::QualityOutOfRange(_)),
                ..
            }
        ));
        assert!(err.to_string().contains("q300"));
        assert_eq!(backend.decodes(), 0);
    }

    #[test]
    fn trace_is_named_svg_but_unsupported() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);
        let err = img.transform(Action::Trace, "").unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Operation {
                op: Action::Trace,
                source: OperationError::Backend(BackendError::Unsupported(_)),
                ..
            }
        ));
    }

    #[test]
    fn filter_chain_keeps_size() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);
        let grey = img
            .filter(vec![Filter::Grayscale, Filter::GaussianBlur { sigma: 1.5 }])
            .unwrap();
        assert_eq!((grey.width(), grey.height()), (900, 562));
        assert!(grey.target_path().contains("_filter_"));

        let reordered = img
            .filter(vec![Filter::GaussianBlur { sigma: 1.5 }, Filter::Grayscale])
            .unwrap();
        assert_ne!(grey.target_path(), reordered.target_path());
    }

    #[test]
    fn png_keys_have_no_quality() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "logo.png", &png_bytes(64, 32));
        let img = processor.open(&file, "/logo.png").unwrap();
        let out = img.resize("32x").unwrap();
        assert!(out.target_path().ends_with("_32x0_resize_linear.png"));
        assert_eq!((out.width(), out.height()), (32, 16));
    }

    #[test]
    fn indexed_png_keeps_its_palette() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let colors = [[200, 30, 30], [20, 20, 160]];
        let file = write_file(
            tmp.path(),
            "flag.png",
            &indexed_png_bytes(16, 16, &colors, |x, _| (x < 8) as u8),
        );
        let img = processor.open(&file, "/flag.png").unwrap();
        assert_eq!(img.root().palette().map(|p| p.len()), Some(2));

        let out = img.resize("5x5 linear").unwrap();
        let decoded = image::open(out.file_path()).unwrap().to_rgba8();
        for p in decoded.pixels() {
            let rgb = [p.0[0], p.0[1], p.0[2]];
            assert!(colors.contains(&rgb), "{rgb:?} not in palette");
        }
    }

    #[test]
    fn indexed_gif_keeps_its_palette() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let colors = [[200, 30, 30], [20, 20, 160], [240, 240, 240]];
        let file = write_file(
            tmp.path(),
            "flag.gif",
            &indexed_gif_bytes(16, 16, &colors, |x, y| ((x / 6 + y / 8) % 3) as u8),
        );
        let img = processor.open(&file, "/flag.gif").unwrap();
        let palette = img.root().palette().unwrap();
        assert_eq!(palette.len(), 4);

        let out = img.resize("7x7 linear").unwrap();
        assert!(out.target_path().ends_with(".gif"));
        let decoded = image::open(out.file_path()).unwrap().to_rgba8();
        for p in decoded.pixels() {
            assert!(palette.contains(p), "{p:?} not in palette");
        }
    }

    #[test]
    fn source_changed_after_open_is_not_built() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);
        write_file(tmp.path(), "sunset.jpg", &jpeg_bytes(300, 200));

        let err = img.resize("100x").unwrap_err();
        assert!(
            matches!(
                err,
                ProcessError::Operation {
                    op: Action::Resize,
                    source: OperationError::SourceChanged,
                    ..
                }
            ),
            "{err}"
        );
        assert_eq!(backend.decodes(), 0);
        assert!(processor.persisted_artifacts().unwrap().is_empty());

        // Reopening picks up the new content.
        let reopened = processor.open(tmp.path().join("sunset.jpg"), "/a/sunset.jpg").unwrap();
        assert_eq!(reopened.resize("100x").unwrap().height(), 67);
    }

    // =========================================================================
    // Metadata and titles
    // =========================================================================

    #[test]
    fn metadata_shared_by_derivatives() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let file = write_file(
            tmp.path(),
            "sunset.jpg",
            &iptc_jpeg_bytes(120, 80, "Sunset", &["beach"]),
        );
        let img = processor.open(&file, "/sunset.jpg").unwrap();
        let small = img.resize("60x").unwrap();

        let a = img.metadata().unwrap();
        let b = small.metadata().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.unwrap().title.as_deref(), Some("Sunset"));
        assert_eq!(backend.metadata_reads(), 1);
    }

    #[test]
    fn metadata_for_png_is_empty_without_reading() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "logo.png", &png_bytes(8, 8));
        let img = processor.open(&file, "/logo.png").unwrap();
        assert_eq!(img.metadata().unwrap(), None);
        assert_eq!(backend.metadata_reads(), 0);
    }

    #[test]
    fn reopening_shares_metadata() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "a.jpg", &iptc_jpeg_bytes(10, 10, "A", &[]));
        processor.open(&file, "/a.jpg").unwrap().metadata().unwrap();
        processor.open(&file, "/a.jpg").unwrap().metadata().unwrap();
        assert_eq!(backend.metadata_reads(), 1);
    }

    #[test]
    fn concurrent_metadata_reads_once() {
        let (tmp, processor, backend) = setup(CountingBackend::slow(Duration::from_millis(50)));
        let file = write_file(tmp.path(), "s.jpg", &iptc_jpeg_bytes(40, 40, "S", &[]));
        let img = processor.open(&file, "/s.jpg").unwrap();
        let derived = img.resize("20x").unwrap();

        thread::scope(|s| {
            for i in 0..8 {
                let r = if i % 2 == 0 { &img } else { &derived };
                s.spawn(move || r.metadata().unwrap());
            }
        });
        assert_eq!(backend.metadata_reads(), 1);
    }

    #[test]
    fn with_title_shares_rendition() {
        let (tmp, processor, backend) = setup(CountingBackend::new());
        let img = open_sunset(&tmp, &processor);
        let resized = img.resize("300x200").unwrap();
        let titled = resized.with_title("Evening");

        assert!(titled.same_rendition(&resized));
        assert_eq!(titled.target_path(), resized.target_path());
        assert_eq!(titled.title(), Some("Evening"));
        assert_eq!(resized.title(), None);
        assert_eq!(backend.transforms(), 1);

        let child = titled.fit("100x100").unwrap();
        assert_eq!(child.title(), Some("Evening"));
    }

    #[test]
    fn display_title_fallbacks() {
        let (tmp, processor, _) = setup(CountingBackend::new());
        let file = write_file(tmp.path(), "dunes.jpg", &iptc_jpeg_bytes(10, 10, "Dunes at dawn", &[]));
        let img = processor.open(&file, "/dunes.jpg").unwrap();
        assert_eq!(img.display_title().as_deref(), Some("Dunes at dawn"));
        assert_eq!(
            img.with_title("Mine").display_title().as_deref(),
            Some("Mine")
        );

        let plain = write_file(tmp.path(), "plain.png", &png_bytes(4, 4));
        let img = processor.open(&plain, "/plain.png").unwrap();
        assert_eq!(img.display_title().as_deref(), Some("plain"));
    }

    #[test]
    fn config_defaults_flow_into_keys() {
        let tmp = TempDir::new().unwrap();
        let config = ImagingConfig {
            quality: 90,
            resample_filter: ResampleFilter::Lanczos,
            anchor: Anchor::Top,
            cache_dir: tmp.path().join("cache"),
            ..ImagingConfig::default()
        };
        let processor = Processor::new(config);
        let img = open_sunset(&tmp, &processor);
        let out = img.fill("100x100").unwrap();
        assert!(out.target_path().ends_with("_100x100_fill_q90_lanczos_top.jpg"));
    }
}
