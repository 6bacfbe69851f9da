//! Derivation cache: at-most-once builds over a memory tier and a persisted
//! file tier.
//!
//! Decoding, transforming and encoding an image is the expensive part of
//! every derivation. This module guarantees each distinct derivation runs at
//! most once per process, and at most once across restarts as long as the
//! persisted artifact survives.
//!
//! # Design
//!
//! ## Cache keys
//!
//! A [`CacheKey`] pairs the identity of the resource being transformed
//! (identity tag of the original source plus the path of the resource) with
//! the transformation config key. Two requests share a key exactly when they
//! are the same transformation of the same pixels.
//!
//! ## Memory tier
//!
//! A map from key to a slot that is either `Ready` with the finished value or
//! `Building` with an in-flight cell that racing callers wait on. The map lock
//! is held only to check and insert, never while building, so different keys
//! build in parallel.
//!
//! ## Persisted tier
//!
//! Every built artifact is written under the cache root at its target path.
//! On a memory miss the owner first tries that file and, if it can be read
//! back, rehydrates the value from its bytes without building. An unreadable
//! file is logged and rebuilt.
//!
//! Writes go to a temporary file in the destination directory that is then
//! renamed into place, so a failed or interrupted build never leaves a
//! partial artifact behind.
//!
//! ## Failures
//!
//! A failed build is handed to every caller waiting on that attempt, then the
//! key is vacated: the next request builds again. Failures are never cached.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: Arc<io::Error>,
    },
    #[error("failed to list {}: {source}", path.display())]
    List {
        path: PathBuf,
        source: Arc<walkdir::Error>,
    },
    #[error("build abandoned before completion")]
    Abandoned,
    #[error("artifact path {0:?} leaves the cache directory")]
    UnsafePath(String),
}

/// Identity of one derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Identity tag of the root source plus the path of the resource being
    /// transformed.
    pub source: String,
    /// Transformation config key.
    pub config: String,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.config)
    }
}

/// Snapshot of cache activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from the memory tier.
    pub hits: u64,
    /// Waited on another caller's build of the same key.
    pub joins: u64,
    /// Served from the persisted tier.
    pub rehydrations: u64,
    /// Built from source pixels.
    pub builds: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.joins + self.rehydrations + self.builds
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total() == self.builds {
            return write!(f, "{} built", self.builds);
        }
        write!(
            f,
            "{} cached, {} joined, {} rehydrated, {} built ({} total)",
            self.hits,
            self.joins,
            self.rehydrations,
            self.builds,
            self.total()
        )
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    joins: AtomicU64,
    rehydrations: AtomicU64,
    builds: AtomicU64,
}

/// One file in the persisted tier.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PersistedArtifact {
    /// Target path relative to the cache root, `/`-separated.
    pub path: String,
    pub bytes: u64,
}

/// Result cell that callers racing on one key block on.
struct InFlight<V, E> {
    result: Mutex<Option<Result<V, E>>>,
    cv: Condvar,
}

impl<V: Clone, E: Clone> InFlight<V, E> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn set(&self, result: Result<V, E>) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(result);
        self.cv.notify_all();
    }

    fn wait(&self) -> Result<V, E> {
        let mut guard = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

enum Slot<V, E> {
    Ready(V),
    Building(Arc<InFlight<V, E>>),
}

enum Lookup<V, E> {
    Hit(V),
    Join(Arc<InFlight<V, E>>),
    Own(Arc<InFlight<V, E>>),
}

/// Keyed cache with single-flight builds and a persisted file tier.
pub struct DerivationCache<V, E> {
    root: PathBuf,
    slots: Mutex<HashMap<CacheKey, Slot<V, E>>>,
    counters: Counters,
}

impl<V, E> DerivationCache<V, E>
where
    V: Clone,
    E: Clone + fmt::Display + From<CacheError>,
{
    /// A cache persisting artifacts under `root`. The directory is created on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            slots: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `target_path` in the persisted tier. Only plain name
    /// segments are joined, so the result is always below the root.
    pub fn artifact_path(&self, target_path: &str) -> PathBuf {
        let mut file = self.root.clone();
        file.extend(
            Path::new(target_path)
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part),
                    _ => None,
                }),
        );
        file
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot<V, E>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the value for `key`, producing it at most once.
    ///
    /// On a memory miss the first caller becomes the owner: it tries
    /// `rehydrate` on the persisted artifact at `target_path`, and otherwise
    /// runs `build`, persists the returned bytes and installs the value.
    /// Concurrent callers for the same key wait for the owner and share its
    /// outcome, including its error.
    pub fn get_or_create<R, B>(
        &self,
        key: &CacheKey,
        target_path: &str,
        rehydrate: R,
        build: B,
    ) -> Result<V, E>
    where
        R: FnOnce(&[u8]) -> Result<V, E>,
        B: FnOnce() -> Result<(V, Vec<u8>), E>,
    {
        if target_path.split(['/', '\\']).any(|s| s == "..") {
            return Err(CacheError::UnsafePath(target_path.to_string()).into());
        }

        let lookup = {
            let mut slots = self.lock_slots();
            match slots.get(key) {
                Some(Slot::Ready(value)) => Lookup::Hit(value.clone()),
                Some(Slot::Building(flight)) => Lookup::Join(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(InFlight::new());
                    slots.insert(key.clone(), Slot::Building(Arc::clone(&flight)));
                    Lookup::Own(flight)
                }
            }
        };

        let flight = match lookup {
            Lookup::Hit(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache hit");
                return Ok(value);
            }
            Lookup::Join(flight) => {
                self.counters.joins.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "joining in-flight build");
                return flight.wait();
            }
            Lookup::Own(flight) => flight,
        };

        let guard = OwnerGuard {
            cache: self,
            key,
            flight: &flight,
            armed: true,
        };
        let result = self.materialize(target_path, rehydrate, build);
        guard.finish(result)
    }

    fn materialize<R, B>(&self, target_path: &str, rehydrate: R, build: B) -> Result<V, E>
    where
        R: FnOnce(&[u8]) -> Result<V, E>,
        B: FnOnce() -> Result<(V, Vec<u8>), E>,
    {
        let file = self.artifact_path(target_path);

        match fs::read(&file) {
            Ok(bytes) => match rehydrate(&bytes) {
                Ok(value) => {
                    self.counters.rehydrations.fetch_add(1, Ordering::Relaxed);
                    debug!(target_path, "rehydrated from persisted artifact");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(target_path, error = %e, "unreadable persisted artifact, rebuilding");
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(target_path, error = %e, "cannot read persisted artifact, rebuilding");
            }
        }

        let started = Instant::now();
        let (value, bytes) = build()?;
        self.persist(&file, &bytes)?;
        self.counters.builds.fetch_add(1, Ordering::Relaxed);
        info!(
            target_path,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built derived image"
        );
        Ok(value)
    }

    /// Atomically write `bytes` to `file`: temp file in the same directory,
    /// synced, then renamed over the destination.
    fn persist(&self, file: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let err = |source: io::Error| CacheError::Persist {
            path: file.to_path_buf(),
            source: Arc::new(source),
        };
        let dir = file.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(err)?;
        tmp.write_all(bytes).map_err(err)?;
        tmp.as_file().sync_all().map_err(err)?;
        tmp.persist(file).map_err(|e| err(e.error))?;
        Ok(())
    }

    /// Drop every finished in-memory entry. Persisted artifacts are kept and
    /// builds in flight complete normally.
    pub fn clear(&self) {
        self.lock_slots()
            .retain(|_, slot| matches!(slot, Slot::Building(_)));
    }

    /// Number of finished entries resident in memory.
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
            rehydrations: self.counters.rehydrations.load(Ordering::Relaxed),
            builds: self.counters.builds.load(Ordering::Relaxed),
        }
    }

    /// Every artifact in the persisted tier, sorted by path. A missing cache
    /// root is an empty tier.
    pub fn persisted_artifacts(&self) -> Result<Vec<PersistedArtifact>, CacheError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|source| CacheError::List {
                path: self.root.clone(),
                source: Arc::new(source),
            })?;
            let temp = entry.file_name().to_string_lossy().starts_with(".tmp");
            if !entry.file_type().is_file() || temp {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            artifacts.push(PersistedArtifact {
                path: relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                bytes,
            });
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(artifacts)
    }
}

/// Resolves the owner's in-flight slot exactly once, even if the build
/// panics: waiters then see [`CacheError::Abandoned`] and the key is vacated.
struct OwnerGuard<'a, V, E>
where
    V: Clone,
    E: Clone + fmt::Display + From<CacheError>,
{
    cache: &'a DerivationCache<V, E>,
    key: &'a CacheKey,
    flight: &'a Arc<InFlight<V, E>>,
    armed: bool,
}

impl<V, E> OwnerGuard<'_, V, E>
where
    V: Clone,
    E: Clone + fmt::Display + From<CacheError>,
{
    fn finish(mut self, result: Result<V, E>) -> Result<V, E> {
        self.armed = false;
        self.resolve(result.clone());
        result
    }

    fn resolve(&self, result: Result<V, E>) {
        {
            let mut slots = self.cache.lock_slots();
            match &result {
                Ok(value) => {
                    slots.insert(self.key.clone(), Slot::Ready(value.clone()));
                }
                Err(_) => {
                    slots.remove(self.key);
                }
            }
        }
        self.flight.set(result);
    }
}

impl<V, E> Drop for OwnerGuard<'_, V, E>
where
    V: Clone,
    E: Clone + fmt::Display + From<CacheError>,
{
    fn drop(&mut self) {
        if self.armed {
            self.resolve(Err(CacheError::Abandoned.into()));
        }
    }
}
