//! Variant generation with cache reuse.
//!
//! For each source image the generator produces one canonical JPEG plus one
//! file per configured alternate format, all at the same bounded size:
//!
//! ```text
//! public/.siena/
//! ├── 9f86d0…0f00a08.jpg     # canonical, width ≤ max_width
//! ├── 9f86d0…0f00a08.webp
//! └── 9f86d0…0f00a08.avif
//! ```
//!
//! ## Cache reuse
//!
//! - **jpg**: when the [`CacheIndex`] knows the hash, the existing file is read
//!   and probed. If that works its dimensions are returned and nothing is
//!   written. A missing or unreadable file falls back to regeneration.
//! - **other formats**: reuse the canonical jpg dimensions (not every format
//!   can be probed, and all formats come from the same target size). On an
//!   index hit the existing file is kept if present.
//!
//! ## Concurrency
//!
//! Two references to identical bytes may be walked at the same time. Without
//! coordination both would miss the index and encode the same files.
//! [`GenerationLocks`] serializes work per hash, so the second caller waits and
//! then takes the cached path.

use crate::cache::{CacheIndex, ContentHash, lock};
use crate::imaging::{
    BackendError, Dimensions, ImageBackend, OutputFormat, Quality, ResizeParams,
    target_dimensions,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Raw bytes plus their probed dimensions.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub dimensions: Dimensions,
}

impl SourceImage {
    /// Probe `bytes`; `None` when they are not an image with a usable width.
    pub fn probe(backend: &impl ImageBackend, bytes: Vec<u8>) -> Option<Self> {
        match backend.identify(&bytes) {
            Ok(dimensions) if dimensions.width > 0 => Some(Self { bytes, dimensions }),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "image probe failed");
                None
            }
        }
    }
}

/// One encoded variant on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantFile {
    pub hash: ContentHash,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

impl VariantFile {
    pub fn file_name(&self) -> String {
        self.hash.file_name(self.format.extension())
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantStatus {
    /// Reused from the cache directory.
    Cached,
    /// Resized and encoded in this pass.
    Encoded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub file: VariantFile,
    pub status: VariantStatus,
}

/// Canonical jpg followed by alternates in configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSet {
    pub canonical: Generated,
    pub alternates: Vec<Generated>,
}

impl VariantSet {
    pub fn all(&self) -> impl Iterator<Item = &Generated> {
        std::iter::once(&self.canonical).chain(self.alternates.iter())
    }
}

/// Per-hash mutexes serializing check-then-generate.
#[derive(Debug, Default)]
pub struct GenerationLocks {
    slots: Mutex<HashMap<ContentHash, Arc<Mutex<()>>>>,
}

impl GenerationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `hash`.
    ///
    /// The slot is dropped from the map once its last user is done.
    pub fn with_lock<T>(&self, hash: &ContentHash, f: impl FnOnce() -> T) -> T {
        let slot = lock(&self.slots).entry(hash.clone()).or_default().clone();
        let result = {
            let _guard = lock(&slot);
            f()
        };
        let mut slots = lock(&self.slots);
        // One count for the map, one for `slot`; anything above is a waiter.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(hash);
        }
        drop(slot);
        result
    }

    /// Hashes with a holder or waiter right now.
    pub fn in_flight(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// Everything needed to produce variants into one cache directory.
pub struct VariantGenerator<'a, B: ImageBackend> {
    pub backend: &'a B,
    pub cache_dir: &'a Path,
    pub index: &'a CacheIndex,
    pub locks: &'a GenerationLocks,
    pub max_width: u32,
    pub quality: Quality,
}

impl<B: ImageBackend> VariantGenerator<'_, B> {
    fn path_for(&self, hash: &ContentHash, format: OutputFormat) -> PathBuf {
        self.cache_dir.join(hash.file_name(format.extension()))
    }

    /// Probe an existing canonical file; any failure is a miss.
    fn read_cached_jpg(&self, hash: &ContentHash) -> Option<Dimensions> {
        let path = self.path_for(hash, OutputFormat::Jpg);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cached variant unreadable, regenerating");
                return None;
            }
        };
        match self.backend.identify(&bytes) {
            Ok(dims) if dims.width > 0 && dims.height > 0 => Some(dims),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cached variant unprobeable, regenerating");
                None
            }
        }
    }

    /// Return the `format` variant of `source`, encoding it only when the
    /// cache cannot supply it.
    ///
    /// `canonical` carries the jpg dimensions for alternate formats; without
    /// it the target size is computed from the source.
    pub fn get_or_create(
        &self,
        source: &SourceImage,
        hash: &ContentHash,
        format: OutputFormat,
        canonical: Option<Dimensions>,
    ) -> Result<Generated, BackendError> {
        let variant = |dims: Dimensions, status| Generated {
            file: VariantFile {
                hash: hash.clone(),
                format,
                width: dims.width,
                height: dims.height,
            },
            status,
        };
        let known = self.index.contains(hash);

        if format == OutputFormat::Jpg {
            if known && let Some(dims) = self.read_cached_jpg(hash) {
                debug!(%hash, %format, "variant cache hit");
                return Ok(variant(dims, VariantStatus::Cached));
            }
        } else if let Some(dims) = canonical
            && known
            && self.path_for(hash, format).is_file()
        {
            debug!(%hash, %format, "variant cache hit");
            return Ok(variant(dims, VariantStatus::Cached));
        }

        let target = match canonical.filter(|_| format != OutputFormat::Jpg) {
            Some(dims) => dims,
            None => target_dimensions(source.dimensions, self.max_width).ok_or_else(|| {
                BackendError::ProcessingFailed("source image has zero width".to_string())
            })?,
        };
        let output = self.path_for(hash, format);
        let written = self.backend.resize(&ResizeParams {
            source: &source.bytes,
            output: &output,
            width: target.width,
            height: target.height,
            format,
            quality: self.quality,
        })?;
        debug!(%hash, %format, width = written.width, height = written.height, "variant encoded");

        // Alternates share the canonical dimensions by convention
        let dims = if format == OutputFormat::Jpg {
            written
        } else {
            target
        };
        Ok(variant(dims, VariantStatus::Encoded))
    }

    /// Produce the jpg plus every alternate format, then record the hash.
    ///
    /// Runs under the per-hash lock so identical images referenced
    /// concurrently are encoded once.
    pub fn create_set(
        &self,
        source: &SourceImage,
        hash: &ContentHash,
        alternates: &[OutputFormat],
    ) -> Result<VariantSet, BackendError> {
        self.locks.with_lock(hash, || {
            let canonical = self.get_or_create(source, hash, OutputFormat::Jpg, None)?;
            let dims = canonical.file.dimensions();
            let alternates = alternates
                .iter()
                .filter(|f| **f != OutputFormat::Jpg)
                .map(|&format| self.get_or_create(source, hash, format, Some(dims)))
                .collect::<Result<Vec<_>, _>>()?;
            self.index.record(hash.clone());
            Ok(VariantSet {
                canonical,
                alternates,
            })
        })
    }
}
