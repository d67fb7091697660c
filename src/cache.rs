//! Content-addressed variant cache bookkeeping.
//!
//! Resizing and encoding (AVIF especially) is the bottleneck of a build. This
//! module lets the pipeline skip that work whenever an image with identical
//! bytes has already been processed, by this build or a previous one.
//!
//! # Design
//!
//! ## Cache keys
//!
//! The cache is **content-addressed**: the key is the SHA-256 of the raw image
//! bytes ([`hash_bytes`]), not the reference path. The same photo linked from
//! three documents under three different names is encoded once. Content-based
//! rather than mtime-based so it survives `git checkout`.
//!
//! ## Storage
//!
//! Variants live flat in the cache directory as `<hash>.<format>`. There is no
//! manifest file: the directory listing is the source of truth, and
//! [`CacheIndex::load`] rebuilds the in-memory index from it.
//!
//! ## Index invariant
//!
//! A hash in the [`CacheIndex`] has a readable `<hash>.jpg`. Hashes are
//! recorded only after a full variant set was written, and removed only by the
//! [garbage collector](crate::gc).

use crate::imaging::OutputFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lowercase hex SHA-256 of an image's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash portion of a cache file name: everything before the first `.`.
    ///
    /// Returns `None` for dotfiles, whose prefix is empty.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let prefix = name.split('.').next().unwrap_or(name);
        if prefix.is_empty() {
            None
        } else {
            Some(Self(prefix.to_string()))
        }
    }

    /// File name of this hash's variant in `extension` format.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// SHA-256 of `bytes`, returned as a hex [`ContentHash`].
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let digest = Sha256::digest(bytes);
    ContentHash(format!("{:x}", digest))
}

// Poisoning only means another worker panicked mid-update; the sets stay valid.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hashes with variants on disk.
///
/// Shared by every worker processing images in the same scope; all methods
/// take `&self`.
#[derive(Debug, Default)]
pub struct CacheIndex {
    hashes: RwLock<HashSet<ContentHash>>,
}

impl CacheIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the index from the file names in `cache_dir`.
    ///
    /// A missing directory yields an empty index.
    pub fn load(cache_dir: &Path) -> io::Result<Self> {
        Ok(Self {
            hashes: RwLock::new(scan_hashes(cache_dir)?),
        })
    }

    /// Replace the contents with a fresh scan of `cache_dir`.
    pub fn reset(&self, cache_dir: &Path) -> io::Result<()> {
        let scanned = scan_hashes(cache_dir)?;
        *write(&self.hashes) = scanned;
        Ok(())
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        read(&self.hashes).contains(hash)
    }

    /// Mark `hash` as having a complete variant set on disk.
    pub fn record(&self, hash: ContentHash) {
        write(&self.hashes).insert(hash);
    }

    pub fn remove_all<'a>(&self, hashes: impl IntoIterator<Item = &'a ContentHash>) {
        let mut set = write(&self.hashes);
        for hash in hashes {
            set.remove(hash);
        }
    }

    pub fn len(&self) -> usize {
        read(&self.hashes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the current contents.
    pub fn snapshot(&self) -> Vec<ContentHash> {
        let mut hashes: Vec<ContentHash> = read(&self.hashes).iter().cloned().collect();
        hashes.sort();
        hashes
    }
}

fn scan_hashes(cache_dir: &Path) -> io::Result<HashSet<ContentHash>> {
    let entries = match std::fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };
    let mut hashes = HashSet::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(hash) = entry.file_name().to_str().and_then(ContentHash::from_file_name) {
            hashes.insert(hash);
        }
    }
    Ok(hashes)
}

/// One hash's files in the cache directory, as shown by `siena inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub hash: ContentHash,
    /// Extensions present, sorted.
    pub formats: Vec<String>,
    /// Combined size of the files.
    pub bytes: u64,
}

fn is_hex_digest(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Group the variant files in `cache_dir` by hash, sorted by hash.
///
/// Only `<hex>.<format>` names are listed; anything else in the directory is
/// not a variant.
pub fn list_entries(cache_dir: &Path) -> io::Result<Vec<CacheEntry>> {
    let entries = match std::fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut grouped: BTreeMap<ContentHash, CacheEntry> = BTreeMap::new();
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some((prefix, ext)) = name.split_once('.') else {
            continue;
        };
        let Some(format) = OutputFormat::from_extension(ext) else {
            continue;
        };
        if !is_hex_digest(prefix) {
            continue;
        }
        let hash = ContentHash(prefix.to_string());
        let format = format.extension().to_string();
        let slot = grouped.entry(hash.clone()).or_insert_with(|| CacheEntry {
            hash,
            formats: Vec::new(),
            bytes: 0,
        });
        slot.formats.push(format);
        slot.bytes += metadata.len();
    }
    Ok(grouped
        .into_values()
        .map(|mut entry| {
            entry.formats.sort();
            entry
        })
        .collect())
}

/// Hashes touched by the current processing pass.
#[derive(Debug, Default)]
pub struct ReferencedHashes {
    hashes: Mutex<HashSet<ContentHash>>,
}

impl ReferencedHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, hash: ContentHash) {
        lock(&self.hashes).insert(hash);
    }

    pub fn extend(&self, hashes: impl IntoIterator<Item = ContentHash>) {
        lock(&self.hashes).extend(hashes);
    }

    pub fn clear(&self) {
        lock(&self.hashes).clear();
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        lock(&self.hashes).contains(hash)
    }

    pub fn snapshot(&self) -> HashSet<ContentHash> {
        lock(&self.hashes).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.hashes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Summary of cache performance for a document or a build.
///
/// Counted per variant file: a fully cached image with three formats is three
/// hits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }

    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} encoded ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} encoded", self.misses)
        }
    }
}
