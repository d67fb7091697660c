//! Stale variant removal.
//!
//! After a pass, every hash the [`CacheIndex`] knows about but the pass did not
//! reference is considered stale: all of its `<hash>.<format>` files are
//! deleted and the hash leaves the index. Failing to delete a file is logged
//! and counted; it never fails the pass.

use crate::cache::{CacheIndex, ContentHash};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Hashes dropped from the index.
    pub stale_hashes: Vec<ContentHash>,
    /// File names deleted from the cache directory.
    pub removed_files: Vec<String>,
    /// Files that could not be deleted.
    pub failed: usize,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.stale_hashes.is_empty() && self.removed_files.is_empty() && self.failed == 0
    }
}

/// Delete the variants of every indexed hash that is not in `referenced`.
pub fn reconcile(
    cache_dir: &Path,
    index: &CacheIndex,
    referenced: &HashSet<ContentHash>,
) -> GcReport {
    let stale: HashSet<ContentHash> = index
        .snapshot()
        .into_iter()
        .filter(|hash| !referenced.contains(hash))
        .collect();

    let mut report = GcReport::default();
    if stale.is_empty() {
        return report;
    }

    match list_files(cache_dir) {
        Ok(names) => {
            for name in names {
                if !belongs_to_any(&name, &stale) {
                    continue;
                }
                match std::fs::remove_file(cache_dir.join(&name)) {
                    Ok(()) => {
                        debug!(file = %name, "removed stale variant");
                        report.removed_files.push(name);
                    }
                    Err(e) => {
                        warn!(file = %name, error = %e, "failed to remove stale variant");
                        report.failed += 1;
                    }
                }
            }
        }
        Err(e) => warn!(dir = %cache_dir.display(), error = %e, "cannot list cache directory"),
    }

    index.remove_all(&stale);
    let mut stale_hashes: Vec<ContentHash> = stale.into_iter().collect();
    stale_hashes.sort();
    report.stale_hashes = stale_hashes;
    report.removed_files.sort();

    info!(
        hashes = report.stale_hashes.len(),
        files = report.removed_files.len(),
        failed = report.failed,
        "garbage collected variant cache"
    );
    report
}

/// `<hash>.` prefix match; `abc.jpg` does not belong to hash `ab`.
fn belongs_to_any(file_name: &str, stale: &HashSet<ContentHash>) -> bool {
    match file_name.split_once('.') {
        Some((prefix, _)) => stale.iter().any(|h| h.as_str() == prefix),
        None => false,
    }
}

fn list_files(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
