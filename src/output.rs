//! CLI output formatting.
//!
//! Every function here is pure: it turns a library value into display lines,
//! and `main` decides where they go. Progress lines arrive through the
//! transform event channel and are printed as they come; summaries are
//! printed once per document and once per build.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! ./cat.png → 1920×1080 9f86d081884c
//!     jpg: encoded
//!     webp: encoded
//!     avif: cached
//! ./broken.png: skipped, not an image
//! posts/hello.md → public/posts/hello.html (1 rewritten, 1 skipped, 1 cached, 2 encoded (3 total))
//!
//! Built 12 documents: 40 cached, 3 encoded (43 total)
//! Removed 2 stale images (6 files)
//! ```
//!
//! A document that fails is reported on stderr and counted; the others are
//! still built:
//!
//! ```text
//! failed: posts/broken.md: cannot read image content/posts/gone.png: No such file or directory
//! Built 11 documents, 1 failed: 40 cached, 0 encoded (40 total)
//! ```
//!
//! ## Inspect
//!
//! ```text
//! 9f86d081884c  avif jpg webp  412.3 KB
//! 2 images, 6 files, 780.1 KB
//! ```

use crate::cache::{CacheEntry, CacheStats, ContentHash};
use crate::gc::GcReport;
use crate::pipeline::DocumentReport;
use crate::variant::VariantStatus;
use crate::walk::{SkipReason, TransformEvent};

/// Hash prefix shown to humans.
pub fn short_hash(hash: &ContentHash) -> &str {
    let s = hash.as_str();
    let end = s.char_indices().nth(12).map_or(s.len(), |(i, _)| i);
    &s[..end]
}

fn skip_reason(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::NoOrigin => "document has no path",
        SkipReason::NotAnImage => "not an image",
    }
}

/// Format a single transform progress event as display lines.
pub fn format_transform_event(event: &TransformEvent) -> Vec<String> {
    match event {
        TransformEvent::ImageRewritten {
            src,
            hash,
            width,
            height,
            variants,
            ..
        } => {
            let mut lines = vec![format!(
                "{} \u{2192} {}\u{00d7}{} {}",
                src,
                width,
                height,
                short_hash(hash)
            )];
            for variant in variants {
                let status = match variant.status {
                    VariantStatus::Cached => "cached",
                    VariantStatus::Encoded => "encoded",
                };
                lines.push(format!("    {}: {}", variant.format, status));
            }
            lines
        }
        TransformEvent::ImageSkipped { src, reason, .. } => {
            vec![format!("{}: skipped, {}", src, skip_reason(*reason))]
        }
    }
}

/// One line per document, plus GC lines when it ran per document.
pub fn format_document_report(source: &str, output: &str, report: &DocumentReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{} \u{2192} {} ({} rewritten, {} skipped, {})",
        source, output, report.rewritten, report.skipped, report.stats
    )];
    if let Some(gc) = &report.gc
        && !gc.is_empty()
    {
        lines.extend(format_gc_report(gc).into_iter().map(|l| format!("    {l}")));
    }
    lines
}

/// A document that could not be built; `message` already names it.
pub fn format_document_failure(message: &str) -> String {
    format!("failed: {}", message)
}

pub fn format_build_summary(built: usize, failed: usize, stats: &CacheStats) -> String {
    let noun = if built == 1 { "document" } else { "documents" };
    if failed == 0 {
        format!("Built {} {}: {}", built, noun, stats)
    } else {
        format!("Built {} {}, {} failed: {}", built, noun, failed, stats)
    }
}

pub fn format_gc_report(report: &GcReport) -> Vec<String> {
    if report.is_empty() {
        return vec!["Cache clean".to_string()];
    }
    let images = report.stale_hashes.len();
    let mut lines = vec![format!(
        "Removed {} stale {} ({} files)",
        images,
        if images == 1 { "image" } else { "images" },
        report.removed_files.len()
    )];
    if report.failed > 0 {
        lines.push(format!("{} files could not be removed", report.failed));
    }
    lines
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_inspect(entries: &[CacheEntry]) -> Vec<String> {
    let mut lines: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                "{}  {}  {}",
                short_hash(&e.hash),
                e.formats.join(" "),
                human_bytes(e.bytes)
            )
        })
        .collect();
    let files: usize = entries.iter().map(|e| e.formats.len()).sum();
    let bytes: u64 = entries.iter().map(|e| e.bytes).sum();
    lines.push(format!(
        "{} images, {} files, {}",
        entries.len(),
        files,
        human_bytes(bytes)
    ));
    lines
}
