//! Document tree traversal and `<img>` → `<picture>` rewriting.
//!
//! The walker descends depth-first. Siblings are handed to rayon
//! (`par_iter_mut`) and joined before the parent returns, so a subtree is
//! always complete when its call returns but siblings finish in no particular
//! order. Each branch owns its `&mut Node`, so node mutation needs no locking;
//! only the cache state in [`DocumentContext`] is shared.
//!
//! ## Rewrite
//!
//! ```text
//! <img src="./cat.png" alt="A cat">
//!
//! <picture>
//!   <img data-siena src="/.siena/<hash>.jpg" width="1920" height="1080" loading="lazy" alt="A cat">
//!   <source srcset="/.siena/<hash>.webp">
//!   <source srcset="/.siena/<hash>.avif">
//! </picture>
//! ```
//!
//! Images without `src`, images in documents without an origin path, and
//! bytes that do not probe as an image are left exactly as they were.

use crate::cache::{CacheStats, ContentHash, ReferencedHashes, hash_bytes, lock};
use crate::imaging::{BackendError, ImageBackend, OutputFormat};
use crate::resolve::{Fetcher, ImageReference, ResolveError, Resolver};
use crate::tree::{Element, ImgElement, Loading, Node, PictureElement, SourceElement};
use crate::variant::{SourceImage, VariantGenerator, VariantSet, VariantStatus};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Image processing failed for {src}: {source}")]
    Imaging {
        src: String,
        #[source]
        source: BackendError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an image was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The document has no path, so its references are not resolved.
    NoOrigin,
    /// The bytes did not probe as an image with a usable width.
    NotAnImage,
}

/// Per-variant outcome reported to the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantInfo {
    pub format: OutputFormat,
    pub status: VariantStatus,
}

/// Progress events, sent while the walk is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformEvent {
    ImageRewritten {
        document: Option<PathBuf>,
        src: String,
        hash: ContentHash,
        width: u32,
        height: u32,
        variants: Vec<VariantInfo>,
    },
    ImageSkipped {
        document: Option<PathBuf>,
        src: String,
        reason: SkipReason,
    },
}

/// Shared state for walking one document.
pub struct DocumentContext<'a, B: ImageBackend, F: Fetcher> {
    pub generator: VariantGenerator<'a, B>,
    pub resolver: Resolver<'a, F>,
    pub origin: Option<&'a Path>,
    /// URL path of the cache directory, e.g. `/.siena`.
    pub url_prefix: &'a str,
    pub loading: Loading,
    pub alternates: &'a [OutputFormat],
    /// Hashes this pass has touched.
    pub referenced: &'a ReferencedHashes,
    pub events: Option<&'a Sender<TransformEvent>>,
    stats: Mutex<WalkStats>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub rewritten: usize,
    pub skipped: usize,
    pub cache: CacheStats,
}

impl<'a, B: ImageBackend, F: Fetcher> DocumentContext<'a, B, F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generator: VariantGenerator<'a, B>,
        resolver: Resolver<'a, F>,
        origin: Option<&'a Path>,
        url_prefix: &'a str,
        loading: Loading,
        alternates: &'a [OutputFormat],
        referenced: &'a ReferencedHashes,
        events: Option<&'a Sender<TransformEvent>>,
    ) -> Self {
        Self {
            generator,
            resolver,
            origin,
            url_prefix,
            loading,
            alternates,
            referenced,
            events,
            stats: Mutex::new(WalkStats::default()),
        }
    }

    pub fn stats(&self) -> WalkStats {
        *lock(&self.stats)
    }

    fn emit(&self, event: TransformEvent) {
        if let Some(tx) = self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }

    fn skip(&self, src: &str, reason: SkipReason) {
        debug!(src, ?reason, "image left unchanged");
        lock(&self.stats).skipped += 1;
        self.emit(TransformEvent::ImageSkipped {
            document: self.origin.map(Path::to_path_buf),
            src: src.to_string(),
            reason,
        });
    }

    fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.url_prefix.trim_end_matches('/'), file_name)
    }
}

/// Rewrite every eligible image under `node`.
///
/// The first error aborts the walk; siblings already running finish their
/// current image but no new work starts.
pub fn walk<B: ImageBackend, F: Fetcher>(
    node: &mut Node,
    ctx: &DocumentContext<'_, B, F>,
) -> Result<(), TransformError> {
    if let Node::Element(Element::Img(img)) = node {
        if let Some(picture) = rewrite_image(img, ctx)? {
            *node = Node::Element(Element::Picture(picture));
        }
        return Ok(());
    }
    match node.children_mut() {
        Some(children) => children.par_iter_mut().try_for_each(|child| walk(child, ctx)),
        None => Ok(()),
    }
}

fn rewrite_image<B: ImageBackend, F: Fetcher>(
    img: &ImgElement,
    ctx: &DocumentContext<'_, B, F>,
) -> Result<Option<PictureElement>, TransformError> {
    if img.processed {
        return Ok(None);
    }
    let Some(src) = img.src.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    let Some(origin) = ctx.origin else {
        ctx.skip(src, SkipReason::NoOrigin);
        return Ok(None);
    };

    let reference = ImageReference {
        src: src.to_string(),
        alt: img.alt.clone(),
        origin: Some(origin.to_path_buf()),
    };
    let Some(bytes) = ctx.resolver.resolve(&reference)? else {
        ctx.skip(src, SkipReason::NoOrigin);
        return Ok(None);
    };
    let Some(source) = SourceImage::probe(ctx.generator.backend, bytes) else {
        ctx.skip(src, SkipReason::NotAnImage);
        return Ok(None);
    };

    let hash = hash_bytes(&source.bytes);
    let set = ctx
        .generator
        .create_set(&source, &hash, ctx.alternates)
        .map_err(|source| TransformError::Imaging {
            src: src.to_string(),
            source,
        })?;
    ctx.referenced.record(hash.clone());
    record(ctx, src, &set);

    Ok(Some(build_picture(&reference, &set, ctx)))
}

fn record<B: ImageBackend, F: Fetcher>(ctx: &DocumentContext<'_, B, F>, src: &str, set: &VariantSet) {
    {
        let mut stats = lock(&ctx.stats);
        stats.rewritten += 1;
        for generated in set.all() {
            match generated.status {
                VariantStatus::Cached => stats.cache.hit(),
                VariantStatus::Encoded => stats.cache.miss(),
            }
        }
    }
    let canonical = &set.canonical.file;
    ctx.emit(TransformEvent::ImageRewritten {
        document: ctx.origin.map(Path::to_path_buf),
        src: src.to_string(),
        hash: canonical.hash.clone(),
        width: canonical.width,
        height: canonical.height,
        variants: set
            .all()
            .map(|g| VariantInfo {
                format: g.file.format,
                status: g.status,
            })
            .collect(),
    });
}

fn build_picture<B: ImageBackend, F: Fetcher>(
    reference: &ImageReference,
    set: &VariantSet,
    ctx: &DocumentContext<'_, B, F>,
) -> PictureElement {
    let canonical = &set.canonical.file;
    PictureElement {
        img: ImgElement {
            src: Some(ctx.url_for(&canonical.file_name())),
            alt: reference.alt.clone(),
            title: None,
            width: Some(canonical.width),
            height: Some(canonical.height),
            loading: Some(ctx.loading),
            processed: true,
        },
        sources: set
            .alternates
            .iter()
            .map(|g| SourceElement {
                srcset: ctx.url_for(&g.file.file_name()),
            })
            .collect(),
    }
}
