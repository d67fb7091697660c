//! Host-facing entry point.
//!
//! A [`Pipeline`] owns everything that outlives a single document: the
//! configuration, the cache directory and its [`CacheIndex`], the per-hash
//! generation locks, and the hashes referenced during the current session.
//!
//! ```text
//! begin_session()
//!   transform(doc_1) ─┐
//!   transform(doc_2)  ├─ may run concurrently (session scope)
//!   transform(doc_n) ─┘
//! finish_session()   → GC against every hash referenced above
//! ```
//!
//! With [`GcScope::PerDocument`] each `transform` rescans the index, and runs
//! GC against that document's references as soon as its walk completes.

use crate::cache::{CacheIndex, CacheStats, ReferencedHashes};
use crate::config::{GcScope, SienaConfig};
use crate::gc::{self, GcReport};
use crate::imaging::{ImageBackend, RustBackend};
use crate::resolve::{Fetcher, HttpFetcher, Resolver};
use crate::tree::Node;
use crate::variant::{GenerationLocks, VariantGenerator};
use crate::walk::{DocumentContext, TransformError, TransformEvent, walk};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use tracing::debug;

/// What one `transform` call did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentReport {
    pub rewritten: usize,
    pub skipped: usize,
    pub stats: CacheStats,
    /// Distinct hashes the document references.
    pub referenced: usize,
    /// Present only with per-document GC.
    pub gc: Option<GcReport>,
}

pub struct Pipeline<B: ImageBackend = RustBackend, F: Fetcher = HttpFetcher> {
    config: SienaConfig,
    build_root: PathBuf,
    cache_dir: PathBuf,
    url_prefix: String,
    backend: B,
    fetcher: F,
    index: CacheIndex,
    session: ReferencedHashes,
    locks: GenerationLocks,
}

impl Pipeline {
    /// Pipeline on the `image` crate backend and a `ureq` fetcher.
    pub fn new(config: SienaConfig, build_root: impl Into<PathBuf>) -> Result<Self, TransformError> {
        let fetcher = HttpFetcher::new(config.fetch.timeout());
        Self::with_parts(config, build_root, RustBackend::new(), fetcher)
    }
}

impl<B: ImageBackend, F: Fetcher> Pipeline<B, F> {
    /// Create the cache directory and load its index.
    pub fn with_parts(
        config: SienaConfig,
        build_root: impl Into<PathBuf>,
        backend: B,
        fetcher: F,
    ) -> Result<Self, TransformError> {
        let build_root = build_root.into();
        let cache_dir = config.cache_dir(&build_root);
        fs::create_dir_all(&cache_dir)?;
        let index = CacheIndex::load(&cache_dir)?;
        debug!(dir = %cache_dir.display(), hashes = index.len(), "loaded variant cache index");
        Ok(Self {
            url_prefix: config.url_prefix(),
            config,
            build_root,
            cache_dir,
            backend,
            fetcher,
            index,
            session: ReferencedHashes::new(),
            locks: GenerationLocks::new(),
        })
    }

    pub fn config(&self) -> &SienaConfig {
        &self.config
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Start a new pass: rescan the cache directory and forget references.
    pub fn begin_session(&self) -> Result<(), TransformError> {
        self.index.reset(&self.cache_dir)?;
        self.session.clear();
        Ok(())
    }

    /// Rewrite every eligible image in `root`.
    ///
    /// `origin` is the document's path; local references in documents without
    /// one are left alone. On error the tree may be partially rewritten and
    /// per-document GC is not run.
    pub fn transform(
        &self,
        root: &mut Node,
        origin: Option<&Path>,
        events: Option<&Sender<TransformEvent>>,
    ) -> Result<DocumentReport, TransformError> {
        let per_document = self.config.gc_scope == GcScope::PerDocument;
        if per_document {
            self.index.reset(&self.cache_dir)?;
        }

        let referenced = ReferencedHashes::new();
        let ctx = DocumentContext::new(
            VariantGenerator {
                backend: &self.backend,
                cache_dir: &self.cache_dir,
                index: &self.index,
                locks: &self.locks,
                max_width: self.config.images.max_width,
                quality: self.config.images.quality(),
            },
            Resolver::new(&self.fetcher, &self.build_root),
            origin,
            &self.url_prefix,
            self.config.loading,
            &self.config.images.formats,
            &referenced,
            events,
        );
        let walked = walk(root, &ctx);
        let hashes = referenced.snapshot();
        if !per_document {
            // Variants finished before a failure are still live
            self.session.extend(hashes.iter().cloned());
        }
        walked?;

        let walk_stats = ctx.stats();
        let gc = per_document.then(|| gc::reconcile(&self.cache_dir, &self.index, &hashes));
        Ok(DocumentReport {
            rewritten: walk_stats.rewritten,
            skipped: walk_stats.skipped,
            stats: walk_stats.cache,
            referenced: hashes.len(),
            gc,
        })
    }

    /// End the pass. In session scope, delete variants nothing referenced.
    pub fn finish_session(&self) -> GcReport {
        match self.config.gc_scope {
            GcScope::Session => {
                gc::reconcile(&self.cache_dir, &self.index, &self.session.snapshot())
            }
            GcScope::PerDocument => GcReport::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash_bytes;
    use crate::imaging::OutputFormat;
    use crate::imaging::backend::tests::{MockBackend, mock_image};
    use crate::resolve::tests::MockFetcher;
    use crate::test_helpers::{cache_listing, document, img};
    use crate::tree::{Element, ImgElement, Loading};
    use crate::walk::SkipReason;
    use std::sync::mpsc;
    use tempfile::TempDir;

    struct Site {
        tmp: TempDir,
    }

    impl Site {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            fs::create_dir_all(tmp.path().join("content")).unwrap();
            Self { tmp }
        }

        fn root(&self) -> &Path {
            self.tmp.path()
        }

        fn doc(&self, name: &str) -> PathBuf {
            self.root().join("content").join(name)
        }

        fn image(&self, name: &str, bytes: &[u8]) {
            fs::write(self.root().join("content").join(name), bytes).unwrap();
        }

        fn pipeline(&self, config: SienaConfig) -> Pipeline<MockBackend, MockFetcher> {
            self.pipeline_with(config, MockBackend::new(), MockFetcher::default())
        }

        fn pipeline_with(
            &self,
            config: SienaConfig,
            backend: MockBackend,
            fetcher: MockFetcher,
        ) -> Pipeline<MockBackend, MockFetcher> {
            Pipeline::with_parts(config, self.root(), backend, fetcher).unwrap()
        }

        fn cache_dir(&self) -> PathBuf {
            self.root().join("public/.siena")
        }
    }

    fn per_document() -> SienaConfig {
        SienaConfig {
            gc_scope: GcScope::PerDocument,
            ..SienaConfig::default()
        }
    }

    // =========================================================================
    // Rewrite
    // =========================================================================

    #[test]
    fn rewrites_img_into_picture() {
        let site = Site::new();
        let bytes = mock_image(3840, 2160);
        site.image("cat.png", &bytes);
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./cat.png", Some("A cat"))]);

        let report = pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        let hash = hash_bytes(&bytes);
        let pictures = tree.pictures();
        assert_eq!(pictures.len(), 1);
        let picture = pictures[0];
        assert_eq!(
            picture.img,
            ImgElement {
                src: Some(format!("/.siena/{hash}.jpg")),
                alt: Some("A cat".to_string()),
                title: None,
                width: Some(1920),
                height: Some(1080),
                loading: Some(Loading::Lazy),
                processed: true,
            }
        );
        let srcsets: Vec<&str> = picture.sources.iter().map(|s| s.srcset.as_str()).collect();
        assert_eq!(
            srcsets,
            vec![
                format!("/.siena/{hash}.webp"),
                format!("/.siena/{hash}.avif")
            ]
        );
        assert_eq!(report.rewritten, 1);
        assert_eq!(report.stats, CacheStats { hits: 0, misses: 3 });
        assert_eq!(
            cache_listing(&site.cache_dir()),
            vec![
                format!("{hash}.avif"),
                format!("{hash}.jpg"),
                format!("{hash}.webp")
            ]
        );
    }

    #[test]
    fn loading_and_formats_follow_config() {
        let site = Site::new();
        site.image("cat.png", &mock_image(100, 50));
        let mut config = SienaConfig::default();
        config.loading = Loading::Eager;
        config.images.formats = vec![OutputFormat::Avif];
        let pipeline = site.pipeline(config);
        let mut tree = document(vec![img("./cat.png", None)]);

        pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        let picture = tree.pictures()[0];
        assert_eq!(picture.img.loading, Some(Loading::Eager));
        assert_eq!(picture.img.width, Some(100));
        assert_eq!(picture.sources.len(), 1);
        assert!(picture.sources[0].srcset.ends_with(".avif"));
    }

    #[test]
    fn nested_images_are_all_rewritten() {
        let site = Site::new();
        site.image("a.png", &mock_image(10, 10));
        site.image("b.png", &mock_image(20, 20));
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![
            Node::element("p", vec![Node::text("see "), img("./a.png", None)]),
            Node::element(
                "blockquote",
                vec![Node::element("p", vec![img("./b.png", None)])],
            ),
        ]);

        let report = pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        assert_eq!(report.rewritten, 2);
        assert!(tree.images().is_empty());
        assert_eq!(tree.pictures().len(), 2);
        assert_eq!(tree.text_content(), "see ");
    }

    #[test]
    fn rewalk_is_a_no_op() {
        let site = Site::new();
        site.image("cat.png", &mock_image(800, 600));
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./cat.png", None)]);
        let origin = site.doc("post.md");

        pipeline.transform(&mut tree, Some(&origin), None).unwrap();
        let once = tree.clone();
        let ops = pipeline.backend().get_operations().len();
        let report = pipeline.transform(&mut tree, Some(&origin), None).unwrap();

        assert_eq!(tree, once);
        assert_eq!(report.rewritten, 0);
        assert_eq!(pipeline.backend().get_operations().len(), ops);
    }

    #[test]
    fn identical_bytes_encode_once_per_format() {
        let site = Site::new();
        let bytes = mock_image(2000, 1000);
        site.image("one.png", &bytes);
        site.image("two.png", &bytes);
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./one.png", None), img("./two.png", None)]);

        let report = pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        for format in [OutputFormat::Jpg, OutputFormat::Webp, OutputFormat::Avif] {
            assert_eq!(pipeline.backend().resize_count(format), 1);
        }
        assert_eq!(report.stats, CacheStats { hits: 3, misses: 3 });
        assert_eq!(report.referenced, 1);
        let srcs: Vec<_> = tree.pictures().iter().map(|p| p.img.src.clone()).collect();
        assert_eq!(srcs[0], srcs[1]);
    }

    #[test]
    fn second_document_reuses_cache() {
        let site = Site::new();
        site.image("cat.png", &mock_image(640, 480));
        let pipeline = site.pipeline(SienaConfig::default());
        let mut first = document(vec![img("./cat.png", None)]);
        let mut second = document(vec![img("./cat.png", None)]);

        pipeline.transform(&mut first, Some(&site.doc("a.md")), None).unwrap();
        let report = pipeline
            .transform(&mut second, Some(&site.doc("b.md")), None)
            .unwrap();

        assert_eq!(report.stats, CacheStats { hits: 3, misses: 0 });
        assert_eq!(first, second);
    }

    #[test]
    fn cache_survives_a_new_pipeline() {
        let site = Site::new();
        site.image("cat.png", &mock_image(640, 480));
        let origin = site.doc("post.md");
        {
            let pipeline = site.pipeline(SienaConfig::default());
            let mut tree = document(vec![img("./cat.png", None)]);
            pipeline.transform(&mut tree, Some(&origin), None).unwrap();
        }

        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./cat.png", None)]);
        let report = pipeline.transform(&mut tree, Some(&origin), None).unwrap();

        assert_eq!(report.stats.misses, 0);
        assert_eq!(pipeline.backend().resize_count(OutputFormat::Jpg), 0);
    }

    #[test]
    fn remote_image_is_fetched() {
        let site = Site::new();
        let bytes = mock_image(500, 500);
        let fetcher = MockFetcher::with("https://cdn.test/cat.png", bytes.clone());
        let pipeline = site.pipeline_with(SienaConfig::default(), MockBackend::new(), fetcher);
        let mut tree = document(vec![img("https://cdn.test/cat.png", None)]);

        pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        assert_eq!(
            tree.pictures()[0].img.src.as_deref(),
            Some(format!("/.siena/{}.jpg", hash_bytes(&bytes)).as_str())
        );
    }

    #[test]
    fn build_root_relative_reference() {
        let site = Site::new();
        fs::create_dir_all(site.root().join("assets")).unwrap();
        fs::write(site.root().join("assets/dog.png"), mock_image(30, 20)).unwrap();
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("/assets/dog.png", None)]);

        let report = pipeline
            .transform(&mut tree, Some(&site.doc("nested/post.md")), None)
            .unwrap();

        assert_eq!(report.rewritten, 1);
    }

    // =========================================================================
    // Skips and errors
    // =========================================================================

    #[test]
    fn undecodable_bytes_leave_tree_unchanged() {
        let site = Site::new();
        site.image("broken.png", b"not an image");
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./broken.png", Some("x"))]);
        let before = tree.clone();

        let report = pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        assert_eq!(tree, before);
        assert_eq!(report.skipped, 1);
        assert!(cache_listing(&site.cache_dir()).is_empty());
    }

    #[test]
    fn document_without_origin_is_untouched() {
        let site = Site::new();
        site.image("cat.png", &mock_image(10, 10));
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./cat.png", None), img("cat.png", None)]);
        let before = tree.clone();

        let report = pipeline.transform(&mut tree, None, None).unwrap();

        assert_eq!(tree, before);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn img_without_src_is_ignored() {
        let site = Site::new();
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![Node::img(ImgElement::default())]);
        let before = tree.clone();

        let report = pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        assert_eq!(tree, before);
        assert_eq!(report, DocumentReport::default());
    }

    #[test]
    fn missing_file_aborts_document() {
        let site = Site::new();
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./ghost.png", None)]);

        let err = pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap_err();

        assert!(matches!(err, TransformError::Resolve(_)));
    }

    #[test]
    fn encode_failure_aborts_document() {
        let site = Site::new();
        site.image("cat.png", &mock_image(10, 10));
        let pipeline = site.pipeline_with(
            SienaConfig::default(),
            MockBackend::failing("disk full"),
            MockFetcher::default(),
        );
        let mut tree = document(vec![img("./cat.png", None)]);

        let err = pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap_err();

        assert!(matches!(err, TransformError::Imaging { ref src, .. } if src == "./cat.png"));
        assert!(pipeline.index().is_empty());
    }

    // =========================================================================
    // Events
    // =========================================================================

    #[test]
    fn events_report_rewrites_and_skips() {
        let site = Site::new();
        site.image("cat.png", &mock_image(10, 10));
        site.image("junk.png", b"junk");
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![img("./cat.png", None), img("./junk.png", None)]);
        let origin = site.doc("post.md");
        let (tx, rx) = mpsc::channel();

        pipeline.transform(&mut tree, Some(&origin), Some(&tx)).unwrap();
        drop(tx);

        let events: Vec<TransformEvent> = rx.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(
            e,
            TransformEvent::ImageRewritten { src, width: 10, variants, .. }
                if src == "./cat.png" && variants.len() == 3
        )));
        assert!(events.contains(&TransformEvent::ImageSkipped {
            document: Some(origin.clone()),
            src: "./junk.png".to_string(),
            reason: SkipReason::NotAnImage,
        }));
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    #[test]
    fn session_gc_keeps_every_document_reference() {
        let site = Site::new();
        site.image("a.png", &mock_image(10, 10));
        site.image("b.png", &mock_image(20, 20));
        let stale = hash_bytes(b"stale");
        fs::create_dir_all(site.cache_dir()).unwrap();
        fs::write(site.cache_dir().join(stale.file_name("jpg")), "x").unwrap();
        let pipeline = site.pipeline(SienaConfig::default());

        pipeline.begin_session().unwrap();
        let mut a = document(vec![img("./a.png", None)]);
        let mut b = document(vec![img("./b.png", None)]);
        let report_a = pipeline.transform(&mut a, Some(&site.doc("a.md")), None).unwrap();
        pipeline.transform(&mut b, Some(&site.doc("b.md")), None).unwrap();
        assert_eq!(report_a.gc, None);
        let gc = pipeline.finish_session();

        assert_eq!(gc.stale_hashes, vec![stale]);
        assert_eq!(cache_listing(&site.cache_dir()).len(), 6);
    }

    #[test]
    fn session_gc_removes_images_no_longer_referenced() {
        let site = Site::new();
        site.image("a.png", &mock_image(10, 10));
        site.image("b.png", &mock_image(20, 20));
        let origin = site.doc("post.md");
        let pipeline = site.pipeline(SienaConfig::default());

        pipeline.begin_session().unwrap();
        let mut both = document(vec![img("./a.png", None), img("./b.png", None)]);
        pipeline.transform(&mut both, Some(&origin), None).unwrap();
        pipeline.finish_session();

        pipeline.begin_session().unwrap();
        let mut only_a = document(vec![img("./a.png", None)]);
        pipeline.transform(&mut only_a, Some(&origin), None).unwrap();
        let gc = pipeline.finish_session();

        let b_hash = hash_bytes(&mock_image(20, 20));
        assert_eq!(gc.stale_hashes, vec![b_hash]);
        assert_eq!(gc.removed_files.len(), 3);
        let a_hash = hash_bytes(&mock_image(10, 10));
        assert!(
            cache_listing(&site.cache_dir())
                .iter()
                .all(|name| name.starts_with(a_hash.as_str()))
        );
    }

    #[test]
    fn per_document_gc_runs_after_each_document() {
        let site = Site::new();
        site.image("a.png", &mock_image(10, 10));
        site.image("b.png", &mock_image(20, 20));
        let pipeline = site.pipeline(per_document());

        let mut a = document(vec![img("./a.png", None)]);
        pipeline.transform(&mut a, Some(&site.doc("a.md")), None).unwrap();
        let mut b = document(vec![img("./b.png", None)]);
        let report = pipeline.transform(&mut b, Some(&site.doc("b.md")), None).unwrap();

        // b's pass does not reference a, so a's variants are collected
        let gc = report.gc.unwrap();
        assert_eq!(gc.stale_hashes, vec![hash_bytes(&mock_image(10, 10))]);
        assert_eq!(cache_listing(&site.cache_dir()).len(), 3);
        assert!(pipeline.finish_session().is_empty());
    }

    #[test]
    fn failed_document_skips_per_document_gc() {
        let site = Site::new();
        site.image("a.png", &mock_image(10, 10));
        let pipeline = site.pipeline(per_document());
        let mut a = document(vec![img("./a.png", None)]);
        pipeline.transform(&mut a, Some(&site.doc("a.md")), None).unwrap();

        let mut broken = document(vec![img("./ghost.png", None)]);
        assert!(
            pipeline
                .transform(&mut broken, Some(&site.doc("b.md")), None)
                .is_err()
        );

        assert_eq!(cache_listing(&site.cache_dir()).len(), 3);
    }

    #[test]
    fn custom_cache_dir_name_changes_urls_and_location() {
        let site = Site::new();
        site.image("cat.png", &mock_image(10, 10));
        let mut config = SienaConfig::default();
        config.output_dir = "dist".into();
        config.cache_dir_name = "img".into();
        let pipeline = site.pipeline(config);
        let mut tree = document(vec![img("./cat.png", None)]);

        pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        assert!(tree.pictures()[0].img.src.as_deref().unwrap().starts_with("/img/"));
        assert_eq!(pipeline.cache_dir(), site.root().join("dist/img"));
        assert_eq!(cache_listing(&site.root().join("dist/img")).len(), 3);
    }

    #[test]
    fn element_kinds_other_than_img_are_preserved() {
        let site = Site::new();
        let pipeline = site.pipeline(SienaConfig::default());
        let mut tree = document(vec![
            Node::Html("<div>raw</div>".into()),
            Node::element("h1", vec![Node::text("Title")]),
        ]);
        let before = tree.clone();

        pipeline
            .transform(&mut tree, Some(&site.doc("post.md")), None)
            .unwrap();

        assert_eq!(tree, before);
        assert!(matches!(&tree.children()[1], Node::Element(Element::Generic(g)) if g.tag == "h1"));
    }
}
