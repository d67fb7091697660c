//! Turning image references into raw bytes.
//!
//! A reference is either an absolute URL, fetched over HTTP, or a local path:
//!
//! | `src` | Resolved against |
//! |---|---|
//! | `https://…` | network ([`Fetcher`]) |
//! | `./a.png`, `../b.png` | directory of the document that references it |
//! | `img/c.png`, `/img/c.png` | build root (a leading `/` is site-root, not filesystem-root) |
//!
//! Local references from documents with no origin path (synthetic documents)
//! cannot be resolved and are skipped rather than reported as errors.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("cannot read image {}: {source}", .path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
}

/// An image found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub src: String,
    pub alt: Option<String>,
    /// Path of the document containing the reference, when it has one.
    pub origin: Option<PathBuf>,
}

/// Network transport for remote references.
pub trait Fetcher: Sync {
    /// Fetch the full body of `url` into memory.
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, ResolveError>;
}

/// Blocking HTTP fetcher on `ureq`.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, ResolveError> {
        let fetch_error = |message: String| ResolveError::Fetch {
            url: url.to_string(),
            message,
        };
        let response = self.agent.get(url.as_str()).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => fetch_error(format!("HTTP {code}")),
            other => fetch_error(other.to_string()),
        })?;
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| fetch_error(e.to_string()))?;
        Ok(body)
    }
}

/// Parse `src` as an absolute URL. Relative paths fail to parse and are local.
pub fn parse_remote(src: &str) -> Option<Url> {
    let url = Url::parse(src).ok()?;
    // `C:\img.png` parses with scheme `c`; a real scheme is longer than a drive letter
    if url.scheme().len() == 1 {
        return None;
    }
    Some(url)
}

fn is_document_relative(src: &str) -> bool {
    src.starts_with("./") || src.starts_with("../")
}

/// Where a local reference lives on disk.
///
/// Returns `None` when the reference is document-relative but the document has
/// no origin path.
pub fn local_path(src: &str, origin: Option<&Path>, build_root: &Path) -> Option<PathBuf> {
    if is_document_relative(src) {
        let origin = origin?;
        let dir = origin.parent().unwrap_or(Path::new(""));
        return Some(dir.join(src));
    }
    Some(build_root.join(src.trim_start_matches('/')))
}

/// Resolves references for one build root.
pub struct Resolver<'a, F: Fetcher> {
    fetcher: &'a F,
    build_root: &'a Path,
}

impl<'a, F: Fetcher> Resolver<'a, F> {
    pub fn new(fetcher: &'a F, build_root: &'a Path) -> Self {
        Self {
            fetcher,
            build_root,
        }
    }

    /// Raw bytes for `reference`, or `None` when it cannot be resolved in
    /// this context (local reference without an origin document).
    pub fn resolve(&self, reference: &ImageReference) -> Result<Option<Vec<u8>>, ResolveError> {
        if let Some(url) = parse_remote(&reference.src) {
            return self.fetcher.fetch(&url).map(Some);
        }
        let Some(path) = local_path(&reference.src, reference.origin.as_deref(), self.build_root)
        else {
            return Ok(None);
        };
        std::fs::read(&path)
            .map(Some)
            .map_err(|source| ResolveError::Local { path, source })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory fetcher serving canned bodies; unknown URLs fail.
    #[derive(Default)]
    pub struct MockFetcher {
        pub bodies: HashMap<String, Vec<u8>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        pub fn with(url: &str, body: Vec<u8>) -> Self {
            Self {
                bodies: HashMap::from([(url.to_string(), body)]),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Fetcher for MockFetcher {
        fn fetch(&self, url: &Url) -> Result<Vec<u8>, ResolveError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.bodies
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| ResolveError::Fetch {
                    url: url.to_string(),
                    message: "HTTP 404".to_string(),
                })
        }
    }

    fn reference(src: &str, origin: Option<&Path>) -> ImageReference {
        ImageReference {
            src: src.to_string(),
            alt: None,
            origin: origin.map(Path::to_path_buf),
        }
    }

    #[test]
    fn relative_marker_resolves_against_document_dir() {
        let root = Path::new("/site");
        let origin = Path::new("/site/content/posts/hello.md");
        assert_eq!(
            local_path("./cat.png", Some(origin), root),
            Some(PathBuf::from("/site/content/posts/./cat.png"))
        );
        assert_eq!(
            local_path("../shared/dog.png", Some(origin), root),
            Some(PathBuf::from("/site/content/posts/../shared/dog.png"))
        );
    }

    #[test]
    fn bare_path_resolves_against_build_root() {
        let origin = Path::new("/site/content/hello.md");
        assert_eq!(
            local_path("assets/cat.png", Some(origin), Path::new("/site")),
            Some(PathBuf::from("/site/assets/cat.png"))
        );
    }

    #[test]
    fn leading_slash_stays_under_build_root() {
        assert_eq!(
            local_path("/assets/cat.png", None, Path::new("/site")),
            Some(PathBuf::from("/site/assets/cat.png"))
        );
    }

    #[test]
    fn relative_marker_without_origin_is_unresolvable() {
        assert_eq!(local_path("./cat.png", None, Path::new("/site")), None);
    }

    #[test]
    fn remote_detection() {
        assert!(parse_remote("https://example.com/cat.png").is_some());
        assert!(parse_remote("http://example.com/a b.png").is_some());
        assert!(parse_remote("./cat.png").is_none());
        assert!(parse_remote("/cat.png").is_none());
        assert!(parse_remote("cat.png").is_none());
        assert!(parse_remote("C:\\images\\cat.png").is_none());
    }

    #[test]
    fn resolve_reads_local_file() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("content");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("cat.png"), b"meow").unwrap();

        let fetcher = MockFetcher::default();
        let resolver = Resolver::new(&fetcher, tmp.path());
        let bytes = resolver
            .resolve(&reference("./cat.png", Some(&docs.join("post.md"))))
            .unwrap();

        assert_eq!(bytes.as_deref(), Some(&b"meow"[..]));
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn resolve_missing_local_file_errors() {
        let tmp = TempDir::new().unwrap();
        let fetcher = MockFetcher::default();
        let resolver = Resolver::new(&fetcher, tmp.path());

        let err = resolver
            .resolve(&reference("missing.png", Some(&tmp.path().join("a.md"))))
            .unwrap_err();

        assert!(matches!(err, ResolveError::Local { ref path, .. } if path.ends_with("missing.png")));
    }

    #[test]
    fn resolve_relative_without_origin_skips() {
        let tmp = TempDir::new().unwrap();
        let fetcher = MockFetcher::default();
        let resolver = Resolver::new(&fetcher, tmp.path());

        assert_eq!(resolver.resolve(&reference("./cat.png", None)).unwrap(), None);
    }

    #[test]
    fn resolve_fetches_remote() {
        let tmp = TempDir::new().unwrap();
        let fetcher = MockFetcher::with("https://cdn.test/cat.png", b"remote".to_vec());
        let resolver = Resolver::new(&fetcher, tmp.path());

        let bytes = resolver
            .resolve(&reference("https://cdn.test/cat.png", None))
            .unwrap();

        assert_eq!(bytes, Some(b"remote".to_vec()));
        assert_eq!(
            *fetcher.requests.lock().unwrap(),
            vec!["https://cdn.test/cat.png".to_string()]
        );
    }

    #[test]
    fn resolve_remote_failure_errors() {
        let tmp = TempDir::new().unwrap();
        let fetcher = MockFetcher::default();
        let resolver = Resolver::new(&fetcher, tmp.path());

        let err = resolver
            .resolve(&reference("https://cdn.test/gone.png", None))
            .unwrap_err();

        assert!(matches!(err, ResolveError::Fetch { .. }));
        assert!(err.to_string().contains("gone.png"));
    }
}
