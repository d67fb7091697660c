//! # Siena
//!
//! Responsive, content-addressed images for markdown sites. Every image in a
//! document tree becomes a `<picture>` with a width-capped canonical JPEG and
//! alternate-format `<source>`s, backed by an on-disk cache keyed by the
//! SHA-256 of the source bytes.
//!
//! # Architecture
//!
//! ```text
//! markdown ──parse──▶ Node tree ──Pipeline::transform──▶ Node tree ──render──▶ HTML
//!                                       │
//!              ┌────────────────────────┼─────────────────────────┐
//!              ▼                        ▼                         ▼
//!          resolve                  variant                      gc
//!     (file / HTTP bytes)   (hash, index, encode)     (drop unreferenced hashes)
//! ```
//!
//! The walk fans out over sibling subtrees on rayon. Node mutation needs no
//! synchronization because each branch owns its `&mut Node`; the cache index,
//! the referenced-hash sets and the per-hash generation locks are the only
//! shared state.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Host entry point: sessions, per-document transforms, GC scope |
//! | [`walk`] | Concurrent tree traversal, `img` → `picture` rewrite, progress events |
//! | [`variant`] | Cache-aware variant generation with per-hash locking |
//! | [`cache`] | Content hashing, the cache index, referenced hashes, stats |
//! | [`gc`] | Deletes variants of hashes nothing referenced |
//! | [`resolve`] | Image reference → bytes (local paths, HTTP via `ureq`) |
//! | [`imaging`] | `ImageBackend` trait, the pure-Rust backend, dimension math |
//! | [`tree`] | Typed document tree |
//! | [`markdown`] | `pulldown-cmark` events → tree |
//! | [`render`] | Tree → HTML with Maud |
//! | [`config`] | `siena.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Content Addressing
//!
//! Variants are named `<sha256>.<format>`, so renaming or moving a source image
//! costs nothing, and the same photo used by ten documents is encoded once.
//! The cache directory listing is the index; there is no manifest to drift out
//! of sync with the files.
//!
//! ## Idempotent Rewrites
//!
//! Rewritten images carry a `processed` marker (rendered as `data-siena`) and
//! live inside a `picture`, which the walker never descends into. Running the
//! pipeline over its own output changes nothing.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate (Lanczos3 resampling, rav1e
//! for AVIF). No ImageMagick, no system libraries: the binary is
//! self-contained.

pub mod cache;
pub mod config;
pub mod gc;
pub mod imaging;
pub mod markdown;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod resolve;
pub mod tree;
pub mod variant;
pub mod walk;

#[cfg(test)]
pub(crate) mod test_helpers;
