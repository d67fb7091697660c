//! Shared test utilities.
//!
//! Tree builders for hand-made documents, a real PNG encoder for tests that
//! exercise [`RustBackend`](crate::imaging::RustBackend), and a cache
//! directory lister.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let mut tree = document(vec![img("./cat.png", Some("A cat"))]);
//! pipeline.transform(&mut tree, Some(&origin), None).unwrap();
//! assert_eq!(cache_listing(&cache_dir).len(), 3);
//! ```

use crate::tree::{ImgElement, Node};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

// =========================================================================
// Tree builders
// =========================================================================

pub fn document(children: Vec<Node>) -> Node {
    Node::Root(children)
}

/// An unprocessed `<img>` node.
pub fn img(src: &str, alt: Option<&str>) -> Node {
    Node::img(ImgElement::new(src, alt.map(str::to_string)))
}

// =========================================================================
// Images
// =========================================================================

/// PNG bytes of a `width`×`height` gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

// =========================================================================
// Filesystem
// =========================================================================

/// Sorted file names in `dir`; empty when it does not exist.
pub fn cache_listing(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
