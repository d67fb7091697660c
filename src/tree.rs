//! Document tree model.
//!
//! A small, closed model of the rendered document: a root, text, raw HTML and
//! elements. The elements the pipeline reads or produces have typed attribute
//! schemas ([`ImgElement`], [`PictureElement`], [`SourceElement`]); everything
//! else is a [`GenericElement`] with an ordered attribute list.
//!
//! The idempotence guard is [`ImgElement::processed`]: the walker never touches
//! an `img` that already carries it, so walking a tree twice is a no-op the
//! second time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of the `loading` attribute on generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loading {
    #[default]
    Lazy,
    Eager,
}

impl Loading {
    pub fn as_str(self) -> &'static str {
        match self {
            Loading::Lazy => "lazy",
            Loading::Eager => "eager",
        }
    }
}

impl fmt::Display for Loading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Root(Vec<Node>),
    Element(Element),
    Text(String),
    /// Raw HTML passed through from the source document.
    Html(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Img(ImgElement),
    Picture(PictureElement),
    Source(SourceElement),
    Generic(GenericElement),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImgElement {
    pub src: Option<String>,
    pub alt: Option<String>,
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub loading: Option<Loading>,
    /// Set on images produced by the pipeline.
    pub processed: bool,
}

impl ImgElement {
    pub fn new(src: impl Into<String>, alt: Option<String>) -> Self {
        Self {
            src: Some(src.into()),
            alt,
            ..Self::default()
        }
    }
}

/// `<picture>`: the canonical image first, then one source per alternate format.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureElement {
    pub img: ImgElement,
    pub sources: Vec<SourceElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceElement {
    pub srcset: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl GenericElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl Node {
    pub fn text(s: impl Into<String>) -> Self {
        Node::Text(s.into())
    }

    pub fn element(tag: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element(Element::Generic(
            GenericElement::new(tag).with_children(children),
        ))
    }

    pub fn img(img: ImgElement) -> Self {
        Node::Element(Element::Img(img))
    }

    /// Children the walker should descend into.
    ///
    /// `picture`, `img` and `source` are leaves from the walker's point of
    /// view: a picture only ever holds pipeline output.
    pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Root(children) => Some(children),
            Node::Element(Element::Generic(el)) => Some(&mut el.children),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Root(children) => children,
            Node::Element(Element::Generic(el)) => &el.children,
            _ => &[],
        }
    }

    /// Depth-first visit of every node, parents before children.
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        for child in self.children() {
            child.for_each(f);
        }
    }

    /// All pictures in document order.
    pub fn pictures(&self) -> Vec<&PictureElement> {
        let mut found = Vec::new();
        self.for_each(&mut |node| {
            if let Node::Element(Element::Picture(p)) = node {
                found.push(p);
            }
        });
        found
    }

    /// All not-yet-rewritten images in document order.
    pub fn images(&self) -> Vec<&ImgElement> {
        let mut found = Vec::new();
        self.for_each(&mut |node| {
            if let Node::Element(Element::Img(img)) = node {
                found.push(img);
            }
        });
        found
    }

    /// Concatenated text content, used for alt text and page titles.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.for_each(&mut |node| {
            if let Node::Text(t) = node {
                out.push_str(t);
            }
        });
        out
    }
}
