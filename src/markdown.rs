//! Markdown to document tree.
//!
//! Parsing is `pulldown-cmark`'s; this module only folds its event stream into
//! a [`Node`] tree so the walker has typed `img` elements to rewrite. Each
//! `Start` event opens a frame, each `End` closes one and attaches the result
//! to its parent.
//!
//! | Markdown | Node |
//! |---|---|
//! | `![alt](src "title")` | [`ImgElement`] (alt is the flattened inner text) |
//! | block and inline HTML | [`Node::Html`], passed through untouched |
//! | everything else | [`GenericElement`] with the usual HTML tag |

use crate::tree::{Element, GenericElement, ImgElement, Node};
use pulldown_cmark::{
    Alignment, CodeBlockKind, Event, HeadingLevel, LinkType, Options, Parser, Tag, TagEnd,
};
use std::collections::HashMap;

/// Extensions enabled on top of CommonMark.
pub fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES
}

/// Parse `text` into a [`Node::Root`].
pub fn parse(text: &str) -> Node {
    let mut builder = TreeBuilder::default();
    for event in Parser::new_ext(text, options()) {
        builder.event(event);
    }
    builder.finish()
}

/// Text of the first `h1`, if any.
pub fn title(root: &Node) -> Option<String> {
    let mut found = None;
    root.for_each(&mut |node| {
        if found.is_none()
            && let Node::Element(Element::Generic(el)) = node
            && el.tag == "h1"
        {
            found = Some(node.text_content());
        }
    });
    found.filter(|t| !t.trim().is_empty())
}

enum Frame {
    Element(GenericElement),
    Image {
        src: String,
        title: String,
        children: Vec<Node>,
    },
    /// Children are spliced into the parent (HTML blocks, metadata).
    Transparent(Vec<Node>),
}

impl Frame {
    fn children(&mut self) -> &mut Vec<Node> {
        match self {
            Frame::Element(el) => &mut el.children,
            Frame::Image { children, .. } | Frame::Transparent(children) => children,
        }
    }
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<Frame>,
    root: Vec<Node>,
    alignments: Vec<Alignment>,
    in_table_head: bool,
    cell: usize,
    footnotes: HashMap<String, usize>,
}

impl TreeBuilder {
    fn push(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(frame) => frame.children().push(node),
            None => self.root.push(node),
        }
    }

    fn open(&mut self, el: GenericElement) {
        self.stack.push(Frame::Element(el));
    }

    fn close(&mut self) {
        match self.stack.pop() {
            Some(Frame::Element(el)) => self.push(Node::Element(Element::Generic(el))),
            Some(Frame::Image {
                src,
                title,
                children,
            }) => {
                let alt = Node::Root(children).text_content();
                let mut img = ImgElement::new(src, Some(alt));
                img.title = Some(title).filter(|t| !t.is_empty());
                self.push(Node::img(img));
            }
            Some(Frame::Transparent(children)) => {
                for child in children {
                    self.push(child);
                }
            }
            None => {}
        }
    }

    fn footnote_number(&mut self, label: &str) -> usize {
        let next = self.footnotes.len() + 1;
        *self.footnotes.entry(label.to_string()).or_insert(next)
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.open(GenericElement::new("p")),
            Tag::Heading {
                level, id, classes, ..
            } => {
                let mut el = GenericElement::new(heading_tag(level));
                if let Some(id) = id {
                    el = el.with_attr("id", id.to_string());
                }
                if !classes.is_empty() {
                    let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
                    el = el.with_attr("class", classes.join(" "));
                }
                self.open(el);
            }
            Tag::BlockQuote(_) => self.open(GenericElement::new("blockquote")),
            Tag::CodeBlock(kind) => {
                self.open(GenericElement::new("pre"));
                let mut code = GenericElement::new("code");
                if let CodeBlockKind::Fenced(info) = kind
                    && let Some(lang) = info.split_whitespace().next()
                {
                    code = code.with_attr("class", format!("language-{lang}"));
                }
                self.open(code);
            }
            Tag::HtmlBlock | Tag::MetadataBlock(_) => {
                self.stack.push(Frame::Transparent(Vec::new()))
            }
            Tag::List(Some(start)) => {
                let mut ol = GenericElement::new("ol");
                if start != 1 {
                    ol = ol.with_attr("start", start.to_string());
                }
                self.open(ol);
            }
            Tag::List(None) => self.open(GenericElement::new("ul")),
            Tag::Item => self.open(GenericElement::new("li")),
            Tag::FootnoteDefinition(label) => {
                let number = self.footnote_number(&label);
                self.open(
                    GenericElement::new("div")
                        .with_attr("class", "footnote-definition")
                        .with_attr("id", label.to_string()),
                );
                self.push(Node::Element(Element::Generic(
                    GenericElement::new("sup")
                        .with_attr("class", "footnote-definition-label")
                        .with_children(vec![Node::text(number.to_string())]),
                )));
            }
            Tag::Table(alignments) => {
                self.alignments = alignments;
                self.open(GenericElement::new("table"));
            }
            Tag::TableHead => {
                self.in_table_head = true;
                self.cell = 0;
                self.open(GenericElement::new("thead"));
                self.open(GenericElement::new("tr"));
            }
            Tag::TableRow => {
                self.cell = 0;
                self.open(GenericElement::new("tr"));
            }
            Tag::TableCell => {
                let mut cell = GenericElement::new(if self.in_table_head { "th" } else { "td" });
                if let Some(style) = self.alignments.get(self.cell).and_then(|a| alignment_style(*a))
                {
                    cell = cell.with_attr("style", style);
                }
                self.cell += 1;
                self.open(cell);
            }
            Tag::Emphasis => self.open(GenericElement::new("em")),
            Tag::Strong => self.open(GenericElement::new("strong")),
            Tag::Strikethrough => self.open(GenericElement::new("del")),
            Tag::Superscript => self.open(GenericElement::new("sup")),
            Tag::Subscript => self.open(GenericElement::new("sub")),
            Tag::Link {
                link_type,
                dest_url,
                title,
                ..
            } => {
                let href = match link_type {
                    LinkType::Email => format!("mailto:{dest_url}"),
                    _ => dest_url.to_string(),
                };
                let mut a = GenericElement::new("a").with_attr("href", href);
                if !title.is_empty() {
                    a = a.with_attr("title", title.to_string());
                }
                self.open(a);
            }
            Tag::Image {
                dest_url, title, ..
            } => self.stack.push(Frame::Image {
                src: dest_url.to_string(),
                title: title.to_string(),
                children: Vec::new(),
            }),
            Tag::DefinitionList => self.open(GenericElement::new("dl")),
            Tag::DefinitionListTitle => self.open(GenericElement::new("dt")),
            Tag::DefinitionListDefinition => self.open(GenericElement::new("dd")),
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::CodeBlock => {
                self.close();
                self.close();
            }
            TagEnd::TableHead => {
                self.in_table_head = false;
                self.close();
                self.close();
            }
            TagEnd::Table => {
                self.alignments.clear();
                self.close();
            }
            _ => self.close(),
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.push(Node::text(text.to_string())),
            Event::Code(code) => self.push(Node::element("code", vec![Node::text(code.to_string())])),
            Event::InlineMath(math) | Event::DisplayMath(math) => self.push(Node::Element(
                Element::Generic(
                    GenericElement::new("span")
                        .with_attr("class", "math")
                        .with_children(vec![Node::text(math.to_string())]),
                ),
            )),
            Event::Html(html) | Event::InlineHtml(html) => self.push(Node::Html(html.to_string())),
            Event::FootnoteReference(label) => {
                let number = self.footnote_number(&label);
                let link = GenericElement::new("a")
                    .with_attr("href", format!("#{label}"))
                    .with_children(vec![Node::text(number.to_string())]);
                self.push(Node::Element(Element::Generic(
                    GenericElement::new("sup")
                        .with_attr("class", "footnote-reference")
                        .with_children(vec![Node::Element(Element::Generic(link))]),
                )));
            }
            Event::SoftBreak => self.push(Node::text("\n")),
            Event::HardBreak => self.push(Node::element("br", Vec::new())),
            Event::Rule => self.push(Node::element("hr", Vec::new())),
            Event::TaskListMarker(checked) => {
                let mut input = GenericElement::new("input")
                    .with_attr("type", "checkbox")
                    .with_attr("disabled", "");
                if checked {
                    input = input.with_attr("checked", "");
                }
                self.push(Node::Element(Element::Generic(input)));
            }
        }
    }

    fn finish(mut self) -> Node {
        // Unbalanced streams do not happen with pulldown-cmark, but never drop content
        while !self.stack.is_empty() {
            self.close();
        }
        Node::Root(self.root)
    }
}

fn heading_tag(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

fn alignment_style(alignment: Alignment) -> Option<&'static str> {
    match alignment {
        Alignment::None => None,
        Alignment::Left => Some("text-align: left"),
        Alignment::Center => Some("text-align: center"),
        Alignment::Right => Some("text-align: right"),
    }
}
