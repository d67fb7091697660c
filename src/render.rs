//! Document tree to HTML.
//!
//! `picture`, `img` and `source` have a fixed shape and are emitted with
//! [maud](https://maud.lambda.xyz/) templates. Generic elements carry their tag
//! name at runtime, which `html!` cannot express, so they are serialized by
//! hand through [`maud::Escaper`].

use crate::tree::{Element, GenericElement, ImgElement, Loading, Node, PictureElement, SourceElement};
use maud::{DOCTYPE, Escaper, Markup, Render, html};
use std::fmt::Write;

/// Elements that never have content or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

impl Render for Node {
    fn render_to(&self, buffer: &mut String) {
        match self {
            Node::Root(children) => {
                for child in children {
                    child.render_to(buffer);
                }
            }
            Node::Text(text) => escape_into(buffer, text),
            Node::Html(raw) => buffer.push_str(raw),
            Node::Element(Element::Img(img)) => render_img(img).render_to(buffer),
            Node::Element(Element::Picture(picture)) => render_picture(picture).render_to(buffer),
            Node::Element(Element::Source(source)) => render_source(source).render_to(buffer),
            Node::Element(Element::Generic(el)) => render_generic(el, buffer),
        }
    }
}

pub fn render_node(node: &Node) -> Markup {
    node.render()
}

/// Full HTML page around a rendered document.
pub fn render_page(title: &str, root: &Node) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
            }
            body {
                main { (root) }
            }
        }
    }
}

fn render_img(img: &ImgElement) -> Markup {
    html! {
        img
            data-siena[img.processed]
            src=[img.src.as_deref()]
            width=[img.width]
            height=[img.height]
            loading=[img.loading.map(Loading::as_str)]
            alt=[img.alt.as_deref()]
            title=[img.title.as_deref()];
    }
}

fn render_source(source: &SourceElement) -> Markup {
    html! {
        source srcset=(source.srcset);
    }
}

fn render_picture(picture: &PictureElement) -> Markup {
    html! {
        picture {
            (render_img(&picture.img))
            @for source in &picture.sources {
                (render_source(source))
            }
        }
    }
}

fn render_generic(el: &GenericElement, buffer: &mut String) {
    buffer.push('<');
    buffer.push_str(&el.tag);
    for (name, value) in &el.attributes {
        buffer.push(' ');
        buffer.push_str(name);
        if !value.is_empty() {
            buffer.push_str("=\"");
            escape_into(buffer, value);
            buffer.push('"');
        }
    }
    buffer.push('>');
    if VOID_ELEMENTS.contains(&el.tag.as_str()) {
        return;
    }
    for child in &el.children {
        child.render_to(buffer);
    }
    buffer.push_str("</");
    buffer.push_str(&el.tag);
    buffer.push('>');
}

fn escape_into(buffer: &mut String, text: &str) {
    // Writing into a String cannot fail
    let _ = Escaper::new(buffer).write_str(text);
}
