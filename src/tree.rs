//! Small element tree over a bounded event slice.
//!
//! Only security header children are ever materialised this way; the SOAP
//! body always streams. Each element remembers the event range it was built
//! from so callers can canonicalize a sub-element (e.g. `ds:SignedInfo`)
//! without re-serializing.

use crate::error::WssError;
use crate::event::{QName, StartElement, XmlEvent};
use std::ops::Range;

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub start: StartElement,
    pub children: Vec<Node>,
    /// Range of this element's events (start through end, inclusive of both)
    pub range: Range<usize>,
}

impl Element {
    /// Build the tree for `events`, which must be exactly one element.
    pub fn build(events: &[XmlEvent]) -> Result<Element, WssError> {
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        for (i, event) in events.iter().enumerate() {
            if root.is_some() {
                match event {
                    XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction { .. } => continue,
                    XmlEvent::Characters(t) if t.trim().is_empty() => continue,
                    _ => return Err(WssError::malformed("content after element end")),
                }
            }
            match event {
                XmlEvent::StartElement(start) => stack.push(Element {
                    start: start.clone(),
                    children: Vec::new(),
                    range: i..i,
                }),
                XmlEvent::EndElement(_) => {
                    let mut done = stack
                        .pop()
                        .ok_or_else(|| WssError::malformed("unbalanced element slice"))?;
                    done.range.end = i + 1;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(done)),
                        None => root = Some(done),
                    }
                }
                XmlEvent::Characters(text) => {
                    if let Some(parent) = stack.last_mut() {
                        match parent.children.last_mut() {
                            Some(Node::Text(prev)) => prev.push_str(text),
                            _ => parent.children.push(Node::Text(text.clone())),
                        }
                    }
                }
                _ => {}
            }
        }

        root.ok_or_else(|| WssError::malformed("incomplete element slice"))
    }

    pub fn name(&self) -> &QName {
        &self.start.name
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.start.name.is(namespace, local)
    }

    pub fn attr(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.start.attr(namespace, local)
    }

    pub fn id(&self) -> Option<&str> {
        self.start.id()
    }

    /// Child elements in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children().filter(move |e| e.is(namespace, local))
    }

    pub fn child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.children().find(|e| e.is(namespace, local))
    }

    /// First descendant (depth-first, excluding self) with the given name.
    pub fn descendant(&self, namespace: &str, local: &str) -> Option<&Element> {
        for child in self.children() {
            if child.is(namespace, local) {
                return Some(child);
            }
            if let Some(found) = child.descendant(namespace, local) {
                return Some(found);
            }
        }
        None
    }

    /// Concatenated direct text content, trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let Node::Text(t) = node {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// Text of a direct child, if present.
    pub fn child_text(&self, namespace: &str, local: &str) -> Option<String> {
        self.child(namespace, local).map(|e| e.text())
    }

    /// The events this element was built from.
    pub fn events<'a>(&self, all: &'a [XmlEvent]) -> &'a [XmlEvent] {
        &all[self.range.clone()]
    }
}
