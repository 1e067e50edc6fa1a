//! Exclusive XML canonicalization (without comments) over event slices.
//!
//! Operates on a bounded slice: one element subtree or a content sequence.
//! Only visibly utilised namespaces are rendered, and only where no output
//! ancestor already rendered the same binding.

use crate::event::{QName, StartElement, XmlEvent};
use std::collections::BTreeMap;

/// Prefix -> URI bindings rendered by output ancestors. The default
/// namespace uses the empty prefix.
type Rendered = BTreeMap<String, String>;

/// Canonicalize an event slice.
pub fn canonicalize(events: &[XmlEvent]) -> Vec<u8> {
    let mut out = String::new();
    let mut scopes: Vec<Rendered> = Vec::new();

    for event in events {
        match event {
            XmlEvent::StartElement(start) => {
                let mut rendered = scopes.last().cloned().unwrap_or_default();
                write_start(&mut out, start, &mut rendered);
                scopes.push(rendered);
            }
            XmlEvent::EndElement(name) => {
                scopes.pop();
                out.push_str("</");
                out.push_str(&name.qualified());
                out.push('>');
            }
            XmlEvent::Characters(text) => escape_text(&mut out, text),
            XmlEvent::ProcessingInstruction { target, data } => {
                out.push_str("<?");
                out.push_str(target);
                if !data.is_empty() {
                    out.push(' ');
                    out.push_str(data);
                }
                out.push_str("?>");
            }
            XmlEvent::Comment(_) | XmlEvent::Declaration { .. } => {}
        }
    }

    out.into_bytes()
}

fn write_start(out: &mut String, start: &StartElement, rendered: &mut Rendered) {
    let mut needed: BTreeMap<String, String> = BTreeMap::new();

    visibly_utilized(&start.name, true, &mut needed);
    for attr in &start.attributes {
        visibly_utilized(&attr.name, false, &mut needed);
    }

    out.push('<');
    out.push_str(&start.name.qualified());

    // BTreeMap order puts the default ("") first, then prefixes
    for (prefix, uri) in needed {
        let current = rendered.get(&prefix).map(String::as_str).unwrap_or("");
        if current == uri {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(&prefix);
            out.push_str("=\"");
        }
        escape_attr(out, &uri);
        out.push('"');
        rendered.insert(prefix, uri);
    }

    let mut attrs: Vec<_> = start.attributes.iter().collect();
    attrs.sort_by(|a, b| {
        let ka = (a.name.namespace.as_deref().unwrap_or(""), a.name.local.as_str());
        let kb = (b.name.namespace.as_deref().unwrap_or(""), b.name.local.as_str());
        ka.cmp(&kb)
    });
    for attr in attrs {
        out.push(' ');
        out.push_str(&attr.name.qualified());
        out.push_str("=\"");
        escape_attr(out, &attr.value);
        out.push('"');
    }
    out.push('>');
}

fn visibly_utilized(name: &QName, is_element: bool, needed: &mut BTreeMap<String, String>) {
    match (&name.prefix, &name.namespace) {
        (Some(p), _) if p == "xml" => {}
        (Some(p), Some(uri)) => {
            needed.insert(p.clone(), uri.clone());
        }
        (None, namespace) if is_element => {
            // Unprefixed elements use the default namespace, possibly empty
            needed.insert(String::new(), namespace.clone().unwrap_or_default());
        }
        _ => {}
    }
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}
