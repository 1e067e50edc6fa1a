//! Event construction for the elements the outbound builder inserts.

use crate::event::{NamespaceDecl, QName, StartElement, XmlEvent};
use crate::ns::{self, prefix};

/// A namespace together with the prefix the builder writes it with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ns {
    pub uri: &'static str,
    pub prefix: &'static str,
}

pub const WSSE: Ns = Ns {
    uri: ns::WSSE,
    prefix: prefix::WSSE,
};
pub const WSSE11: Ns = Ns {
    uri: ns::WSSE11,
    prefix: prefix::WSSE11,
};
pub const WSU: Ns = Ns {
    uri: ns::WSU,
    prefix: prefix::WSU,
};
pub const WSC: Ns = Ns {
    uri: ns::WSC,
    prefix: prefix::WSC,
};
pub const DS: Ns = Ns {
    uri: ns::DSIG,
    prefix: prefix::DSIG,
};
pub const XENC: Ns = Ns {
    uri: ns::XENC,
    prefix: prefix::XENC,
};

/// Builds a self-contained element: every namespace is declared on the
/// outermost element that uses it.
#[derive(Debug, Default)]
pub struct ElementBuilder {
    events: Vec<XmlEvent>,
    /// Start element not yet pushed, still accepting attributes
    pending: Option<StartElement>,
    /// Open elements with the prefixes each declared
    open: Vec<(QName, Vec<&'static str>)>,
}

impl ElementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn declared(&self, prefix: &str) -> bool {
        self.open
            .iter()
            .any(|(_, prefixes)| prefixes.contains(&prefix))
    }

    fn flush(&mut self) {
        if let Some(start) = self.pending.take() {
            self.events.push(XmlEvent::StartElement(start));
        }
    }

    /// Declare `ns` on the pending element unless an ancestor already did.
    fn bind(&mut self, ns: Ns) {
        if self.declared(ns.prefix) {
            return;
        }
        if let (Some(start), Some((_, prefixes))) = (self.pending.as_mut(), self.open.last_mut()) {
            if !prefixes.contains(&ns.prefix) {
                start.declare(Some(ns.prefix), ns.uri);
                prefixes.push(ns.prefix);
            }
        }
    }

    pub fn open(&mut self, ns: Ns, local: &str) -> &mut Self {
        self.flush();
        let name = QName::new(Some(ns.uri), Some(ns.prefix), local);
        self.pending = Some(StartElement::new(name.clone()));
        self.open.push((name, Vec::new()));
        self.bind(ns);
        self
    }

    /// Unqualified attribute on the element just opened.
    pub fn attr(&mut self, local: &str, value: &str) -> &mut Self {
        if let Some(start) = self.pending.as_mut() {
            start.push_attr(QName::local(local), value);
        }
        self
    }

    /// Qualified attribute on the element just opened.
    pub fn qualified_attr(&mut self, ns: Ns, local: &str, value: &str) -> &mut Self {
        self.bind(ns);
        if let Some(start) = self.pending.as_mut() {
            start.push_attr(QName::new(Some(ns.uri), Some(ns.prefix), local), value);
        }
        self
    }

    /// `wsu:Id` on the element just opened.
    pub fn wsu_id(&mut self, id: &str) -> &mut Self {
        self.qualified_attr(WSU, ns::attr::ID, id)
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.flush();
        self.events.push(XmlEvent::Characters(text.to_string()));
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.flush();
        if let Some((name, _)) = self.open.pop() {
            self.events.push(XmlEvent::EndElement(name));
        }
        self
    }

    /// `<local>text</local>`.
    pub fn leaf(&mut self, ns: Ns, local: &str, text: &str) -> &mut Self {
        self.open(ns, local).text(text).close()
    }

    /// Element with one unqualified attribute and no content.
    pub fn empty(&mut self, ns: Ns, local: &str, attr: &str, value: &str) -> &mut Self {
        self.open(ns, local).attr(attr, value).close()
    }

    /// Splice in a complete element built elsewhere.
    pub fn append(&mut self, events: &[XmlEvent]) -> &mut Self {
        self.flush();
        self.events.extend_from_slice(events);
        self
    }

    /// `wsse:SecurityTokenReference` pointing at a token in the same header.
    pub fn token_reference(&mut self, id: &str, value_type: &str) -> &mut Self {
        self.open(WSSE, ns::node::SECURITY_TOKEN_REFERENCE)
            .open(WSSE, ns::node::REFERENCE)
            .attr(ns::attr::URI, &format!("#{}", id))
            .attr(ns::attr::VALUE_TYPE, value_type)
            .close()
            .close()
    }

    /// `ds:KeyInfo` naming a key alias.
    pub fn key_name(&mut self, alias: &str) -> &mut Self {
        self.open(DS, ns::node::KEY_INFO)
            .leaf(DS, ns::node::KEY_NAME, alias)
            .close()
    }

    pub fn finish(mut self) -> Vec<XmlEvent> {
        while !self.open.is_empty() {
            self.close();
        }
        self.events
    }
}

/// Add `ns` to an existing start element unless it already binds the prefix.
pub fn ensure_declared(start: &mut StartElement, ns: Ns) {
    let bound = start
        .namespaces
        .iter()
        .any(|NamespaceDecl { prefix, .. }| prefix.as_deref() == Some(ns.prefix));
    if !bound {
        start.declare(Some(ns.prefix), ns.uri);
    }
}

/// Fresh `<Kind>-<uuid>` identifier.
pub fn new_id(kind: &str) -> String {
    format!("{}-{}", kind, uuid::Uuid::new_v4())
}
