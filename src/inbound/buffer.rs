//! Reference & canonicalization buffer.
//!
//! Every event the inbound machine processes is recorded here, tagged with
//! the layer it belongs to. Elements whose id is the target of a pending
//! reference open a span on arrival; each recorded event is appended to all
//! open spans until a span's own end element closes it. While the SOAP
//! header streams past, events are additionally kept in a header log so
//! references to header elements that were already seen can be served
//! after the fact.

use crate::event::XmlEvent;
use std::collections::HashMap;
use std::ops::Range;

/// Which rendering of the document an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Present in the document as received
    Wire,
    /// Part of the `xenc:EncryptedData` element with index k
    Cipher(usize),
    /// Decrypted content of EncryptedData k
    Plain(usize),
}

/// Who is waiting for a span: (signature index, reference index).
pub type Target = (usize, usize);

pub type Recorded = (Layer, XmlEvent);

#[derive(Debug)]
struct Span {
    id: String,
    depth: usize,
    targets: Vec<Target>,
    events: Vec<Recorded>,
}

/// A span whose element has closed.
#[derive(Debug)]
pub struct ClosedSpan {
    pub id: String,
    pub targets: Vec<Target>,
    pub events: Vec<Recorded>,
}

/// Result of asking for a reference target.
#[derive(Debug)]
pub enum Want {
    /// The element was already seen in the header; its events
    Available(Vec<Recorded>),
    /// The span will be delivered by [`ReferenceBuffer::record`]
    Deferred,
}

#[derive(Debug, Default)]
struct HeaderLog {
    active: bool,
    events: Vec<Recorded>,
    /// Open logged elements: (id, start index, depth)
    open: Vec<(Option<String>, usize, usize)>,
    closed: HashMap<String, Range<usize>>,
}

#[derive(Debug, Default)]
pub struct ReferenceBuffer {
    depth: usize,
    wanted: HashMap<String, Vec<Target>>,
    open: Vec<Span>,
    log: HeaderLog,
    id_counts: HashMap<String, usize>,
}

impl ReferenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start keeping the header log.
    pub fn start_log(&mut self) {
        self.log.active = true;
    }

    pub fn stop_log(&mut self) {
        self.log.active = false;
        self.log.open.clear();
    }

    /// Register interest in the element with `id`.
    pub fn want(&mut self, id: &str, target: Target) -> Want {
        if let Some(range) = self.log.closed.get(id) {
            return Want::Available(self.log.events[range.clone()].to_vec());
        }
        if let Some(span) = self.open.iter_mut().find(|s| s.id == id) {
            span.targets.push(target);
            return Want::Deferred;
        }
        // An enclosing header element that is still open: seed its span from the log
        if let Some((_, start, depth)) = self
            .log
            .open
            .iter()
            .find(|(open_id, _, _)| open_id.as_deref() == Some(id))
        {
            self.open.push(Span {
                id: id.to_string(),
                depth: *depth,
                targets: vec![target],
                events: self.log.events[*start..].to_vec(),
            });
            return Want::Deferred;
        }
        self.wanted.entry(id.to_string()).or_default().push(target);
        Want::Deferred
    }

    /// Record one processed event, returning spans it closed.
    pub fn record(&mut self, layer: Layer, event: &XmlEvent) -> Vec<ClosedSpan> {
        if let XmlEvent::StartElement(start) = event {
            self.depth += 1;
            let id = start.id().map(String::from);
            if let Some(id) = &id {
                *self.id_counts.entry(id.clone()).or_insert(0) += 1;
                if let Some(targets) = self.wanted.remove(id) {
                    self.open.push(Span {
                        id: id.clone(),
                        depth: self.depth,
                        targets,
                        events: Vec::new(),
                    });
                }
            }
            if self.log.active {
                self.log.open.push((id, self.log.events.len(), self.depth));
            }
        }

        for span in &mut self.open {
            span.events.push((layer, event.clone()));
        }
        if self.log.active {
            self.log.events.push((layer, event.clone()));
        }

        let mut closed = Vec::new();
        if let XmlEvent::EndElement(_) = event {
            let depth = self.depth;
            if let Some(i) = self.open.iter().position(|s| s.depth == depth) {
                let span = self.open.remove(i);
                closed.push(ClosedSpan {
                    id: span.id,
                    targets: span.targets,
                    events: span.events,
                });
            }
            if self.log.active {
                if let Some((id, start, open_depth)) = self.log.open.pop() {
                    if open_depth == depth {
                        if let Some(id) = id {
                            self.log.closed.insert(id, start..self.log.events.len());
                        }
                    } else {
                        self.log.open.push((id, start, open_depth));
                    }
                }
            }
            self.depth = self.depth.saturating_sub(1);
        }
        closed
    }

    /// Ids still wanted, or inside spans that never closed.
    pub fn unresolved(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.wanted.keys().cloned().collect();
        ids.extend(self.open.iter().map(|s| s.id.clone()));
        ids.sort();
        ids
    }

    /// How many elements carried `id`.
    pub fn occurrences(&self, id: &str) -> usize {
        self.id_counts.get(id).copied().unwrap_or(0)
    }
}

/// Where an EncryptedData sits, for deciding which rendering a signature saw.
#[derive(Debug, Clone)]
pub struct EncryptedRegion {
    pub id: Option<String>,
    /// Layer the EncryptedData element itself belongs to
    pub parent: Layer,
    /// Its forwarding was held until a later header child supplied the key
    pub held: bool,
}

/// Select the events a signature at header position `signature` covered.
///
/// `plain_view(k)` says whether the signature was computed over the
/// plaintext of region k (true) or over its ciphertext (false).
pub fn select_view(
    events: &[Recorded],
    regions: &[EncryptedRegion],
    plain_view: impl Fn(usize) -> bool,
) -> Vec<XmlEvent> {
    let visible = |mut layer: Layer| loop {
        match layer {
            Layer::Wire => return true,
            Layer::Cipher(k) => {
                if plain_view(k) {
                    return false;
                }
                layer = regions[k].parent;
            }
            Layer::Plain(k) => {
                if !plain_view(k) {
                    return false;
                }
                layer = regions[k].parent;
            }
        }
    };
    events
        .iter()
        .filter(|(layer, _)| visible(*layer))
        .map(|(_, event)| event.clone())
        .collect()
}
