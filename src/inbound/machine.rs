//! Security-header state machine for one inbound pass.
//!
//! Every input event flows through [`Machine::process`]: it is recorded in
//! the reference buffer, drives the header state machine and is forwarded
//! to the output. `xenc:EncryptedData` elements are captured instead of
//! forwarded; their plaintext re-enters `process` in their place.

use super::buffer::{
    select_view, ClosedSpan, EncryptedRegion, Layer, Recorded, ReferenceBuffer, Target, Want,
};
use super::decrypt::EncryptedDataElement;
use super::output::{Output, Sink};
use super::registry::{Entry, HeaderChild};
use super::signature::{check_digest, SignatureElement};
use super::WssInbound;
use crate::config::SoapVersion;
use crate::context::{Decryptor, KeyLookup, ProcessingContext};
use crate::error::WssError;
use crate::event::{NamespaceDecl, QName, Result, StartElement, XmlEvent};
use crate::ns::{self, attr, node};
use crate::security_event::{SecurityEvent, SecurityEventBus, SecurityEventListener};
use crate::token::{ElementCollector, Feed, SecurityToken, TokenKind, ValidationContext};
use crate::tree::Element;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Depth of `Envelope/Header/Security`.
const SECURITY_DEPTH: usize = 3;

enum ChildMode {
    Parse(Entry, ElementCollector),
    /// Unknown child forwarded untouched
    Skip,
}

struct Child {
    mode: ChildMode,
    position: usize,
}

enum State {
    Idle,
    AwaitingSecurityHeader,
    InSecurityHeader,
    InChildElement(Child),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingSecurityHeader => "awaiting_security_header",
            Self::InSecurityHeader => "in_security_header",
            Self::InChildElement(_) => "in_child_element",
            Self::Closed => "closed",
        }
    }
}

/// An EncryptedData element being collected.
struct Capture {
    region: usize,
    collector: ElementCollector,
    entry: Option<Entry>,
    sink: Sink,
    in_header: bool,
    in_scope: Vec<NamespaceDecl>,
}

/// An EncryptedData waiting for its key.
struct PendingDecryption {
    region: usize,
    element: EncryptedDataElement,
    sink: Sink,
    in_scope: Vec<NamespaceDecl>,
}

struct SignatureEntry {
    element: SignatureElement,
    position: usize,
    verified: bool,
    digested: Vec<bool>,
    queued: Vec<SecurityEvent>,
}

pub(crate) struct Machine<'p> {
    inbound: &'p WssInbound,
    bus: SecurityEventBus,
    ctx: ProcessingContext,
    buffer: ReferenceBuffer,
    output: Output,
    state: State,
    soap: Option<SoapVersion>,
    header_seen: bool,
    path: Vec<QName>,
    scopes: Vec<Vec<NamespaceDecl>>,
    next_position: usize,
    regions: Vec<EncryptedRegion>,
    region_positions: Vec<Option<usize>>,
    capture: Option<Capture>,
    pending_decryptions: Vec<PendingDecryption>,
    signatures: Vec<SignatureEntry>,
    decrypted: HashSet<String>,
    decrypted_count: usize,
    retrying: bool,
    retry_again: bool,
}

impl<'p> Machine<'p> {
    pub(crate) fn new(
        inbound: &'p WssInbound,
        listeners: Vec<Arc<dyn SecurityEventListener>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            inbound,
            bus: SecurityEventBus::new(listeners),
            ctx: ProcessingContext::new(now),
            buffer: ReferenceBuffer::new(),
            output: Output::new(),
            state: State::Idle,
            soap: None,
            header_seen: false,
            path: Vec::new(),
            scopes: Vec::new(),
            next_position: 0,
            regions: Vec::new(),
            region_positions: Vec::new(),
            capture: None,
            pending_decryptions: Vec::new(),
            signatures: Vec::new(),
            decrypted: HashSet::new(),
            decrypted_count: 0,
            retrying: false,
            retry_again: false,
        }
    }

    pub(crate) fn subscribe(&mut self, listener: Arc<dyn SecurityEventListener>) {
        self.bus.subscribe(listener);
    }

    /// Next event ready for forwarding.
    pub(crate) fn pop(&mut self) -> Option<XmlEvent> {
        self.output.pop()
    }

    pub(crate) fn events(&self) -> &[SecurityEvent] {
        self.bus.events()
    }

    pub(crate) fn into_events(self) -> Vec<SecurityEvent> {
        self.bus.into_events()
    }

    /// Feed one event from the wire.
    pub(crate) fn feed(&mut self, event: XmlEvent) -> Result<()> {
        self.process(event, Layer::Wire, Sink::Main)
    }

    fn process(&mut self, event: XmlEvent, layer: Layer, sink: Sink) -> Result<()> {
        if self.capture.is_some() {
            return self.capture_encrypted(event);
        }

        let depth = self.path.len();
        if let XmlEvent::StartElement(start) = &event {
            if start.name.is(ns::XENC, node::ENCRYPTED_DATA)
                && !matches!(self.state, State::InChildElement(_))
            {
                return self.begin_capture(event, layer, sink);
            }
            if depth == 1 && self.is_soap(&start.name, node::HEADER) {
                self.buffer.start_log();
            }
        }

        let closes_header = matches!(self.state, State::InSecurityHeader)
            && matches!(event, XmlEvent::EndElement(_))
            && depth == SECURITY_DEPTH;
        if closes_header {
            self.close_header()?;
        }

        for span in self.buffer.record(layer, &event) {
            self.span_closed(span)?;
        }

        let completed = self.step(&event, layer)?;

        match &event {
            XmlEvent::StartElement(start) => {
                self.path.push(start.name.clone());
                self.scopes.push(start.namespaces.clone());
            }
            XmlEvent::EndElement(name) => {
                self.path.pop();
                self.scopes.pop();
                if depth == 2 && self.is_soap(name, node::HEADER) {
                    self.buffer.stop_log();
                }
            }
            _ => {}
        }
        self.output.emit(sink, event);

        if let Some((entry, events, position)) = completed {
            self.complete_child(entry, events, position)?;
        }
        if closes_header {
            self.check_requirements()?;
        }
        Ok(())
    }

    fn is_soap(&self, name: &QName, local: &str) -> bool {
        self.soap
            .map(|v| name.is(v.namespace(), local))
            .unwrap_or(false)
    }

    /// Header state transition for one event. Returns a completed child.
    fn step(
        &mut self,
        event: &XmlEvent,
        layer: Layer,
    ) -> Result<Option<(Entry, Vec<XmlEvent>, usize)>> {
        let depth = self.path.len();
        let state = std::mem::replace(&mut self.state, State::Idle);
        let mut completed = None;

        self.state = match (state, event) {
            (State::Idle, XmlEvent::StartElement(start)) => {
                let version = start
                    .name
                    .namespace
                    .as_deref()
                    .and_then(SoapVersion::from_namespace)
                    .filter(|_| start.name.local == node::ENVELOPE)
                    .ok_or_else(|| {
                        WssError::MalformedXml(format!(
                            "document element {} is not a SOAP Envelope",
                            start.name.qualified()
                        ))
                    })?;
                debug!(soap_version = ?version, "SOAP envelope");
                self.soap = Some(version);
                State::AwaitingSecurityHeader
            }
            (State::AwaitingSecurityHeader, XmlEvent::StartElement(start)) => {
                if depth == 2 && self.is_security_header(start) {
                    debug!("Security header found");
                    self.header_seen = true;
                    State::InSecurityHeader
                } else if depth == 1 && self.is_soap(&start.name, node::BODY) {
                    if self.inbound.config.inbound.require_security_header {
                        warn!("Missing security header");
                        return Err(WssError::InvalidSecurity(
                            "message has no wsse:Security header".to_string(),
                        ));
                    }
                    self.check_requirements()?;
                    State::Closed
                } else {
                    State::AwaitingSecurityHeader
                }
            }
            (State::InSecurityHeader, XmlEvent::StartElement(start)) if depth == SECURITY_DEPTH => {
                let position = self.position_for(layer);
                match self
                    .inbound
                    .registry
                    .lookup(start.name.namespace.as_deref(), &start.name.local)
                {
                    Some(entry) => {
                        debug!(element = %start.name.qualified(), position, "Security header child");
                        let mut collector = ElementCollector::new();
                        collector.feed(event.clone());
                        State::InChildElement(Child {
                            mode: ChildMode::Parse(entry, collector),
                            position,
                        })
                    }
                    None => {
                        if self.inbound.config.settings.strict && start.must_understand() {
                            warn!(element = %start.name.qualified(), "Unsupported mandatory element");
                            return Err(WssError::UnsupportedElement(start.name.qualified()));
                        }
                        debug!(element = %start.name.qualified(), "Skipping unknown header child");
                        State::InChildElement(Child {
                            mode: ChildMode::Skip,
                            position,
                        })
                    }
                }
            }
            (State::InSecurityHeader, XmlEvent::EndElement(_)) if depth == SECURITY_DEPTH => {
                debug!(tokens = self.ctx.tokens().len(), "Security header closed");
                State::Closed
            }
            (State::InChildElement(mut child), _) => {
                let done = match &mut child.mode {
                    ChildMode::Parse(_, collector) => collector.feed(event.clone()) == Feed::Complete,
                    ChildMode::Skip => {
                        matches!(event, XmlEvent::EndElement(_)) && depth == SECURITY_DEPTH + 1
                    }
                };
                if done {
                    if let ChildMode::Parse(entry, collector) = child.mode {
                        completed = Some((entry, collector.into_events(), child.position));
                    }
                    State::InSecurityHeader
                } else {
                    State::InChildElement(child)
                }
            }
            (State::Closed, XmlEvent::StartElement(start)) => {
                if depth == 2 && self.is_security_header(start) {
                    return Err(WssError::InvalidSecurity(
                        "more than one wsse:Security header targets this receiver".to_string(),
                    ));
                }
                State::Closed
            }
            (state, _) => state,
        };
        Ok(completed)
    }

    fn is_security_header(&self, start: &StartElement) -> bool {
        let in_header = self
            .path
            .get(1)
            .map(|h| self.is_soap(h, node::HEADER))
            .unwrap_or(false);
        if !in_header || !start.name.is(ns::WSSE, node::SECURITY) {
            return false;
        }
        let soap = self.soap.map(|v| v.namespace());
        let actor = start
            .attr(soap, attr::ACTOR)
            .or_else(|| start.attr(soap, attr::ROLE));
        actor == self.inbound.config.settings.actor.as_deref()
    }

    fn position_for(&mut self, layer: Layer) -> usize {
        if let Layer::Plain(k) = layer {
            if let Some(Some(position)) = self.region_positions.get(k) {
                return *position;
            }
        }
        let position = self.next_position;
        self.next_position += 1;
        position
    }

    fn in_scope(&self) -> Vec<NamespaceDecl> {
        let mut bindings: BTreeMap<Option<String>, String> = BTreeMap::new();
        for scope in &self.scopes {
            for decl in scope {
                bindings.insert(decl.prefix.clone(), decl.uri.clone());
            }
        }
        bindings
            .into_iter()
            .map(|(prefix, uri)| NamespaceDecl { prefix, uri })
            .collect()
    }

    fn validation_context(&self) -> ValidationContext<'_> {
        ValidationContext {
            config: &self.inbound.config.inbound,
            suite: &self.inbound.suite,
            credentials: self.inbound.credentials.as_ref(),
            nonces: self.inbound.nonces.as_ref(),
            now: self.ctx.now(),
        }
    }

    // ========================================================================
    // Header children
    // ========================================================================

    fn complete_child(&mut self, entry: Entry, events: Vec<XmlEvent>, position: usize) -> Result<()> {
        let element = Element::build(&events)?;
        match (entry.build)(&element, &events)? {
            HeaderChild::Token(kind) => self.accept_token(kind, position),
            HeaderChild::ReferenceList(ids) => {
                for id in ids {
                    self.ctx.register_decryptor(
                        &id,
                        Decryptor {
                            position,
                            token: None,
                        },
                    )?;
                }
                self.retry_pending()
            }
            HeaderChild::Signature(signature) => self.accept_signature(signature, position),
            HeaderChild::EncryptedData(_) => Err(WssError::InvalidSecurity(
                "EncryptedData reached the token parser".to_string(),
            )),
        }
    }

    fn accept_token(&mut self, kind: TokenKind, position: usize) -> Result<()> {
        if matches!(kind, TokenKind::Timestamp(_))
            && self.ctx.count(|k| matches!(k, TokenKind::Timestamp(_))) > 0
        {
            return Err(WssError::InvalidSecurity(
                "security header carries more than one Timestamp".to_string(),
            ));
        }

        let mut token = SecurityToken::new(kind.id().map(String::from), position, kind);
        let event = {
            let ctx = self.validation_context();
            match token.validate(&ctx) {
                Ok(event) => event,
                Err(e) => {
                    warn!(kind = token.kind.name(), error = %e, "Token validation failed");
                    return Err(e);
                }
            }
        };
        let data_references = match &token.kind {
            TokenKind::EncryptedKey(ek) => ek.data_references.clone(),
            _ => Vec::new(),
        };

        let index = self.ctx.add_token(token)?;
        for id in data_references {
            self.ctx.register_decryptor(
                &id,
                Decryptor {
                    position,
                    token: Some(index),
                },
            )?;
        }
        self.bus.emit(event)?;
        self.retry_pending()
    }

    fn accept_signature(&mut self, element: SignatureElement, position: usize) -> Result<()> {
        element.check_algorithms(&self.inbound.suite)?;
        let index = self.signatures.len();
        let ids: Vec<String> = element.references.iter().map(|r| r.id.clone()).collect();
        debug!(signature = ?element.id, references = ?ids, position, "Signature registered");

        self.signatures.push(SignatureEntry {
            digested: vec![false; ids.len()],
            element,
            position,
            verified: false,
            queued: Vec::new(),
        });
        self.try_verify_signature(index)?;

        for (r, id) in ids.iter().enumerate() {
            if let Want::Available(recorded) = self.buffer.want(id, (index, r)) {
                self.check_reference((index, r), &recorded)?;
            }
        }
        Ok(())
    }

    /// Verify the SignatureValue if its key is available.
    fn try_verify_signature(&mut self, index: usize) -> Result<bool> {
        if self.signatures[index].verified {
            return Ok(true);
        }
        let key = match self.ctx.resolve_key(
            &self.signatures[index].element.key,
            self.inbound.credentials.as_ref(),
        )? {
            KeyLookup::Ready(key) => key,
            KeyLookup::Pending => return Ok(false),
        };

        let entry = &mut self.signatures[index];
        entry.element.verify_value(&self.inbound.suite, &key)?;
        entry.verified = true;
        let event = SecurityEvent::SignatureVerified {
            id: entry.element.id.clone(),
            algorithm: entry.element.method.clone(),
            key: entry.element.key.describe(),
            references: entry
                .element
                .references
                .iter()
                .map(|r| r.id.clone())
                .collect(),
        };
        let queued = std::mem::take(&mut entry.queued);

        self.bus.emit(event)?;
        for event in queued {
            self.bus.emit(event)?;
        }
        Ok(true)
    }

    /// Whether the signature at header `position` covered region k's plaintext.
    fn plain_view(&self, region: usize, position: usize) -> bool {
        self.regions[region]
            .id
            .as_deref()
            .and_then(|id| self.ctx.decryptor(id))
            .map(|d| d.position < position)
            .unwrap_or(false)
    }

    fn span_closed(&mut self, span: ClosedSpan) -> Result<()> {
        for target in span.targets {
            self.check_reference(target, &span.events)?;
        }
        Ok(())
    }

    fn check_reference(&mut self, (index, r): Target, recorded: &[Recorded]) -> Result<()> {
        let position = self.signatures[index].position;

        let reordered = recorded.iter().any(|(layer, _)| {
            matches!(layer, Layer::Cipher(k) if self.regions[*k].held && self.plain_view(*k, position))
        });
        if reordered {
            return Err(WssError::UnresolvedReference(format!(
                "#{} encloses EncryptedData whose key was declared later",
                self.signatures[index].element.references[r].id
            )));
        }

        let view = select_view(recorded, &self.regions, |k| self.plain_view(k, position));
        let entry = &mut self.signatures[index];
        let reference = &entry.element.references[r];
        check_digest(&self.inbound.suite, reference, &view)?;
        entry.digested[r] = true;

        let element = view
            .iter()
            .find_map(XmlEvent::as_start)
            .map(|s| match &s.name.namespace {
                Some(namespace) => format!("{{{}}}{}", namespace, s.name.local),
                None => s.name.local.clone(),
            })
            .unwrap_or_default();
        let event = SecurityEvent::SignedElement {
            id: reference.id.clone(),
            element,
            signature_id: entry.element.id.clone(),
        };
        if entry.verified {
            self.bus.emit(event)?;
        } else {
            entry.queued.push(event);
        }
        Ok(())
    }

    // ========================================================================
    // Encrypted data
    // ========================================================================

    fn begin_capture(&mut self, event: XmlEvent, layer: Layer, sink: Sink) -> Result<()> {
        let in_header = matches!(self.state, State::InSecurityHeader) && self.path.len() == SECURITY_DEPTH;
        let region = self.regions.len();
        let id = event.as_start().and_then(StartElement::id).map(String::from);
        let entry = if in_header {
            self.inbound
                .registry
                .lookup(Some(ns::XENC), node::ENCRYPTED_DATA)
        } else {
            None
        };
        let position = in_header.then(|| self.position_for(layer));
        debug!(id = ?id, in_header, "EncryptedData");

        self.regions.push(EncryptedRegion {
            id,
            parent: layer,
            held: false,
        });
        self.region_positions.push(position);
        self.capture = Some(Capture {
            region,
            collector: ElementCollector::new(),
            entry,
            sink,
            in_header,
            in_scope: self.in_scope(),
        });
        self.capture_encrypted(event)
    }

    fn capture_encrypted(&mut self, event: XmlEvent) -> Result<()> {
        let region = match &self.capture {
            Some(capture) => capture.region,
            None => return Ok(()),
        };
        for span in self.buffer.record(Layer::Cipher(region), &event) {
            self.span_closed(span)?;
        }
        let complete = match &mut self.capture {
            Some(capture) => capture.collector.feed(event) == Feed::Complete,
            None => false,
        };
        match self.capture.take() {
            Some(capture) if complete => self.finish_capture(capture),
            other => {
                self.capture = other;
                Ok(())
            }
        }
    }

    fn finish_capture(&mut self, capture: Capture) -> Result<()> {
        let events = capture.collector.into_events();
        let tree = Element::build(&events)?;
        let element = match capture.entry {
            Some(entry) => match (entry.build)(&tree, &events)? {
                HeaderChild::EncryptedData(element) => element,
                _ => {
                    return Err(WssError::InvalidSecurity(
                        "EncryptedData constructor returned another element".to_string(),
                    ))
                }
            },
            None => EncryptedDataElement::parse(&tree)?,
        };
        self.inbound.suite.key_length(&element.algorithm)?;

        let pending = PendingDecryption {
            region: capture.region,
            element,
            sink: capture.sink,
            in_scope: capture.in_scope,
        };
        match self.decryption_key(&pending.element)? {
            Some(key) => self.decrypt_into(pending, key),
            None if capture.in_header => {
                debug!(id = ?pending.element.id, "EncryptedData held until its key is declared");
                self.output.hold(capture.sink, capture.region);
                self.regions[capture.region].held = true;
                self.pending_decryptions.push(PendingDecryption {
                    sink: Sink::Hold(capture.region),
                    ..pending
                });
                Ok(())
            }
            None => Err(WssError::UnresolvedReference(format!(
                "no key available for EncryptedData {}",
                pending.element.id.as_deref().unwrap_or("(anonymous)")
            ))),
        }
    }

    fn decryption_key(&self, element: &EncryptedDataElement) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let credentials = self.inbound.credentials.as_ref();
        let lookup = match (&element.key, element.id.as_deref().and_then(|id| self.ctx.decryptor(id))) {
            (Some(reference), _) => self.ctx.resolve_key(reference, credentials)?,
            (None, Some(Decryptor {
                token: Some(index),
                ..
            })) => self.ctx.token_secret(*index, credentials)?,
            _ => KeyLookup::Pending,
        };
        Ok(match lookup {
            KeyLookup::Ready(key) => Some(key),
            KeyLookup::Pending => None,
        })
    }

    fn decrypt_into(&mut self, pending: PendingDecryption, key: Zeroizing<Vec<u8>>) -> Result<()> {
        let element = &pending.element;
        let plaintext = element.decrypt(&self.inbound.suite, &key, &pending.in_scope)?;
        if let Some(id) = &element.id {
            self.decrypted.insert(id.clone());
        }
        self.decrypted_count += 1;
        self.bus.emit(SecurityEvent::ContentDecrypted {
            id: element.id.clone(),
            encryption_type: element.encryption_type,
            algorithm: element.algorithm.clone(),
        })?;

        for event in plaintext {
            self.process(event, Layer::Plain(pending.region), pending.sink)?;
        }
        if pending.sink == Sink::Hold(pending.region) {
            self.output.release(pending.region);
        }
        Ok(())
    }

    // ========================================================================
    // Deferred work
    // ========================================================================

    /// Retry signatures and decryptions that were waiting for key material.
    fn retry_pending(&mut self) -> Result<()> {
        if self.retrying {
            self.retry_again = true;
            return Ok(());
        }
        self.retrying = true;
        let result = self.retry_until_stable();
        self.retrying = false;
        result
    }

    fn retry_until_stable(&mut self) -> Result<()> {
        loop {
            self.retry_again = false;
            let mut progress = false;

            for index in 0..self.signatures.len() {
                if !self.signatures[index].verified && self.try_verify_signature(index)? {
                    progress = true;
                }
            }

            let pending = std::mem::take(&mut self.pending_decryptions);
            let mut waiting = Vec::new();
            for item in pending {
                match self.decryption_key(&item.element)? {
                    Some(key) => {
                        self.decrypt_into(item, key)?;
                        progress = true;
                    }
                    None => waiting.push(item),
                }
            }
            waiting.append(&mut self.pending_decryptions);
            self.pending_decryptions = waiting;

            if !progress && !self.retry_again {
                return Ok(());
            }
        }
    }

    fn close_header(&mut self) -> Result<()> {
        self.retry_pending()?;
        if let Some(pending) = self.pending_decryptions.first() {
            return Err(WssError::UnresolvedReference(format!(
                "no key available for EncryptedData {}",
                pending.element.id.as_deref().unwrap_or("(anonymous)")
            )));
        }
        if let Some(entry) = self.signatures.iter().find(|s| !s.verified) {
            return Err(WssError::UnresolvedReference(format!(
                "signature key {} is not declared in the security header",
                entry.element.key.describe()
            )));
        }
        Ok(())
    }

    fn check_requirements(&self) -> Result<()> {
        let inbound = &self.inbound.config.inbound;
        if inbound.require_timestamp && self.ctx.count(|k| matches!(k, TokenKind::Timestamp(_))) == 0 {
            return Err(WssError::InvalidSecurity(
                "a Timestamp is required".to_string(),
            ));
        }
        if inbound.require_username_token
            && self.ctx.count(|k| matches!(k, TokenKind::Username(_))) == 0
        {
            return Err(WssError::InvalidSecurity(
                "a UsernameToken is required".to_string(),
            ));
        }
        Ok(())
    }

    /// End of input: every reference must have resolved exactly once.
    pub(crate) fn finish(&mut self) -> Result<()> {
        match self.state {
            State::Closed => {}
            State::AwaitingSecurityHeader => {
                if self.inbound.config.inbound.require_security_header {
                    return Err(WssError::InvalidSecurity(
                        "message has no wsse:Security header".to_string(),
                    ));
                }
                self.check_requirements()?;
            }
            ref other => {
                return Err(WssError::MalformedXml(format!(
                    "document ended in state {}",
                    other.name()
                )))
            }
        }

        let unresolved = self.buffer.unresolved();
        if !unresolved.is_empty() {
            return Err(WssError::UnresolvedReference(format!(
                "references not found: {}",
                unresolved.join(", ")
            )));
        }
        for entry in &self.signatures {
            for (reference, digested) in entry.element.references.iter().zip(&entry.digested) {
                let occurrences = self.buffer.occurrences(&reference.id);
                if occurrences != 1 {
                    return Err(WssError::UnresolvedReference(format!(
                        "#{} matches {} elements",
                        reference.id, occurrences
                    )));
                }
                if !digested {
                    return Err(WssError::UnresolvedReference(format!(
                        "#{} was never digested",
                        reference.id
                    )));
                }
            }
        }
        for (id, _) in self.ctx.decryptors() {
            if !self.decrypted.contains(id) {
                return Err(WssError::UnresolvedReference(format!(
                    "EncryptedData #{} not found",
                    id
                )));
            }
        }
        if self.output.pending() > 0 {
            return Err(WssError::UnresolvedReference(
                "held EncryptedData was never decrypted".to_string(),
            ));
        }

        let event = SecurityEvent::DocumentVerified {
            tokens: self.ctx.tokens().len(),
            signatures: self.signatures.len(),
            decrypted: self.decrypted_count,
        };
        self.bus.emit(event)
    }
}
