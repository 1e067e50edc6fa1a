//! Outbound (securing) processing.
//!
//! The document prologue and the Envelope start tag are streamed straight
//! through. From there the builder buffers until the SOAP Body closes, since
//! the security header precedes the Body it protects. It then applies the
//! configured actions in order, writes the Header with its new
//! `wsse:Security` child and the Body, and streams the rest.

mod actions;
mod element;

use crate::config::{SoapVersion, WssConfig};
use crate::credentials::CredentialCallback;
use crate::crypto::AlgorithmSuite;
use crate::error::WssError;
use crate::event::{EventReader, EventWriter, QName, Result, StartElement, XmlEvent};
use crate::ns::{self, attr, node};
use actions::Securer;
use chrono::{DateTime, Utc};
use element::{ensure_declared, new_id, WSSE, WSU};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Securing processor, shareable across threads.
pub struct WssOutbound {
    config: WssConfig,
    suite: AlgorithmSuite,
    credentials: Arc<dyn CredentialCallback>,
    documents_secured: AtomicU64,
}

/// The buffered Header and Body of one message.
#[derive(Debug)]
pub(crate) struct Message {
    soap: SoapVersion,
    envelope_prefix: Option<String>,
    /// Events between the Envelope start and the Header or Body
    leading: Vec<XmlEvent>,
    header: Option<(StartElement, Vec<XmlEvent>)>,
    /// Events between the Header and the Body
    between: Vec<XmlEvent>,
    body_start: StartElement,
    pub(crate) body_content: Vec<XmlEvent>,
}

impl Message {
    /// The Body's id, adding a `wsu:Id` if it has none.
    pub(crate) fn body_id(&mut self) -> String {
        if let Some(id) = self.body_start.id() {
            return id.to_string();
        }
        let id = new_id("Body");
        ensure_declared(&mut self.body_start, WSU);
        self.body_start.push_attr(
            QName::new(Some(ns::WSU), Some(WSU.prefix), attr::ID),
            id.as_str(),
        );
        id
    }

    /// The complete Body element.
    pub(crate) fn body_events(&self) -> Vec<XmlEvent> {
        let mut events = Vec::with_capacity(self.body_content.len() + 2);
        events.push(XmlEvent::StartElement(self.body_start.clone()));
        events.extend(self.body_content.iter().cloned());
        events.push(XmlEvent::EndElement(self.body_start.name.clone()));
        events
    }

    fn soap_name(&self, local: &str) -> QName {
        QName::new(
            Some(self.soap.namespace()),
            self.envelope_prefix.as_deref(),
            local,
        )
    }

    /// `wsse:Security` start tag for the configured actor.
    fn security_start(&self, actor: Option<&str>) -> StartElement {
        let mut start = StartElement::new(QName::new(Some(ns::WSSE), Some(WSSE.prefix), node::SECURITY));
        start.declare(Some(WSSE.prefix), ns::WSSE);
        start.declare(Some(WSU.prefix), ns::WSU);
        // Attributes cannot use a default namespace
        if let Some(prefix) = self.envelope_prefix.as_deref() {
            let soap = Some(self.soap.namespace());
            start.push_attr(QName::new(soap, Some(prefix), attr::MUST_UNDERSTAND), "1");
            if let Some(actor) = actor {
                let local = match self.soap {
                    SoapVersion::Soap11 => attr::ACTOR,
                    SoapVersion::Soap12 => attr::ROLE,
                };
                start.push_attr(QName::new(soap, Some(prefix), local), actor);
            }
        }
        start
    }

    /// Header (created if missing) with `security` as its first child, then the Body.
    fn into_events(self, security: Vec<XmlEvent>) -> Vec<XmlEvent> {
        let header_name = self.soap_name(node::HEADER);
        let (header_start, header_content) = self
            .header
            .unwrap_or_else(|| (StartElement::new(header_name), Vec::new()));

        let header_end = XmlEvent::EndElement(header_start.name.clone());
        let body_end = XmlEvent::EndElement(self.body_start.name.clone());

        let mut events = self.leading;
        events.push(XmlEvent::StartElement(header_start));
        events.extend(security);
        events.extend(header_content);
        events.push(header_end);
        events.extend(self.between);
        events.push(XmlEvent::StartElement(self.body_start));
        events.extend(self.body_content);
        events.push(body_end);
        events
    }
}

/// Collects the Header and Body following the Envelope start.
struct MessageReader {
    soap: SoapVersion,
    envelope_prefix: Option<String>,
    leading: Vec<XmlEvent>,
    header: Option<(StartElement, Vec<XmlEvent>)>,
    between: Vec<XmlEvent>,
    body: Option<(StartElement, Vec<XmlEvent>)>,
    /// Open element count below the Envelope
    depth: usize,
    in_header: bool,
}

impl MessageReader {
    fn new(envelope: &StartElement, soap: SoapVersion) -> Self {
        Self {
            soap,
            envelope_prefix: envelope.name.prefix.clone(),
            leading: Vec::new(),
            header: None,
            between: Vec::new(),
            body: None,
            depth: 0,
            in_header: false,
        }
    }

    /// Feed one event; returns the message once the Body has closed.
    fn feed(&mut self, event: XmlEvent) -> Result<Option<Message>> {
        let ns = self.soap.namespace();
        match &event {
            XmlEvent::StartElement(start) if self.depth == 0 => {
                self.depth += 1;
                if start.name.is(ns, node::HEADER) && self.header.is_none() && self.body.is_none() {
                    self.in_header = true;
                    self.header = Some((start.clone(), Vec::new()));
                } else if start.name.is(ns, node::BODY) && self.body.is_none() {
                    self.body = Some((start.clone(), Vec::new()));
                } else {
                    return Err(WssError::MalformedXml(format!(
                        "unexpected {} in the SOAP Envelope",
                        start.name.qualified()
                    )));
                }
                return Ok(None);
            }
            XmlEvent::EndElement(_) if self.depth == 1 => {
                self.depth -= 1;
                if self.in_header {
                    self.in_header = false;
                    return Ok(None);
                }
                return Ok(self.take_message());
            }
            XmlEvent::EndElement(_) if self.depth == 0 => {
                return Err(WssError::MalformedXml(
                    "SOAP Envelope has no Body".to_string(),
                ));
            }
            XmlEvent::StartElement(_) => self.depth += 1,
            XmlEvent::EndElement(_) => self.depth -= 1,
            _ => {}
        }

        let target = match (&mut self.header, &mut self.body) {
            (_, Some((_, content))) => content,
            (Some((_, content)), None) if self.in_header => content,
            (Some(_), None) => &mut self.between,
            (None, None) => &mut self.leading,
        };
        target.push(event);
        Ok(None)
    }

    fn take_message(&mut self) -> Option<Message> {
        let (body_start, body_content) = self.body.take()?;
        Some(Message {
            soap: self.soap,
            envelope_prefix: self.envelope_prefix.take(),
            leading: std::mem::take(&mut self.leading),
            header: self.header.take(),
            between: std::mem::take(&mut self.between),
            body_start,
            body_content,
        })
    }
}

impl WssOutbound {
    pub fn new(config: WssConfig, credentials: Arc<dyn CredentialCallback>) -> Result<Self> {
        config.validate()?;
        debug!(actions = ?config.outbound.actions, "Outbound processor created");
        Ok(Self {
            suite: AlgorithmSuite::new(&config.algorithms),
            credentials,
            documents_secured: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &WssConfig {
        &self.config
    }

    /// Documents secured so far.
    pub fn documents_secured(&self) -> u64 {
        self.documents_secured.load(Ordering::Relaxed)
    }

    /// Secure `input` and write the result to `output`.
    pub fn process_at<R: BufRead, W: Write>(
        &self,
        input: R,
        output: W,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut reader = EventReader::new(input);
        let mut writer = EventWriter::new(output);
        let mut message: Option<MessageReader> = None;
        let mut secured = false;

        while let Some(event) = reader.next()? {
            if let Some(collector) = message.as_mut() {
                if let Some(complete) = collector.feed(event)? {
                    for event in self.secure(complete, now)? {
                        writer.write(&event)?;
                    }
                    message = None;
                    secured = true;
                }
                continue;
            }

            if !secured {
                if let XmlEvent::StartElement(start) = &event {
                    let soap = start
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
                    message = Some(MessageReader::new(start, soap));
                }
            }
            writer.write(&event)?;
        }
        writer.flush()?;

        if !secured {
            return Err(WssError::MalformedXml(
                "document has no SOAP Body".to_string(),
            ));
        }
        self.documents_secured.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn process<R: BufRead, W: Write>(&self, input: R, output: W) -> Result<()> {
        self.process_at(input, output, Utc::now())
    }

    pub fn secure_document_at(&self, xml: &[u8], now: DateTime<Utc>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.process_at(xml, &mut out, now)?;
        Ok(out)
    }

    pub fn secure_document(&self, xml: &[u8]) -> Result<Vec<u8>> {
        self.secure_document_at(xml, Utc::now())
    }

    fn secure(&self, mut message: Message, now: DateTime<Utc>) -> Result<Vec<XmlEvent>> {
        let mut securer = Securer::new(self, now);
        for action in &self.config.outbound.actions {
            securer.apply(*action, &mut message)?;
        }

        let mut security = vec![XmlEvent::StartElement(
            message.security_start(self.config.settings.actor.as_deref()),
        )];
        for entry in securer.header {
            security.extend(entry.events);
        }
        security.push(XmlEvent::EndElement(QName::new(
            Some(ns::WSSE),
            Some(WSSE.prefix),
            node::SECURITY,
        )));

        info!(
            actions = self.config.outbound.actions.len(),
            "Security header built"
        );
        Ok(message.into_events(security))
    }
}
