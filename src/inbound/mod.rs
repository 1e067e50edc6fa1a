//! Inbound (verifying) processing.
//!
//! A [`WssInbound`] holds everything that outlives a single document: the
//! configuration, the algorithm allow-list, the header child registry, the
//! credential callback and the replay cache. Each document is verified in
//! its own [`InboundPass`], which pulls events from the reader, runs them
//! through the security header state machine and yields the processed
//! document as it goes.
//!
//! Events are yielded as soon as they are processed. A signature over body
//! content is only checked once that content has closed, so consumers that
//! must not act on unverified content should wait for the final
//! `DocumentVerified` event returned by [`InboundPass::finish`].

mod buffer;
mod decrypt;
mod machine;
mod output;
mod registry;
mod signature;

pub use decrypt::EncryptedDataElement;
pub use registry::{ChildKind, ElementRegistry};
pub use signature::{SignatureElement, SignedReference};

use crate::config::WssConfig;
use crate::credentials::CredentialCallback;
use crate::crypto::AlgorithmSuite;
use crate::error::WssError;
use crate::event::{EventReader, EventWriter, Result, XmlEvent};
use crate::nonce::NonceCache;
use crate::security_event::{SecurityEvent, SecurityEventListener};
use chrono::{DateTime, Utc};
use machine::Machine;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verifying processor, shareable across threads.
pub struct WssInbound {
    config: WssConfig,
    suite: AlgorithmSuite,
    registry: ElementRegistry,
    credentials: Arc<dyn CredentialCallback>,
    nonces: Arc<NonceCache>,
    listeners: Vec<Arc<dyn SecurityEventListener>>,
    documents_verified: AtomicU64,
    documents_rejected: AtomicU64,
}

/// Counters over every pass of one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InboundStats {
    pub verified: u64,
    pub rejected: u64,
}

/// A fully processed document.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    /// The document with encrypted content replaced by its plaintext
    pub xml: Vec<u8>,
    pub events: Vec<SecurityEvent>,
}

impl WssInbound {
    /// Create a processor; fails on an invalid configuration.
    pub fn new(config: WssConfig, credentials: Arc<dyn CredentialCallback>) -> Result<Self> {
        config.validate()?;
        let nonces = NonceCache::new(
            config.inbound.freshness_window(),
            config.inbound.future_tolerance(),
        );
        debug!(
            strict = config.settings.strict,
            actor = ?config.settings.actor,
            "Inbound processor created"
        );
        Ok(Self {
            suite: AlgorithmSuite::new(&config.algorithms),
            registry: ElementRegistry::new()?,
            credentials,
            nonces: Arc::new(nonces),
            listeners: Vec::new(),
            documents_verified: AtomicU64::new(0),
            documents_rejected: AtomicU64::new(0),
            config,
        })
    }

    /// Share a replay cache with other processors.
    pub fn with_nonce_cache(mut self, nonces: Arc<NonceCache>) -> Self {
        self.nonces = nonces;
        self
    }

    /// Listener notified during every pass.
    pub fn with_listener(mut self, listener: Arc<dyn SecurityEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(&self) -> &WssConfig {
        &self.config
    }

    pub fn nonce_cache(&self) -> &Arc<NonceCache> {
        &self.nonces
    }

    pub fn stats(&self) -> InboundStats {
        InboundStats {
            verified: self.documents_verified.load(Ordering::Relaxed),
            rejected: self.documents_rejected.load(Ordering::Relaxed),
        }
    }

    /// Start a pass over `input` with the given clock.
    pub fn pass<R: BufRead>(&self, input: R, now: DateTime<Utc>) -> InboundPass<'_, R> {
        InboundPass {
            inbound: self,
            reader: EventReader::new(input),
            machine: Machine::new(self, self.listeners.clone(), now),
            input_done: false,
            outcome: None,
        }
    }

    /// Verify `input` and write the processed document to `output`.
    pub fn process_at<R: BufRead, W: Write>(
        &self,
        input: R,
        output: W,
        now: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>> {
        let mut pass = self.pass(input, now);
        let mut writer = EventWriter::new(output);
        while let Some(event) = pass.next_event()? {
            writer.write(&event)?;
        }
        writer.flush()?;
        pass.finish()
    }

    pub fn process<R: BufRead, W: Write>(&self, input: R, output: W) -> Result<Vec<SecurityEvent>> {
        self.process_at(input, output, Utc::now())
    }

    pub fn process_document_at(&self, xml: &[u8], now: DateTime<Utc>) -> Result<ProcessedDocument> {
        let mut out = Vec::new();
        let events = self.process_at(xml, &mut out, now)?;
        Ok(ProcessedDocument { xml: out, events })
    }

    pub fn process_document(&self, xml: &[u8]) -> Result<ProcessedDocument> {
        self.process_document_at(xml, Utc::now())
    }

    fn record_verified(&self) {
        self.documents_verified.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejected(&self, error: &WssError) {
        self.documents_rejected.fetch_add(1, Ordering::Relaxed);
        warn!(error = %error, fault = error.fault_code().as_str(), "Document rejected");
    }
}

/// One document's verification.
///
/// Pull processed events with [`next_event`](Self::next_event) (or iterate),
/// then call [`finish`](Self::finish) for the security events.
pub struct InboundPass<'p, R: BufRead> {
    inbound: &'p WssInbound,
    reader: EventReader<R>,
    machine: Machine<'p>,
    input_done: bool,
    /// Set once the pass has succeeded or failed
    outcome: Option<Result<()>>,
}

impl<'p, R: BufRead> InboundPass<'p, R> {
    /// Add a listener for this pass only.
    pub fn subscribe(&mut self, listener: Arc<dyn SecurityEventListener>) {
        self.machine.subscribe(listener);
    }

    /// Security events emitted so far.
    pub fn events(&self) -> &[SecurityEvent] {
        self.machine.events()
    }

    /// Next processed event, or None once the document is complete.
    ///
    /// After an error the pass yields nothing more.
    pub fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        if matches!(self.outcome, Some(Err(_))) {
            return Ok(None);
        }
        loop {
            if let Some(event) = self.machine.pop() {
                return Ok(Some(event));
            }
            if self.input_done {
                return Ok(None);
            }
            let step = self.step();
            if let Err(e) = step {
                self.fail(&e);
                return Err(e);
            }
        }
    }

    fn step(&mut self) -> Result<()> {
        match self.reader.next()? {
            Some(event) => self.machine.feed(event),
            None => {
                self.input_done = true;
                self.machine.finish()?;
                self.succeed();
                Ok(())
            }
        }
    }

    fn succeed(&mut self) {
        self.outcome = Some(Ok(()));
        self.inbound.record_verified();
        info!(events = self.machine.events().len(), "Document verified");
    }

    fn fail(&mut self, error: &WssError) {
        self.outcome = Some(Err(error.replicate()));
        self.inbound.record_rejected(error);
    }

    /// Drain the remaining input and return the pass's security events.
    ///
    /// A pass that already failed returns the error it failed with.
    pub fn finish(mut self) -> Result<Vec<SecurityEvent>> {
        while self.next_event()?.is_some() {}
        match self.outcome {
            Some(Ok(())) => Ok(self.machine.into_events()),
            Some(Err(error)) => Err(error),
            None => Err(WssError::InvalidSecurity(
                "pass ended before the document completed".to_string(),
            )),
        }
    }
}

impl<'p, R: BufRead> Iterator for InboundPass<'p, R> {
    type Item = Result<XmlEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
