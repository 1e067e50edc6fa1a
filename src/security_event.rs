//! Security events and the per-pass event bus.

use crate::config::PasswordType;
use crate::error::WssError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// SAML assertion versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SamlVersion {
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "2.0")]
    V2_0,
}

/// How an `xenc:EncryptedData` replaced its plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    Element,
    Content,
}

/// Something the processor verified, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    UsernameTokenValidated {
        id: Option<String>,
        username: String,
        password_type: PasswordType,
    },
    TimestampValidated {
        id: Option<String>,
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    },
    BinarySecurityTokenValidated {
        id: Option<String>,
        thumbprint: String,
    },
    SamlAssertionValidated {
        id: Option<String>,
        version: SamlVersion,
        issuer: String,
        subject: Option<String>,
    },
    EncryptedKeyResolved {
        id: Option<String>,
        algorithm: String,
        data_references: Vec<String>,
    },
    DerivedKeyTokenParsed {
        id: Option<String>,
        length: usize,
    },
    SignatureVerified {
        id: Option<String>,
        algorithm: String,
        /// Token id or key name the signature was checked with
        key: String,
        references: Vec<String>,
    },
    SignedElement {
        id: String,
        /// `{namespace}local` of the signed element
        element: String,
        signature_id: Option<String>,
    },
    ContentDecrypted {
        id: Option<String>,
        encryption_type: EncryptionType,
        algorithm: String,
    },
    DocumentVerified {
        tokens: usize,
        signatures: usize,
        decrypted: usize,
    },
}

impl SecurityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UsernameTokenValidated { .. } => "username_token_validated",
            Self::TimestampValidated { .. } => "timestamp_validated",
            Self::BinarySecurityTokenValidated { .. } => "binary_security_token_validated",
            Self::SamlAssertionValidated { .. } => "saml_assertion_validated",
            Self::EncryptedKeyResolved { .. } => "encrypted_key_resolved",
            Self::DerivedKeyTokenParsed { .. } => "derived_key_token_parsed",
            Self::SignatureVerified { .. } => "signature_verified",
            Self::SignedElement { .. } => "signed_element",
            Self::ContentDecrypted { .. } => "content_decrypted",
            Self::DocumentVerified { .. } => "document_verified",
        }
    }
}

/// Policy hook notified synchronously for every event.
///
/// Returning an error rejects the document.
pub trait SecurityEventListener: Send + Sync {
    fn on_event(&self, event: &SecurityEvent) -> Result<(), String>;
}

impl<F> SecurityEventListener for F
where
    F: Fn(&SecurityEvent) -> Result<(), String> + Send + Sync,
{
    fn on_event(&self, event: &SecurityEvent) -> Result<(), String> {
        self(event)
    }
}

/// Ordered delivery to listeners plus the pass's event log.
#[derive(Default)]
pub struct SecurityEventBus {
    listeners: Vec<Arc<dyn SecurityEventListener>>,
    log: Vec<SecurityEvent>,
}

impl SecurityEventBus {
    pub fn new(listeners: Vec<Arc<dyn SecurityEventListener>>) -> Self {
        Self {
            listeners,
            log: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Arc<dyn SecurityEventListener>) {
        self.listeners.push(listener);
    }

    /// Deliver to every listener, then record.
    pub fn emit(&mut self, event: SecurityEvent) -> Result<(), WssError> {
        debug!(event = event.name(), "Security event");
        for listener in &self.listeners {
            if let Err(reason) = listener.on_event(&event) {
                warn!(event = event.name(), reason = %reason, "Security event rejected");
                return Err(WssError::SecurityEventRejected(reason));
            }
        }
        self.log.push(event);
        Ok(())
    }

    pub fn events(&self) -> &[SecurityEvent] {
        &self.log
    }

    pub fn into_events(self) -> Vec<SecurityEvent> {
        self.log
    }
}
