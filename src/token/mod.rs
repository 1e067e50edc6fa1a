//! Security token model.
//!
//! A closed set of token kinds recognised inside the security header. Each
//! kind is parsed from its completed header child element and validated
//! against the pass's [`ValidationContext`].

pub mod binary;
pub mod derived;
pub mod encrypted_key;
pub mod reference;
pub mod saml;
pub mod timestamp;
pub mod username;

pub use binary::BinarySecurityToken;
pub use derived::DerivedKeyToken;
pub use encrypted_key::EncryptedKeyToken;
pub use reference::KeyReference;
pub use saml::SamlAssertion;
pub use timestamp::Timestamp;
pub use username::UsernameToken;

use crate::config::InboundConfig;
use crate::credentials::CredentialCallback;
use crate::crypto::AlgorithmSuite;
use crate::error::WssError;
use crate::event::XmlEvent;
use crate::nonce::NonceCache;
use crate::security_event::SecurityEvent;
use crate::tree::Element;
use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

/// Everything a token may consult while validating.
pub struct ValidationContext<'a> {
    pub config: &'a InboundConfig,
    pub suite: &'a AlgorithmSuite,
    pub credentials: &'a dyn CredentialCallback,
    pub nonces: &'a NonceCache,
    pub now: DateTime<Utc>,
}

/// Capability surface shared by all token kinds.
pub trait Token: Sized {
    /// Parse from the completed header child.
    fn parse(element: &Element) -> Result<Self, WssError>;

    /// Validate, returning the event that records success.
    fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Unverified,
    Verified,
    Failed(String),
}

#[derive(Debug)]
pub enum TokenKind {
    Username(UsernameToken),
    Binary(BinarySecurityToken),
    Saml(SamlAssertion),
    DerivedKey(DerivedKeyToken),
    EncryptedKey(EncryptedKeyToken),
    Timestamp(Timestamp),
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Username(_) => "UsernameToken",
            Self::Binary(_) => "BinarySecurityToken",
            Self::Saml(_) => "SamlAssertion",
            Self::DerivedKey(_) => "DerivedKeyToken",
            Self::EncryptedKey(_) => "EncryptedKey",
            Self::Timestamp(_) => "Timestamp",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Username(t) => t.id.as_deref(),
            Self::Binary(t) => t.id.as_deref(),
            Self::Saml(t) => t.id.as_deref(),
            Self::DerivedKey(t) => t.id.as_deref(),
            Self::EncryptedKey(t) => t.id.as_deref(),
            Self::Timestamp(t) => t.id.as_deref(),
        }
    }
}

/// A token seen in the security header of the current pass.
#[derive(Debug)]
pub struct SecurityToken {
    pub id: Option<String>,
    pub status: TokenStatus,
    /// Index of the header child the token was declared at
    pub position: usize,
    pub kind: TokenKind,
}

impl SecurityToken {
    pub fn new(id: Option<String>, position: usize, kind: TokenKind) -> Self {
        Self {
            id,
            status: TokenStatus::Unverified,
            position,
            kind,
        }
    }

    /// Validate in place; the status records the outcome either way.
    pub fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError> {
        let result = match &mut self.kind {
            TokenKind::Username(t) => t.validate(ctx),
            TokenKind::Binary(t) => t.validate(ctx),
            TokenKind::Saml(t) => t.validate(ctx),
            TokenKind::DerivedKey(t) => t.validate(ctx),
            TokenKind::EncryptedKey(t) => t.validate(ctx),
            TokenKind::Timestamp(t) => t.validate(ctx),
        };
        self.status = match &result {
            Ok(_) => TokenStatus::Verified,
            Err(e) => TokenStatus::Failed(e.to_string()),
        };
        result
    }

    /// Symmetric key material the token holds directly.
    ///
    /// Derived key tokens are resolved through their base token by the
    /// processing context instead.
    pub fn secret(&self) -> Result<Zeroizing<Vec<u8>>, WssError> {
        if self.status != TokenStatus::Verified {
            return Err(WssError::InvalidSecurityToken(format!(
                "{} has not been verified",
                self.kind.name()
            )));
        }
        let secret = match &self.kind {
            TokenKind::Username(t) => t.derived_key(),
            TokenKind::EncryptedKey(t) => t.session_key(),
            _ => None,
        };
        secret.ok_or_else(|| {
            WssError::InvalidSecurityToken(format!(
                "{} cannot supply a symmetric key",
                self.kind.name()
            ))
        })
    }
}

/// Outcome of feeding one event to a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Continue,
    Complete,
}

/// Gathers the events of one header child until its own end element.
#[derive(Debug, Default)]
pub struct ElementCollector {
    events: Vec<XmlEvent>,
    depth: usize,
}

impl ElementCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, event: XmlEvent) -> Feed {
        match &event {
            XmlEvent::StartElement(_) => self.depth += 1,
            XmlEvent::EndElement(_) => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.events.push(event);
        if self.depth == 0 && !self.events.is_empty() {
            Feed::Complete
        } else {
            Feed::Continue
        }
    }

    pub fn into_events(self) -> Vec<XmlEvent> {
        self.events
    }
}

/// Parse a base64 element value, mapping failures to `InvalidSecurityToken`.
pub(crate) fn base64_value(text: &str, what: &str) -> Result<Vec<u8>, WssError> {
    crate::crypto::decode_base64(text)
        .map_err(|e| WssError::InvalidSecurityToken(format!("{} is not base64: {}", what, e)))
}

/// Parse an `xsd:dateTime` value in UTC.
pub(crate) fn parse_datetime(text: &str, what: &str) -> Result<DateTime<Utc>, WssError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| WssError::InvalidSecurityToken(format!("Invalid {} format: {}", what, text)))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::event::read_events;

    pub struct Fixture {
        pub config: InboundConfig,
        pub suite: AlgorithmSuite,
        pub credentials: StaticCredentials,
        pub nonces: NonceCache,
        pub now: DateTime<Utc>,
    }

    impl Fixture {
        pub fn new(now: &str) -> Self {
            let config = InboundConfig::default();
            let nonces = NonceCache::new(config.freshness_window(), config.future_tolerance());
            Self {
                config,
                suite: AlgorithmSuite::default(),
                credentials: StaticCredentials::new().with_password("alice", "secret"),
                nonces,
                now: now.parse().unwrap(),
            }
        }

        pub fn ctx(&self) -> ValidationContext<'_> {
            ValidationContext {
                config: &self.config,
                suite: &self.suite,
                credentials: &self.credentials,
                nonces: &self.nonces,
                now: self.now,
            }
        }
    }

    pub fn element(xml: &str) -> Element {
        Element::build(&read_events(xml.as_bytes()).unwrap()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::read_events;

    #[test]
    fn test_collector_completes_at_own_end() {
        let events = read_events(b"<a><b/><c>x</c></a>").unwrap();
        let mut collector = ElementCollector::new();
        let mut outcomes = Vec::new();
        for event in events {
            outcomes.push(collector.feed(event));
        }
        assert_eq!(outcomes.last(), Some(&Feed::Complete));
        assert_eq!(
            outcomes.iter().filter(|f| **f == Feed::Complete).count(),
            1
        );
        assert_eq!(collector.into_events().len(), 7);
    }

    #[test]
    fn test_unverified_token_has_no_secret() {
        let token = SecurityToken::new(
            None,
            0,
            TokenKind::Timestamp(Timestamp {
                id: None,
                created: Utc::now(),
                expires: None,
            }),
        );
        assert!(matches!(
            token.secret(),
            Err(WssError::InvalidSecurityToken(_))
        ));
    }
}
