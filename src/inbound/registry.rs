//! Qualified-name registry for security header children.
//!
//! Maps each supported header child to a constructor. The registry checks
//! at construction that every supported kind has a constructor, so a gap is
//! a startup error rather than a silently skipped element.

use super::decrypt::EncryptedDataElement;
use super::signature::SignatureElement;
use crate::error::WssError;
use crate::event::XmlEvent;
use crate::ns::{self, node};
use crate::token::encrypted_key::reference_list;
use crate::token::{
    BinarySecurityToken, DerivedKeyToken, EncryptedKeyToken, SamlAssertion, Timestamp, Token,
    TokenKind, UsernameToken,
};
use crate::tree::Element;

/// Supported security header children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    UsernameToken,
    Timestamp,
    BinarySecurityToken,
    SamlAssertion,
    DerivedKeyToken,
    EncryptedKey,
    ReferenceList,
    Signature,
    EncryptedData,
}

impl ChildKind {
    pub const ALL: [ChildKind; 9] = [
        ChildKind::UsernameToken,
        ChildKind::Timestamp,
        ChildKind::BinarySecurityToken,
        ChildKind::SamlAssertion,
        ChildKind::DerivedKeyToken,
        ChildKind::EncryptedKey,
        ChildKind::ReferenceList,
        ChildKind::Signature,
        ChildKind::EncryptedData,
    ];
}

/// A parsed header child.
#[derive(Debug)]
pub enum HeaderChild {
    Token(TokenKind),
    ReferenceList(Vec<String>),
    Signature(SignatureElement),
    EncryptedData(EncryptedDataElement),
}

pub type Constructor = fn(&Element, &[XmlEvent]) -> Result<HeaderChild, WssError>;

#[derive(Clone, Copy)]
pub struct Entry {
    pub kind: ChildKind,
    pub build: Constructor,
}

pub struct ElementRegistry {
    /// (namespace, local name, entry)
    entries: Vec<(&'static str, &'static str, Entry)>,
}

impl ElementRegistry {
    /// The standard registry.
    pub fn new() -> Result<Self, WssError> {
        let mut registry = Self {
            entries: Vec::new(),
        };
        registry.register(ns::WSSE, node::USERNAME_TOKEN, ChildKind::UsernameToken, |e, _| {
            Ok(HeaderChild::Token(TokenKind::Username(UsernameToken::parse(e)?)))
        });
        registry.register(ns::WSU, node::TIMESTAMP, ChildKind::Timestamp, |e, _| {
            Ok(HeaderChild::Token(TokenKind::Timestamp(Timestamp::parse(e)?)))
        });
        registry.register(
            ns::WSSE,
            node::BINARY_SECURITY_TOKEN,
            ChildKind::BinarySecurityToken,
            |e, _| {
                Ok(HeaderChild::Token(TokenKind::Binary(
                    BinarySecurityToken::parse(e)?,
                )))
            },
        );
        for saml in [ns::SAML1, ns::SAML2] {
            registry.register(saml, node::ASSERTION, ChildKind::SamlAssertion, |e, _| {
                Ok(HeaderChild::Token(TokenKind::Saml(SamlAssertion::parse(e)?)))
            });
        }
        registry.register(ns::WSC, node::DERIVED_KEY_TOKEN, ChildKind::DerivedKeyToken, |e, _| {
            Ok(HeaderChild::Token(TokenKind::DerivedKey(
                DerivedKeyToken::parse(e)?,
            )))
        });
        registry.register(ns::XENC, node::ENCRYPTED_KEY, ChildKind::EncryptedKey, |e, _| {
            Ok(HeaderChild::Token(TokenKind::EncryptedKey(
                EncryptedKeyToken::parse(e)?,
            )))
        });
        registry.register(ns::XENC, node::REFERENCE_LIST, ChildKind::ReferenceList, |e, _| {
            Ok(HeaderChild::ReferenceList(reference_list(e)?))
        });
        registry.register(ns::DSIG, node::SIGNATURE, ChildKind::Signature, |e, events| {
            Ok(HeaderChild::Signature(SignatureElement::parse(e, events)?))
        });
        registry.register(ns::XENC, node::ENCRYPTED_DATA, ChildKind::EncryptedData, |e, _| {
            Ok(HeaderChild::EncryptedData(EncryptedDataElement::parse(e)?))
        });

        registry.check_complete()?;
        Ok(registry)
    }

    fn register(
        &mut self,
        namespace: &'static str,
        local: &'static str,
        kind: ChildKind,
        build: Constructor,
    ) {
        self.entries.retain(|(n, l, _)| !(*n == namespace && *l == local));
        self.entries.push((namespace, local, Entry { kind, build }));
    }

    fn check_complete(&self) -> Result<(), WssError> {
        for kind in ChildKind::ALL {
            if !self.entries.iter().any(|(_, _, e)| e.kind == kind) {
                return Err(WssError::Config(format!(
                    "no constructor registered for {:?}",
                    kind
                )));
            }
        }
        Ok(())
    }

    pub fn lookup(&self, namespace: Option<&str>, local: &str) -> Option<Entry> {
        let namespace = namespace?;
        self.entries
            .iter()
            .find(|(n, l, _)| *n == namespace && *l == local)
            .map(|(_, _, e)| *e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
