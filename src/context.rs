//! Per-document processing context.
//!
//! Holds the tokens declared in the security header so far, the decryption
//! markers (`xenc:EncryptedKey` / `xenc:ReferenceList`) indexed by the
//! EncryptedData ids they cover, and the caller-supplied clock. One context
//! lives for exactly one inbound pass.

use crate::credentials::{CredentialCallback, CredentialLookup};
use crate::error::WssError;
use crate::token::{KeyReference, SecurityToken, TokenKind};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;
use zeroize::Zeroizing;

/// Derived key chains longer than this are rejected.
const MAX_KEY_CHAIN: usize = 4;

/// A header element that names an EncryptedData it decrypts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decryptor {
    /// Header position of the EncryptedKey or ReferenceList
    pub position: usize,
    /// Index of the EncryptedKey token, if the marker carries a key
    pub token: Option<usize>,
}

/// Outcome of resolving a key reference.
pub enum KeyLookup {
    Ready(Zeroizing<Vec<u8>>),
    /// The referenced token has not been declared yet
    Pending,
}

impl std::fmt::Debug for KeyLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Ready(<redacted>)"),
            Self::Pending => f.write_str("Pending"),
        }
    }
}

pub struct ProcessingContext {
    tokens: Vec<SecurityToken>,
    by_id: HashMap<String, usize>,
    decryptors: HashMap<String, Decryptor>,
    now: DateTime<Utc>,
}

impl ProcessingContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            tokens: Vec::new(),
            by_id: HashMap::new(),
            decryptors: HashMap::new(),
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Record a validated token; ids must be unique within the document.
    pub fn add_token(&mut self, token: SecurityToken) -> Result<usize, WssError> {
        let index = self.tokens.len();
        if let Some(id) = &token.id {
            if self.by_id.insert(id.clone(), index).is_some() {
                return Err(WssError::InvalidSecurity(format!(
                    "security token id '{}' is declared more than once",
                    id
                )));
            }
        }
        debug!(kind = token.kind.name(), id = ?token.id, "Token recorded");
        self.tokens.push(token);
        Ok(index)
    }

    pub fn tokens(&self) -> &[SecurityToken] {
        &self.tokens
    }

    pub fn token(&self, id: &str) -> Option<&SecurityToken> {
        self.by_id.get(id).map(|i| &self.tokens[*i])
    }

    pub fn count(&self, predicate: impl Fn(&TokenKind) -> bool) -> usize {
        self.tokens.iter().filter(|t| predicate(&t.kind)).count()
    }

    pub fn register_decryptor(&mut self, data_id: &str, decryptor: Decryptor) -> Result<(), WssError> {
        if self.decryptors.insert(data_id.to_string(), decryptor).is_some() {
            return Err(WssError::InvalidSecurity(format!(
                "EncryptedData '{}' is referenced by more than one key",
                data_id
            )));
        }
        Ok(())
    }

    pub fn decryptor(&self, data_id: &str) -> Option<&Decryptor> {
        self.decryptors.get(data_id)
    }

    pub fn decryptors(&self) -> impl Iterator<Item = (&String, &Decryptor)> {
        self.decryptors.iter()
    }

    /// Secret key material for a KeyInfo reference.
    pub fn resolve_key(
        &self,
        reference: &KeyReference,
        credentials: &dyn CredentialCallback,
    ) -> Result<KeyLookup, WssError> {
        self.resolve_chain(reference, credentials, 0)
    }

    /// Secret held by a token itself (EncryptedKey, salted UsernameToken, DerivedKey).
    pub fn token_secret(
        &self,
        index: usize,
        credentials: &dyn CredentialCallback,
    ) -> Result<KeyLookup, WssError> {
        self.secret_of(&self.tokens[index], credentials, 0)
    }

    fn resolve_chain(
        &self,
        reference: &KeyReference,
        credentials: &dyn CredentialCallback,
        depth: usize,
    ) -> Result<KeyLookup, WssError> {
        if depth > MAX_KEY_CHAIN {
            return Err(WssError::InvalidSecurityToken(
                "derived key chain is too long".to_string(),
            ));
        }
        match reference {
            KeyReference::TokenId { id, .. } => match self.token(id) {
                Some(token) => self.secret_of(token, credentials, depth),
                None => Ok(KeyLookup::Pending),
            },
            _ => {
                let alias = reference.alias().unwrap_or_default();
                credentials
                    .secret_key(alias)
                    .map(KeyLookup::Ready)
                    .ok_or_else(|| {
                        WssError::SecurityTokenUnavailable(format!("unknown key alias '{}'", alias))
                    })
            }
        }
    }

    fn secret_of(
        &self,
        token: &SecurityToken,
        credentials: &dyn CredentialCallback,
        depth: usize,
    ) -> Result<KeyLookup, WssError> {
        match &token.kind {
            TokenKind::DerivedKey(dk) => {
                match self.resolve_chain(&dk.base, credentials, depth + 1)? {
                    KeyLookup::Ready(base) => Ok(KeyLookup::Ready(dk.derive(&base)?)),
                    KeyLookup::Pending => Ok(KeyLookup::Pending),
                }
            }
            _ => token.secret().map(KeyLookup::Ready),
        }
    }
}
