//! Credential and key resolution.
//!
//! The processor never stores secrets itself: passwords, secret keys and
//! trusted certificates are looked up through a [`CredentialCallback`] each
//! time a token needs them.

use crate::config::CredentialsConfig;
use crate::crypto;
use crate::error::WssError;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// What kind of identifier is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// A UsernameToken user; resolves to a password
    Username,
    /// A key alias (KeyName / KeyIdentifier); resolves to a secret key
    KeyAlias,
    /// A certificate thumbprint or alias; resolves to certificate bytes
    CertificateReference,
}

/// Resolved credential material.
#[derive(Clone)]
pub enum Credential {
    Password(Zeroizing<String>),
    SecretKey(Zeroizing<Vec<u8>>),
    Certificate(Vec<u8>),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::SecretKey(_) => f.write_str("SecretKey(<redacted>)"),
            Self::Certificate(c) => write!(f, "Certificate({} bytes)", c.len()),
        }
    }
}

/// Credential lookup supplied by the integrator.
pub trait CredentialCallback: Send + Sync {
    fn resolve(&self, kind: IdentifierKind, identifier: &str) -> Option<Credential>;
}

impl<F> CredentialCallback for F
where
    F: Fn(IdentifierKind, &str) -> Option<Credential> + Send + Sync,
{
    fn resolve(&self, kind: IdentifierKind, identifier: &str) -> Option<Credential> {
        self(kind, identifier)
    }
}

/// Typed lookups over a callback.
pub(crate) trait CredentialLookup {
    fn password(&self, username: &str) -> Option<Zeroizing<String>>;
    fn secret_key(&self, alias: &str) -> Option<Zeroizing<Vec<u8>>>;
    fn certificate(&self, reference: &str) -> Option<Vec<u8>>;
}

impl<C: CredentialCallback + ?Sized> CredentialLookup for C {
    fn password(&self, username: &str) -> Option<Zeroizing<String>> {
        match self.resolve(IdentifierKind::Username, username)? {
            Credential::Password(p) => Some(p),
            _ => None,
        }
    }

    fn secret_key(&self, alias: &str) -> Option<Zeroizing<Vec<u8>>> {
        match self.resolve(IdentifierKind::KeyAlias, alias)? {
            Credential::SecretKey(k) => Some(k),
            _ => None,
        }
    }

    fn certificate(&self, reference: &str) -> Option<Vec<u8>> {
        match self.resolve(IdentifierKind::CertificateReference, reference)? {
            Credential::Certificate(c) => Some(c),
            _ => None,
        }
    }
}

/// In-memory credentials, usually loaded from configuration.
///
/// Certificates are answerable both by alias and by their SHA-1
/// thumbprint, so inbound BinarySecurityTokens can be checked against them.
#[derive(Default)]
pub struct StaticCredentials {
    passwords: HashMap<String, Zeroizing<String>>,
    keys: HashMap<String, Zeroizing<Vec<u8>>>,
    certificates: HashMap<String, Vec<u8>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CredentialsConfig) -> Result<Self, WssError> {
        let mut creds = Self::new();
        for (user, password) in &config.passwords {
            creds = creds.with_password(user, password);
        }
        for (alias, encoded) in &config.keys {
            let key = crypto::decode_base64(encoded)
                .map_err(|e| WssError::Config(format!("key '{}' is not base64: {}", alias, e)))?;
            creds = creds.with_key(alias, key);
        }
        for (alias, encoded) in &config.certificates {
            let der = crypto::decode_base64(encoded).map_err(|e| {
                WssError::Config(format!("certificate '{}' is not base64: {}", alias, e))
            })?;
            creds = creds.with_certificate(alias, der);
        }
        Ok(creds)
    }

    pub fn with_password(mut self, username: &str, password: &str) -> Self {
        self.passwords
            .insert(username.to_string(), Zeroizing::new(password.to_string()));
        self
    }

    pub fn with_key(mut self, alias: &str, key: Vec<u8>) -> Self {
        self.keys.insert(alias.to_string(), Zeroizing::new(key));
        self
    }

    pub fn with_certificate(mut self, alias: &str, der: Vec<u8>) -> Self {
        self.certificates
            .insert(crypto::sha1_thumbprint(&der), der.clone());
        self.certificates.insert(alias.to_string(), der);
        self
    }
}

impl CredentialCallback for StaticCredentials {
    fn resolve(&self, kind: IdentifierKind, identifier: &str) -> Option<Credential> {
        match kind {
            IdentifierKind::Username => self
                .passwords
                .get(identifier)
                .map(|p| Credential::Password(p.clone())),
            IdentifierKind::KeyAlias => self
                .keys
                .get(identifier)
                .map(|k| Credential::SecretKey(k.clone())),
            IdentifierKind::CertificateReference => self
                .certificates
                .get(identifier)
                .map(|c| Credential::Certificate(c.clone())),
        }
    }
}
