//! `xenc:EncryptedKey`: a session key wrapped under a shared key-encryption key.
//!
//! Key transport uses the allow-listed AES-GCM ciphers; the key-encryption
//! key is always resolved by alias through the credential callback.

use super::{base64_value, KeyReference, Token, ValidationContext};
use crate::credentials::CredentialLookup;
use crate::error::WssError;
use crate::ns::{self, attr, node};
use crate::security_event::SecurityEvent;
use crate::token::reference::local_id;
use crate::tree::Element;
use tracing::{debug, warn};
use zeroize::Zeroizing;

#[derive(Clone)]
pub struct EncryptedKeyToken {
    pub id: Option<String>,
    pub algorithm: String,
    pub kek: KeyReference,
    wrapped: Vec<u8>,
    /// Ids of the `xenc:EncryptedData` this key decrypts
    pub data_references: Vec<String>,
    session_key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for EncryptedKeyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedKeyToken")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("kek", &self.kek)
            .field("data_references", &self.data_references)
            .field("unwrapped", &self.session_key.is_some())
            .finish()
    }
}

impl EncryptedKeyToken {
    /// The unwrapped session key, once validated.
    pub fn session_key(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.session_key.clone()
    }
}

/// Ids listed by an `xenc:ReferenceList`.
pub fn reference_list(element: &Element) -> Result<Vec<String>, WssError> {
    element
        .children_named(ns::XENC, node::DATA_REFERENCE)
        .map(|r| {
            let uri = r.attr(None, attr::URI).unwrap_or_default();
            local_id(uri).map(String::from).ok_or_else(|| {
                WssError::UnresolvedReference(format!("non-local data reference '{}'", uri))
            })
        })
        .collect()
}

impl Token for EncryptedKeyToken {
    fn parse(element: &Element) -> Result<Self, WssError> {
        let algorithm = element
            .child(ns::XENC, node::ENCRYPTION_METHOD)
            .and_then(|m| m.attr(None, attr::ALGORITHM))
            .ok_or_else(|| {
                WssError::InvalidSecurityToken("EncryptedKey without EncryptionMethod".to_string())
            })?;
        let key_info = element.child(ns::DSIG, node::KEY_INFO).ok_or_else(|| {
            WssError::SecurityTokenUnavailable("EncryptedKey without KeyInfo".to_string())
        })?;
        let kek = KeyReference::from_key_info(key_info)?;

        let cipher_value = element
            .child(ns::XENC, node::CIPHER_DATA)
            .and_then(|c| c.child_text(ns::XENC, node::CIPHER_VALUE))
            .ok_or_else(|| {
                WssError::InvalidSecurityToken("EncryptedKey without CipherValue".to_string())
            })?;
        let wrapped = base64_value(&cipher_value, "EncryptedKey cipher value")?;

        let data_references = match element.child(ns::XENC, node::REFERENCE_LIST) {
            Some(list) => reference_list(list)?,
            None => Vec::new(),
        };

        Ok(Self {
            id: element.id().map(String::from),
            algorithm: algorithm.to_string(),
            kek,
            wrapped,
            data_references,
            session_key: None,
        })
    }

    fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError> {
        ctx.suite.check(&self.algorithm)?;
        let alias = self.kek.alias().ok_or_else(|| {
            WssError::SecurityTokenUnavailable(format!(
                "EncryptedKey key-encryption key {} must be named by alias",
                self.kek.describe()
            ))
        })?;
        let kek = ctx.credentials.secret_key(alias).ok_or_else(|| {
            warn!(alias = %alias, "Unknown key-encryption key");
            WssError::SecurityTokenUnavailable(format!("unknown key alias '{}'", alias))
        })?;

        let session_key = ctx.suite.decrypt(&kek, &self.wrapped, &self.algorithm)?;
        debug!(
            kek = %alias,
            references = self.data_references.len(),
            "EncryptedKey unwrapped"
        );
        self.session_key = Some(session_key);

        Ok(SecurityEvent::EncryptedKeyResolved {
            id: self.id.clone(),
            algorithm: self.algorithm.clone(),
            data_references: self.data_references.clone(),
        })
    }
}
