//! Key references: `wsse:SecurityTokenReference` and `ds:KeyInfo`.

use crate::error::WssError;
use crate::ns::{self, attr, node};
use crate::tree::Element;

/// How a signature, EncryptedKey or EncryptedData names its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReference {
    /// `wsse:Reference URI="#id"` to a token in the same header
    TokenId {
        id: String,
        value_type: Option<String>,
    },
    /// `wsse:KeyIdentifier`, resolved as a key alias
    KeyIdentifier {
        value_type: Option<String>,
        value: String,
    },
    /// `ds:KeyName`, resolved as a key alias
    KeyName(String),
}

impl KeyReference {
    /// Parse a `ds:KeyInfo` (or a bare `wsse:SecurityTokenReference`).
    pub fn from_key_info(key_info: &Element) -> Result<Self, WssError> {
        if key_info.is(ns::WSSE, node::SECURITY_TOKEN_REFERENCE) {
            return Self::from_token_reference(key_info);
        }
        if let Some(str_element) = key_info.child(ns::WSSE, node::SECURITY_TOKEN_REFERENCE) {
            return Self::from_token_reference(str_element);
        }
        if let Some(name) = key_info.child(ns::DSIG, node::KEY_NAME) {
            let name = name.text();
            if !name.is_empty() {
                return Ok(Self::KeyName(name));
            }
        }
        Err(WssError::SecurityTokenUnavailable(
            "KeyInfo carries no supported key reference".to_string(),
        ))
    }

    pub fn from_token_reference(str_element: &Element) -> Result<Self, WssError> {
        if let Some(reference) = str_element.child(ns::WSSE, node::REFERENCE) {
            let uri = reference.attr(None, attr::URI).ok_or_else(|| {
                WssError::InvalidSecurityToken("wsse:Reference without URI".to_string())
            })?;
            let id = local_id(uri).ok_or_else(|| {
                WssError::UnresolvedReference(format!("non-local token reference '{}'", uri))
            })?;
            return Ok(Self::TokenId {
                id: id.to_string(),
                value_type: reference.attr(None, attr::VALUE_TYPE).map(String::from),
            });
        }
        if let Some(identifier) = str_element.child(ns::WSSE, node::KEY_IDENTIFIER) {
            let value = identifier.text();
            if value.is_empty() {
                return Err(WssError::InvalidSecurityToken(
                    "empty wsse:KeyIdentifier".to_string(),
                ));
            }
            return Ok(Self::KeyIdentifier {
                value_type: identifier.attr(None, attr::VALUE_TYPE).map(String::from),
                value,
            });
        }
        Err(WssError::SecurityTokenUnavailable(
            "SecurityTokenReference carries no supported reference".to_string(),
        ))
    }

    /// Alias to ask the credential callback for, if this is not a token reference.
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::TokenId { .. } => None,
            Self::KeyIdentifier { value, .. } => Some(value),
            Self::KeyName(name) => Some(name),
        }
    }

    /// Human-readable key description for events and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::TokenId { id, .. } => format!("#{}", id),
            Self::KeyIdentifier { value, .. } => value.clone(),
            Self::KeyName(name) => name.clone(),
        }
    }
}

/// `#id` -> `id`; other URI forms are not same-document references.
pub fn local_id(uri: &str) -> Option<&str> {
    uri.strip_prefix('#').filter(|id| !id.is_empty())
}
