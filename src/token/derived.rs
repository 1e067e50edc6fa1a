//! `wsc:DerivedKeyToken` (WS-SecureConversation 1.3).

use super::{base64_value, KeyReference, Token, ValidationContext};
use crate::crypto::{
    self, DEFAULT_DERIVED_KEY_LABEL, DEFAULT_DERIVED_KEY_LENGTH, MAX_P_SHA1_OUTPUT,
};
use crate::error::WssError;
use crate::ns::{self, alg, attr, node};
use crate::security_event::SecurityEvent;
use crate::tree::Element;
use tracing::debug;
use zeroize::Zeroizing;

/// Upper bound on a derived key, guarding against absurd `Length` values.
const MAX_DERIVED_KEY_LENGTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct DerivedKeyToken {
    pub id: Option<String>,
    pub algorithm: String,
    /// The token whose secret the key is derived from
    pub base: KeyReference,
    pub offset: Option<usize>,
    pub generation: Option<usize>,
    pub length: usize,
    pub label: String,
    pub nonce: Vec<u8>,
}

impl DerivedKeyToken {
    /// Byte offset into the P_SHA1 stream, from `Offset` or `Generation * Length`.
    fn start(&self) -> Option<usize> {
        match (self.offset, self.generation) {
            (Some(offset), _) => Some(offset),
            (None, Some(generation)) => generation.checked_mul(self.length),
            (None, None) => Some(0),
        }
    }

    /// Derive this token's key from the base token's secret.
    pub fn derive(&self, base_secret: &[u8]) -> Result<Zeroizing<Vec<u8>>, WssError> {
        let offset = self.start().ok_or_else(|| {
            WssError::InvalidSecurityToken("DerivedKeyToken generation overflows".to_string())
        })?;
        let mut seed = self.label.as_bytes().to_vec();
        seed.extend_from_slice(&self.nonce);
        crypto::p_sha1(base_secret, &seed, offset, self.length)
    }
}

fn number(element: &Element, local: &str) -> Result<Option<usize>, WssError> {
    element
        .child_text(ns::WSC, local)
        .map(|text| {
            text.parse::<usize>().map_err(|_| {
                WssError::InvalidSecurityToken(format!("invalid DerivedKeyToken {}: {}", local, text))
            })
        })
        .transpose()
}

impl Token for DerivedKeyToken {
    fn parse(element: &Element) -> Result<Self, WssError> {
        let str_element = element
            .child(ns::WSSE, node::SECURITY_TOKEN_REFERENCE)
            .ok_or_else(|| {
                WssError::InvalidSecurityToken(
                    "DerivedKeyToken without SecurityTokenReference".to_string(),
                )
            })?;
        let base = KeyReference::from_token_reference(str_element)?;

        let offset = number(element, node::OFFSET)?;
        let generation = number(element, node::GENERATION)?;
        if offset.is_some() && generation.is_some() {
            return Err(WssError::InvalidSecurityToken(
                "DerivedKeyToken carries both Offset and Generation".to_string(),
            ));
        }
        let length = number(element, node::LENGTH)?.unwrap_or(DEFAULT_DERIVED_KEY_LENGTH);
        if length == 0 || length > MAX_DERIVED_KEY_LENGTH {
            return Err(WssError::InvalidSecurityToken(format!(
                "unsupported derived key length {}",
                length
            )));
        }

        let nonce = element
            .child_text(ns::WSC, node::NONCE)
            .ok_or_else(|| {
                WssError::InvalidSecurityToken("DerivedKeyToken without Nonce".to_string())
            })
            .and_then(|n| base64_value(&n, "DerivedKeyToken nonce"))?;

        let token = Self {
            id: element.id().map(String::from),
            algorithm: element
                .attr(None, attr::ALGORITHM)
                .unwrap_or(alg::P_SHA1)
                .to_string(),
            base,
            offset,
            generation,
            length,
            label: element
                .child_text(ns::WSC, node::LABEL)
                .unwrap_or_else(|| DEFAULT_DERIVED_KEY_LABEL.to_string()),
            nonce,
        };
        let end = token.start().and_then(|start| start.checked_add(length));
        if !matches!(end, Some(end) if end <= MAX_P_SHA1_OUTPUT) {
            return Err(WssError::InvalidSecurityToken(format!(
                "DerivedKeyToken window past {} bytes",
                MAX_P_SHA1_OUTPUT
            )));
        }
        Ok(token)
    }

    fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError> {
        ctx.suite.check(&self.algorithm)?;
        debug!(base = %self.base.describe(), length = self.length, "DerivedKeyToken parsed");
        Ok(SecurityEvent::DerivedKeyTokenParsed {
            id: self.id.clone(),
            length: self.length,
        })
    }
}
