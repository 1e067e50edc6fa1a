//! `wsse:BinarySecurityToken` carrying an X.509 certificate.

use super::{base64_value, Token, ValidationContext};
use crate::credentials::CredentialLookup;
use crate::crypto;
use crate::error::WssError;
use crate::ns::{self, attr};
use crate::security_event::SecurityEvent;
use crate::tree::Element;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BinarySecurityToken {
    pub id: Option<String>,
    pub value_type: String,
    pub encoding_type: String,
    pub certificate: Vec<u8>,
    /// Base64 SHA-1 thumbprint of the certificate
    pub thumbprint: String,
}

impl Token for BinarySecurityToken {
    fn parse(element: &Element) -> Result<Self, WssError> {
        let encoding_type = element
            .attr(None, attr::ENCODING_TYPE)
            .unwrap_or(ns::BASE64_BINARY);
        if encoding_type != ns::BASE64_BINARY {
            return Err(WssError::InvalidSecurityToken(format!(
                "unsupported encoding type '{}'",
                encoding_type
            )));
        }
        let value_type = element.attr(None, attr::VALUE_TYPE).ok_or_else(|| {
            WssError::InvalidSecurityToken("BinarySecurityToken without ValueType".to_string())
        })?;
        if value_type != ns::X509_V3 {
            return Err(WssError::InvalidSecurityToken(format!(
                "unsupported value type '{}'",
                value_type
            )));
        }

        let certificate = base64_value(&element.text(), "BinarySecurityToken")?;
        if certificate.is_empty() {
            return Err(WssError::InvalidSecurityToken(
                "empty BinarySecurityToken".to_string(),
            ));
        }
        let thumbprint = crypto::sha1_thumbprint(&certificate);

        Ok(Self {
            id: element.id().map(String::from),
            value_type: value_type.to_string(),
            encoding_type: encoding_type.to_string(),
            certificate,
            thumbprint,
        })
    }

    fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError> {
        let trusted = ctx
            .credentials
            .certificate(&self.thumbprint)
            .map(|known| crypto::constant_time_eq(&known, &self.certificate))
            .unwrap_or(false);
        if !trusted {
            warn!(thumbprint = %self.thumbprint, "Untrusted certificate");
            return Err(WssError::AuthenticationFailed(format!(
                "certificate {} is not trusted",
                self.thumbprint
            )));
        }

        debug!(thumbprint = %self.thumbprint, "BinarySecurityToken validated");
        Ok(SecurityEvent::BinarySecurityTokenValidated {
            id: self.id.clone(),
            thumbprint: self.thumbprint.clone(),
        })
    }
}
