//! Error types for the WS-Security processor.
//!
//! Every error is terminal for the document pass that raised it. Each variant
//! maps onto one of the SOAP Message Security fault codes so a failed pass can
//! be reported to the peer as a SOAP Fault.

use crate::config::SoapVersion;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// WS-Security processing errors.
#[derive(Error, Debug)]
pub enum WssError {
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Replayed: {0}")]
    Replayed(String),

    #[error("Stale: {0}")]
    Stale(String),

    #[error("Security event rejected: {0}")]
    SecurityEventRejected(String),

    #[error("Unsupported mandatory element: {0}")]
    UnsupportedElement(String),

    #[error("Invalid security token: {0}")]
    InvalidSecurityToken(String),

    #[error("Invalid security header: {0}")]
    InvalidSecurity(String),

    #[error("Security token unavailable: {0}")]
    SecurityTokenUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WssError {
    /// Wrap any displayable XML layer error as `MalformedXml`.
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::MalformedXml(err.to_string())
    }

    /// Wrap a serializer failure as an IO error.
    pub fn write_failed(err: impl std::fmt::Display) -> Self {
        Self::Io(std::io::Error::other(err.to_string()))
    }

    /// Same variant and message, for reporting one failure twice.
    pub fn replicate(&self) -> Self {
        match self {
            Self::MalformedXml(m) => Self::MalformedXml(m.clone()),
            Self::UnsupportedAlgorithm(m) => Self::UnsupportedAlgorithm(m.clone()),
            Self::UnresolvedReference(m) => Self::UnresolvedReference(m.clone()),
            Self::AuthenticationFailed(m) => Self::AuthenticationFailed(m.clone()),
            Self::SignatureInvalid(m) => Self::SignatureInvalid(m.clone()),
            Self::DecryptionFailed(m) => Self::DecryptionFailed(m.clone()),
            Self::Replayed(m) => Self::Replayed(m.clone()),
            Self::Stale(m) => Self::Stale(m.clone()),
            Self::SecurityEventRejected(m) => Self::SecurityEventRejected(m.clone()),
            Self::UnsupportedElement(m) => Self::UnsupportedElement(m.clone()),
            Self::InvalidSecurityToken(m) => Self::InvalidSecurityToken(m.clone()),
            Self::InvalidSecurity(m) => Self::InvalidSecurity(m.clone()),
            Self::SecurityTokenUnavailable(m) => Self::SecurityTokenUnavailable(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }

    /// SOAP Message Security fault code for this error.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            Self::MalformedXml(_) | Self::InvalidSecurity(_) | Self::UnresolvedReference(_) => {
                FaultCode::InvalidSecurity
            }
            Self::UnsupportedAlgorithm(_) => FaultCode::UnsupportedAlgorithm,
            Self::AuthenticationFailed(_) | Self::Replayed(_) | Self::SecurityEventRejected(_) => {
                FaultCode::FailedAuthentication
            }
            Self::SignatureInvalid(_) | Self::DecryptionFailed(_) => FaultCode::FailedCheck,
            Self::Stale(_) => FaultCode::MessageExpired,
            Self::UnsupportedElement(_) => FaultCode::UnsupportedSecurityToken,
            Self::InvalidSecurityToken(_) => FaultCode::InvalidSecurityToken,
            Self::SecurityTokenUnavailable(_) => FaultCode::SecurityTokenUnavailable,
            Self::Config(_) | Self::Io(_) => FaultCode::InvalidSecurity,
        }
    }
}

/// SOAP Message Security 1.1 fault codes (section 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    /// An unsupported token was provided
    UnsupportedSecurityToken,
    /// An unsupported signature or encryption algorithm was used
    UnsupportedAlgorithm,
    /// An error was discovered processing the security header
    InvalidSecurity,
    /// An invalid security token was provided
    InvalidSecurityToken,
    /// The security token could not be authenticated or authorized
    FailedAuthentication,
    /// The signature or decryption was invalid
    FailedCheck,
    /// Referenced security token could not be retrieved
    SecurityTokenUnavailable,
    /// The message has expired
    MessageExpired,
}

impl FaultCode {
    /// Qualified fault code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedSecurityToken => "wsse:UnsupportedSecurityToken",
            Self::UnsupportedAlgorithm => "wsse:UnsupportedAlgorithm",
            Self::InvalidSecurity => "wsse:InvalidSecurity",
            Self::InvalidSecurityToken => "wsse:InvalidSecurityToken",
            Self::FailedAuthentication => "wsse:FailedAuthentication",
            Self::FailedCheck => "wsse:FailedCheck",
            Self::SecurityTokenUnavailable => "wsse:SecurityTokenUnavailable",
            Self::MessageExpired => "wsse:MessageExpired",
        }
    }

    /// Fault string defined for the code.
    ///
    /// Peers only ever see these fixed strings; the detailed reason stays in
    /// the local logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedSecurityToken => "An unsupported token was provided",
            Self::UnsupportedAlgorithm => {
                "An unsupported signature or encryption algorithm was used"
            }
            Self::InvalidSecurity => "An error was discovered processing the <wsse:Security> header",
            Self::InvalidSecurityToken => "An invalid security token was provided",
            Self::FailedAuthentication => {
                "The security token could not be authenticated or authorized"
            }
            Self::FailedCheck => "The signature or decryption was invalid",
            Self::SecurityTokenUnavailable => "Referenced security token could not be retrieved",
            Self::MessageExpired => "The message has expired",
        }
    }
}

/// Generate a SOAP Fault response for a failed pass.
pub fn soap_fault_response(error: &WssError, soap_version: Option<SoapVersion>) -> String {
    let code = error.fault_code();
    match soap_version.unwrap_or(SoapVersion::Soap11) {
        SoapVersion::Soap11 => soap_11_fault(code),
        SoapVersion::Soap12 => soap_12_fault(code),
    }
}

fn soap_11_fault(code: FaultCode) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode xmlns:wsse="{}">{}</faultcode>
      <faultstring>{}</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        crate::ns::WSSE,
        code.as_str(),
        xml_escape(code.reason())
    )
}

fn soap_12_fault(code: FaultCode) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body>
    <soap:Fault>
      <soap:Code>
        <soap:Value>soap:Sender</soap:Value>
        <soap:Subcode>
          <soap:Value xmlns:wsse="{}">{}</soap:Value>
        </soap:Subcode>
      </soap:Code>
      <soap:Reason>
        <soap:Text xml:lang="en">{}</soap:Text>
      </soap:Reason>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        crate::ns::WSSE,
        code.as_str(),
        xml_escape(code.reason())
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
