//! Configuration types for the WS-Security processor.

use crate::crypto::MIN_USERNAME_TOKEN_ITERATIONS;
use crate::error::WssError;
use crate::ns::alg;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration for inbound and outbound WS-Security processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WssConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// Inbound (verifying) configuration
    pub inbound: InboundConfig,

    /// Outbound (securing) configuration
    pub outbound: OutboundConfig,

    /// Algorithm allow-list
    pub algorithms: AlgorithmsConfig,

    /// Static credentials (used by the CLI credential callback)
    pub credentials: CredentialsConfig,
}

impl Default for WssConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            inbound: InboundConfig::default(),
            outbound: OutboundConfig::default(),
            algorithms: AlgorithmsConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Longest freshness window or clock skew accepted, one year.
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

impl WssConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), WssError> {
        if self.inbound.freshness_window_secs == 0 {
            return Err(WssError::Config(
                "inbound.freshness_window_secs must be greater than zero".to_string(),
            ));
        }
        for (field, secs) in [
            ("freshness_window_secs", self.inbound.freshness_window_secs),
            ("future_tolerance_secs", self.inbound.future_tolerance_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(WssError::Config(format!(
                    "inbound.{} must not exceed {}",
                    field, MAX_WINDOW_SECS
                )));
            }
        }
        if self.inbound.max_username_token_iterations < MIN_USERNAME_TOKEN_ITERATIONS {
            return Err(WssError::Config(format!(
                "inbound.max_username_token_iterations must be at least {}",
                MIN_USERNAME_TOKEN_ITERATIONS
            )));
        }
        if self.algorithms.allowed.is_empty() {
            return Err(WssError::Config(
                "algorithms.allowed must list at least one algorithm".to_string(),
            ));
        }
        self.outbound.validate()
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Reject unknown security header children marked mustUnderstand
    pub strict: bool,

    /// Actor/role of the security header to process (None = default header)
    pub actor: Option<String>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            strict: true,
            actor: None,
        }
    }
}

/// Inbound processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Fail documents without a matching security header
    pub require_security_header: bool,

    /// Maximum age of nonces and timestamps in seconds
    pub freshness_window_secs: u64,

    /// Accepted clock skew for creation times in the future
    pub future_tolerance_secs: u64,

    /// Require a Timestamp in the security header
    pub require_timestamp: bool,

    /// Require a UsernameToken in the security header
    pub require_username_token: bool,

    /// Accepted UsernameToken password types
    pub allowed_password_types: Vec<PasswordType>,

    /// Most `wsse11:Iteration` rounds spent deriving a UsernameToken key
    pub max_username_token_iterations: u32,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            require_security_header: true,
            freshness_window_secs: 300, // 5 minutes
            future_tolerance_secs: 300,
            require_timestamp: false,
            require_username_token: false,
            allowed_password_types: vec![
                PasswordType::PasswordText,
                PasswordType::PasswordDigest,
                PasswordType::PasswordNone,
            ],
            max_username_token_iterations: 10_000,
        }
    }
}

impl InboundConfig {
    pub fn freshness_window(&self) -> chrono::Duration {
        window(self.freshness_window_secs)
    }

    pub fn future_tolerance(&self) -> chrono::Duration {
        window(self.future_tolerance_secs)
    }
}

fn window(secs: u64) -> chrono::Duration {
    // Lossless once clamped to a year
    chrono::Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    pub fn from_namespace(ns: &str) -> Option<Self> {
        match ns {
            crate::ns::SOAP_11 => Some(Self::Soap11),
            crate::ns::SOAP_12 => Some(Self::Soap12),
            _ => None,
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => crate::ns::SOAP_11,
            Self::Soap12 => crate::ns::SOAP_12,
        }
    }
}

/// WS-Security UsernameToken password types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PasswordType {
    /// Plain text password (not recommended)
    #[serde(rename = "PasswordText")]
    PasswordText,
    /// Digested password (SHA-1 with nonce and timestamp)
    #[serde(rename = "PasswordDigest")]
    PasswordDigest,
    /// No password element at all
    #[serde(rename = "PasswordNone")]
    PasswordNone,
}

impl PasswordType {
    /// The `Type` attribute URI, if the type is carried on the wire.
    pub fn uri(&self) -> Option<&'static str> {
        match self {
            Self::PasswordText => Some(crate::ns::PASSWORD_TEXT),
            Self::PasswordDigest => Some(crate::ns::PASSWORD_DIGEST),
            Self::PasswordNone => None,
        }
    }
}

/// Outbound securing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Ordered list of actions applied to the document
    pub actions: Vec<Action>,

    /// Identity used for issued UsernameTokens
    pub token_user: Option<String>,

    /// Password type for issued UsernameTokens
    pub password_type: PasswordType,

    /// Lifetime of issued Timestamps in seconds
    pub timestamp_ttl_secs: u64,

    /// Certificate alias for issued BinarySecurityTokens
    pub certificate_alias: Option<String>,

    /// Signature action settings
    pub signature: SignatureConfig,

    /// Encrypt action settings
    pub encryption: EncryptionConfig,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            token_user: None,
            password_type: PasswordType::PasswordDigest,
            timestamp_ttl_secs: 300,
            certificate_alias: None,
            signature: SignatureConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }
}

impl OutboundConfig {
    fn validate(&self) -> Result<(), WssError> {
        let position = |action: Action| self.actions.iter().position(|a| *a == action);

        for (i, action) in self.actions.iter().enumerate() {
            if self.actions[..i].contains(action) {
                return Err(WssError::Config(format!(
                    "outbound action {:?} is listed more than once",
                    action
                )));
            }
        }

        if position(Action::UsernameToken).is_some() && self.token_user.is_none() {
            return Err(WssError::Config(
                "outbound.token_user is required for the username_token action".to_string(),
            ));
        }
        if position(Action::BinarySecurityToken).is_some() && self.certificate_alias.is_none() {
            return Err(WssError::Config(
                "outbound.certificate_alias is required for the binary_security_token action"
                    .to_string(),
            ));
        }

        if let Some(sig) = position(Action::Signature) {
            let requires = |action: Action, what: &str| match position(action) {
                Some(p) if p < sig => Ok(()),
                _ => Err(WssError::Config(format!(
                    "signature {} requires the {:?} action before signature",
                    what, action
                ))),
            };
            if let SignatureKey::UsernameToken { iterations } = self.signature.key {
                requires(Action::UsernameToken, "key source username_token")?;
                if iterations < MIN_USERNAME_TOKEN_ITERATIONS {
                    return Err(WssError::Config(format!(
                        "signature key iterations must be at least {}",
                        MIN_USERNAME_TOKEN_ITERATIONS
                    )));
                }
                if self.password_type == PasswordType::PasswordNone {
                    return Err(WssError::Config(
                        "signature key source username_token needs a password type other than PasswordNone"
                            .to_string(),
                    ));
                }
            }
            for part in &self.signature.parts {
                match part {
                    SignaturePart::Body => {}
                    SignaturePart::Timestamp => requires(Action::Timestamp, "part timestamp")?,
                    SignaturePart::UsernameToken => {
                        requires(Action::UsernameToken, "part username_token")?
                    }
                    SignaturePart::BinarySecurityToken => {
                        requires(Action::BinarySecurityToken, "part binary_security_token")?
                    }
                }
            }
            if self.signature.parts.is_empty() {
                return Err(WssError::Config(
                    "outbound.signature.parts must not be empty".to_string(),
                ));
            }
        }

        if let Some(enc) = position(Action::Encrypt) {
            if self.encryption.parts.is_empty() {
                return Err(WssError::Config(
                    "outbound.encryption.parts must not be empty".to_string(),
                ));
            }
            if self.encryption.parts.contains(&EncryptionPart::UsernameToken)
                && !matches!(position(Action::UsernameToken), Some(p) if p < enc)
            {
                return Err(WssError::Config(
                    "encryption part username_token requires the UsernameToken action before encrypt"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Outbound actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    UsernameToken,
    Timestamp,
    BinarySecurityToken,
    Signature,
    Encrypt,
}

/// Signature action settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// SignatureMethod algorithm URI
    pub algorithm: String,

    /// DigestMethod algorithm URI
    pub digest_algorithm: String,

    /// CanonicalizationMethod / transform algorithm URI
    pub c14n_algorithm: String,

    /// Where the signing key comes from
    pub key: SignatureKey,

    /// Parts of the message to sign
    pub parts: Vec<SignaturePart>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            algorithm: alg::HMAC_SHA256.to_string(),
            digest_algorithm: alg::SHA256.to_string(),
            c14n_algorithm: alg::EXC_C14N.to_string(),
            key: SignatureKey::UsernameToken { iterations: 1000 },
            parts: vec![SignaturePart::Body],
        }
    }
}

/// Signing key source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SignatureKey {
    /// Secret key resolved by alias, referenced with `ds:KeyName`
    KeyName { alias: String },
    /// Key derived from the issued UsernameToken's password
    UsernameToken {
        #[serde(default = "default_iterations")]
        iterations: u32,
    },
    /// Fresh session key carried in an EncryptedKey wrapped with `kek_alias`
    EncryptedKey { kek_alias: String },
    /// DerivedKeyToken over a fresh EncryptedKey wrapped with `kek_alias`
    DerivedKey { kek_alias: String },
}

fn default_iterations() -> u32 {
    1000
}

/// Signable message parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignaturePart {
    Body,
    Timestamp,
    UsernameToken,
    BinarySecurityToken,
}

/// Encrypt action settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Data encryption algorithm URI
    pub algorithm: String,

    /// Key transport algorithm URI (EncryptedKey)
    pub key_transport_algorithm: String,

    /// Where the content encryption key comes from
    pub key: EncryptionKey,

    /// Parts of the message to encrypt
    pub parts: Vec<EncryptionPart>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: alg::AES256_GCM.to_string(),
            key_transport_algorithm: alg::AES256_GCM.to_string(),
            key: EncryptionKey::EncryptedKey {
                kek_alias: String::new(),
            },
            parts: vec![EncryptionPart::BodyContent],
        }
    }
}

/// Content encryption key source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EncryptionKey {
    /// Fresh session key in an EncryptedKey wrapped with `kek_alias`
    EncryptedKey { kek_alias: String },
    /// Secret key resolved by alias, referenced with `ds:KeyName`
    KeyName { alias: String },
}

/// Encryptable message parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionPart {
    /// Children of the SOAP Body (`Type=Content`)
    BodyContent,
    /// The issued UsernameToken (`Type=Element`)
    UsernameToken,
}

/// Algorithm allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmsConfig {
    /// Algorithm URIs accepted inbound and usable outbound
    pub allowed: Vec<String>,
}

impl Default for AlgorithmsConfig {
    fn default() -> Self {
        Self {
            allowed: [
                alg::EXC_C14N,
                alg::SHA1,
                alg::SHA256,
                alg::HMAC_SHA1,
                alg::HMAC_SHA256,
                alg::AES128_GCM,
                alg::AES256_GCM,
                alg::P_SHA1,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Static credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Username -> plaintext password
    pub passwords: HashMap<String, String>,

    /// Key alias -> base64 secret key
    pub keys: HashMap<String, String>,

    /// Certificate reference -> base64 DER certificate
    pub certificates: HashMap<String, String>,
}
