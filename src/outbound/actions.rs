//! The outbound actions.
//!
//! Each action adds its elements to the front of the security header, so the
//! finished header lists the steps in reverse order of application.

use super::element::{new_id, ElementBuilder, DS, WSC, WSSE, WSSE11, WSU, XENC};
use super::{Message, WssOutbound};
use crate::config::{
    Action, EncryptionKey, EncryptionPart, PasswordType, SignatureKey, SignaturePart,
};
use crate::credentials::CredentialLookup;
use crate::crypto::{self, DEFAULT_DERIVED_KEY_LABEL, DEFAULT_DERIVED_KEY_LENGTH};
use crate::error::WssError;
use crate::event::{Result, XmlEvent};
use crate::ns::{self, alg, attr, node};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;
use zeroize::Zeroizing;

/// Session keys for signatures over an EncryptedKey.
const SESSION_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 16;

/// What a security header entry was issued as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Issued {
    UsernameToken,
    Timestamp,
    BinarySecurityToken,
    Other,
}

/// One child of the security header being built.
#[derive(Debug)]
pub(crate) struct HeaderEntry {
    pub issued: Issued,
    /// Id signatures reference; the EncryptedData id once encrypted
    pub id: String,
    pub events: Vec<XmlEvent>,
}

impl HeaderEntry {
    fn other(id: String, events: Vec<XmlEvent>) -> Self {
        Self {
            issued: Issued::Other,
            id,
            events,
        }
    }
}

/// Applies the configured actions to one message.
pub(crate) struct Securer<'a> {
    outbound: &'a WssOutbound,
    now: DateTime<Utc>,
    pub header: Vec<HeaderEntry>,
    /// UsernameToken Profile 1.1 key of the issued UsernameToken
    username_key: Option<Zeroizing<Vec<u8>>>,
}

fn xsd_datetime(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn credential_missing(what: &str, name: &str) -> WssError {
    WssError::SecurityTokenUnavailable(format!("no {} for '{}'", what, name))
}

impl<'a> Securer<'a> {
    pub fn new(outbound: &'a WssOutbound, now: DateTime<Utc>) -> Self {
        Self {
            outbound,
            now,
            header: Vec::new(),
            username_key: None,
        }
    }

    fn prepend(&mut self, entries: Vec<HeaderEntry>) {
        self.header.splice(0..0, entries);
    }

    fn entry(&self, issued: Issued) -> Result<&HeaderEntry> {
        self.header
            .iter()
            .find(|e| e.issued == issued)
            .ok_or_else(|| WssError::Config(format!("no {:?} was issued", issued)))
    }

    pub fn apply(&mut self, action: Action, message: &mut Message) -> Result<()> {
        debug!(action = ?action, "Applying outbound action");
        match action {
            Action::UsernameToken => self.username_token(),
            Action::Timestamp => {
                self.timestamp();
                Ok(())
            }
            Action::BinarySecurityToken => self.binary_security_token(),
            Action::Signature => self.signature(message),
            Action::Encrypt => self.encrypt(message),
        }
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    fn username_token(&mut self) -> Result<()> {
        let outbound = self.outbound;
        let config = &outbound.config.outbound;
        let user = config
            .token_user
            .as_deref()
            .ok_or_else(|| WssError::Config("outbound.token_user is not set".to_string()))?;
        let password = outbound
            .credentials
            .password(user)
            .ok_or_else(|| credential_missing("password", user))?;

        let id = new_id("UsernameToken");
        let nonce = crypto::random_bytes(NONCE_LEN);
        let created = xsd_datetime(self.now);

        let mut b = ElementBuilder::new();
        b.open(WSSE, node::USERNAME_TOKEN)
            .wsu_id(&id)
            .leaf(WSSE, node::USERNAME, user);
        match config.password_type {
            PasswordType::PasswordText => {
                b.open(WSSE, node::PASSWORD)
                    .attr(attr::TYPE, ns::PASSWORD_TEXT)
                    .text(&password)
                    .close();
            }
            PasswordType::PasswordDigest => {
                let digest = crypto::password_digest(&nonce, &created, &password);
                b.open(WSSE, node::PASSWORD)
                    .attr(attr::TYPE, ns::PASSWORD_DIGEST)
                    .text(&digest)
                    .close();
            }
            PasswordType::PasswordNone => {}
        }
        b.open(WSSE, node::NONCE)
            .attr(attr::ENCODING_TYPE, ns::BASE64_BINARY)
            .text(&crypto::encode_base64(&nonce))
            .close()
            .leaf(WSU, node::CREATED, &created);

        // The signature key is derived from this token
        if let SignatureKey::UsernameToken { iterations } = &config.signature.key {
            if config.actions.contains(&Action::Signature) {
                let salt = crypto::generate_salt(true);
                b.leaf(WSSE11, node::SALT, &crypto::encode_base64(&salt))
                    .leaf(WSSE11, node::ITERATION, &iterations.to_string());
                self.username_key = Some(crypto::derive_username_token_key(
                    &password,
                    &salt,
                    *iterations,
                ));
            }
        }

        self.prepend(vec![HeaderEntry {
            issued: Issued::UsernameToken,
            id,
            events: b.finish(),
        }]);
        Ok(())
    }

    fn timestamp(&mut self) {
        let ttl = chrono::Duration::seconds(self.outbound.config.outbound.timestamp_ttl_secs as i64);
        let id = new_id("Timestamp");
        let mut b = ElementBuilder::new();
        b.open(WSU, node::TIMESTAMP)
            .wsu_id(&id)
            .leaf(WSU, node::CREATED, &xsd_datetime(self.now))
            .leaf(WSU, node::EXPIRES, &xsd_datetime(self.now + ttl));
        self.prepend(vec![HeaderEntry {
            issued: Issued::Timestamp,
            id,
            events: b.finish(),
        }]);
    }

    fn binary_security_token(&mut self) -> Result<()> {
        let alias = self
            .outbound
            .config
            .outbound
            .certificate_alias
            .as_deref()
            .ok_or_else(|| WssError::Config("outbound.certificate_alias is not set".to_string()))?;
        let certificate = self
            .outbound
            .credentials
            .certificate(alias)
            .ok_or_else(|| credential_missing("certificate", alias))?;

        let id = new_id("X509");
        let mut b = ElementBuilder::new();
        b.open(WSSE, node::BINARY_SECURITY_TOKEN)
            .attr(attr::ENCODING_TYPE, ns::BASE64_BINARY)
            .attr(attr::VALUE_TYPE, ns::X509_V3)
            .wsu_id(&id)
            .text(&crypto::encode_base64(&certificate));
        self.prepend(vec![HeaderEntry {
            issued: Issued::BinarySecurityToken,
            id,
            events: b.finish(),
        }]);
        Ok(())
    }

    /// `xenc:EncryptedKey` carrying `session_key` wrapped under `kek_alias`.
    fn encrypted_key(
        &self,
        session_key: &[u8],
        kek_alias: &str,
        data_references: &[String],
    ) -> Result<HeaderEntry> {
        let suite = &self.outbound.suite;
        let algorithm = &self.outbound.config.outbound.encryption.key_transport_algorithm;
        let kek = self
            .outbound
            .credentials
            .secret_key(kek_alias)
            .ok_or_else(|| credential_missing("key", kek_alias))?;
        let wrapped = suite.encrypt(&kek, session_key, algorithm)?;

        let id = new_id("EncryptedKey");
        let mut b = ElementBuilder::new();
        b.open(XENC, node::ENCRYPTED_KEY)
            .attr(attr::ID, &id)
            .empty(XENC, node::ENCRYPTION_METHOD, attr::ALGORITHM, algorithm)
            .key_name(kek_alias)
            .open(XENC, node::CIPHER_DATA)
            .leaf(XENC, node::CIPHER_VALUE, &crypto::encode_base64(&wrapped))
            .close();
        if !data_references.is_empty() {
            b.open(XENC, node::REFERENCE_LIST);
            for reference in data_references {
                b.empty(XENC, node::DATA_REFERENCE, attr::URI, &format!("#{}", reference));
            }
            b.close();
        }
        Ok(HeaderEntry::other(id, b.finish()))
    }

    // ========================================================================
    // Signature
    // ========================================================================

    /// Signing key, its KeyInfo content and the header entries it needs.
    fn signing_key(&self) -> Result<(Zeroizing<Vec<u8>>, Vec<XmlEvent>, Vec<HeaderEntry>)> {
        let config = &self.outbound.config.outbound.signature;
        let mut key_info = ElementBuilder::new();
        key_info.open(DS, node::KEY_INFO);

        let (key, entries) = match &config.key {
            SignatureKey::KeyName { alias } => {
                let key = self
                    .outbound
                    .credentials
                    .secret_key(alias)
                    .ok_or_else(|| credential_missing("key", alias))?;
                key_info.leaf(DS, node::KEY_NAME, alias);
                (key, Vec::new())
            }
            SignatureKey::UsernameToken { .. } => {
                let key = self.username_key.clone().ok_or_else(|| {
                    WssError::Config("the UsernameToken was issued without a salt".to_string())
                })?;
                let token = self.entry(Issued::UsernameToken)?;
                key_info.token_reference(&token.id, ns::USERNAME_TOKEN_VALUE_TYPE);
                (key, Vec::new())
            }
            SignatureKey::EncryptedKey { kek_alias } => {
                let session = Zeroizing::new(crypto::random_bytes(SESSION_KEY_LEN));
                let ek = self.encrypted_key(&session, kek_alias, &[])?;
                key_info.token_reference(&ek.id, ns::ENCRYPTED_KEY_VALUE_TYPE);
                (session, vec![ek])
            }
            SignatureKey::DerivedKey { kek_alias } => {
                let session = Zeroizing::new(crypto::random_bytes(SESSION_KEY_LEN));
                let ek = self.encrypted_key(&session, kek_alias, &[])?;

                let nonce = crypto::random_bytes(NONCE_LEN);
                let mut seed = DEFAULT_DERIVED_KEY_LABEL.as_bytes().to_vec();
                seed.extend_from_slice(&nonce);
                let key = crypto::p_sha1(&session, &seed, 0, DEFAULT_DERIVED_KEY_LENGTH)?;

                let id = new_id("DerivedKeyToken");
                let mut dk = ElementBuilder::new();
                dk.open(WSC, node::DERIVED_KEY_TOKEN)
                    .wsu_id(&id)
                    .attr(attr::ALGORITHM, alg::P_SHA1)
                    .token_reference(&ek.id, ns::ENCRYPTED_KEY_VALUE_TYPE)
                    .leaf(WSC, node::LENGTH, &DEFAULT_DERIVED_KEY_LENGTH.to_string())
                    .leaf(WSC, node::NONCE, &crypto::encode_base64(&nonce));

                key_info.token_reference(&id, ns::DERIVED_KEY_VALUE_TYPE);
                (key, vec![ek, HeaderEntry::other(id, dk.finish())])
            }
        };
        Ok((key, key_info.finish(), entries))
    }

    /// Id and events of one signed part.
    fn signed_part(&self, part: SignaturePart, message: &mut Message) -> Result<(String, Vec<XmlEvent>)> {
        let issued = match part {
            SignaturePart::Body => {
                let id = message.body_id();
                return Ok((id, message.body_events()));
            }
            SignaturePart::Timestamp => Issued::Timestamp,
            SignaturePart::UsernameToken => Issued::UsernameToken,
            SignaturePart::BinarySecurityToken => Issued::BinarySecurityToken,
        };
        let entry = self.entry(issued)?;
        Ok((entry.id.clone(), entry.events.clone()))
    }

    fn signature(&mut self, message: &mut Message) -> Result<()> {
        let outbound = self.outbound;
        let suite = &outbound.suite;
        let config = &outbound.config.outbound.signature;

        let mut signed_info = ElementBuilder::new();
        signed_info
            .open(DS, node::SIGNED_INFO)
            .empty(DS, node::CANONICALIZATION_METHOD, attr::ALGORITHM, &config.c14n_algorithm)
            .empty(DS, node::SIGNATURE_METHOD, attr::ALGORITHM, &config.algorithm);
        for part in &config.parts {
            let (id, events) = self.signed_part(*part, message)?;
            let canonical = suite.canonicalize(&events, &config.c14n_algorithm)?;
            let digest = suite.digest(&canonical, &config.digest_algorithm)?;
            debug!(reference = %id, part = ?part, "Reference digested");

            signed_info
                .open(DS, node::REFERENCE)
                .attr(attr::URI, &format!("#{}", id))
                .open(DS, node::TRANSFORMS)
                .empty(DS, node::TRANSFORM, attr::ALGORITHM, &config.c14n_algorithm)
                .close()
                .empty(DS, node::DIGEST_METHOD, attr::ALGORITHM, &config.digest_algorithm)
                .leaf(DS, node::DIGEST_VALUE, &crypto::encode_base64(&digest))
                .close();
        }
        let signed_info = signed_info.finish();

        let (key, key_info, mut entries) = self.signing_key()?;
        let canonical = suite.canonicalize(&signed_info, &config.c14n_algorithm)?;
        let value = suite.sign(&key, &canonical, &config.algorithm)?;

        let id = new_id("Signature");
        let mut b = ElementBuilder::new();
        b.open(DS, node::SIGNATURE)
            .attr(attr::ID, &id)
            .append(&signed_info)
            .leaf(DS, node::SIGNATURE_VALUE, &crypto::encode_base64(&value))
            .append(&key_info);
        entries.push(HeaderEntry::other(id, b.finish()));

        debug!(references = config.parts.len(), "Signature computed");
        self.prepend(entries);
        Ok(())
    }

    // ========================================================================
    // Encryption
    // ========================================================================

    /// `xenc:EncryptedData` over the canonical form of `plaintext`.
    fn encrypted_data(
        &self,
        plaintext: &[XmlEvent],
        encryption_type: &str,
        key: &[u8],
        key_name: Option<&str>,
    ) -> Result<(String, Vec<XmlEvent>)> {
        let suite = &self.outbound.suite;
        let algorithm = &self.outbound.config.outbound.encryption.algorithm;
        let canonical = suite.canonicalize(plaintext, alg::EXC_C14N)?;
        let cipher = suite.encrypt(key, &canonical, algorithm)?;

        let id = new_id("EncryptedData");
        let mut b = ElementBuilder::new();
        b.open(XENC, node::ENCRYPTED_DATA)
            .attr(attr::ID, &id)
            .attr(attr::TYPE, encryption_type)
            .empty(XENC, node::ENCRYPTION_METHOD, attr::ALGORITHM, algorithm);
        if let Some(alias) = key_name {
            b.key_name(alias);
        }
        b.open(XENC, node::CIPHER_DATA)
            .leaf(XENC, node::CIPHER_VALUE, &crypto::encode_base64(&cipher))
            .close();
        Ok((id, b.finish()))
    }

    fn encrypt(&mut self, message: &mut Message) -> Result<()> {
        let outbound = self.outbound;
        let suite = &outbound.suite;
        let config = &outbound.config.outbound.encryption;
        let key_length = suite.key_length(&config.algorithm)?;

        let (key, key_name) = match &config.key {
            EncryptionKey::EncryptedKey { .. } => {
                (Zeroizing::new(crypto::random_bytes(key_length)), None)
            }
            EncryptionKey::KeyName { alias } => {
                let key = outbound
                    .credentials
                    .secret_key(alias)
                    .ok_or_else(|| credential_missing("key", alias))?;
                if key.len() != key_length {
                    return Err(WssError::Config(format!(
                        "key '{}' is {} bytes, {} needs {}",
                        alias,
                        key.len(),
                        config.algorithm,
                        key_length
                    )));
                }
                (key, Some(alias.as_str()))
            }
        };

        let mut references = Vec::new();
        for part in &config.parts {
            match part {
                EncryptionPart::BodyContent => {
                    let (id, events) = self.encrypted_data(
                        &message.body_content,
                        ns::ENC_TYPE_CONTENT,
                        &key,
                        key_name,
                    )?;
                    message.body_content = events;
                    references.push(id);
                }
                EncryptionPart::UsernameToken => {
                    let index = self
                        .header
                        .iter()
                        .position(|e| e.issued == Issued::UsernameToken)
                        .ok_or_else(|| WssError::Config("no UsernameToken was issued".to_string()))?;
                    let (id, events) = self.encrypted_data(
                        &self.header[index].events,
                        ns::ENC_TYPE_ELEMENT,
                        &key,
                        key_name,
                    )?;
                    let entry = &mut self.header[index];
                    entry.id = id.clone();
                    entry.events = events;
                    references.push(id);
                }
            }
        }
        debug!(parts = references.len(), "Content encrypted");

        let marker = match &config.key {
            EncryptionKey::EncryptedKey { kek_alias } => {
                self.encrypted_key(&key, kek_alias, &references)?
            }
            EncryptionKey::KeyName { .. } => {
                let mut b = ElementBuilder::new();
                b.open(XENC, node::REFERENCE_LIST);
                for reference in &references {
                    b.empty(XENC, node::DATA_REFERENCE, attr::URI, &format!("#{}", reference));
                }
                HeaderEntry::other(new_id("ReferenceList"), b.finish())
            }
        };
        self.prepend(vec![marker]);
        Ok(())
    }
}
