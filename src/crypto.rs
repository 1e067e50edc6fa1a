//! Cryptographic primitives behind an algorithm allow-list.
//!
//! Every algorithm identifier that reaches this module, inbound or outbound,
//! is checked against the configured allow-list first.

use crate::c14n;
use crate::config::AlgorithmsConfig;
use crate::error::WssError;
use crate::event::XmlEvent;
use crate::ns::alg;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use ring::{digest, hmac};
use std::collections::HashSet;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// AES-GCM nonce length in bytes.
const GCM_NONCE_LEN: usize = 12;

/// Length of UsernameToken Profile 1.1 salts.
const SALT_LEN: usize = 16;

/// Default P_SHA1 label for derived keys.
pub const DEFAULT_DERIVED_KEY_LABEL: &str = "WS-SecureConversationWS-SecureConversation";

/// Default derived key length in bytes.
pub const DEFAULT_DERIVED_KEY_LENGTH: usize = 32;

/// Algorithms this crate can execute.
const SUPPORTED: &[&str] = &[
    alg::EXC_C14N,
    alg::SHA1,
    alg::SHA256,
    alg::HMAC_SHA1,
    alg::HMAC_SHA256,
    alg::AES128_GCM,
    alg::AES256_GCM,
    alg::P_SHA1,
];

/// Allow-listed primitive operations.
#[derive(Debug, Clone)]
pub struct AlgorithmSuite {
    allowed: HashSet<String>,
}

impl Default for AlgorithmSuite {
    fn default() -> Self {
        Self::new(&AlgorithmsConfig::default())
    }
}

impl AlgorithmSuite {
    pub fn new(config: &AlgorithmsConfig) -> Self {
        Self {
            allowed: config.allowed.iter().cloned().collect(),
        }
    }

    /// Reject algorithms that are unknown or not allow-listed.
    pub fn check(&self, uri: &str) -> Result<(), WssError> {
        if SUPPORTED.contains(&uri) && self.allowed.contains(uri) {
            Ok(())
        } else {
            Err(WssError::UnsupportedAlgorithm(uri.to_string()))
        }
    }

    pub fn canonicalize(&self, events: &[XmlEvent], uri: &str) -> Result<Vec<u8>, WssError> {
        self.check(uri)?;
        match uri {
            alg::EXC_C14N => Ok(c14n::canonicalize(events)),
            _ => Err(WssError::UnsupportedAlgorithm(uri.to_string())),
        }
    }

    pub fn digest(&self, data: &[u8], uri: &str) -> Result<Vec<u8>, WssError> {
        self.check(uri)?;
        let algorithm = match uri {
            alg::SHA1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            alg::SHA256 => &digest::SHA256,
            _ => return Err(WssError::UnsupportedAlgorithm(uri.to_string())),
        };
        Ok(digest::digest(algorithm, data).as_ref().to_vec())
    }

    fn hmac_key(&self, key: &[u8], uri: &str) -> Result<hmac::Key, WssError> {
        self.check(uri)?;
        let algorithm = match uri {
            alg::HMAC_SHA1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            alg::HMAC_SHA256 => hmac::HMAC_SHA256,
            _ => return Err(WssError::UnsupportedAlgorithm(uri.to_string())),
        };
        Ok(hmac::Key::new(algorithm, key))
    }

    pub fn sign(&self, key: &[u8], data: &[u8], uri: &str) -> Result<Vec<u8>, WssError> {
        let key = self.hmac_key(key, uri)?;
        Ok(hmac::sign(&key, data).as_ref().to_vec())
    }

    pub fn verify(
        &self,
        key: &[u8],
        data: &[u8],
        signature: &[u8],
        uri: &str,
    ) -> Result<(), WssError> {
        let key = self.hmac_key(key, uri)?;
        hmac::verify(&key, data, signature)
            .map_err(|_| WssError::SignatureInvalid("signature value mismatch".to_string()))
    }

    /// Key length required by a cipher algorithm.
    pub fn key_length(&self, uri: &str) -> Result<usize, WssError> {
        self.check(uri)?;
        match uri {
            alg::AES128_GCM => Ok(16),
            alg::AES256_GCM => Ok(32),
            _ => Err(WssError::UnsupportedAlgorithm(uri.to_string())),
        }
    }

    /// Encrypt with a fresh nonce; output is `nonce ‖ ciphertext ‖ tag`.
    pub fn encrypt(&self, key: &[u8], plaintext: &[u8], uri: &str) -> Result<Vec<u8>, WssError> {
        self.key_length(uri)?;

        let mut nonce_bytes = [0u8; GCM_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = match uri {
            alg::AES128_GCM => Aes128Gcm::new_from_slice(key)
                .map_err(|e| WssError::Config(format!("invalid key: {}", e)))?
                .encrypt(nonce, plaintext),
            _ => Aes256Gcm::new_from_slice(key)
                .map_err(|e| WssError::Config(format!("invalid key: {}", e)))?
                .encrypt(nonce, plaintext),
        }
        .map_err(|e| WssError::Config(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce ‖ ciphertext ‖ tag`.
    pub fn decrypt(
        &self,
        key: &[u8],
        data: &[u8],
        uri: &str,
    ) -> Result<Zeroizing<Vec<u8>>, WssError> {
        self.key_length(uri)?;
        if data.len() < GCM_NONCE_LEN {
            return Err(WssError::DecryptionFailed(
                "cipher value shorter than nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = data.split_at(GCM_NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = match uri {
            alg::AES128_GCM => Aes128Gcm::new_from_slice(key)
                .map_err(|e| WssError::DecryptionFailed(format!("invalid key: {}", e)))?
                .decrypt(nonce, ciphertext),
            _ => Aes256Gcm::new_from_slice(key)
                .map_err(|e| WssError::DecryptionFailed(format!("invalid key: {}", e)))?
                .decrypt(nonce, ciphertext),
        }
        .map_err(|_| WssError::DecryptionFailed("authentication tag mismatch".to_string()))?;

        Ok(Zeroizing::new(plaintext))
    }
}

/// `Base64(SHA-1(nonce ‖ created ‖ password))`.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(nonce);
    ctx.update(created.as_bytes());
    ctx.update(password.as_bytes());
    STANDARD.encode(ctx.finish().as_ref())
}

/// Fewest `wsse11:Iteration` rounds accepted for a UsernameToken key.
pub const MIN_USERNAME_TOKEN_ITERATIONS: u32 = 1000;

/// UsernameToken Profile 1.1 key: `SHA-1^n(password ‖ salt)`.
pub fn derive_username_token_key(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<Vec<u8>> {
    let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(password.as_bytes());
    ctx.update(salt);
    let mut key = Zeroizing::new(ctx.finish().as_ref().to_vec());
    for _ in 1..iterations.max(1) {
        let next = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &key);
        key = Zeroizing::new(next.as_ref().to_vec());
    }
    key
}

/// Fresh UsernameToken salt; the first byte marks MAC (0x01) or encryption (0x02) use.
pub fn generate_salt(for_mac: bool) -> Vec<u8> {
    let mut salt = random_bytes(SALT_LEN);
    salt[0] = if for_mac { 0x01 } else { 0x02 };
    salt
}

/// Largest `offset + length` window `p_sha1` will expand to.
pub const MAX_P_SHA1_OUTPUT: usize = 4096;

/// TLS-style P_SHA1 expansion, returning `length` bytes starting at `offset`.
pub fn p_sha1(
    secret: &[u8],
    seed: &[u8],
    offset: usize,
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, WssError> {
    let needed = offset
        .checked_add(length)
        .filter(|needed| *needed <= MAX_P_SHA1_OUTPUT)
        .ok_or_else(|| {
            WssError::InvalidSecurityToken(format!(
                "derived key window {}+{} exceeds {} bytes",
                offset, length, MAX_P_SHA1_OUTPUT
            ))
        })?;
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret);
    let mut output = Zeroizing::new(Vec::with_capacity(needed + 20));

    // A(1) = HMAC(secret, seed)
    let mut a = hmac::sign(&key, seed).as_ref().to_vec();
    while output.len() < needed {
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(&a);
        ctx.update(seed);
        output.extend_from_slice(ctx.sign().as_ref());
        a = hmac::sign(&key, &a).as_ref().to_vec();
    }

    Ok(Zeroizing::new(output[offset..needed].to_vec()))
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Base64 SHA-1 thumbprint of a certificate.
pub fn sha1_thumbprint(der: &[u8]) -> String {
    STANDARD.encode(digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, der).as_ref())
}

pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 text, ignoring embedded whitespace (line-wrapped values).
pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}
