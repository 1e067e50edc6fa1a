//! Integration tests for the zentinel-wss crate.
//!
//! These tests exercise the public API surface end-to-end: documents are
//! secured by the outbound builder and verified by the inbound processor,
//! or verified from hand-written fixtures.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use zentinel_wss::config::{
    Action, EncryptionKey, EncryptionPart, PasswordType, SignatureKey, SignaturePart, SoapVersion,
};
use zentinel_wss::crypto::sha1_thumbprint;
use zentinel_wss::security_event::EncryptionType;
use zentinel_wss::{
    soap_fault_response, FaultCode, NonceCache, SecurityEvent, StaticCredentials, WssConfig, WssError,
    WssInbound, WssOutbound,
};

// ============================================================================
// Helpers
// ============================================================================

const KEK: [u8; 32] = [7u8; 32];
const SHARED: [u8; 32] = [9u8; 32];
const CERTIFICATE: &[u8] = b"0\x82\x01\x0atest certificate bytes";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn credentials() -> Arc<StaticCredentials> {
    Arc::new(
        StaticCredentials::new()
            .with_password("alice", "secret")
            .with_key("kek", KEK.to_vec())
            .with_key("shared", SHARED.to_vec())
            .with_certificate("server", CERTIFICATE.to_vec()),
    )
}

fn plain_soap_11() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <m:GetPrice xmlns:m="urn:example:stock">
      <m:Item>Apple</m:Item>
    </m:GetPrice>
  </soap:Body>
</soap:Envelope>"#
}

fn plain_soap_12() -> &'static str {
    r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Header>
    <t:Trace xmlns:t="urn:example:trace">abc</t:Trace>
  </env:Header>
  <env:Body>
    <m:GetPrice xmlns:m="urn:example:stock"><m:Item>Pear</m:Item></m:GetPrice>
  </env:Body>
</env:Envelope>"#
}

fn outbound_config(actions: Vec<Action>) -> WssConfig {
    let mut config = WssConfig::default();
    config.outbound.actions = actions;
    config.outbound.token_user = Some("alice".to_string());
    config.outbound.certificate_alias = Some("server".to_string());
    config
}

fn secure(config: WssConfig, xml: &str) -> Vec<u8> {
    let outbound = WssOutbound::new(config, credentials()).unwrap();
    outbound.secure_document_at(xml.as_bytes(), now()).unwrap()
}

fn inbound() -> WssInbound {
    WssInbound::new(WssConfig::default(), credentials()).unwrap()
}

fn names(events: &[SecurityEvent]) -> Vec<&'static str> {
    events.iter().map(SecurityEvent::name).collect()
}

fn count(events: &[SecurityEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

/// Hand-written UsernameToken request with a known PasswordDigest.
fn digest_request(password_digest: &str) -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"
                   xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"
                   soap:mustUnderstand="1">
      <wsse:UsernameToken wsu:Id="UsernameToken-1">
        <wsse:Username>transmitter</wsse:Username>
        <wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</wsse:Password>
        <wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">Ex2YESUvsa1qne1m6TM8XA==</wsse:Nonce>
        <wsu:Created>2011-05-21T17:14:42.545Z</wsu:Created>
      </wsse:UsernameToken>
    </wsse:Security>
  </soap:Header>
  <soap:Body>
    <m:Ping xmlns:m="urn:example:ping"/>
  </soap:Body>
</soap:Envelope>"#,
        password_digest
    )
}

/// Salted UsernameToken without a password.
fn salted_request(iteration: u32) -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"
                   xmlns:wsse11="http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd">
      <wsse:UsernameToken>
        <wsse:Username>alice</wsse:Username>
        <wsse11:Salt>AbCdEfGhIjKlMnOpQrStUvWx</wsse11:Salt>
        <wsse11:Iteration>{}</wsse11:Iteration>
      </wsse:UsernameToken>
    </wsse:Security>
  </soap:Header>
  <soap:Body><m:Ping xmlns:m="urn:example:ping"/></soap:Body>
</soap:Envelope>"#,
        iteration
    )
}

/// The first complete `open ... close` element in `xml`.
fn element_text<'a>(xml: &'a str, open: &str, close: &str) -> &'a str {
    let start = xml.find(open).unwrap();
    let end = start + xml[start..].find(close).unwrap() + close.len();
    &xml[start..end]
}

/// Value of the first `attr="kind-..."` in `xml`.
fn id_of(xml: &str, attr: &str, kind: &str) -> String {
    let needle = format!(r#"{}="{}-"#, attr, kind);
    let start = xml.find(&needle).unwrap() + attr.len() + 2;
    let end = start + xml[start..].find('"').unwrap();
    xml[start..end].to_string()
}

/// Signature over `#target` whose key token is never declared.
fn signature_awaiting_key(target: &str) -> String {
    format!(
        r##"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" Id="Signature-late"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="{c14n}"/><ds:SignatureMethod Algorithm="{method}"/><ds:Reference URI="#{target}"><ds:Transforms><ds:Transform Algorithm="{c14n}"/></ds:Transforms><ds:DigestMethod Algorithm="{digest}"/><ds:DigestValue>AAAA</ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue>AAAA</ds:SignatureValue><ds:KeyInfo><wsse:SecurityTokenReference><wsse:Reference URI="#Later-1"/></wsse:SecurityTokenReference></ds:KeyInfo></ds:Signature>"##,
        c14n = zentinel_wss::ns::alg::EXC_C14N,
        method = zentinel_wss::ns::alg::HMAC_SHA256,
        digest = zentinel_wss::ns::alg::SHA256,
        target = target
    )
}

fn shared_key_signature(parts: Vec<SignaturePart>) -> String {
    let mut actions = vec![Action::Signature];
    if parts.contains(&SignaturePart::Timestamp) {
        actions.insert(0, Action::Timestamp);
    }
    let mut config = outbound_config(actions);
    config.outbound.signature.key = SignatureKey::KeyName {
        alias: "shared".to_string(),
    };
    config.outbound.signature.parts = parts;
    String::from_utf8(secure(config, plain_soap_11())).unwrap()
}

fn encrypted_username_token() -> String {
    let mut config = outbound_config(vec![Action::UsernameToken, Action::Encrypt]);
    config.outbound.encryption.key = EncryptionKey::EncryptedKey {
        kek_alias: "kek".to_string(),
    };
    config.outbound.encryption.parts = vec![EncryptionPart::UsernameToken];
    String::from_utf8(secure(config, plain_soap_11())).unwrap()
}

fn digest_processor() -> WssInbound {
    let creds = StaticCredentials::new().with_password("transmitter", "default");
    WssInbound::new(WssConfig::default(), Arc::new(creds)).unwrap()
}

fn digest_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2011, 5, 21, 17, 14, 50).unwrap()
}

// ============================================================================
// UsernameToken
// ============================================================================

#[test]
fn test_password_digest_known_vector() {
    let xml = digest_request("HJuU+E+LKyZyC7k1BX7GF7kyACY=");
    let processed = digest_processor()
        .process_document_at(xml.as_bytes(), digest_time())
        .unwrap();

    assert_eq!(
        names(&processed.events),
        vec!["username_token_validated", "document_verified"]
    );
    match &processed.events[0] {
        SecurityEvent::UsernameTokenValidated {
            id,
            username,
            password_type,
        } => {
            assert_eq!(id.as_deref(), Some("UsernameToken-1"));
            assert_eq!(username, "transmitter");
            assert_eq!(*password_type, PasswordType::PasswordDigest);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_password_digest_mismatch() {
    let xml = digest_request("AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
    let result = digest_processor().process_document_at(xml.as_bytes(), digest_time());
    assert!(matches!(result, Err(WssError::AuthenticationFailed(_))));
}

#[test]
fn test_nonce_replay_rejected() {
    let processor = digest_processor();
    let xml = digest_request("HJuU+E+LKyZyC7k1BX7GF7kyACY=");

    assert!(processor
        .process_document_at(xml.as_bytes(), digest_time())
        .is_ok());
    let replay = processor.process_document_at(xml.as_bytes(), digest_time());
    assert!(matches!(replay, Err(WssError::Replayed(_))));

    let stats = processor.stats();
    assert_eq!(stats.verified, 1);
    assert_eq!(stats.rejected, 1);
}

#[test]
fn test_nonce_cache_shared_between_processors() {
    let cache = Arc::new(NonceCache::new(Duration::minutes(5), Duration::minutes(5)));
    let first = digest_processor().with_nonce_cache(cache.clone());
    let second = digest_processor().with_nonce_cache(cache);
    let xml = digest_request("HJuU+E+LKyZyC7k1BX7GF7kyACY=");

    assert!(first.process_document_at(xml.as_bytes(), digest_time()).is_ok());
    let replay = second.process_document_at(xml.as_bytes(), digest_time());
    assert!(matches!(replay, Err(WssError::Replayed(_))));
}

#[test]
fn test_stale_username_token() {
    let xml = digest_request("HJuU+E+LKyZyC7k1BX7GF7kyACY=");
    let later = digest_time() + Duration::hours(1);
    let result = digest_processor().process_document_at(xml.as_bytes(), later);
    assert!(matches!(result, Err(WssError::Stale(_))));
}

#[test]
fn test_username_token_round_trip() {
    for password_type in [
        PasswordType::PasswordText,
        PasswordType::PasswordDigest,
        PasswordType::PasswordNone,
    ] {
        let mut config = outbound_config(vec![Action::UsernameToken]);
        config.outbound.password_type = password_type;
        let secured = secure(config, plain_soap_11());

        let processed = inbound().process_document_at(&secured, now()).unwrap();
        assert_eq!(count(&processed.events, "username_token_validated"), 1);
        assert!(processed.events.iter().any(|e| matches!(
            e,
            SecurityEvent::UsernameTokenValidated { username, password_type: t, .. }
                if username == "alice" && *t == password_type
        )));
    }
}

#[test]
fn test_password_type_not_allowed() {
    let secured = secure(
        {
            let mut config = outbound_config(vec![Action::UsernameToken]);
            config.outbound.password_type = PasswordType::PasswordText;
            config
        },
        plain_soap_11(),
    );

    let mut config = WssConfig::default();
    config.inbound.allowed_password_types = vec![PasswordType::PasswordDigest];
    let processor = WssInbound::new(config, credentials()).unwrap();
    let result = processor.process_document_at(&secured, now());
    assert!(matches!(result, Err(WssError::AuthenticationFailed(_))));
}

#[test]
fn test_salted_token_iteration_limit() {
    let start = std::time::Instant::now();
    let result = inbound().process_document_at(salted_request(20_000_000).as_bytes(), now());
    assert!(matches!(result, Err(WssError::InvalidSecurityToken(_))));
    assert!(start.elapsed() < std::time::Duration::from_secs(1));

    let result = inbound().process_document_at(salted_request(999).as_bytes(), now());
    assert!(matches!(result, Err(WssError::InvalidSecurityToken(_))));
}

#[test]
fn test_salted_token_without_password() {
    let result = inbound().process_document_at(salted_request(1000).as_bytes(), now());
    assert!(matches!(result, Err(WssError::AuthenticationFailed(_))));
}

// ============================================================================
// Signatures
// ============================================================================

#[test]
fn test_username_token_key_signature() {
    let mut config = outbound_config(vec![
        Action::UsernameToken,
        Action::Timestamp,
        Action::Signature,
    ]);
    config.outbound.signature.key = SignatureKey::UsernameToken { iterations: 1000 };
    config.outbound.signature.parts = vec![SignaturePart::Body, SignaturePart::Timestamp];
    let secured = secure(config, plain_soap_11());

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    let events = &processed.events;
    assert_eq!(count(events, "username_token_validated"), 1);
    assert_eq!(count(events, "timestamp_validated"), 1);
    assert_eq!(count(events, "signature_verified"), 1);
    assert_eq!(count(events, "signed_element"), 2);
    assert_eq!(
        events.last(),
        Some(&SecurityEvent::DocumentVerified {
            tokens: 2,
            signatures: 1,
            decrypted: 0,
        })
    );

    // The signature is declared before its key, so it is only verified
    // after the UsernameToken has been validated.
    let token = events
        .iter()
        .position(|e| e.name() == "username_token_validated")
        .unwrap();
    let signature = events
        .iter()
        .position(|e| e.name() == "signature_verified")
        .unwrap();
    assert!(token < signature);
    let first_signed = events
        .iter()
        .position(|e| e.name() == "signed_element")
        .unwrap();
    assert!(signature < first_signed);
}

#[test]
fn test_signed_elements_name_their_targets() {
    let mut config = outbound_config(vec![Action::Timestamp, Action::Signature]);
    config.outbound.signature.key = SignatureKey::KeyName {
        alias: "shared".to_string(),
    };
    config.outbound.signature.parts = vec![SignaturePart::Timestamp, SignaturePart::Body];
    let secured = secure(config, plain_soap_11());

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    let signed: Vec<&str> = processed
        .events
        .iter()
        .filter_map(|e| match e {
            SecurityEvent::SignedElement { element, .. } => Some(element.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        signed,
        vec![
            "{http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd}Timestamp",
            "{http://schemas.xmlsoap.org/soap/envelope/}Body",
        ]
    );
}

#[test]
fn test_derived_key_signature() {
    let mut config = outbound_config(vec![Action::Timestamp, Action::Signature]);
    config.outbound.signature.key = SignatureKey::DerivedKey {
        kek_alias: "kek".to_string(),
    };
    config.outbound.signature.parts = vec![SignaturePart::Timestamp, SignaturePart::Body];
    let secured = secure(config, plain_soap_11());

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    let events = &processed.events;
    assert_eq!(count(events, "encrypted_key_resolved"), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SecurityEvent::DerivedKeyTokenParsed { length: 32, .. }
    )));
    assert_eq!(count(events, "signature_verified"), 1);
    assert_eq!(count(events, "signed_element"), 2);
}

#[test]
fn test_derived_key_window_rejected() {
    let mut config = outbound_config(vec![Action::Signature]);
    config.outbound.signature.key = SignatureKey::DerivedKey {
        kek_alias: "kek".to_string(),
    };
    let secured = String::from_utf8(secure(config, plain_soap_11())).unwrap();
    assert!(secured.contains("<wsc:Length>32</wsc:Length>"));

    for window in [
        "<wsc:Offset>18446744073709551600</wsc:Offset>",
        "<wsc:Offset>1000000</wsc:Offset>",
        "<wsc:Generation>576460752303423488</wsc:Generation>",
    ] {
        let hostile = secured.replace(
            "<wsc:Length>32</wsc:Length>",
            &format!("{}<wsc:Length>32</wsc:Length>", window),
        );
        let result = inbound().process_document_at(hostile.as_bytes(), now());
        assert!(
            matches!(result, Err(WssError::InvalidSecurityToken(_))),
            "{} gave {:?}",
            window,
            result.map(|p| p.events)
        );
    }
}

#[test]
fn test_encrypted_key_signature() {
    let mut config = outbound_config(vec![Action::Signature]);
    config.outbound.signature.key = SignatureKey::EncryptedKey {
        kek_alias: "kek".to_string(),
    };
    let secured = secure(config, plain_soap_11());

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    assert_eq!(count(&processed.events, "encrypted_key_resolved"), 1);
    assert_eq!(count(&processed.events, "signature_verified"), 1);
}

#[test]
fn test_tampered_body_fails_signature() {
    let mut config = outbound_config(vec![Action::Signature]);
    config.outbound.signature.key = SignatureKey::KeyName {
        alias: "shared".to_string(),
    };
    let secured = String::from_utf8(secure(config, plain_soap_11())).unwrap();
    assert!(secured.contains("Apple"));
    let tampered = secured.replace("Apple", "Pear");

    let result = inbound().process_document_at(tampered.as_bytes(), now());
    assert!(matches!(result, Err(WssError::SignatureInvalid(_))));
}

#[test]
fn test_signature_with_unknown_key() {
    let mut config = outbound_config(vec![Action::Signature]);
    config.outbound.signature.key = SignatureKey::KeyName {
        alias: "shared".to_string(),
    };
    let secured = secure(config, plain_soap_11());

    let processor = WssInbound::new(
        WssConfig::default(),
        Arc::new(StaticCredentials::new().with_key("other", SHARED.to_vec())),
    )
    .unwrap();
    assert!(processor.process_document_at(&secured, now()).is_err());
}

#[test]
fn test_disallowed_signature_algorithm() {
    let mut config = outbound_config(vec![Action::Signature]);
    config.outbound.signature.key = SignatureKey::KeyName {
        alias: "shared".to_string(),
    };
    config.outbound.signature.algorithm = zentinel_wss::ns::alg::HMAC_SHA1.to_string();
    let secured = secure(config, plain_soap_11());

    let mut inbound_config = WssConfig::default();
    inbound_config
        .algorithms
        .allowed
        .retain(|a| a != zentinel_wss::ns::alg::HMAC_SHA1);
    let processor = WssInbound::new(inbound_config, credentials()).unwrap();
    let result = processor.process_document_at(&secured, now());
    assert!(matches!(result, Err(WssError::UnsupportedAlgorithm(_))));
}

// ============================================================================
// Encryption
// ============================================================================

#[test]
fn test_encrypted_body_round_trip() {
    let mut config = outbound_config(vec![Action::Encrypt]);
    config.outbound.encryption.key = EncryptionKey::EncryptedKey {
        kek_alias: "kek".to_string(),
    };
    let secured = secure(config, plain_soap_11());
    let secured_text = String::from_utf8(secured.clone()).unwrap();
    assert!(!secured_text.contains("Apple"));
    assert!(secured_text.contains("EncryptedData"));

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.contains("<m:Item>Apple</m:Item>"));
    assert!(!xml.contains("<xenc:EncryptedData"));
    assert!(processed.events.iter().any(|e| matches!(
        e,
        SecurityEvent::ContentDecrypted {
            encryption_type: EncryptionType::Content,
            ..
        }
    )));
}

#[test]
fn test_key_name_encryption() {
    let mut config = outbound_config(vec![Action::Encrypt]);
    config.outbound.encryption.key = EncryptionKey::KeyName {
        alias: "shared".to_string(),
    };
    let secured = secure(config, plain_soap_11());

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    assert_eq!(count(&processed.events, "content_decrypted"), 1);
    assert_eq!(count(&processed.events, "encrypted_key_resolved"), 0);
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.contains("Apple"));
}

#[test]
fn test_encrypt_then_sign() {
    let mut config = outbound_config(vec![Action::Encrypt, Action::Signature]);
    config.outbound.encryption.key = EncryptionKey::EncryptedKey {
        kek_alias: "kek".to_string(),
    };
    config.outbound.signature.key = SignatureKey::KeyName {
        alias: "shared".to_string(),
    };
    let secured = secure(config, plain_soap_11());

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    assert_eq!(count(&processed.events, "signature_verified"), 1);
    assert_eq!(count(&processed.events, "content_decrypted"), 1);
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.contains("<m:Item>Apple</m:Item>"));
}

#[test]
fn test_sign_then_encrypt() {
    let mut config = outbound_config(vec![Action::Signature, Action::Encrypt]);
    config.outbound.encryption.key = EncryptionKey::EncryptedKey {
        kek_alias: "kek".to_string(),
    };
    config.outbound.signature.key = SignatureKey::KeyName {
        alias: "shared".to_string(),
    };
    let secured = secure(config, plain_soap_11());

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    assert_eq!(count(&processed.events, "signature_verified"), 1);
    assert_eq!(count(&processed.events, "signed_element"), 1);
    assert_eq!(
        processed.events.last(),
        Some(&SecurityEvent::DocumentVerified {
            tokens: 1,
            signatures: 1,
            decrypted: 1,
        })
    );
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.contains("<m:Item>Apple</m:Item>"));
}

#[test]
fn test_encrypted_username_token() {
    let mut config = outbound_config(vec![Action::UsernameToken, Action::Encrypt]);
    config.outbound.encryption.key = EncryptionKey::EncryptedKey {
        kek_alias: "kek".to_string(),
    };
    config.outbound.encryption.parts = vec![EncryptionPart::UsernameToken];
    let secured = secure(config, plain_soap_11());
    assert!(!String::from_utf8(secured.clone()).unwrap().contains("alice"));

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    assert!(processed.events.iter().any(|e| matches!(
        e,
        SecurityEvent::ContentDecrypted {
            encryption_type: EncryptionType::Element,
            ..
        }
    )));
    assert_eq!(count(&processed.events, "username_token_validated"), 1);
}

#[test]
fn test_wrong_key_encryption_key() {
    let mut config = outbound_config(vec![Action::Encrypt]);
    config.outbound.encryption.key = EncryptionKey::EncryptedKey {
        kek_alias: "kek".to_string(),
    };
    let secured = secure(config, plain_soap_11());

    let processor = WssInbound::new(
        WssConfig::default(),
        Arc::new(StaticCredentials::new().with_key("kek", SHARED.to_vec())),
    )
    .unwrap();
    let result = processor.process_document_at(&secured, now());
    assert!(matches!(result, Err(WssError::DecryptionFailed(_))));
}

// ============================================================================
// Tokens and header structure
// ============================================================================

#[test]
fn test_binary_security_token_round_trip() {
    let secured = secure(
        outbound_config(vec![Action::BinarySecurityToken]),
        plain_soap_11(),
    );
    let processed = inbound().process_document_at(&secured, now()).unwrap();
    assert!(processed.events.iter().any(|e| matches!(
        e,
        SecurityEvent::BinarySecurityTokenValidated { thumbprint, .. }
            if *thumbprint == sha1_thumbprint(CERTIFICATE)
    )));
}

#[test]
fn test_untrusted_certificate() {
    let secured = secure(
        outbound_config(vec![Action::BinarySecurityToken]),
        plain_soap_11(),
    );
    let processor = WssInbound::new(
        WssConfig::default(),
        Arc::new(StaticCredentials::new().with_certificate("other", b"other".to_vec())),
    )
    .unwrap();
    let result = processor.process_document_at(&secured, now());
    assert!(matches!(result, Err(WssError::AuthenticationFailed(_))));
}

#[test]
fn test_missing_security_header() {
    let result = inbound().process_document_at(plain_soap_11().as_bytes(), now());
    assert!(matches!(result, Err(WssError::InvalidSecurity(_))));
}

#[test]
fn test_security_header_optional() {
    let mut config = WssConfig::default();
    config.inbound.require_security_header = false;
    let processor = WssInbound::new(config, credentials()).unwrap();

    let processed = processor
        .process_document_at(plain_soap_11().as_bytes(), now())
        .unwrap();
    assert_eq!(names(&processed.events), vec!["document_verified"]);
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.contains("<m:Item>Apple</m:Item>"));
}

#[test]
fn test_required_timestamp_missing() {
    let secured = secure(outbound_config(vec![Action::UsernameToken]), plain_soap_11());

    let mut config = WssConfig::default();
    config.inbound.require_timestamp = true;
    let processor = WssInbound::new(config, credentials()).unwrap();
    let result = processor.process_document_at(&secured, now());
    assert!(matches!(result, Err(WssError::InvalidSecurity(_))));
}

#[test]
fn test_header_for_other_actor_ignored() {
    let mut out = outbound_config(vec![Action::UsernameToken]);
    out.settings.actor = Some("urn:example:gateway".to_string());
    let secured = secure(out, plain_soap_11());

    // Default receiver: the only header targets someone else
    let result = inbound().process_document_at(&secured, now());
    assert!(matches!(result, Err(WssError::InvalidSecurity(_))));

    let mut config = WssConfig::default();
    config.settings.actor = Some("urn:example:gateway".to_string());
    let gateway = WssInbound::new(config, credentials()).unwrap();
    let processed = gateway.process_document_at(&secured, now()).unwrap();
    assert_eq!(count(&processed.events, "username_token_validated"), 1);
}

fn must_understand_request() -> &'static str {
    r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
      <x:Custom xmlns:x="urn:example:custom" soap:mustUnderstand="1">opaque</x:Custom>
    </wsse:Security>
  </soap:Header>
  <soap:Body><m:Ping xmlns:m="urn:example:ping"/></soap:Body>
</soap:Envelope>"#
}

#[test]
fn test_unknown_mandatory_child_strict() {
    let result = inbound().process_document_at(must_understand_request().as_bytes(), now());
    assert!(matches!(result, Err(WssError::UnsupportedElement(_))));
}

#[test]
fn test_unknown_mandatory_child_lenient() {
    let mut config = WssConfig::default();
    config.settings.strict = false;
    let processor = WssInbound::new(config, credentials()).unwrap();

    let processed = processor
        .process_document_at(must_understand_request().as_bytes(), now())
        .unwrap();
    assert_eq!(names(&processed.events), vec!["document_verified"]);
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.contains("opaque"));
}

#[test]
fn test_doctype_rejected() {
    let xml = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body><m:Ping xmlns:m="urn:example:ping">&xxe;</m:Ping></soap:Body>
</soap:Envelope>"#;
    let result = inbound().process_document_at(xml.as_bytes(), now());
    assert!(matches!(result, Err(WssError::MalformedXml(_))));
}

#[test]
fn test_not_a_soap_envelope() {
    let result = inbound().process_document_at(b"<root><child/></root>", now());
    assert!(matches!(result, Err(WssError::MalformedXml(_))));
}

// ============================================================================
// Reference resolution
// ============================================================================

#[test]
fn test_missing_reference_target() {
    let secured = shared_key_signature(vec![SignaturePart::Body]);
    let body_id = id_of(&secured, "wsu:Id", "Body");
    let renamed = secured.replace(&format!(r#"wsu:Id="{}""#, body_id), r#"wsu:Id="Elsewhere-1""#);

    let error = inbound()
        .process_document_at(renamed.as_bytes(), now())
        .unwrap_err();
    match &error {
        WssError::UnresolvedReference(message) => assert!(message.contains(&body_id)),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(error.fault_code(), FaultCode::InvalidSecurity);
}

#[test]
fn test_duplicate_reference_id() {
    let secured = shared_key_signature(vec![SignaturePart::Body]);
    let body_id = id_of(&secured, "wsu:Id", "Body");
    let decoy = format!(
        r#"</soap:Body><x:Decoy xmlns:x="urn:example:decoy" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd" wsu:Id="{}"/>"#,
        body_id
    );
    let doubled = secured.replace("</soap:Body>", &decoy);

    match inbound().process_document_at(doubled.as_bytes(), now()) {
        Err(WssError::UnresolvedReference(message)) => {
            assert!(message.contains("matches 2 elements"), "{}", message)
        }
        other => panic!("unexpected result {:?}", other.map(|p| p.events)),
    }
}

#[test]
fn test_signature_before_its_header_target() {
    let secured = shared_key_signature(vec![SignaturePart::Timestamp]);
    assert!(secured.find("<ds:Signature").unwrap() < secured.find("<wsu:Timestamp").unwrap());

    let processed = inbound()
        .process_document_at(secured.as_bytes(), now())
        .unwrap();
    assert_eq!(
        names(&processed.events),
        vec![
            "signature_verified",
            "signed_element",
            "timestamp_validated",
            "document_verified"
        ]
    );
}

#[test]
fn test_encrypted_key_after_encrypted_data() {
    let secured = encrypted_username_token();
    let key = element_text(&secured, "<xenc:EncryptedKey", "</xenc:EncryptedKey>").to_string();
    let reordered = secured.replace(&key, "").replace(
        "</xenc:EncryptedData>",
        &format!("</xenc:EncryptedData>{}", key),
    );
    assert!(reordered.find("<xenc:EncryptedData").unwrap() < reordered.find("<xenc:EncryptedKey").unwrap());

    let processed = inbound()
        .process_document_at(reordered.as_bytes(), now())
        .unwrap();
    assert_eq!(
        names(&processed.events),
        vec![
            "encrypted_key_resolved",
            "content_decrypted",
            "username_token_validated",
            "document_verified"
        ]
    );

    // The decrypted token keeps its place ahead of the key
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.find("alice").unwrap() < xml.find("<xenc:EncryptedKey").unwrap());
    assert!(!xml.contains("<xenc:EncryptedData"));
}

#[test]
fn test_signature_over_late_keyed_encrypted_data() {
    let secured = encrypted_username_token();
    let key = element_text(&secured, "<xenc:EncryptedKey", "</xenc:EncryptedKey>").to_string();
    let data_id = id_of(&secured, "Id", "EncryptedData");
    let reordered = secured.replace(&key, "").replace(
        "</xenc:EncryptedData>",
        &format!("</xenc:EncryptedData>{}{}", key, signature_awaiting_key(&data_id)),
    );

    match inbound().process_document_at(reordered.as_bytes(), now()) {
        Err(WssError::UnresolvedReference(message)) => {
            assert!(message.contains(&data_id), "{}", message);
            assert!(message.contains("declared later"), "{}", message);
        }
        other => panic!("unexpected result {:?}", other.map(|p| p.events)),
    }
}

#[test]
fn test_tampered_body_leaves_other_references_verified() {
    let secured = shared_key_signature(vec![SignaturePart::Timestamp, SignaturePart::Body]);
    let tampered = secured.replace("Apple", "Pear");

    let processor = inbound();
    let mut pass = processor.pass(tampered.as_bytes(), now());
    let mut failure = None;
    for event in pass.by_ref() {
        if let Err(e) = event {
            failure = Some(e);
        }
    }
    assert!(matches!(failure, Some(WssError::SignatureInvalid(_))));

    // The Timestamp reference was digested and reported before the Body failed
    let timestamp_signed = pass.events().iter().any(|e| matches!(
        e,
        SecurityEvent::SignedElement { element, .. } if element.ends_with("}Timestamp")
    ));
    assert!(timestamp_signed);
    assert_eq!(count(pass.events(), "timestamp_validated"), 1);
    assert_eq!(count(pass.events(), "document_verified"), 0);

    // The pass reports the failure it stopped on
    let error = pass.finish().unwrap_err();
    assert!(matches!(error, WssError::SignatureInvalid(_)));
    assert_eq!(error.fault_code(), FaultCode::FailedCheck);
    assert_eq!(processor.stats().rejected, 1);
}

// ============================================================================
// Event bus and streaming
// ============================================================================

#[test]
fn test_listener_can_reject() {
    let processor = inbound().with_listener(Arc::new(|event: &SecurityEvent| match event {
        SecurityEvent::UsernameTokenValidated { username, .. } if username == "alice" => {
            Err("alice is suspended".to_string())
        }
        _ => Ok(()),
    }));
    let secured = secure(outbound_config(vec![Action::UsernameToken]), plain_soap_11());

    let result = processor.process_document_at(&secured, now());
    assert!(matches!(result, Err(WssError::SecurityEventRejected(_))));
}

#[test]
fn test_streaming_pass() {
    let secured = secure(
        outbound_config(vec![Action::UsernameToken, Action::Timestamp]),
        plain_soap_11(),
    );
    let processor = inbound();
    let mut pass = processor.pass(secured.as_slice(), now());

    let mut elements = 0;
    for event in pass.by_ref() {
        if event.unwrap().as_start().is_some() {
            elements += 1;
        }
    }
    assert!(elements > 0);
    let events = pass.finish().unwrap();
    assert_eq!(
        names(&events),
        vec![
            "timestamp_validated",
            "username_token_validated",
            "document_verified"
        ]
    );
}

#[test]
fn test_soap_12_round_trip_keeps_existing_header() {
    let mut config = outbound_config(vec![Action::UsernameToken, Action::Signature]);
    config.outbound.signature.key = SignatureKey::UsernameToken { iterations: 1000 };
    let secured = secure(config, plain_soap_12());
    let secured_text = String::from_utf8(secured.clone()).unwrap();
    assert!(secured_text.contains("<t:Trace"));

    let processed = inbound().process_document_at(&secured, now()).unwrap();
    assert_eq!(count(&processed.events, "signature_verified"), 1);
    let xml = String::from_utf8(processed.xml).unwrap();
    assert!(xml.contains("abc"));
    assert!(xml.contains("<m:Item>Pear</m:Item>"));
}

// ============================================================================
// Configuration and faults
// ============================================================================

#[test]
fn test_yaml_configuration_round_trip() {
    let yaml = r#"
version: "1"
settings:
  strict: true
inbound:
  require_timestamp: true
outbound:
  token_user: alice
  actions:
    - username_token
    - timestamp
    - signature
  signature:
    key:
      source: username_token
      iterations: 2000
    parts:
      - timestamp
      - body
"#;
    let config: WssConfig = serde_yaml::from_str(yaml).unwrap();
    let secured = secure(config.clone(), plain_soap_11());

    let processor = WssInbound::new(config, credentials()).unwrap();
    let processed = processor.process_document_at(&secured, now()).unwrap();
    assert_eq!(count(&processed.events, "signed_element"), 2);
}

#[test]
fn test_invalid_outbound_configuration() {
    let mut config = WssConfig::default();
    config.outbound.actions = vec![Action::UsernameToken];
    config.outbound.token_user = None;
    assert!(matches!(
        WssOutbound::new(config, credentials()),
        Err(WssError::Config(_))
    ));
}

#[test]
fn test_fault_response_for_failure() {
    let xml = digest_request("AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
    let error = digest_processor()
        .process_document_at(xml.as_bytes(), digest_time())
        .unwrap_err();

    let fault = soap_fault_response(&error, Some(SoapVersion::Soap11));
    assert!(fault.contains("wsse:FailedAuthentication"));
    assert!(!fault.contains("transmitter"));

    let fault = soap_fault_response(&error, Some(SoapVersion::Soap12));
    assert!(fault.contains("http://www.w3.org/2003/05/soap-envelope"));
}

#[test]
fn test_events_serialize_as_json() {
    let secured = secure(outbound_config(vec![Action::Timestamp]), plain_soap_11());
    let processed = inbound().process_document_at(&secured, now()).unwrap();
    let json = serde_json::to_string(&processed.events[0]).unwrap();
    assert!(json.contains(r#""event":"timestamp_validated""#));
}
