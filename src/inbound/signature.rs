//! `ds:Signature` in the security header.

use crate::crypto::{self, AlgorithmSuite};
use crate::error::WssError;
use crate::event::XmlEvent;
use crate::ns::{self, alg, attr, node};
use crate::token::reference::local_id;
use crate::token::{base64_value, KeyReference};
use crate::tree::Element;
use tracing::{debug, warn};

/// One `ds:Reference` of a SignedInfo.
#[derive(Debug, Clone)]
pub struct SignedReference {
    /// Target element id (the URI without `#`)
    pub id: String,
    pub transforms: Vec<String>,
    pub digest_method: String,
    pub digest: Vec<u8>,
}

impl SignedReference {
    /// Canonicalization applied to the target before digesting.
    pub fn c14n_method(&self) -> &str {
        self.transforms
            .last()
            .map(String::as_str)
            .unwrap_or(alg::EXC_C14N)
    }
}

#[derive(Debug, Clone)]
pub struct SignatureElement {
    pub id: Option<String>,
    pub c14n_method: String,
    pub method: String,
    /// The SignedInfo subtree as received
    pub signed_info: Vec<XmlEvent>,
    pub references: Vec<SignedReference>,
    pub value: Vec<u8>,
    pub key: KeyReference,
}

fn algorithm_of(parent: &Element, local: &str) -> Result<String, WssError> {
    parent
        .child(ns::DSIG, local)
        .and_then(|m| m.attr(None, attr::ALGORITHM))
        .map(String::from)
        .ok_or_else(|| WssError::InvalidSecurity(format!("Signature without {}", local)))
}

impl SignatureElement {
    /// Parse from the completed Signature element and its events.
    pub fn parse(element: &Element, events: &[XmlEvent]) -> Result<Self, WssError> {
        let signed_info = element.child(ns::DSIG, node::SIGNED_INFO).ok_or_else(|| {
            WssError::InvalidSecurity("Signature without SignedInfo".to_string())
        })?;

        let mut references = Vec::new();
        for reference in signed_info.children_named(ns::DSIG, node::REFERENCE) {
            let uri = reference.attr(None, attr::URI).unwrap_or_default();
            let id = local_id(uri).ok_or_else(|| {
                WssError::UnresolvedReference(format!(
                    "only same-document references are supported, got '{}'",
                    uri
                ))
            })?;
            let transforms = reference
                .child(ns::DSIG, node::TRANSFORMS)
                .map(|t| {
                    t.children_named(ns::DSIG, node::TRANSFORM)
                        .map(|tr| tr.attr(None, attr::ALGORITHM).unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default();
            let digest = reference
                .child_text(ns::DSIG, node::DIGEST_VALUE)
                .ok_or_else(|| WssError::InvalidSecurity("Reference without DigestValue".to_string()))?;
            references.push(SignedReference {
                id: id.to_string(),
                transforms,
                digest_method: algorithm_of(reference, node::DIGEST_METHOD)?,
                digest: base64_value(&digest, "DigestValue")?,
            });
        }
        if references.is_empty() {
            return Err(WssError::InvalidSecurity(
                "SignedInfo carries no references".to_string(),
            ));
        }

        let value = element
            .child_text(ns::DSIG, node::SIGNATURE_VALUE)
            .ok_or_else(|| WssError::InvalidSecurity("Signature without SignatureValue".to_string()))?;
        let key_info = element.child(ns::DSIG, node::KEY_INFO).ok_or_else(|| {
            WssError::SecurityTokenUnavailable("Signature without KeyInfo".to_string())
        })?;

        Ok(Self {
            id: element.id().map(String::from),
            c14n_method: algorithm_of(signed_info, node::CANONICALIZATION_METHOD)?,
            method: algorithm_of(signed_info, node::SIGNATURE_METHOD)?,
            signed_info: signed_info.events(events).to_vec(),
            references,
            value: base64_value(&value, "SignatureValue")?,
            key: KeyReference::from_key_info(key_info)?,
        })
    }

    /// Every algorithm the signature names must be allowed.
    pub fn check_algorithms(&self, suite: &AlgorithmSuite) -> Result<(), WssError> {
        suite.check(&self.c14n_method)?;
        suite.check(&self.method)?;
        for reference in &self.references {
            suite.check(&reference.digest_method)?;
            for transform in &reference.transforms {
                if transform != alg::EXC_C14N {
                    return Err(WssError::UnsupportedAlgorithm(transform.clone()));
                }
                suite.check(transform)?;
            }
        }
        Ok(())
    }

    /// Check the SignatureValue over the canonical SignedInfo.
    pub fn verify_value(&self, suite: &AlgorithmSuite, key: &[u8]) -> Result<(), WssError> {
        let canonical = suite.canonicalize(&self.signed_info, &self.c14n_method)?;
        if let Err(e) = suite.verify(key, &canonical, &self.value, &self.method) {
            warn!(signature = ?self.id, "SignatureValue mismatch");
            return Err(e);
        }
        debug!(signature = ?self.id, references = self.references.len(), "SignatureValue verified");
        Ok(())
    }
}

/// Digest a reference target and compare with the transmitted value.
pub fn check_digest(
    suite: &AlgorithmSuite,
    reference: &SignedReference,
    target: &[XmlEvent],
) -> Result<(), WssError> {
    let canonical = suite.canonicalize(target, reference.c14n_method())?;
    let digest = suite.digest(&canonical, &reference.digest_method)?;
    if !crypto::constant_time_eq(&digest, &reference.digest) {
        warn!(reference = %reference.id, "Digest mismatch");
        return Err(WssError::SignatureInvalid(format!(
            "digest mismatch for #{}",
            reference.id
        )));
    }
    debug!(reference = %reference.id, "Reference digest verified");
    Ok(())
}
