//! `xenc:EncryptedData` elements and in-place decryption.

use crate::crypto::AlgorithmSuite;
use crate::error::WssError;
use crate::event::{parse_fragment, NamespaceDecl, XmlEvent};
use crate::ns::{self, attr, node};
use crate::security_event::EncryptionType;
use crate::token::{base64_value, KeyReference};
use crate::tree::Element;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EncryptedDataElement {
    pub id: Option<String>,
    pub encryption_type: EncryptionType,
    pub algorithm: String,
    /// Key named by the element itself, if any
    pub key: Option<KeyReference>,
    cipher: Vec<u8>,
}

impl EncryptedDataElement {
    pub fn parse(element: &Element) -> Result<Self, WssError> {
        let encryption_type = match element.attr(None, attr::TYPE) {
            None | Some(ns::ENC_TYPE_ELEMENT) => EncryptionType::Element,
            Some(ns::ENC_TYPE_CONTENT) => EncryptionType::Content,
            Some(other) => {
                return Err(WssError::InvalidSecurity(format!(
                    "unsupported EncryptedData type '{}'",
                    other
                )))
            }
        };
        let algorithm = element
            .child(ns::XENC, node::ENCRYPTION_METHOD)
            .and_then(|m| m.attr(None, attr::ALGORITHM))
            .ok_or_else(|| {
                WssError::InvalidSecurity("EncryptedData without EncryptionMethod".to_string())
            })?;
        let key = element
            .child(ns::DSIG, node::KEY_INFO)
            .map(KeyReference::from_key_info)
            .transpose()?;
        let cipher_value = element
            .child(ns::XENC, node::CIPHER_DATA)
            .and_then(|c| c.child_text(ns::XENC, node::CIPHER_VALUE))
            .ok_or_else(|| {
                WssError::InvalidSecurity("EncryptedData without CipherValue".to_string())
            })?;

        Ok(Self {
            id: element.id().map(String::from),
            encryption_type,
            algorithm: algorithm.to_string(),
            key,
            cipher: base64_value(&cipher_value, "EncryptedData cipher value")?,
        })
    }

    /// Decrypt and parse the plaintext in the namespace scope it replaces.
    pub fn decrypt(
        &self,
        suite: &AlgorithmSuite,
        key: &[u8],
        in_scope: &[NamespaceDecl],
    ) -> Result<Vec<XmlEvent>, WssError> {
        let plaintext = suite.decrypt(key, &self.cipher, &self.algorithm)?;
        let events = parse_fragment(&plaintext, in_scope).map_err(|e| {
            WssError::DecryptionFailed(format!("decrypted content is not well-formed: {}", e))
        })?;

        if self.encryption_type == EncryptionType::Element && top_level_elements(&events) != 1 {
            return Err(WssError::DecryptionFailed(
                "decrypted element content is not a single element".to_string(),
            ));
        }
        debug!(id = ?self.id, events = events.len(), "EncryptedData decrypted");
        Ok(events)
    }
}

fn top_level_elements(events: &[XmlEvent]) -> usize {
    let mut depth = 0usize;
    let mut roots = 0;
    for event in events {
        match event {
            XmlEvent::StartElement(_) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            XmlEvent::EndElement(_) => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encode_base64;
    use crate::event::read_events;
    use crate::ns::alg;

    const KEY: [u8; 32] = [3u8; 32];

    fn encrypted(plaintext: &str, enc_type: &str) -> EncryptedDataElement {
        let cipher = AlgorithmSuite::default()
            .encrypt(&KEY, plaintext.as_bytes(), alg::AES256_GCM)
            .unwrap();
        let xml = format!(
            r#"<xenc:EncryptedData xmlns:xenc="{}" xmlns:ds="{}" Id="ED-1" Type="{}">
  <xenc:EncryptionMethod Algorithm="{}"/>
  <ds:KeyInfo><ds:KeyName>shared</ds:KeyName></ds:KeyInfo>
  <xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData>
</xenc:EncryptedData>"#,
            ns::XENC,
            ns::DSIG,
            enc_type,
            alg::AES256_GCM,
            encode_base64(&cipher)
        );
        let element = Element::build(&read_events(xml.as_bytes()).unwrap()).unwrap();
        EncryptedDataElement::parse(&element).unwrap()
    }

    #[test]
    fn test_decrypt_content_in_scope() {
        let ed = encrypted("<m:Price>12</m:Price> ", ns::ENC_TYPE_CONTENT);
        assert_eq!(ed.encryption_type, EncryptionType::Content);
        assert_eq!(ed.key, Some(KeyReference::KeyName("shared".to_string())));

        let scope = vec![NamespaceDecl {
            prefix: Some("m".to_string()),
            uri: "urn:stock".to_string(),
        }];
        let events = ed
            .decrypt(&AlgorithmSuite::default(), &KEY, &scope)
            .unwrap();
        assert_eq!(events.len(), 4);
        assert!(events[0].is_start("urn:stock", "Price"));
    }

    #[test]
    fn test_element_type_requires_single_root() {
        let ed = encrypted("<a/><b/>", ns::ENC_TYPE_ELEMENT);
        assert!(matches!(
            ed.decrypt(&AlgorithmSuite::default(), &KEY, &[]),
            Err(WssError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_wrong_key() {
        let ed = encrypted("<a/>", ns::ENC_TYPE_ELEMENT);
        assert!(matches!(
            ed.decrypt(&AlgorithmSuite::default(), &[4u8; 32], &[]),
            Err(WssError::DecryptionFailed(_))
        ));
    }
}
