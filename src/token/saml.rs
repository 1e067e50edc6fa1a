//! SAML 1.1 and 2.0 assertions carried in the security header.
//!
//! Only the assertion envelope is checked here: issuer presence and the
//! validity window of `Conditions`. Trust in the issuer is a policy
//! decision left to event listeners.

use super::{parse_datetime, Token, ValidationContext};
use crate::error::WssError;
use crate::ns::{self, attr, node};
use crate::security_event::{SamlVersion, SecurityEvent};
use crate::tree::Element;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SamlAssertion {
    pub id: Option<String>,
    pub version: SamlVersion,
    pub issuer: String,
    pub subject: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl SamlAssertion {
    fn namespace(version: SamlVersion) -> &'static str {
        match version {
            SamlVersion::V1_1 => ns::SAML1,
            SamlVersion::V2_0 => ns::SAML2,
        }
    }
}

impl Token for SamlAssertion {
    fn parse(element: &Element) -> Result<Self, WssError> {
        let version = if element.is(ns::SAML2, node::ASSERTION) {
            SamlVersion::V2_0
        } else if element.is(ns::SAML1, node::ASSERTION) {
            SamlVersion::V1_1
        } else {
            return Err(WssError::InvalidSecurityToken(format!(
                "not a SAML assertion: {}",
                element.name().qualified()
            )));
        };
        let saml = Self::namespace(version);

        let (issuer, subject) = match version {
            SamlVersion::V2_0 => (
                element.child_text(saml, node::ISSUER).unwrap_or_default(),
                element
                    .child(saml, node::SUBJECT)
                    .and_then(|s| s.child_text(saml, node::NAME_ID)),
            ),
            SamlVersion::V1_1 => (
                element
                    .attr(None, attr::ISSUER)
                    .unwrap_or_default()
                    .to_string(),
                element
                    .descendant(saml, node::NAME_IDENTIFIER)
                    .map(|n| n.text()),
            ),
        };

        let conditions = element.child(saml, node::CONDITIONS);
        let window = |name: &str| {
            conditions
                .and_then(|c| c.attr(None, name))
                .map(|v| parse_datetime(v, "SAML condition"))
                .transpose()
        };

        Ok(Self {
            id: element.id().map(String::from),
            version,
            issuer,
            subject: subject.filter(|s| !s.is_empty()),
            not_before: window(attr::NOT_BEFORE)?,
            not_on_or_after: window(attr::NOT_ON_OR_AFTER)?,
        })
    }

    fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError> {
        if self.issuer.trim().is_empty() {
            return Err(WssError::InvalidSecurityToken(
                "SAML assertion without issuer".to_string(),
            ));
        }

        let tolerance = ctx.config.future_tolerance();
        if let Some(not_before) = self.not_before {
            if ctx.now + tolerance < not_before {
                return Err(WssError::Stale(format!(
                    "SAML assertion not valid before {}",
                    not_before
                )));
            }
        }
        if let Some(not_on_or_after) = self.not_on_or_after {
            if ctx.now - tolerance >= not_on_or_after {
                return Err(WssError::Stale(format!(
                    "SAML assertion expired at {}",
                    not_on_or_after
                )));
            }
        }

        debug!(issuer = %self.issuer, version = ?self.version, "SAML assertion validated");
        Ok(SecurityEvent::SamlAssertionValidated {
            id: self.id.clone(),
            version: self.version,
            issuer: self.issuer.clone(),
            subject: self.subject.clone(),
        })
    }
}
