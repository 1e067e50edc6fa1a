//! `wsu:Timestamp`.

use super::{parse_datetime, Token, ValidationContext};
use crate::error::WssError;
use crate::ns::{self, node};
use crate::security_event::SecurityEvent;
use crate::tree::Element;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Timestamp {
    pub id: Option<String>,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
}

impl Token for Timestamp {
    fn parse(element: &Element) -> Result<Self, WssError> {
        let created = element
            .child_text(ns::WSU, node::CREATED)
            .ok_or_else(|| {
                WssError::InvalidSecurityToken("Timestamp without Created".to_string())
            })?;
        let created = parse_datetime(&created, "timestamp")?;
        let expires = element
            .child_text(ns::WSU, node::EXPIRES)
            .map(|e| parse_datetime(&e, "expires timestamp"))
            .transpose()?;

        Ok(Self {
            id: element.id().map(String::from),
            created,
            expires,
        })
    }

    fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError> {
        if let Some(expires) = self.expires {
            if expires < self.created {
                return Err(WssError::InvalidSecurityToken(
                    "Timestamp expires before it was created".to_string(),
                ));
            }
        }

        let age = ctx.now.signed_duration_since(self.created);
        if age > ctx.config.freshness_window() {
            return Err(WssError::Stale(format!(
                "Timestamp is too old: {} seconds (max: {})",
                age.num_seconds(),
                ctx.config.freshness_window_secs
            )));
        }
        if age < -ctx.config.future_tolerance() {
            return Err(WssError::Stale("Timestamp is in the future".to_string()));
        }

        if let Some(expires) = self.expires {
            if expires <= ctx.now {
                return Err(WssError::Stale("Security timestamp has expired".to_string()));
            }
        }

        debug!(created = %self.created, "Timestamp validated");

        Ok(SecurityEvent::TimestampValidated {
            id: self.id.clone(),
            created: self.created,
            expires: self.expires,
        })
    }
}
