//! `wsse:UsernameToken`.

use super::{base64_value, parse_datetime, Token, ValidationContext};
use crate::config::PasswordType;
use crate::credentials::CredentialLookup;
use crate::crypto;
use crate::error::WssError;
use crate::nonce::NonceStatus;
use crate::ns::{self, attr, node};
use crate::security_event::SecurityEvent;
use crate::tree::{Element, Node};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Iteration count used when a salt is sent without `wsse11:Iteration`.
const DEFAULT_ITERATIONS: u32 = crypto::MIN_USERNAME_TOKEN_ITERATIONS;

pub struct UsernameToken {
    pub id: Option<String>,
    pub username: String,
    pub password_type: PasswordType,
    /// Password or digest as transmitted
    password: Option<Zeroizing<String>>,
    pub nonce: Option<Vec<u8>>,
    pub created_text: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub salt: Option<Vec<u8>>,
    pub iterations: u32,
    derived_key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for UsernameToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernameToken")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_type", &self.password_type)
            .field("created", &self.created_text)
            .field("salted", &self.salt.is_some())
            .finish()
    }
}

impl UsernameToken {
    /// UsernameToken Profile 1.1 key, available after validation of a salted token.
    pub fn derived_key(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.derived_key.clone()
    }

    fn check_password(&self, ctx: &ValidationContext<'_>) -> Result<(), WssError> {
        let needs_password =
            self.password_type != PasswordType::PasswordNone || self.salt.is_some();
        if !needs_password {
            return Ok(());
        }

        // Key derivation needs a password
        if self.salt.is_some() && self.password.is_none() {
            warn!(username = %self.username, "Salted UsernameToken without password");
            return Err(WssError::AuthenticationFailed(format!(
                "salted UsernameToken for '{}' carries no password",
                self.username
            )));
        }

        let expected = ctx.credentials.password(&self.username).ok_or_else(|| {
            warn!(username = %self.username, "Unknown user");
            WssError::AuthenticationFailed(format!("unknown user '{}'", self.username))
        })?;

        let matches = match (&self.password_type, &self.password) {
            (PasswordType::PasswordNone, _) => true,
            (PasswordType::PasswordText, Some(sent)) => {
                crypto::constant_time_eq(sent.as_bytes(), expected.as_bytes())
            }
            (PasswordType::PasswordDigest, Some(sent)) => {
                let digest = crypto::password_digest(
                    self.nonce.as_deref().unwrap_or_default(),
                    self.created_text.as_deref().unwrap_or_default(),
                    &expected,
                );
                crypto::constant_time_eq(sent.trim().as_bytes(), digest.as_bytes())
            }
            (_, None) => false,
        };
        if !matches {
            warn!(username = %self.username, "Password mismatch");
            return Err(WssError::AuthenticationFailed(format!(
                "password mismatch for '{}'",
                self.username
            )));
        }
        Ok(())
    }

    fn check_freshness(&self, ctx: &ValidationContext<'_>) -> Result<(), WssError> {
        let (Some(created), Some(created_text)) = (self.created, &self.created_text) else {
            return Ok(());
        };

        match &self.nonce {
            Some(nonce) => match ctx.nonces.check_and_record(nonce, created_text, created, ctx.now)
            {
                NonceStatus::Fresh => Ok(()),
                NonceStatus::Replayed => Err(WssError::Replayed(format!(
                    "nonce reused by '{}'",
                    self.username
                ))),
                NonceStatus::Stale => Err(WssError::Stale(format!(
                    "UsernameToken created at {} is outside the freshness window",
                    created_text
                ))),
            },
            None => {
                let age = ctx.now.signed_duration_since(created);
                if age > ctx.config.freshness_window() || -age > ctx.config.future_tolerance() {
                    return Err(WssError::Stale(format!(
                        "UsernameToken created at {} is outside the freshness window",
                        created_text
                    )));
                }
                Ok(())
            }
        }
    }
}

impl Token for UsernameToken {
    fn parse(element: &Element) -> Result<Self, WssError> {
        let username = element
            .child_text(ns::WSSE, node::USERNAME)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                WssError::InvalidSecurityToken("UsernameToken without Username".to_string())
            })?;

        let (password_type, password) = match element.child(ns::WSSE, node::PASSWORD) {
            Some(p) => {
                let password_type = match p.attr(None, attr::TYPE) {
                    None | Some(ns::PASSWORD_TEXT) => PasswordType::PasswordText,
                    Some(ns::PASSWORD_DIGEST) => PasswordType::PasswordDigest,
                    Some(other) => {
                        return Err(WssError::InvalidSecurityToken(format!(
                            "unknown password type '{}'",
                            other
                        )))
                    }
                };
                // Text passwords are compared exactly as sent
                let mut raw = String::new();
                for child in &p.children {
                    if let Node::Text(t) = child {
                        raw.push_str(t);
                    }
                }
                (password_type, Some(Zeroizing::new(raw)))
            }
            None => (PasswordType::PasswordNone, None),
        };

        let nonce = element
            .child_text(ns::WSSE, node::NONCE)
            .map(|n| base64_value(&n, "Nonce"))
            .transpose()?;
        let created_text = element.child_text(ns::WSU, node::CREATED);
        let created = created_text
            .as_deref()
            .map(|c| parse_datetime(c, "Created"))
            .transpose()?;

        let salt = element
            .child_text(ns::WSSE11, node::SALT)
            .map(|s| base64_value(&s, "Salt"))
            .transpose()?;
        let iterations = match element.child_text(ns::WSSE11, node::ITERATION) {
            Some(text) => text.parse::<u32>().map_err(|_| {
                WssError::InvalidSecurityToken(format!("invalid Iteration '{}'", text))
            })?,
            None => DEFAULT_ITERATIONS,
        };
        if iterations < crypto::MIN_USERNAME_TOKEN_ITERATIONS {
            return Err(WssError::InvalidSecurityToken(format!(
                "Iteration {} is below {}",
                iterations,
                crypto::MIN_USERNAME_TOKEN_ITERATIONS
            )));
        }

        Ok(Self {
            id: element.id().map(String::from),
            username,
            password_type,
            password,
            nonce,
            created_text,
            created,
            salt,
            iterations,
            derived_key: None,
        })
    }

    fn validate(&mut self, ctx: &ValidationContext<'_>) -> Result<SecurityEvent, WssError> {
        if !ctx
            .config
            .allowed_password_types
            .contains(&self.password_type)
        {
            return Err(WssError::AuthenticationFailed(format!(
                "password type {:?} is not allowed",
                self.password_type
            )));
        }

        if self.salt.is_some() && self.iterations > ctx.config.max_username_token_iterations {
            return Err(WssError::InvalidSecurityToken(format!(
                "Iteration {} exceeds the configured maximum {}",
                self.iterations, ctx.config.max_username_token_iterations
            )));
        }

        self.check_password(ctx)?;
        self.check_freshness(ctx)?;

        if let Some(salt) = &self.salt {
            let password = ctx.credentials.password(&self.username).ok_or_else(|| {
                WssError::AuthenticationFailed(format!("unknown user '{}'", self.username))
            })?;
            self.derived_key = Some(crypto::derive_username_token_key(
                &password,
                salt,
                self.iterations,
            ));
        }

        debug!(
            username = %self.username,
            password_type = ?self.password_type,
            "UsernameToken validated"
        );

        Ok(SecurityEvent::UsernameTokenValidated {
            id: self.id.clone(),
            username: self.username.clone(),
            password_type: self.password_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::testing::{element, Fixture};

    fn digest_token(nonce: &str, created: &str, digest: &str) -> String {
        format!(
            r#"<wsse:UsernameToken xmlns:wsse="{}" xmlns:wsu="{}" wsu:Id="UsernameToken-1">
  <wsse:Username>alice</wsse:Username>
  <wsse:Password Type="{}">{}</wsse:Password>
  <wsse:Nonce EncodingType="{}">{}</wsse:Nonce>
  <wsu:Created>{}</wsu:Created>
</wsse:UsernameToken>"#,
            ns::WSSE,
            ns::WSU,
            ns::PASSWORD_DIGEST,
            digest,
            ns::BASE64_BINARY,
            nonce,
            created
        )
    }

    #[test]
    fn test_digest_password_fixed_vector() {
        let mut fixture = Fixture::new("2011-05-21T17:15:00Z");
        fixture.credentials = fixture.credentials.with_password("alice", "default");

        let xml = digest_token(
            "Ex2YESUvsa1qne1m6TM8XA==",
            "2011-05-21T17:14:42.545Z",
            "HJuU+E+LKyZyC7k1BX7GF7kyACY=",
        );
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        assert_eq!(token.password_type, PasswordType::PasswordDigest);
        let event = token.validate(&fixture.ctx()).unwrap();
        assert!(matches!(
            event,
            SecurityEvent::UsernameTokenValidated { ref username, .. } if username == "alice"
        ));
    }

    #[test]
    fn test_digest_wrong_password() {
        let fixture = Fixture::new("2011-05-21T17:15:00Z");
        // Digest was computed with "default", fixture knows "secret"
        let xml = digest_token(
            "Ex2YESUvsa1qne1m6TM8XA==",
            "2011-05-21T17:14:42.545Z",
            "HJuU+E+LKyZyC7k1BX7GF7kyACY=",
        );
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        assert!(matches!(
            token.validate(&fixture.ctx()),
            Err(WssError::AuthenticationFailed(_))
        ));
        // A failed password check does not consume the nonce
        assert!(fixture.nonces.is_empty());
    }

    #[test]
    fn test_nonce_replay() {
        let mut fixture = Fixture::new("2011-05-21T17:15:00Z");
        fixture.credentials = fixture.credentials.with_password("alice", "default");
        let xml = digest_token(
            "Ex2YESUvsa1qne1m6TM8XA==",
            "2011-05-21T17:14:42.545Z",
            "HJuU+E+LKyZyC7k1BX7GF7kyACY=",
        );

        let mut first = UsernameToken::parse(&element(&xml)).unwrap();
        assert!(first.validate(&fixture.ctx()).is_ok());
        let mut second = UsernameToken::parse(&element(&xml)).unwrap();
        let err = second.validate(&fixture.ctx()).unwrap_err();
        assert!(matches!(err, WssError::Replayed(_)));
        assert_eq!(
            err.fault_code().reason(),
            "The security token could not be authenticated or authorized"
        );
    }

    #[test]
    fn test_stale_created() {
        let mut fixture = Fixture::new("2011-05-21T18:00:00Z");
        fixture.credentials = fixture.credentials.with_password("alice", "default");
        let xml = digest_token(
            "Ex2YESUvsa1qne1m6TM8XA==",
            "2011-05-21T17:14:42.545Z",
            "HJuU+E+LKyZyC7k1BX7GF7kyACY=",
        );
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        assert!(matches!(
            token.validate(&fixture.ctx()),
            Err(WssError::Stale(_))
        ));
    }

    #[test]
    fn test_text_password() {
        let fixture = Fixture::new("2024-01-01T00:00:00Z");
        let xml = format!(
            r#"<wsse:UsernameToken xmlns:wsse="{}"><wsse:Username>alice</wsse:Username><wsse:Password Type="{}">secret</wsse:Password></wsse:UsernameToken>"#,
            ns::WSSE,
            ns::PASSWORD_TEXT
        );
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        assert!(token.validate(&fixture.ctx()).is_ok());

        let wrong = xml.replace(">secret<", ">Secret<");
        let mut token = UsernameToken::parse(&element(&wrong)).unwrap();
        assert!(matches!(
            token.validate(&fixture.ctx()),
            Err(WssError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_no_password_and_disallowed_type() {
        let mut fixture = Fixture::new("2024-01-01T00:00:00Z");
        let xml = format!(
            r#"<wsse:UsernameToken xmlns:wsse="{}"><wsse:Username>nobody</wsse:Username></wsse:UsernameToken>"#,
            ns::WSSE
        );
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        assert_eq!(token.password_type, PasswordType::PasswordNone);
        assert!(token.validate(&fixture.ctx()).is_ok());

        fixture.config.allowed_password_types = vec![PasswordType::PasswordDigest];
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        assert!(matches!(
            token.validate(&fixture.ctx()),
            Err(WssError::AuthenticationFailed(_))
        ));
    }

    fn salted_token(salt: &[u8], iteration: &str, password: &str) -> String {
        format!(
            r#"<wsse:UsernameToken xmlns:wsse="{}" xmlns:wsse11="{}"><wsse:Username>alice</wsse:Username>{}<wsse11:Salt>{}</wsse11:Salt>{}</wsse:UsernameToken>"#,
            ns::WSSE,
            ns::WSSE11,
            password,
            crypto::encode_base64(salt),
            iteration
        )
    }

    #[test]
    fn test_salted_token_derives_key() {
        let fixture = Fixture::new("2024-01-01T00:00:00Z");
        let salt = crypto::generate_salt(true);
        let xml = salted_token(
            &salt,
            "<wsse11:Iteration>1500</wsse11:Iteration>",
            "<wsse:Password>secret</wsse:Password>",
        );
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        token.validate(&fixture.ctx()).unwrap();
        let expected = crypto::derive_username_token_key("secret", &salt, 1500);
        assert_eq!(token.derived_key().unwrap().as_slice(), expected.as_slice());
    }

    #[test]
    fn test_salted_token_requires_password() {
        let fixture = Fixture::new("2024-01-01T00:00:00Z");
        let xml = salted_token(
            &crypto::generate_salt(true),
            "<wsse11:Iteration>1000</wsse11:Iteration>",
            "",
        );
        let mut token = UsernameToken::parse(&element(&xml)).unwrap();
        assert!(matches!(
            token.validate(&fixture.ctx()),
            Err(WssError::AuthenticationFailed(_))
        ));
        assert!(token.derived_key().is_none());
    }

    #[test]
    fn test_iteration_bounds() {
        let salt = crypto::generate_salt(true);
        let password = "<wsse:Password>secret</wsse:Password>";

        let too_few = salted_token(&salt, "<wsse11:Iteration>999</wsse11:Iteration>", password);
        assert!(matches!(
            UsernameToken::parse(&element(&too_few)),
            Err(WssError::InvalidSecurityToken(_))
        ));

        let mut fixture = Fixture::new("2024-01-01T00:00:00Z");
        fixture.config.max_username_token_iterations = 2000;
        let too_many = salted_token(&salt, "<wsse11:Iteration>20000000</wsse11:Iteration>", password);
        let mut token = UsernameToken::parse(&element(&too_many)).unwrap();
        assert!(matches!(
            token.validate(&fixture.ctx()),
            Err(WssError::InvalidSecurityToken(_))
        ));
        assert!(token.derived_key().is_none());

        let default_count = salted_token(&salt, "", password);
        let mut token = UsernameToken::parse(&element(&default_count)).unwrap();
        assert_eq!(token.iterations, crypto::MIN_USERNAME_TOKEN_ITERATIONS);
        assert!(token.validate(&fixture.ctx()).is_ok());
    }

    #[test]
    fn test_missing_username() {
        let xml = format!(
            r#"<wsse:UsernameToken xmlns:wsse="{}"><wsse:Password>x</wsse:Password></wsse:UsernameToken>"#,
            ns::WSSE
        );
        assert!(matches!(
            UsernameToken::parse(&element(&xml)),
            Err(WssError::InvalidSecurityToken(_))
        ));
    }
}
