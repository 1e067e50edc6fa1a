//! Streaming WS-Security processor for SOAP messages.
//!
//! Verifies and secures SOAP 1.1/1.2 envelopes as event streams, without
//! building a document tree for the body.
//!
//! # Features
//!
//! - Inbound security header state machine (UsernameToken, Timestamp,
//!   BinarySecurityToken, SAML assertions, EncryptedKey, DerivedKeyToken,
//!   Signature, ReferenceList)
//! - Exclusive canonicalization and digest verification over buffered
//!   reference spans
//! - In-stream decryption of EncryptedData elements
//! - Nonce/Created replay cache with configurable purge policy
//! - Security event bus with vetoing listeners
//! - Outbound builder for the same set of actions
//! - SOAP Fault generation from processing errors
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zentinel_wss::{StaticCredentials, WssConfig, WssInbound};
//!
//! let credentials = StaticCredentials::new().with_password("alice", "secret");
//! let inbound = WssInbound::new(WssConfig::default(), Arc::new(credentials))?;
//! let processed = inbound.process_document(xml)?;
//! for event in &processed.events {
//!     println!("{}", event.name());
//! }
//! ```

pub mod c14n;
pub mod config;
pub mod context;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod event;
pub mod inbound;
pub mod nonce;
pub mod ns;
pub mod outbound;
pub mod security_event;
pub mod token;
pub mod tree;

pub use config::WssConfig;
pub use credentials::{Credential, CredentialCallback, IdentifierKind, StaticCredentials};
pub use error::{soap_fault_response, FaultCode, WssError};
pub use event::XmlEvent;
pub use inbound::{InboundPass, InboundStats, ProcessedDocument, WssInbound};
pub use nonce::{NonceCache, PurgePolicy};
pub use outbound::WssOutbound;
pub use security_event::{SecurityEvent, SecurityEventListener};
