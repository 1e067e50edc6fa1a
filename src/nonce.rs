//! Replay cache for UsernameToken nonces.
//!
//! Shared by every pass of a processor. Check and insert happen under one
//! lock, so two concurrent passes carrying the same (nonce, created) pair
//! cannot both see it as fresh.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of a replay check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceStatus {
    Fresh,
    Replayed,
    Stale,
}

/// When out-of-window entries are evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PurgePolicy {
    /// Evict expired entries on every check
    #[default]
    Lazy,
    /// Never evict (tests, short-lived processes)
    Never,
}

#[derive(Debug)]
pub struct NonceCache {
    window: Duration,
    tolerance: Duration,
    policy: PurgePolicy,
    seen: Mutex<HashMap<(Vec<u8>, String), DateTime<Utc>>>,
}

impl NonceCache {
    pub fn new(window: Duration, tolerance: Duration) -> Self {
        Self::with_policy(window, tolerance, PurgePolicy::Lazy)
    }

    pub fn with_policy(window: Duration, tolerance: Duration, policy: PurgePolicy) -> Self {
        Self {
            window,
            tolerance,
            policy,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically classify and, when fresh, record a (nonce, created) pair.
    ///
    /// `created_text` is the creation time exactly as transmitted; it is part
    /// of the key so that the same nonce with a different timestamp is a
    /// different record.
    pub fn check_and_record(
        &self,
        nonce: &[u8],
        created_text: &str,
        created: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> NonceStatus {
        if now - created > self.window || created - now > self.tolerance {
            return NonceStatus::Stale;
        }

        let mut seen = self.seen.lock();
        if self.policy == PurgePolicy::Lazy {
            let window = self.window;
            let before = seen.len();
            seen.retain(|_, recorded| now - *recorded <= window);
            if seen.len() != before {
                debug!(evicted = before - seen.len(), "Purged expired nonces");
            }
        }

        let key = (nonce.to_vec(), created_text.to_string());
        if seen.contains_key(&key) {
            return NonceStatus::Replayed;
        }
        seen.insert(key, created);
        NonceStatus::Fresh
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
