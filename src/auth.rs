//! Simulated challenge-response authentication handshake.
//!
//! A two-step exchange modeled on AKA-style designs, scoped to one
//! flight: step 1 issues a fresh random challenge and derives the
//! authentication token, expected response and session key from the
//! device's pre-shared long-term key; step 2 checks the device's response
//! against the stored expectation.  Every derivation here is an
//! explicitly simulated placeholder for a real key-exchange/MAC scheme
//! and carries no secrecy guarantee: the long-term key is a shared
//! password known to both the coordinator's registry and the device.

use crate::block::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hex length of the truncated expected response (`xres`).
pub const RESPONSE_HEX_LEN: usize = 10;

/// Hex length of the truncated derived session key.
pub const SESSION_KEY_HEX_LEN: usize = 16;

/// Read-only mapping from device identifier to pre-shared long-term key.
#[derive(Debug, Clone, Default)]
pub struct UavRegistry {
    keys: HashMap<String, String>,
}

impl UavRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a device entry.
    pub fn register(&mut self, uav_id: impl Into<String>, long_term_key: impl Into<String>) {
        self.keys.insert(uav_id.into(), long_term_key.into());
    }

    /// Looks up a device's long-term key.
    pub fn long_term_key(&self, uav_id: &str) -> Option<&str> {
        self.keys.get(uav_id).map(String::as_str)
    }

    /// Whether the registry knows this device.
    pub fn contains(&self, uav_id: &str) -> bool {
        self.keys.contains_key(uav_id)
    }

    /// Registered device identifiers, in no particular order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl UavRegistry {
    /// Builds a registry from `(identifier, long_term_key)` pairs.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let keys = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { keys }
    }
}

/// Challenge material returned to the device by step 1.
///
/// The expected response and session key are withheld; the device
/// re-derives them from `rand` and its own copy of the long-term key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Fresh random challenge value, unique per issuance.
    pub rand: u64,
    /// Authentication token `SHA256(K ∥ uav_id ∥ rand)`; an integrity
    /// tag, not secrecy-bearing.
    pub autn: String,
}

/// Coordinator-side state for one in-flight handshake.
///
/// Created on challenge issuance and deleted on successful verification.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    /// Expected response, `SHA256(K ∥ rand ∥ "Expected")` truncated.
    pub xres: String,
    /// Derived session key, `SHA256(K ∥ rand)` truncated.
    pub session_key: String,
    /// The challenge value the derivations were bound to.
    pub rand: u64,
}

impl PendingChallenge {
    /// Derives the full challenge state for a device.
    pub fn issue(long_term_key: &str, rand: u64) -> Self {
        Self {
            xres: derive_response(long_term_key, rand),
            session_key: derive_session_key(long_term_key, rand),
            rand,
        }
    }
}

/// Outcome of authentication step 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The response matched; the session key is now committed to the
    /// ledger.
    Success {
        /// Derived session key shared with the device.
        session_key: String,
    },
    /// The response did not match the stored expectation.
    Failure {
        /// Human-readable reason, e.g. `response mismatch`.
        reason: String,
    },
}

/// Derives the authentication token for a challenge:
/// `SHA256(K ∥ uav_id ∥ rand)`.
pub fn derive_autn(long_term_key: &str, uav_id: &str, rand: u64) -> String {
    sha256_hex(format!("{long_term_key}{uav_id}{rand}").as_bytes())
}

/// Derives the device response to a challenge:
/// `SHA256(K ∥ rand ∥ "Expected")` truncated to 10 hex characters.
///
/// The truncation is deliberate and part of the protocol, not a bug.
pub fn derive_response(long_term_key: &str, rand: u64) -> String {
    let digest = sha256_hex(format!("{long_term_key}{rand}Expected").as_bytes());
    digest[..RESPONSE_HEX_LEN].to_string()
}

/// Derives the session key for a challenge: `SHA256(K ∥ rand)` truncated
/// to 16 hex characters.
pub fn derive_session_key(long_term_key: &str, rand: u64) -> String {
    let digest = sha256_hex(format!("{long_term_key}{rand}").as_bytes());
    digest[..SESSION_KEY_HEX_LEN].to_string()
}
