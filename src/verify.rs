//! Independent chain verification.
//!
//! The verifier re-derives everything from the persisted bytes alone: no
//! sequencer state, no writer memory.  For every adjacent block pair it
//! recomputes the previous block's hash and checks the stored linkage,
//! and requires strictly increasing timestamps.  It reports the first
//! failure and stops; it never panics, since it routinely runs against
//! possibly-foreign or tampered archives.

use crate::block::{hash_block, Block};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Outcome of verifying one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether integrity and chronology both held end to end.
    pub secured: bool,
    /// Human-readable verdict, naming the first offending block on
    /// failure.
    pub message: String,
    /// On success, the final block's hash; on a linkage failure, the
    /// broken `previous_hash`.
    pub last_hash: Option<String>,
}

impl VerificationResult {
    fn failure(message: impl Into<String>, last_hash: Option<String>) -> Self {
        Self {
            secured: false,
            message: message.into(),
            last_hash,
        }
    }
}

/// Verifies hash linkage and chronology over an in-memory chain.
pub fn verify_chain(chain: &[Block]) -> VerificationResult {
    if chain.is_empty() {
        return VerificationResult::failure("verification failed: chain is empty", None);
    }

    for i in 1..chain.len() {
        let previous = &chain[i - 1];
        let current = &chain[i];

        let recomputed = match hash_block(previous) {
            Ok(hash) => hash,
            Err(err) => {
                return VerificationResult::failure(
                    format!("verification failed: block #{} is not canonicalizable: {err}", i - 1),
                    None,
                );
            }
        };
        if current.previous_hash != recomputed {
            return VerificationResult::failure(
                format!("tampering detected: link broken at block #{i}"),
                Some(current.previous_hash.clone()),
            );
        }
        if current.timestamp <= previous.timestamp {
            return VerificationResult::failure(
                format!("tampering detected: chronology violation at block #{i}"),
                Some(current.previous_hash.clone()),
            );
        }
    }

    VerificationResult {
        secured: true,
        message: "secured: integrity and chronology confirmed".to_string(),
        last_hash: chain.last().map(|block| block.current_hash.clone()),
    }
}

/// Loads and verifies a persisted ledger file.
///
/// An unreadable or malformed file is an immediate verification failure
/// with the chain treated as empty for display purposes.
pub fn verify_file(path: &Path) -> (VerificationResult, Vec<Block>) {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            return (
                VerificationResult::failure(
                    format!("verification failed: cannot load file: {err}"),
                    None,
                ),
                Vec::new(),
            );
        }
    };
    let chain: Vec<Block> = match serde_json::from_str(&contents) {
        Ok(chain) => chain,
        Err(err) => {
            return (
                VerificationResult::failure(
                    format!("verification failed: not a valid block array: {err}"),
                    None,
                ),
                Vec::new(),
            );
        }
    };
    (verify_chain(&chain), chain)
}
