//! Typed error taxonomy for ledger operations.
//!
//! Expected negative outcomes (an authentication response mismatch, a
//! mine call finding an empty pool) are modeled as `Ok` result variants,
//! not errors, so callers never have to string-match messages to tell an
//! expected failure from an infrastructure fault.  Verification likewise
//! reports through [`VerificationResult`](crate::verify::VerificationResult)
//! rather than erroring, since possibly-tampered input must never crash
//! the verifier.

use thiserror::Error;

/// Errors surfaced by ledger manager and storage operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The operation addressed a flight identifier with no active ledger.
    #[error("no active ledger for flight {0}")]
    UnknownFlight(u64),

    /// The device identifier is not present in the UAV registry.
    #[error("unknown UAV identifier: {0}")]
    UnknownUav(String),

    /// A ledger already exists for this flight identifier.
    #[error("flight {0} already has an active ledger")]
    FlightExists(u64),

    /// Authentication step 2 arrived with no pending challenge on file.
    #[error("no pending authentication challenge for flight {0}")]
    ChallengeMissing(u64),

    /// A disk read, write or move failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),

    /// Canonical serialization of a block or transaction failed.
    #[error("canonical serialization failed: {0}")]
    Canonical(#[from] serde_json::Error),
}
