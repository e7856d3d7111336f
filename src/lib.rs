#![deny(missing_docs)]

//! # skyledger
//!
//! **skyledger** authenticates field devices (UAVs) against a central
//! coordinator and records their telemetry as append-only,
//! tamper-evident per-flight ledgers.  Each flight owns one chain of
//! hash-linked blocks; a pending transaction pool is periodically
//! "mined" into a new block by a temporal proof sequencer that also
//! attests to the relative ordering of transactions within the batch.
//! An independent verifier recomputes the whole chain from persisted
//! bytes alone and reports the first point of corruption.
//!
//! ## Components
//!
//! * **Block hashing** ([`block`]): canonical sorted-key JSON
//!   serialization and the SHA-256 block digest shared by writer and
//!   verifier.
//! * **Temporal proof sequencer** ([`sequencer`]): a strictly ordered
//!   intermediate hash trail with per-transaction embedding events.
//! * **Ledger manager** ([`manager`]): the set of concurrently active
//!   flight ledgers, the durable flight counter and the batching policy,
//!   all behind one lock.
//! * **Verifier** ([`verify`]): hash-linkage and chronology checks over
//!   archived or in-memory chains.
//! * **Authentication handshake** ([`auth`]): a simulated AKA-style
//!   challenge/response exchange whose success is committed into the
//!   ledger before any dependent telemetry is accepted.
//! * **Storage** ([`storage`]): active/archive ledger files, the flight
//!   counter and maintenance reset.
//!
//! ## Usage
//!
//! ```no_run
//! use skyledger::{LedgerManager, LedgerStore, UavRegistry};
//!
//! let store = LedgerStore::open("data")?;
//! let registry = UavRegistry::from_entries([("UAV_A1", "K_LongTerm_A1")]);
//! let manager = LedgerManager::new(store, registry);
//!
//! let flight = manager.start_flight("UAV_A1", Some("operator_one"))?;
//! let challenge = manager.auth_step1(flight.flight_id, "UAV_A1")?;
//! // ... the device derives its response from the challenge ...
//! # Ok::<(), skyledger::LedgerError>(())
//! ```
//!
//! The authentication derivations are explicitly simulated placeholders:
//! this crate demonstrates ledger integrity, not cryptographic key
//! exchange.

pub mod auth;
pub mod block;
pub mod error;
pub mod manager;
pub mod oversight;
pub mod sequencer;
pub mod storage;
pub mod verify;

pub use auth::{
    derive_autn, derive_response, derive_session_key, AuthChallenge, AuthOutcome,
    PendingChallenge, UavRegistry, RESPONSE_HEX_LEN, SESSION_KEY_HEX_LEN,
};
pub use block::{
    canonical_json, hash_block, sha256_hex, unix_now, Block, EmbeddingEvent, EventKind,
    Transaction, TxKind, GENESIS_PREVIOUS_HASH, GENESIS_TX_ID, SEQUENCE_SEED,
};
pub use error::LedgerError;
pub use manager::{ActiveFlight, FlightStart, LedgerConfig, LedgerManager, TelemetryAck};
pub use oversight::{AnomalyClassifier, ContractEvaluator};
pub use sequencer::{TemporalSequencer, DEFAULT_DIFFICULTY};
pub use storage::{ArchiveSummary, LedgerStore, ResetReport};
pub use verify::{verify_chain, verify_file, VerificationResult};
