//! Data model and block hashing for per-flight ledgers.
//!
//! A flight ledger is an ordered list of [`Block`] values.  Each block
//! commits to an ordered batch of [`Transaction`] envelopes together with
//! the [`EmbeddingEvent`] records produced while the batch was sequenced.
//! The single safety-critical routine here is [`hash_block`]: it
//! canonicalizes a block (top-level keys sorted lexicographically, no
//! extraneous whitespace, the `current_hash` field excluded) and returns a
//! lowercase SHA-256 hex digest.  The writer and the verifier both go
//! through this one function, so their serialization can never drift
//! apart.  Timestamps are fractional `f64` values; the `float_roundtrip`
//! feature of `serde_json` is required so a persisted timestamp re-parses
//! to the identical bits and re-hashing an archive stays byte-stable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel `previous_hash` carried by every genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Transaction identifier of the sentinel genesis transaction.
pub const GENESIS_TX_ID: &str = "GENESIS_TX";

/// All-zero 64-hex seed used before any hash has been produced.
pub const SEQUENCE_SEED: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Category tag carried by every transaction envelope.
///
/// Serialized under the `type` key as `GENESIS`, `AUTH_SUCCESS` or
/// `TELEMETRY`.  The engine never branches on the payload contents, only
/// on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxKind {
    /// Sentinel transaction minted into every genesis block.
    Genesis,
    /// Successful authentication handshake commitment.
    AuthSuccess,
    /// Telemetry sample submitted by a device.
    Telemetry,
}

/// One caller-supplied transaction awaiting (or committed to) a block.
///
/// The envelope carries a category tag and a unique `tx_id`; everything
/// else lives in the flattened `data` map, which the ledger treats as an
/// opaque bag of JSON fields (canonicalized by key-sorted serialization
/// for hashing, otherwise uninterpreted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Category tag, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: TxKind,
    /// Unique transaction identifier.
    pub tx_id: String,
    /// Opaque caller-supplied fields, flattened into the envelope.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Transaction {
    /// Builds a transaction envelope around an opaque payload map.
    pub fn new(kind: TxKind, tx_id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind,
            tx_id: tx_id.into(),
            data,
        }
    }
}

/// Kind of a temporal proof event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Synthetic event opening a new flight chain (genesis block only).
    ChainStart,
    /// A transaction was embedded into the sequencer's hash trail.
    TransactionEmbedded,
}

/// Record proving a transaction was incorporated into the sequencer's
/// hash trail at a specific point, independent of block-level linkage.
///
/// Created exactly once per sequenced transaction (plus one synthetic
/// `CHAIN_START` event in the genesis block) and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEvent {
    /// Event category.
    pub event_type: EventKind,
    /// Wall-clock time of the embedding, Unix seconds.
    pub timestamp: f64,
    /// Sequencer hash immediately after the embedding.
    pub hash_at_event: String,
    /// Identifier of the embedded transaction.
    pub tx_id: String,
    /// Flight this event belongs to.
    pub flight_id: u64,
    /// Device identifier, carried only by the genesis `CHAIN_START` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uav_id: Option<String>,
    /// Operator name, carried only by the genesis `CHAIN_START` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// One immutable batch of transactions plus linking metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, starting at 0 for genesis.
    pub index: u64,
    /// Wall-clock creation time, Unix seconds.  Strictly increases
    /// block-over-block.
    pub timestamp: f64,
    /// `current_hash` of the preceding block, or `"0"` for genesis.
    pub previous_hash: String,
    /// Temporal proof events recorded while the batch was sequenced.
    pub event_log: Vec<EmbeddingEvent>,
    /// The committed transaction batch, in enqueue order.
    pub transactions: Vec<Transaction>,
    /// Hash of this block with the `current_hash` field itself excluded.
    pub current_hash: String,
}

impl Block {
    /// Builds and finalizes the genesis block for a new flight.
    ///
    /// The genesis block carries a single `CHAIN_START` event naming the
    /// device and operator, plus the sentinel `GENESIS_TX` transaction.
    pub fn genesis(
        flight_id: u64,
        uav_id: &str,
        operator: &str,
    ) -> Result<Self, serde_json::Error> {
        let now = unix_now();
        let mut data = Map::new();
        data.insert(
            "data".to_string(),
            Value::String(format!("Flight {flight_id} initialized - UAV: {uav_id}")),
        );
        data.insert("operator".to_string(), Value::String(operator.to_string()));
        let mut block = Self {
            index: 0,
            timestamp: now,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            event_log: vec![EmbeddingEvent {
                event_type: EventKind::ChainStart,
                timestamp: now,
                hash_at_event: SEQUENCE_SEED.to_string(),
                tx_id: GENESIS_TX_ID.to_string(),
                flight_id,
                uav_id: Some(uav_id.to_string()),
                operator: Some(operator.to_string()),
            }],
            transactions: vec![Transaction::new(TxKind::Genesis, GENESIS_TX_ID, data)],
            current_hash: String::new(),
        };
        block.current_hash = hash_block(&block)?;
        Ok(block)
    }
}

/// Serializes any value to canonical JSON: object keys sorted
/// lexicographically, compact separators, UTF-8.
///
/// `serde_json`'s default object map is ordered (`BTreeMap`), so routing
/// the value through [`serde_json::Value`] re-sorts keys at every nesting
/// level while array ordering is preserved.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(value.to_string())
}

/// Computes the SHA-256 content hash of a block.
///
/// The block is canonicalized with its `current_hash` field removed, so
/// the stored digest never feeds back into itself.  Identical field
/// content always yields the identical digest.
pub fn hash_block(block: &Block) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(block)?;
    if let Value::Object(map) = &mut value {
        map.remove("current_hash");
    }
    Ok(sha256_hex(value.to_string().as_bytes()))
}

/// Lowercase SHA-256 hex digest of a byte string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Current wall-clock time as fractional Unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
