//! Temporal proof sequencer.
//!
//! The sequencer maintains a running SHA-256 hash trail.  Between
//! transactions it advances the trail `difficulty` times (pure spacing
//! steps, never recorded), then folds the canonicalized transaction into
//! the trail and records an [`EmbeddingEvent`] carrying the wall-clock
//! time and the hash at that instant.  The trail proves relative ordering
//! of transactions within a block; inter-block integrity is proved
//! separately by [`hash_block`](crate::block::hash_block), which
//! finalizes each block.  Keeping the two trails independent lets the
//! verifier recompute only the cheap block linkage while the sequential
//! trail remains a write-time temporal attestation.

use crate::block::{
    canonical_json, hash_block, sha256_hex, unix_now, Block, EmbeddingEvent, EventKind,
    Transaction, SEQUENCE_SEED,
};

/// Default number of spacing hashes inserted before each embedding.
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// Generator of a strictly ordered intermediate hash sequence, one per
/// flight.
#[derive(Debug, Clone)]
pub struct TemporalSequencer {
    latest_hash: String,
    sequence_count: u64,
    difficulty: u32,
}

impl TemporalSequencer {
    /// Creates a sequencer with the given difficulty, seeded with the
    /// all-zero hash.
    pub fn new(difficulty: u32) -> Self {
        Self {
            latest_hash: SEQUENCE_SEED.to_string(),
            sequence_count: 0,
            difficulty,
        }
    }

    /// Creates a sequencer continuing from an existing hash, typically a
    /// freshly finalized genesis block hash.
    pub fn seeded(difficulty: u32, latest_hash: impl Into<String>) -> Self {
        Self {
            latest_hash: latest_hash.into(),
            sequence_count: 0,
            difficulty,
        }
    }

    /// Current tip of the hash trail.
    pub fn latest_hash(&self) -> &str {
        &self.latest_hash
    }

    /// Re-seeds the trail tip, used when a block hash is re-finalized
    /// after the sequencer already recorded it.
    pub fn reseed(&mut self, latest_hash: impl Into<String>) {
        self.latest_hash = latest_hash.into();
    }

    /// Number of hashes produced since the trail was last reset.
    pub fn sequence_count(&self) -> u64 {
        self.sequence_count
    }

    /// Advances the trail one step: `latest = SHA256(latest)`.
    ///
    /// Pure spacing step; not recorded as an event.
    pub fn advance(&mut self) -> String {
        self.latest_hash = sha256_hex(self.latest_hash.as_bytes());
        self.sequence_count += 1;
        self.latest_hash.clone()
    }

    /// Folds a canonicalized payload into the trail and returns the
    /// wall-clock time and new trail hash at the moment of embedding.
    pub fn embed<T: serde::Serialize>(
        &mut self,
        payload: &T,
    ) -> Result<(f64, String), serde_json::Error> {
        let encoded = canonical_json(payload)?;
        let combined = format!("{}{}", self.latest_hash, encoded);
        self.latest_hash = sha256_hex(combined.as_bytes());
        self.sequence_count += 1;
        Ok((unix_now(), self.latest_hash.clone()))
    }

    /// Sequences a drained transaction pool into a new, finalized block.
    ///
    /// Resets the trail to `previous_hash`, then for each transaction in
    /// input order performs `difficulty` spacing advances followed by one
    /// embedding, recording a `TRANSACTION_EMBEDDED` event.  The block is
    /// finalized via [`hash_block`], not via the trail, and the trail is
    /// then re-seeded with the block hash for continuity.
    pub fn build_block(
        &mut self,
        transactions: Vec<Transaction>,
        previous_hash: &str,
        chain_length: u64,
        flight_id: u64,
    ) -> Result<Block, serde_json::Error> {
        self.latest_hash = previous_hash.to_string();
        self.sequence_count = 0;

        let mut event_log = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            for _ in 0..self.difficulty {
                self.advance();
            }
            let (tx_time, tx_hash) = self.embed(tx)?;
            event_log.push(EmbeddingEvent {
                event_type: EventKind::TransactionEmbedded,
                timestamp: tx_time,
                hash_at_event: tx_hash,
                tx_id: tx.tx_id.clone(),
                flight_id,
                uav_id: None,
                operator: None,
            });
        }

        let mut block = Block {
            index: chain_length,
            timestamp: unix_now(),
            previous_hash: previous_hash.to_string(),
            event_log,
            transactions,
            current_hash: String::new(),
        };
        block.current_hash = hash_block(&block)?;
        self.latest_hash = block.current_hash.clone();
        Ok(block)
    }
}

impl Default for TemporalSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}
