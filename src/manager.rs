//! Ledger manager: all mutable flight state behind one lock.
//!
//! The manager owns the map of concurrently active flight ledgers, the
//! pending authentication challenges and the durable flight counter.  The
//! reference deployment serves one thread per request, so every mutation
//! of the ledger map, any pool or any chain is serialized by a single
//! coarse manager-wide lock; reads that need a consistent snapshot take
//! the same lock.  Chain persistence happens after the lock is released
//! (slow disks must not stall other flights), with the one exception of
//! archiving, where the lock is held across the move so the in-memory
//! cleanup is unconditional.

use crate::auth::{
    derive_autn, AuthChallenge, AuthOutcome, PendingChallenge, UavRegistry,
};
use crate::block::{hash_block, unix_now, Block, Transaction, TxKind};
use crate::error::LedgerError;
use crate::oversight::{AnomalyClassifier, ContractEvaluator};
use crate::sequencer::{TemporalSequencer, DEFAULT_DIFFICULTY};
use crate::storage::LedgerStore;
use crate::verify::{verify_chain, verify_file, VerificationResult};
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Tuning knobs for the ledger engine.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Spacing hashes inserted before each transaction embedding.
    pub difficulty: u32,
    /// Pool size at which a telemetry submission triggers an automatic
    /// mine.
    pub pool_threshold: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            pool_threshold: 3,
        }
    }
}

/// Result of starting a new flight.
#[derive(Debug, Clone)]
pub struct FlightStart {
    /// The freshly issued flight identifier.
    pub flight_id: u64,
    /// Hash of the genesis block.
    pub genesis_hash: String,
}

/// Acknowledgement returned for a telemetry submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryAck {
    /// The transaction joined the pool; no block was produced yet.
    Received {
        /// Pool size after the submission.
        pending: usize,
    },
    /// The submission crossed the batching threshold and a block was
    /// mined.
    BlockSealed {
        /// Hash of the new block.
        block_hash: String,
    },
}

/// Snapshot of one active flight, taken under the manager lock.
#[derive(Debug, Clone)]
pub struct ActiveFlight {
    /// Flight identifier.
    pub flight_id: u64,
    /// Device flying this flight.
    pub uav_id: String,
    /// Operator who started the flight.
    pub operator: String,
    /// Current chain length in blocks.
    pub blocks: usize,
    /// Transactions waiting in the pool.
    pub pending: usize,
    /// Whether the handshake has completed for this flight.
    pub authenticated: bool,
    /// Flight start time, Unix seconds.
    pub start_time: f64,
}

/// One active flight's ledger: exclusively owned by the manager entry.
#[derive(Debug)]
struct FlightLedger {
    flight_id: u64,
    uav_id: String,
    operator: String,
    chain: Vec<Block>,
    transaction_pool: Vec<Transaction>,
    session_key: Option<String>,
    start_time: f64,
    sequencer: TemporalSequencer,
}

#[derive(Debug, Default)]
struct ManagerState {
    ledgers: HashMap<u64, FlightLedger>,
    pending_auth: HashMap<u64, PendingChallenge>,
}

/// Owner of every concurrently active flight ledger.
pub struct LedgerManager {
    config: LedgerConfig,
    registry: UavRegistry,
    store: LedgerStore,
    contracts: Option<Box<dyn ContractEvaluator>>,
    anomalies: Option<Box<dyn AnomalyClassifier>>,
    state: Mutex<ManagerState>,
}

impl LedgerManager {
    /// Creates a manager over the given storage layout and device
    /// registry, with default tuning.
    pub fn new(store: LedgerStore, registry: UavRegistry) -> Self {
        Self::with_config(store, registry, LedgerConfig::default())
    }

    /// Creates a manager with explicit tuning knobs.
    pub fn with_config(store: LedgerStore, registry: UavRegistry, config: LedgerConfig) -> Self {
        Self {
            config,
            registry,
            store,
            contracts: None,
            anomalies: None,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Attaches a flight-safety contract evaluator consulted per
    /// telemetry payload.
    pub fn with_contract_evaluator(mut self, evaluator: Box<dyn ContractEvaluator>) -> Self {
        self.contracts = Some(evaluator);
        self
    }

    /// Attaches an anomaly classifier consulted per telemetry payload.
    pub fn with_anomaly_classifier(mut self, classifier: Box<dyn AnomalyClassifier>) -> Self {
        self.anomalies = Some(classifier);
        self
    }

    /// The storage layout this manager persists into.
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// The device registry this manager authenticates against.
    pub fn registry(&self) -> &UavRegistry {
        &self.registry
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues the next flight identifier and creates its ledger.
    ///
    /// Fails with [`LedgerError::UnknownUav`] for a device that is not in
    /// the registry.
    pub fn start_flight(
        &self,
        uav_id: &str,
        operator: Option<&str>,
    ) -> Result<FlightStart, LedgerError> {
        if !self.registry.contains(uav_id) {
            return Err(LedgerError::UnknownUav(uav_id.to_string()));
        }
        let operator = operator.unwrap_or("system");

        let (flight_id, genesis_hash, chain) = {
            let mut state = self.state();
            // counter increment and map insert share the critical section
            // so two concurrent starts cannot collide
            let flight_id = self.store.next_flight_id()?;
            let genesis_hash = create_ledger_locked(
                &mut state,
                &self.config,
                flight_id,
                uav_id,
                operator,
            )?;
            let chain = state
                .ledgers
                .get(&flight_id)
                .map(|ledger| ledger.chain.clone())
                .unwrap_or_default();
            (flight_id, genesis_hash, chain)
        };
        self.persist(flight_id, &chain);
        tracing::info!(flight_id, uav_id, operator, "flight started");
        Ok(FlightStart {
            flight_id,
            genesis_hash,
        })
    }

    /// Creates a ledger for an externally issued flight identifier.
    ///
    /// Fails with [`LedgerError::FlightExists`] if the identifier already
    /// has an active entry.
    pub fn create_ledger(
        &self,
        flight_id: u64,
        uav_id: &str,
        operator: &str,
    ) -> Result<String, LedgerError> {
        if !self.registry.contains(uav_id) {
            return Err(LedgerError::UnknownUav(uav_id.to_string()));
        }
        let (genesis_hash, chain) = {
            let mut state = self.state();
            let hash =
                create_ledger_locked(&mut state, &self.config, flight_id, uav_id, operator)?;
            let chain = state
                .ledgers
                .get(&flight_id)
                .map(|ledger| ledger.chain.clone())
                .unwrap_or_default();
            (hash, chain)
        };
        self.persist(flight_id, &chain);
        Ok(genesis_hash)
    }

    /// Appends a transaction to a flight's pending pool.
    ///
    /// Returns the pool size after the append.
    pub fn enqueue(&self, flight_id: u64, tx: Transaction) -> Result<usize, LedgerError> {
        let mut state = self.state();
        let ledger = state
            .ledgers
            .get_mut(&flight_id)
            .ok_or(LedgerError::UnknownFlight(flight_id))?;
        ledger.transaction_pool.push(tx);
        Ok(ledger.transaction_pool.len())
    }

    /// Drains the pending pool into a new hash-linked block.
    ///
    /// An empty pool is a no-op (`Ok(None)`), not an error.  The
    /// in-memory append happens inside the lock; persistence follows
    /// outside it and is best-effort (a disk failure is logged, the
    /// in-memory chain stays authoritative).
    pub fn mine(&self, flight_id: u64) -> Result<Option<String>, LedgerError> {
        let mined = {
            let mut state = self.state();
            let ledger = state
                .ledgers
                .get_mut(&flight_id)
                .ok_or(LedgerError::UnknownFlight(flight_id))?;
            mine_locked(ledger)?
        };
        match mined {
            Some((block_hash, chain)) => {
                self.persist(flight_id, &chain);
                Ok(Some(block_hash))
            }
            None => Ok(None),
        }
    }

    /// Issues an authentication challenge for a flight's device.
    ///
    /// A fresh call replaces any prior pending challenge for the flight.
    pub fn auth_step1(
        &self,
        flight_id: u64,
        uav_id: &str,
    ) -> Result<AuthChallenge, LedgerError> {
        let long_term_key = self
            .registry
            .long_term_key(uav_id)
            .ok_or_else(|| LedgerError::UnknownUav(uav_id.to_string()))?;
        let mut state = self.state();
        if !state.ledgers.contains_key(&flight_id) {
            return Err(LedgerError::UnknownFlight(flight_id));
        }
        let rand_value: u64 = rand::thread_rng().gen();
        let challenge = PendingChallenge::issue(long_term_key, rand_value);
        let autn = derive_autn(long_term_key, uav_id, rand_value);
        state.pending_auth.insert(flight_id, challenge);
        Ok(AuthChallenge {
            rand: rand_value,
            autn,
        })
    }

    /// Verifies a device's challenge response.
    ///
    /// On success the session key and an `AUTH_SUCCESS` transaction are
    /// committed immediately (the block is mined before returning), so no
    /// telemetry depending on the session key can outrun the
    /// authentication record.  On a mismatch the ledger is untouched and
    /// the pending challenge is kept, so the device may retry.
    pub fn auth_step2(
        &self,
        flight_id: u64,
        uav_id: &str,
        response: &str,
    ) -> Result<AuthOutcome, LedgerError> {
        let (session_key, mined) = {
            let mut state = self.state();
            if !state.ledgers.contains_key(&flight_id) {
                return Err(LedgerError::UnknownFlight(flight_id));
            }
            let pending = state
                .pending_auth
                .get(&flight_id)
                .ok_or(LedgerError::ChallengeMissing(flight_id))?;
            if response != pending.xres {
                return Ok(AuthOutcome::Failure {
                    reason: "response mismatch".to_string(),
                });
            }
            let challenge = state
                .pending_auth
                .remove(&flight_id)
                .ok_or(LedgerError::ChallengeMissing(flight_id))?;

            let mut data = Map::new();
            data.insert("uav_id".to_string(), Value::String(uav_id.to_string()));
            data.insert(
                "status".to_string(),
                Value::String("AUTHENTICATED".to_string()),
            );
            data.insert(
                "session_key".to_string(),
                Value::String(challenge.session_key.clone()),
            );
            data.insert("auth_rand".to_string(), Value::from(challenge.rand));
            let tx = Transaction::new(
                TxKind::AuthSuccess,
                format!("AUTH_SUCCESS_{uav_id}_{}", unix_now() as u64),
                data,
            );

            let ledger = state
                .ledgers
                .get_mut(&flight_id)
                .ok_or(LedgerError::UnknownFlight(flight_id))?;
            ledger.transaction_pool.push(tx);
            ledger.session_key = Some(challenge.session_key.clone());
            let mined = mine_locked(ledger)?;
            (challenge.session_key, mined)
        };

        if let Some((_, chain)) = mined {
            self.persist(flight_id, &chain);
        }
        tracing::info!(flight_id, uav_id, "device authenticated");
        Ok(AuthOutcome::Success { session_key })
    }

    /// Submits a telemetry payload for a flight.
    ///
    /// Oversight collaborators are consulted first and their verdicts are
    /// merged opaquely into the transaction.  Once the pool reaches the
    /// configured threshold the submission triggers an automatic mine.
    pub fn submit_telemetry(
        &self,
        flight_id: u64,
        payload: Map<String, Value>,
    ) -> Result<TelemetryAck, LedgerError> {
        // black-box collaborators run outside the critical section
        let violations: Vec<Value> = self
            .contracts
            .as_ref()
            .map(|c| c.evaluate(&payload))
            .unwrap_or_default();
        let verdict = self
            .anomalies
            .as_ref()
            .map(|a| a.classify(&payload))
            .unwrap_or(Value::Null);

        let mined = {
            let mut state = self.state();
            let ledger = state
                .ledgers
                .get_mut(&flight_id)
                .ok_or(LedgerError::UnknownFlight(flight_id))?;

            let mut payload = payload;
            let tx_id = match payload.remove("tx_id") {
                Some(Value::String(id)) => id,
                _ => format!("TELEM_{}", (unix_now() * 1000.0) as u64),
            };
            let mut data = Map::new();
            data.insert(
                "uav_id".to_string(),
                Value::String(ledger.uav_id.clone()),
            );
            data.insert(
                "session_key".to_string(),
                ledger
                    .session_key
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            );
            data.insert("data".to_string(), Value::Object(payload));
            data.insert(
                "contract_violations".to_string(),
                Value::Array(violations),
            );
            data.insert("anomaly".to_string(), verdict);
            ledger
                .transaction_pool
                .push(Transaction::new(TxKind::Telemetry, tx_id, data));

            if ledger.transaction_pool.len() >= self.config.pool_threshold {
                mine_locked(ledger)?
            } else {
                let pending = ledger.transaction_pool.len();
                return Ok(TelemetryAck::Received { pending });
            }
        };

        match mined {
            Some((block_hash, chain)) => {
                self.persist(flight_id, &chain);
                Ok(TelemetryAck::BlockSealed { block_hash })
            }
            // unreachable in practice: the pool was non-empty
            None => Ok(TelemetryAck::Received { pending: 0 }),
        }
    }

    /// Ends a flight: flushes any residual pool, moves the persisted
    /// ledger to archive storage and releases the in-memory entry.
    ///
    /// The lock is held across the whole operation so a successful move
    /// is always followed by cleanup, and no transaction can slip in
    /// between flush and removal.
    pub fn end_flight(&self, flight_id: u64) -> Result<(), LedgerError> {
        let mut state = self.state();
        let ledger = state
            .ledgers
            .get_mut(&flight_id)
            .ok_or(LedgerError::UnknownFlight(flight_id))?;
        mine_locked(ledger)?;
        let chain = ledger.chain.clone();
        self.store.archive_chain(flight_id, &chain)?;
        state.ledgers.remove(&flight_id);
        state.pending_auth.remove(&flight_id);
        tracing::info!(flight_id, blocks = chain.len(), "flight archived");
        Ok(())
    }

    /// Consistent snapshot of every active flight.
    pub fn active_flights(&self) -> Vec<ActiveFlight> {
        let state = self.state();
        let mut flights: Vec<ActiveFlight> = state
            .ledgers
            .values()
            .map(|ledger| ActiveFlight {
                flight_id: ledger.flight_id,
                uav_id: ledger.uav_id.clone(),
                operator: ledger.operator.clone(),
                blocks: ledger.chain.len(),
                pending: ledger.transaction_pool.len(),
                authenticated: ledger.session_key.is_some(),
                start_time: ledger.start_time,
            })
            .collect();
        flights.sort_by_key(|flight| flight.flight_id);
        flights
    }

    /// Verifies and returns a copy of an active flight's chain.
    pub fn chain_snapshot(
        &self,
        flight_id: u64,
    ) -> Result<(VerificationResult, Vec<Block>), LedgerError> {
        let state = self.state();
        let ledger = state
            .ledgers
            .get(&flight_id)
            .ok_or(LedgerError::UnknownFlight(flight_id))?;
        Ok((verify_chain(&ledger.chain), ledger.chain.clone()))
    }

    /// Loads and verifies an archived flight by archive name
    /// (e.g. `Flight_7`).
    pub fn archived_chain(&self, name: &str) -> (VerificationResult, Vec<Block>) {
        match self.store.archive_file(name) {
            Some(path) => verify_file(&path),
            None => (
                VerificationResult {
                    secured: false,
                    message: format!("verification failed: invalid archive name: {name}"),
                    last_hash: None,
                },
                Vec::new(),
            ),
        }
    }

    fn persist(&self, flight_id: u64, chain: &[Block]) {
        if let Err(err) = self.store.save_chain(flight_id, chain) {
            tracing::warn!(
                flight_id,
                %err,
                "in-memory chain is ahead of disk; next mine or archive will retry"
            );
        }
    }
}

fn create_ledger_locked(
    state: &mut ManagerState,
    config: &LedgerConfig,
    flight_id: u64,
    uav_id: &str,
    operator: &str,
) -> Result<String, LedgerError> {
    if state.ledgers.contains_key(&flight_id) {
        return Err(LedgerError::FlightExists(flight_id));
    }
    let genesis = Block::genesis(flight_id, uav_id, operator)?;
    let genesis_hash = genesis.current_hash.clone();
    let sequencer = TemporalSequencer::seeded(config.difficulty, genesis_hash.clone());
    state.ledgers.insert(
        flight_id,
        FlightLedger {
            flight_id,
            uav_id: uav_id.to_string(),
            operator: operator.to_string(),
            start_time: genesis.timestamp,
            chain: vec![genesis],
            transaction_pool: Vec::new(),
            session_key: None,
            sequencer,
        },
    );
    Ok(genesis_hash)
}

/// Drains the pool into a new block under the caller's lock.
///
/// Returns the new block hash and a snapshot of the chain for
/// persistence, or `None` when the pool is empty.  The pool is cleared
/// only after the block is fully built, so a serialization failure
/// leaves the ledger exactly as it was.
fn mine_locked(
    ledger: &mut FlightLedger,
) -> Result<Option<(String, Vec<Block>)>, LedgerError> {
    if ledger.transaction_pool.is_empty() {
        return Ok(None);
    }
    // a ledger always carries at least its genesis block
    let Some(last) = ledger.chain.last() else {
        return Ok(None);
    };
    let previous_hash = last.current_hash.clone();
    let floor = last.timestamp;

    let batch = ledger.transaction_pool.clone();
    let mut block = ledger.sequencer.build_block(
        batch,
        &previous_hash,
        ledger.chain.len() as u64,
        ledger.flight_id,
    )?;
    // the wall clock can tick coarser than the mining rate; keep the
    // chronology invariant strict
    if block.timestamp <= floor {
        block.timestamp = floor + 1e-6;
        block.current_hash = hash_block(&block)?;
        ledger.sequencer.reseed(block.current_hash.clone());
    }
    let block_hash = block.current_hash.clone();
    ledger.transaction_pool.clear();
    ledger.chain.push(block);
    Ok(Some((block_hash, ledger.chain.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{derive_response, derive_session_key};
    use crate::oversight::testing::{AltitudeCeiling, AlwaysNominal};
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    const UAV: &str = "UAV_A1";
    const KEY: &str = "K_LongTerm_A1";

    fn temp_root() -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("skyledger_mgr_{unique}"))
    }

    fn manager(root: &PathBuf) -> LedgerManager {
        let store = LedgerStore::open(root).unwrap();
        let registry =
            UavRegistry::from_entries([(UAV, KEY), ("UAV_B2", "K_LongTerm_B2")]);
        LedgerManager::new(store, registry)
    }

    fn telemetry(x: f64) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("x_pos".to_string(), json!(x));
        payload.insert("y_pos".to_string(), json!(1.5));
        payload.insert("z_alt".to_string(), json!(-4.0));
        payload
    }

    #[test]
    fn test_start_flight_creates_verified_genesis() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, Some("operator_one")).unwrap();
        assert_eq!(start.flight_id, 1);
        assert_eq!(start.genesis_hash.len(), 64);

        let (result, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert!(result.secured, "{}", result.message);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].current_hash, start.genesis_hash);
        assert!(mgr.store().active_path(start.flight_id).is_file());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_unknown_uav_and_flight_are_rejected() {
        let root = temp_root();
        let mgr = manager(&root);
        assert!(matches!(
            mgr.start_flight("UAV_Z9", None),
            Err(LedgerError::UnknownUav(_))
        ));
        assert!(matches!(
            mgr.submit_telemetry(99, telemetry(0.0)),
            Err(LedgerError::UnknownFlight(99))
        ));
        assert!(matches!(
            mgr.mine(99),
            Err(LedgerError::UnknownFlight(99))
        ));
        assert!(matches!(
            mgr.end_flight(99),
            Err(LedgerError::UnknownFlight(99))
        ));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_create_ledger_rejects_duplicate_flight() {
        let root = temp_root();
        let mgr = manager(&root);
        mgr.create_ledger(7, UAV, "ops").unwrap();
        assert!(matches!(
            mgr.create_ledger(7, UAV, "ops"),
            Err(LedgerError::FlightExists(7))
        ));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_mine_with_empty_pool_is_noop() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();
        assert_eq!(mgr.mine(start.flight_id).unwrap(), None);
        let (_, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert_eq!(chain.len(), 1);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_mine_keeps_chain_authoritative_when_persist_fails() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();

        // replace the active ledger directory with a plain file so every
        // subsequent save_chain fails
        let active_dir = mgr
            .store()
            .active_path(start.flight_id)
            .parent()
            .unwrap()
            .to_path_buf();
        fs::remove_dir_all(&active_dir).unwrap();
        fs::write(&active_dir, b"in the way").unwrap();

        let tx = Transaction::new(TxKind::Telemetry, "T1", Map::new());
        mgr.enqueue(start.flight_id, tx).unwrap();
        let mined = mgr.mine(start.flight_id).unwrap();
        assert!(mined.is_some());

        // the in-memory chain grew and still verifies
        let (result, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert!(result.secured, "{}", result.message);
        assert_eq!(chain.len(), 2);
        assert_eq!(mgr.active_flights()[0].pending, 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_mine_drains_pool_in_fifo_order() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();
        for n in 0..2 {
            let tx = Transaction::new(TxKind::Telemetry, format!("T{n}"), Map::new());
            mgr.enqueue(start.flight_id, tx).unwrap();
        }
        let block_hash = mgr.mine(start.flight_id).unwrap().unwrap();

        let (result, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert!(result.secured, "{}", result.message);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].current_hash, block_hash);
        let ids: Vec<&str> = chain[1]
            .transactions
            .iter()
            .map(|tx| tx.tx_id.as_str())
            .collect();
        assert_eq!(ids, vec!["T0", "T1"]);
        let snapshot = &mgr.active_flights()[0];
        assert_eq!(snapshot.pending, 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_handshake_success_commits_one_block() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();
        let challenge = mgr.auth_step1(start.flight_id, UAV).unwrap();
        assert_eq!(challenge.autn.len(), 64);

        // the device recomputes the response from the received rand
        let response = derive_response(KEY, challenge.rand);
        let outcome = mgr
            .auth_step2(start.flight_id, UAV, &response)
            .unwrap();
        let expected_key = derive_session_key(KEY, challenge.rand);
        assert_eq!(
            outcome,
            AuthOutcome::Success {
                session_key: expected_key.clone()
            }
        );
        assert_eq!(expected_key.len(), 16);

        let (result, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert!(result.secured, "{}", result.message);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].transactions.len(), 1);
        assert_eq!(chain[1].transactions[0].kind, TxKind::AuthSuccess);
        assert!(mgr.active_flights()[0].authenticated);

        // the challenge was consumed
        assert!(matches!(
            mgr.auth_step2(start.flight_id, UAV, &response),
            Err(LedgerError::ChallengeMissing(_))
        ));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_handshake_failure_leaves_chain_unchanged() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();
        let challenge = mgr.auth_step1(start.flight_id, UAV).unwrap();

        let outcome = mgr
            .auth_step2(start.flight_id, UAV, "0000000000")
            .unwrap();
        assert!(matches!(outcome, AuthOutcome::Failure { .. }));
        let (_, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert_eq!(chain.len(), 1);

        // a failed attempt keeps the challenge; the correct response
        // still succeeds afterwards
        let response = derive_response(KEY, challenge.rand);
        let retry = mgr.auth_step2(start.flight_id, UAV, &response).unwrap();
        assert!(matches!(retry, AuthOutcome::Success { .. }));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_step2_without_challenge_is_an_error() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();
        assert!(matches!(
            mgr.auth_step2(start.flight_id, UAV, "anything"),
            Err(LedgerError::ChallengeMissing(_))
        ));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_telemetry_auto_mines_at_threshold_and_archives() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();

        assert_eq!(
            mgr.submit_telemetry(start.flight_id, telemetry(1.0)).unwrap(),
            TelemetryAck::Received { pending: 1 }
        );
        assert_eq!(
            mgr.submit_telemetry(start.flight_id, telemetry(2.0)).unwrap(),
            TelemetryAck::Received { pending: 2 }
        );
        let (_, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert_eq!(chain.len(), 1);

        let ack = mgr
            .submit_telemetry(start.flight_id, telemetry(3.0))
            .unwrap();
        assert!(matches!(ack, TelemetryAck::BlockSealed { .. }));
        let (result, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert!(result.secured, "{}", result.message);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].transactions.len(), 3);
        assert_eq!(mgr.active_flights()[0].pending, 0);

        mgr.end_flight(start.flight_id).unwrap();
        assert!(mgr.active_flights().is_empty());
        assert!(matches!(
            mgr.chain_snapshot(start.flight_id),
            Err(LedgerError::UnknownFlight(_))
        ));

        let (archived, chain) =
            mgr.archived_chain(&format!("Flight_{}", start.flight_id));
        assert!(archived.secured, "{}", archived.message);
        assert_eq!(chain.len(), 2);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_end_flight_flushes_residual_pool() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();
        mgr.submit_telemetry(start.flight_id, telemetry(1.0)).unwrap();
        mgr.end_flight(start.flight_id).unwrap();

        let (result, chain) =
            mgr.archived_chain(&format!("Flight_{}", start.flight_id));
        assert!(result.secured, "{}", result.message);
        assert_eq!(chain.len(), 2);
        assert!(!mgr.store().active_path(start.flight_id).exists());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_oversight_verdicts_are_recorded() {
        let root = temp_root();
        let store = LedgerStore::open(&root).unwrap();
        let registry = UavRegistry::from_entries([(UAV, KEY)]);
        let mgr = LedgerManager::new(store, registry)
            .with_contract_evaluator(Box::new(AltitudeCeiling(-10.0)))
            .with_anomaly_classifier(Box::new(AlwaysNominal));
        let start = mgr.start_flight(UAV, None).unwrap();

        // z_alt of -4.0 exceeds a ceiling of -10.0
        mgr.submit_telemetry(start.flight_id, telemetry(1.0)).unwrap();
        mgr.mine(start.flight_id).unwrap().unwrap();

        let (_, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        let tx = &chain[1].transactions[0];
        let violations = tx.data.get("contract_violations").unwrap();
        assert_eq!(violations.as_array().unwrap().len(), 1);
        assert_eq!(tx.data.get("anomaly").unwrap()["anomaly"], json!(false));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_concurrent_starts_issue_distinct_ids() {
        let root = temp_root();
        let mgr = Arc::new(manager(&root));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = Arc::clone(&mgr);
            handles.push(std::thread::spawn(move || {
                mgr.start_flight(UAV, None).unwrap().flight_id
            }));
        }
        let mut ids: Vec<u64> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_chronology_holds_across_rapid_mines() {
        let root = temp_root();
        let mgr = manager(&root);
        let start = mgr.start_flight(UAV, None).unwrap();
        for round in 0..4 {
            let tx = Transaction::new(TxKind::Telemetry, format!("R{round}"), Map::new());
            mgr.enqueue(start.flight_id, tx).unwrap();
            mgr.mine(start.flight_id).unwrap().unwrap();
        }
        let (result, chain) = mgr.chain_snapshot(start.flight_id).unwrap();
        assert!(result.secured, "{}", result.message);
        assert_eq!(chain.len(), 5);
        for pair in chain.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        fs::remove_dir_all(&root).unwrap();
    }
}
