//! Collaborator seams for telemetry oversight.
//!
//! The ledger engine treats flight-safety contracts and anomaly
//! detection as black boxes: both are consulted per telemetry payload and
//! their verdicts are merged opaquely into the transaction before it
//! enters the pool.  Hashing sees the verdicts only as part of the
//! canonicalized payload; the engine never interprets them.

use serde_json::{Map, Value};

/// Rule-based flight-safety evaluator.
///
/// Returns a list of violation records for a telemetry payload; an empty
/// list means the payload satisfied every active contract.
pub trait ContractEvaluator: Send + Sync {
    /// Evaluates all contracts against one telemetry payload.
    fn evaluate(&self, telemetry: &Map<String, Value>) -> Vec<Value>;
}

/// Statistical anomaly classifier.
///
/// Returns an opaque verdict record for a telemetry payload.  The
/// reference verdict shape is `{"anomaly": bool, ...}` but the engine
/// passes whatever is returned straight through.
pub trait AnomalyClassifier: Send + Sync {
    /// Classifies one telemetry payload.
    fn classify(&self, telemetry: &Map<String, Value>) -> Value;
}
