use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::intent::{ExecutionAck, TradeIntent};
use super::position::Position;
use super::risk::RiskState;
use super::signal::{Direction, SignalSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionResult {
    NotDispatched,
    Confirmed(ExecutionAck),
    /// No acknowledgment before the dispatch deadline. The real-world effect is unknown.
    Unconfirmed,
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleOutcome {
    Confirmed,
    Unconfirmed,
    Halted,
    InsufficientEvidence,
    NoAction,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingSignal {
    pub source: SignalSource,
    pub reason: String,
}

/// Audit entry for one cycle. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: Uuid,
    pub symbol: String,
    pub started_at: DateTime<Utc>,
    pub signals_received: Vec<SignalSource>,
    pub missing: Vec<MissingSignal>,
    pub net_direction: Direction,
    pub net_confidence: f64,
    pub intent_emitted: TradeIntent,
    pub execution_result: ExecutionResult,
    pub outcome: CycleOutcome,
    pub duration_ms: u64,
}

/// Read-only copy of the decision core's state. Also the checkpoint body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSnapshot {
    pub positions: HashMap<String, Position>,
    pub risk: RiskState,
    pub last_committed_cycle: Option<Uuid>,
    pub taken_at: DateTime<Utc>,
}
