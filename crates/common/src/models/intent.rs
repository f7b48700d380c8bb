use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    Open,
    Close,
    IncreasePosition,
    ReducePosition,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    Reversal,
    TargetReached,
}

/// The decision artifact of one cycle. Consumed once by execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub cycle_id: Uuid,
    pub action: TradeAction,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub reference_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
    pub close_reason: Option<CloseReason>,
    pub rationale: String,
}

impl TradeIntent {
    pub fn hold(cycle_id: Uuid, symbol: &str, rationale: impl Into<String>) -> Self {
        Self {
            cycle_id,
            action: TradeAction::Hold,
            symbol: symbol.to_string(),
            side: Side::Flat,
            size: 0.0,
            reference_price: None,
            stop_price: None,
            target_price: None,
            close_reason: None,
            rationale: rationale.into(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == TradeAction::Hold
    }

    /// Exchange order side: buying for long entries and short exits.
    pub fn order_side(&self) -> &'static str {
        match (self.action, self.side) {
            (TradeAction::Open | TradeAction::IncreasePosition, Side::Long) => "BUY",
            (TradeAction::Open | TradeAction::IncreasePosition, Side::Short) => "SELL",
            (TradeAction::Close | TradeAction::ReducePosition, Side::Long) => "SELL",
            (TradeAction::Close | TradeAction::ReducePosition, Side::Short) => "BUY",
            _ => "NONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAck {
    pub cycle_id: Uuid,
    pub order_id: String,
    pub filled_size: f64,
    pub fill_price: f64,
    pub acked_at: DateTime<Utc>,
}
