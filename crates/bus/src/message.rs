use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::models::{
    CycleRecord, ExecutionAck, NewsItem, Signal, SignalSource, TradeIntent,
};

pub mod topics {
    pub const EXECUTION: &str = "execution";
    pub const RAW_NEWS: &str = "raw_news";
    pub const CYCLE_RECORDS: &str = "cycle.records";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusMessage {
    SignalRequest { symbol: String },
    Signal(Signal),
    SignalUnavailable { source: SignalSource, reason: String },
    Dispatch(TradeIntent),
    Ack(ExecutionAck),
    ExecutionFailed { reason: String },
    News(NewsItem),
    Cycle(Box<CycleRecord>),
}

impl BusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignalRequest { .. } => "signal_request",
            Self::Signal(_) => "signal",
            Self::SignalUnavailable { .. } => "signal_unavailable",
            Self::Dispatch(_) => "dispatch",
            Self::Ack(_) => "ack",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::News(_) => "news",
            Self::Cycle(_) => "cycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub cycle_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    pub payload: BusMessage,
}

impl Envelope {
    pub fn new(topic: &str, cycle_id: Option<Uuid>, payload: BusMessage) -> Self {
        Self {
            topic: topic.to_string(),
            cycle_id,
            sent_at: Utc::now(),
            payload,
        }
    }
}
