use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Flat,
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short, 0 when flat.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
            Self::Flat => 0.0,
        }
    }
}

/// Lifecycle of a symbol's position. `Opening` and `Closing` only exist while
/// an intent is awaiting its execution acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionPhase {
    Flat,
    Opening,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub opened_at: Option<DateTime<Utc>>,
    /// Pyramid adds applied since the position was opened.
    pub adds: u32,
    pub phase: PositionPhase,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::Flat,
            size: 0.0,
            entry_price: 0.0,
            stop_price: 0.0,
            target_price: 0.0,
            opened_at: None,
            adds: 0,
            phase: PositionPhase::Flat,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == Side::Flat
    }

    pub fn notional(&self, mark: f64) -> f64 {
        self.size * mark
    }

    pub fn stop_breached(&self, mark: f64) -> bool {
        match self.side {
            Side::Long => mark <= self.stop_price,
            Side::Short => mark >= self.stop_price,
            Side::Flat => false,
        }
    }

    pub fn target_reached(&self, mark: f64) -> bool {
        match self.side {
            Side::Long => mark >= self.target_price,
            Side::Short => mark <= self.target_price,
            Side::Flat => false,
        }
    }
}
