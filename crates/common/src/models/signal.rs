use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalSource {
    News,
    PriceAction,
    OrderFlow,
}

impl SignalSource {
    pub const ALL: [SignalSource; 3] = [Self::News, Self::PriceAction, Self::OrderFlow];

    /// Bus topic the source's responder serves.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::News => "signal.news",
            Self::PriceAction => "signal.price_action",
            Self::OrderFlow => "signal.order_flow",
        }
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::News => "news",
            Self::PriceAction => "price_action",
            Self::OrderFlow => "order_flow",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
            Self::Neutral => 0.0,
        }
    }

    pub fn from_score(score: f64, epsilon: f64) -> Self {
        if score.abs() < epsilon {
            Self::Neutral
        } else if score > 0.0 {
            Self::Bullish
        } else {
            Self::Bearish
        }
    }
}

/// Levels read from price structure. Used to place stops and targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceStructure {
    pub support: f64,
    pub resistance: f64,
    pub atr: f64,
}

/// A normalized, source-tagged market assessment. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: SignalSource,
    pub direction: Direction,
    pub strength: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub stale_after: DateTime<Utc>,
    /// Input was clamped into range; confidence already carries the penalty.
    pub adjusted: bool,
    pub reference_price: Option<f64>,
    pub structure: Option<PriceStructure>,
}

impl Signal {
    pub fn is_stale(&self, as_of: DateTime<Utc>) -> bool {
        as_of > self.stale_after
    }

    /// Signed score in [-1, 1].
    pub fn score(&self) -> f64 {
        self.direction.sign() * self.strength
    }
}
