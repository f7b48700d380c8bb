use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Top-of-book depth for one symbol. Bids descending, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub observed_at: DateTime<Utc>,
}

impl DepthSnapshot {
    pub fn mid_price(&self) -> Option<f64> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some((bid + ask) / 2.0)
    }

    /// Summed quantity over the first `levels` of each side.
    pub fn volumes(&self, levels: usize) -> (f64, f64) {
        let sum = |side: &[BookLevel]| side.iter().take(levels).map(|l| l.quantity).sum::<f64>();
        (sum(&self.bids), sum(&self.asks))
    }
}
