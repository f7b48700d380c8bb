use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kline::Candle;
use super::news::NewsItem;
use super::orderbook::DepthSnapshot;
use super::signal::SignalSource;

/// What a fetcher hands to its scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessedData {
    Candles { symbol: String, candles: Vec<Candle> },
    Depth(DepthSnapshot),
    News(Vec<NewsItem>),
}

/// Scorer output in each source's native scale, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawAnalyzerOutput {
    News {
        /// -1 (very bearish) to 1 (very bullish).
        sentiment: f64,
        confidence: f64,
        summary: String,
        observed_at: DateTime<Utc>,
    },
    PriceAction {
        /// Momentum oscillator, 0 to 100 with 50 as neutral.
        momentum: f64,
        pattern_confidence: f64,
        reference_price: f64,
        support: f64,
        resistance: f64,
        atr: f64,
        observed_at: DateTime<Utc>,
    },
    OrderFlow {
        bid_volume: f64,
        ask_volume: f64,
        mid_price: f64,
        confidence: f64,
        observed_at: DateTime<Utc>,
    },
}

impl RawAnalyzerOutput {
    pub fn source(&self) -> SignalSource {
        match self {
            Self::News { .. } => SignalSource::News,
            Self::PriceAction { .. } => SignalSource::PriceAction,
            Self::OrderFlow { .. } => SignalSource::OrderFlow,
        }
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        match self {
            Self::News { observed_at, .. }
            | Self::PriceAction { observed_at, .. }
            | Self::OrderFlow { observed_at, .. } => *observed_at,
        }
    }
}
