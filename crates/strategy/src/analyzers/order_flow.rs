use async_trait::async_trait;
use tracing::{debug, warn};

use common::models::{DepthSnapshot, ProcessedData, RawAnalyzerOutput, SignalSource};

use crate::inference::InferenceEngine;
use crate::scorer::{ScoreError, Scorer, data_kind};

const DEFAULT_LEVELS: usize = 20;

/// Order book imbalance over the top levels.
///
/// Confidence comes from the ONNX model when one is loaded. Otherwise it is
/// the imbalance magnitude, discounted for wide spreads.
pub struct OrderFlowScorer {
    engine: InferenceEngine,
    levels: usize,
}

impl OrderFlowScorer {
    pub fn new(engine: InferenceEngine) -> Self {
        Self {
            engine,
            levels: DEFAULT_LEVELS,
        }
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels.max(1);
        self
    }

    /// Feature vector: [imbalance, spread in bps, ln(bid/ask), populated levels].
    fn features(book: &DepthSnapshot, bid: f64, ask: f64, mid: f64) -> Vec<f32> {
        let imbalance = (bid - ask) / (bid + ask);
        let spread_bps = spread_bps(book, mid);
        let depth_ratio = if bid > 0.0 && ask > 0.0 { (bid / ask).ln() } else { 0.0 };
        let populated = book.bids.len().min(book.asks.len()) as f64;
        vec![
            imbalance as f32,
            spread_bps as f32,
            depth_ratio as f32,
            populated as f32,
        ]
    }
}

fn spread_bps(book: &DepthSnapshot, mid: f64) -> f64 {
    match (book.bids.first(), book.asks.first()) {
        (Some(bid), Some(ask)) if mid > 0.0 => (ask.price - bid.price).max(0.0) / mid * 10_000.0,
        _ => 0.0,
    }
}

#[async_trait]
impl Scorer for OrderFlowScorer {
    fn source(&self) -> SignalSource {
        SignalSource::OrderFlow
    }

    async fn score(&self, data: &ProcessedData) -> Result<RawAnalyzerOutput, ScoreError> {
        let ProcessedData::Depth(book) = data else {
            return Err(ScoreError::WrongInput {
                scorer: self.source(),
                got: data_kind(data),
            });
        };
        let Some(mid) = book.mid_price() else {
            return Err(ScoreError::NotEnoughData { needed: 1, got: 0 });
        };

        let (bid_volume, ask_volume) = book.volumes(self.levels);
        let total = bid_volume + ask_volume;
        if total <= 0.0 {
            return Err(ScoreError::NotEnoughData { needed: 1, got: 0 });
        }

        let features = Self::features(book, bid_volume, ask_volume, mid);
        let confidence = match self.engine.predict(&features) {
            Ok(Some(probability)) => f64::from(probability),
            Ok(None) => {
                let imbalance = ((bid_volume - ask_volume) / total).abs();
                let spread_penalty = (spread_bps(book, mid) / 10.0).min(1.0);
                (imbalance * (1.0 - 0.5 * spread_penalty)).clamp(0.0, 1.0)
            }
            Err(e) => {
                warn!("Order flow model failed, skipping reading: {}", e);
                return Err(e.into());
            }
        };

        debug!(
            "{} bid={:.4} ask={:.4} mid={:.4} conf={:.2}",
            book.symbol, bid_volume, ask_volume, mid, confidence
        );

        Ok(RawAnalyzerOutput::OrderFlow {
            bid_volume,
            ask_volume,
            mid_price: mid,
            confidence,
            observed_at: book.observed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::models::BookLevel;

    fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> ProcessedData {
        let level = |&(price, quantity): &(f64, f64)| BookLevel { price, quantity };
        ProcessedData::Depth(DepthSnapshot {
            symbol: "BTCUSDT".to_string(),
            bids: bids.iter().map(level).collect(),
            asks: asks.iter().map(level).collect(),
            observed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn bid_heavy_book_scores_imbalance() {
        let scorer = OrderFlowScorer::new(InferenceEngine::simulated());
        let data = book(&[(99.99, 6.0), (99.98, 3.0)], &[(100.01, 2.0), (100.02, 1.0)]);

        let RawAnalyzerOutput::OrderFlow {
            bid_volume,
            ask_volume,
            mid_price,
            confidence,
            ..
        } = scorer.score(&data).await.unwrap()
        else {
            panic!("expected order flow output");
        };
        assert_eq!(bid_volume, 9.0);
        assert_eq!(ask_volume, 3.0);
        assert!((mid_price - 100.0).abs() < 1e-9);
        // 0.5 imbalance, 2 bps spread costs a tenth of it.
        assert!((confidence - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn level_limit_is_respected() {
        let scorer = OrderFlowScorer::new(InferenceEngine::simulated()).with_levels(1);
        let data = book(&[(99.0, 1.0), (98.0, 100.0)], &[(101.0, 1.0)]);
        let RawAnalyzerOutput::OrderFlow { bid_volume, .. } = scorer.score(&data).await.unwrap() else {
            panic!("expected order flow output");
        };
        assert_eq!(bid_volume, 1.0);
    }

    #[tokio::test]
    async fn one_sided_book_has_no_mid() {
        let scorer = OrderFlowScorer::new(InferenceEngine::simulated());
        let data = book(&[(99.0, 1.0)], &[]);
        assert!(matches!(
            scorer.score(&data).await.unwrap_err(),
            ScoreError::NotEnoughData { .. }
        ));
    }
}
