use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ta::indicators::{AverageTrueRange, BollingerBands, RelativeStrengthIndex};
use ta::{DataItem, Next};
use tracing::debug;

use common::models::{Candle, ProcessedData, RawAnalyzerOutput, SignalSource};

use crate::scorer::{ScoreError, Scorer, data_kind};

const RSI_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_WIDTH: f64 = 2.0;
const ATR_PERIOD: usize = 14;

/// Candle-based momentum reading.
///
/// RSI(14) is the momentum oscillator. Confidence grows with RSI's distance
/// from 50 and is halved when the close sits on the other side of the
/// Bollinger mid-band. Support and resistance are the lowest low and highest
/// high of the lookback window.
pub struct PriceActionScorer {
    lookback: usize,
}

impl PriceActionScorer {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(BB_PERIOD),
        }
    }

    fn indicators(candles: &[Candle]) -> Result<(f64, f64, f64, f64, f64), ScoreError> {
        let mut rsi = RelativeStrengthIndex::new(RSI_PERIOD).map_err(indicator_error)?;
        let mut bb = BollingerBands::new(BB_PERIOD, BB_WIDTH).map_err(indicator_error)?;
        let mut atr = AverageTrueRange::new(ATR_PERIOD).map_err(indicator_error)?;

        let mut rsi_val = 50.0;
        let mut atr_val = 0.0;
        let (mut upper, mut middle, mut lower) = (0.0, 0.0, 0.0);

        for candle in candles {
            rsi_val = rsi.next(candle.close);
            let band = bb.next(candle.close);
            upper = band.upper;
            middle = band.average;
            lower = band.lower;

            let item = DataItem::builder()
                .open(candle.open)
                .high(candle.high)
                .low(candle.low)
                .close(candle.close)
                .volume(candle.volume)
                .build()
                .map_err(indicator_error)?;
            atr_val = atr.next(&item);
        }

        Ok((rsi_val, upper, middle, lower, atr_val))
    }
}

impl Default for PriceActionScorer {
    fn default() -> Self {
        Self::new(BB_PERIOD)
    }
}

#[async_trait]
impl Scorer for PriceActionScorer {
    fn source(&self) -> SignalSource {
        SignalSource::PriceAction
    }

    async fn score(&self, data: &ProcessedData) -> Result<RawAnalyzerOutput, ScoreError> {
        let ProcessedData::Candles { symbol, candles } = data else {
            return Err(ScoreError::WrongInput {
                scorer: self.source(),
                got: data_kind(data),
            });
        };
        if candles.len() < self.lookback {
            return Err(ScoreError::NotEnoughData {
                needed: self.lookback,
                got: candles.len(),
            });
        }
        let Some(last) = candles.last() else {
            return Err(ScoreError::NotEnoughData {
                needed: self.lookback,
                got: 0,
            });
        };

        let (rsi, upper, middle, lower, atr) = Self::indicators(candles)?;

        let window = &candles[candles.len() - self.lookback..];
        let support = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let resistance = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);

        let strength = ((rsi - 50.0) / 50.0).abs();
        let band_agrees = (rsi >= 50.0) == (last.close >= middle);
        let mut confidence = 0.4 + 0.6 * strength;
        if !band_agrees {
            confidence *= 0.5;
        }

        debug!(
            "{} RSI={:.1} BB=[{:.2} {:.2} {:.2}] ATR={:.4} S/R={:.2}/{:.2}",
            symbol, rsi, lower, middle, upper, atr, support, resistance
        );

        Ok(RawAnalyzerOutput::PriceAction {
            momentum: rsi,
            pattern_confidence: confidence.clamp(0.0, 1.0),
            reference_price: last.close,
            support,
            resistance,
            atr,
            observed_at: close_time(last),
        })
    }
}

fn close_time(candle: &Candle) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(candle.close_time).unwrap_or_else(Utc::now)
}

fn indicator_error(err: ta::errors::TaError) -> ScoreError {
    ScoreError::Indicator(format!("{:?}", err))
}
