//! Maps each analyzer's native scale onto the canonical signal space.
//!
//! | source       | raw input                          | transform                          |
//! |--------------|------------------------------------|------------------------------------|
//! | News         | sentiment in [-1, 1]               | score = sentiment                  |
//! | PriceAction  | momentum oscillator in [0, 100]    | score = (momentum - 50) / 50       |
//! | OrderFlow    | bid / ask resting volume           | score = (bid - ask) / (bid + ask)  |
//!
//! Direction is the sign of the score and strength its magnitude. Inputs that
//! overshoot their range by no more than `clamp_tolerance` (as a fraction of
//! the range width) are clamped and the signal is marked `adjusted` with its
//! confidence cut by `clamp_confidence_penalty`. Anything further out is an
//! error.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use common::config::NormalizerConfig;
use common::models::{Direction, PriceStructure, RawAnalyzerOutput, Signal, SignalSource};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("{origin} field {field} is not a finite number")]
    NotFinite {
        origin: SignalSource,
        field: &'static str,
    },
    #[error("{origin} field {field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        origin: SignalSource,
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{origin} has no usable price (got {price})")]
    BadPrice { origin: SignalSource, price: f64 },
    #[error("order book is empty on both sides")]
    EmptyBook,
}

/// Clamped input and whether clamping happened.
struct Bounded {
    value: f64,
    clamped: bool,
}

pub struct Normalizer {
    ttl: Duration,
    tolerance: f64,
    penalty: f64,
}

impl Normalizer {
    pub fn new(config: &NormalizerConfig) -> Self {
        Self {
            ttl: Duration::milliseconds(config.signal_ttl.as_millis() as i64),
            tolerance: config.clamp_tolerance,
            penalty: config.clamp_confidence_penalty,
        }
    }

    pub fn normalize(&self, raw: &RawAnalyzerOutput) -> Result<Signal, NormalizationError> {
        let source = raw.source();
        match raw {
            RawAnalyzerOutput::News {
                sentiment,
                confidence,
                observed_at,
                ..
            } => {
                let score = self.bounded(source, "sentiment", *sentiment, -1.0, 1.0)?;
                let conf = self.bounded(source, "confidence", *confidence, 0.0, 1.0)?;
                Ok(self.build(source, score, conf, *observed_at, None, None))
            }
            RawAnalyzerOutput::PriceAction {
                momentum,
                pattern_confidence,
                reference_price,
                support,
                resistance,
                atr,
                observed_at,
            } => {
                let momentum = self.bounded(source, "momentum", *momentum, 0.0, 100.0)?;
                let conf = self.bounded(source, "pattern_confidence", *pattern_confidence, 0.0, 1.0)?;
                let price = positive_price(source, *reference_price)?;
                for (field, value) in [("support", *support), ("resistance", *resistance), ("atr", *atr)] {
                    if !value.is_finite() || value < 0.0 {
                        return Err(NormalizationError::NotFinite { origin: source, field });
                    }
                }
                let score = Bounded {
                    value: (momentum.value - 50.0) / 50.0,
                    clamped: momentum.clamped,
                };
                let structure = PriceStructure {
                    support: *support,
                    resistance: *resistance,
                    atr: *atr,
                };
                Ok(self.build(source, score, conf, *observed_at, Some(price), Some(structure)))
            }
            RawAnalyzerOutput::OrderFlow {
                bid_volume,
                ask_volume,
                mid_price,
                confidence,
                observed_at,
            } => {
                for (field, value) in [("bid_volume", *bid_volume), ("ask_volume", *ask_volume)] {
                    if !value.is_finite() {
                        return Err(NormalizationError::NotFinite { origin: source, field });
                    }
                    if value < 0.0 {
                        return Err(NormalizationError::OutOfRange {
                            origin: source,
                            field,
                            value,
                            min: 0.0,
                            max: f64::INFINITY,
                        });
                    }
                }
                let total = bid_volume + ask_volume;
                if total <= 0.0 {
                    return Err(NormalizationError::EmptyBook);
                }
                let price = positive_price(source, *mid_price)?;
                let conf = self.bounded(source, "confidence", *confidence, 0.0, 1.0)?;
                let score = Bounded {
                    value: (bid_volume - ask_volume) / total,
                    clamped: false,
                };
                Ok(self.build(source, score, conf, *observed_at, Some(price), None))
            }
        }
    }

    fn bounded(
        &self,
        origin: SignalSource,
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<Bounded, NormalizationError> {
        if !value.is_finite() {
            return Err(NormalizationError::NotFinite { origin, field });
        }
        if (min..=max).contains(&value) {
            return Ok(Bounded {
                value,
                clamped: false,
            });
        }
        let slack = (max - min) * self.tolerance;
        if value < min - slack || value > max + slack {
            return Err(NormalizationError::OutOfRange {
                origin,
                field,
                value,
                min,
                max,
            });
        }
        Ok(Bounded {
            value: value.clamp(min, max),
            clamped: true,
        })
    }

    fn build(
        &self,
        source: SignalSource,
        score: Bounded,
        confidence: Bounded,
        observed_at: DateTime<Utc>,
        reference_price: Option<f64>,
        structure: Option<PriceStructure>,
    ) -> Signal {
        let adjusted = score.clamped || confidence.clamped;
        let confidence = if adjusted {
            confidence.value * self.penalty
        } else {
            confidence.value
        };

        Signal {
            source,
            direction: Direction::from_score(score.value, f64::EPSILON),
            strength: score.value.abs().min(1.0),
            confidence,
            timestamp: observed_at,
            stale_after: observed_at + self.ttl,
            adjusted,
            reference_price,
            structure,
        }
    }
}

/// Checks a signal produced elsewhere against the canonical ranges.
pub fn validate(signal: &Signal) -> Result<(), NormalizationError> {
    for (field, value) in [("strength", signal.strength), ("confidence", signal.confidence)] {
        if !value.is_finite() {
            return Err(NormalizationError::NotFinite {
                origin: signal.source,
                field,
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(NormalizationError::OutOfRange {
                origin: signal.source,
                field,
                value,
                min: 0.0,
                max: 1.0,
            });
        }
    }
    if let Some(price) = signal.reference_price {
        positive_price(signal.source, price)?;
    }
    Ok(())
}

fn positive_price(source: SignalSource, price: f64) -> Result<f64, NormalizationError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(NormalizationError::BadPrice { origin: source, price })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(&NormalizerConfig::default())
    }

    fn news(sentiment: f64, confidence: f64) -> RawAnalyzerOutput {
        RawAnalyzerOutput::News {
            sentiment,
            confidence,
            summary: String::new(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn news_sentiment_maps_linearly() {
        let signal = normalizer().normalize(&news(-0.4, 0.7)).unwrap();
        assert_eq!(signal.source, SignalSource::News);
        assert_eq!(signal.direction, Direction::Bearish);
        assert!((signal.strength - 0.4).abs() < 1e-12);
        assert_eq!(signal.confidence, 0.7);
        assert!(!signal.adjusted);
        assert_eq!(signal.stale_after - signal.timestamp, Duration::seconds(120));
    }

    #[test]
    fn slight_overshoot_is_clamped_and_penalised() {
        let signal = normalizer().normalize(&news(1.04, 0.8)).unwrap();
        assert_eq!(signal.direction, Direction::Bullish);
        assert_eq!(signal.strength, 1.0);
        assert!(signal.adjusted);
        assert!((signal.confidence - 0.4).abs() < 1e-12);
    }

    #[test]
    fn large_overshoot_is_rejected() {
        let err = normalizer().normalize(&news(1.5, 0.8)).unwrap_err();
        assert!(matches!(err, NormalizationError::OutOfRange { field: "sentiment", .. }));

        let err = normalizer().normalize(&news(f64::NAN, 0.8)).unwrap_err();
        assert!(matches!(err, NormalizationError::NotFinite { .. }));
    }

    #[test]
    fn momentum_oscillator_is_centered_on_fifty() {
        let raw = RawAnalyzerOutput::PriceAction {
            momentum: 80.0,
            pattern_confidence: 0.6,
            reference_price: 100.0,
            support: 95.0,
            resistance: 110.0,
            atr: 2.0,
            observed_at: Utc::now(),
        };
        let signal = normalizer().normalize(&raw).unwrap();
        assert_eq!(signal.direction, Direction::Bullish);
        assert!((signal.strength - 0.6).abs() < 1e-12);
        assert_eq!(signal.reference_price, Some(100.0));
        assert_eq!(signal.structure.unwrap().support, 95.0);
    }

    #[test]
    fn neutral_momentum_has_no_direction() {
        let raw = RawAnalyzerOutput::PriceAction {
            momentum: 50.0,
            pattern_confidence: 0.6,
            reference_price: 100.0,
            support: 95.0,
            resistance: 110.0,
            atr: 2.0,
            observed_at: Utc::now(),
        };
        let signal = normalizer().normalize(&raw).unwrap();
        assert_eq!(signal.direction, Direction::Neutral);
        assert_eq!(signal.strength, 0.0);
    }

    #[test]
    fn order_imbalance_ratio() {
        let raw = RawAnalyzerOutput::OrderFlow {
            bid_volume: 30.0,
            ask_volume: 10.0,
            mid_price: 50.0,
            confidence: 0.9,
            observed_at: Utc::now(),
        };
        let signal = normalizer().normalize(&raw).unwrap();
        assert_eq!(signal.direction, Direction::Bullish);
        assert!((signal.strength - 0.5).abs() < 1e-12);
        assert_eq!(signal.reference_price, Some(50.0));
    }

    #[test]
    fn malformed_order_flow_fails() {
        let at = Utc::now();
        let empty = RawAnalyzerOutput::OrderFlow {
            bid_volume: 0.0,
            ask_volume: 0.0,
            mid_price: 50.0,
            confidence: 0.9,
            observed_at: at,
        };
        assert_eq!(normalizer().normalize(&empty).unwrap_err(), NormalizationError::EmptyBook);

        let negative = RawAnalyzerOutput::OrderFlow {
            bid_volume: -1.0,
            ask_volume: 3.0,
            mid_price: 50.0,
            confidence: 0.9,
            observed_at: at,
        };
        assert!(normalizer().normalize(&negative).is_err());

        let no_price = RawAnalyzerOutput::OrderFlow {
            bid_volume: 1.0,
            ask_volume: 3.0,
            mid_price: 0.0,
            confidence: 0.9,
            observed_at: at,
        };
        assert!(matches!(
            normalizer().normalize(&no_price).unwrap_err(),
            NormalizationError::BadPrice { .. }
        ));
    }

    #[test]
    fn foreign_signal_is_validated() {
        let mut signal = normalizer().normalize(&news(0.5, 0.5)).unwrap();
        assert!(validate(&signal).is_ok());
        signal.confidence = 1.7;
        assert!(matches!(
            validate(&signal),
            Err(NormalizationError::OutOfRange { field: "confidence", .. })
        ));
    }
}
