use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use common::config::FusionConfig;
use common::models::{Direction, Signal, SignalSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContributionStatus {
    Present,
    Missing,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceContribution {
    pub source: SignalSource,
    pub status: ContributionStatus,
    pub weight: f64,
    /// Signed direction times strength, before weighting.
    pub score: f64,
}

/// One cycle's weighted combination of the signals that arrived in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedView {
    pub as_of: DateTime<Utc>,
    pub contributions: Vec<SourceContribution>,
    pub net_score: f64,
    pub net_direction: Direction,
    pub net_confidence: f64,
    pub contributing: usize,
    pub insufficient_evidence: bool,
}

impl FusedView {
    pub fn contribution(&self, source: SignalSource) -> Option<&SourceContribution> {
        self.contributions.iter().find(|c| c.source == source)
    }

    pub fn missing_sources(&self) -> Vec<SignalSource> {
        self.contributions
            .iter()
            .filter(|c| c.status != ContributionStatus::Present)
            .map(|c| c.source)
            .collect()
    }

    /// Short human summary, e.g. `news=+0.72@0.90 price_action=+0.56@0.80 order_flow=missing`.
    pub fn summary(&self) -> String {
        self.contributions
            .iter()
            .map(|c| match c.status {
                ContributionStatus::Present => {
                    format!("{}={:+.2}@{:.2}", c.source, c.score, c.weight)
                }
                ContributionStatus::Missing => format!("{}=missing", c.source),
                ContributionStatus::Stale => format!("{}=stale", c.source),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Linear decay from 1 at the signal's timestamp to 0 at its staleness deadline.
pub fn staleness_decay(signal: &Signal, as_of: DateTime<Utc>) -> f64 {
    let lifetime = (signal.stale_after - signal.timestamp).num_milliseconds();
    if lifetime <= 0 {
        return 0.0;
    }
    let age = (as_of - signal.timestamp).num_milliseconds().max(0);
    (1.0 - age as f64 / lifetime as f64).clamp(0.0, 1.0)
}

/// Fuses the signals present this cycle.
///
/// Each source weighs `confidence * staleness_decay`. Absent or stale sources
/// weigh zero and are listed as such. `net_score` is the weight-averaged
/// signed strength; `net_confidence` is the weighted signed sum divided by the
/// number of contributing sources, forced to zero when fewer than
/// `min_sources` contributed.
pub fn fuse(signals: &[Signal], as_of: DateTime<Utc>, config: &FusionConfig) -> FusedView {
    // Latest signal per source wins.
    let mut latest: BTreeMap<SignalSource, &Signal> = BTreeMap::new();
    for signal in signals {
        match latest.get(&signal.source) {
            Some(existing) if existing.timestamp >= signal.timestamp => {}
            _ => {
                latest.insert(signal.source, signal);
            }
        }
    }

    let mut contributions = Vec::with_capacity(SignalSource::ALL.len());
    let mut weight_sum = 0.0;
    let mut weighted_score = 0.0;
    let mut contributing = 0;

    for source in SignalSource::ALL {
        let contribution = match latest.get(&source) {
            None => SourceContribution {
                source,
                status: ContributionStatus::Missing,
                weight: 0.0,
                score: 0.0,
            },
            Some(signal) if signal.is_stale(as_of) => SourceContribution {
                source,
                status: ContributionStatus::Stale,
                weight: 0.0,
                score: signal.score(),
            },
            Some(signal) => {
                let weight = signal.confidence * staleness_decay(signal, as_of);
                if weight > 0.0 {
                    contributing += 1;
                    weight_sum += weight;
                    weighted_score += weight * signal.score();
                }
                SourceContribution {
                    source,
                    status: ContributionStatus::Present,
                    weight,
                    score: signal.score(),
                }
            }
        };
        contributions.push(contribution);
    }

    let net_score = if weight_sum > 0.0 {
        weighted_score / weight_sum
    } else {
        0.0
    };
    let insufficient_evidence = contributing < config.min_sources;
    let net_confidence = if insufficient_evidence || contributing == 0 {
        0.0
    } else {
        (weighted_score.abs() / contributing as f64).min(1.0)
    };

    FusedView {
        as_of,
        contributions,
        net_score,
        net_direction: Direction::from_score(net_score, config.neutral_epsilon),
        net_confidence,
        contributing,
        insufficient_evidence,
    }
}
