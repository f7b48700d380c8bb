pub mod analyzers;
pub mod decision_core;
pub mod fusion;
pub mod inference;
pub mod normalizer;
pub mod scorer;
pub mod sizing;

pub use decision_core::{Decision, DecisionCore, DecisionError, HoldReason, Transition};
pub use fusion::{FusedView, fuse};
pub use normalizer::{NormalizationError, Normalizer, validate};
pub use scorer::{ScoreError, Scorer};
