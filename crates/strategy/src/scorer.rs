use async_trait::async_trait;
use thiserror::Error;

use common::models::{ProcessedData, RawAnalyzerOutput, SignalSource};

use crate::inference::InferenceError;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("{scorer} cannot score {got} data")]
    WrongInput {
        scorer: SignalSource,
        got: &'static str,
    },
    #[error("need at least {needed} data points, got {got}")]
    NotEnoughData { needed: usize, got: usize },
    #[error("indicator setup failed: {0}")]
    Indicator(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm answered with status {status}: {body}")]
    LlmStatus { status: u16, body: String },
    #[error("llm answer is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("llm answer has no content")]
    EmptyAnswer,
    #[error("no llm api key configured")]
    MissingApiKey,
}

/// Turns one source's processed data into its native-scale reading.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn source(&self) -> SignalSource;

    async fn score(&self, data: &ProcessedData) -> Result<RawAnalyzerOutput, ScoreError>;
}

pub(crate) fn data_kind(data: &ProcessedData) -> &'static str {
    match data {
        ProcessedData::Candles { .. } => "candle",
        ProcessedData::Depth(_) => "depth",
        ProcessedData::News(_) => "news",
    }
}
