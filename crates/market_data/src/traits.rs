use async_trait::async_trait;
use thiserror::Error;

use common::models::{ProcessedData, SignalSource};

use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("no {0} data available yet")]
    NoData(SignalSource),
}

/// Pulls and pre-processes one source's data for a symbol.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn source(&self) -> SignalSource;

    async fn fetch_and_process(&self, symbol: &str) -> Result<ProcessedData, FetchError>;
}
