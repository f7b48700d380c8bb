use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use common::models::{ProcessedData, SignalSource};

use crate::remote::BinanceClient;
use crate::traits::{FetchError, Fetcher};

/// Recent candles from `/api/v3/klines`.
pub struct KlinesFetcher {
    client: Arc<BinanceClient>,
    interval: String,
    limit: u16,
}

impl KlinesFetcher {
    pub fn new(client: Arc<BinanceClient>, interval: &str, limit: u16) -> Self {
        Self {
            client,
            interval: interval.to_string(),
            limit,
        }
    }
}

#[async_trait]
impl Fetcher for KlinesFetcher {
    fn source(&self) -> SignalSource {
        SignalSource::PriceAction
    }

    async fn fetch_and_process(&self, symbol: &str) -> Result<ProcessedData, FetchError> {
        let mut candles = self.client.get_klines(symbol, &self.interval, self.limit).await?;
        // The last row is the candle still forming.
        if candles.len() > 1 {
            candles.pop();
        }
        if candles.is_empty() {
            return Err(FetchError::NoData(self.source()));
        }
        debug!("Fetched {} {} candles for {}", candles.len(), self.interval, symbol);
        Ok(ProcessedData::Candles {
            symbol: symbol.to_uppercase(),
            candles,
        })
    }
}

/// Order book snapshot from `/api/v3/depth`.
pub struct DepthFetcher {
    client: Arc<BinanceClient>,
    limit: u16,
}

impl DepthFetcher {
    pub fn new(client: Arc<BinanceClient>, limit: u16) -> Self {
        Self { client, limit }
    }
}

#[async_trait]
impl Fetcher for DepthFetcher {
    fn source(&self) -> SignalSource {
        SignalSource::OrderFlow
    }

    async fn fetch_and_process(&self, symbol: &str) -> Result<ProcessedData, FetchError> {
        let snapshot = self.client.get_depth(symbol, self.limit).await?;
        if snapshot.bids.is_empty() && snapshot.asks.is_empty() {
            return Err(FetchError::NoData(self.source()));
        }
        Ok(ProcessedData::Depth(snapshot))
    }
}
