use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, error, info};

use common::models::{Candle, DepthSnapshot};

use super::{DepthResponse, KlineRow};

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("binance answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("cannot parse {field} from {value:?}")]
    Parse { field: &'static str, value: String },
    #[error("signed endpoint needs BINANCE_API_KEY and BINANCE_SECRET_KEY")]
    MissingCredentials,
    #[error("invalid signing key")]
    BadKey,
}

#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    #[serde(rename = "executedQty")]
    pub executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty")]
    pub cummulative_quote_qty: String,
}

impl OrderResponse {
    pub fn filled_quantity(&self) -> Result<f64, RemoteError> {
        super::parse_decimal("executedQty", &self.executed_qty)
    }

    /// Average fill price, or `None` when nothing executed.
    pub fn average_price(&self) -> Result<Option<f64>, RemoteError> {
        let qty = super::parse_decimal("executedQty", &self.executed_qty)?;
        let quote = super::parse_decimal("cummulativeQuoteQty", &self.cummulative_quote_qty)?;
        Ok((qty > 0.0).then(|| quote / qty))
    }
}

#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    secret_key: Option<String>,
}

impl BinanceClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        secret_key: Option<String>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent("signal_fusion_bot/0.1.0")
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
        })
    }

    fn sign(&self, query: &str) -> Result<String, RemoteError> {
        let secret = self.secret_key.as_deref().ok_or(RemoteError::MissingCredentials)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| RemoteError::BadKey)?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, RemoteError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!("GET {}", url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            error!("Binance {} failed: {}", path, body);
            return Err(RemoteError::Status { status, body });
        }
        Ok(resp.json::<T>().await?)
    }

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Candle>, RemoteError> {
        let query = format!(
            "symbol={}&interval={}&limit={}",
            symbol.to_uppercase(),
            interval,
            limit
        );
        let rows: Vec<KlineRow> = self.get_public("/api/v3/klines", &query).await?;
        rows.iter().map(KlineRow::to_candle).collect()
    }

    pub async fn get_depth(&self, symbol: &str, limit: u16) -> Result<DepthSnapshot, RemoteError> {
        let query = format!("symbol={}&limit={}", symbol.to_uppercase(), limit);
        let depth: DepthResponse = self.get_public("/api/v3/depth", &query).await?;
        depth.to_snapshot(symbol)
    }

    /// Signed MARKET order. `client_order_id` makes resends of the same
    /// intent collapse into one order on the exchange.
    pub async fn post_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<OrderResponse, RemoteError> {
        let api_key = self.api_key.as_deref().ok_or(RemoteError::MissingCredentials)?;
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}&timestamp={}",
            symbol.to_uppercase(),
            side,
            quantity,
            client_order_id,
            Utc::now().timestamp_millis()
        );

        let signature = self.sign(&params)?;
        let url = format!("{}/api/v3/order?{}&signature={}", self.base_url, params, signature);

        info!("Placing Order: {} {} {}", side, quantity, symbol);

        let resp = self
            .client
            .request(Method::POST, &url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            error!("Binance Order Failed: {}", body);
            return Err(RemoteError::Status { status, body });
        }

        Ok(resp.json::<OrderResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_binance_reference() {
        // Example from the Binance signed endpoint documentation.
        let client = BinanceClient::new(
            "https://api.binance.com",
            Some("key".to_string()),
            Some("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".to_string()),
        )
        .unwrap();
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signing_without_secret_fails() {
        let client = BinanceClient::new("https://api.binance.com", None, None).unwrap();
        assert!(matches!(client.sign("a=1"), Err(RemoteError::MissingCredentials)));
    }

    #[test]
    fn average_fill_price() {
        let resp = OrderResponse {
            order_id: 1,
            symbol: "BTCUSDT".to_string(),
            status: "FILLED".to_string(),
            executed_qty: "0.5".to_string(),
            cummulative_quote_qty: "50000.0".to_string(),
        };
        assert_eq!(resp.average_price().unwrap(), Some(100_000.0));
    }
}
