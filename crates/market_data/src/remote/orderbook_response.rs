use chrono::Utc;
use serde::Deserialize;

use common::models::{BookLevel, DepthSnapshot};

use super::parse_decimal;
use crate::remote::RemoteError;

#[derive(Deserialize, Debug)]
pub struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl DepthResponse {
    pub fn to_snapshot(&self, symbol: &str) -> Result<DepthSnapshot, RemoteError> {
        Ok(DepthSnapshot {
            symbol: symbol.to_uppercase(),
            bids: Self::levels(&self.bids)?,
            asks: Self::levels(&self.asks)?,
            observed_at: Utc::now(),
        })
    }

    fn levels(items: &[[String; 2]]) -> Result<Vec<BookLevel>, RemoteError> {
        items
            .iter()
            .map(|[price, quantity]| {
                Ok(BookLevel {
                    price: parse_decimal("price", price)?,
                    quantity: parse_decimal("quantity", quantity)?,
                })
            })
            .collect()
    }
}
