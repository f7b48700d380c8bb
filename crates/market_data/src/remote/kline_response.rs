use serde::Deserialize;

use common::models::Candle;

use super::parse_decimal;
use crate::remote::RemoteError;

/// One row of `/api/v3/klines`: a positional array with prices as strings.
#[derive(Deserialize, Debug)]
pub struct KlineRow(
    pub i64,    // open time
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub i64,    // close time
    pub String, // quote asset volume
    pub u64,    // number of trades
    pub String, // taker buy base volume
    pub String, // taker buy quote volume
    pub serde_json::Value, // unused
);

impl KlineRow {
    pub fn to_candle(&self) -> Result<Candle, RemoteError> {
        Ok(Candle {
            open_time: self.0,
            close_time: self.6,
            open: parse_decimal("open", &self.1)?,
            high: parse_decimal("high", &self.2)?,
            low: parse_decimal("low", &self.3)?,
            close: parse_decimal("close", &self.4)?,
            volume: parse_decimal("volume", &self.5)?,
            no_of_trades: self.8,
            taker_buy_vol: parse_decimal("taker_buy_vol", &self.9)?,
        })
    }
}
