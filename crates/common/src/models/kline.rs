use serde::{Deserialize, Serialize};

/// A closed candlestick, prices already parsed from the exchange's strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub no_of_trades: u64,
    pub taker_buy_vol: f64,
}
