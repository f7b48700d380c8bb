pub mod binance_client;
pub mod kline_response;
pub mod orderbook_response;

pub use binance_client::{BinanceClient, OrderResponse, RemoteError};
pub use kline_response::KlineRow;
pub use orderbook_response::DepthResponse;

pub(crate) fn parse_decimal(field: &'static str, raw: &str) -> Result<f64, RemoteError> {
    raw.parse::<f64>().map_err(|_| RemoteError::Parse {
        field,
        value: raw.to_string(),
    })
}
