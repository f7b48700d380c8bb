pub mod analyzer;
pub mod cycle;
pub mod intent;
pub mod kline;
pub mod news;
pub mod orderbook;
pub mod position;
pub mod risk;
pub mod signal;

pub use analyzer::{ProcessedData, RawAnalyzerOutput};
pub use cycle::{CoreSnapshot, CycleOutcome, CycleRecord, ExecutionResult, MissingSignal};
pub use intent::{CloseReason, ExecutionAck, TradeAction, TradeIntent};
pub use kline::Candle;
pub use news::{NewsItem, NewsKind};
pub use orderbook::{BookLevel, DepthSnapshot};
pub use position::{Position, PositionPhase, Side};
pub use risk::{HaltReason, RiskState};
pub use signal::{Direction, PriceStructure, Signal, SignalSource};
