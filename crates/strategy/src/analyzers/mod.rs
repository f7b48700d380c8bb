//! Per-source scorers. Each reads the data its fetcher produced and reports
//! in the source's native scale; the normalizer does the rest.

pub mod news;
pub mod order_flow;
pub mod price_action;

pub use news::LlmNewsScorer;
pub use order_flow::OrderFlowScorer;
pub use price_action::PriceActionScorer;
