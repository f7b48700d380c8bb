use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no reply on {topic} within {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },
    #[error("a request for {topic} is already in flight for cycle {cycle_id}")]
    InFlight { topic: String, cycle_id: String },
    #[error("nobody serves {0}")]
    NoResponder(String),
    #[error("responder for {0} went away")]
    Closed(String),
}

impl BusError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
