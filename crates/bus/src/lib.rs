//! Coordination contract between the cycle orchestrator, the signal
//! responders and execution.
//!
//! Any transport is acceptable as long as it honours three rules: delivery is
//! scoped to a topic, a `(topic, cycle_id)` pair never has more than one
//! request in flight, and every request resolves within its timeout, either
//! with a reply or with [`BusError::Timeout`].

pub mod error;
pub mod in_process;
pub mod message;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

pub use error::BusError;
pub use in_process::{InProcessBus, Request};
pub use message::{BusMessage, Envelope, topics};

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget delivery to every current subscriber of `topic`.
    /// Returns how many subscribers received it.
    async fn publish(&self, topic: &str, payload: BusMessage) -> Result<usize, BusError>;

    async fn request(
        &self,
        topic: &str,
        cycle_id: Uuid,
        payload: BusMessage,
        timeout: Duration,
    ) -> Result<BusMessage, BusError>;
}
