use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bus::{BusMessage, InProcessBus, Request};
use common::actors::{Actor, ActorType, ControlMessage};
use common::models::{Signal, SignalSource};
use market_data::{FetchError, Fetcher};
use strategy::{NormalizationError, Normalizer, ScoreError, Scorer};

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("scoring failed: {0}")]
    Score(#[from] ScoreError),
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizationError),
}

/// Fetch, score and normalize one signal for `symbol`.
pub async fn produce(
    fetcher: &dyn Fetcher,
    scorer: &dyn Scorer,
    normalizer: &Normalizer,
    symbol: &str,
) -> Result<Signal, SignalError> {
    let data = fetcher.fetch_and_process(symbol).await?;
    let raw = scorer.score(&data).await?;
    Ok(normalizer.normalize(&raw)?)
}

/// Answers signal requests for one source on `signal.<source>`.
///
/// Each request is served in its own task, so a slow upstream only delays
/// the cycle that asked. Failures are answered with `SignalUnavailable`
/// rather than left to time out.
pub struct SignalService {
    id: Uuid,
    actor_type: ActorType,
    bus: Arc<InProcessBus>,
    fetcher: Arc<dyn Fetcher>,
    scorer: Arc<dyn Scorer>,
    normalizer: Arc<Normalizer>,
}

impl SignalService {
    pub fn new(
        actor_type: ActorType,
        bus: Arc<InProcessBus>,
        fetcher: Arc<dyn Fetcher>,
        scorer: Arc<dyn Scorer>,
        normalizer: Arc<Normalizer>,
    ) -> Self {
        if fetcher.source() != scorer.source() {
            warn!(
                "{:?} pairs a {} fetcher with a {} scorer",
                actor_type,
                fetcher.source(),
                scorer.source()
            );
        }
        Self {
            id: Uuid::new_v4(),
            actor_type,
            bus,
            fetcher,
            scorer,
            normalizer,
        }
    }

    pub fn source(&self) -> SignalSource {
        self.scorer.source()
    }

    fn handle(&self, request: Request) {
        let source = self.source();
        let symbol = match request.payload() {
            BusMessage::SignalRequest { symbol } => symbol.clone(),
            other => {
                warn!("{} responder got unexpected {}", source, other.kind());
                let reason = format!("unexpected {}", other.kind());
                request.respond(BusMessage::SignalUnavailable { source, reason });
                return;
            }
        };

        let fetcher = self.fetcher.clone();
        let scorer = self.scorer.clone();
        let normalizer = self.normalizer.clone();
        tokio::spawn(async move {
            let reply = match produce(fetcher.as_ref(), scorer.as_ref(), &normalizer, &symbol).await {
                Ok(signal) => {
                    debug!(
                        "{} signal for {}: {:?} {:.2}@{:.2}",
                        source, symbol, signal.direction, signal.strength, signal.confidence
                    );
                    BusMessage::Signal(signal)
                }
                Err(e) => {
                    warn!("{} signal unavailable for {}: {}", source, symbol, e);
                    BusMessage::SignalUnavailable {
                        source,
                        reason: e.to_string(),
                    }
                }
            };
            if !request.respond(reply) {
                debug!("{} reply dropped, requester gave up", source);
            }
        });
    }
}

#[async_trait]
impl Actor for SignalService {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        self.actor_type
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        let topic = self.source().topic();
        let mut requests = self.bus.serve(topic);
        info!("Serving {}", topic);

        while let Some(request) = requests.recv().await {
            self.handle(request);
        }

        heartbeat_handle.abort();
        supervisor_tx
            .send(ControlMessage::Error(
                self.id,
                format!("{:?}: {} responder replaced or closed.", self.name(), topic),
            ))
            .await?;
        bail!("{} request channel closed", topic);
    }
}
