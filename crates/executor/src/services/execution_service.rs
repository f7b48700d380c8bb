use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use bus::{BusMessage, InProcessBus, topics};
use common::actors::{Actor, ActorType, ControlMessage};
use common::models::{ExecutionAck, TradeIntent};
use market_data::{BinanceClient, RemoteError};

const REPLY_CACHE: usize = 256;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("order accepted but nothing filled")]
    NothingFilled,
    #[error("cannot execute intent: {0}")]
    InvalidIntent(String),
}

/// Turns a trade intent into a fill.
#[async_trait]
pub trait Trader: Send + Sync {
    async fn execute(&self, intent: &TradeIntent) -> Result<ExecutionAck, ExecutionError>;
}

fn check(intent: &TradeIntent) -> Result<f64, ExecutionError> {
    if intent.is_hold() || intent.order_side() == "NONE" {
        return Err(ExecutionError::InvalidIntent(format!("{:?} is not tradable", intent.action)));
    }
    if !intent.size.is_finite() || intent.size <= 0.0 {
        return Err(ExecutionError::InvalidIntent(format!("size {}", intent.size)));
    }
    intent
        .reference_price
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| ExecutionError::InvalidIntent("no reference price".to_string()))
}

/// Fills every order in full at its reference price.
pub struct PaperTrader;

#[async_trait]
impl Trader for PaperTrader {
    async fn execute(&self, intent: &TradeIntent) -> Result<ExecutionAck, ExecutionError> {
        let price = check(intent)?;
        info!(
            "PAPER {} {:.6} {} @ {:.2}",
            intent.order_side(),
            intent.size,
            intent.symbol,
            price
        );
        Ok(ExecutionAck {
            cycle_id: intent.cycle_id,
            order_id: format!("paper-{}", intent.cycle_id),
            filled_size: intent.size,
            fill_price: price,
            acked_at: Utc::now(),
        })
    }
}

/// Market orders on Binance spot. The cycle id doubles as the client order
/// id, so the exchange rejects a second order for the same intent.
pub struct BinanceTrader {
    client: Arc<BinanceClient>,
}

impl BinanceTrader {
    pub fn new(client: Arc<BinanceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Trader for BinanceTrader {
    async fn execute(&self, intent: &TradeIntent) -> Result<ExecutionAck, ExecutionError> {
        let reference = check(intent)?;
        let quantity = (intent.size * 1e6).floor() / 1e6;
        if quantity <= 0.0 {
            return Err(ExecutionError::InvalidIntent(format!("size {} rounds to zero", intent.size)));
        }

        let order = self
            .client
            .post_order(
                &intent.symbol,
                intent.order_side(),
                quantity,
                &intent.cycle_id.simple().to_string(),
            )
            .await?;
        info!("ORDER EXECUTED: ID={}, Status={}", order.order_id, order.status);

        let filled = order.filled_quantity()?;
        if filled <= 0.0 {
            return Err(ExecutionError::NothingFilled);
        }
        Ok(ExecutionAck {
            cycle_id: intent.cycle_id,
            order_id: order.order_id.to_string(),
            filled_size: filled,
            fill_price: order.average_price()?.unwrap_or(reference),
            acked_at: Utc::now(),
        })
    }
}

/// Last replies by cycle, so a resent intent is answered without trading twice.
struct ReplyCache {
    replies: HashMap<Uuid, BusMessage>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl ReplyCache {
    fn new(capacity: usize) -> Self {
        Self {
            replies: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, cycle_id: &Uuid) -> Option<&BusMessage> {
        self.replies.get(cycle_id)
    }

    fn insert(&mut self, cycle_id: Uuid, reply: BusMessage) {
        if self.replies.insert(cycle_id, reply).is_none() {
            self.order.push_back(cycle_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.replies.remove(&oldest);
            }
        }
    }
}

/// Serves `execution` requests one at a time.
pub struct ExecutionService {
    id: Uuid,
    bus: Arc<InProcessBus>,
    trader: Arc<dyn Trader>,
    replies: ReplyCache,
}

impl ExecutionService {
    pub fn new(bus: Arc<InProcessBus>, trader: Arc<dyn Trader>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bus,
            trader,
            replies: ReplyCache::new(REPLY_CACHE),
        }
    }

    async fn reply_to(&mut self, payload: &BusMessage) -> BusMessage {
        let intent = match payload {
            BusMessage::Dispatch(intent) => intent,
            other => {
                return BusMessage::ExecutionFailed {
                    reason: format!("unexpected {}", other.kind()),
                };
            }
        };

        if let Some(cached) = self.replies.get(&intent.cycle_id) {
            warn!("Intent for cycle {} already handled, replaying reply", intent.cycle_id);
            return cached.clone();
        }

        info!("RECEIVED INTENT: {:?} {} - Executing...", intent.action, intent.symbol);
        let reply = match self.trader.execute(intent).await {
            Ok(ack) => BusMessage::Ack(ack),
            Err(e) => {
                error!("ORDER FAILED: {}", e);
                BusMessage::ExecutionFailed {
                    reason: e.to_string(),
                }
            }
        };
        self.replies.insert(intent.cycle_id, reply.clone());
        reply
    }
}

#[async_trait]
impl Actor for ExecutionService {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::ExecutionResponder
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        let mut requests = self.bus.serve(topics::EXECUTION);
        info!("Starting Execution Service");

        while let Some(request) = requests.recv().await {
            let reply = self.reply_to(request.payload()).await;
            if !request.respond(reply) {
                warn!("Execution reply dropped, dispatcher already gave up");
            }
        }

        heartbeat_handle.abort();
        bail!("execution request channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::MessageBus;
    use common::models::{Side, TradeAction};
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Exchange {}

        #[async_trait]
        impl Trader for Exchange {
            async fn execute(&self, intent: &TradeIntent) -> Result<ExecutionAck, ExecutionError>;
        }
    }

    fn open_long(cycle_id: Uuid) -> TradeIntent {
        TradeIntent {
            cycle_id,
            action: TradeAction::Open,
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            size: 0.25,
            reference_price: Some(100.0),
            stop_price: Some(95.0),
            target_price: Some(110.0),
            close_reason: None,
            rationale: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn paper_fills_at_reference_price() {
        let intent = open_long(Uuid::new_v4());
        let ack = PaperTrader.execute(&intent).await.unwrap();
        assert_eq!(ack.cycle_id, intent.cycle_id);
        assert_eq!(ack.filled_size, 0.25);
        assert_eq!(ack.fill_price, 100.0);
    }

    #[tokio::test]
    async fn hold_is_not_tradable() {
        let intent = TradeIntent::hold(Uuid::new_v4(), "BTCUSDT", "nothing to do");
        assert!(matches!(
            PaperTrader.execute(&intent).await,
            Err(ExecutionError::InvalidIntent(_))
        ));
    }

    #[tokio::test]
    async fn resent_intent_trades_once() {
        let mut exchange = MockExchange::new();
        exchange.expect_execute().times(1).returning(|intent| {
            Ok(ExecutionAck {
                cycle_id: intent.cycle_id,
                order_id: "42".to_string(),
                filled_size: intent.size,
                fill_price: 101.0,
                acked_at: Utc::now(),
            })
        });

        let bus = Arc::new(InProcessBus::new());
        let mut service = ExecutionService::new(bus.clone(), Arc::new(exchange));
        let (tx, _rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move { service.run(tx).await });

        let cycle_id = Uuid::new_v4();
        let mut replies = Vec::new();
        for _ in 0..2 {
            let mut reply = None;
            for _ in 0..50 {
                match bus
                    .request(
                        topics::EXECUTION,
                        cycle_id,
                        BusMessage::Dispatch(open_long(cycle_id)),
                        Duration::from_secs(1),
                    )
                    .await
                {
                    Ok(r) => {
                        reply = Some(r);
                        break;
                    }
                    Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
            replies.push(reply.unwrap());
        }

        assert_eq!(replies[0], replies[1]);
        assert!(matches!(&replies[0], BusMessage::Ack(ack) if ack.order_id == "42"));
        handle.abort();
    }

    #[tokio::test]
    async fn failure_is_reported_and_remembered() {
        let mut exchange = MockExchange::new();
        exchange
            .expect_execute()
            .times(1)
            .returning(|_| Err(ExecutionError::NothingFilled));

        let mut service = ExecutionService::new(Arc::new(InProcessBus::new()), Arc::new(exchange));
        let cycle_id = Uuid::new_v4();
        let dispatch = BusMessage::Dispatch(open_long(cycle_id));

        let first = service.reply_to(&dispatch).await;
        let second = service.reply_to(&dispatch).await;
        assert!(matches!(first, BusMessage::ExecutionFailed { .. }));
        assert_eq!(first, second);
    }

    #[test]
    fn reply_cache_evicts_oldest() {
        let mut cache = ReplyCache::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            cache.insert(*id, BusMessage::ExecutionFailed { reason: "x".to_string() });
        }
        assert!(cache.get(&ids[0]).is_none());
        assert!(cache.get(&ids[2]).is_some());
    }
}
