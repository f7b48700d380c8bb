use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use bus::{BusMessage, Envelope};
use common::actors::{Actor, ActorType, ControlMessage};
use common::models::{CycleOutcome, CycleRecord, ExecutionResult};

/// Message for a cycle worth a notification: a confirmed trade, a dispatch
/// that failed or went unanswered, and the first cycle of a halt.
pub fn render(record: &CycleRecord, was_halted: bool) -> Option<String> {
    let intent = &record.intent_emitted;
    let body = match (&record.outcome, &record.execution_result) {
        (CycleOutcome::Confirmed, ExecutionResult::Confirmed(ack)) => format!(
            "{:?} {:?} {} {:.6} @ {:.2}\norder {}\n{}",
            intent.action, intent.side, record.symbol, ack.filled_size, ack.fill_price, ack.order_id, intent.rationale
        ),
        (CycleOutcome::Rejected, ExecutionResult::Rejected(reason)) => format!(
            "{:?} {} rejected: {}",
            intent.action, record.symbol, reason
        ),
        (CycleOutcome::Unconfirmed, _) => format!(
            "{:?} {} unconfirmed, no acknowledgment before the deadline. Check the exchange.",
            intent.action, record.symbol
        ),
        (CycleOutcome::Halted, _) if !was_halted => {
            format!("Trading halted on {}: {}", record.symbol, intent.rationale)
        }
        _ => return None,
    };
    Some(format!("[{}] {}", record.cycle_id, body))
}

/// Sends cycle notifications to one Telegram chat.
pub struct TelegramService {
    id: Uuid,
    bot: Bot,
    chat_id: ChatId,
    records_rx: broadcast::Receiver<Arc<Envelope>>,
    was_halted: bool,
}

impl TelegramService {
    pub fn new(bot: Bot, chat_id: i64, records_rx: broadcast::Receiver<Arc<Envelope>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot,
            chat_id: ChatId(chat_id),
            records_rx,
            was_halted: false,
        }
    }

    async fn notify(&mut self, record: &CycleRecord) {
        let message = render(record, self.was_halted);
        self.was_halted = record.outcome == CycleOutcome::Halted;

        if let Some(msg) = message {
            // Send message and log error if it fails, but don't crash
            if let Err(e) = self.bot.send_message(self.chat_id, msg).await {
                error!("Failed to send Telegram message: {}", e);
            }
        }
    }
}

#[async_trait]
impl Actor for TelegramService {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::Notifier
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        info!("Starting Telegram Notification Service");

        loop {
            match self.records_rx.recv().await {
                Ok(envelope) => {
                    if let BusMessage::Cycle(record) = &envelope.payload {
                        self.notify(record).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Telegram service lagged behind. Missed {} records.", n);
                }
                Err(_) => {
                    heartbeat_handle.abort();
                    bail!("cycle record channel closed");
                }
            }
        }
    }
}
