use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{BusError, BusMessage, Envelope, MessageBus};

const TOPIC_CAPACITY: usize = 1024;
const RESPONDER_CAPACITY: usize = 64;

/// A request delivered to whoever serves the topic.
#[derive(Debug)]
pub struct Request {
    pub envelope: Envelope,
    reply: oneshot::Sender<BusMessage>,
}

impl Request {
    pub fn payload(&self) -> &BusMessage {
        &self.envelope.payload
    }

    pub fn cycle_id(&self) -> Option<Uuid> {
        self.envelope.cycle_id
    }

    /// Sends the reply. `false` when the requester already gave up.
    pub fn respond(self, payload: BusMessage) -> bool {
        self.reply.send(payload).is_ok()
    }
}

type InFlight = Arc<Mutex<HashSet<(String, Uuid)>>>;

/// Channel-backed bus for components living in one process.
///
/// `publish` fans out through a `broadcast` channel per topic. `request` hands
/// a [`Request`] to the topic's single responder over `mpsc` and waits on a
/// `oneshot` reply, bounded by `tokio::time::timeout`.
pub struct InProcessBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Arc<Envelope>>>>,
    responders: Mutex<HashMap<String, mpsc::Sender<Request>>>,
    in_flight: InFlight,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            responders: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Arc<Envelope>> {
        let mut topics = lock(&self.topics);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Registers the caller as the responder for `topic`, replacing any
    /// previous one. A restarted service simply serves again.
    pub fn serve(&self, topic: &str) -> mpsc::Receiver<Request> {
        let (tx, rx) = mpsc::channel(RESPONDER_CAPACITY);
        if lock(&self.responders).insert(topic.to_string(), tx).is_some() {
            debug!("Responder for {} replaced", topic);
        }
        rx
    }

    fn responder(&self, topic: &str) -> Option<mpsc::Sender<Request>> {
        lock(&self.responders).get(topic).cloned()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: BusMessage) -> Result<usize, BusError> {
        let sender = lock(&self.topics).get(topic).cloned();
        let Some(sender) = sender else {
            return Ok(0);
        };
        // No live receivers is not an error for pub/sub.
        Ok(sender
            .send(Arc::new(Envelope::new(topic, None, payload)))
            .unwrap_or(0))
    }

    async fn request(
        &self,
        topic: &str,
        cycle_id: Uuid,
        payload: BusMessage,
        timeout: Duration,
    ) -> Result<BusMessage, BusError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, topic, cycle_id)?;

        let responder = self
            .responder(topic)
            .ok_or_else(|| BusError::NoResponder(topic.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            envelope: Envelope::new(topic, Some(cycle_id), payload),
            reply: reply_tx,
        };

        let exchange = async {
            responder
                .send(request)
                .await
                .map_err(|_| BusError::Closed(topic.to_string()))?;
            reply_rx
                .await
                .map_err(|_| BusError::Closed(topic.to_string()))
        };

        match time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Request on {} timed out for cycle {}", topic, cycle_id);
                Err(BusError::Timeout {
                    topic: topic.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Marks `(topic, cycle_id)` busy for as long as the request future lives.
struct InFlightGuard {
    set: InFlight,
    key: (String, Uuid),
}

impl InFlightGuard {
    fn acquire(set: &InFlight, topic: &str, cycle_id: Uuid) -> Result<Self, BusError> {
        let key = (topic.to_string(), cycle_id);
        if !lock(set).insert(key.clone()) {
            return Err(BusError::InFlight {
                topic: topic.to_string(),
                cycle_id: cycle_id.to_string(),
            });
        }
        Ok(Self {
            set: set.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
