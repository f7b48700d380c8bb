use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use bus::{BusMessage, Envelope};
use common::actors::{Actor, ActorType, ControlMessage};
use common::models::{NewsItem, ProcessedData, SignalSource};

use crate::traits::{FetchError, Fetcher};

/// Bounded buffer of the latest news messages.
///
/// Filled by [`NewsCollector`] from `raw_news` publications; read as a
/// [`Fetcher`] that hands out the most recent `sample` items.
#[derive(Clone)]
pub struct NewsFeed {
    buffer: Arc<Mutex<VecDeque<NewsItem>>>,
    capacity: usize,
    sample: usize,
}

impl NewsFeed {
    pub fn new(capacity: usize, sample: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            sample: sample.clamp(1, capacity),
        }
    }

    pub fn push(&self, item: NewsItem) {
        let mut buffer = self.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn recent(&self) -> Vec<NewsItem> {
        let buffer = self.lock();
        let skip = buffer.len().saturating_sub(self.sample);
        buffer.iter().skip(skip).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<NewsItem>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Fetcher for NewsFeed {
    fn source(&self) -> SignalSource {
        SignalSource::News
    }

    async fn fetch_and_process(&self, _symbol: &str) -> Result<ProcessedData, FetchError> {
        let items = self.recent();
        if items.is_empty() {
            return Err(FetchError::NoData(SignalSource::News));
        }
        Ok(ProcessedData::News(items))
    }
}

/// Moves `raw_news` publications into the [`NewsFeed`].
pub struct NewsCollector {
    id: Uuid,
    feed: NewsFeed,
    news_rx: broadcast::Receiver<Arc<Envelope>>,
}

impl NewsCollector {
    pub fn new(feed: NewsFeed, news_rx: broadcast::Receiver<Arc<Envelope>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            feed,
            news_rx,
        }
    }
}

#[async_trait]
impl Actor for NewsCollector {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::NewsCollector
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        info!("Starting News Collector");

        loop {
            match self.news_rx.recv().await {
                Ok(envelope) => match &envelope.payload {
                    BusMessage::News(item) => {
                        self.feed.push(item.clone());
                        debug!("Buffered news from {} ({} held)", item.channel, self.feed.len());
                    }
                    other => warn!("Unexpected {} on raw_news", other.kind()),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("News collector lagged: missed {} messages", n);
                }
                Err(_) => {
                    heartbeat_handle.abort();
                    supervisor_tx
                        .send(ControlMessage::Error(
                            self.id,
                            format!("{:?}: raw_news channel closed unexpectedly.", self.name()),
                        ))
                        .await?;
                    bail!("raw_news channel closed unexpectedly.");
                }
            }
        }
    }
}
