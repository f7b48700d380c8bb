use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    pub ticks_fired: u64,
    pub ticks_dropped: u64,
    /// Cycles that panicked.
    pub faults: u64,
    pub max_lateness: Duration,
}

/// Fixed-interval trigger for decision cycles.
///
/// Ticks are spaced `interval` apart from the start of the previous tick, so
/// cycle duration does not accumulate as drift. Cycles never overlap: ticks
/// that fall due while a cycle is still running are dropped and counted, and
/// if any were dropped the next cycle starts as soon as the slow one ends.
pub struct Scheduler {
    interval: Duration,
}

pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Fires the first cycle immediately. Each cycle runs in its own task so a
    /// panic only costs that cycle.
    pub fn start<F, Fut>(self, cycle: F) -> SchedulerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let task = tokio::spawn(Self::run(self.interval, cycle, stop_rx, stats.clone()));
        SchedulerHandle {
            stop_tx,
            task,
            stats,
        }
    }

    async fn run<F, Fut>(
        interval: Duration,
        cycle: F,
        mut stop_rx: watch::Receiver<bool>,
        stats: Arc<Mutex<SchedulerStats>>,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!("Scheduler started, interval {:?}", interval);
        let mut next = Instant::now();

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = time::sleep_until(next) => {}
            }

            let fired_at = Instant::now();
            {
                let mut s = lock(&stats);
                s.ticks_fired += 1;
                s.max_lateness = s.max_lateness.max(fired_at.saturating_duration_since(next));
            }

            if let Err(e) = tokio::spawn(cycle()).await {
                if e.is_panic() {
                    error!("Cycle panicked, continuing with the next tick");
                    lock(&stats).faults += 1;
                } else {
                    warn!("Cycle task cancelled: {}", e);
                }
            }

            let elapsed = fired_at.elapsed();
            let dropped = ticks_missed(elapsed, interval);
            if dropped > 0 {
                warn!(
                    "Cycle took {:?}, dropped {} tick(s); firing again now",
                    elapsed, dropped
                );
                lock(&stats).ticks_dropped += dropped;
                next = Instant::now();
            } else {
                next = fired_at + interval;
                debug!("Next tick in {:?}", next.saturating_duration_since(Instant::now()));
            }

            if *stop_rx.borrow() {
                break;
            }
        }
        info!("Scheduler stopped.");
    }
}

/// Ticks strictly inside `elapsed` after the one that started the cycle.
fn ticks_missed(elapsed: Duration, interval: Duration) -> u64 {
    let elapsed = elapsed.as_nanos();
    let interval = interval.as_nanos();
    if elapsed == 0 {
        return 0;
    }
    (elapsed.div_ceil(interval) - 1) as u64
}

impl SchedulerHandle {
    pub fn stats(&self) -> SchedulerStats {
        lock(&self.stats).clone()
    }

    /// Lets a running cycle finish, then stops ticking.
    pub async fn stop(self) -> SchedulerStats {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task failed: {}", e);
        }
        lock(&self.stats).clone()
    }
}

fn lock(stats: &Mutex<SchedulerStats>) -> MutexGuard<'_, SchedulerStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
