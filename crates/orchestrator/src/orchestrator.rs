//! One decision cycle, end to end.
//!
//! Collect signals from every source concurrently, decide, dispatch a
//! non-hold intent, commit on acknowledgment, then write exactly one
//! [`CycleRecord`]. Source failures of any kind only make that source
//! missing; nothing here aborts a cycle.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use bus::{BusMessage, MessageBus, topics};
use common::config::CycleConfig;
use common::models::{
    CoreSnapshot, CycleOutcome, CycleRecord, ExecutionResult, HaltReason, MissingSignal, Signal,
    SignalSource,
};
use storage::CycleStore;
use strategy::{Decision, DecisionCore, HoldReason, validate};

pub struct Orchestrator {
    config: CycleConfig,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn CycleStore>,
    core: Mutex<DecisionCore>,
    gate: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<CoreSnapshot>,
}

impl Orchestrator {
    pub fn new(
        config: CycleConfig,
        mut core: DecisionCore,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn CycleStore>,
    ) -> Self {
        core.track(&config.symbol);
        let (state_tx, _) = watch::channel(core.snapshot());
        Self {
            config,
            bus,
            store,
            core: Mutex::new(core),
            gate: tokio::sync::Mutex::new(()),
            state_tx,
        }
    }

    /// Live view of positions and risk, refreshed after every cycle.
    pub fn subscribe_state(&self) -> watch::Receiver<CoreSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        self.lock_core().snapshot()
    }

    pub fn halt(&self, reason: HaltReason) {
        self.lock_core().halt(reason);
        self.state_tx.send_replace(self.snapshot());
    }

    pub fn reset_halt(&self) {
        self.lock_core().reset_halt();
        self.state_tx.send_replace(self.snapshot());
    }

    /// Runs one full cycle. Concurrent callers are serialized.
    pub async fn run_cycle(&self) -> CycleRecord {
        let _gate = self.gate.lock().await;
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", id = %cycle_id, symbol = %self.config.symbol);
        self.cycle(cycle_id).instrument(span).await
    }

    async fn cycle(&self, cycle_id: Uuid) -> CycleRecord {
        let started = Instant::now();
        let started_at = Utc::now();

        let (signals, missing) = self.collect_signals(cycle_id, started + self.config.cycle_deadline).await;
        for gap in &missing {
            warn!("{} missing: {}", gap.source, gap.reason);
        }

        let decision = self
            .lock_core()
            .decide(cycle_id, &self.config.symbol, &signals, Utc::now());

        let (execution_result, outcome) = if decision.intent.is_hold() {
            (ExecutionResult::NotDispatched, hold_outcome(&decision))
        } else {
            self.execute(&decision).await
        };

        let record = CycleRecord {
            cycle_id,
            symbol: self.config.symbol.clone(),
            started_at,
            signals_received: signals.iter().map(|s| s.source).collect(),
            missing,
            net_direction: decision.view.net_direction,
            net_confidence: decision.view.net_confidence,
            intent_emitted: decision.intent,
            execution_result,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Cycle finished: {:?} {:?} in {}ms",
            record.outcome, record.intent_emitted.action, record.duration_ms
        );

        self.persist(&record).await;
        record
    }

    async fn collect_signals(
        &self,
        cycle_id: Uuid,
        deadline: Instant,
    ) -> (Vec<Signal>, Vec<MissingSignal>) {
        let requests = SignalSource::ALL.map(|source| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timeout = self.config.source_timeout.min(remaining);
            let payload = BusMessage::SignalRequest {
                symbol: self.config.symbol.clone(),
            };
            async move {
                let reply = self.bus.request(source.topic(), cycle_id, payload, timeout).await;
                (source, reply)
            }
        });

        let mut signals = Vec::new();
        let mut missing = Vec::new();
        for (source, reply) in join_all(requests).await {
            let reason = match reply {
                Ok(BusMessage::Signal(signal)) if signal.source != source => {
                    format!("reply tagged {} on {}", signal.source, source.topic())
                }
                Ok(BusMessage::Signal(signal)) => match validate(&signal) {
                    Ok(()) => {
                        signals.push(signal);
                        continue;
                    }
                    Err(e) => e.to_string(),
                },
                Ok(BusMessage::SignalUnavailable { reason, .. }) => reason,
                Ok(other) => format!("unexpected {} reply", other.kind()),
                Err(e) => e.to_string(),
            };
            missing.push(MissingSignal { source, reason });
        }
        (signals, missing)
    }

    /// Dispatches with at-least-once resends under the same cycle id, then
    /// commits or abandons the decision.
    async fn execute(&self, decision: &Decision) -> (ExecutionResult, CycleOutcome) {
        let result = self.dispatch(decision).await;
        let mut core = self.lock_core();
        match &result {
            ExecutionResult::Confirmed(ack) => match core.commit(decision, ack) {
                Ok(_) => (result, CycleOutcome::Confirmed),
                Err(e) => {
                    error!("Execution confirmed but commit failed: {}", e);
                    core.abandon(decision);
                    (result, CycleOutcome::Rejected)
                }
            },
            ExecutionResult::Rejected(reason) => {
                warn!("Execution rejected: {}", reason);
                core.abandon(decision);
                (result, CycleOutcome::Rejected)
            }
            ExecutionResult::Unconfirmed | ExecutionResult::NotDispatched => {
                core.abandon(decision);
                (ExecutionResult::Unconfirmed, CycleOutcome::Unconfirmed)
            }
        }
    }

    async fn dispatch(&self, decision: &Decision) -> ExecutionResult {
        let attempts = self.config.dispatch_attempts.max(1);
        for attempt in 1..=attempts {
            let reply = self
                .bus
                .request(
                    topics::EXECUTION,
                    decision.cycle_id,
                    BusMessage::Dispatch(decision.intent.clone()),
                    self.config.dispatch_timeout,
                )
                .await;
            match reply {
                Ok(BusMessage::Ack(ack)) => return ExecutionResult::Confirmed(ack),
                Ok(BusMessage::ExecutionFailed { reason }) => return ExecutionResult::Rejected(reason),
                Ok(other) => {
                    return ExecutionResult::Rejected(format!("unexpected {} reply", other.kind()));
                }
                Err(e) => warn!("Dispatch attempt {}/{} failed: {}", attempt, attempts, e),
            }
        }
        ExecutionResult::Unconfirmed
    }

    async fn persist(&self, record: &CycleRecord) {
        if let Err(e) = self.store.append_record(record).await {
            error!("Failed to store cycle record: {}", e);
        }

        let snapshot = self.snapshot();
        if let Err(e) = self.store.save_checkpoint(&snapshot).await {
            error!("Failed to store checkpoint: {}", e);
        }
        self.state_tx.send_replace(snapshot);

        if let Err(e) = self
            .bus
            .publish(topics::CYCLE_RECORDS, BusMessage::Cycle(Box::new(record.clone())))
            .await
        {
            warn!("Failed to publish cycle record: {}", e);
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, DecisionCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn hold_outcome(decision: &Decision) -> CycleOutcome {
    match decision.hold_reason {
        Some(HoldReason::Halted(_)) => CycleOutcome::Halted,
        Some(HoldReason::InsufficientEvidence) => CycleOutcome::InsufficientEvidence,
        _ => CycleOutcome::NoAction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bus::InProcessBus;
    use chrono::Duration as ChronoDuration;
    use common::config::{FusionConfig, RiskConfig};
    use common::models::{
        Direction, ExecutionAck, PositionPhase, PriceStructure, Side, TradeAction, TradeIntent,
    };
    use mockall::mock;
    use storage::{MemoryStore, StoreError};

    const SYMBOL: &str = "BTCUSDT";

    mock! {
        Store {}

        #[async_trait]
        impl CycleStore for Store {
            async fn append_record(&self, record: &CycleRecord) -> Result<(), StoreError>;
            async fn save_checkpoint(&self, snapshot: &CoreSnapshot) -> Result<(), StoreError>;
            async fn latest_checkpoint(&self) -> Result<Option<CoreSnapshot>, StoreError>;
            async fn recent_records(&self, limit: u32) -> Result<Vec<CycleRecord>, StoreError>;
        }
    }

    fn config() -> CycleConfig {
        CycleConfig::with_interval(SYMBOL, Duration::from_secs(30))
    }

    fn core() -> DecisionCore {
        DecisionCore::new(FusionConfig::default(), RiskConfig::default())
    }

    fn signal(source: SignalSource, direction: Direction, strength: f64, confidence: f64) -> Signal {
        let now = Utc::now();
        let priced = source != SignalSource::News;
        Signal {
            source,
            direction,
            strength,
            confidence,
            timestamp: now,
            stale_after: now + ChronoDuration::seconds(120),
            adjusted: false,
            reference_price: priced.then_some(100.0),
            structure: (source == SignalSource::PriceAction).then_some(PriceStructure {
                support: 95.0,
                resistance: 110.0,
                atr: 2.0,
            }),
        }
    }

    /// Serves `topic`; `None` from the handler leaves the request unanswered.
    fn respond<F>(bus: &InProcessBus, topic: &str, handler: F) -> Arc<AtomicUsize>
    where
        F: Fn(&BusMessage) -> Option<BusMessage> + Send + 'static,
    {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut rx = bus.serve(topic);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Some(request) = rx.recv().await {
                counter.fetch_add(1, Ordering::SeqCst);
                match handler(request.payload()) {
                    Some(reply) => {
                        request.respond(reply);
                    }
                    None => held.push(request),
                }
            }
        });
        seen
    }

    fn serve_signal(bus: &InProcessBus, signal: Signal) -> Arc<AtomicUsize> {
        let topic = signal.source.topic();
        respond(bus, topic, move |_| Some(BusMessage::Signal(signal.clone())))
    }

    fn full_fill(intent: &TradeIntent) -> BusMessage {
        BusMessage::Ack(ExecutionAck {
            cycle_id: intent.cycle_id,
            order_id: format!("paper-{}", intent.cycle_id),
            filled_size: intent.size,
            fill_price: intent.reference_price.unwrap_or(100.0),
            acked_at: Utc::now(),
        })
    }

    fn ack_everything(bus: &InProcessBus) -> Arc<AtomicUsize> {
        respond(bus, topics::EXECUTION, |payload| match payload {
            BusMessage::Dispatch(intent) => Some(full_fill(intent)),
            _ => None,
        })
    }

    fn bullish_sources(bus: &InProcessBus) {
        serve_signal(bus, signal(SignalSource::News, Direction::Bullish, 0.8, 0.9));
        serve_signal(bus, signal(SignalSource::PriceAction, Direction::Bullish, 0.7, 0.8));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_open_with_one_source_timing_out() {
        let bus = Arc::new(InProcessBus::new());
        let store = Arc::new(MemoryStore::new());
        bullish_sources(&bus);
        respond(&bus, SignalSource::OrderFlow.topic(), |_| None);
        ack_everything(&bus);
        let mut records = bus.subscribe(topics::CYCLE_RECORDS);

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), store.clone());
        let record = orchestrator.run_cycle().await;

        assert_eq!(record.outcome, CycleOutcome::Confirmed);
        assert_eq!(record.intent_emitted.action, TradeAction::Open);
        assert_eq!(record.intent_emitted.side, Side::Long);
        assert_eq!(record.missing.len(), 1);
        assert_eq!(record.missing[0].source, SignalSource::OrderFlow);
        assert!(matches!(record.execution_result, ExecutionResult::Confirmed(_)));

        let position = &orchestrator.snapshot().positions[SYMBOL];
        assert_eq!(position.phase, PositionPhase::Open);
        assert_eq!(position.side, Side::Long);

        assert_eq!(store.records().await, vec![record.clone()]);
        assert!(store.latest_checkpoint().await.unwrap().is_some());
        let published = records.recv().await.unwrap();
        assert_eq!(published.payload, BusMessage::Cycle(Box::new(record)));
        assert_eq!(orchestrator.subscribe_state().borrow().positions[SYMBOL].side, Side::Long);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_execution_is_unconfirmed_and_leaves_state_alone() {
        let bus = Arc::new(InProcessBus::new());
        let store = Arc::new(MemoryStore::new());
        bullish_sources(&bus);
        let dispatches = respond(&bus, topics::EXECUTION, |_| None);

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), store.clone());
        let before = orchestrator.snapshot();
        let record = orchestrator.run_cycle().await;

        assert_eq!(record.outcome, CycleOutcome::Unconfirmed);
        assert_eq!(record.execution_result, ExecutionResult::Unconfirmed);
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);

        let after = orchestrator.snapshot();
        assert_eq!(before.positions, after.positions);
        assert_eq!(before.risk, after.risk);
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_on_resend_commits_exactly_once() {
        let bus = Arc::new(InProcessBus::new());
        bullish_sources(&bus);
        let attempt = AtomicUsize::new(0);
        let dispatches = respond(&bus, topics::EXECUTION, move |payload| {
            let first = attempt.fetch_add(1, Ordering::SeqCst) == 0;
            match payload {
                BusMessage::Dispatch(intent) if !first => Some(full_fill(intent)),
                _ => None,
            }
        });

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), Arc::new(MemoryStore::new()));
        let record = orchestrator.run_cycle().await;

        assert_eq!(record.outcome, CycleOutcome::Confirmed);
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);
        let snapshot = orchestrator.snapshot();
        let position = &snapshot.positions[SYMBOL];
        assert_eq!(position.phase, PositionPhase::Open);
        assert!((position.size - 20.0).abs() < 1e-9);
        assert!((snapshot.risk.exposure_fraction - 0.2).abs() < 1e-9);
        assert_eq!(snapshot.last_committed_cycle, Some(record.cycle_id));
    }

    #[tokio::test]
    async fn halt_during_pending_dispatch_still_books_the_fill() {
        let bus = Arc::new(InProcessBus::new());
        bullish_sources(&bus);
        let mut executions = bus.serve(topics::EXECUTION);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Arc::new(Orchestrator::new(config(), core(), bus.clone(), store.clone()));

        let cycle = tokio::spawn({
            let o = orchestrator.clone();
            async move { o.run_cycle().await }
        });

        let request = executions.recv().await.unwrap();
        orchestrator.halt(HaltReason::Manual);
        let ack = match request.payload() {
            BusMessage::Dispatch(intent) => full_fill(intent),
            other => panic!("expected a dispatch, got {}", other.kind()),
        };
        assert!(request.respond(ack));
        let record = cycle.await.unwrap();

        assert_eq!(record.outcome, CycleOutcome::Confirmed);
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.positions[SYMBOL].phase, PositionPhase::Open);
        assert!((snapshot.positions[SYMBOL].size - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.risk.halted, Some(HaltReason::Manual));
        let checkpoint = store.latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(checkpoint.positions, snapshot.positions);
        assert_eq!(checkpoint.risk, snapshot.risk);

        assert_eq!(orchestrator.run_cycle().await.outcome, CycleOutcome::Halted);
    }

    #[tokio::test]
    async fn rejected_execution_leaves_state_alone() {
        let bus = Arc::new(InProcessBus::new());
        bullish_sources(&bus);
        respond(&bus, topics::EXECUTION, |_| {
            Some(BusMessage::ExecutionFailed {
                reason: "insufficient balance".to_string(),
            })
        });

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), Arc::new(MemoryStore::new()));
        let before = orchestrator.snapshot();
        let record = orchestrator.run_cycle().await;

        assert_eq!(record.outcome, CycleOutcome::Rejected);
        assert_eq!(
            record.execution_result,
            ExecutionResult::Rejected("insufficient balance".to_string())
        );
        assert_eq!(before.positions, orchestrator.snapshot().positions);
    }

    #[tokio::test]
    async fn no_sources_yields_insufficient_evidence_record() {
        let bus = Arc::new(InProcessBus::new());
        let dispatches = ack_everything(&bus);
        let store = Arc::new(MemoryStore::new());

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), store.clone());
        let record = orchestrator.run_cycle().await;

        assert_eq!(record.outcome, CycleOutcome::InsufficientEvidence);
        assert!(record.intent_emitted.is_hold());
        assert_eq!(record.missing.len(), 3);
        assert_eq!(record.net_confidence, 0.0);
        assert_eq!(dispatches.load(Ordering::SeqCst), 0);
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn halted_core_records_halted_and_never_dispatches() {
        let bus = Arc::new(InProcessBus::new());
        bullish_sources(&bus);
        let dispatches = ack_everything(&bus);

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), Arc::new(MemoryStore::new()));
        orchestrator.halt(HaltReason::Manual);
        for _ in 0..3 {
            let record = orchestrator.run_cycle().await;
            assert_eq!(record.outcome, CycleOutcome::Halted);
        }
        assert_eq!(dispatches.load(Ordering::SeqCst), 0);

        orchestrator.reset_halt();
        assert_eq!(orchestrator.run_cycle().await.outcome, CycleOutcome::Confirmed);
    }

    #[tokio::test]
    async fn malformed_and_mislabelled_signals_count_as_missing() {
        let bus = Arc::new(InProcessBus::new());
        let mut broken = signal(SignalSource::News, Direction::Bullish, 0.8, 0.9);
        broken.confidence = f64::NAN;
        serve_signal(&bus, broken);
        respond(&bus, SignalSource::PriceAction.topic(), |_| {
            Some(BusMessage::Signal(signal(SignalSource::OrderFlow, Direction::Bullish, 0.8, 0.9)))
        });
        respond(&bus, SignalSource::OrderFlow.topic(), |_| {
            Some(BusMessage::SignalUnavailable {
                source: SignalSource::OrderFlow,
                reason: "depth fetch failed".to_string(),
            })
        });

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), Arc::new(MemoryStore::new()));
        let record = orchestrator.run_cycle().await;

        assert!(record.signals_received.is_empty());
        assert_eq!(record.missing.len(), 3);
        let order_flow = record
            .missing
            .iter()
            .find(|m| m.source == SignalSource::OrderFlow)
            .unwrap();
        assert_eq!(order_flow.reason, "depth fetch failed");
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_deadline_caps_slow_sources() {
        let bus = Arc::new(InProcessBus::new());
        for source in SignalSource::ALL {
            respond(&bus, source.topic(), |_| None);
        }
        let mut cfg = config();
        cfg.source_timeout = Duration::from_secs(20);
        cfg.cycle_deadline = Duration::from_secs(2);

        let orchestrator = Orchestrator::new(cfg, core(), bus.clone(), Arc::new(MemoryStore::new()));
        let started = Instant::now();
        let record = orchestrator.run_cycle().await;

        assert!(started.elapsed() <= Duration::from_secs(2));
        assert_eq!(record.outcome, CycleOutcome::InsufficientEvidence);
    }

    #[tokio::test]
    async fn store_failure_never_loses_the_cycle() {
        let bus = Arc::new(InProcessBus::new());
        let mut store = MockStore::new();
        store
            .expect_append_record()
            .times(1)
            .returning(|_| Err(StoreError::Io(std::io::Error::other("disk full"))));
        store
            .expect_save_checkpoint()
            .times(1)
            .returning(|_| Err(StoreError::Io(std::io::Error::other("disk full"))));
        let mut records = bus.subscribe(topics::CYCLE_RECORDS);

        let orchestrator = Orchestrator::new(config(), core(), bus.clone(), Arc::new(store));
        let record = orchestrator.run_cycle().await;

        let published = records.recv().await.unwrap();
        assert_eq!(published.payload, BusMessage::Cycle(Box::new(record)));
    }

    #[tokio::test]
    async fn concurrent_triggers_are_serialized() {
        let bus = Arc::new(InProcessBus::new());
        bullish_sources(&bus);
        ack_everything(&bus);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Arc::new(Orchestrator::new(config(), core(), bus.clone(), store.clone()));

        let a = tokio::spawn({
            let o = orchestrator.clone();
            async move { o.run_cycle().await }
        });
        let b = tokio::spawn({
            let o = orchestrator.clone();
            async move { o.run_cycle().await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_ne!(a.cycle_id, b.cycle_id);
        assert_eq!(store.records().await.len(), 2);
        // The second cycle saw the first one's committed position.
        let opens = [a, b]
            .iter()
            .filter(|r| r.intent_emitted.action == TradeAction::Open)
            .count();
        assert_eq!(opens, 1);
        let live = orchestrator
            .snapshot()
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .count();
        assert_eq!(live, 1);
    }
}
