//! Position and risk state machine.
//!
//! Per symbol: `Flat -> Opening -> Open -> Closing -> Flat`, where `Opening`
//! and `Closing` only last between [`DecisionCore::decide`] and the matching
//! [`DecisionCore::commit`] or [`DecisionCore::abandon`]. Process-wide, the
//! core can be halted by the risk circuit breaker; once halted every decision
//! is `Hold` until [`DecisionCore::reset_halt`].
//!
//! `decide` never fails. Anything that prevents a trade degrades to a `Hold`
//! intent whose rationale names the reason.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::config::{FusionConfig, RiskConfig};
use common::models::{
    CloseReason, CoreSnapshot, Direction, ExecutionAck, HaltReason, Position, PositionPhase,
    PriceStructure, RiskState, Side, Signal, SignalSource, TradeAction, TradeIntent,
};

use crate::fusion::{FusedView, fuse};
use crate::sizing;

const COMMITTED_MEMORY: usize = 1024;
const SIZE_EPSILON: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("invalid transition for {symbol}: {detail}")]
    InvalidTransition { symbol: String, detail: String },
    #[error("ack for cycle {ack} does not match decision of cycle {decision}")]
    CycleMismatch { decision: Uuid, ack: Uuid },
}

/// Why a cycle ended in `Hold`.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldReason {
    Halted(HaltReason),
    InsufficientEvidence,
    BelowThreshold,
    ExposureCap,
    NoMarkPrice,
    InvalidTransition(String),
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Halted(reason) => write!(f, "halted ({})", reason),
            Self::InsufficientEvidence => f.write_str("insufficient evidence"),
            Self::BelowThreshold => f.write_str("no signal above threshold"),
            Self::ExposureCap => f.write_str("exposure cap reached"),
            Self::NoMarkPrice => f.write_str("no market price this cycle"),
            Self::InvalidTransition(detail) => write!(f, "invalid transition: {}", detail),
        }
    }
}

/// What a confirmed execution will do to the book.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    None,
    Open {
        side: Side,
        size: f64,
        entry: f64,
        stop: f64,
        target: f64,
    },
    Add {
        size: f64,
        price: f64,
    },
    Reduce {
        size: f64,
        price: f64,
    },
    Close {
        reason: CloseReason,
        price: f64,
    },
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub cycle_id: Uuid,
    pub intent: TradeIntent,
    pub view: FusedView,
    pub transition: Transition,
    pub hold_reason: Option<HoldReason>,
}

impl Decision {
    pub fn is_halted(&self) -> bool {
        matches!(self.hold_reason, Some(HoldReason::Halted(_)))
    }
}

pub struct DecisionCore {
    fusion: FusionConfig,
    risk_cfg: RiskConfig,
    positions: HashMap<String, Position>,
    risk: RiskState,
    committed: HashSet<Uuid>,
    committed_order: VecDeque<Uuid>,
    last_committed: Option<Uuid>,
    pending: Option<(Uuid, String)>,
}

impl DecisionCore {
    pub fn new(fusion: FusionConfig, risk_cfg: RiskConfig) -> Self {
        let risk = RiskState::new(risk_cfg.initial_equity);
        Self {
            fusion,
            risk_cfg,
            positions: HashMap::new(),
            risk,
            committed: HashSet::new(),
            committed_order: VecDeque::new(),
            last_committed: None,
            pending: None,
        }
    }

    /// Rebuilds the core from a checkpoint. Transient phases fall back to the
    /// settled phase they started from.
    pub fn restore(fusion: FusionConfig, risk_cfg: RiskConfig, snapshot: CoreSnapshot) -> Self {
        let mut core = Self::new(fusion, risk_cfg);
        core.positions = snapshot
            .positions
            .into_iter()
            .map(|(symbol, mut position)| {
                position.phase = settled_phase(&position);
                (symbol, position)
            })
            .collect();
        core.risk = snapshot.risk;
        if let Some(id) = snapshot.last_committed_cycle {
            core.remember(id);
        }
        core
    }

    /// Ensures a flat position exists for `symbol`.
    pub fn track(&mut self, symbol: &str) {
        self.positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn is_halted(&self) -> bool {
        self.risk.is_halted()
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            positions: self.positions.clone(),
            risk: self.risk.clone(),
            last_committed_cycle: self.last_committed,
            taken_at: Utc::now(),
        }
    }

    /// Turns this cycle's signals into an intent. Never fails.
    pub fn decide(
        &mut self,
        cycle_id: Uuid,
        symbol: &str,
        signals: &[Signal],
        as_of: DateTime<Utc>,
    ) -> Decision {
        if let Some((stale_cycle, _)) = &self.pending {
            warn!("Decision for cycle {} was never resolved, abandoning it", stale_cycle);
            self.settle_pending();
        }
        self.track(symbol);

        let view = fuse(signals, as_of, &self.fusion);
        let (transition, hold_reason) = match &self.risk.halted {
            Some(reason) => (Transition::None, Some(HoldReason::Halted(reason.clone()))),
            None => self.plan(symbol, signals, &view, as_of),
        };

        let intent = self.intent_for(cycle_id, symbol, &view, &transition, hold_reason.as_ref());

        match &transition {
            Transition::Open { .. } => self.mark_pending(cycle_id, symbol, PositionPhase::Opening),
            Transition::Close { .. } => self.mark_pending(cycle_id, symbol, PositionPhase::Closing),
            Transition::Add { .. } | Transition::Reduce { .. } => {
                self.pending = Some((cycle_id, symbol.to_string()));
            }
            Transition::None => {}
        }

        debug!(
            "Cycle {} {}: {:?} ({})",
            cycle_id, symbol, intent.action, intent.rationale
        );

        Decision {
            cycle_id,
            intent,
            view,
            transition,
            hold_reason,
        }
    }

    /// Applies a confirmed execution. Returns `Ok(false)` when this cycle was
    /// already applied, so a resent acknowledgment never books twice.
    pub fn commit(&mut self, decision: &Decision, ack: &ExecutionAck) -> Result<bool, DecisionError> {
        if self.committed.contains(&decision.cycle_id) {
            debug!("Cycle {} already committed", decision.cycle_id);
            return Ok(false);
        }
        if ack.cycle_id != decision.cycle_id {
            return Err(DecisionError::CycleMismatch {
                decision: decision.cycle_id,
                ack: ack.cycle_id,
            });
        }
        // A halt only gates `decide`. Fills confirmed by the venue are always booked.
        let symbol = decision.intent.symbol.clone();
        let mut position = self
            .positions
            .get(&symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(&symbol));
        let filled = ack.filled_size;
        let fill = ack.fill_price;

        match &decision.transition {
            Transition::None => {
                return Err(DecisionError::InvalidTransition {
                    symbol,
                    detail: "nothing to commit for a hold".to_string(),
                });
            }
            Transition::Open {
                side,
                stop,
                target,
                ..
            } => {
                if !position.is_flat() {
                    return Err(DecisionError::InvalidTransition {
                        symbol,
                        detail: format!("open while already {:?}", position.side),
                    });
                }
                position = Position {
                    symbol: symbol.clone(),
                    side: *side,
                    size: filled,
                    entry_price: fill,
                    stop_price: *stop,
                    target_price: *target,
                    opened_at: Some(ack.acked_at),
                    adds: 0,
                    phase: PositionPhase::Open,
                };
                info!("Opened {:?} {} x{:.6} @ {:.4}", side, symbol, filled, fill);
            }
            Transition::Add { .. } => {
                if position.is_flat() {
                    return Err(DecisionError::InvalidTransition {
                        symbol,
                        detail: "add to a flat position".to_string(),
                    });
                }
                let new_size = position.size + filled;
                position.entry_price = (position.entry_price * position.size + fill * filled) / new_size;
                position.size = new_size;
                position.adds += 1;
                position.phase = PositionPhase::Open;
                info!("Added to {} x{:.6} @ {:.4}, avg {:.4}", symbol, filled, fill, position.entry_price);
            }
            Transition::Reduce { .. } => {
                if position.is_flat() {
                    return Err(DecisionError::InvalidTransition {
                        symbol,
                        detail: "reduce a flat position".to_string(),
                    });
                }
                let qty = filled.min(position.size);
                let pnl = position.side.sign() * (fill - position.entry_price) * qty;
                self.risk.record_pnl(pnl);
                position.size -= qty;
                if position.size <= SIZE_EPSILON {
                    position = Position::flat(&symbol);
                } else {
                    position.phase = PositionPhase::Open;
                }
                info!("Reduced {} by {:.6} @ {:.4}, pnl {:.2}", symbol, qty, fill, pnl);
            }
            Transition::Close { reason, .. } => {
                if position.is_flat() {
                    return Err(DecisionError::InvalidTransition {
                        symbol,
                        detail: "close a flat position".to_string(),
                    });
                }
                let qty = if filled > 0.0 { filled.min(position.size) } else { position.size };
                let pnl = position.side.sign() * (fill - position.entry_price) * qty;
                self.risk.record_pnl(pnl);
                position.size -= qty;
                if position.size <= SIZE_EPSILON {
                    info!("Closed {} ({:?}) @ {:.4}, pnl {:.2}", symbol, reason, fill, pnl);
                    position = Position::flat(&symbol);
                } else {
                    warn!(
                        "Close of {} ({:?}) filled {:.6} @ {:.4}, {:.6} still open, pnl {:.2}",
                        symbol, reason, qty, fill, position.size, pnl
                    );
                    position.phase = PositionPhase::Open;
                }
            }
        }

        self.positions.insert(symbol.clone(), position);
        self.risk.exposure_fraction = self.exposure(&symbol, fill);
        self.pending = None;
        self.remember(decision.cycle_id);
        self.evaluate_halt();
        Ok(true)
    }

    /// Drops a decision whose execution was never confirmed. The book is left
    /// exactly as it was before `decide`.
    pub fn abandon(&mut self, decision: &Decision) {
        if let Some((pending_cycle, _)) = &self.pending {
            if *pending_cycle == decision.cycle_id {
                self.settle_pending();
            }
        }
    }

    /// Manual circuit-breaker trip.
    pub fn halt(&mut self, reason: HaltReason) {
        warn!("Trading halted: {}", reason);
        self.risk.halted = Some(reason);
    }

    /// Clears a halt. Loss streak and drawdown baseline restart from here.
    pub fn reset_halt(&mut self) {
        if let Some(reason) = self.risk.halted.take() {
            info!("Halt cleared (was: {})", reason);
        }
        self.risk.consecutive_losses = 0;
        self.risk.peak_equity = self.risk.equity;
        self.risk.max_drawdown_seen = 0.0;
    }

    fn plan(
        &self,
        symbol: &str,
        signals: &[Signal],
        view: &FusedView,
        as_of: DateTime<Utc>,
    ) -> (Transition, Option<HoldReason>) {
        let position = self
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol));
        let mark = mark_price(signals, as_of);
        let structure = signals
            .iter()
            .filter(|s| s.source == SignalSource::PriceAction && !s.is_stale(as_of))
            .max_by_key(|s| s.timestamp)
            .and_then(|s| s.structure);

        if position.is_flat() {
            return self.plan_entry(symbol, view, mark, structure.as_ref());
        }

        let Some(mark) = mark else {
            return (Transition::None, Some(HoldReason::NoMarkPrice));
        };

        if position.stop_breached(mark) {
            return (close(CloseReason::StopLoss, mark), None);
        }
        if position.target_reached(mark) {
            return (close(CloseReason::TargetReached, mark), None);
        }

        let held = side_direction(position.side);
        let opposing = !view.insufficient_evidence
            && view.net_direction != Direction::Neutral
            && view.net_direction != held;
        if opposing && view.net_confidence >= self.risk_cfg.reversal_threshold {
            return (close(CloseReason::Reversal, mark), None);
        }

        let exposure = self.exposure(symbol, mark);
        if exposure > self.risk_cfg.max_exposure + SIZE_EPSILON && self.risk.equity > 0.0 {
            let excess = (exposure - self.risk_cfg.max_exposure) * self.risk.equity / mark;
            return (
                Transition::Reduce {
                    size: excess.min(position.size),
                    price: mark,
                },
                None,
            );
        }

        let same_direction = !view.insufficient_evidence && view.net_direction == held;
        if !same_direction || view.net_confidence < self.risk_cfg.add_threshold {
            let reason = if view.insufficient_evidence {
                HoldReason::InsufficientEvidence
            } else {
                HoldReason::BelowThreshold
            };
            return (Transition::None, Some(reason));
        }

        if position.adds >= self.risk_cfg.max_adds {
            return (
                Transition::None,
                Some(HoldReason::InvalidTransition(format!(
                    "add cap of {} reached",
                    self.risk_cfg.max_adds
                ))),
            );
        }
        if exposure >= self.risk_cfg.max_exposure {
            return (Transition::None, Some(HoldReason::ExposureCap));
        }

        match self.size_for(mark, position.stop_price, exposure) {
            Some(size) => (Transition::Add { size, price: mark }, None),
            None => (
                Transition::None,
                Some(HoldReason::InvalidTransition(
                    "add has no usable stop distance".to_string(),
                )),
            ),
        }
    }

    fn plan_entry(
        &self,
        symbol: &str,
        view: &FusedView,
        mark: Option<f64>,
        structure: Option<&PriceStructure>,
    ) -> (Transition, Option<HoldReason>) {
        if view.insufficient_evidence {
            return (Transition::None, Some(HoldReason::InsufficientEvidence));
        }
        let side = match view.net_direction {
            Direction::Bullish => Side::Long,
            Direction::Bearish => Side::Short,
            Direction::Neutral => return (Transition::None, Some(HoldReason::BelowThreshold)),
        };
        if view.net_confidence < self.risk_cfg.open_threshold {
            return (Transition::None, Some(HoldReason::BelowThreshold));
        }
        let Some(entry) = mark else {
            return (Transition::None, Some(HoldReason::NoMarkPrice));
        };
        let exposure = self.exposure(symbol, entry);
        if exposure >= self.risk_cfg.max_exposure {
            return (Transition::None, Some(HoldReason::ExposureCap));
        }

        let Some(stop) = sizing::protective_stop(
            side,
            entry,
            structure,
            self.risk_cfg.default_atr,
            self.risk_cfg.atr_stop_multiple,
        ) else {
            return (
                Transition::None,
                Some(HoldReason::InvalidTransition(
                    "no structure or volatility buffer for a stop".to_string(),
                )),
            );
        };

        match self.size_for(entry, stop, exposure) {
            Some(size) => (
                Transition::Open {
                    side,
                    size,
                    entry,
                    stop,
                    target: sizing::reward_target(side, entry, stop, self.risk_cfg.reward_risk_ratio),
                },
                None,
            ),
            None => (
                Transition::None,
                Some(HoldReason::InvalidTransition(
                    "position size rounds to zero".to_string(),
                )),
            ),
        }
    }

    fn size_for(&self, price: f64, stop: f64, exposure: f64) -> Option<f64> {
        let raw = sizing::fixed_fractional(self.risk.equity, self.risk_cfg.risk_per_trade, price, stop)?;
        let size = sizing::cap_to_exposure(raw, price, self.risk.equity, exposure, self.risk_cfg.max_exposure);
        (size > SIZE_EPSILON).then_some(size)
    }

    /// Open notional over equity, marking `symbol` at `mark` and every other
    /// position at its entry.
    fn exposure(&self, symbol: &str, mark: f64) -> f64 {
        if self.risk.equity <= 0.0 {
            return f64::INFINITY;
        }
        let notional: f64 = self
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| {
                let price = if p.symbol == symbol { mark } else { p.entry_price };
                p.notional(price)
            })
            .sum();
        notional / self.risk.equity
    }

    fn intent_for(
        &self,
        cycle_id: Uuid,
        symbol: &str,
        view: &FusedView,
        transition: &Transition,
        hold_reason: Option<&HoldReason>,
    ) -> TradeIntent {
        let summary = format!(
            "net {:+.2} conf {:.2} [{}]",
            view.net_score,
            view.net_confidence,
            view.summary()
        );
        let position = self.positions.get(symbol);
        let held_side = position.map(|p| p.side).unwrap_or(Side::Flat);
        let held_size = position.map(|p| p.size).unwrap_or(0.0);

        let mut intent = TradeIntent::hold(cycle_id, symbol, summary.clone());
        match transition {
            Transition::None => {
                if let Some(reason) = hold_reason {
                    intent.rationale = format!("hold: {}; {}", reason, summary);
                }
            }
            Transition::Open {
                side,
                size,
                entry,
                stop,
                target,
            } => {
                intent.action = TradeAction::Open;
                intent.side = *side;
                intent.size = *size;
                intent.reference_price = Some(*entry);
                intent.stop_price = Some(*stop);
                intent.target_price = Some(*target);
                intent.rationale = format!("open {:?}: {}", side, summary);
            }
            Transition::Add { size, price } => {
                intent.action = TradeAction::IncreasePosition;
                intent.side = held_side;
                intent.size = *size;
                intent.reference_price = Some(*price);
                intent.rationale = format!("add to {:?}: {}", held_side, summary);
            }
            Transition::Reduce { size, price } => {
                intent.action = TradeAction::ReducePosition;
                intent.side = held_side;
                intent.size = *size;
                intent.reference_price = Some(*price);
                intent.rationale = format!("reduce over exposure cap: {}", summary);
            }
            Transition::Close { reason, price } => {
                intent.action = TradeAction::Close;
                intent.side = held_side;
                intent.size = held_size;
                intent.reference_price = Some(*price);
                intent.close_reason = Some(*reason);
                intent.rationale = format!("close {:?}: {}", reason, summary);
            }
        }
        intent
    }

    fn mark_pending(&mut self, cycle_id: Uuid, symbol: &str, phase: PositionPhase) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.phase = phase;
        }
        self.pending = Some((cycle_id, symbol.to_string()));
    }

    fn settle_pending(&mut self) {
        if let Some((_, symbol)) = self.pending.take() {
            if let Some(position) = self.positions.get_mut(&symbol) {
                position.phase = settled_phase(position);
            }
        }
    }

    fn remember(&mut self, cycle_id: Uuid) {
        if self.committed.insert(cycle_id) {
            self.committed_order.push_back(cycle_id);
        }
        while self.committed_order.len() > COMMITTED_MEMORY {
            if let Some(old) = self.committed_order.pop_front() {
                self.committed.remove(&old);
            }
        }
        self.last_committed = Some(cycle_id);
    }

    fn evaluate_halt(&mut self) {
        if self.risk.is_halted() {
            return;
        }
        let reason = if self.risk.equity <= 0.0 {
            Some(HaltReason::EquityDepleted(self.risk.equity))
        } else if self.risk.consecutive_losses >= self.risk_cfg.max_consecutive_losses {
            Some(HaltReason::ConsecutiveLosses(self.risk.consecutive_losses))
        } else if self.risk.max_drawdown_seen >= self.risk_cfg.drawdown_limit {
            Some(HaltReason::Drawdown(self.risk.max_drawdown_seen))
        } else {
            None
        };
        if let Some(reason) = reason {
            self.halt(reason);
        }
    }
}

fn settled_phase(position: &Position) -> PositionPhase {
    if position.is_flat() {
        PositionPhase::Flat
    } else {
        PositionPhase::Open
    }
}

fn side_direction(side: Side) -> Direction {
    match side {
        Side::Long => Direction::Bullish,
        Side::Short => Direction::Bearish,
        Side::Flat => Direction::Neutral,
    }
}

fn close(reason: CloseReason, price: f64) -> Transition {
    Transition::Close { reason, price }
}

/// Price-action reference price, else the order-flow mid, from fresh signals.
fn mark_price(signals: &[Signal], as_of: DateTime<Utc>) -> Option<f64> {
    [SignalSource::PriceAction, SignalSource::OrderFlow]
        .into_iter()
        .find_map(|source| {
            signals
                .iter()
                .filter(|s| s.source == source && !s.is_stale(as_of))
                .max_by_key(|s| s.timestamp)
                .and_then(|s| s.reference_price)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SYMBOL: &str = "BTCUSDT";

    fn core() -> DecisionCore {
        let mut core = DecisionCore::new(FusionConfig::default(), RiskConfig::default());
        core.track(SYMBOL);
        core
    }

    fn signal(
        source: SignalSource,
        direction: Direction,
        strength: f64,
        confidence: f64,
        price: Option<f64>,
    ) -> Signal {
        let now = Utc::now();
        Signal {
            source,
            direction,
            strength,
            confidence,
            timestamp: now,
            stale_after: now + Duration::seconds(120),
            adjusted: false,
            reference_price: price,
            structure: None,
        }
    }

    fn price_action(direction: Direction, strength: f64, confidence: f64, price: f64) -> Signal {
        Signal {
            structure: Some(PriceStructure {
                support: price - 5.0,
                resistance: price + 5.0,
                atr: 2.0,
            }),
            ..signal(SignalSource::PriceAction, direction, strength, confidence, Some(price))
        }
    }

    fn bullish_entry(price: f64) -> Vec<Signal> {
        vec![
            signal(SignalSource::News, Direction::Bullish, 0.8, 0.9, None),
            price_action(Direction::Bullish, 0.7, 0.8, price),
        ]
    }

    fn ack_for(decision: &Decision, price: f64) -> ExecutionAck {
        ExecutionAck {
            cycle_id: decision.cycle_id,
            order_id: format!("paper-{}", decision.cycle_id),
            filled_size: decision.intent.size,
            fill_price: price,
            acked_at: Utc::now(),
        }
    }

    fn open_long(core: &mut DecisionCore, price: f64) -> Decision {
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(price), Utc::now());
        assert_eq!(decision.intent.action, TradeAction::Open);
        core.commit(&decision, &ack_for(&decision, price)).unwrap();
        decision
    }

    #[test]
    fn scenario_a_opens_long_with_fixed_fractional_size() {
        let mut core = core();
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());

        assert_eq!(decision.intent.action, TradeAction::Open);
        assert_eq!(decision.intent.side, Side::Long);
        // 10k * 1% over a 5 point stop.
        assert!((decision.intent.size - 20.0).abs() < 1e-9);
        assert_eq!(decision.intent.stop_price, Some(95.0));
        assert_eq!(decision.intent.target_price, Some(110.0));
        assert_eq!(core.position(SYMBOL).unwrap().phase, PositionPhase::Opening);

        core.commit(&decision, &ack_for(&decision, 100.0)).unwrap();
        let position = core.position(SYMBOL).unwrap();
        assert_eq!(position.phase, PositionPhase::Open);
        assert_eq!(position.side, Side::Long);
        assert!((core.risk().exposure_fraction - 0.2).abs() < 1e-9);
    }

    #[test]
    fn scenario_b_neutral_low_confidence_holds() {
        let mut core = core();
        let signals = vec![
            signal(SignalSource::News, Direction::Neutral, 0.0, 0.2, None),
            price_action(Direction::Neutral, 0.0, 0.2, 100.0),
            signal(SignalSource::OrderFlow, Direction::Neutral, 0.0, 0.1, Some(100.0)),
        ];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        assert!(decision.intent.is_hold());
        assert!(decision.view.net_confidence < 1e-9);
        assert_eq!(decision.hold_reason, Some(HoldReason::BelowThreshold));
    }

    #[test]
    fn scenario_c_opposing_signals_close_on_reversal() {
        let mut core = core();
        open_long(&mut core, 100.0);

        let signals = vec![
            price_action(Direction::Bearish, 0.9, 0.9, 101.0),
            signal(SignalSource::OrderFlow, Direction::Bearish, 0.8, 0.8, Some(101.0)),
        ];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        assert_eq!(decision.intent.action, TradeAction::Close);
        assert_eq!(decision.intent.close_reason, Some(CloseReason::Reversal));
        assert_eq!(core.position(SYMBOL).unwrap().phase, PositionPhase::Closing);
    }

    #[test]
    fn stop_takes_precedence_over_reversal() {
        let mut core = core();
        open_long(&mut core, 100.0);

        let signals = vec![
            price_action(Direction::Bearish, 0.9, 0.9, 94.0),
            signal(SignalSource::OrderFlow, Direction::Bearish, 0.8, 0.8, Some(94.0)),
        ];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        assert_eq!(decision.intent.close_reason, Some(CloseReason::StopLoss));
    }

    #[test]
    fn target_reached_closes() {
        let mut core = core();
        open_long(&mut core, 100.0);
        let signals = vec![price_action(Direction::Neutral, 0.0, 0.5, 111.0)];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        assert_eq!(decision.intent.close_reason, Some(CloseReason::TargetReached));
    }

    #[test]
    fn scenario_d_three_losses_halt_every_later_cycle() {
        let mut core = core();
        for _ in 0..3 {
            open_long(&mut core, 100.0);
            let stop_hit = vec![price_action(Direction::Bearish, 0.2, 0.5, 94.0)];
            let decision = core.decide(Uuid::new_v4(), SYMBOL, &stop_hit, Utc::now());
            assert_eq!(decision.intent.close_reason, Some(CloseReason::StopLoss));
            core.commit(&decision, &ack_for(&decision, 94.0)).unwrap();
        }

        assert_eq!(core.risk().consecutive_losses, 3);
        assert_eq!(core.risk().halted, Some(HaltReason::ConsecutiveLosses(3)));

        for _ in 0..5 {
            let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
            assert!(decision.intent.is_hold());
            assert!(decision.is_halted());
        }

        core.reset_halt();
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
        assert_eq!(decision.intent.action, TradeAction::Open);
    }

    #[test]
    fn drawdown_limit_halts() {
        let mut core = DecisionCore::new(
            FusionConfig::default(),
            RiskConfig {
                risk_per_trade: 0.1,
                max_exposure: 10.0,
                drawdown_limit: 0.1,
                ..RiskConfig::default()
            },
        );
        core.track(SYMBOL);
        open_long(&mut core, 100.0);
        let stop_hit = vec![price_action(Direction::Bearish, 0.2, 0.5, 90.0)];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &stop_hit, Utc::now());
        core.commit(&decision, &ack_for(&decision, 90.0)).unwrap();
        assert!(matches!(core.risk().halted, Some(HaltReason::Drawdown(_))));
    }

    #[test]
    fn recommitting_same_cycle_is_a_no_op() {
        let mut core = core();
        let decision = open_long(&mut core, 100.0);
        let before = core.snapshot();

        let applied = core.commit(&decision, &ack_for(&decision, 100.0)).unwrap();
        assert!(!applied);
        let after = core.snapshot();
        assert_eq!(before.positions, after.positions);
        assert_eq!(before.risk, after.risk);
    }

    #[test]
    fn abandoned_decision_leaves_book_untouched() {
        let mut core = core();
        let before = core.snapshot();
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
        core.abandon(&decision);
        let after = core.snapshot();
        assert_eq!(before.positions, after.positions);
        assert_eq!(before.risk, after.risk);
    }

    #[test]
    fn single_source_never_opens() {
        let mut core = core();
        let signals = vec![price_action(Direction::Bullish, 1.0, 1.0, 100.0)];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        assert!(decision.intent.is_hold());
        assert_eq!(decision.hold_reason, Some(HoldReason::InsufficientEvidence));
    }

    #[test]
    fn empty_signal_set_is_a_deterministic_hold() {
        let mut core = core();
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &[], Utc::now());
        assert!(decision.intent.is_hold());
        assert_eq!(decision.hold_reason, Some(HoldReason::InsufficientEvidence));
    }

    #[test]
    fn pyramiding_stops_at_add_cap() {
        let mut core = DecisionCore::new(
            FusionConfig::default(),
            RiskConfig {
                max_adds: 1,
                max_exposure: 10.0,
                ..RiskConfig::default()
            },
        );
        core.track(SYMBOL);
        open_long(&mut core, 100.0);

        let strong = vec![
            signal(SignalSource::News, Direction::Bullish, 0.9, 0.95, None),
            price_action(Direction::Bullish, 0.9, 0.95, 102.0),
            signal(SignalSource::OrderFlow, Direction::Bullish, 0.9, 0.95, Some(102.0)),
        ];
        let add = core.decide(Uuid::new_v4(), SYMBOL, &strong, Utc::now());
        assert_eq!(add.intent.action, TradeAction::IncreasePosition);
        core.commit(&add, &ack_for(&add, 102.0)).unwrap();
        let position = core.position(SYMBOL).unwrap();
        assert_eq!(position.adds, 1);
        assert!(position.entry_price > 100.0 && position.entry_price < 102.0);

        let capped = core.decide(Uuid::new_v4(), SYMBOL, &strong, Utc::now());
        assert!(capped.intent.is_hold());
        assert!(matches!(capped.hold_reason, Some(HoldReason::InvalidTransition(_))));
    }

    #[test]
    fn exposure_cap_blocks_new_entries() {
        let mut core = DecisionCore::new(
            FusionConfig::default(),
            RiskConfig {
                max_exposure: 0.0,
                ..RiskConfig::default()
            },
        );
        core.track(SYMBOL);
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
        assert_eq!(decision.hold_reason, Some(HoldReason::ExposureCap));
    }

    #[test]
    fn over_exposure_triggers_reduce() {
        let mut core = core();
        open_long(&mut core, 100.0);

        // Push the target out of reach so only the exposure check can act.
        let mut snapshot = core.snapshot();
        if let Some(p) = snapshot.positions.get_mut(SYMBOL) {
            p.target_price = 1_000.0;
        }
        let mut core = DecisionCore::restore(FusionConfig::default(), RiskConfig::default(), snapshot);

        // 20 units at 300 is 6k notional on 10k equity against a 0.5 cap.
        let signals = vec![price_action(Direction::Neutral, 0.0, 0.5, 300.0)];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        assert_eq!(decision.intent.action, TradeAction::ReducePosition);
        assert!((decision.intent.size - 1_000.0 / 300.0).abs() < 1e-9);

        core.commit(&decision, &ack_for(&decision, 300.0)).unwrap();
        let position = core.position(SYMBOL).unwrap();
        assert!((position.size - (20.0 - 1_000.0 / 300.0)).abs() < 1e-9);
        assert!(core.risk().exposure_fraction <= 0.5);
        assert!(core.risk().realized_pnl > 0.0);
    }

    #[test]
    fn no_price_means_no_entry() {
        let mut core = core();
        let signals = vec![
            signal(SignalSource::News, Direction::Bullish, 0.9, 0.9, None),
            signal(SignalSource::News, Direction::Bullish, 0.9, 0.9, None),
        ];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        // Duplicates of one source are one source of evidence.
        assert_eq!(decision.hold_reason, Some(HoldReason::InsufficientEvidence));

        let signals = vec![
            signal(SignalSource::News, Direction::Bullish, 0.9, 0.9, None),
            signal(SignalSource::OrderFlow, Direction::Bullish, 0.9, 0.9, None),
        ];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &signals, Utc::now());
        assert_eq!(decision.hold_reason, Some(HoldReason::NoMarkPrice));
    }

    #[test]
    fn restore_settles_transient_phases() {
        let mut core = core();
        core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
        let snapshot = core.snapshot();
        assert_eq!(snapshot.positions[SYMBOL].phase, PositionPhase::Opening);

        let restored = DecisionCore::restore(FusionConfig::default(), RiskConfig::default(), snapshot);
        assert_eq!(restored.position(SYMBOL).unwrap().phase, PositionPhase::Flat);
    }

    #[test]
    fn at_most_one_live_position_per_symbol() {
        let mut core = core();
        let first = open_long(&mut core, 100.0);

        let replay = Decision {
            cycle_id: Uuid::new_v4(),
            ..first.clone()
        };
        let ack = ExecutionAck {
            cycle_id: replay.cycle_id,
            ..ack_for(&first, 100.0)
        };
        let err = core.commit(&replay, &ack).unwrap_err();
        assert!(matches!(err, DecisionError::InvalidTransition { .. }));
        assert_eq!(
            core.snapshot().positions.values().filter(|p| !p.is_flat()).count(),
            1
        );
    }

    #[test]
    fn partial_close_keeps_remainder_open() {
        let mut core = core();
        open_long(&mut core, 100.0);

        let stop_hit = vec![price_action(Direction::Bearish, 0.2, 0.5, 94.0)];
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &stop_hit, Utc::now());
        assert_eq!(decision.intent.close_reason, Some(CloseReason::StopLoss));
        let ack = ExecutionAck {
            filled_size: 5.0,
            ..ack_for(&decision, 94.0)
        };
        assert!(core.commit(&decision, &ack).unwrap());

        let position = core.position(SYMBOL).unwrap();
        assert!(!position.is_flat());
        assert_eq!(position.phase, PositionPhase::Open);
        assert_eq!(position.side, Side::Long);
        assert!((position.size - 15.0).abs() < 1e-9);
        assert!((core.risk().realized_pnl + 30.0).abs() < 1e-9);
        assert!(core.risk().exposure_fraction > 0.0);

        // The rest of the stop still has to be worked off.
        let again = core.decide(Uuid::new_v4(), SYMBOL, &stop_hit, Utc::now());
        assert_eq!(again.intent.action, TradeAction::Close);
        core.commit(&again, &ack_for(&again, 94.0)).unwrap();
        assert!(core.position(SYMBOL).unwrap().is_flat());
        assert!((core.risk().realized_pnl + 120.0).abs() < 1e-9);
    }

    #[test]
    fn fill_confirmed_after_halt_is_still_booked() {
        let mut core = core();
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
        assert_eq!(decision.intent.action, TradeAction::Open);

        core.halt(HaltReason::Manual);
        assert!(core.commit(&decision, &ack_for(&decision, 100.0)).unwrap());

        let position = core.position(SYMBOL).unwrap();
        assert_eq!(position.phase, PositionPhase::Open);
        assert!((position.size - 20.0).abs() < 1e-9);
        assert!(core.is_halted());

        let next = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
        assert!(next.is_halted());
    }

    #[test]
    fn mismatched_ack_is_refused() {
        let mut core = core();
        let decision = core.decide(Uuid::new_v4(), SYMBOL, &bullish_entry(100.0), Utc::now());
        let ack = ExecutionAck {
            cycle_id: Uuid::new_v4(),
            ..ack_for(&decision, 100.0)
        };
        assert!(matches!(
            core.commit(&decision, &ack),
            Err(DecisionError::CycleMismatch { .. })
        ));
    }
}
