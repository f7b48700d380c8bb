use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HaltReason {
    ConsecutiveLosses(u32),
    Drawdown(f64),
    EquityDepleted(f64),
    Manual,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConsecutiveLosses(n) => write!(f, "{} consecutive losses", n),
            Self::Drawdown(dd) => write!(f, "drawdown {:.2}%", dd * 100.0),
            Self::EquityDepleted(eq) => write!(f, "equity depleted ({:.2})", eq),
            Self::Manual => f.write_str("manual halt"),
        }
    }
}

/// Process-wide risk bookkeeping. Only the decision core writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub equity: f64,
    pub peak_equity: f64,
    pub realized_pnl: f64,
    pub max_drawdown_seen: f64,
    pub consecutive_losses: u32,
    pub exposure_fraction: f64,
    pub halted: Option<HaltReason>,
}

impl RiskState {
    pub fn new(equity: f64) -> Self {
        Self {
            equity,
            peak_equity: equity,
            realized_pnl: 0.0,
            max_drawdown_seen: 0.0,
            consecutive_losses: 0,
            exposure_fraction: 0.0,
            halted: None,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Books a realized result and refreshes peak and drawdown.
    pub fn record_pnl(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
        self.equity += pnl;

        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }

        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
        if self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - self.equity) / self.peak_equity;
            self.max_drawdown_seen = self.max_drawdown_seen.max(drawdown);
        }
    }
}
