use common::models::{PriceStructure, Side};

/// Fixed-fractional size: risk `equity * risk_per_trade` over the stop distance.
pub fn fixed_fractional(equity: f64, risk_per_trade: f64, entry: f64, stop: f64) -> Option<f64> {
    let distance = (entry - stop).abs();
    if !distance.is_finite() || distance <= f64::EPSILON || equity <= 0.0 {
        return None;
    }
    Some(equity * risk_per_trade / distance)
}

/// Caps `size` so the added notional keeps exposure within `max_exposure`.
pub fn cap_to_exposure(size: f64, price: f64, equity: f64, current_exposure: f64, max_exposure: f64) -> f64 {
    if price <= 0.0 || equity <= 0.0 {
        return 0.0;
    }
    let headroom = ((max_exposure - current_exposure) * equity).max(0.0);
    size.min(headroom / price)
}

/// Stop below entry for longs and above for shorts.
///
/// Structure levels win when they sit on the protective side of entry;
/// otherwise an ATR buffer is used, from the structure or the configured
/// fallback.
pub fn protective_stop(
    side: Side,
    entry: f64,
    structure: Option<&PriceStructure>,
    default_atr: Option<f64>,
    atr_multiple: f64,
) -> Option<f64> {
    if let Some(levels) = structure {
        match side {
            Side::Long if levels.support > 0.0 && levels.support < entry => return Some(levels.support),
            Side::Short if levels.resistance > entry => return Some(levels.resistance),
            _ => {}
        }
    }

    let atr = structure
        .map(|s| s.atr)
        .filter(|atr| *atr > 0.0)
        .or(default_atr)
        .filter(|atr| *atr > 0.0)?;
    let buffer = atr * atr_multiple;
    match side {
        Side::Long if entry - buffer > 0.0 => Some(entry - buffer),
        Side::Short => Some(entry + buffer),
        _ => None,
    }
}

/// Target at `reward_risk` times the stop distance beyond entry.
pub fn reward_target(side: Side, entry: f64, stop: f64, reward_risk: f64) -> f64 {
    entry + side.sign() * (entry - stop).abs() * reward_risk
}
