//! Static configuration, read once at startup.
//!
//! Values come from the process environment (after `dotenvy` has loaded
//! `.env`). Every key has a default except the credentials required by the
//! selected trading mode. The resulting [`AppConfig`] is immutable and is
//! handed to each component at construction.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be within {range}, got {value}")]
    OutOfRange {
        key: &'static str,
        range: &'static str,
        value: f64,
    },
    #[error("{0} must be set when TRADING_MODE=live")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub symbol: String,
    pub interval: Duration,
    /// Independent timeout of each signal request.
    pub source_timeout: Duration,
    /// Cycle-wide deadline for collecting signals.
    pub cycle_deadline: Duration,
    pub dispatch_timeout: Duration,
    /// Total sends of one intent, first attempt included.
    pub dispatch_attempts: u32,
}

impl CycleConfig {
    pub fn with_interval(symbol: &str, interval: Duration) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            source_timeout: interval / 3,
            cycle_deadline: interval / 2,
            dispatch_timeout: interval / 6,
            dispatch_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    pub min_sources: usize,
    pub neutral_epsilon: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_sources: 2,
            neutral_epsilon: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerConfig {
    pub signal_ttl: Duration,
    /// Fraction of a source's range tolerated (and clamped) outside its bounds.
    pub clamp_tolerance: f64,
    pub clamp_confidence_penalty: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            signal_ttl: Duration::from_secs(120),
            clamp_tolerance: 0.05,
            clamp_confidence_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub initial_equity: f64,
    pub risk_per_trade: f64,
    pub open_threshold: f64,
    pub add_threshold: f64,
    pub reversal_threshold: f64,
    pub max_exposure: f64,
    pub max_adds: u32,
    pub max_consecutive_losses: u32,
    pub drawdown_limit: f64,
    pub reward_risk_ratio: f64,
    pub atr_stop_multiple: f64,
    /// Volatility buffer used when no price-action structure is available.
    pub default_atr: Option<f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_equity: 10_000.0,
            risk_per_trade: 0.01,
            open_threshold: 0.5,
            add_threshold: 0.7,
            reversal_threshold: 0.55,
            max_exposure: 0.5,
            max_adds: 2,
            max_consecutive_losses: 3,
            drawdown_limit: 0.2,
            reward_risk_ratio: 2.0,
            atr_stop_multiple: 1.5,
            default_atr: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub cycle: CycleConfig,
    pub fusion: FusionConfig,
    pub normalizer: NormalizerConfig,
    pub risk: RiskConfig,
    pub workdir: String,
    pub trading_mode: TradingMode,
    pub model_path: String,
    pub news_buffer_size: usize,
    pub news_sample: usize,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<i64>,
    pub binance_base_url: String,
    pub binance_api_key: Option<String>,
    pub binance_secret_key: Option<String>,
    /// Clears a halt restored from the last checkpoint.
    pub reset_halt: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let symbol = lookup("SYMBOL").unwrap_or_else(|| "BTCUSDT".to_string());
        let interval = Duration::from_secs(parse_or(&lookup, "CYCLE_INTERVAL_SECS", 60u64)?);
        if interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "CYCLE_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        let mut cycle = CycleConfig::with_interval(&symbol.to_uppercase(), interval);
        cycle.source_timeout = millis_or(&lookup, "SOURCE_TIMEOUT_MS", cycle.source_timeout)?;
        cycle.cycle_deadline = millis_or(&lookup, "CYCLE_DEADLINE_MS", cycle.cycle_deadline)?;
        cycle.dispatch_timeout = millis_or(&lookup, "DISPATCH_TIMEOUT_MS", cycle.dispatch_timeout)?;
        cycle.dispatch_attempts = parse_or(&lookup, "DISPATCH_ATTEMPTS", cycle.dispatch_attempts)?.max(1);

        let fusion_default = FusionConfig::default();
        let fusion = FusionConfig {
            min_sources: parse_or(&lookup, "MIN_SOURCES", fusion_default.min_sources)?,
            neutral_epsilon: parse_or(&lookup, "NEUTRAL_EPSILON", fusion_default.neutral_epsilon)?,
        };
        if !(1..=3).contains(&fusion.min_sources) {
            return Err(ConfigError::OutOfRange {
                key: "MIN_SOURCES",
                range: "1..=3",
                value: fusion.min_sources as f64,
            });
        }

        let normalizer_default = NormalizerConfig::default();
        let normalizer = NormalizerConfig {
            signal_ttl: Duration::from_secs(parse_or(
                &lookup,
                "SIGNAL_TTL_SECS",
                interval.as_secs() * 2,
            )?),
            clamp_tolerance: parse_or(&lookup, "CLAMP_TOLERANCE", normalizer_default.clamp_tolerance)?,
            clamp_confidence_penalty: parse_or(
                &lookup,
                "CLAMP_CONFIDENCE_PENALTY",
                normalizer_default.clamp_confidence_penalty,
            )?,
        };

        let d = RiskConfig::default();
        let risk = RiskConfig {
            initial_equity: parse_or(&lookup, "INITIAL_EQUITY", d.initial_equity)?,
            risk_per_trade: unit(&lookup, "RISK_PER_TRADE", d.risk_per_trade)?,
            open_threshold: unit(&lookup, "OPEN_THRESHOLD", d.open_threshold)?,
            add_threshold: unit(&lookup, "ADD_THRESHOLD", d.add_threshold)?,
            reversal_threshold: unit(&lookup, "REVERSAL_THRESHOLD", d.reversal_threshold)?,
            max_exposure: parse_or(&lookup, "MAX_EXPOSURE", d.max_exposure)?,
            max_adds: parse_or(&lookup, "MAX_ADDS", d.max_adds)?,
            max_consecutive_losses: parse_or(&lookup, "MAX_CONSECUTIVE_LOSSES", d.max_consecutive_losses)?,
            drawdown_limit: unit(&lookup, "DRAWDOWN_LIMIT", d.drawdown_limit)?,
            reward_risk_ratio: parse_or(&lookup, "REWARD_RISK_RATIO", d.reward_risk_ratio)?,
            atr_stop_multiple: parse_or(&lookup, "ATR_STOP_MULTIPLE", d.atr_stop_multiple)?,
            default_atr: match lookup("DEFAULT_ATR") {
                Some(raw) => Some(parse_value("DEFAULT_ATR", &raw)?),
                None => None,
            },
        };
        if risk.initial_equity <= 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "INITIAL_EQUITY",
                range: "> 0",
                value: risk.initial_equity,
            });
        }

        let trading_mode = match lookup("TRADING_MODE").as_deref() {
            None | Some("paper") => TradingMode::Paper,
            Some("live") => TradingMode::Live,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "TRADING_MODE",
                    value: other.to_string(),
                });
            }
        };

        let binance_api_key = lookup("BINANCE_API_KEY");
        let binance_secret_key = lookup("BINANCE_SECRET_KEY");
        if trading_mode == TradingMode::Live {
            if binance_api_key.is_none() {
                return Err(ConfigError::Missing("BINANCE_API_KEY"));
            }
            if binance_secret_key.is_none() {
                return Err(ConfigError::Missing("BINANCE_SECRET_KEY"));
            }
        }

        let telegram_chat_id = match lookup("TELEGRAM_CHAT_ID") {
            Some(raw) => Some(parse_value("TELEGRAM_CHAT_ID", &raw)?),
            None => None,
        };

        Ok(Self {
            cycle,
            fusion,
            normalizer,
            risk,
            workdir: lookup("WORKDIR").unwrap_or_else(|| ".".to_string()),
            trading_mode,
            model_path: lookup("MODEL_PATH").unwrap_or_else(|| "models/order_flow.onnx".to_string()),
            news_buffer_size: parse_or(&lookup, "NEWS_BUFFER_SIZE", 1000usize)?,
            news_sample: parse_or(&lookup, "NEWS_SAMPLE", 100usize)?,
            llm_base_url: lookup("LLM_BASE_URL").unwrap_or_else(|| {
                "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
            }),
            llm_model: lookup("LLM_MODEL").unwrap_or_else(|| "qwen-plus-latest".to_string()),
            llm_api_key: lookup("DASHSCOPE_API_KEY"),
            telegram_token: lookup("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id,
            binance_base_url: lookup("BINANCE_BASE_URL")
                .unwrap_or_else(|| "https://api.binance.com".to_string()),
            binance_api_key,
            binance_secret_key,
            reset_halt: parse_or(&lookup, "RESET_HALT", false)?,
        })
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => Ok(Duration::from_millis(parse_value(key, &raw)?)),
        None => Ok(default),
    }
}

fn unit<F>(lookup: &F, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: f64 = parse_or(lookup, key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange {
            key,
            range: "[0, 1]",
            value,
        });
    }
    Ok(value)
}
