use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Environment prefix for overrides, e.g. `BARRIERBOT__TAKE_PROFIT_PCT=0.3`
/// or `BARRIERBOT__STRATEGY__PERIOD=14`
pub const ENV_PREFIX: &str = "BARRIERBOT";

const DEFAULT_INSTRUMENTS: &[&str] = &[
    "AAVEUSDT", "ADAUSDT", "ATOMUSDT", "AUDIOUSDT", "BTCUSDT", "ETHUSDT", "ICPUSDT", "LINKUSDT",
    "SOLUSDT", "THETAUSDT",
];

/// Which indicator drives the signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Crossover {
        #[serde(default = "default_short_period")]
        short_period: usize,
        #[serde(default = "default_long_period")]
        long_period: usize,
    },
    SuperTrend {
        #[serde(default = "default_st_period")]
        period: usize,
        #[serde(default = "default_st_multiplier")]
        multiplier: f64,
    },
}

fn default_short_period() -> usize {
    7
}

fn default_long_period() -> usize {
    77
}

fn default_st_period() -> usize {
    10
}

fn default_st_multiplier() -> f64 {
    3.0
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Crossover {
            short_period: default_short_period(),
            long_period: default_long_period(),
        }
    }
}

impl StrategyConfig {
    /// Bars needed before the strategy can produce a Buy/Sell
    pub fn required_lookback(&self) -> usize {
        match *self {
            Self::Crossover {
                short_period,
                long_period,
            } => short_period.max(long_period),
            Self::SuperTrend { period, .. } => period + 1,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bar period, e.g. "1h"
    pub interval: String,
    pub instruments: Vec<String>,
    /// Per-trade notional cap in quoted currency
    pub max_buy_notional: f64,
    /// Share of the available quoted balance one entry may use
    pub balance_fraction: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub fee_rate: f64,
    /// Holdings worth less than this (quoted) count as no position
    pub dust_notional: f64,
    /// Bars requested from the feed and kept per instrument
    pub window_size: usize,
    pub strategy: StrategyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: "1h".to_string(),
            instruments: DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            max_buy_notional: 100.0,
            balance_fraction: 0.95,
            take_profit_pct: 0.5,
            stop_loss_pct: 0.1,
            fee_rate: 0.001,
            dust_notional: 1.0,
            window_size: 200,
            strategy: StrategyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional TOML file plus `BARRIERBOT__*` environment
    /// overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("instruments"),
        );

        let loaded: EngineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Fail fast on settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfiguration(msg));

        if self.instruments.is_empty() {
            return invalid("instrument list is empty".to_string());
        }
        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            if instrument.trim().is_empty() {
                return invalid("instrument name is blank".to_string());
            }
            if !seen.insert(instrument.as_str()) {
                return invalid(format!("instrument {} listed twice", instrument));
            }
        }

        if parse_interval(&self.interval).is_none() {
            return invalid(format!("unknown interval '{}'", self.interval));
        }
        if !(self.max_buy_notional > 0.0) {
            return invalid(format!("max_buy_notional must be positive, got {}", self.max_buy_notional));
        }
        if !(self.balance_fraction > 0.0 && self.balance_fraction <= 1.0) {
            return invalid(format!("balance_fraction must be in (0, 1], got {}", self.balance_fraction));
        }
        if !(self.take_profit_pct > 0.0) {
            return invalid(format!("take_profit_pct must be positive, got {}", self.take_profit_pct));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return invalid(format!("stop_loss_pct must be in (0, 1), got {}", self.stop_loss_pct));
        }
        if !(self.fee_rate >= 0.0 && self.fee_rate < 1.0) {
            return invalid(format!("fee_rate must be in [0, 1), got {}", self.fee_rate));
        }
        if !(self.dust_notional >= 0.0) {
            return invalid(format!("dust_notional must not be negative, got {}", self.dust_notional));
        }

        match self.strategy {
            StrategyConfig::Crossover {
                short_period,
                long_period,
            } => {
                if short_period == 0 || short_period >= long_period {
                    return invalid(format!(
                        "crossover needs 0 < short_period < long_period, got {} / {}",
                        short_period, long_period
                    ));
                }
            }
            StrategyConfig::SuperTrend { period, multiplier } => {
                if period == 0 {
                    return invalid("supertrend period must be at least 1".to_string());
                }
                if !(multiplier > 0.0) {
                    return invalid(format!("supertrend multiplier must be positive, got {}", multiplier));
                }
            }
        }

        let lookback = self.strategy.required_lookback();
        if self.window_size < lookback {
            return invalid(format!(
                "window_size {} is shorter than the strategy lookback {}",
                self.window_size, lookback
            ));
        }

        Ok(())
    }

    pub fn interval_duration(&self) -> Result<chrono::Duration, EngineError> {
        parse_interval(&self.interval).ok_or_else(|| {
            EngineError::InvalidConfiguration(format!("unknown interval '{}'", self.interval))
        })
    }
}

/// Parse "30m", "1h", "4h", "1d" style bar periods
pub fn parse_interval(raw: &str) -> Option<chrono::Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = raw.split_at(split);
    let amount: i64 = amount.parse().ok().filter(|n| *n > 0)?;

    match unit {
        "m" => Some(chrono::Duration::minutes(amount)),
        "h" => Some(chrono::Duration::hours(amount)),
        "d" => Some(chrono::Duration::days(amount)),
        _ => None,
    }
}
