// Indicator engine: interchangeable trend strategies
pub mod crossover;
pub mod supertrend;

use crate::config::StrategyConfig;
use crate::execution::SeriesWindow;
use crate::indicators::SuperTrendState;
use crate::models::Signal;
use serde::{Deserialize, Serialize};

pub use crossover::CrossoverStrategy;
pub use supertrend::SuperTrendStrategy;

/// Indicator output carried from one tick to the next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorState {
    Crossover {
        short_ma: Option<f64>,
        long_ma: Option<f64>,
    },
    SuperTrend(SuperTrendState),
}

/// Base trait for trend strategies
pub trait SignalSource: Send + Sync {
    /// Compute the new indicator state and the signal at the latest bar
    ///
    /// Windows shorter than `min_bars_required` yield `Signal::Ignore`. The
    /// returned state is `None` only when nothing could be computed at all.
    fn compute_trend(
        &self,
        window: &SeriesWindow,
        prior: Option<&IndicatorState>,
    ) -> (Option<IndicatorState>, Signal);

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum bars before a Buy/Sell can be produced
    fn min_bars_required(&self) -> usize;
}

/// Build the strategy selected by configuration
pub fn build_signal_source(config: &StrategyConfig) -> Box<dyn SignalSource> {
    match *config {
        StrategyConfig::Crossover {
            short_period,
            long_period,
        } => Box::new(CrossoverStrategy::new(short_period, long_period)),
        StrategyConfig::SuperTrend { period, multiplier } => {
            Box::new(SuperTrendStrategy::new(period, multiplier))
        }
    }
}
