use super::{IndicatorState, SignalSource};
use crate::execution::SeriesWindow;
use crate::indicators::calculate_sma_pair;
use crate::models::Signal;

/// Moving-average crossover on close prices
///
/// Buy while the short average sits above the long one, Sell while below.
/// Recomputed from the window on every call; nothing carries between ticks.
#[derive(Debug, Clone)]
pub struct CrossoverStrategy {
    short_period: usize,
    long_period: usize,
}

impl CrossoverStrategy {
    pub fn new(short_period: usize, long_period: usize) -> Self {
        Self {
            short_period,
            long_period,
        }
    }
}

impl Default for CrossoverStrategy {
    fn default() -> Self {
        Self::new(7, 77)
    }
}

/// Signal from the relative order of the two averages; equality is Ignore
pub fn crossover_signal(short_ma: f64, long_ma: f64) -> Signal {
    if short_ma > long_ma {
        Signal::Buy
    } else if short_ma < long_ma {
        Signal::Sell
    } else {
        Signal::Ignore
    }
}

impl SignalSource for CrossoverStrategy {
    fn compute_trend(
        &self,
        window: &SeriesWindow,
        _prior: Option<&IndicatorState>,
    ) -> (Option<IndicatorState>, Signal) {
        let closes = window.closes();

        match calculate_sma_pair(&closes, self.short_period, self.long_period) {
            Some((short_ma, long_ma)) => {
                let signal = crossover_signal(short_ma, long_ma);
                tracing::debug!(
                    instrument = window.instrument(),
                    short_ma,
                    long_ma,
                    ?signal,
                    "crossover"
                );
                (
                    Some(IndicatorState::Crossover {
                        short_ma: Some(short_ma),
                        long_ma: Some(long_ma),
                    }),
                    signal,
                )
            }
            None => {
                tracing::debug!(
                    instrument = window.instrument(),
                    "warming up ({}/{} bars)",
                    closes.len(),
                    self.long_period
                );
                (
                    Some(IndicatorState::Crossover {
                        short_ma: crate::indicators::calculate_sma(&closes, self.short_period),
                        long_ma: None,
                    }),
                    Signal::Ignore,
                )
            }
        }
    }

    fn name(&self) -> &str {
        "Crossover"
    }

    fn min_bars_required(&self) -> usize {
        self.short_period.max(self.long_period)
    }
}
