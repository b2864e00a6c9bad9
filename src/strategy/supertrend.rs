use super::{IndicatorState, SignalSource};
use crate::execution::SeriesWindow;
use crate::indicators::{SuperTrendParams, SuperTrendState};
use crate::models::{Bar, Signal};

/// SuperTrend band-flip strategy
///
/// Buy when the trend turns up at the latest bar, Sell when it turns down.
/// The indicator state from the previous tick is resumed when it still lines
/// up with the window; otherwise the window is folded from its first bar.
#[derive(Debug, Clone)]
pub struct SuperTrendStrategy {
    params: SuperTrendParams,
}

impl SuperTrendStrategy {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self {
            params: SuperTrendParams { period, multiplier },
        }
    }

    pub fn params(&self) -> SuperTrendParams {
        self.params
    }

    /// Prior state and the index of the first bar it has not seen
    ///
    /// `None` when the prior was computed with other parameters, or when its
    /// last bar is no longer in the window (a gap we cannot bridge).
    fn resume_point<'a>(
        &self,
        bars: &[&Bar],
        prior: Option<&'a IndicatorState>,
    ) -> Option<(&'a SuperTrendState, usize)> {
        let state = match prior {
            Some(IndicatorState::SuperTrend(state)) if state.params == self.params => state,
            _ => return None,
        };

        bars.iter()
            .position(|b| b.timestamp == state.last_timestamp)
            .map(|idx| (state, idx + 1))
    }
}

impl Default for SuperTrendStrategy {
    fn default() -> Self {
        let params = SuperTrendParams::default();
        Self::new(params.period, params.multiplier)
    }
}

/// Signal from the trend before and after the latest bar
///
/// Leaving the starting assumption is not a flip, so nothing is signalled
/// until the trend was established by an actual band comparison.
pub fn flip_signal(before: &SuperTrendState, after: &SuperTrendState) -> Signal {
    if !before.established || before.in_uptrend == after.in_uptrend {
        return Signal::Ignore;
    }
    if after.in_uptrend {
        Signal::Buy
    } else {
        Signal::Sell
    }
}

impl SignalSource for SuperTrendStrategy {
    fn compute_trend(
        &self,
        window: &SeriesWindow,
        prior: Option<&IndicatorState>,
    ) -> (Option<IndicatorState>, Signal) {
        let bars: Vec<&Bar> = window.bars().collect();
        let Some((&last, history)) = bars.split_last() else {
            return (prior.cloned(), Signal::Ignore);
        };

        let before = match self.resume_point(&bars, prior) {
            // Nothing new since the last tick
            Some((state, next)) if next == bars.len() => {
                return (Some(IndicatorState::SuperTrend(state.clone())), Signal::Ignore);
            }
            Some((state, next)) => history[next..]
                .iter()
                .fold(state.clone(), |s, bar| s.step(bar)),
            None => {
                if prior.is_some() {
                    tracing::debug!(
                        instrument = window.instrument(),
                        "prior supertrend state does not line up with window, refolding"
                    );
                }
                match SuperTrendState::from_bars(history.iter().copied(), self.params) {
                    Some(state) => state,
                    None => {
                        let seeded = SuperTrendState::seed(last, self.params);
                        return (Some(IndicatorState::SuperTrend(seeded)), Signal::Ignore);
                    }
                }
            }
        };

        let after = before.step(last);
        let signal = if after.bars_seen < self.min_bars_required() {
            Signal::Ignore
        } else {
            flip_signal(&before, &after)
        };

        tracing::debug!(
            instrument = window.instrument(),
            upper = ?after.upper_band,
            lower = ?after.lower_band,
            in_uptrend = after.in_uptrend,
            ?signal,
            "supertrend"
        );

        (Some(IndicatorState::SuperTrend(after)), signal)
    }

    fn name(&self) -> &str {
        "SuperTrend"
    }

    fn min_bars_required(&self) -> usize {
        self.params.period + 1
    }
}
