//! SuperTrend as a fold over bars.
//!
//! The indicator is recursive: each bar's trend and bands depend on the
//! previous bar's. `SuperTrendState` is the whole carry, so a tick only has to
//! step through the bars it has not seen yet.

use super::atr::{true_range, RollingAtr};
use crate::models::Bar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuperTrendParams {
    pub period: usize,
    pub multiplier: f64,
}

impl Default for SuperTrendParams {
    fn default() -> Self {
        Self {
            period: 10,
            multiplier: 3.0,
        }
    }
}

/// Carry between consecutive bars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperTrendState {
    pub params: SuperTrendParams,
    pub last_timestamp: DateTime<Utc>,
    pub prev_close: f64,
    pub upper_band: Option<f64>,
    pub lower_band: Option<f64>,
    pub in_uptrend: bool,
    /// Set once a close has been compared against defined bands; before
    /// that `in_uptrend` is only the starting assumption.
    pub established: bool,
    pub bars_seen: usize,
    atr: RollingAtr,
}

impl SuperTrendState {
    /// State after the first bar of a series
    pub fn seed(bar: &Bar, params: SuperTrendParams) -> Self {
        let mut atr = RollingAtr::new(params.period);
        let (upper_band, lower_band) = candidate_bands(bar, atr.update(true_range(bar, None)), params);

        Self {
            params,
            last_timestamp: bar.timestamp,
            prev_close: bar.close,
            upper_band,
            lower_band,
            in_uptrend: true,
            established: false,
            bars_seen: 1,
            atr,
        }
    }

    /// Advance by one bar
    ///
    /// - a close above the previous upper band sets the uptrend
    /// - else a close below the previous lower band sets the downtrend
    /// - in both cases the bands restart from this bar's candidates
    /// - otherwise the trend holds and the band on the trend side may only
    ///   tighten: lower band never drops in an uptrend, upper band never rises
    ///   in a downtrend
    pub fn step(&self, bar: &Bar) -> Self {
        let mut atr = self.atr.clone();
        let tr = true_range(bar, Some(self.prev_close));
        let (cand_upper, cand_lower) = candidate_bands(bar, atr.update(tr), self.params);

        let crossed_up = self.upper_band.is_some_and(|u| bar.close > u);
        let crossed_down = self.lower_band.is_some_and(|l| bar.close < l);
        let comparable = self.upper_band.is_some() && self.lower_band.is_some();

        let (in_uptrend, upper_band, lower_band) = if crossed_up {
            (true, cand_upper, cand_lower)
        } else if crossed_down {
            (false, cand_upper, cand_lower)
        } else if self.in_uptrend {
            (true, cand_upper, tighten_up(cand_lower, self.lower_band))
        } else {
            (false, tighten_down(cand_upper, self.upper_band), cand_lower)
        };

        Self {
            params: self.params,
            last_timestamp: bar.timestamp,
            prev_close: bar.close,
            upper_band,
            lower_band,
            in_uptrend,
            established: self.established || comparable,
            bars_seen: self.bars_seen + 1,
            atr,
        }
    }

    /// Fold a whole series from scratch
    pub fn from_bars<'a, I>(bars: I, params: SuperTrendParams) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Bar>,
    {
        let mut iter = bars.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::seed(first, params), |state, bar| state.step(bar)))
    }

    pub fn atr(&self) -> Option<f64> {
        self.atr.value()
    }
}

fn candidate_bands(
    bar: &Bar,
    atr: Option<f64>,
    params: SuperTrendParams,
) -> (Option<f64>, Option<f64>) {
    match atr {
        Some(atr) => {
            let hl2 = bar.hl2();
            (
                Some(hl2 + params.multiplier * atr),
                Some(hl2 - params.multiplier * atr),
            )
        }
        None => (None, None),
    }
}

fn tighten_up(candidate: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (candidate, previous) {
        (Some(c), Some(p)) if c < p => Some(p),
        (c, _) => c,
    }
}

fn tighten_down(candidate: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (candidate, previous) {
        (Some(c), Some(p)) if c > p => Some(p),
        (c, _) => c,
    }
}
