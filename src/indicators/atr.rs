/// True Range / Average True Range
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The first bar of a series has no previous close, so its True Range is just
/// the high-low spread. ATR here is the plain rolling mean of True Range.
use crate::models::Bar;
use std::collections::VecDeque;

/// True Range of `bar` given the previous bar's close
pub fn true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    let spread = bar.high - bar.low;
    match prev_close {
        Some(pc) => spread
            .max((bar.high - pc).abs())
            .max((bar.low - pc).abs()),
        None => spread,
    }
}

/// Rolling mean of the last `period` True Range values
///
/// Keeps only what the next step needs, so it can be persisted between ticks.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RollingAtr {
    period: usize,
    window: VecDeque<f64>,
}

impl RollingAtr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            window: VecDeque::with_capacity(period.max(1)),
        }
    }

    /// Feed one True Range value and return the ATR, if defined yet
    pub fn update(&mut self, tr: f64) -> Option<f64> {
        self.window.push_back(tr);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        self.value()
    }

    /// Current ATR; `None` until `period` values have been seen
    pub fn value(&self) -> Option<f64> {
        if self.window.len() < self.period {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.period as f64)
    }
}
