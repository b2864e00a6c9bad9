// Technical indicators module
// Implements SMA, True Range / ATR and the SuperTrend fold

pub mod atr;
pub mod moving_average;
pub mod supertrend;

pub use atr::{true_range, RollingAtr};
pub use moving_average::{calculate_sma, calculate_sma_pair};
pub use supertrend::{SuperTrendParams, SuperTrendState};
