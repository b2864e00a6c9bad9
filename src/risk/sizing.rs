use serde::{Deserialize, Serialize};

/// Entry sizing: a share of the free balance, never above a fixed cap
///
/// The cap bounds single-trade risk independent of account size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSizer {
    pub balance_fraction: f64,
    pub max_notional: f64,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            balance_fraction: 0.95,
            max_notional: 100.0,
        }
    }
}

impl PositionSizer {
    pub fn new(balance_fraction: f64, max_notional: f64) -> Self {
        Self {
            balance_fraction,
            max_notional,
        }
    }

    /// Notional for the next entry, or None if there is nothing to spend
    pub fn entry_notional(&self, available_quoted: f64) -> Option<f64> {
        if !(available_quoted.is_finite() && available_quoted > 0.0) {
            return None;
        }
        let notional = (available_quoted * self.balance_fraction).min(self.max_notional);
        (notional > 0.0).then_some(notional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_applies_to_large_accounts() {
        let sizer = PositionSizer::new(0.95, 100.0);
        assert_eq!(sizer.entry_notional(10_000.0), Some(100.0));
    }

    #[test]
    fn test_fraction_applies_to_small_accounts() {
        let sizer = PositionSizer::new(0.95, 100.0);
        assert_eq!(sizer.entry_notional(80.0), Some(76.0));
    }

    #[test]
    fn test_nothing_to_spend() {
        let sizer = PositionSizer::default();
        assert_eq!(sizer.entry_notional(0.0), None);
        assert_eq!(sizer.entry_notional(-5.0), None);
        assert_eq!(sizer.entry_notional(f64::NAN), None);
    }
}
