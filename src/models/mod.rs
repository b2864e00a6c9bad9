use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OHLC bar for one instrument
///
/// Immutable once appended to a window; bars for an instrument arrive in
/// chronological order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    /// Midpoint of the bar's range, `(high + low) / 2`
    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// Prices are finite and the range is not inverted
    pub fn is_well_formed(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite())
            && self.high >= self.low
    }
}

/// Trading signal
///
/// `Ignore` is returned explicitly whenever nothing actionable happened,
/// including warm-up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Signal {
    #[default]
    Ignore,
    Buy,
    Sell,
}

/// Open holding as reported by the venue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub instrument: String,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    /// Quoted-currency value of the holding
    pub exposure: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

/// Venue's view of a submitted order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderHandle {
    pub id: Uuid,
    pub instrument: String,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
    pub created_time: DateTime<Utc>,
    pub error: Option<String>,
}

/// Which side of a bracket a protective order guards
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BracketLeg {
    TakeProfit,
    StopLoss,
}

/// What the manager asks the venue to place as one OCO group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BracketRequest {
    pub instrument: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
    pub oco_group: Uuid,
}

/// Accepted take-profit/stop-loss pair guarding an open position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BracketOrderPair {
    pub instrument: String,
    pub upper_order: OrderHandle,
    pub lower_order: OrderHandle,
    pub created_time: DateTime<Utc>,
    pub oco_group: Uuid,
    pub quantity: f64,
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            instrument: "BTCUSDT".to_string(),
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
        }
    }

    #[test]
    fn test_hl2() {
        assert_eq!(bar(100.0, 110.0, 90.0, 105.0).hl2(), 100.0);
    }

    #[test]
    fn test_well_formed() {
        assert!(bar(100.0, 110.0, 90.0, 105.0).is_well_formed());
        assert!(!bar(100.0, 90.0, 110.0, 105.0).is_well_formed());
        assert!(!bar(f64::NAN, 110.0, 90.0, 105.0).is_well_formed());
        assert!(!bar(100.0, f64::INFINITY, 90.0, 105.0).is_well_formed());
    }

    #[test]
    fn test_signal_defaults_to_ignore() {
        assert_eq!(Signal::default(), Signal::Ignore);
    }
}
