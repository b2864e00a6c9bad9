use crate::models::Bar;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Price path shapes for synthetic bars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady climb with light noise
    Uptrend,
    /// Steady decline with light noise
    Downtrend,
    /// Mean-reverting chop around the start price
    Sideways,
    /// Large swings, floored at half the start price
    Volatile,
    /// Decline for the first half, rally for the second
    Reversal,
    /// Choppy walk with a missing bar every 50
    WithGaps,
}

impl MarketScenario {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "uptrend" => Some(Self::Uptrend),
            "downtrend" => Some(Self::Downtrend),
            "sideways" => Some(Self::Sideways),
            "volatile" => Some(Self::Volatile),
            "reversal" => Some(Self::Reversal),
            "gaps" | "with_gaps" => Some(Self::WithGaps),
            _ => None,
        }
    }
}

/// Seeded OHLC bar generator for backtests and tests
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    start: DateTime<Utc>,
}

impl SyntheticDataGenerator {
    /// Same seed, same bars
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 150.0,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Generate bars for one instrument
    ///
    /// # Arguments
    /// * `num_bars` - Number of bar slots; `WithGaps` leaves some of them empty
    /// * `interval` - Spacing between bar timestamps
    pub fn generate(
        &mut self,
        instrument: &str,
        scenario: MarketScenario,
        num_bars: usize,
        interval: Duration,
    ) -> Vec<Bar> {
        let mut bars = Vec::with_capacity(num_bars);
        let mut price = self.base_price;
        let half = num_bars / 2;

        for i in 0..num_bars {
            if scenario == MarketScenario::WithGaps && i % 50 == 49 {
                continue;
            }

            price = match scenario {
                MarketScenario::Uptrend => price * (1.0 + 0.004 + self.rng.gen_range(-0.003..0.003)),
                MarketScenario::Downtrend => price * (1.0 - 0.004 + self.rng.gen_range(-0.003..0.003)),
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - price) * 0.1;
                    price + reversion + price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => {
                    let next = price * (1.0 + self.rng.gen_range(-0.05..0.05));
                    next.max(self.base_price * 0.5)
                }
                MarketScenario::Reversal => {
                    let drift = if i < half { -0.006 } else { 0.008 };
                    price * (1.0 + drift + self.rng.gen_range(-0.003..0.003))
                }
                MarketScenario::WithGaps => price * (1.0 + self.rng.gen_range(-0.01..0.01)),
            };

            let timestamp = self.start + interval * i as i32;
            bars.push(self.make_bar(instrument, price, timestamp));
        }

        bars
    }

    fn make_bar(&mut self, instrument: &str, close: f64, timestamp: DateTime<Utc>) -> Bar {
        let spread = 0.004;
        let high = close * (1.0 + self.rng.gen_range(0.0..spread));
        let low = close * (1.0 - self.rng.gen_range(0.0..spread));
        let open = (close * (1.0 + self.rng.gen_range(-spread..spread))).clamp(low, high);

        Bar {
            instrument: instrument.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
        }
    }
}
