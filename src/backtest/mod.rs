pub mod metrics;
pub mod paper;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestMetrics, ExitReason, TradeRecord};
pub use paper::{LiveBracket, PaperVenue, VenueCall, VenueOp};
pub use runner::BacktestRunner;
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
