// Bar windows, position checks and bracket order lifecycle
pub mod bar_buffer;
pub mod bracket;
pub mod driver;
pub mod position_tracker;
pub mod resolver;
pub mod venue;

pub use bar_buffer::SeriesWindow;
pub use bracket::{BracketOrderManager, BracketState, EntryOutcome, ExitOutcome, Reconciliation};
pub use driver::{EngineState, FetchedBars, InstrumentReport, InstrumentState, StrategyDriver, TickReport};
pub use position_tracker::PositionTracker;
pub use resolver::{resolve, ExecutionAction, ExecutionDecision};
pub use venue::{ExecutionVenue, MarketFeed};
