// Core modules
pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::{EngineConfig, StrategyConfig};
pub use error::{EngineError, VenueError};
pub use execution::{EngineState, ExecutionVenue, MarketFeed, StrategyDriver, TickReport};
pub use models::*;
pub use strategy::{IndicatorState, SignalSource};
