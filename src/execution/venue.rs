//! Collaborators the host environment provides.
//!
//! All calls are synchronous; timeouts and retries belong to the
//! implementation behind the trait, never to the engine.

use crate::error::VenueError;
use crate::models::{Bar, BracketOrderPair, BracketRequest, OrderHandle, Position};

/// Source of recent bars per instrument
pub trait MarketFeed {
    /// Up to `window_size` most recent bars, oldest first
    fn get_bars(&self, instrument: &str, window_size: usize) -> Result<Vec<Bar>, VenueError>;
}

/// Portfolio queries and order placement at the execution venue
pub trait ExecutionVenue {
    /// Quoted-currency balance free for new entries
    fn available_quoted_balance(&self) -> Result<f64, VenueError>;

    /// Open holding for the instrument, if any
    fn open_position(&self, instrument: &str) -> Result<Option<Position>, VenueError>;

    /// Market buy worth `notional` in quoted currency
    fn submit_market_order_by_value(
        &mut self,
        instrument: &str,
        notional: f64,
    ) -> Result<OrderHandle, VenueError>;

    /// Take-profit and stop-loss placed together as one one-cancels-other group
    ///
    /// Returns `(take_profit, stop_loss)` handles.
    fn submit_bracket_pair(
        &mut self,
        request: &BracketRequest,
    ) -> Result<(OrderHandle, OrderHandle), VenueError>;

    /// Cancel both legs of a recorded pair
    fn cancel_bracket(&mut self, pair: &BracketOrderPair) -> Result<(), VenueError>;

    /// Close the whole position at market
    fn close_position(&mut self, instrument: &str) -> Result<(), VenueError>;

    /// Whether a full close also drops pending protective orders
    ///
    /// When `false` the engine cancels the recorded bracket before closing.
    fn close_supersedes_brackets(&self) -> bool;
}
