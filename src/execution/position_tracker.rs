use super::venue::ExecutionVenue;
use crate::error::EngineError;
use crate::models::Position;

/// Read-through view of the venue's open positions
///
/// Holds no cache: every query goes to the venue so a stale answer can never
/// cause a double entry or a missed exit.
#[derive(Debug, Clone, Copy)]
pub struct PositionTracker {
    dust_notional: f64,
}

impl PositionTracker {
    /// # Arguments
    /// * `dust_notional` - Holdings with a quoted exposure below this are ignored
    pub fn new(dust_notional: f64) -> Self {
        Self { dust_notional }
    }

    /// Open, non-dust position for the instrument
    pub fn open_position<V: ExecutionVenue + ?Sized>(
        &self,
        venue: &V,
        instrument: &str,
    ) -> Result<Option<Position>, EngineError> {
        let position = venue
            .open_position(instrument)
            .map_err(|e| EngineError::external(instrument, "open_position", e))?;

        Ok(position.filter(|p| !self.is_dust(p)))
    }

    /// Check if we have an open, non-dust position for the instrument
    pub fn has_open_position<V: ExecutionVenue + ?Sized>(
        &self,
        venue: &V,
        instrument: &str,
    ) -> Result<bool, EngineError> {
        Ok(self.open_position(venue, instrument)?.is_some())
    }

    pub fn is_dust(&self, position: &Position) -> bool {
        position.quantity <= 0.0 || position.exposure < self.dust_notional
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::PaperVenue;
    use crate::error::VenueError;
    use chrono::Utc;

    fn position(quantity: f64, exposure: f64) -> Position {
        Position {
            instrument: "BTCUSDT".to_string(),
            quantity,
            entry_time: Utc::now(),
            exposure,
        }
    }

    #[test]
    fn test_dust_threshold() {
        let tracker = PositionTracker::new(1.0);
        assert!(tracker.is_dust(&position(0.00001, 0.5)));
        assert!(tracker.is_dust(&position(0.0, 10.0)));
        assert!(!tracker.is_dust(&position(0.01, 500.0)));
    }

    #[test]
    fn test_reads_through_to_venue() {
        let mut venue = PaperVenue::new(1000.0, 0.0);
        venue.set_price("BTCUSDT", 100.0);
        let tracker = PositionTracker::new(1.0);

        assert!(!tracker.has_open_position(&venue, "BTCUSDT").unwrap());

        venue.insert_position("BTCUSDT", 2.0, 100.0);
        assert!(tracker.has_open_position(&venue, "BTCUSDT").unwrap());

        venue.insert_position("BTCUSDT", 0.001, 100.0);
        assert!(!tracker.has_open_position(&venue, "BTCUSDT").unwrap());
    }

    #[test]
    fn test_venue_failure_is_external_call_failure() {
        let mut venue = PaperVenue::new(1000.0, 0.0);
        venue.fail_calls_for("BTCUSDT", VenueError::Network("timeout".to_string()));
        let tracker = PositionTracker::default();

        let result = tracker.has_open_position(&venue, "BTCUSDT");
        assert!(matches!(
            result,
            Err(EngineError::ExternalCallFailure {
                operation: "open_position",
                ..
            })
        ));
    }
}
