//! One evaluation tick across every configured instrument.
//!
//! Each instrument runs in isolation: a failure for one is recorded in its
//! report and the tick moves on to the next.

use super::bar_buffer::SeriesWindow;
use super::bracket::{BracketOrderManager, BracketState, Reconciliation};
use super::position_tracker::PositionTracker;
use super::resolver::{resolve, ExecutionAction};
use super::venue::{ExecutionVenue, MarketFeed};
use crate::config::EngineConfig;
use crate::error::{EngineError, VenueError};
use crate::models::{Bar, BracketOrderPair, OrderHandle, Signal};
use crate::strategy::{build_signal_source, IndicatorState, SignalSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything carried from one tick to the next for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentState {
    pub window: SeriesWindow,
    pub indicator: Option<IndicatorState>,
    pub bracket: BracketState,
}

impl InstrumentState {
    pub fn new(instrument: &str, window_size: usize) -> Self {
        Self {
            window: SeriesWindow::new(instrument, window_size),
            indicator: None,
            bracket: BracketState::Flat,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub last_tick: Option<DateTime<Utc>>,
    pub instruments: BTreeMap<String, InstrumentState>,
}

/// Outcome of one tick for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentReport {
    pub instrument: String,
    pub signal: Signal,
    pub action: ExecutionAction,
    pub reason: String,
    pub price: Option<f64>,
    pub new_bars: usize,
    pub reconciliation: Reconciliation,
    pub orders: Vec<OrderHandle>,
    pub bracket: Option<BracketOrderPair>,
    pub error: Option<String>,
}

impl InstrumentReport {
    fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            signal: Signal::Ignore,
            action: ExecutionAction::Skip,
            reason: String::new(),
            price: None,
            new_bars: 0,
            reconciliation: Reconciliation::Unchanged,
            orders: Vec::new(),
            bracket: None,
            error: None,
        }
    }

    /// Ids of every order placed this tick, comma separated
    pub fn order_ids(&self) -> String {
        self.orders
            .iter()
            .map(|o| o.id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The one structured line per instrument and tick
    fn log_decision(&self) {
        let upper = self.bracket.as_ref().map(|p| p.take_profit_price);
        let lower = self.bracket.as_ref().map(|p| p.stop_loss_price);

        match &self.error {
            Some(error) => tracing::warn!(
                instrument = %self.instrument,
                signal = ?self.signal,
                action = ?self.action,
                price = self.price,
                upper,
                lower,
                orders = %self.order_ids(),
                error = %error,
                "decision"
            ),
            None => tracing::info!(
                instrument = %self.instrument,
                signal = ?self.signal,
                action = ?self.action,
                price = self.price,
                upper,
                lower,
                orders = %self.order_ids(),
                new_bars = self.new_bars,
                reason = %self.reason,
                "decision"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub instruments: Vec<InstrumentReport>,
}

impl TickReport {
    pub fn get(&self, instrument: &str) -> Option<&InstrumentReport> {
        self.instruments.iter().find(|r| r.instrument == instrument)
    }

    pub fn count(&self, action: ExecutionAction) -> usize {
        self.instruments
            .iter()
            .filter(|r| r.action == action && r.error.is_none())
            .count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &InstrumentReport> {
        self.instruments.iter().filter(|r| r.error.is_some())
    }
}

pub type FetchedBars = BTreeMap<String, Result<Vec<Bar>, VenueError>>;

/// Wires the signal source, position tracker and bracket manager together
pub struct StrategyDriver {
    instruments: Vec<String>,
    window_size: usize,
    source: Box<dyn SignalSource>,
    tracker: PositionTracker,
    manager: BracketOrderManager,
}

impl StrategyDriver {
    pub fn new(
        instruments: Vec<String>,
        window_size: usize,
        source: Box<dyn SignalSource>,
        tracker: PositionTracker,
        manager: BracketOrderManager,
    ) -> Self {
        Self {
            instruments,
            window_size,
            source,
            tracker,
            manager,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.instruments.clone(),
            config.window_size,
            build_signal_source(&config.strategy),
            PositionTracker::new(config.dust_notional),
            BracketOrderManager::from_config(config),
        )
    }

    pub fn strategy_name(&self) -> &str {
        self.source.name()
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Request the latest window for every instrument
    pub fn fetch_bars<F: MarketFeed + ?Sized>(&self, feed: &F) -> FetchedBars {
        self.instruments
            .iter()
            .map(|instrument| {
                (
                    instrument.clone(),
                    feed.get_bars(instrument, self.window_size),
                )
            })
            .collect()
    }

    /// Fetch and evaluate in one go when feed and venue are the same object
    pub fn run_tick<V: MarketFeed + ExecutionVenue>(
        &self,
        venue: &mut V,
        state: EngineState,
        now: DateTime<Utc>,
    ) -> (EngineState, TickReport) {
        let fetched = self.fetch_bars(&*venue);
        self.tick(venue, state, fetched, now)
    }

    /// Evaluate every configured instrument against freshly fetched bars
    pub fn tick<V: ExecutionVenue + ?Sized>(
        &self,
        venue: &mut V,
        mut state: EngineState,
        mut fetched: FetchedBars,
        now: DateTime<Utc>,
    ) -> (EngineState, TickReport) {
        let mut reports = Vec::with_capacity(self.instruments.len());

        for instrument in &self.instruments {
            let bars = fetched
                .remove(instrument)
                .unwrap_or_else(|| Ok(Vec::new()));
            let instrument_state = state
                .instruments
                .entry(instrument.clone())
                .or_insert_with(|| InstrumentState::new(instrument, self.window_size));

            let mut report = InstrumentReport::new(instrument);
            if let Err(e) = self.step(venue, instrument, instrument_state, bars, now, &mut report) {
                report.error = Some(error_chain(&e));
            }
            report.log_decision();
            reports.push(report);
        }

        state.last_tick = Some(now);

        let report = TickReport {
            timestamp: now,
            instruments: reports,
        };
        tracing::info!(
            instruments = report.instruments.len(),
            entries = report.count(ExecutionAction::Enter),
            exits = report.count(ExecutionAction::Exit),
            errors = report.errors().count(),
            "tick complete"
        );

        (state, report)
    }

    fn step<V: ExecutionVenue + ?Sized>(
        &self,
        venue: &mut V,
        instrument: &str,
        state: &mut InstrumentState,
        bars: Result<Vec<Bar>, VenueError>,
        now: DateTime<Utc>,
        report: &mut InstrumentReport,
    ) -> Result<(), EngineError> {
        let bars = bars.map_err(|e| EngineError::external(instrument, "get_bars", e))?;

        let (appended, rejected) = state.window.refresh(&bars);
        for err in rejected {
            tracing::warn!(instrument, error = %err, "bar rejected");
        }
        report.new_bars = appended;
        report.price = state.window.last().map(|b| b.close);

        let (indicator, signal) = self
            .source
            .compute_trend(&state.window, state.indicator.as_ref());
        if indicator.is_some() {
            state.indicator = indicator;
        }
        report.signal = signal;

        let has_position = self.tracker.has_open_position(venue, instrument)?;
        report.reconciliation = self.manager.reconcile(&mut state.bracket, has_position, now);
        match report.reconciliation {
            Reconciliation::BracketResolved => {
                tracing::info!(instrument, "bracket resolved at venue, position closed")
            }
            Reconciliation::CloseConfirmed => tracing::info!(instrument, "close confirmed"),
            Reconciliation::Unprotected => {
                tracing::warn!(instrument, "open position has no recorded bracket")
            }
            Reconciliation::CloseOutstanding | Reconciliation::Unchanged => {}
        }

        let decision = if report.reconciliation == Reconciliation::CloseOutstanding {
            report.action = ExecutionAction::Exit;
            report.reason = "Retrying outstanding close".to_string();
            ExecutionAction::Exit
        } else {
            let decision = resolve(signal, has_position);
            report.action = decision.action;
            report.reason = decision.reason;
            decision.action
        };

        if decision == ExecutionAction::Skip {
            if let Err(EngineError::InsufficientData { have, need, .. }) =
                state.window.require(self.source.min_bars_required())
            {
                report.reason = format!("Waiting for data: {} of {} bars", have, need);
            }
        }

        match decision {
            ExecutionAction::Enter => {
                let price = report.price.ok_or_else(|| EngineError::InsufficientData {
                    instrument: instrument.to_string(),
                    have: 0,
                    need: 1,
                })?;
                let outcome = self.manager.enter(venue, instrument, price, &mut state.bracket, now)?;

                tracing::debug!(
                    instrument,
                    notional = outcome.notional,
                    quantity = outcome.entry.filled_quantity,
                    "entered with bracket"
                );
                report.orders.push(outcome.entry);
                report.orders.push(outcome.pair.upper_order.clone());
                report.orders.push(outcome.pair.lower_order.clone());
                report.bracket = Some(outcome.pair);
            }
            ExecutionAction::Exit => {
                let outcome = self.manager.exit(venue, instrument, &mut state.bracket, now)?;

                tracing::debug!(
                    instrument,
                    cancelled_bracket = outcome.cancelled_bracket,
                    "position closed"
                );
                report.bracket = outcome.released;
            }
            ExecutionAction::Skip => {}
        }

        Ok(())
    }
}

fn error_chain(err: &EngineError) -> String {
    match std::error::Error::source(err) {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{PaperVenue, VenueCall, VenueOp};
    use crate::config::StrategyConfig;
    use crate::models::BracketLeg;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn flat_bar(instrument: &str, index: i64, close: f64) -> Bar {
        Bar {
            instrument: instrument.to_string(),
            timestamp: start() + Duration::hours(index),
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    fn config(instruments: &[&str]) -> EngineConfig {
        EngineConfig {
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            fee_rate: 0.0,
            ..Default::default()
        }
    }

    /// 70 bars at 99.5 then 7 at 105: short MA above long MA
    fn feed_golden_cross(venue: &mut PaperVenue, instrument: &str) -> i64 {
        let mut index = 0;
        for _ in 0..70 {
            venue.push_bar(flat_bar(instrument, index, 99.5));
            index += 1;
        }
        for _ in 0..7 {
            venue.push_bar(flat_bar(instrument, index, 105.0));
            index += 1;
        }
        index
    }

    fn feed_bars(venue: &mut PaperVenue, instrument: &str, from: i64, count: i64, close: f64) -> i64 {
        for i in from..from + count {
            venue.push_bar(flat_bar(instrument, i, close));
        }
        from + count
    }

    #[test]
    fn test_buy_enters_with_bracket() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        feed_golden_cross(&mut venue, "BTCUSDT");

        let (state, report) = driver.run_tick(&mut venue, EngineState::default(), start());

        let r = report.get("BTCUSDT").unwrap();
        assert_eq!(r.signal, Signal::Buy);
        assert_eq!(r.action, ExecutionAction::Enter);
        assert!(r.error.is_none());
        assert_eq!(r.orders.len(), 3);
        assert_eq!(r.new_bars, 77);

        let pair = r.bracket.as_ref().unwrap();
        assert!((pair.take_profit_price - 157.5).abs() < 1e-9);
        assert!((pair.stop_loss_price - 94.5).abs() < 1e-9);
        assert_eq!(state.instruments["BTCUSDT"].bracket.name(), "protected");
        assert_eq!(state.last_tick, Some(start()));
    }

    #[test]
    fn test_repeated_buy_while_positioned_skips() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        feed_golden_cross(&mut venue, "BTCUSDT");

        let (state, _) = driver.run_tick(&mut venue, EngineState::default(), start());
        let calls_before = venue.calls().len();
        let (_, report) = driver.run_tick(&mut venue, state, start());

        let r = report.get("BTCUSDT").unwrap();
        assert_eq!(r.signal, Signal::Buy);
        assert_eq!(r.action, ExecutionAction::Skip);
        assert_eq!(venue.calls().len(), calls_before);
    }

    #[test]
    fn test_sell_without_position_places_nothing() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        // Long average above short average
        let next = feed_bars(&mut venue, "BTCUSDT", 0, 70, 105.0);
        feed_bars(&mut venue, "BTCUSDT", next, 7, 99.5);

        let (state, report) = driver.run_tick(&mut venue, EngineState::default(), start());

        let r = report.get("BTCUSDT").unwrap();
        assert_eq!(r.signal, Signal::Sell);
        assert_eq!(r.action, ExecutionAction::Skip);
        assert!(venue.calls().is_empty());
        assert_eq!(state.instruments["BTCUSDT"].bracket, BracketState::Flat);
    }

    #[test]
    fn test_short_window_waits_without_orders() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        feed_bars(&mut venue, "BTCUSDT", 0, 20, 100.0);

        let (_, report) = driver.run_tick(&mut venue, EngineState::default(), start());

        let r = report.get("BTCUSDT").unwrap();
        assert_eq!(r.signal, Signal::Ignore);
        assert!(r.reason.contains("20 of 77"));
        assert!(venue.calls().is_empty());
    }

    #[test]
    fn test_sell_cancels_bracket_then_closes() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        let next = feed_golden_cross(&mut venue, "BTCUSDT");
        let (state, _) = driver.run_tick(&mut venue, EngineState::default(), start());

        // Above the 94.5 stop, but drags the short average under the long one
        feed_bars(&mut venue, "BTCUSDT", next, 7, 95.0);
        let (state, report) = driver.run_tick(&mut venue, state, start());

        let r = report.get("BTCUSDT").unwrap();
        assert_eq!(r.signal, Signal::Sell);
        assert_eq!(r.action, ExecutionAction::Exit);
        assert!(r.error.is_none(), "{:?}", r.error);
        assert_eq!(state.instruments["BTCUSDT"].bracket, BracketState::Flat);

        let calls = venue.calls();
        let n = calls.len();
        assert!(matches!(calls[n - 2], VenueCall::CancelBracket { .. }));
        assert!(matches!(calls[n - 1], VenueCall::ClosePosition { .. }));
        assert!(venue.open_position("BTCUSDT").unwrap().is_none());
    }

    #[test]
    fn test_take_profit_fill_reconciles_to_flat() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        let next = feed_golden_cross(&mut venue, "BTCUSDT");
        let (state, _) = driver.run_tick(&mut venue, EngineState::default(), start());

        let fills = venue.push_bar(flat_bar("BTCUSDT", next, 160.0));
        assert_eq!(fills.len(), 1);

        let (state, report) = driver.run_tick(&mut venue, state, start());
        let r = report.get("BTCUSDT").unwrap();
        assert_eq!(r.reconciliation, Reconciliation::BracketResolved);
        // Short average still above long average: re-enter from flat
        assert_eq!(r.action, ExecutionAction::Enter);
        assert_eq!(state.instruments["BTCUSDT"].bracket.name(), "protected");
    }

    #[test]
    fn test_failing_instrument_is_isolated() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT", "ETHUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        feed_golden_cross(&mut venue, "BTCUSDT");
        feed_golden_cross(&mut venue, "ETHUSDT");
        venue.fail_calls_for("BTCUSDT", VenueError::Network("connection reset".to_string()));

        let (state, report) = driver.run_tick(&mut venue, EngineState::default(), start());

        let btc = report.get("BTCUSDT").unwrap();
        assert!(btc.error.as_deref().unwrap().contains("get_bars failed for BTCUSDT"));
        assert!(btc.error.as_deref().unwrap().contains("connection reset"));

        let eth = report.get("ETHUSDT").unwrap();
        assert!(eth.error.is_none());
        assert_eq!(eth.action, ExecutionAction::Enter);
        assert_eq!(state.instruments["ETHUSDT"].bracket.name(), "protected");
        assert_eq!(state.instruments["BTCUSDT"].bracket, BracketState::Flat);
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_failed_close_is_retried_next_tick() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        let next = feed_golden_cross(&mut venue, "BTCUSDT");
        let (state, _) = driver.run_tick(&mut venue, EngineState::default(), start());

        feed_bars(&mut venue, "BTCUSDT", next, 7, 95.0);
        venue.fail_operation(VenueOp::ClosePosition, VenueError::Unavailable("maintenance".to_string()));
        let (state, report) = driver.run_tick(&mut venue, state, start());

        assert!(report.get("BTCUSDT").unwrap().error.is_some());
        assert_eq!(state.instruments["BTCUSDT"].bracket.name(), "exiting");

        venue.clear_failures();
        let (state, report) = driver.run_tick(&mut venue, state, start());

        let r = report.get("BTCUSDT").unwrap();
        assert_eq!(r.reconciliation, Reconciliation::CloseOutstanding);
        assert_eq!(r.action, ExecutionAction::Exit);
        assert!(r.error.is_none());
        assert_eq!(state.instruments["BTCUSDT"].bracket, BracketState::Flat);
        assert!(venue.open_position("BTCUSDT").unwrap().is_none());
    }

    #[test]
    fn test_supertrend_driver_signals_once_per_bar() {
        let cfg = EngineConfig {
            strategy: StrategyConfig::SuperTrend {
                period: 3,
                multiplier: 0.5,
            },
            ..config(&["BTCUSDT"])
        };
        let driver = StrategyDriver::from_config(&cfg);
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        let mut state = EngineState::default();
        let mut buys = 0;

        for (i, close) in [100.0, 98.0, 96.0, 94.0, 92.0, 90.0, 88.0, 86.0, 87.0, 95.0]
            .into_iter()
            .enumerate()
        {
            venue.push_bar(Bar {
                instrument: "BTCUSDT".to_string(),
                timestamp: start() + Duration::hours(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
            });
            let (next, report) = driver.run_tick(&mut venue, state, start());
            state = next;
            if report.get("BTCUSDT").unwrap().signal == Signal::Buy {
                buys += 1;
                assert_eq!(i, 9);
            }
        }
        assert_eq!(buys, 1);

        // Same bar again: no repeated signal
        let (_, report) = driver.run_tick(&mut venue, state, start());
        assert_eq!(report.get("BTCUSDT").unwrap().signal, Signal::Ignore);
    }

    #[test]
    fn test_engine_state_round_trips_through_json() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        feed_golden_cross(&mut venue, "BTCUSDT");
        let (state, _) = driver.run_tick(&mut venue, EngineState::default(), start());

        let json = serde_json::to_string(&state).unwrap();
        let restored: EngineState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }

    /// In-memory log sink for a scoped subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_decision_line_carries_orders_or_error() {
        let driver = StrategyDriver::from_config(&config(&["BTCUSDT", "ETHUSDT"]));
        let mut venue = PaperVenue::new(1_000.0, 0.0);
        feed_golden_cross(&mut venue, "BTCUSDT");
        feed_golden_cross(&mut venue, "ETHUSDT");
        venue.reject_leg("ETHUSDT", BracketLeg::StopLoss, "stop too close");

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let (_, report) = tracing::subscriber::with_default(subscriber, || {
            driver.run_tick(&mut venue, EngineState::default(), start())
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let decision = |instrument: &str| -> String {
            let lines: Vec<&str> = output
                .lines()
                .filter(|l| l.contains("decision") && l.contains(instrument))
                .collect();
            assert_eq!(lines.len(), 1, "{}", output);
            lines[0].to_string()
        };

        let btc = decision("BTCUSDT");
        let entered = report.get("BTCUSDT").unwrap();
        assert!(btc.contains("INFO"));
        assert!(btc.contains("upper=157.5"), "{}", btc);
        assert!(btc.contains("lower=94.5"), "{}", btc);
        for order in &entered.orders {
            assert!(btc.contains(&order.id.to_string()), "{}", btc);
        }

        let eth = decision("ETHUSDT");
        assert!(eth.contains("WARN"));
        assert!(eth.contains("bracket rejected"), "{}", eth);
        assert!(eth.contains("stop too close"), "{}", eth);
    }
}
