use super::metrics::BacktestMetrics;
use super::paper::PaperVenue;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::execution::{EngineState, ExecutionAction, StrategyDriver};
use crate::models::Bar;

/// Replays historical bars through the driver against a paper venue
pub struct BacktestRunner {
    config: EngineConfig,
    initial_balance: f64,
}

impl BacktestRunner {
    pub fn new(config: EngineConfig, initial_balance: f64) -> Self {
        Self {
            config,
            initial_balance,
        }
    }

    /// Run a backtest over bars for the configured instruments
    ///
    /// Bars are published in timestamp order, one tick per distinct
    /// timestamp. Whatever is still held at the end is sold at the last close.
    pub fn run(&self, mut bars: Vec<Bar>) -> Result<BacktestMetrics, EngineError> {
        let lookback = self.config.strategy.required_lookback();
        let longest = self
            .config
            .instruments
            .iter()
            .map(|i| bars.iter().filter(|b| &b.instrument == i).count())
            .max()
            .unwrap_or(0);
        if longest <= lookback {
            return Err(EngineError::InsufficientData {
                instrument: self.config.instruments.join(","),
                have: longest,
                need: lookback + 1,
            });
        }

        bars.sort_by_key(|b| b.timestamp);

        let driver = StrategyDriver::from_config(&self.config);
        let mut venue = PaperVenue::new(self.initial_balance, self.config.fee_rate);
        let mut state = EngineState::default();
        let (mut entries, mut errors) = (0usize, 0usize);

        tracing::info!(
            strategy = driver.strategy_name(),
            bars = bars.len(),
            instruments = self.config.instruments.len(),
            "starting backtest"
        );

        let mut idx = 0;
        while idx < bars.len() {
            let now = bars[idx].timestamp;
            while idx < bars.len() && bars[idx].timestamp == now {
                venue.push_bar(bars[idx].clone());
                idx += 1;
            }

            let (next, report) = driver.run_tick(&mut venue, state, now);
            state = next;
            entries += report.count(ExecutionAction::Enter);
            errors += report.errors().count();
        }

        venue.liquidate_all();

        let metrics =
            BacktestMetrics::from_trades(venue.trades().to_vec(), self.initial_balance, venue.equity());

        tracing::info!(
            entries,
            errors,
            trades = metrics.total_trades,
            net_pnl = metrics.net_pnl,
            return_pct = metrics.total_return_pct,
            "backtest complete"
        );

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::{MarketScenario, SyntheticDataGenerator};
    use crate::config::StrategyConfig;
    use chrono::Duration;

    fn config(strategy: StrategyConfig) -> EngineConfig {
        EngineConfig {
            instruments: vec!["SYNTH".to_string()],
            strategy,
            ..Default::default()
        }
    }

    fn supertrend() -> StrategyConfig {
        StrategyConfig::SuperTrend {
            period: 10,
            multiplier: 3.0,
        }
    }

    #[test]
    fn test_backtest_reversal_trades() {
        tracing_subscriber::fmt()
            .with_env_filter("barrierbot=debug")
            .try_init()
            .ok();

        let bars = SyntheticDataGenerator::new(42).generate(
            "SYNTH",
            MarketScenario::Reversal,
            400,
            Duration::hours(1),
        );

        let metrics = BacktestRunner::new(config(supertrend()), 1_000.0).run(bars).unwrap();

        assert!(metrics.total_trades > 0);
        assert!(metrics.final_equity > 0.0);
        assert_eq!(metrics.winning_trades + metrics.losing_trades, metrics.total_trades);
    }

    #[test]
    fn test_backtest_downtrend_with_crossover_stays_flat() {
        let bars = SyntheticDataGenerator::new(7).generate(
            "SYNTH",
            MarketScenario::Downtrend,
            300,
            Duration::hours(1),
        );

        let metrics = BacktestRunner::new(config(StrategyConfig::default()), 1_000.0)
            .run(bars)
            .unwrap();

        // A steady decline never lifts the short average above the long one
        assert_eq!(metrics.total_trades, 0);
        assert!((metrics.final_equity - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_backtest_insufficient_data() {
        let bars = SyntheticDataGenerator::new(42).generate(
            "SYNTH",
            MarketScenario::Uptrend,
            50,
            Duration::hours(1),
        );

        let result = BacktestRunner::new(config(StrategyConfig::default()), 1_000.0).run(bars);
        assert!(matches!(result, Err(EngineError::InsufficientData { .. })));
    }
}
