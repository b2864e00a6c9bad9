use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Closed at market on a Sell signal or a flatten
    MarketClose,
}

/// One closed (or partially closed) position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub instrument: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Price move times quantity, before fees
    pub pnl: f64,
    pub pnl_pct: f64,
    pub holding_period_minutes: i64,
    /// Entry share plus exit fees
    pub transaction_cost: f64,
    pub net_pnl: f64,
    pub exit_reason: ExitReason,
}

/// Backtest performance summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub take_profit_exits: usize,
    pub stop_loss_exits: usize,

    pub total_pnl: f64,
    pub total_transaction_costs: f64,
    pub net_pnl: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    pub avg_holding_period_minutes: f64,

    pub trades: Vec<TradeRecord>,
}

impl BacktestMetrics {
    pub fn from_trades(trades: Vec<TradeRecord>, initial_equity: f64, final_equity: f64) -> Self {
        let total_trades = trades.len();
        let total_return_pct = if initial_equity > 0.0 {
            (final_equity - initial_equity) / initial_equity * 100.0
        } else {
            0.0
        };

        let winning_trades = trades.iter().filter(|t| t.net_pnl > 0.0).count();
        let losing_trades = total_trades - winning_trades;
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let count_reason = |reason: ExitReason| trades.iter().filter(|t| t.exit_reason == reason).count();

        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let total_transaction_costs: f64 = trades.iter().map(|t| t.transaction_cost).sum();
        let net_pnl: f64 = trades.iter().map(|t| t.net_pnl).sum();

        let gross_wins: f64 = trades.iter().map(|t| t.net_pnl).filter(|p| *p > 0.0).sum();
        let gross_losses: f64 = trades
            .iter()
            .map(|t| t.net_pnl)
            .filter(|p| *p <= 0.0)
            .map(f64::abs)
            .sum();
        let profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else if gross_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = Self::calculate_drawdown(&trades, initial_equity);

        let avg_holding_period_minutes = if total_trades > 0 {
            trades.iter().map(|t| t.holding_period_minutes).sum::<i64>() as f64 / total_trades as f64
        } else {
            0.0
        };

        Self {
            initial_equity,
            final_equity,
            total_return_pct,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            take_profit_exits: count_reason(ExitReason::TakeProfit),
            stop_loss_exits: count_reason(ExitReason::StopLoss),
            total_pnl,
            total_transaction_costs,
            net_pnl,
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            avg_holding_period_minutes,
            trades,
        }
    }

    /// Peak-to-trough drop of the realized equity curve
    fn calculate_drawdown(trades: &[TradeRecord], initial_equity: f64) -> (f64, f64) {
        let mut peak = initial_equity;
        let mut equity = initial_equity;
        let mut max_dd = 0.0_f64;

        for trade in trades {
            equity += trade.net_pnl;
            peak = peak.max(equity);
            max_dd = max_dd.max(peak - equity);
        }

        let max_dd_pct = if peak > 0.0 { max_dd / peak * 100.0 } else { 0.0 };
        (max_dd, max_dd_pct)
    }

    pub fn print_report(&self) {
        println!("\n=== BACKTEST REPORT ===");
        println!("  Initial equity:      {:.2}", self.initial_equity);
        println!(
            "  Final equity:        {:.2} ({:+.2}%)",
            self.final_equity, self.total_return_pct
        );
        println!("  Net P&L:             {:.2}", self.net_pnl);
        println!("  Fees:                {:.2}", self.total_transaction_costs);
        println!();
        println!("  Trades:              {}", self.total_trades);
        println!(
            "  Winners / losers:    {} / {} ({:.1}% win rate)",
            self.winning_trades, self.losing_trades, self.win_rate
        );
        println!(
            "  Take-profit exits:   {}   Stop-loss exits: {}",
            self.take_profit_exits, self.stop_loss_exits
        );
        if self.total_trades > 0 {
            println!("  Profit factor:       {:.2}", self.profit_factor);
            println!(
                "  Max drawdown:        {:.2} ({:.2}%)",
                self.max_drawdown, self.max_drawdown_pct
            );
            println!(
                "  Avg holding period:  {:.1} hours",
                self.avg_holding_period_minutes / 60.0
            );
        }
        println!("=======================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(net_pnl: f64, reason: ExitReason) -> TradeRecord {
        let entry_time = Utc::now();
        TradeRecord {
            instrument: "TEST".to_string(),
            entry_time,
            exit_time: entry_time + chrono::Duration::minutes(120),
            entry_price: 100.0,
            exit_price: 100.0 + net_pnl,
            quantity: 1.0,
            pnl: net_pnl,
            pnl_pct: net_pnl,
            holding_period_minutes: 120,
            transaction_cost: 0.0,
            net_pnl,
            exit_reason: reason,
        }
    }

    #[test]
    fn test_metrics_with_mixed_trades() {
        let trades = vec![
            trade(100.0, ExitReason::TakeProfit),
            trade(50.0, ExitReason::MarketClose),
            trade(-30.0, ExitReason::StopLoss),
        ];

        let metrics = BacktestMetrics::from_trades(trades, 10_000.0, 10_120.0);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(metrics.take_profit_exits, 1);
        assert_eq!(metrics.stop_loss_exits, 1);
        assert!((metrics.win_rate - 66.66).abs() < 0.1);
        assert!((metrics.net_pnl - 120.0).abs() < 1e-9);
        assert!((metrics.profit_factor - 5.0).abs() < 1e-9);
        assert!((metrics.total_return_pct - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_with_no_trades() {
        let metrics = BacktestMetrics::from_trades(vec![], 10_000.0, 10_000.0);

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
    }

    #[test]
    fn test_drawdown_calculation() {
        let trades = vec![
            trade(100.0, ExitReason::TakeProfit),
            trade(-200.0, ExitReason::StopLoss),
            trade(50.0, ExitReason::MarketClose),
        ];

        let metrics = BacktestMetrics::from_trades(trades, 10_000.0, 9_950.0);
        assert!((metrics.max_drawdown - 200.0).abs() < 1e-9);
    }
}
