use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::risk::ExitReason;

/// One entry/exit pair from a backtest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundTrip {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    /// None when the position was closed at the end of the data
    pub exit_reason: Option<ExitReason>,
}

impl RoundTrip {
    pub fn new(
        entry_time: DateTime<Utc>,
        entry_price: f64,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        quantity: f64,
        exit_reason: Option<ExitReason>,
    ) -> Self {
        Self {
            entry_time,
            exit_time,
            entry_price,
            exit_price,
            quantity,
            pnl: (exit_price - entry_price) * quantity,
            pnl_pct: ((exit_price - entry_price) / entry_price) * 100.0,
            exit_reason,
        }
    }
}

/// Backtest performance summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Balance
    pub initial_balance: f64,
    pub final_balance: f64,
    pub profit: f64,
    pub total_return_pct: f64,

    // Trade Statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub stop_losses: usize,
    pub take_profits: usize,

    // Risk
    pub max_drawdown_pct: f64,

    pub trades: Vec<RoundTrip>,
}

impl BacktestMetrics {
    pub fn from_trades(trades: Vec<RoundTrip>, initial_balance: f64, final_balance: f64) -> Self {
        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.pnl > 0.0).count();
        let losing_trades = total_trades - winning_trades;
        let win_rate = if total_trades > 0 {
            (winning_trades as f64 / total_trades as f64) * 100.0
        } else {
            0.0
        };

        let count = |reason: ExitReason| {
            trades
                .iter()
                .filter(|t| t.exit_reason == Some(reason))
                .count()
        };

        Self {
            initial_balance,
            final_balance,
            profit: final_balance - initial_balance,
            total_return_pct: ((final_balance - initial_balance) / initial_balance) * 100.0,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            stop_losses: count(ExitReason::StopLoss),
            take_profits: count(ExitReason::TakeProfit),
            max_drawdown_pct: Self::calculate_drawdown(&trades, initial_balance),
            trades,
        }
    }

    /// Largest peak-to-trough drop of the balance after each closed trade (%)
    fn calculate_drawdown(trades: &[RoundTrip], initial_balance: f64) -> f64 {
        let mut balance = initial_balance;
        let mut peak = initial_balance;
        let mut max_drawdown_pct: f64 = 0.0;

        for trade in trades {
            balance += trade.pnl;
            if balance > peak {
                peak = balance;
            }
            if peak > 0.0 {
                max_drawdown_pct = max_drawdown_pct.max((peak - balance) / peak * 100.0);
            }
        }

        max_drawdown_pct
    }

    pub fn print_report(&self) {
        println!("\n📊 BACKTEST RESULTS");
        println!("  Initial Balance:       {:.2}", self.initial_balance);
        println!("  Final Balance:         {:.2}", self.final_balance);
        println!(
            "  Profit:                {:.2} ({:.2}%)",
            self.profit, self.total_return_pct
        );

        println!("\n📈 TRADES");
        println!("  Total:                 {}", self.total_trades);
        println!(
            "  Winning / Losing:      {} / {}",
            self.winning_trades, self.losing_trades
        );
        println!("  Win Rate:              {:.1}%", self.win_rate);
        println!(
            "  Stop-loss / Take-profit exits: {} / {}",
            self.stop_losses, self.take_profits
        );
        println!("  Max Drawdown:          {:.2}%", self.max_drawdown_pct);
    }
}
