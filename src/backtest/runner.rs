use chrono::{DateTime, Utc};

use crate::backtest::metrics::{BacktestMetrics, RoundTrip};
use crate::models::{Candle, Decision};
use crate::risk::{ExitReason, RiskLimits};
use crate::strategy::signals::validate_candle_order;
use crate::strategy::SignalEngine;
use crate::{BotError, Result};

/// Replays historical candles through the live signal and risk rules.
///
/// All-in sizing: a BUY spends the whole balance at the candle close, a
/// SELL converts it all back. Stop-loss/take-profit run before the signal,
/// as in live trading.
pub struct BacktestRunner {
    initial_balance: f64,
    risk: RiskLimits,
}

impl BacktestRunner {
    pub fn new(initial_balance: f64, risk: RiskLimits) -> Self {
        Self {
            initial_balance,
            risk,
        }
    }

    pub fn run(&self, engine: &SignalEngine, candles: &[Candle]) -> Result<BacktestMetrics> {
        let lookback = engine.min_candles_required().max(1);
        if candles.len() < lookback {
            return Err(BotError::InsufficientData {
                required: lookback,
                available: candles.len(),
            });
        }
        validate_candle_order(candles)?;

        tracing::info!(candles = candles.len(), lookback, "Starting backtest");

        let mut balance = self.initial_balance;
        let mut open: Option<(DateTime<Utc>, f64, f64)> = None; // (entry time, price, quantity)
        let mut trades = Vec::new();

        for i in (lookback - 1)..candles.len() {
            let window = &candles[i + 1 - lookback..=i];
            let candle = &candles[i];
            let price = candle.close;

            let signal = engine.evaluate(window)?;

            match open {
                None if signal.decision == Decision::Buy && balance > 0.0 => {
                    let quantity = balance / price;
                    tracing::debug!(price, quantity, "Simulated buy");
                    open = Some((candle.open_time, price, quantity));
                    balance = 0.0;
                }
                Some((entry_time, entry_price, quantity)) => {
                    let exit = self.risk.check_exit(entry_price, price).or(
                        (signal.decision == Decision::Sell).then_some(ExitReason::StrategySell),
                    );
                    if let Some(reason) = exit {
                        balance = quantity * price;
                        tracing::debug!(price, balance, reason = %reason, "Simulated sell");
                        trades.push(RoundTrip::new(
                            entry_time,
                            entry_price,
                            candle.open_time,
                            price,
                            quantity,
                            Some(reason),
                        ));
                        open = None;
                    }
                }
                None => {}
            }
        }

        // close what is still open at the last price
        if let (Some((entry_time, entry_price, quantity)), Some(last)) = (open, candles.last()) {
            balance = quantity * last.close;
            trades.push(RoundTrip::new(
                entry_time,
                entry_price,
                last.open_time,
                last.close,
                quantity,
                None,
            ));
        }

        let metrics = BacktestMetrics::from_trades(trades, self.initial_balance, balance);

        tracing::info!(
            trades = metrics.total_trades,
            final_balance = metrics.final_balance,
            profit = metrics.profit,
            "Backtest complete"
        );

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::strategy::test_support::candles_from_closes;
    use crate::strategy::SmaTrendStrategy;

    fn trend_engine(period: usize) -> SignalEngine {
        SignalEngine::new(1.0, -1.0)
            .with_strategy(Box::new(SmaTrendStrategy::new(period).unwrap()), 1.0)
    }

    fn wide_risk() -> RiskLimits {
        RiskLimits {
            stop_loss_pct: 0.5,
            take_profit_pct: 0.9,
        }
    }

    #[test]
    fn test_uptrend_then_drop_is_one_winning_trade() {
        // rise, then one sharp drop below the average
        let mut prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        prices.push(110.0);

        let runner = BacktestRunner::new(1000.0, wide_risk());
        let metrics = runner
            .run(&trend_engine(5), &candles_from_closes(&prices))
            .unwrap();

        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.trades[0].exit_reason, Some(ExitReason::StrategySell));
        assert!(metrics.final_balance > 1000.0);
    }

    #[test]
    fn test_stop_loss_overrides_signal() {
        let mut prices: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        // signal and stop both fire on the drop; the stop is reported
        prices.push(97.0);

        let runner = BacktestRunner::new(
            1000.0,
            RiskLimits {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.5,
            },
        );
        let metrics = runner
            .run(&trend_engine(5), &candles_from_closes(&prices))
            .unwrap();

        assert_eq!(metrics.stop_losses, 1);
        assert!(metrics.final_balance < 1000.0);
    }

    #[test]
    fn test_open_position_closed_at_end() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.1).collect();
        let runner = BacktestRunner::new(1000.0, wide_risk());
        let metrics = runner
            .run(&trend_engine(5), &candles_from_closes(&prices))
            .unwrap();

        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.trades[0].exit_reason, None);
    }

    #[test]
    fn test_insufficient_data() {
        let engine = SignalEngine::from_config(&StrategyConfig::default()).unwrap();
        let runner = BacktestRunner::new(1000.0, RiskLimits::default());
        let result = runner.run(&engine, &candles_from_closes(&[100.0; 10]));
        assert!(matches!(
            result,
            Err(BotError::InsufficientData {
                required: 40,
                available: 10
            })
        ));
    }
}
