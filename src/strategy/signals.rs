use super::{BreakoutStrategy, MaCrossoverStrategy, RsiStrategy, SmaTrendStrategy, Strategy};
use crate::config::StrategyConfig;
use crate::models::{Candle, Decision, Signal, Vote};
use crate::{BotError, Result};

/// Combines strategy votes into one weighted decision.
///
/// Holds no state between calls: the signal is a function of the candle
/// slice alone.
pub struct SignalEngine {
    strategies: Vec<(Box<dyn Strategy>, f64)>,
    buy_threshold: f64,
    sell_threshold: f64,
}

impl SignalEngine {
    pub fn new(buy_threshold: f64, sell_threshold: f64) -> Self {
        Self {
            strategies: Vec::new(),
            buy_threshold,
            sell_threshold,
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>, weight: f64) -> Self {
        self.strategies.push((strategy, weight));
        self
    }

    /// Build the engine from the enabled strategies in configuration
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let mut engine = Self::new(config.buy_threshold, config.sell_threshold);

        if config.ma_crossover.enabled {
            let ma = &config.ma_crossover;
            engine = engine.with_strategy(
                Box::new(MaCrossoverStrategy::new(ma.fast_period, ma.slow_period)?),
                ma.weight,
            );
        }
        if config.rsi.enabled {
            let rsi = &config.rsi;
            engine = engine.with_strategy(
                Box::new(RsiStrategy::new(rsi.period, rsi.oversold, rsi.overbought)?),
                rsi.weight,
            );
        }
        if config.breakout.enabled {
            engine = engine.with_strategy(
                Box::new(BreakoutStrategy::new(config.breakout.window)?),
                config.breakout.weight,
            );
        }
        if config.sma_trend.enabled {
            engine = engine.with_strategy(
                Box::new(SmaTrendStrategy::new(config.sma_trend.period)?),
                config.sma_trend.weight,
            );
        }

        if engine.strategies.is_empty() {
            return Err(BotError::Config("no strategy enabled".to_string()));
        }

        Ok(engine)
    }

    /// Longest lookback across all strategies
    pub fn min_candles_required(&self) -> usize {
        self.strategies
            .iter()
            .map(|(s, _)| s.min_candles_required())
            .max()
            .unwrap_or(0)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|(s, _)| s.name()).collect()
    }

    /// Evaluate the latest candle.
    ///
    /// Fails with `InsufficientData` before any strategy runs if the slice is
    /// shorter than the longest lookback.
    pub fn evaluate(&self, candles: &[Candle]) -> Result<Signal> {
        let required = self.min_candles_required();
        if candles.len() < required || candles.is_empty() {
            return Err(BotError::InsufficientData {
                required: required.max(1),
                available: candles.len(),
            });
        }
        validate_candle_order(candles)?;

        let mut votes = Vec::with_capacity(self.strategies.len());
        let mut strength = 0.0;
        for (strategy, weight) in &self.strategies {
            let value = strategy.vote(candles)?;
            strength += f64::from(value) * weight;
            votes.push(Vote {
                strategy: strategy.name().to_string(),
                value,
                weight: *weight,
            });
        }

        let decision = if strength >= self.buy_threshold {
            Decision::Buy
        } else if strength <= self.sell_threshold {
            Decision::Sell
        } else {
            Decision::Hold
        };

        tracing::debug!(?decision, strength, votes = votes.len(), "signal evaluated");

        Ok(Signal {
            decision,
            strength,
            votes,
        })
    }
}

/// Candles must be strictly ascending by open time
pub fn validate_candle_order(candles: &[Candle]) -> Result<()> {
    for window in candles.windows(2) {
        if window[1].open_time <= window[0].open_time {
            return Err(BotError::InvalidCandles(format!(
                "candle at {} does not follow {}",
                window[1].open_time.format("%Y-%m-%d %H:%M:%S"),
                window[0].open_time.format("%Y-%m-%d %H:%M:%S")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles_from_closes;

    /// Fixed-vote strategy for exercising the combination rule
    struct Fixed(i8, usize);

    impl Strategy for Fixed {
        fn vote(&self, candles: &[Candle]) -> Result<i8> {
            crate::strategy::ensure_candles(candles, self.1)?;
            Ok(self.0)
        }

        fn name(&self) -> &str {
            "fixed"
        }

        fn min_candles_required(&self) -> usize {
            self.1
        }
    }

    #[test]
    fn test_insufficient_data_produces_no_signal() {
        let engine = SignalEngine::from_config(&StrategyConfig::default()).unwrap();
        assert_eq!(engine.min_candles_required(), 40);

        for len in [0, 1, 15, 39] {
            let candles = candles_from_closes(&vec![100.0; len]);
            let result = engine.evaluate(&candles);
            assert!(
                matches!(result, Err(BotError::InsufficientData { required: 40, available }) if available == len),
                "len {} gave {:?}",
                len,
                result
            );
        }
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let engine = SignalEngine::from_config(&StrategyConfig::default()).unwrap();
        let prices: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.2)
            .collect();
        let candles = candles_from_closes(&prices);

        let first = engine.evaluate(&candles).unwrap();
        let second = engine.evaluate(&candles).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_weighted_sum_thresholds() {
        let candles = candles_from_closes(&[100.0; 5]);

        let engine = SignalEngine::new(1.0, -1.0)
            .with_strategy(Box::new(Fixed(1, 1)), 1.0)
            .with_strategy(Box::new(Fixed(0, 1)), 1.0);
        let signal = engine.evaluate(&candles).unwrap();
        assert_eq!(signal.decision, Decision::Buy);
        assert_eq!(signal.strength, 1.0);
        assert_eq!(signal.votes.len(), 2);

        let engine = SignalEngine::new(1.0, -1.0)
            .with_strategy(Box::new(Fixed(1, 1)), 0.5)
            .with_strategy(Box::new(Fixed(-1, 1)), 2.0);
        let signal = engine.evaluate(&candles).unwrap();
        assert_eq!(signal.decision, Decision::Sell);
        assert_eq!(signal.strength, -1.5);

        let engine = SignalEngine::new(1.0, -1.0)
            .with_strategy(Box::new(Fixed(1, 1)), 1.0)
            .with_strategy(Box::new(Fixed(-1, 1)), 1.0);
        assert_eq!(engine.evaluate(&candles).unwrap().decision, Decision::Hold);
    }

    #[test]
    fn test_no_enabled_strategy_is_config_error() {
        let mut config = StrategyConfig::default();
        config.ma_crossover.enabled = false;
        config.rsi.enabled = false;
        config.breakout.enabled = false;
        config.sma_trend.enabled = false;
        assert!(matches!(
            SignalEngine::from_config(&config),
            Err(BotError::Config(_))
        ));
    }

    #[test]
    fn test_unordered_candles_rejected() {
        let mut candles = candles_from_closes(&[1.0, 2.0, 3.0]);
        candles.swap(0, 2);
        let engine = SignalEngine::new(1.0, -1.0).with_strategy(Box::new(Fixed(1, 1)), 1.0);
        assert!(matches!(
            engine.evaluate(&candles),
            Err(BotError::InvalidCandles(_))
        ));
    }
}
