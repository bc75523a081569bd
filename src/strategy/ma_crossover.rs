use super::{closes, ensure_candles, Strategy};
use crate::indicators::sma;
use crate::models::Candle;
use crate::{BotError, Result};

/// Fast/slow simple moving average crossover.
///
/// Votes +1 while the fast average is above the slow one, -1 while below.
#[derive(Debug, Clone)]
pub struct MaCrossoverStrategy {
    fast_period: usize,
    slow_period: usize,
}

impl MaCrossoverStrategy {
    pub fn new(fast_period: usize, slow_period: usize) -> Result<Self> {
        if fast_period == 0 || fast_period >= slow_period {
            return Err(BotError::Config(format!(
                "ma_crossover needs 0 < fast ({}) < slow ({})",
                fast_period, slow_period
            )));
        }
        Ok(Self {
            fast_period,
            slow_period,
        })
    }
}

impl Default for MaCrossoverStrategy {
    fn default() -> Self {
        Self {
            fast_period: 7,
            slow_period: 40,
        }
    }
}

impl Strategy for MaCrossoverStrategy {
    fn vote(&self, candles: &[Candle]) -> Result<i8> {
        ensure_candles(candles, self.min_candles_required())?;

        let prices = closes(candles);
        let required = self.min_candles_required();
        let fast = sma(&prices, self.fast_period).ok_or(BotError::InsufficientData {
            required,
            available: prices.len(),
        })?;
        let slow = sma(&prices, self.slow_period).ok_or(BotError::InsufficientData {
            required,
            available: prices.len(),
        })?;

        tracing::debug!(fast, slow, "ma_crossover");

        Ok(if fast > slow {
            1
        } else if fast < slow {
            -1
        } else {
            0
        })
    }

    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn min_candles_required(&self) -> usize {
        self.slow_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles_from_closes;

    #[test]
    fn test_uptrend_votes_buy() {
        let strategy = MaCrossoverStrategy::new(3, 10).unwrap();
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(strategy.vote(&candles_from_closes(&prices)).unwrap(), 1);
    }

    #[test]
    fn test_downtrend_votes_sell() {
        let strategy = MaCrossoverStrategy::new(3, 10).unwrap();
        let prices: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        assert_eq!(strategy.vote(&candles_from_closes(&prices)).unwrap(), -1);
    }

    #[test]
    fn test_flat_market_votes_nothing() {
        let strategy = MaCrossoverStrategy::new(3, 10).unwrap();
        assert_eq!(strategy.vote(&candles_from_closes(&[50.0; 12])).unwrap(), 0);
    }

    #[test]
    fn test_insufficient_candles() {
        let strategy = MaCrossoverStrategy::default();
        let result = strategy.vote(&candles_from_closes(&[100.0; 39]));
        assert!(matches!(
            result,
            Err(BotError::InsufficientData {
                required: 40,
                available: 39
            })
        ));
    }

    #[test]
    fn test_rejects_inverted_periods() {
        assert!(MaCrossoverStrategy::new(40, 7).is_err());
        assert!(MaCrossoverStrategy::new(0, 7).is_err());
    }
}
