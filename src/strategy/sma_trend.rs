use super::{closes, ensure_candles, Strategy};
use crate::indicators::sma;
use crate::models::Candle;
use crate::{BotError, Result};

/// Close versus a single simple moving average
#[derive(Debug, Clone)]
pub struct SmaTrendStrategy {
    period: usize,
}

impl SmaTrendStrategy {
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(BotError::Config("sma_trend period must be > 0".to_string()));
        }
        Ok(Self { period })
    }
}

impl Default for SmaTrendStrategy {
    fn default() -> Self {
        Self { period: 20 }
    }
}

impl Strategy for SmaTrendStrategy {
    fn vote(&self, candles: &[Candle]) -> Result<i8> {
        ensure_candles(candles, self.min_candles_required())?;

        let prices = closes(candles);
        let average = sma(&prices, self.period).ok_or(BotError::InsufficientData {
            required: self.period,
            available: prices.len(),
        })?;
        let close = prices[prices.len() - 1];

        Ok(if close > average {
            1
        } else if close < average {
            -1
        } else {
            0
        })
    }

    fn name(&self) -> &str {
        "sma_trend"
    }

    fn min_candles_required(&self) -> usize {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles_from_closes;

    #[test]
    fn test_close_above_average() {
        let strategy = SmaTrendStrategy::new(5).unwrap();
        let candles = candles_from_closes(&[100.0, 100.0, 100.0, 100.0, 110.0]);
        assert_eq!(strategy.vote(&candles).unwrap(), 1);
    }

    #[test]
    fn test_close_below_average() {
        let strategy = SmaTrendStrategy::new(5).unwrap();
        let candles = candles_from_closes(&[100.0, 100.0, 100.0, 100.0, 90.0]);
        assert_eq!(strategy.vote(&candles).unwrap(), -1);
    }
}
