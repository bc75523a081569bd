use super::{closes, ensure_candles, Strategy};
use crate::indicators;
use crate::models::Candle;
use crate::{BotError, Result};

/// RSI mean-reversion vote: buy oversold, sell overbought
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Result<Self> {
        if period == 0 || !(0.0..=100.0).contains(&oversold) || oversold >= overbought || overbought > 100.0 {
            return Err(BotError::Config(format!(
                "rsi needs period > 0 and 0 <= oversold ({}) < overbought ({}) <= 100",
                oversold, overbought
            )));
        }
        Ok(Self {
            period,
            oversold,
            overbought,
        })
    }
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

impl Strategy for RsiStrategy {
    fn vote(&self, candles: &[Candle]) -> Result<i8> {
        ensure_candles(candles, self.min_candles_required())?;

        let value = indicators::rsi(&closes(candles), self.period).ok_or(
            BotError::InsufficientData {
                required: self.min_candles_required(),
                available: candles.len(),
            },
        )?;

        tracing::debug!(rsi = value, "rsi");

        Ok(if value < self.oversold {
            1
        } else if value > self.overbought {
            -1
        } else {
            0
        })
    }

    fn name(&self) -> &str {
        "rsi"
    }

    fn min_candles_required(&self) -> usize {
        self.period + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::candles_from_closes;

    #[test]
    fn test_oversold_votes_buy() {
        let prices: Vec<f64> = (0..20).map(|i| 200.0 - i as f64 * 3.0).collect();
        let vote = RsiStrategy::default().vote(&candles_from_closes(&prices)).unwrap();
        assert_eq!(vote, 1);
    }

    #[test]
    fn test_overbought_votes_sell() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 3.0).collect();
        let vote = RsiStrategy::default().vote(&candles_from_closes(&prices)).unwrap();
        assert_eq!(vote, -1);
    }

    #[test]
    fn test_neutral_votes_nothing() {
        let prices: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 100.0 } else { 102.0 })
            .collect();
        let vote = RsiStrategy::default().vote(&candles_from_closes(&prices)).unwrap();
        assert_eq!(vote, 0);
    }

    #[test]
    fn test_needs_period_plus_one() {
        let strategy = RsiStrategy::default();
        assert_eq!(strategy.min_candles_required(), 15);
        assert!(strategy.vote(&candles_from_closes(&[100.0; 14])).is_err());
    }
}
