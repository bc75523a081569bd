use super::{ensure_candles, Strategy};
use crate::indicators::channel;
use crate::models::Candle;
use crate::{BotError, Result};

/// Breakout of the recent high/low channel
#[derive(Debug, Clone)]
pub struct BreakoutStrategy {
    window: usize,
}

impl BreakoutStrategy {
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(BotError::Config("breakout window must be > 0".to_string()));
        }
        Ok(Self { window })
    }
}

impl Default for BreakoutStrategy {
    fn default() -> Self {
        Self { window: 10 }
    }
}

impl Strategy for BreakoutStrategy {
    fn vote(&self, candles: &[Candle]) -> Result<i8> {
        ensure_candles(candles, self.min_candles_required())?;

        let band = channel(candles, self.window).ok_or(BotError::InsufficientData {
            required: self.min_candles_required(),
            available: candles.len(),
        })?;
        // ensure_candles guarantees at least one candle
        let close = candles[candles.len() - 1].close;

        Ok(if close > band.high {
            1
        } else if close < band.low {
            -1
        } else {
            0
        })
    }

    fn name(&self) -> &str {
        "breakout"
    }

    fn min_candles_required(&self) -> usize {
        self.window + 1
    }
}
