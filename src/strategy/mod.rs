// Trading strategy module
pub mod breakout;
pub mod ma_crossover;
pub mod rsi;
pub mod signals;
pub mod sma_trend;

use crate::models::Candle;
use crate::Result;

pub use breakout::BreakoutStrategy;
pub use ma_crossover::MaCrossoverStrategy;
pub use rsi::RsiStrategy;
pub use signals::SignalEngine;
pub use sma_trend::SmaTrendStrategy;

/// Base trait for all voting strategies.
///
/// A strategy is a pure function of the candle slice: same candles, same vote.
pub trait Strategy: Send + Sync {
    /// Vote on the latest candle: +1 buy, -1 sell, 0 no opinion
    fn vote(&self, candles: &[Candle]) -> Result<i8>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}

/// Shared guard for strategies' minimum lookback
pub(crate) fn ensure_candles(candles: &[Candle], required: usize) -> Result<()> {
    if candles.len() < required {
        return Err(crate::BotError::InsufficientData {
            required,
            available: candles.len(),
        });
    }
    Ok(())
}

/// Closing prices in candle order
pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}
