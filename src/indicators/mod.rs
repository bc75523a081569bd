// Technical indicators used by the signal strategies
// Pure functions over closing prices / candles, None when the window is not filled

pub mod breakout;
pub mod moving_average;
pub mod rsi;

pub use breakout::{channel, Channel};
pub use moving_average::sma;
pub use rsi::rsi;
