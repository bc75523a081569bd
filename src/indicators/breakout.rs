use crate::models::Candle;

/// Highest high and lowest low over a candle window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    pub high: f64,
    pub low: f64,
}

/// Price channel of the `window` candles *before* the last one.
///
/// The last candle is excluded so its close can be compared against the range
/// it is breaking out of.
pub fn channel(candles: &[Candle], window: usize) -> Option<Channel> {
    if window == 0 || candles.len() < window + 1 {
        return None;
    }

    let end = candles.len() - 1;
    let range = &candles[end - window..end];

    Some(Channel {
        high: range.iter().map(|c| c.high).fold(f64::MIN, f64::max),
        low: range.iter().map(|c| c.low).fold(f64::MAX, f64::min),
    })
}
