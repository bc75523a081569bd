/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_uses_most_recent_window() {
        let closes = vec![1.0, 100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(sma(&closes, 5), Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let closes = vec![100.0, 102.0];
        assert!(sma(&closes, 5).is_none());
    }

    #[test]
    fn test_sma_zero_period() {
        assert!(sma(&[1.0, 2.0], 0).is_none());
    }
}
