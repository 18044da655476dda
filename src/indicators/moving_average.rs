/// Calculate Simple Moving Average (SMA) of the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// SMA for every bar; the first `period - 1` bars are `None`
pub fn calculate_sma_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|i| calculate_sma(&prices[..=i], period))
        .collect()
}

/// Fractional change between consecutive closes; the first bar is 0
pub fn calculate_pct_change(prices: &[f64]) -> Vec<f64> {
    let mut changes = Vec::with_capacity(prices.len());
    for i in 0..prices.len() {
        if i == 0 || prices[i - 1] == 0.0 {
            changes.push(0.0);
        } else {
            changes.push(prices[i] / prices[i - 1] - 1.0);
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.is_none());
    }

    #[test]
    fn test_sma_series() {
        let prices = vec![1.0, 2.0, 3.0, 4.0];
        let series = calculate_sma_series(&prices, 2);
        assert_eq!(series, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn test_pct_change() {
        let changes = calculate_pct_change(&[100.0, 110.0, 99.0]);
        assert_eq!(changes[0], 0.0);
        assert!((changes[1] - 0.1).abs() < 1e-12);
        assert!((changes[2] + 0.1).abs() < 1e-12);
    }
}
