use super::moving_average::calculate_sma;

/// Bollinger band values for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerPoint {
    pub lower: f64,
    pub middle: f64,
    pub upper: f64,
}

/// Calculate Bollinger bands for every bar
///
/// Middle band is the SMA over `period` closes; the bands sit `multiplier`
/// population standard deviations (divide by N) above and below it.
/// The first `period - 1` bars are warm-up and yield `None`.
pub fn calculate_bollinger(
    prices: &[f64],
    period: usize,
    multiplier: f64,
) -> Vec<Option<BollingerPoint>> {
    (0..prices.len())
        .map(|i| {
            let window = &prices[..=i];
            let middle = calculate_sma(window, period)?;
            let variance = window
                .iter()
                .rev()
                .take(period)
                .map(|p| (p - middle).powi(2))
                .sum::<f64>()
                / period as f64;
            let width = multiplier * variance.sqrt();

            Some(BollingerPoint {
                lower: middle - width,
                middle,
                upper: middle + width,
            })
        })
        .collect()
}
