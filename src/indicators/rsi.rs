/// Calculate the Relative Strength Index for every bar
///
/// Gains and losses are smoothed with Wilder's moving average, computed as an
/// adjusted exponential mean with `alpha = 1 / period`. The first `period`
/// bars are warm-up and yield `None`, as does any bar where the average gain
/// and loss are both zero.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < 2 {
        return series;
    }

    let alpha = 1.0 / period as f64;
    let decay = 1.0 - alpha;

    // Running numerators/denominators of the adjusted EWM
    let mut gain_num = 0.0;
    let mut loss_num = 0.0;
    let mut weight = 0.0;

    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        gain_num = gain + decay * gain_num;
        loss_num = loss + decay * loss_num;
        weight = 1.0 + decay * weight;

        // i changes observed so far
        if i < period {
            continue;
        }

        let avg_gain = gain_num / weight;
        let avg_loss = loss_num / weight;
        let total = avg_gain + avg_loss;
        if total > 0.0 {
            series[i] = Some(100.0 * avg_gain / total);
        }
    }

    series
}
