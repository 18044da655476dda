use super::{apply_allowed_hours, closes, SignalEvaluator, SignalSeries, StrategyParams};
use crate::error::TraderError;
use crate::indicators::{calculate_pct_change, calculate_rsi_series};
use crate::models::{Bar, PositionType, Signal};
use crate::Result;

/// Price-change + RSI trend entry
///
/// - Long: close rose on the bar and RSI is above `rsi_high`
/// - Short: close fell on the bar and RSI is below `rsi_low`
///
/// `position_type` decides which of the two conditions is evaluated at all.
/// Bars without a condition (including RSI warm-up) carry no trigger.
#[derive(Debug, Clone, Default)]
pub struct PatternRsiTrend;

#[derive(Debug, Clone, Copy)]
struct Config {
    length_rsi: usize,
    rsi_low: f64,
    rsi_high: f64,
}

impl PatternRsiTrend {
    pub const NAME: &'static str = "pattern_rsi_trend";

    fn config(params: &StrategyParams) -> Result<Config> {
        let config = Config {
            length_rsi: params.get_or(Self::NAME, "length_rsi", 8)?,
            rsi_low: params.get_or(Self::NAME, "rsi_low", 30.0)?,
            rsi_high: params.get_or(Self::NAME, "rsi_high", 70.0)?,
        };

        if config.length_rsi == 0 {
            return Err(Self::invalid("length_rsi must be positive"));
        }
        if !(0.0..=100.0).contains(&config.rsi_low) || !(0.0..=100.0).contains(&config.rsi_high)
        {
            return Err(Self::invalid("rsi_low and rsi_high must be within 0..=100"));
        }

        Ok(config)
    }

    fn invalid(reason: &str) -> TraderError {
        TraderError::StrategyParams {
            strategy: Self::NAME.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl SignalEvaluator for PatternRsiTrend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, params: &StrategyParams) -> Result<()> {
        Self::config(params).map(|_| ())
    }

    fn evaluate(&self, bars: &[Bar], params: &StrategyParams) -> Result<SignalSeries> {
        let config = Self::config(params)?;
        let prices = closes(bars);
        let pct_change = calculate_pct_change(&prices);
        let rsi = calculate_rsi_series(&prices, config.length_rsi);

        let allow_long = params.position_type != PositionType::Short;
        let allow_short = params.position_type != PositionType::Long;

        let mut series: SignalSeries = pct_change
            .iter()
            .zip(&rsi)
            .map(|(&change, rsi)| {
                let rsi = (*rsi)?;
                if allow_long && change > 0.0 && rsi > config.rsi_high {
                    Some(Signal::Long)
                } else if allow_short && change < 0.0 && rsi < config.rsi_low {
                    Some(Signal::Short)
                } else {
                    None
                }
            })
            .collect();

        apply_allowed_hours(bars, &mut series, params.allowed_hours.as_deref());
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::bars_at;

    fn params(position_type: PositionType) -> StrategyParams {
        StrategyParams::new(position_type)
            .with_value("length_rsi", 2)
            .with_value("rsi_low", 30.0)
            .with_value("rsi_high", 70.0)
    }

    // Steady rally then a sharp sell-off
    const PRICES: [f64; 8] = [100.0, 101.0, 102.0, 103.0, 104.0, 90.0, 80.0, 70.0];

    #[test]
    fn test_both_emits_long_and_short() {
        let bars = bars_at(10, &PRICES);
        let series = PatternRsiTrend.evaluate(&bars, &params(PositionType::Both)).unwrap();

        assert_eq!(series.len(), bars.len());
        assert_eq!(series[0], None); // warm-up
        assert_eq!(series[1], None); // warm-up
        assert_eq!(series[3], Some(Signal::Long));
        assert_eq!(series[7], Some(Signal::Short));
    }

    #[test]
    fn test_long_only_never_emits_short() {
        let bars = bars_at(10, &PRICES);
        let series = PatternRsiTrend.evaluate(&bars, &params(PositionType::Long)).unwrap();

        assert!(series.iter().all(|s| *s != Some(Signal::Short)));
        assert_eq!(series[3], Some(Signal::Long));
    }

    #[test]
    fn test_short_only_never_emits_long() {
        let bars = bars_at(10, &PRICES);
        let series = PatternRsiTrend.evaluate(&bars, &params(PositionType::Short)).unwrap();

        assert!(series.iter().all(|s| *s != Some(Signal::Long)));
        assert_eq!(series[7], Some(Signal::Short));
    }

    #[test]
    fn test_allowed_hours_restriction() {
        let bars = bars_at(14, &PRICES);
        let params = params(PositionType::Both).with_allowed_hours(vec![9, 10]);
        let series = PatternRsiTrend.evaluate(&bars, &params).unwrap();

        assert!(series.iter().all(|s| *s == Some(Signal::Flat)));
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(PatternRsiTrend.validate(&StrategyParams::default()).is_ok());
    }

    #[test]
    fn test_invalid_params() {
        let params = StrategyParams::default().with_value("length_rsi", 0);
        assert!(PatternRsiTrend.validate(&params).is_err());

        let params = StrategyParams::default().with_value("rsi_high", 150.0);
        assert!(PatternRsiTrend.validate(&params).is_err());

        let params = StrategyParams::default().with_value("length_rsi", "fast");
        assert!(PatternRsiTrend.validate(&params).is_err());
    }
}
