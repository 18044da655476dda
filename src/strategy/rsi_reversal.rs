use super::{
    apply_allowed_hours, closes, restrict_position_type, SignalEvaluator, SignalSeries,
    StrategyParams,
};
use crate::error::TraderError;
use crate::indicators::calculate_rsi_series;
use crate::models::{Bar, Signal};
use crate::Result;
use chrono::Timelike;

/// RSI exhaustion entry restricted to a set of trading hours
///
/// - Short: close at or below the previous close and RSI at or below `rsi_oversold`
/// - Long: close above the previous close and RSI at or above `rsi_overbought`
///
/// Other bars, including bars outside `trading_hours`, carry no fresh trigger.
#[derive(Debug, Clone, Default)]
pub struct RsiReversal;

#[derive(Debug, Clone)]
struct Config {
    rsi_length: usize,
    rsi_oversold: f64,
    rsi_overbought: f64,
    trading_hours: Vec<u32>,
}

impl RsiReversal {
    pub const NAME: &'static str = "rsi_reversal";

    fn config(params: &StrategyParams) -> Result<Config> {
        let config = Config {
            rsi_length: params.get_or(Self::NAME, "rsi_length", 9)?,
            rsi_oversold: params.get_or(Self::NAME, "rsi_oversold", 34.0)?,
            rsi_overbought: params.get_or(Self::NAME, "rsi_overbought", 66.0)?,
            trading_hours: params.get_or(Self::NAME, "trading_hours", vec![16, 17])?,
        };

        if config.rsi_length == 0 {
            return Err(Self::invalid("rsi_length must be positive"));
        }
        if config.rsi_oversold >= config.rsi_overbought {
            return Err(Self::invalid("rsi_oversold must be below rsi_overbought"));
        }
        if config.trading_hours.iter().any(|h| *h > 23) {
            return Err(Self::invalid("trading_hours must be within 0..=23"));
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

impl SignalEvaluator for RsiReversal {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, params: &StrategyParams) -> Result<()> {
        Self::config(params).map(|_| ())
    }

    fn evaluate(&self, bars: &[Bar], params: &StrategyParams) -> Result<SignalSeries> {
        let config = Self::config(params)?;
        let prices = closes(bars);
        let rsi = calculate_rsi_series(&prices, config.rsi_length);

        let mut series: SignalSeries = (0..bars.len())
            .map(|i| {
                if !config.trading_hours.contains(&bars[i].timestamp.hour()) {
                    return None;
                }
                let prev = prices[i.checked_sub(1)?];
                let rsi = rsi[i]?;

                let signal = if prices[i] > prev && rsi >= config.rsi_overbought {
                    Signal::Long
                } else if prices[i] <= prev && rsi <= config.rsi_oversold {
                    Signal::Short
                } else {
                    return None;
                };
                restrict_position_type(signal, params.position_type)
            })
            .collect();

        apply_allowed_hours(bars, &mut series, params.allowed_hours.as_deref());
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionType;
    use crate::strategy::evaluate_positions;
    use crate::strategy::test_support::bars_at;

    fn params(position_type: PositionType) -> StrategyParams {
        StrategyParams::new(position_type).with_value("rsi_length", 2)
    }

    const PRICES: [f64; 5] = [100.0, 101.0, 102.0, 103.0, 90.0];

    #[test]
    fn test_signals_inside_trading_hours() {
        let bars = bars_at(16, &PRICES);
        let series = RsiReversal.evaluate(&bars, &params(PositionType::Both)).unwrap();

        assert_eq!(
            series,
            vec![None, None, Some(Signal::Long), Some(Signal::Long), Some(Signal::Short)]
        );
    }

    #[test]
    fn test_outside_trading_hours_has_no_trigger() {
        let bars = bars_at(10, &PRICES);
        let series = RsiReversal.evaluate(&bars, &params(PositionType::Both)).unwrap();
        assert!(series.iter().all(Option::is_none));
    }

    #[test]
    fn test_trigger_carries_over_quiet_bars() {
        // Small pullback: no short trigger, so the long persists
        let bars = bars_at(16, &[100.0, 101.0, 102.0, 103.0, 102.9]);
        let params = params(PositionType::Both);

        let raw = RsiReversal.evaluate(&bars, &params).unwrap();
        assert_eq!(raw[4], None);

        let signals: Vec<Signal> = evaluate_positions(&RsiReversal, &bars, &params, 18)
            .unwrap()
            .iter()
            .map(|s| s.signal)
            .collect();
        assert_eq!(
            signals,
            vec![Signal::Flat, Signal::Flat, Signal::Long, Signal::Long, Signal::Long]
        );
    }

    #[test]
    fn test_long_only_drops_short() {
        let bars = bars_at(16, &PRICES);
        let series = RsiReversal.evaluate(&bars, &params(PositionType::Long)).unwrap();
        assert_eq!(series[3], Some(Signal::Long));
        assert_eq!(series[4], None);
    }

    #[test]
    fn test_custom_trading_hours() {
        let bars = bars_at(10, &PRICES);
        let params = params(PositionType::Both).with_value("trading_hours", vec![10]);
        let series = RsiReversal.evaluate(&bars, &params).unwrap();
        assert_eq!(series[4], Some(Signal::Short));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let params = StrategyParams::default()
            .with_value("rsi_oversold", 70.0)
            .with_value("rsi_overbought", 30.0);
        assert!(RsiReversal.validate(&params).is_err());
    }
}
