use super::{apply_allowed_hours, closes, SignalEvaluator, SignalSeries, StrategyParams};
use crate::error::TraderError;
use crate::indicators::{calculate_bollinger, BollingerPoint};
use crate::models::{Bar, PositionType, Signal};
use crate::Result;

/// Bollinger band crossing entry
///
/// Two crossing events are detected on closes:
/// - lower cross: close moves from at/above the lower band to below it
/// - upper cross: close moves from at/below the upper band to above it
///
/// Mapping per `position_type`:
/// - both: lower cross -> long, upper cross -> short
/// - long: upper cross -> short (lower cross ignored)
/// - short: lower cross -> long (upper cross ignored)
#[derive(Debug, Clone, Default)]
pub struct BbTrend;

#[derive(Debug, Clone, Copy)]
struct Config {
    bb_length: usize,
    std: f64,
}

impl BbTrend {
    pub const NAME: &'static str = "bb_trend";

    fn config(params: &StrategyParams) -> Result<Config> {
        let config = Config {
            bb_length: params.require(Self::NAME, "bb_length")?,
            std: params.require(Self::NAME, "std")?,
        };

        if config.bb_length < 2 {
            return Err(Self::invalid("bb_length must be at least 2"));
        }
        if config.std <= 0.0 {
            return Err(Self::invalid("std must be positive"));
        }

        Ok(config)
    }

    fn invalid(reason: &str) -> TraderError {
        TraderError::StrategyParams {
            strategy: Self::NAME.to_string(),
            reason: reason.to_string(),
        }
    }

    fn crossed_below(prev: f64, curr: f64, prev_band: Option<BollingerPoint>, band: Option<BollingerPoint>) -> bool {
        match (prev_band, band) {
            (Some(prev_band), Some(band)) => curr < band.lower && prev >= prev_band.lower,
            _ => false,
        }
    }

    fn crossed_above(prev: f64, curr: f64, prev_band: Option<BollingerPoint>, band: Option<BollingerPoint>) -> bool {
        match (prev_band, band) {
            (Some(prev_band), Some(band)) => curr > band.upper && prev <= prev_band.upper,
            _ => false,
        }
    }
}

impl SignalEvaluator for BbTrend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, params: &StrategyParams) -> Result<()> {
        Self::config(params).map(|_| ())
    }

    fn evaluate(&self, bars: &[Bar], params: &StrategyParams) -> Result<SignalSeries> {
        let config = Self::config(params)?;
        let prices = closes(bars);
        let bands = calculate_bollinger(&prices, config.bb_length, config.std);

        let mut series: SignalSeries = vec![None; bars.len()];
        for i in 1..bars.len() {
            let lower_cross = Self::crossed_below(prices[i - 1], prices[i], bands[i - 1], bands[i]);
            let upper_cross = Self::crossed_above(prices[i - 1], prices[i], bands[i - 1], bands[i]);

            series[i] = match params.position_type {
                PositionType::Both if lower_cross => Some(Signal::Long),
                PositionType::Both if upper_cross => Some(Signal::Short),
                PositionType::Long if upper_cross => Some(Signal::Short),
                PositionType::Short if lower_cross => Some(Signal::Long),
                _ => None,
            };
        }

        apply_allowed_hours(bars, &mut series, params.allowed_hours.as_deref());
        Ok(series)
    }
}
