// Trading strategy module
pub mod bb_trend;
pub mod pattern_rsi_trend;
pub mod registry;
pub mod rsi_reversal;

use chrono::{DateTime, Timelike, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TraderError;
use crate::models::{Bar, PositionType, Signal};
use crate::Result;

pub use bb_trend::BbTrend;
pub use pattern_rsi_trend::PatternRsiTrend;
pub use registry::StrategyRegistry;
pub use rsi_reversal::RsiReversal;

/// Raw strategy output per bar: `Some` is a fresh trigger, `None` inherits
/// the previous bar's signal
pub type SignalSeries = Vec<Option<Signal>>;

/// Parameters handed to a signal evaluator for one hour of trading
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default)]
    pub position_type: PositionType,
    #[serde(default)]
    pub allowed_hours: Option<Vec<u32>>,
    /// Strategy-specific values (e.g. `length_rsi`, `bb_length`)
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl StrategyParams {
    pub fn new(position_type: PositionType) -> Self {
        Self {
            position_type,
            ..Default::default()
        }
    }

    pub fn with_allowed_hours(mut self, hours: Vec<u32>) -> Self {
        self.allowed_hours = Some(hours);
        self
    }

    pub fn with_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Read a required value
    pub fn require<T: DeserializeOwned>(&self, strategy: &str, key: &str) -> Result<T> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| TraderError::StrategyParams {
                strategy: strategy.to_string(),
                reason: format!("missing parameter `{}`", key),
            })?;
        Self::decode(strategy, key, value)
    }

    /// Read an optional value, falling back to `default`
    pub fn get_or<T: DeserializeOwned>(&self, strategy: &str, key: &str, default: T) -> Result<T> {
        match self.values.get(key) {
            Some(value) => Self::decode(strategy, key, value),
            None => Ok(default),
        }
    }

    fn decode<T: DeserializeOwned>(strategy: &str, key: &str, value: &Value) -> Result<T> {
        serde_json::from_value(value.clone()).map_err(|e| TraderError::StrategyParams {
            strategy: strategy.to_string(),
            reason: format!("parameter `{}`: {}", key, e),
        })
    }
}

/// Signal evaluator: price history + parameters -> per-bar signal triggers
///
/// Implementations are pure with respect to their inputs.
pub trait SignalEvaluator: Send + Sync {
    /// Registry name (matches the deployment file's `strategy` field)
    fn name(&self) -> &str;

    /// Check that `params` are usable; called for every configured hour at startup
    fn validate(&self, params: &StrategyParams) -> Result<()>;

    /// Produce one entry per bar in `bars`
    fn evaluate(&self, bars: &[Bar], params: &StrategyParams) -> Result<SignalSeries>;
}

/// Final signal for one bar after restriction, forward-fill and session-end rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluatedSignal {
    pub timestamp: DateTime<Utc>,
    pub signal: Signal,
    /// Bar is at or after the daily cutoff; any open position must be closed
    pub session_closed: bool,
}

/// Zero every bar whose hour is outside `allowed_hours`
pub fn apply_allowed_hours(bars: &[Bar], series: &mut SignalSeries, allowed_hours: Option<&[u32]>) {
    let Some(allowed) = allowed_hours else {
        return;
    };

    for (bar, signal) in bars.iter().zip(series.iter_mut()) {
        if !allowed.contains(&bar.timestamp.hour()) {
            *signal = Some(Signal::Flat);
        }
    }
}

/// Drop the disallowed direction
pub fn restrict_position_type(signal: Signal, position_type: PositionType) -> Option<Signal> {
    match (position_type, signal) {
        (PositionType::Long, Signal::Short) | (PositionType::Short, Signal::Long) => None,
        _ => Some(signal),
    }
}

/// Carry each trigger forward over bars without one; leading gaps are flat
pub fn forward_fill(series: &[Option<Signal>]) -> Vec<Signal> {
    let mut current = Signal::Flat;
    series
        .iter()
        .map(|s| {
            if let Some(signal) = s {
                current = *signal;
            }
            current
        })
        .collect()
}

/// Run `evaluator` and resolve its output into one signal per bar
///
/// Bars at or after `cutoff_hour` are forced flat before forward-filling.
pub fn evaluate_positions(
    evaluator: &dyn SignalEvaluator,
    bars: &[Bar],
    params: &StrategyParams,
    cutoff_hour: u32,
) -> Result<Vec<EvaluatedSignal>> {
    let mut raw = evaluator.evaluate(bars, params)?;
    if raw.len() != bars.len() {
        return Err(TraderError::StrategyParams {
            strategy: evaluator.name().to_string(),
            reason: format!("returned {} signals for {} bars", raw.len(), bars.len()),
        });
    }

    let closed: Vec<bool> = bars
        .iter()
        .map(|b| b.timestamp.hour() >= cutoff_hour)
        .collect();
    for (signal, &is_closed) in raw.iter_mut().zip(&closed) {
        if is_closed {
            *signal = Some(Signal::Flat);
        }
    }

    Ok(forward_fill(&raw)
        .into_iter()
        .zip(bars)
        .zip(closed)
        .map(|((signal, bar), session_closed)| EvaluatedSignal {
            timestamp: bar.timestamp,
            signal,
            session_closed,
        })
        .collect())
}

/// Extract closes from bars
pub(crate) fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// One-minute bars starting at `hour:00` on a fixed day
    pub fn bars_at(hour: u32, closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::minutes(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                tick_volume: 100,
                spread: 1,
                volume: 10,
            })
            .collect()
    }

    /// Evaluator replaying a fixed series
    pub struct Scripted(pub SignalSeries);

    impl SignalEvaluator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn validate(&self, _params: &StrategyParams) -> Result<()> {
            Ok(())
        }

        fn evaluate(&self, bars: &[Bar], _params: &StrategyParams) -> Result<SignalSeries> {
            Ok(self.0.iter().take(bars.len()).cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{bars_at, Scripted};
    use super::*;

    #[test]
    fn test_forward_fill() {
        let filled = forward_fill(&[Some(Signal::Long), None, None, Some(Signal::Short)]);
        assert_eq!(
            filled,
            vec![Signal::Long, Signal::Long, Signal::Long, Signal::Short]
        );
    }

    #[test]
    fn test_forward_fill_leading_gap_is_flat() {
        let filled = forward_fill(&[None, None, Some(Signal::Long)]);
        assert_eq!(filled, vec![Signal::Flat, Signal::Flat, Signal::Long]);
    }

    #[test]
    fn test_allowed_hours_zeroes_other_hours() {
        let bars = bars_at(14, &[1.0, 2.0]);
        let mut series = vec![Some(Signal::Long), Some(Signal::Short)];
        apply_allowed_hours(&bars, &mut series, Some(&[9, 10]));
        assert_eq!(series, vec![Some(Signal::Flat), Some(Signal::Flat)]);
    }

    #[test]
    fn test_allowed_hours_keeps_matching_hours() {
        let bars = bars_at(9, &[1.0]);
        let mut series = vec![Some(Signal::Long)];
        apply_allowed_hours(&bars, &mut series, Some(&[9, 10]));
        assert_eq!(series, vec![Some(Signal::Long)]);
    }

    #[test]
    fn test_restrict_position_type() {
        assert_eq!(restrict_position_type(Signal::Short, PositionType::Long), None);
        assert_eq!(restrict_position_type(Signal::Long, PositionType::Short), None);
        assert_eq!(
            restrict_position_type(Signal::Short, PositionType::Both),
            Some(Signal::Short)
        );
    }

    #[test]
    fn test_session_cutoff_forces_flat() {
        let bars = bars_at(18, &[1.0, 2.0]);
        let evaluator = Scripted(vec![Some(Signal::Long), Some(Signal::Long)]);
        let resolved =
            evaluate_positions(&evaluator, &bars, &StrategyParams::default(), 18).unwrap();

        assert!(resolved.iter().all(|s| s.signal == Signal::Flat));
        assert!(resolved.iter().all(|s| s.session_closed));
    }

    #[test]
    fn test_evaluate_positions_forward_fills_before_cutoff() {
        let bars = bars_at(10, &[1.0, 2.0, 3.0, 4.0]);
        let evaluator = Scripted(vec![Some(Signal::Long), None, None, Some(Signal::Short)]);
        let resolved =
            evaluate_positions(&evaluator, &bars, &StrategyParams::default(), 18).unwrap();

        let signals: Vec<Signal> = resolved.iter().map(|s| s.signal).collect();
        assert_eq!(
            signals,
            vec![Signal::Long, Signal::Long, Signal::Long, Signal::Short]
        );
        assert!(!resolved[3].session_closed);
    }

    #[test]
    fn test_evaluate_positions_rejects_length_mismatch() {
        let bars = bars_at(10, &[1.0, 2.0]);
        let evaluator = Scripted(vec![Some(Signal::Long)]);
        let result = evaluate_positions(&evaluator, &bars, &StrategyParams::default(), 18);
        assert!(result.is_err());
    }

    #[test]
    fn test_params_require_and_default() {
        let params = StrategyParams::default().with_value("length_rsi", 14);
        let length: usize = params.require("pattern_rsi_trend", "length_rsi").unwrap();
        assert_eq!(length, 14);

        let low: f64 = params.get_or("pattern_rsi_trend", "rsi_low", 30.0).unwrap();
        assert_eq!(low, 30.0);

        let missing: Result<f64> = params.require("bb_trend", "std");
        assert!(missing.unwrap_err().to_string().contains("missing parameter `std`"));
    }
}
