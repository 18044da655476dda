use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::TraderError;
use crate::models::FillPolicy;
use crate::Result;

/// What to do with an open position when the signal turns neutral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeutralPolicy {
    /// Close the position (a neutral signal means "be flat")
    #[default]
    Close,
    /// Keep the position until an opposite signal, TP/SL or session end
    Hold,
}

/// Runtime knobs of the execution engine (`engine` section of the deployment file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    /// Trailing window handed to the strategy
    pub history_bars: usize,
    /// Bars at or after this hour are forced flat
    pub session_cutoff_hour: u32,
    /// Wall-clock time at which the session loop stops
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    /// Maximum accepted slippage in points
    pub deviation: u32,
    pub neutral_policy: NeutralPolicy,
    pub preferred_filling: FillPolicy,
    /// Close the open position when the clock enters an hour without parameters
    pub flatten_on_inactive_hour: bool,
    /// Longest single sleep while waiting for the first trading hour
    pub max_wait_slice_secs: u64,
    /// Optional JSON-lines trade ledger
    pub ledger_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 750,
            history_bars: 280,
            session_cutoff_hour: 18,
            end_time: NaiveTime::from_hms_opt(17, 54, 0).unwrap_or(NaiveTime::MIN),
            deviation: 10,
            neutral_policy: NeutralPolicy::Close,
            preferred_filling: FillPolicy::Return,
            flatten_on_inactive_hour: true,
            max_wait_slice_secs: 300,
            ledger_path: None,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait_slice(&self) -> Duration {
        Duration::from_secs(self.max_wait_slice_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TraderError::config("engine.poll_interval_ms", "must be positive"));
        }
        if self.history_bars < 2 {
            return Err(TraderError::config("engine.history_bars", "must be at least 2"));
        }
        if self.session_cutoff_hour > 24 {
            return Err(TraderError::config(
                "engine.session_cutoff_hour",
                "must be within 0..=24",
            ));
        }
        if self.max_wait_slice_secs == 0 {
            return Err(TraderError::config("engine.max_wait_slice_secs", "must be positive"));
        }
        Ok(())
    }
}

/// `HH:MM` (or `HH:MM:SS`) wall-clock times
pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time `{}`, expected HH:MM", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.poll_interval(), Duration::from_millis(750));
        assert_eq!(settings.history_bars, 280);
        assert_eq!(settings.session_cutoff_hour, 18);
        assert_eq!(settings.end_time, NaiveTime::from_hms_opt(17, 54, 0).unwrap());
        assert_eq!(settings.neutral_policy, NeutralPolicy::Close);
        assert!(settings.flatten_on_inactive_hour);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let settings: EngineSettings = serde_json::from_value(serde_json::json!({
            "end_time": "16:30",
            "neutral_policy": "hold",
        }))
        .unwrap();

        assert_eq!(settings.end_time, NaiveTime::from_hms_opt(16, 30, 0).unwrap());
        assert_eq!(settings.neutral_policy, NeutralPolicy::Hold);
        assert_eq!(settings.poll_interval_ms, 750);
    }

    #[test]
    fn test_bad_end_time() {
        let result: std::result::Result<EngineSettings, _> =
            serde_json::from_value(serde_json::json!({ "end_time": "late" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let settings = EngineSettings {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
