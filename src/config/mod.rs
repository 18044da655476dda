// Deployment configuration
pub mod settings;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::TraderError;
use crate::models::{PositionType, Timeframe};
use crate::strategy::{SignalEvaluator, StrategyParams, StrategyRegistry};
use crate::Result;

pub use settings::{EngineSettings, NeutralPolicy};

const DEFAULT_LOT_SIZE: f64 = 1.0;
const DEFAULT_MAGIC_NUMBER: u64 = 2;
const ENV_PREFIX: &str = "AUTOTRADER";

/// Take-profit / stop-loss / strategy parameters active during one hour of the day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourParameters {
    /// Take-profit distance in price points
    pub tp: f64,
    /// Stop-loss distance in price points
    pub sl: f64,
    pub strategy: StrategyParams,
}

impl HourParameters {
    pub fn new(tp: f64, sl: f64, strategy: StrategyParams) -> Self {
        Self { tp, sl, strategy }
    }

    pub fn position_type(&self) -> PositionType {
        self.strategy.position_type
    }
}

/// Source of per-hour parameters, consulted by the parameter controller
pub trait ParameterProvider: Send + Sync {
    /// `None` means the hour is not configured for trading
    fn params_for_hour(&self, hour: u32) -> Option<Arc<HourParameters>>;
}

/// Validated deployment file
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub strategy: String,
    /// Trading hours, sorted ascending
    pub hours: Vec<u32>,
    pub hour_params: BTreeMap<u32, Arc<HourParameters>>,
    pub lot_size: f64,
    pub magic_number: u64,
    pub engine: EngineSettings,
}

#[derive(Debug, Deserialize)]
struct RawDeployConfig {
    symbol: Option<String>,
    timeframe: Option<String>,
    strategy: Option<String>,
    hours: Option<Vec<i64>>,
    hour_params: Option<BTreeMap<String, RawHourParams>>,
    lote: Option<f64>,
    magic_number: Option<u64>,
    #[serde(default)]
    engine: EngineSettings,
}

#[derive(Debug, Deserialize)]
struct RawHourParams {
    tp: Option<f64>,
    sl: Option<f64>,
    position_type: Option<String>,
    allowed_hours: Option<Vec<u32>>,
    #[serde(flatten)]
    values: Map<String, Value>,
}

impl DeployConfig {
    /// Load a JSON deployment file, with `AUTOTRADER__ENGINE__*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TraderError::config(
                "path",
                format!("config file not found: {}", path.display()),
            ));
        }

        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let raw: RawDeployConfig = settings.try_deserialize()?;
        Self::from_raw(raw)
    }

    /// Parse and validate a JSON document without touching the environment
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawDeployConfig = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawDeployConfig) -> Result<Self> {
        let symbol = required(raw.symbol, "symbol")?;
        let timeframe_code = required(raw.timeframe, "timeframe")?;
        let strategy = required(raw.strategy, "strategy")?;
        let raw_hours = required(raw.hours, "hours")?;
        let mut raw_params = required(raw.hour_params, "hour_params")?;

        if symbol.trim().is_empty() {
            return Err(TraderError::config("symbol", "must not be empty"));
        }

        let timeframe = timeframe_code
            .parse::<Timeframe>()
            .map_err(|e| TraderError::config("timeframe", e))?;

        if raw_hours.is_empty() {
            return Err(TraderError::config("hours", "must be a non-empty list"));
        }

        let mut seen = HashSet::new();
        let mut hours = Vec::with_capacity(raw_hours.len());
        for hour in raw_hours {
            if !(0..=23).contains(&hour) {
                return Err(TraderError::config(
                    "hours",
                    format!("hour {} is outside 0..=23", hour),
                ));
            }
            let hour = hour as u32;
            if !seen.insert(hour) {
                return Err(TraderError::config("hours", format!("duplicate hour {}", hour)));
            }
            hours.push(hour);
        }
        hours.sort_unstable();

        let mut hour_params = BTreeMap::new();
        for &hour in &hours {
            let raw = raw_params.remove(&hour.to_string()).ok_or_else(|| {
                TraderError::config("hour_params", format!("missing parameters for hour {}", hour))
            })?;
            hour_params.insert(hour, Arc::new(parse_hour_params(hour, raw)?));
        }

        let lot_size = raw.lote.unwrap_or(DEFAULT_LOT_SIZE);
        if lot_size.is_nan() || lot_size <= 0.0 {
            return Err(TraderError::config("lote", "must be positive"));
        }

        raw.engine.validate()?;

        Ok(Self {
            symbol,
            timeframe,
            strategy,
            hours,
            hour_params,
            lot_size,
            magic_number: raw.magic_number.unwrap_or(DEFAULT_MAGIC_NUMBER),
            engine: raw.engine,
        })
    }

    /// Resolve the configured strategy and validate its parameters for every hour
    pub fn resolve_strategy(&self, registry: &StrategyRegistry) -> Result<Arc<dyn SignalEvaluator>> {
        let evaluator = registry.resolve(&self.strategy)?;
        for params in self.hour_params.values() {
            evaluator.validate(&params.strategy)?;
        }
        Ok(evaluator)
    }

    pub fn is_trading_hour(&self, hour: u32) -> bool {
        self.hours.contains(&hour)
    }

    pub fn first_hour(&self) -> Option<u32> {
        self.hours.first().copied()
    }

    pub fn last_hour(&self) -> Option<u32> {
        self.hours.last().copied()
    }

    /// Human-readable overview of the deployment, printed by `--mode summary`
    pub fn summary(&self, config_path: &Path) -> Value {
        let hour_configs: Map<String, Value> = self
            .hour_params
            .iter()
            .map(|(hour, params)| {
                (
                    hour.to_string(),
                    json!({
                        "tp": params.tp,
                        "sl": params.sl,
                        "position_type": params.position_type().as_str(),
                    }),
                )
            })
            .collect();

        json!({
            "config_file": config_path.display().to_string(),
            "strategy": self.strategy,
            "symbol": self.symbol,
            "timeframe": self.timeframe.code(),
            "lot_size": self.lot_size,
            "magic_number": self.magic_number,
            "trading_hours": self.hours,
            "total_sessions": self.hours.len(),
            "hour_configs": hour_configs,
        })
    }
}

impl ParameterProvider for DeployConfig {
    fn params_for_hour(&self, hour: u32) -> Option<Arc<HourParameters>> {
        if !self.is_trading_hour(hour) {
            return None;
        }
        self.hour_params.get(&hour).cloned()
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| TraderError::config(field, "missing required field"))
}

fn parse_hour_params(hour: u32, raw: RawHourParams) -> Result<HourParameters> {
    let field = |name: &str| format!("hour_params.{}.{}", hour, name);

    let tp = raw
        .tp
        .ok_or_else(|| TraderError::config(field("tp"), "missing required field"))?;
    let sl = raw
        .sl
        .ok_or_else(|| TraderError::config(field("sl"), "missing required field"))?;
    let position_type = raw
        .position_type
        .ok_or_else(|| TraderError::config(field("position_type"), "missing required field"))?
        .parse::<PositionType>()
        .map_err(|e| TraderError::config(field("position_type"), e))?;

    if tp.is_nan() || tp <= 0.0 {
        return Err(TraderError::config(field("tp"), "take profit must be positive"));
    }
    if sl.is_nan() || sl <= 0.0 {
        return Err(TraderError::config(field("sl"), "stop loss must be positive"));
    }
    if let Some(allowed) = &raw.allowed_hours {
        if allowed.iter().any(|h| *h > 23) {
            return Err(TraderError::config(
                field("allowed_hours"),
                "hours must be within 0..=23",
            ));
        }
    }

    Ok(HourParameters {
        tp,
        sl,
        strategy: StrategyParams {
            position_type,
            allowed_hours: raw.allowed_hours,
            values: raw.values,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> Value {
        json!({
            "symbol": "WIN$N",
            "timeframe": "t5",
            "strategy": "pattern_rsi_trend",
            "hours": [10, 9],
            "hour_params": {
                "9": { "tp": 50, "sl": 30, "position_type": "both", "length_rsi": 8 },
                "10": { "tp": 80, "sl": 40, "position_type": "long", "allowed_hours": [10], "rsi_high": 75.0 }
            },
            "lote": 2.0
        })
    }

    fn parse(value: Value) -> Result<DeployConfig> {
        DeployConfig::from_json_str(&value.to_string())
    }

    fn expect_field_error(value: Value, expected_field: &str) {
        match parse(value) {
            Err(TraderError::ConfigInvalid { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected config error on {}, got {:?}", expected_field, other),
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let config = parse(sample()).unwrap();

        assert_eq!(config.symbol, "WIN$N");
        assert_eq!(config.timeframe, Timeframe::M5);
        assert_eq!(config.hours, vec![9, 10]);
        assert_eq!(config.lot_size, 2.0);
        assert_eq!(config.magic_number, 2);
        assert_eq!(config.engine, EngineSettings::default());

        let ten = config.params_for_hour(10).unwrap();
        assert_eq!(ten.tp, 80.0);
        assert_eq!(ten.sl, 40.0);
        assert_eq!(ten.position_type(), PositionType::Long);
        assert_eq!(ten.strategy.allowed_hours, Some(vec![10]));
        assert_eq!(ten.strategy.values.get("rsi_high"), Some(&json!(75.0)));
        assert!(!ten.strategy.values.contains_key("tp"));
    }

    #[test]
    fn test_unconfigured_hour_has_no_params() {
        let config = parse(sample()).unwrap();
        assert!(config.params_for_hour(11).is_none());
        assert!(!config.is_trading_hour(11));
    }

    #[test]
    fn test_defaults_for_optional_fields() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("lote");
        let config = parse(value).unwrap();
        assert_eq!(config.lot_size, 1.0);
    }

    #[test]
    fn test_missing_required_field() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("strategy");
        expect_field_error(value, "strategy");
    }

    #[test]
    fn test_unsupported_timeframe() {
        let mut value = sample();
        value["timeframe"] = json!("m3");
        expect_field_error(value, "timeframe");
    }

    #[test]
    fn test_empty_hours() {
        let mut value = sample();
        value["hours"] = json!([]);
        expect_field_error(value, "hours");
    }

    #[test]
    fn test_missing_hour_params_entry() {
        let mut value = sample();
        value["hours"] = json!([9, 10, 11]);
        expect_field_error(value, "hour_params");
    }

    #[test]
    fn test_invalid_position_type() {
        let mut value = sample();
        value["hour_params"]["9"]["position_type"] = json!("sideways");
        expect_field_error(value, "hour_params.9.position_type");
    }

    #[test]
    fn test_non_positive_tp_sl() {
        let mut value = sample();
        value["hour_params"]["9"]["tp"] = json!(0);
        expect_field_error(value, "hour_params.9.tp");

        let mut value = sample();
        value["hour_params"]["10"]["sl"] = json!(-5);
        expect_field_error(value, "hour_params.10.sl");
    }

    #[test]
    fn test_hour_out_of_range() {
        let mut value = sample();
        value["hours"] = json!([9, 24]);
        expect_field_error(value, "hours");
    }

    #[test]
    fn test_engine_section_overrides() {
        let mut value = sample();
        value["engine"] = json!({ "poll_interval_ms": 250, "neutral_policy": "hold" });
        let config = parse(value).unwrap();
        assert_eq!(config.engine.poll_interval_ms, 250);
        assert_eq!(config.engine.neutral_policy, NeutralPolicy::Hold);
        assert_eq!(config.engine.history_bars, 280);
    }

    #[test]
    fn test_resolve_strategy_validates_every_hour() {
        let registry = StrategyRegistry::builtin();
        let config = parse(sample()).unwrap();
        assert_eq!(config.resolve_strategy(&registry).unwrap().name(), "pattern_rsi_trend");

        let mut value = sample();
        value["hour_params"]["10"]["length_rsi"] = json!(0);
        let config = parse(value).unwrap();
        assert!(config.resolve_strategy(&registry).is_err());

        let mut value = sample();
        value["strategy"] = json!("does_not_exist");
        let config = parse(value).unwrap();
        let err = config.resolve_strategy(&registry).err().unwrap();
        assert!(err.is_startup_fatal());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{}", sample()).unwrap();

        let config = DeployConfig::load(file.path()).unwrap();
        assert_eq!(config.symbol, "WIN$N");
        assert_eq!(config.params_for_hour(9).unwrap().tp, 50.0);
        assert_eq!(
            config.params_for_hour(9).unwrap().strategy.values.get("length_rsi"),
            Some(&json!(8))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = DeployConfig::load("/nonexistent/deploy.json").unwrap_err();
        assert!(err.is_startup_fatal());
    }

    #[test]
    fn test_summary() {
        let config = parse(sample()).unwrap();
        let summary = config.summary(Path::new("deploy.json"));

        assert_eq!(summary["strategy"], "pattern_rsi_trend");
        assert_eq!(summary["timeframe"], "t5");
        assert_eq!(summary["trading_hours"], json!([9, 10]));
        assert_eq!(summary["hour_configs"]["10"]["position_type"], "long");
    }
}
