use chrono::{DateTime, Utc};

/// Top-level error type for autotrader.
#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    #[error("failed to load config: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("invalid config field `{field}`: {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("unknown strategy `{name}` (available: {available})")]
    UnknownStrategy { name: String, available: String },

    #[error("invalid parameters for strategy `{strategy}`: {reason}")]
    StrategyParams { strategy: String, reason: String },

    #[error("out-of-order bar at {incoming} (last stored bar is {last})")]
    OutOfOrderBar {
        incoming: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("feed error: {0}")]
    Feed(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("pre-flight rejected order: {0}")]
    Preflight(String),

    #[error("position state error: {0}")]
    PositionState(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraderError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Configuration-class errors stop the process before any trading starts.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad(_)
                | Self::ConfigInvalid { .. }
                | Self::UnknownStrategy { .. }
                | Self::StrategyParams { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_fatal() {
        assert!(TraderError::config("hours", "empty").is_startup_fatal());
        assert!(TraderError::UnknownStrategy {
            name: "x".to_string(),
            available: "bb_trend".to_string()
        }
        .is_startup_fatal());
    }

    #[test]
    fn test_runtime_errors_are_not_fatal() {
        assert!(!TraderError::Feed("empty read".to_string()).is_startup_fatal());
        assert!(!TraderError::Preflight("volume".to_string()).is_startup_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = TraderError::config("timeframe", "unsupported code `m3`");
        assert_eq!(
            err.to_string(),
            "invalid config field `timeframe`: unsupported code `m3`"
        );
    }
}
