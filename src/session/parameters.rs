use std::sync::Arc;

use crate::config::{HourParameters, ParameterProvider};

/// What the hourly check did
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterChange {
    /// Same hour as the previous check
    Unchanged,
    /// New hour with parameters; they are now active
    Activated { hour: u32, params: Arc<HourParameters> },
    /// New hour without parameters; opens stop until a configured hour comes
    Deactivated { hour: u32, was_active: bool },
}

/// Holds the active hour parameters and swaps them when the clock hour changes
///
/// Parameters are handed out as `Arc` snapshots, so an evaluation started
/// with one tuple finishes with it even if a swap happens meanwhile.
pub struct ParameterController {
    provider: Arc<dyn ParameterProvider>,
    active: Option<Arc<HourParameters>>,
    /// Last parameters seen, kept through inactive hours for exit decisions
    last_known: Option<Arc<HourParameters>>,
    checked_hour: Option<u32>,
}

impl ParameterController {
    pub fn new(provider: Arc<dyn ParameterProvider>) -> Self {
        Self {
            provider,
            active: None,
            last_known: None,
            checked_hour: None,
        }
    }

    /// Compare `hour` with the hour of the previous check and swap on change
    pub fn on_tick(&mut self, hour: u32) -> ParameterChange {
        if self.checked_hour == Some(hour) {
            return ParameterChange::Unchanged;
        }
        self.checked_hour = Some(hour);

        match self.provider.params_for_hour(hour) {
            Some(params) => {
                tracing::info!(
                    "🔄 Parameters for {}h: TP {} | SL {} | position {}",
                    hour,
                    params.tp,
                    params.sl,
                    params.position_type().as_str()
                );
                self.active = Some(params.clone());
                self.last_known = Some(params.clone());
                ParameterChange::Activated { hour, params }
            }
            None => {
                let was_active = self.active.take().is_some();
                tracing::info!("No parameters configured for {}h, new entries suspended", hour);
                ParameterChange::Deactivated { hour, was_active }
            }
        }
    }

    /// Parameters of the current hour, if it is configured
    pub fn active(&self) -> Option<Arc<HourParameters>> {
        self.active.clone()
    }

    /// Active parameters, or the most recent ones during an inactive hour
    pub fn evaluation_params(&self) -> Option<Arc<HourParameters>> {
        self.active.clone().or_else(|| self.last_known.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn checked_hour(&self) -> Option<u32> {
        self.checked_hour
    }
}
