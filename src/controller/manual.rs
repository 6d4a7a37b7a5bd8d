use serde::{Deserialize, Serialize};
use validator::Validate;

use super::HeatingController;
use crate::domain::ControlAction;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ManualSettings {
    pub target_temp_c: f64,
    #[validate(range(min = 0.0))]
    pub trigger_delta_c: f64,
}

impl Default for ManualSettings {
    fn default() -> Self {
        Self {
            target_temp_c: 20.0,
            trigger_delta_c: 0.5,
        }
    }
}

/// Stateless on/off rule around a target temperature.
///
/// Full heat below `target − delta`, off otherwise. The dead band maps to
/// off as well, since nothing is remembered between calls.
#[derive(Debug, Clone)]
pub struct ManualController {
    settings: ManualSettings,
    max_power_w: f64,
}

impl ManualController {
    pub fn new(settings: ManualSettings, max_power_w: f64) -> Self {
        Self {
            settings,
            max_power_w,
        }
    }

    pub fn settings(&self) -> &ManualSettings {
        &self.settings
    }
}

impl HeatingController for ManualController {
    fn name(&self) -> &str {
        "manual"
    }

    fn optimize(&self, t_init_c: f64) -> Option<ControlAction> {
        let low = self.settings.target_temp_c - self.settings.trigger_delta_c;
        let valve = if t_init_c < low { 100 } else { 0 };
        Some(ControlAction::from_valve(valve, self.max_power_w))
    }
}
