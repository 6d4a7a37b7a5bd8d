use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardThermostatConfig {
    pub setpoint_c: f64,
    pub hysteresis_c: f64,
}

impl Default for OnboardThermostatConfig {
    fn default() -> Self {
        Self {
            setpoint_c: 19.0,
            hysteresis_c: 0.5,
        }
    }
}

/// Bang-bang thermostat built into the simulated room, used when no
/// external controller drives the valve.
///
/// Unlike the manual controller it remembers whether it was heating, so
/// inside the dead band it holds its previous state.
#[derive(Debug, Clone)]
pub struct OnboardThermostat {
    config: OnboardThermostatConfig,
    is_heating: bool,
}

impl OnboardThermostat {
    pub fn new(config: OnboardThermostatConfig) -> Self {
        Self {
            config,
            is_heating: false,
        }
    }

    pub fn is_heating(&self) -> bool {
        self.is_heating
    }

    /// Valve opening for the current air temperature.
    pub fn update(&mut self, t_air_c: f64) -> u8 {
        if self.is_heating {
            if t_air_c > self.config.setpoint_c + self.config.hysteresis_c {
                self.is_heating = false;
            }
        } else if t_air_c < self.config.setpoint_c - self.config.hysteresis_c {
            self.is_heating = true;
        }

        if self.is_heating {
            100
        } else {
            0
        }
    }
}
