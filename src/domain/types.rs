use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use strum::{Display, EnumString};
use validator::Validate;

// ============================================================================
// Thermal state
// ============================================================================

/// Room temperature state advanced by the plant model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalState {
    /// Indoor air temperature (°C)
    pub t_air_c: f64,
    /// Thermal mass temperature (°C), only set by multi-node models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_mass_c: Option<f64>,
}

impl ThermalState {
    pub fn new(t_air_c: f64) -> Self {
        Self {
            t_air_c,
            t_mass_c: None,
        }
    }
}

/// Lumped single-capacitance room parameters.
///
/// The envelope conductance is `UA = area / r` (W/K) and the whole room
/// stores heat in one capacitance `c` (J/K).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PlantParameters {
    /// Thermal resistance of the envelope (K·m²/W)
    #[validate(range(min = 1e-6))]
    pub r: f64,
    /// Thermal capacitance of the room (J/K)
    #[validate(range(min = 1.0))]
    pub c: f64,
    /// Envelope area (m²)
    #[validate(range(min = 0.0))]
    pub area_m2: f64,
    /// Glazed area (m²)
    #[validate(range(min = 0.0))]
    pub window_area_m2: f64,
    /// Solar transmittance of the glazing (g-value)
    #[validate(range(min = 0.0, max = 1.0))]
    pub solar_transmittance: f64,
    /// Constant internal gains from occupants and appliances (W)
    #[validate(range(min = 0.0))]
    pub internal_gains_w: f64,
    /// Heater power at full valve opening (W)
    #[validate(range(min = 0.0))]
    pub max_power_w: f64,
}

impl Default for PlantParameters {
    fn default() -> Self {
        Self {
            r: 0.88,
            c: 1.1e7,
            area_m2: 45.0,
            window_area_m2: 4.0,
            solar_transmittance: 0.7,
            internal_gains_w: 0.0,
            max_power_w: 4500.0,
        }
    }
}

impl PlantParameters {
    /// Envelope conductance (W/K)
    pub fn ua(&self) -> f64 {
        self.area_m2 / self.r
    }
}

// ============================================================================
// Actuation
// ============================================================================

/// Heating power delivered for a valve opening, `valve / 100 · P_max`.
pub fn heating_power_w(valve_position: u8, max_power_w: f64) -> f64 {
    f64::from(valve_position.min(100)) / 100.0 * max_power_w
}

/// Decision returned by a controller call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAction {
    /// Valve opening in percent, always within [0, 100]
    pub valve_position: u8,
    /// Heating power the controller planned for the next step (W)
    pub planned_power_w: f64,
    /// Set when the controller fell back to its fail-safe action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlAction {
    /// Action for a given valve opening, power derived from the heater rating.
    pub fn from_valve(valve_position: u8, max_power_w: f64) -> Self {
        let valve_position = valve_position.min(100);
        Self {
            valve_position,
            planned_power_w: heating_power_w(valve_position, max_power_w),
            error: None,
        }
    }

    /// Action for a planned power, valve rounded to the nearest percent.
    pub fn from_power(planned_power_w: f64, max_power_w: f64) -> Self {
        let planned_power_w = planned_power_w.clamp(0.0, max_power_w.max(0.0));
        let valve_position = if max_power_w > 0.0 {
            (planned_power_w / max_power_w * 100.0).round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Self {
            valve_position,
            planned_power_w,
            error: None,
        }
    }

    /// Heating off, carrying the reason the controller could not decide.
    pub fn fail_safe(error: impl Into<String>) -> Self {
        Self {
            valve_position: 0,
            planned_power_w: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn is_fail_safe(&self) -> bool {
        self.error.is_some()
    }
}

/// Whether the optimizer is allowed to drive the valve.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ControlMode {
    #[default]
    Auto,
    Manual,
}

/// Last valve command known to the simulator.
///
/// Single scalar shared between the command listener (writer) and the
/// stepping loop (reader). Values are clamped to [0, 100] on write.
#[derive(Debug, Clone, Default)]
pub struct ValveCell(Arc<AtomicU8>);

impl ValveCell {
    pub fn new(initial: u8) -> Self {
        Self(Arc::new(AtomicU8::new(initial.min(100))))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    /// Stores a new opening and returns the previous one.
    pub fn set(&self, valve_position: u8) -> u8 {
        self.0.swap(valve_position.min(100), Ordering::AcqRel)
    }
}
