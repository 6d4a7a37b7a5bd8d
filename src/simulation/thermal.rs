use serde::{Deserialize, Serialize};

use crate::domain::{PlantParameters, ThermalState};

/// Heat inputs applied over one plant step (all in W, temperatures in °C).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantInputs {
    pub t_ext_c: f64,
    pub heating_w: f64,
    pub solar_w: f64,
    pub internal_w: f64,
}

/// Result of one plant step with the heat flows that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantStep {
    pub state: ThermalState,
    /// Envelope loss, positive when heat leaves the room (W)
    pub heat_loss_w: f64,
    /// Net power into the air node (W)
    pub net_heat_flow_w: f64,
}

/// Explicit-Euler discretization of the single-capacitance room.
///
/// `T[k+1] = T[k] + (UA·(T_ext − T[k]) + P_in)·dt / C`, which is affine in
/// both the state and the input: `T[k+1] = a·T[k] + b·(UA·T_ext + P_in)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteDynamics {
    pub ua: f64,
    pub capacitance: f64,
    pub dt_seconds: f64,
}

impl DiscreteDynamics {
    /// State coefficient `a = 1 − UA·dt/C`.
    pub fn state_gain(&self) -> f64 {
        1.0 - self.ua * self.dt_seconds / self.capacitance
    }

    /// Input coefficient `b = dt/C` (K per W).
    pub fn input_gain(&self) -> f64 {
        self.dt_seconds / self.capacitance
    }

    /// Next air temperature given the power entering the air node besides
    /// the envelope exchange.
    pub fn next_temperature(&self, t_air_c: f64, t_ext_c: f64, power_in_w: f64) -> f64 {
        let p_total = self.ua * (t_ext_c - t_air_c) + power_in_w;
        t_air_c + p_total * self.dt_seconds / self.capacitance
    }
}

/// Single-node lumped thermal network of the room.
///
/// No clamping is applied: overshoot past the comfort band is possible and
/// left to the controller.
#[derive(Debug, Clone)]
pub struct PlantModel {
    params: PlantParameters,
}

impl PlantModel {
    pub fn new(params: PlantParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PlantParameters {
        &self.params
    }

    pub fn discretize(&self, dt_seconds: f64) -> DiscreteDynamics {
        DiscreteDynamics {
            ua: self.params.ua(),
            capacitance: self.params.c,
            dt_seconds,
        }
    }

    pub fn step(&self, state: &ThermalState, inputs: &PlantInputs, dt_seconds: f64) -> PlantStep {
        let dynamics = self.discretize(dt_seconds);
        let gains = inputs.heating_w + inputs.solar_w + inputs.internal_w;
        let heat_loss_w = dynamics.ua * (state.t_air_c - inputs.t_ext_c);
        let t_air_c = dynamics.next_temperature(state.t_air_c, inputs.t_ext_c, gains);

        PlantStep {
            state: ThermalState {
                t_air_c,
                t_mass_c: state.t_mass_c,
            },
            heat_loss_w,
            net_heat_flow_w: gains - heat_loss_w,
        }
    }
}
