//! # Room Simulation
//!
//! Physical side of the twin: the lumped thermal model of the room, solar
//! gains through its windows, the simulated clock and the stepping loop
//! that ties them to the valve commands it receives.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use azru::domain::{PlantParameters, ThermalState};
//! use azru::simulation::{PlantInputs, PlantModel};
//!
//! let plant = PlantModel::new(PlantParameters::default());
//! let inputs = PlantInputs {
//!     t_ext_c: 5.0,
//!     heating_w: 4500.0,
//!     ..Default::default()
//! };
//! let next = plant.step(&ThermalState::new(19.0), &inputs, 900.0);
//! println!("{:.2} °C", next.state.t_air_c);
//! ```

pub mod clock;
pub mod hvac;
pub mod simulator;
pub mod solar;
pub mod thermal;

pub use clock::{parse_iso_timestamp, SimulationClock, TimeParseError};
pub use hvac::{OnboardThermostat, OnboardThermostatConfig};
pub use simulator::{
    listen_for_commands, SimulationReport, SimulationSettings, Simulator, StatusHandle,
    TickReport,
};
pub use solar::{solar_gain_w, DAYLIGHT, PEAK_IRRADIANCE_W_M2};
pub use thermal::{DiscreteDynamics, PlantInputs, PlantModel, PlantStep};
