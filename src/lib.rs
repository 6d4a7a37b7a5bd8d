//! Azru: digital twin of a heated room.
//!
//! A lumped thermal model of the room is stepped against scenario weather
//! and electricity tariffs, while a receding-horizon controller decides
//! how far to open the heating valve.

pub mod api;
pub mod bus;
pub mod config;
pub mod controller;
pub mod domain;
pub mod forecast;
pub mod optimizer;
pub mod repo;
pub mod runtime;
pub mod simulation;
pub mod telemetry;
