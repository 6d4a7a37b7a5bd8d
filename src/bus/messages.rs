use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("payload is not JSON: {0}")]
    InvalidJson(String),
    #[error("missing valve_position field")]
    MissingValve,
    #[error("valve_position is not a finite number: {0}")]
    NotANumber(String),
}

/// `{"valve_position": <number>}` as sent on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValveCommand {
    pub valve_position: u8,
}

/// Decodes a command payload into a valve opening, rounded and clamped to
/// `[0, 100]`.
pub fn parse_valve_command(payload: &str) -> Result<u8, CommandError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| CommandError::InvalidJson(e.to_string()))?;
    let raw = value
        .get("valve_position")
        .ok_or(CommandError::MissingValve)?;
    let position = raw
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::NotANumber(raw.to_string()))?;
    Ok(position.round().clamp(0.0, 100.0) as u8)
}

pub fn valve_command_payload(valve_position: u8) -> String {
    serde_json::json!({ "valve_position": valve_position.min(100) }).to_string()
}

/// Per-tick snapshot published on the metrics topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub sim_time: String,
    pub temperature: f64,
    pub external_temperature: f64,
    pub valve_position: u8,
    pub power_consumption: f64,
    pub solar_power: f64,
    pub electricity_price: f64,
    pub tariff: String,
    pub total_cost: f64,
}
