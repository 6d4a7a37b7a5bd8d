use std::str::FromStr;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    api::error::ApiError,
    controller::AppState,
    domain::ControlMode,
    simulation::TickReport,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub mode: ControlMode,
    /// Valve opening the simulator is currently applying
    pub valve_position: u8,
    /// Last manual override sent from this panel
    pub last_command: Option<u8>,
    pub last_tick: Option<TickReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModeResponse {
    pub mode: ControlMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValveRequest {
    pub valve_position: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValveResponse {
    pub valve_position: u8,
    pub mode: ControlMode,
}

/// GET /status
pub async fn get_status(State(st): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        mode: st.panel.mode(),
        valve_position: st.valve.get(),
        last_command: st.panel.last_command(),
        last_tick: st.status.read().clone(),
    })
}

/// PUT /mode
pub async fn set_mode(
    State(st): State<AppState>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<ModeResponse>, ApiError> {
    let mode = ControlMode::from_str(req.mode.trim())
        .map_err(|_| ApiError::BadRequest(format!("unknown mode {:?}", req.mode)))?;
    st.panel.set_mode(mode);
    Ok(Json(ModeResponse { mode }))
}

/// PUT /valve
pub async fn set_valve(
    State(st): State<AppState>,
    Json(req): Json<ValveRequest>,
) -> Result<Json<ValveResponse>, ApiError> {
    let valve_position = st.panel.set_valve(req.valve_position).await?;
    Ok(Json(ValveResponse {
        valve_position,
        mode: st.panel.mode(),
    }))
}
