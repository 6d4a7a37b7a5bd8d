pub mod manual;
pub mod mpc;
pub mod service;

use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use manual::{ManualController, ManualSettings};
pub use mpc::{MpcController, MpcSettings};
pub use service::{ControllerService, FALLBACK_TEMPERATURE_C};

use crate::bus::{valve_command_payload, BusError, CommandError, MessageBus};
use crate::config::Config;
use crate::domain::{ControlAction, ControlMode, ValveCell};
use crate::simulation::StatusHandle;

/// Common contract of the heating controllers.
pub trait HeatingController: Send + Sync {
    fn name(&self) -> &str;

    /// Decision for a room currently at `t_init_c`. `None` means the
    /// controller is not in charge and the valve keeps its last command.
    fn optimize(&self, t_init_c: f64) -> Option<ControlAction>;

    /// Tells the controller what simulated time it is.
    fn sync_clock(&self, _now: NaiveDateTime) {}
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Operator entry point: switches between optimizer and manual control and
/// sends manual valve overrides.
pub struct ControlPanel {
    mode: RwLock<ControlMode>,
    last_command: RwLock<Option<u8>>,
    bus: Arc<dyn MessageBus>,
    command_topic: String,
    mpc: Option<Arc<MpcController>>,
}

impl ControlPanel {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        command_topic: impl Into<String>,
        mpc: Option<Arc<MpcController>>,
    ) -> Self {
        let mode = match &mpc {
            Some(mpc) if !mpc.is_auto_mode() => ControlMode::Manual,
            _ => ControlMode::Auto,
        };
        Self {
            mode: RwLock::new(mode),
            last_command: RwLock::new(None),
            bus,
            command_topic: command_topic.into(),
            mpc,
        }
    }

    pub fn mode(&self) -> ControlMode {
        *self.mode.read()
    }

    pub fn last_command(&self) -> Option<u8> {
        *self.last_command.read()
    }

    pub fn set_mode(&self, mode: ControlMode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if let Some(mpc) = &self.mpc {
            mpc.set_auto_mode(mode == ControlMode::Auto);
        }
        info!(%previous, %mode, "control mode set");
    }

    /// Publishes a manual valve command. The value is rounded and clamped to
    /// `[0, 100]`.
    pub async fn set_valve(&self, value: f64) -> Result<u8, PanelError> {
        if !value.is_finite() {
            return Err(CommandError::NotANumber(value.to_string()).into());
        }
        let valve_position = value.round().clamp(0.0, 100.0) as u8;
        if self.mode() == ControlMode::Auto {
            warn!(
                valve_position,
                "manual valve command while in auto mode, the optimizer may override it"
            );
        }
        self.bus
            .publish(&self.command_topic, valve_command_payload(valve_position))
            .await?;
        *self.last_command.write() = Some(valve_position);
        info!(valve_position, "manual valve command sent");
        Ok(valve_position)
    }
}

/// Shared state behind the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub panel: Arc<ControlPanel>,
    pub valve: ValveCell,
    pub status: StatusHandle,
}

/// Subscribes the service to the clock topic, then runs it in the
/// background. Clock ticks published after this returns reach the service.
pub async fn spawn_controller_service(
    service: ControllerService,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>, BusError> {
    let clock = service.subscribe().await?;
    Ok(tokio::spawn(service.run(clock, cancel)))
}
