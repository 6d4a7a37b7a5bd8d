//! Controller-side loop: follows the simulated clock and publishes valve
//! decisions.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HeatingController, MpcController};
use crate::bus::{valve_command_payload, BusError, BusMessage, MessageBus, Topics};
use crate::domain::ControlAction;
use crate::repo::{HistoryReader, SeriesRecord, TelemetrySink};

/// Room temperature assumed when history has no reading yet (°C).
pub const FALLBACK_TEMPERATURE_C: f64 = 20.0;

pub struct ControllerService {
    controller: Arc<MpcController>,
    bus: Arc<dyn MessageBus>,
    history: Arc<dyn HistoryReader>,
    sink: Arc<dyn TelemetrySink>,
    topics: Topics,
    location: String,
    last_decision: Option<NaiveDateTime>,
}

impl ControllerService {
    pub fn new(
        controller: Arc<MpcController>,
        bus: Arc<dyn MessageBus>,
        history: Arc<dyn HistoryReader>,
        sink: Arc<dyn TelemetrySink>,
        topics: Topics,
        location: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            bus,
            history,
            sink,
            topics,
            location: location.into(),
            last_decision: None,
        }
    }

    /// Subscription to the clock sync topic that [`run`](Self::run) consumes.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let clock = self.bus.subscribe(&self.topics.clock).await?;
        info!(topic = %self.topics.clock, "controller service listening for clock sync");
        Ok(clock)
    }

    pub async fn run(mut self, mut clock: mpsc::Receiver<BusMessage>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = clock.recv() => match msg {
                    Some(msg) => {
                        self.on_clock(&msg.payload).await;
                    }
                    None => break,
                },
            }
        }

        info!("controller service stopped");
    }

    /// Handles one clock sync message. Returns the action published, if any.
    pub async fn on_clock(&mut self, payload: &str) -> Option<ControlAction> {
        let now = match self.controller.update_time(payload) {
            Ok(now) => now,
            Err(e) => {
                warn!(error = %e, "ignoring clock sync message");
                return None;
            }
        };

        let step = Duration::seconds(i64::from(self.controller.settings().step_seconds));
        if let Some(last) = self.last_decision {
            if now - last < step {
                return None;
            }
        }
        self.last_decision = Some(now);

        let t_init_c = self.initial_temperature().await;
        let controller = self.controller.clone();
        let action = match tokio::task::spawn_blocking(move || controller.optimize(t_init_c)).await
        {
            Ok(Some(action)) => action,
            Ok(None) => {
                debug!(%now, "no decision in manual mode");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "optimization task panicked, heating off");
                ControlAction::fail_safe(e.to_string())
            }
        };

        if let Err(e) = self
            .bus
            .publish(
                &self.topics.command,
                valve_command_payload(action.valve_position),
            )
            .await
        {
            warn!(error = %e, "failed to publish valve command");
        }

        let record = SeriesRecord::new("decisions")
            .tag("location", self.location.as_str())
            .tag("controller", self.controller.name())
            .field("valve_position", f64::from(action.valve_position))
            .field("planned_power", action.planned_power_w)
            .field("initial_temperature", t_init_c)
            .field("fail_safe", if action.is_fail_safe() { 1.0 } else { 0.0 })
            .at(now);
        if let Err(e) = self.sink.write(record).await {
            warn!(error = %e, "failed to record decision");
        }

        Some(action)
    }

    async fn initial_temperature(&self) -> f64 {
        match self
            .history
            .get_latest("sensors", &self.location, "temperature")
            .await
        {
            Ok(Some(t)) if t.is_finite() => t,
            Ok(_) => {
                warn!(
                    fallback_c = FALLBACK_TEMPERATURE_C,
                    "no room temperature in history, using fallback"
                );
                FALLBACK_TEMPERATURE_C
            }
            Err(e) => {
                warn!(
                    error = %e,
                    fallback_c = FALLBACK_TEMPERATURE_C,
                    "history unavailable, using fallback temperature"
                );
                FALLBACK_TEMPERATURE_C
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{parse_valve_command, InMemoryBus};
    use crate::controller::MpcSettings;
    use crate::domain::PlantParameters;
    use crate::forecast::{Forecaster, Scenario};
    use crate::repo::InMemorySeriesStore;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn service(
        bus: Arc<InMemoryBus>,
        store: Arc<InMemorySeriesStore>,
    ) -> (ControllerService, Arc<MpcController>) {
        let forecaster = Arc::new(Forecaster::from_scenario(
            Arc::new(Scenario::default()),
            start().date(),
            None,
        ));
        let mpc = Arc::new(MpcController::new(
            MpcSettings::default(),
            PlantParameters::default(),
            forecaster,
            start(),
        ));
        let svc = ControllerService::new(
            mpc.clone(),
            bus,
            store.clone(),
            store,
            Topics::default(),
            "living_room",
        );
        (svc, mpc)
    }

    #[tokio::test]
    async fn test_decision_published_and_recorded() {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemorySeriesStore::default());
        store
            .write(
                SeriesRecord::new("sensors")
                    .tag("location", "living_room")
                    .field("temperature", 15.0),
            )
            .await
            .unwrap();
        let mut commands = bus.subscribe(&Topics::default().command_filter).await.unwrap();
        let (mut svc, _) = service(bus, store.clone());

        let action = svc.on_clock("2026-01-15T00:15:00").await.unwrap();
        assert!(action.valve_position > 0);

        let msg = commands.recv().await.unwrap();
        assert_eq!(parse_valve_command(&msg.payload), Ok(action.valve_position));

        let decisions = store.records("decisions");
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].fields["initial_temperature"], 15.0);
    }

    #[tokio::test]
    async fn test_decisions_spaced_by_one_step() {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemorySeriesStore::default());
        let (mut svc, _) = service(bus, store.clone());

        assert!(svc.on_clock("2026-01-15T00:00:00").await.is_some());
        assert!(svc.on_clock("2026-01-15T00:01:00").await.is_none());
        assert!(svc.on_clock("2026-01-15T00:14:59").await.is_none());
        assert!(svc.on_clock("2026-01-15T00:15:00").await.is_some());
        assert_eq!(store.records("decisions").len(), 2);
    }

    #[tokio::test]
    async fn test_empty_history_uses_fallback() {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemorySeriesStore::default());
        let (mut svc, _) = service(bus, store.clone());

        svc.on_clock("2026-01-15T00:00:00").await.unwrap();
        let decisions = store.records("decisions");
        assert_eq!(
            decisions[0].fields["initial_temperature"],
            FALLBACK_TEMPERATURE_C
        );
    }

    #[tokio::test]
    async fn test_manual_mode_publishes_nothing() {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemorySeriesStore::default());
        let mut commands = bus.subscribe("#").await.unwrap();
        let (mut svc, mpc) = service(bus, store.clone());
        mpc.set_auto_mode(false);

        assert!(svc.on_clock("2026-01-15T00:00:00").await.is_none());
        assert!(commands.try_recv().is_err());
        assert!(store.records("decisions").is_empty());
    }

    #[tokio::test]
    async fn test_spawned_service_hears_first_clock_tick() {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemorySeriesStore::default());
        let mut commands = bus.subscribe(&Topics::default().command_filter).await.unwrap();
        let (svc, _) = service(bus.clone(), store.clone());
        let cancel = CancellationToken::new();

        let handle = crate::controller::spawn_controller_service(svc, cancel.clone())
            .await
            .unwrap();
        // Published before the spawned task had a chance to run.
        bus.publish(&Topics::default().clock, "2026-01-15T00:00:00".to_string())
            .await
            .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(10), commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(parse_valve_command(&msg.payload).is_ok());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.records("decisions").len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_clock_ignored() {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemorySeriesStore::default());
        let (mut svc, mpc) = service(bus, store);

        assert!(svc.on_clock("not a time").await.is_none());
        assert_eq!(mpc.current_time(), start());
    }
}
