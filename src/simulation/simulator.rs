//! Time-stepped room simulation.
//!
//! Two tasks per instance: the stepping loop owned by [`Simulator::run`] and
//! a command listener writing the shared [`ValveCell`]. A command applied
//! before a tick reads the valve is visible to that tick; later ones wait
//! for the next.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use validator::Validate;

use super::{solar_gain_w, OnboardThermostat, OnboardThermostatConfig, PlantInputs, PlantModel, SimulationClock};
use crate::bus::{parse_valve_command, BusMessage, MessageBus, MetricsPayload, Topics};
use crate::controller::HeatingController;
use crate::domain::{heating_power_w, PlantParameters, ThermalState, ValveCell};
use crate::forecast::{hour_of_day, Forecaster};
use crate::repo::{SeriesRecord, TelemetrySink};

/// Latest tick, readable from outside the stepping loop.
pub type StatusHandle = Arc<RwLock<Option<TickReport>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationSettings {
    #[validate(range(min = 1))]
    pub step_seconds: u32,
    /// Simulated seconds per wall-clock second; 0 disables pacing
    #[validate(range(min = 0.0))]
    pub speed_factor: f64,
    /// First simulated instant; the current wall-clock time when unset
    pub start_time: Option<NaiveDateTime>,
    /// Stop after this many simulated hours; falls back to the scenario's
    /// `duration_days`, then runs until cancelled
    pub duration_hours: Option<f64>,
    pub location: String,
    pub initial_temp_c: f64,
    #[validate(range(max = 100))]
    pub initial_valve: u8,
    #[validate(range(min = 0.0))]
    pub sensor_noise_std: f64,
    pub noise_seed: Option<u64>,
    pub thermostat: Option<OnboardThermostatConfig>,
    pub scenario_path: PathBuf,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            step_seconds: 60,
            speed_factor: 60.0,
            start_time: None,
            duration_hours: None,
            location: "living_room".into(),
            initial_temp_c: 19.0,
            initial_valve: 0,
            sensor_noise_std: 0.1,
            noise_seed: None,
            thermostat: None,
            scenario_path: PathBuf::from("scenarios/default.json"),
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub sim_time: NaiveDateTime,
    pub t_air_c: f64,
    /// Air temperature as the sensor reports it
    pub measured_temperature_c: f64,
    pub t_ext_c: f64,
    pub nebulosity: f64,
    pub valve_position: u8,
    pub heating_w: f64,
    pub solar_w: f64,
    pub price_eur_per_kwh: f64,
    pub tariff: String,
    pub cost_step_eur: f64,
    pub total_cost_eur: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub ticks: u64,
    pub total_cost: f64,
    pub final_state: ThermalState,
    pub started: NaiveDateTime,
    pub ended: NaiveDateTime,
}

pub struct Simulator {
    plant: PlantModel,
    forecaster: Arc<Forecaster>,
    state: ThermalState,
    clock: SimulationClock,
    end: Option<NaiveDateTime>,
    valve: ValveCell,
    total_cost: f64,
    ticks: u64,
    location: String,
    topics: Topics,
    sink: Arc<dyn TelemetrySink>,
    bus: Arc<dyn MessageBus>,
    controller: Option<Arc<dyn HeatingController>>,
    thermostat: Option<OnboardThermostat>,
    noise: Option<Normal<f64>>,
    rng: StdRng,
    status: StatusHandle,
    last_logged_day: NaiveDate,
}

impl Simulator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &SimulationSettings,
        params: PlantParameters,
        forecaster: Arc<Forecaster>,
        initial: ThermalState,
        start: NaiveDateTime,
        topics: Topics,
        sink: Arc<dyn TelemetrySink>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let noise = if settings.sensor_noise_std > 0.0 {
            match Normal::new(0.0, settings.sensor_noise_std) {
                Ok(normal) => Some(normal),
                Err(e) => {
                    warn!(error = %e, std = settings.sensor_noise_std, "invalid sensor noise, disabled");
                    None
                }
            }
        } else {
            None
        };
        let rng = match settings.noise_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            plant: PlantModel::new(params),
            forecaster,
            state: initial,
            clock: SimulationClock::new(start, settings.step_seconds, settings.speed_factor),
            end: None,
            valve: ValveCell::new(settings.initial_valve),
            total_cost: 0.0,
            ticks: 0,
            location: settings.location.clone(),
            topics,
            sink,
            bus,
            controller: None,
            thermostat: settings.thermostat.map(OnboardThermostat::new),
            noise,
            rng,
            status: Arc::new(RwLock::new(None)),
            last_logged_day: start.date(),
        }
    }

    /// Consults `controller` before every tick instead of waiting for
    /// commands from the bus.
    pub fn with_controller(mut self, controller: Arc<dyn HeatingController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_end(mut self, end: NaiveDateTime) -> Self {
        self.end = Some(end);
        self
    }

    pub fn state(&self) -> ThermalState {
        self.state
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn valve(&self) -> ValveCell {
        self.valve.clone()
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    fn finished(&self) -> bool {
        self.end.is_some_and(|end| self.clock.sim_time >= end)
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<SimulationReport> {
        let commands = self.bus.subscribe(&self.topics.command_filter).await?;
        let listener_cancel = cancel.child_token();
        let listener = tokio::spawn(listen_for_commands(
            commands,
            self.valve.clone(),
            self.sink.clone(),
            self.location.clone(),
            listener_cancel.clone(),
        ));

        let started = self.clock.sim_time;
        info!(
            %started,
            end = ?self.end,
            step_seconds = self.clock.step_seconds,
            speed_factor = self.clock.speed_factor,
            t_air_c = self.state.t_air_c,
            "simulation started"
        );

        while !cancel.is_cancelled() && !self.finished() {
            let loop_start = Instant::now();
            self.consult_controller().await;
            self.tick().await;

            match self.clock.wall_budget() {
                Some(budget) => {
                    let parking = budget.saturating_sub(loop_start.elapsed());
                    if !parking.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(parking) => {}
                        }
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }

        listener_cancel.cancel();
        if let Err(e) = listener.await {
            warn!(error = %e, "command listener ended abnormally");
        }

        let report = SimulationReport {
            ticks: self.ticks,
            total_cost: self.total_cost,
            final_state: self.state,
            started,
            ended: self.clock.sim_time,
        };
        info!(
            ticks = report.ticks,
            total_cost_eur = report.total_cost,
            t_air_c = report.final_state.t_air_c,
            ended = %report.ended,
            "simulation finished"
        );
        Ok(report)
    }

    async fn consult_controller(&mut self) {
        let Some(controller) = self.controller.clone() else {
            return;
        };
        controller.sync_clock(self.clock.sim_time);
        let t_air_c = self.state.t_air_c;
        match tokio::task::spawn_blocking(move || controller.optimize(t_air_c)).await {
            Ok(Some(action)) => {
                self.valve.set(action.valve_position);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "controller task failed, heating off");
                self.valve.set(0);
            }
        }
    }

    /// Advances the room by one step under the current valve command.
    pub async fn tick(&mut self) -> TickReport {
        let now = self.clock.advance();
        let (weather, quote) = self.forecaster.conditions_at(now);

        if let Some(thermostat) = &mut self.thermostat {
            self.valve.set(thermostat.update(self.state.t_air_c));
        }
        let valve_position = self.valve.get();

        let params = *self.plant.params();
        let heating_w = heating_power_w(valve_position, params.max_power_w);
        let solar_w = solar_gain_w(
            hour_of_day(now),
            weather.nebulosity,
            params.window_area_m2,
            params.solar_transmittance,
        );
        let inputs = PlantInputs {
            t_ext_c: weather.temperature_c,
            heating_w,
            solar_w,
            internal_w: params.internal_gains_w,
        };
        let step = self
            .plant
            .step(&self.state, &inputs, f64::from(self.clock.step_seconds));
        self.state = step.state;

        let cost_step_eur =
            heating_w * self.clock.step_hours() * quote.price_eur_per_kwh / 1000.0;
        self.total_cost += cost_step_eur;
        self.ticks += 1;

        let noise = match &self.noise {
            Some(normal) => normal.sample(&mut self.rng),
            None => 0.0,
        };
        let report = TickReport {
            sim_time: now,
            t_air_c: self.state.t_air_c,
            measured_temperature_c: self.state.t_air_c + noise,
            t_ext_c: weather.temperature_c,
            nebulosity: weather.nebulosity,
            valve_position,
            heating_w,
            solar_w,
            price_eur_per_kwh: quote.price_eur_per_kwh,
            tariff: quote.label,
            cost_step_eur,
            total_cost_eur: self.total_cost,
        };

        debug!(
            sim_time = %now,
            t_air_c = report.t_air_c,
            t_ext_c = report.t_ext_c,
            valve_position,
            heat_loss_w = step.heat_loss_w,
            "simulation tick"
        );
        self.emit(&report).await;
        self.log_progress(&report);
        *self.status.write() = Some(report.clone());
        report
    }

    async fn emit(&self, report: &TickReport) {
        let record = SeriesRecord::new("sensors")
            .tag("location", self.location.as_str())
            .tag("tariff", report.tariff.as_str())
            .field("temperature", report.measured_temperature_c)
            .field("external_temperature", report.t_ext_c)
            .field("power_consumption", report.heating_w)
            .field("solar_power", report.solar_w)
            .field("valve_position", f64::from(report.valve_position))
            .field("electricity_price", report.price_eur_per_kwh)
            .field("heating_cost_step", report.cost_step_eur)
            .field("heating_cost_cumulative", report.total_cost_eur)
            .at(report.sim_time);
        if let Err(e) = self.sink.write(record).await {
            warn!(error = %e, "telemetry write failed");
        }

        let sim_time = report.sim_time.format("%Y-%m-%dT%H:%M:%S").to_string();
        if let Err(e) = self.bus.publish(&self.topics.clock, sim_time.clone()).await {
            warn!(error = %e, "clock sync publish failed");
        }

        let metrics = MetricsPayload {
            sim_time,
            temperature: round2(report.measured_temperature_c),
            external_temperature: round2(report.t_ext_c),
            valve_position: report.valve_position,
            power_consumption: round2(report.heating_w),
            solar_power: round2(report.solar_w),
            electricity_price: report.price_eur_per_kwh,
            tariff: report.tariff.clone(),
            total_cost: report.total_cost_eur,
        };
        match serde_json::to_string(&metrics) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(&self.topics.metrics, payload).await {
                    warn!(error = %e, "metrics publish failed");
                }
            }
            Err(e) => warn!(error = %e, "metrics payload not serializable"),
        }
    }

    fn log_progress(&mut self, report: &TickReport) {
        let day = report.sim_time.date();
        if day > self.last_logged_day {
            self.last_logged_day = day;
            info!(
                day = %day,
                ticks = self.ticks,
                t_air_c = report.t_air_c,
                total_cost_eur = report.total_cost_eur,
                "simulated day reached"
            );
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Applies valve commands from the bus until cancelled or the channel closes.
/// Malformed messages are logged and dropped; the valve keeps its value.
pub async fn listen_for_commands(
    mut commands: mpsc::Receiver<BusMessage>,
    valve: ValveCell,
    sink: Arc<dyn TelemetrySink>,
    location: String,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = commands.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match parse_valve_command(&msg.payload) {
            Ok(valve_position) => {
                let previous = valve.set(valve_position);
                info!(topic = %msg.topic, valve_position, previous, "valve updated");
                let record = SeriesRecord::new("valve_commands")
                    .tag("location", location.as_str())
                    .tag("topic", msg.topic.as_str())
                    .field("valve_position", f64::from(valve_position));
                if let Err(e) = sink.write(record).await {
                    warn!(error = %e, "telemetry write failed");
                }
            }
            Err(e) => {
                warn!(topic = %msg.topic, payload = %msg.payload, error = %e, "malformed valve command");
            }
        }
    }
    debug!("command listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{valve_command_payload, InMemoryBus};
    use crate::controller::{ManualController, ManualSettings};
    use crate::forecast::{DayWeather, Scenario};
    use crate::repo::InMemorySeriesStore;
    use std::time::Duration;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn forecaster() -> Arc<Forecaster> {
        let scenario = Scenario {
            weather: vec![DayWeather {
                t_min: 2.0,
                t_max: 8.0,
                nebulosity: 0.5,
            }],
            ..Default::default()
        };
        Arc::new(Forecaster::from_scenario(
            Arc::new(scenario),
            start().date(),
            None,
        ))
    }

    fn settings() -> SimulationSettings {
        SimulationSettings {
            step_seconds: 900,
            speed_factor: 0.0,
            sensor_noise_std: 0.0,
            ..Default::default()
        }
    }

    fn simulator(
        settings: &SimulationSettings,
        bus: Arc<InMemoryBus>,
        store: Arc<InMemorySeriesStore>,
    ) -> Simulator {
        Simulator::new(
            settings,
            PlantParameters::default(),
            forecaster(),
            ThermalState::new(19.0),
            start(),
            Topics::default(),
            store,
            bus,
        )
    }

    #[tokio::test]
    async fn test_total_cost_never_decreases() {
        let store = Arc::new(InMemorySeriesStore::default());
        let mut sim = simulator(&settings(), Arc::new(InMemoryBus::default()), store.clone());
        let mut last = 0.0;
        for i in 0..48u8 {
            sim.valve().set(i.wrapping_mul(37) % 101);
            let report = sim.tick().await;
            assert!(report.total_cost_eur >= last);
            assert!(report.cost_step_eur >= 0.0);
            last = report.total_cost_eur;
        }
        assert_eq!(store.records("sensors").len(), 48);
    }

    #[tokio::test]
    async fn test_valve_set_before_tick_is_used() {
        let mut sim = simulator(
            &settings(),
            Arc::new(InMemoryBus::default()),
            Arc::new(InMemorySeriesStore::default()),
        );
        sim.valve().set(100);
        let report = sim.tick().await;
        assert_eq!(report.valve_position, 100);
        assert_eq!(report.heating_w, 4500.0);
        assert!(report.cost_step_eur > 0.0);
    }

    #[tokio::test]
    async fn test_tick_publishes_clock_and_metrics() {
        let bus = Arc::new(InMemoryBus::default());
        let topics = Topics::default();
        let mut clock = bus.subscribe(&topics.clock).await.unwrap();
        let mut metrics = bus.subscribe(&topics.metrics).await.unwrap();
        let mut sim = simulator(&settings(), bus, Arc::new(InMemorySeriesStore::default()));

        sim.tick().await;

        assert_eq!(clock.recv().await.unwrap().payload, "2026-01-15T00:15:00");
        let payload: MetricsPayload =
            serde_json::from_str(&metrics.recv().await.unwrap().payload).unwrap();
        assert_eq!(payload.sim_time, "2026-01-15T00:15:00");
        assert_eq!(payload.tariff, "BASE");
    }

    #[tokio::test]
    async fn test_thermostat_overrides_valve() {
        let settings = SimulationSettings {
            thermostat: Some(OnboardThermostatConfig::default()),
            ..settings()
        };
        let mut sim = Simulator::new(
            &settings,
            PlantParameters::default(),
            forecaster(),
            ThermalState::new(15.0),
            start(),
            Topics::default(),
            Arc::new(InMemorySeriesStore::default()),
            Arc::new(InMemoryBus::default()),
        );
        assert_eq!(sim.tick().await.valve_position, 100);
    }

    #[tokio::test]
    async fn test_listener_applies_commands_and_skips_garbage() {
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(InMemorySeriesStore::default());
        let rx = bus.subscribe("home/+/valve/set").await.unwrap();
        let valve = ValveCell::new(0);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listen_for_commands(
            rx,
            valve.clone(),
            store.clone(),
            "living_room".into(),
            cancel.clone(),
        ));

        bus.publish("home/living_room/valve/set", valve_command_payload(55))
            .await
            .unwrap();
        bus.publish("home/living_room/valve/set", "{oops".into())
            .await
            .unwrap();
        bus.publish("home/living_room/valve/set", r#"{"valve_position": 70.2}"#.into())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while valve.get() != 70 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.records("valve_commands").len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_at_end() {
        let sim = simulator(
            &settings(),
            Arc::new(InMemoryBus::default()),
            Arc::new(InMemorySeriesStore::default()),
        )
        .with_controller(Arc::new(ManualController::new(
            ManualSettings::default(),
            4500.0,
        )))
        .with_end(start() + chrono::Duration::hours(6));

        let report = sim.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.ticks, 24);
        assert_eq!(report.started, start());
        assert_eq!(report.ended, start() + chrono::Duration::hours(6));
        assert!(report.total_cost > 0.0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pacing() {
        let paced = SimulationSettings {
            speed_factor: 1.0,
            ..settings()
        };
        let sim = simulator(
            &paced,
            Arc::new(InMemoryBus::default()),
            Arc::new(InMemorySeriesStore::default()),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sim.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.ticks, 1);
    }
}
