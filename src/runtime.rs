//! Wiring of the twin: builds the forecaster, controllers, simulator and
//! HTTP surface from a [`Config`] and runs them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{InMemoryBus, MessageBus};
use crate::config::Config;
use crate::controller::{
    spawn_controller_service, AppState, ControlPanel, ControllerService, HeatingController,
    ManualController, MpcController,
};
use crate::domain::ThermalState;
use crate::forecast::{Forecaster, GradeCalendar, HttpGradeCalendar, Scenario};
use crate::repo::Repositories;
use crate::simulation::{SimulationReport, Simulator, StatusHandle};

/// Controller driving an offline run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BatchMode {
    #[default]
    Manual,
    Mpc,
}

/// Configured start time, or the current wall-clock second.
pub fn resolve_start(cfg: &Config) -> NaiveDateTime {
    cfg.simulation.start_time.unwrap_or_else(|| {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    })
}

/// End of the run: configured hours, else the scenario's day count, else
/// open-ended.
pub fn resolve_end(
    cfg: &Config,
    scenario: &Scenario,
    start: NaiveDateTime,
) -> Option<NaiveDateTime> {
    if let Some(hours) = cfg.simulation.duration_hours {
        return Some(start + ChronoDuration::seconds((hours * 3600.0).round() as i64));
    }
    scenario
        .duration_days
        .map(|days| start + ChronoDuration::days(i64::from(days)))
}

pub fn initial_state(cfg: &Config, scenario: &Scenario) -> ThermalState {
    ThermalState::new(
        scenario
            .initial_temp
            .unwrap_or(cfg.simulation.initial_temp_c),
    )
}

/// Remote grade calendar if one is configured, warmed up for `around`.
pub async fn grade_calendar(
    cfg: &Config,
    around: NaiveDate,
) -> Result<Option<Arc<HttpGradeCalendar>>> {
    let Some(base_url) = &cfg.tariff.base_url else {
        return Ok(None);
    };
    let calendar = Arc::new(
        HttpGradeCalendar::new(
            base_url.clone(),
            Duration::from_secs(cfg.tariff.cache_ttl_seconds),
            Duration::from_secs(cfg.tariff.http_timeout_seconds),
        )
        .context("grade calendar client")?,
    );
    calendar.refresh(around).await;
    Ok(Some(calendar))
}

/// Keeps the grade cache current for the simulated day.
pub fn spawn_grade_refresh(
    calendar: Arc<HttpGradeCalendar>,
    status: StatusHandle,
    fallback: NaiveDate,
    every: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let today = status
                .read()
                .as_ref()
                .map(|t| t.sim_time.date())
                .unwrap_or(fallback);
            calendar.refresh(today).await;
        }
    });
}

fn build_forecaster(
    scenario: Arc<Scenario>,
    epoch: NaiveDate,
    calendar: Option<Arc<HttpGradeCalendar>>,
) -> Arc<Forecaster> {
    let calendar = calendar.map(|c| c as Arc<dyn GradeCalendar>);
    Arc::new(Forecaster::from_scenario(scenario, epoch, calendar))
}

/// Offline run from `start` to `end` with an in-loop controller and no
/// pacing.
pub async fn run_batch(
    cfg: &Config,
    start: NaiveDateTime,
    end: NaiveDateTime,
    mode: BatchMode,
) -> Result<SimulationReport> {
    anyhow::ensure!(end > start, "batch end {end} must be after start {start}");
    info!(%start, %end, %mode, "batch simulation");

    let scenario = Arc::new(Scenario::load_or_default(&cfg.simulation.scenario_path).await);
    let calendar = grade_calendar(cfg, start.date()).await?;
    if let Some(calendar) = &calendar {
        let mut day = start.date();
        while day <= end.date() {
            calendar.refresh(day).await;
            day += ChronoDuration::days(1);
        }
    }
    let forecaster = build_forecaster(scenario.clone(), start.date(), calendar);

    let controller: Arc<dyn HeatingController> = match mode {
        BatchMode::Manual => Arc::new(ManualController::new(
            cfg.manual,
            cfg.plant.max_power_w,
        )),
        BatchMode::Mpc => Arc::new(MpcController::new(
            cfg.mpc.clone(),
            cfg.plant,
            forecaster.clone(),
            start,
        )),
    };

    let mut settings = cfg.simulation.clone();
    settings.speed_factor = 0.0;
    let repos = Repositories::new(&cfg.history);
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(cfg.bus.capacity));

    Simulator::new(
        &settings,
        cfg.plant,
        forecaster,
        initial_state(cfg, &scenario),
        start,
        cfg.bus.topics.clone(),
        repos.sink,
        bus,
    )
    .with_controller(controller)
    .with_end(end)
    .run(CancellationToken::new())
    .await
}

/// Real-time twin: paced simulator, MPC controller service and HTTP
/// surface, until `cancel` fires or the run reaches its end.
pub async fn run_twin(cfg: Config, cancel: CancellationToken) -> Result<SimulationReport> {
    let cfg = Arc::new(cfg);
    let start = resolve_start(&cfg);
    let scenario = Arc::new(Scenario::load_or_default(&cfg.simulation.scenario_path).await);
    let end = resolve_end(&cfg, &scenario, start);

    let calendar = grade_calendar(&cfg, start.date()).await?;
    let forecaster = build_forecaster(scenario.clone(), start.date(), calendar.clone());
    let repos = Repositories::new(&cfg.history);
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(cfg.bus.capacity));

    let mut simulator = Simulator::new(
        &cfg.simulation,
        cfg.plant,
        forecaster.clone(),
        initial_state(&cfg, &scenario),
        start,
        cfg.bus.topics.clone(),
        repos.sink.clone(),
        bus.clone(),
    );
    if let Some(end) = end {
        simulator = simulator.with_end(end);
    }

    let mpc = Arc::new(MpcController::new(
        cfg.mpc.clone(),
        cfg.plant,
        forecaster,
        start,
    ));
    let service = ControllerService::new(
        mpc.clone(),
        bus.clone(),
        repos.history.clone(),
        repos.sink.clone(),
        cfg.bus.topics.clone(),
        cfg.simulation.location.clone(),
    );
    let workers = cancel.child_token();
    let controller_task = spawn_controller_service(service, workers.clone())
        .await
        .context("controller service subscription")?;

    if let Some(calendar) = calendar {
        spawn_grade_refresh(
            calendar,
            simulator.status_handle(),
            start.date(),
            Duration::from_secs(cfg.tariff.refresh_minutes * 60),
            workers.clone(),
        );
    }

    let state = AppState {
        cfg: cfg.clone(),
        panel: Arc::new(ControlPanel::new(
            bus.clone(),
            cfg.bus.topics.command.clone(),
            Some(mpc),
        )),
        valve: simulator.valve(),
        status: simulator.status_handle(),
    };
    let server = if cfg.server.enabled {
        Some(spawn_server(state, &cfg, workers.clone()).await?)
    } else {
        None
    };

    let report = simulator.run(cancel.clone()).await;

    workers.cancel();
    if let Err(e) = controller_task.await {
        warn!(error = %e, "controller service task failed");
    }
    if let Some(server) = server {
        if let Err(e) = server.await {
            warn!(error = %e, "http server task failed");
        }
    }
    report
}

async fn spawn_server(
    state: AppState,
    cfg: &Config,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0, the control surface is reachable from the network");
    }
    let app = crate::api::router(state, cfg);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "control surface listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            warn!(error = %e, "http server stopped");
        }
    }))
}
