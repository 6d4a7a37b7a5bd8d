//! Receding-horizon heating controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use validator::Validate;

use super::HeatingController;
use crate::domain::{ControlAction, Forecast, PlantParameters};
use crate::forecast::{hour_of_day, Forecaster, WeatherOutlook};
use crate::optimizer::{
    ComfortBand, HeatingProblem, NlpSolver, ObjectiveWeights, ProjectedNewtonSolver,
    SolverError,
};
use crate::simulation::{parse_iso_timestamp, solar_gain_w, PlantModel, TimeParseError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MpcSettings {
    /// Horizon step, also the minimum spacing between two decisions (s)
    #[validate(range(min = 60))]
    pub step_seconds: u32,
    #[validate(range(min = 0.25, max = 168.0))]
    pub horizon_hours: f64,
    #[validate(nested)]
    pub comfort: ComfortBand,
    #[validate(nested)]
    pub weights: ObjectiveWeights,
    pub outlook: WeatherOutlook,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for MpcSettings {
    fn default() -> Self {
        Self {
            step_seconds: 900,
            horizon_hours: 24.0,
            comfort: ComfortBand::default(),
            weights: ObjectiveWeights::default(),
            outlook: WeatherOutlook::Synthetic,
            max_iterations: 2_000,
            tolerance: 1e-6,
        }
    }
}

pub struct MpcController {
    settings: MpcSettings,
    plant: PlantModel,
    forecaster: Arc<Forecaster>,
    solver: Box<dyn NlpSolver>,
    auto_mode: AtomicBool,
    current_time: RwLock<NaiveDateTime>,
    /// Previous plan, shifted by one step to warm-start the next solve
    warm_start: Mutex<Vec<f64>>,
}

impl MpcController {
    pub fn new(
        settings: MpcSettings,
        params: PlantParameters,
        forecaster: Arc<Forecaster>,
        start: NaiveDateTime,
    ) -> Self {
        let solver = ProjectedNewtonSolver::new(settings.max_iterations, settings.tolerance);
        Self::with_solver(settings, params, forecaster, start, Box::new(solver))
    }

    pub fn with_solver(
        settings: MpcSettings,
        params: PlantParameters,
        forecaster: Arc<Forecaster>,
        start: NaiveDateTime,
        solver: Box<dyn NlpSolver>,
    ) -> Self {
        Self {
            settings,
            plant: PlantModel::new(params),
            forecaster,
            solver,
            auto_mode: AtomicBool::new(true),
            current_time: RwLock::new(start),
            warm_start: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &MpcSettings {
        &self.settings
    }

    /// Number of steps covering `horizon_hours`.
    pub fn horizon(&self) -> usize {
        let step = f64::from(self.settings.step_seconds.max(1));
        ((self.settings.horizon_hours * 3600.0 / step).ceil() as usize).max(1)
    }

    pub fn set_auto_mode(&self, enabled: bool) {
        self.auto_mode.store(enabled, Ordering::Release);
        info!(auto_mode = enabled, "mpc mode changed");
    }

    pub fn is_auto_mode(&self) -> bool {
        self.auto_mode.load(Ordering::Acquire)
    }

    /// Moves the controller's notion of "now" to the simulated clock. On a
    /// malformed timestamp the previous time is kept.
    pub fn update_time(&self, iso: &str) -> Result<NaiveDateTime, TimeParseError> {
        let now = parse_iso_timestamp(iso)?;
        self.set_time(now);
        Ok(now)
    }

    pub fn set_time(&self, now: NaiveDateTime) {
        *self.current_time.write() = now;
        debug!(%now, "mpc time updated");
    }

    pub fn current_time(&self) -> NaiveDateTime {
        *self.current_time.read()
    }

    pub fn build_forecast(&self, start: NaiveDateTime) -> Forecast {
        self.forecaster.horizon(
            start,
            self.horizon(),
            self.settings.step_seconds,
            self.settings.outlook,
        )
    }

    /// Optimization problem for a room at `t_init_c` at `start`.
    pub fn build_problem(&self, t_init_c: f64, start: NaiveDateTime) -> HeatingProblem {
        let params = self.plant.params();
        let forecast = self.build_forecast(start);
        let gains_w = forecast
            .points
            .iter()
            .map(|p| {
                solar_gain_w(
                    hour_of_day(p.time),
                    p.nebulosity,
                    params.window_area_m2,
                    params.solar_transmittance,
                ) + params.internal_gains_w
            })
            .collect();
        HeatingProblem::new(
            self.plant.discretize(f64::from(self.settings.step_seconds)),
            t_init_c,
            &forecast,
            gains_w,
            params.max_power_w,
            self.settings.comfort,
            self.settings.weights,
        )
    }

    fn solve(&self, t_init_c: f64, start: NaiveDateTime) -> Result<ControlAction, SolverError> {
        let problem = self.build_problem(t_init_c, start);
        if !problem.is_well_formed() {
            return Err(SolverError::IllPosed);
        }

        let n = self.horizon();
        let x0 = {
            let previous = self.warm_start.lock();
            let mut x0 = if previous.len() > 1 {
                previous[1..].to_vec()
            } else {
                Vec::new()
            };
            x0.resize(n, 0.0);
            x0
        };

        let solution = match self.solver.minimize(&problem, &x0) {
            Ok(solution) => solution,
            Err(e) => {
                // The shifted plan stays the starting point of the next solve.
                *self.warm_start.lock() = x0;
                return Err(e);
            }
        };
        let u0 = solution.x.first().copied().unwrap_or(f64::NAN);
        if !u0.is_finite() {
            *self.warm_start.lock() = x0;
            return Err(SolverError::NonFinite {
                iteration: solution.iterations,
            });
        }

        debug!(
            solver = self.solver.name(),
            objective = solution.objective,
            iterations = solution.iterations,
            "mpc solve finished"
        );
        let action = ControlAction::from_power(u0 * problem.max_power_w(), problem.max_power_w());
        *self.warm_start.lock() = solution.x;
        Ok(action)
    }
}

impl HeatingController for MpcController {
    fn name(&self) -> &str {
        "mpc"
    }

    fn optimize(&self, t_init_c: f64) -> Option<ControlAction> {
        if !self.is_auto_mode() {
            info!("mpc in manual mode, skipping optimization");
            return None;
        }
        let start = self.current_time();

        match self.solve(t_init_c, start) {
            Ok(action) => {
                info!(
                    %start,
                    t_init_c,
                    valve_position = action.valve_position,
                    planned_power_w = action.planned_power_w,
                    "mpc decision"
                );
                Some(action)
            }
            Err(e) => {
                warn!(error = %e, %start, t_init_c, "mpc optimization failed, heating off");
                Some(ControlAction::fail_safe(e.to_string()))
            }
        }
    }

    fn sync_clock(&self, now: NaiveDateTime) {
        self.set_time(now);
    }
}
