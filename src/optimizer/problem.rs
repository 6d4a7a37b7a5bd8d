//! Finite-horizon heating problem.
//!
//! Decision: heating power `P[0..N-1] ∈ [0, P_max]`, scaled to the valve
//! fraction `u = P / P_max ∈ [0, 1]` so the solver works on unit boxes.
//!
//! Dynamics (explicit Euler at the horizon step `dt`):
//!
//! ```text
//! T[k+1] = T[k] + (UA·(T_ext[k] − T[k]) + u[k]·P_max + G[k])·dt / C
//! ```
//!
//! where `G[k]` are the known solar and internal gains.
//!
//! Comfort is soft: the slacks `v_min[k] ≥ T_min − T[k]`, `v_max[k] ≥
//! T[k] − T_max`, `v ≥ 0` are optimal at their positive parts, so they are
//! eliminated and the objective becomes
//!
//! ```text
//! J(u) = Σ price[k]·P[k]·k_price + ρ·v_min[k+1]² + ρ·k_asym·v_max[k+1]²
//! ```
//!
//! which is convex and piecewise quadratic in `u`. Its gradient is obtained
//! with one forward pass over the trajectory and one backward (adjoint) pass.

use crate::domain::Forecast;
use crate::simulation::DiscreteDynamics;

use super::{ComfortBand, ObjectiveWeights};

/// Smooth objective over a box, the contract every solver works against.
pub trait BoxConstrainedProblem {
    fn dimension(&self) -> usize;

    /// `(lower, upper)` bound of variable `i`.
    fn bounds(&self, i: usize) -> (f64, f64);

    /// Objective value at `x`, writing its gradient into `grad`.
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> f64;

    /// Hessian of the objective at `x` applied to `v`, written into `out`.
    ///
    /// The default differences two gradients, which is exact up to rounding
    /// for quadratics.
    fn hessian_product(&self, x: &[f64], v: &[f64], out: &mut [f64]) {
        let scale = v.iter().fold(0.0_f64, |m, vi| m.max(vi.abs()));
        if scale == 0.0 {
            out.fill(0.0);
            return;
        }
        let size = x.iter().fold(1.0_f64, |m, xi| m.max(xi.abs()));
        let h = 1e-7 * size / scale;

        let mut base = vec![0.0; x.len()];
        self.evaluate(x, &mut base);
        let shifted: Vec<f64> = x.iter().zip(v).map(|(xi, vi)| xi + h * vi).collect();
        self.evaluate(&shifted, out);
        for (o, g) in out.iter_mut().zip(&base) {
            *o = (*o - g) / h;
        }
    }

    fn project(&self, x: &mut [f64]) {
        for (i, xi) in x.iter_mut().enumerate() {
            let (lo, hi) = self.bounds(i);
            *xi = xi.clamp(lo, hi);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeatingProblem {
    dynamics: DiscreteDynamics,
    t_init_c: f64,
    t_ext_c: Vec<f64>,
    gains_w: Vec<f64>,
    prices: Vec<f64>,
    max_power_w: f64,
    comfort: ComfortBand,
    weights: ObjectiveWeights,
}

/// Predicted trajectory for a decision vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// `T[0..=N]`, starting at the initial condition
    pub temperatures_c: Vec<f64>,
    /// `v_min[k]` for `T[k+1]`
    pub under_c: Vec<f64>,
    /// `v_max[k]` for `T[k+1]`
    pub over_c: Vec<f64>,
}

impl HeatingProblem {
    pub fn new(
        dynamics: DiscreteDynamics,
        t_init_c: f64,
        forecast: &Forecast,
        gains_w: Vec<f64>,
        max_power_w: f64,
        comfort: ComfortBand,
        weights: ObjectiveWeights,
    ) -> Self {
        let n = forecast.len();
        let mut gains_w = gains_w;
        gains_w.resize(n, 0.0);
        Self {
            dynamics,
            t_init_c,
            t_ext_c: forecast.t_ext(),
            gains_w,
            prices: forecast.prices(),
            max_power_w,
            comfort,
            weights,
        }
    }

    pub fn max_power_w(&self) -> f64 {
        self.max_power_w
    }

    /// Whether every coefficient is a finite number.
    pub fn is_well_formed(&self) -> bool {
        self.t_init_c.is_finite()
            && self.max_power_w.is_finite()
            && self.dynamics.state_gain().is_finite()
            && self.dynamics.input_gain().is_finite()
            && self
                .t_ext_c
                .iter()
                .chain(&self.gains_w)
                .chain(&self.prices)
                .all(|v| v.is_finite())
    }

    pub fn trajectory(&self, u: &[f64]) -> Trajectory {
        let n = self.dimension();
        let mut temperatures_c = Vec::with_capacity(n + 1);
        temperatures_c.push(self.t_init_c);
        let mut t = self.t_init_c;
        for k in 0..n {
            let power_in = u[k] * self.max_power_w + self.gains_w[k];
            t = self.dynamics.next_temperature(t, self.t_ext_c[k], power_in);
            temperatures_c.push(t);
        }
        let under_c = temperatures_c[1..]
            .iter()
            .map(|&t| self.comfort.under(t))
            .collect();
        let over_c = temperatures_c[1..]
            .iter()
            .map(|&t| self.comfort.over(t))
            .collect();
        Trajectory {
            temperatures_c,
            under_c,
            over_c,
        }
    }
}

impl BoxConstrainedProblem for HeatingProblem {
    fn dimension(&self) -> usize {
        self.t_ext_c.len()
    }

    fn bounds(&self, _i: usize) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn evaluate(&self, u: &[f64], grad: &mut [f64]) -> f64 {
        let n = self.dimension();
        let rho = self.weights.rho;
        let rho_over = self.weights.rho * self.weights.asym_weight;
        let price_gain = self.max_power_w * self.weights.price_scale;
        let traj = self.trajectory(u);

        let mut objective = 0.0;
        for k in 0..n {
            objective += self.prices[k] * u[k] * price_gain
                + rho * traj.under_c[k].powi(2)
                + rho_over * traj.over_c[k].powi(2);
        }

        // Adjoint of T[k+1] for k = N-1 down to 0: λ[k] = ∂J/∂T[k+1] + a·λ[k+1].
        let a = self.dynamics.state_gain();
        let b = self.dynamics.input_gain() * self.max_power_w;
        let mut lambda = 0.0;
        for k in (0..n).rev() {
            let d_comfort = -2.0 * rho * traj.under_c[k] + 2.0 * rho_over * traj.over_c[k];
            lambda = d_comfort + a * lambda;
            grad[k] = self.prices[k] * price_gain + b * lambda;
        }

        objective
    }

    /// Exact on each quadratic piece: the comfort terms active at `u` fix
    /// the curvature `2ρ` (under the band) or `2ρ·k_asym` (over it) of each
    /// predicted temperature.
    fn hessian_product(&self, u: &[f64], v: &[f64], out: &mut [f64]) {
        let n = self.dimension();
        let rho = self.weights.rho;
        let rho_over = self.weights.rho * self.weights.asym_weight;
        let a = self.dynamics.state_gain();
        let b = self.dynamics.input_gain() * self.max_power_w;
        let traj = self.trajectory(u);

        // δT[k+1] for the input perturbation v.
        let mut response = Vec::with_capacity(n);
        let mut dt = 0.0;
        for vk in v.iter().take(n) {
            dt = a * dt + b * vk;
            response.push(dt);
        }

        let mut adjoint = 0.0;
        for k in (0..n).rev() {
            let curvature = if traj.under_c[k] > 0.0 {
                2.0 * rho
            } else if traj.over_c[k] > 0.0 {
                2.0 * rho_over
            } else {
                0.0
            };
            adjoint = curvature * response[k] + a * adjoint;
            out[k] = b * adjoint;
        }
    }
}
