//! Solvers for box-constrained smooth problems.

use thiserror::Error;

use super::BoxConstrainedProblem;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("problem has no decision variables")]
    Empty,
    #[error("problem coefficients are not finite")]
    IllPosed,
    #[error("objective is not finite at iteration {iteration}")]
    NonFinite { iteration: usize },
    #[error("line search failed at iteration {iteration}")]
    LineSearch { iteration: usize },
    #[error("no convergence after {iterations} iterations (residual {residual:.3e})")]
    NotConverged { iterations: usize, residual: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
}

pub trait NlpSolver: Send + Sync {
    fn name(&self) -> &str;

    fn minimize(
        &self,
        problem: &dyn BoxConstrainedProblem,
        x0: &[f64],
    ) -> Result<Solution, SolverError>;
}

/// Relative curvature below which a conjugate direction counts as flat.
const FLAT_CURVATURE: f64 = 1e-10;

/// Upper bound on the forcing term of the inner conjugate-gradient solve.
const CG_FORCING: f64 = 0.1;

/// Backtracking halvings tried on a Newton direction.
const NEWTON_BACKTRACKS: usize = 40;

/// Projected Newton method for smooth convex objectives over a box.
///
/// Each iteration first takes a projected gradient step, with a
/// Barzilai–Borwein trial length and an Armijo search along the projection
/// arc, which settles the bounds that hold. It then minimizes the local
/// quadratic model over the variables left free, by conjugate gradients on
/// [`hessian_product`](BoxConstrainedProblem::hessian_product), and
/// searches along the projection of that direction. Flat conjugate
/// directions are followed to the far side of the box, so objectives that
/// are linear along some directions reach their bounds in one step.
///
/// Converged when the projected-gradient residual `‖x − Π(x − ∇f)‖∞` drops
/// below `tolerance`, or when the objective stops decreasing for
/// `stall_limit` iterations.
#[derive(Debug, Clone)]
pub struct ProjectedNewtonSolver {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub stall_limit: usize,
    armijo: f64,
    min_step: f64,
    max_step: f64,
}

impl Default for ProjectedNewtonSolver {
    fn default() -> Self {
        Self {
            max_iterations: 2_000,
            tolerance: 1e-6,
            stall_limit: 25,
            armijo: 1e-4,
            min_step: 1e-12,
            max_step: 1e12,
        }
    }
}

/// Scratch vectors reused across iterations.
struct Workspace {
    trial: Vec<f64>,
    trial_grad: Vec<f64>,
    free: Vec<bool>,
    direction: Vec<f64>,
    residual: Vec<f64>,
    conjugate: Vec<f64>,
    curvature: Vec<f64>,
}

impl Workspace {
    fn new(n: usize) -> Self {
        Self {
            trial: vec![0.0; n],
            trial_grad: vec![0.0; n],
            free: vec![true; n],
            direction: vec![0.0; n],
            residual: vec![0.0; n],
            conjugate: vec![0.0; n],
            curvature: vec![0.0; n],
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

impl ProjectedNewtonSolver {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            ..Default::default()
        }
    }

    fn residual(problem: &dyn BoxConstrainedProblem, x: &[f64], grad: &[f64]) -> f64 {
        x.iter()
            .zip(grad)
            .enumerate()
            .map(|(i, (xi, gi))| {
                let (lo, hi) = problem.bounds(i);
                (xi - (xi - gi).clamp(lo, hi)).abs()
            })
            .fold(0.0, f64::max)
    }

    /// Evaluates `ws.trial` and moves there on sufficient decrease along
    /// the actual (projected) displacement.
    fn try_accept(
        &self,
        problem: &dyn BoxConstrainedProblem,
        x: &mut Vec<f64>,
        grad: &mut Vec<f64>,
        f: &mut f64,
        ws: &mut Workspace,
    ) -> bool {
        let descent: f64 = grad
            .iter()
            .zip(ws.trial.iter().zip(x.iter()))
            .map(|(g, (t, xi))| g * (t - xi))
            .sum();
        if descent.is_nan() || descent >= 0.0 {
            return false;
        }
        let f_trial = problem.evaluate(&ws.trial, &mut ws.trial_grad);
        if f_trial.is_finite() && f_trial <= *f + self.armijo * descent {
            std::mem::swap(x, &mut ws.trial);
            std::mem::swap(grad, &mut ws.trial_grad);
            *f = f_trial;
            true
        } else {
            false
        }
    }

    fn gradient_step(
        &self,
        problem: &dyn BoxConstrainedProblem,
        x: &mut Vec<f64>,
        grad: &mut Vec<f64>,
        f: &mut f64,
        initial_step: f64,
        ws: &mut Workspace,
    ) -> bool {
        let mut alpha = initial_step;
        while alpha >= self.min_step {
            for i in 0..x.len() {
                ws.trial[i] = x[i] - alpha * grad[i];
            }
            problem.project(&mut ws.trial);
            if self.try_accept(problem, x, grad, f, ws) {
                return true;
            }
            alpha *= 0.5;
        }
        false
    }

    fn newton_step(
        &self,
        problem: &dyn BoxConstrainedProblem,
        x: &mut Vec<f64>,
        grad: &mut Vec<f64>,
        f: &mut f64,
        ws: &mut Workspace,
    ) -> bool {
        let mut free_gradient = 0.0_f64;
        for i in 0..x.len() {
            let (lo, hi) = problem.bounds(i);
            let held = (x[i] <= lo && grad[i] >= 0.0) || (x[i] >= hi && grad[i] <= 0.0);
            ws.free[i] = !held;
            if !held {
                free_gradient = free_gradient.max(grad[i].abs());
            }
        }
        if free_gradient <= 0.1 * self.tolerance {
            return false;
        }
        if !Self::newton_direction(problem, x, grad, free_gradient, self.tolerance, ws) {
            return false;
        }

        let mut alpha = 1.0;
        for _ in 0..NEWTON_BACKTRACKS {
            for i in 0..x.len() {
                ws.trial[i] = x[i] + alpha * ws.direction[i];
            }
            problem.project(&mut ws.trial);
            if self.try_accept(problem, x, grad, f, ws) {
                return true;
            }
            alpha *= 0.5;
        }
        false
    }

    /// Conjugate gradients on `H_FF·d = −g_F`, writing `d` into
    /// `ws.direction`. Returns `false` when no usable direction was found.
    fn newton_direction(
        problem: &dyn BoxConstrainedProblem,
        x: &[f64],
        grad: &[f64],
        free_gradient: f64,
        tolerance: f64,
        ws: &mut Workspace,
    ) -> bool {
        let n = x.len();
        ws.direction.fill(0.0);
        for i in 0..n {
            ws.residual[i] = if ws.free[i] { -grad[i] } else { 0.0 };
        }
        ws.conjugate.copy_from_slice(&ws.residual);

        let free_count = ws.free.iter().filter(|f| **f).count();
        let target = (CG_FORCING.min(free_gradient.sqrt()) * free_gradient).max(0.1 * tolerance);
        let mut rr = dot(&ws.residual, &ws.residual);
        let mut max_curvature = 0.0_f64;

        for _ in 0..(2 * free_count + 10) {
            problem.hessian_product(x, &ws.conjugate, &mut ws.curvature);
            for i in 0..n {
                if !ws.free[i] {
                    ws.curvature[i] = 0.0;
                }
            }
            let pp = dot(&ws.conjugate, &ws.conjugate);
            let php = dot(&ws.conjugate, &ws.curvature);
            if !php.is_finite() || pp == 0.0 {
                return false;
            }

            let curvature = php / pp;
            if curvature <= FLAT_CURVATURE * max_curvature {
                let reach = Self::box_reach(problem, x, &ws.direction, &ws.conjugate);
                for i in 0..n {
                    ws.direction[i] += reach * ws.conjugate[i];
                }
                return true;
            }
            max_curvature = max_curvature.max(curvature);

            let alpha = rr / php;
            for i in 0..n {
                ws.direction[i] += alpha * ws.conjugate[i];
                ws.residual[i] -= alpha * ws.curvature[i];
            }
            if max_abs(&ws.residual) <= target {
                break;
            }
            let rr_next = dot(&ws.residual, &ws.residual);
            let beta = rr_next / rr;
            rr = rr_next;
            for i in 0..n {
                ws.conjugate[i] = ws.residual[i] + beta * ws.conjugate[i];
            }
        }
        ws.direction.iter().all(|d| d.is_finite())
    }

    /// Step length along `p` from `x + d` after which every moving variable
    /// has reached the bound it is heading for.
    fn box_reach(problem: &dyn BoxConstrainedProblem, x: &[f64], d: &[f64], p: &[f64]) -> f64 {
        let mut reach = 0.0_f64;
        for i in 0..x.len() {
            if p[i] == 0.0 {
                continue;
            }
            let (lo, hi) = problem.bounds(i);
            let bound = if p[i] > 0.0 { hi } else { lo };
            let distance = (bound - x[i] - d[i]) / p[i];
            if distance.is_finite() && distance > reach {
                reach = distance;
            }
        }
        if reach > 0.0 {
            reach
        } else {
            1.0 / max_abs(p)
        }
    }
}

impl NlpSolver for ProjectedNewtonSolver {
    fn name(&self) -> &str {
        "projected-newton"
    }

    fn minimize(
        &self,
        problem: &dyn BoxConstrainedProblem,
        x0: &[f64],
    ) -> Result<Solution, SolverError> {
        let n = problem.dimension();
        if n == 0 {
            return Err(SolverError::Empty);
        }

        let mut x = x0.to_vec();
        x.resize(n, 0.0);
        for (i, xi) in x.iter_mut().enumerate() {
            if !xi.is_finite() {
                *xi = problem.bounds(i).0;
            }
        }
        problem.project(&mut x);
        let mut grad = vec![0.0; n];
        let mut f = problem.evaluate(&x, &mut grad);
        if !f.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return Err(SolverError::NonFinite { iteration: 0 });
        }

        let mut ws = Workspace::new(n);
        let mut step = 1.0;
        let mut stalled = 0;
        let mut previous_x = vec![0.0; n];
        let mut previous_grad = vec![0.0; n];

        for iteration in 1..=self.max_iterations {
            let residual = Self::residual(problem, &x, &grad);
            if residual <= self.tolerance || stalled >= self.stall_limit {
                return Ok(Solution {
                    x,
                    objective: f,
                    iterations: iteration - 1,
                });
            }
            let f_start = f;

            previous_x.copy_from_slice(&x);
            previous_grad.copy_from_slice(&grad);
            if !self.gradient_step(problem, &mut x, &mut grad, &mut f, step, &mut ws) {
                // A residual this close to the tolerance is round-off.
                if residual <= self.tolerance.sqrt() {
                    return Ok(Solution {
                        x,
                        objective: f,
                        iterations: iteration,
                    });
                }
                return Err(SolverError::LineSearch { iteration });
            }

            let mut ss = 0.0;
            let mut sy = 0.0;
            for i in 0..n {
                let s = x[i] - previous_x[i];
                ss += s * s;
                sy += s * (grad[i] - previous_grad[i]);
            }
            step = if sy > 0.0 {
                (ss / sy).clamp(self.min_step, self.max_step)
            } else {
                self.max_step
            };

            self.newton_step(problem, &mut x, &mut grad, &mut f, &mut ws);

            if !f.is_finite() {
                return Err(SolverError::NonFinite { iteration });
            }
            if f_start - f <= f64::EPSILON * f_start.abs().max(1.0) {
                stalled += 1;
            } else {
                stalled = 0;
            }
        }

        Err(SolverError::NotConverged {
            iterations: self.max_iterations,
            residual: Self::residual(problem, &x, &grad),
        })
    }
}
