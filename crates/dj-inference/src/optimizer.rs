//! Bounded minimization over argmin's L-BFGS.
//!
//! Box constraints are enforced by clamping the parameters before every
//! evaluation and projecting the gradient at active bounds.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use dj_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Minimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerConfig {
    /// Iteration cap.
    pub max_iter: u64,
    /// Gradient-norm tolerance.
    pub tol: f64,
    /// L-BFGS history size.
    pub memory: usize,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, memory: 10 }
    }
}

/// Outcome of one minimization.
#[derive(Debug, Clone, Serialize)]
pub struct Minimum {
    /// Best parameters (inside the bounds).
    pub parameters: Vec<f64>,
    /// Objective at `parameters`.
    pub fval: f64,
    /// Iterations performed.
    pub n_iter: u64,
    /// Objective evaluations.
    pub n_fev: usize,
    /// Gradient evaluations.
    pub n_gev: usize,
    /// True when the solver reported convergence.
    pub converged: bool,
    /// Termination status text.
    pub message: String,
}

impl fmt::Display for Minimum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Minimum(fval={:.6}, n_iter={}, n_fev={}, converged={}, {})",
            self.fval, self.n_iter, self.n_fev, self.converged, self.message
        )
    }
}

/// Function to minimize.
pub trait Objective: Send + Sync {
    /// Objective value.
    fn value(&self, params: &[f64]) -> Result<f64>;

    /// Gradient; central differences unless overridden.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut x = params.to_vec();
        let mut grad = Vec::with_capacity(params.len());
        for i in 0..params.len() {
            let h = 1e-8 * params[i].abs().max(1.0);
            x[i] = params[i] + h;
            let up = self.value(&x)?;
            x[i] = params[i] - h;
            let down = self.value(&x)?;
            x[i] = params[i];
            grad.push((up - down) / (2.0 * h));
        }
        Ok(grad)
    }
}

fn clamp(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

fn to_argmin(e: Error) -> argmin::core::Error {
    argmin::core::Error::msg(e.to_string())
}

#[derive(Default)]
struct Evaluations {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct Problem<'a> {
    objective: &'a dyn Objective,
    bounds: &'a [(f64, f64)],
    evals: Arc<Evaluations>,
}

impl CostFunction for Problem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Vec<f64>) -> std::result::Result<f64, argmin::core::Error> {
        self.evals.cost.fetch_add(1, Ordering::Relaxed);
        self.objective.value(&clamp(params, self.bounds)).map_err(to_argmin)
    }
}

impl Gradient for Problem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Vec<f64>) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        self.evals.grad.fetch_add(1, Ordering::Relaxed);
        let x = clamp(params, self.bounds);
        let mut g = self.objective.gradient(&x).map_err(to_argmin)?;
        project(&mut g, &x, self.bounds);
        Ok(g)
    }
}

/// Zero gradient components that push an active bound outward.
fn project(g: &mut [f64], x: &[f64], bounds: &[(f64, f64)]) {
    const EPS: f64 = 1e-12;
    for ((gi, &xi), &(lo, hi)) in g.iter_mut().zip(x).zip(bounds) {
        if (xi <= lo + EPS && *gi > 0.0) || (xi >= hi - EPS && *gi < 0.0) {
            *gi = 0.0;
        }
    }
}

/// L-BFGS with box constraints.
#[derive(Debug, Clone, Default)]
pub struct LbfgsbMinimizer {
    config: MinimizerConfig,
}

impl LbfgsbMinimizer {
    /// Create a minimizer.
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` from `init` within `bounds` (one `(lo, hi)` per parameter).
    pub fn minimize(
        &self,
        objective: &dyn Objective,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<Minimum> {
        if init.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "{} initial values for {} bounds",
                init.len(),
                bounds.len()
            )));
        }
        let start = clamp(init, bounds);

        // A start point that already satisfies the gradient tolerance would hand
        // the line search a zero direction.
        let mut g0 = objective.gradient(&start)?;
        project(&mut g0, &start, bounds);
        if g0.iter().map(|g| g * g).sum::<f64>().sqrt() <= self.config.tol {
            return Ok(Minimum {
                fval: objective.value(&start)?,
                parameters: start,
                n_iter: 0,
                n_fev: 1,
                n_gev: 1,
                converged: true,
                message: "start point satisfies gradient tolerance".into(),
            });
        }

        let evals = Arc::new(Evaluations::default());
        let problem = Problem { objective, bounds, evals: evals.clone() };
        let tol_cost = if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.memory)
            .with_tolerance_grad(self.config.tol)
            .and_then(|s| s.with_tolerance_cost(tol_cost))
            .map_err(|e| Error::Configuration(format!("minimizer tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(start).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("minimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("minimizer returned no parameters".into()))?;
        let status = state.get_termination_status();
        let converged = matches!(
            status,
            TerminationStatus::Terminated(
                TerminationReason::SolverConverged | TerminationReason::TargetCostReached
            )
        );

        Ok(Minimum {
            parameters: clamp(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: evals.cost.load(Ordering::Relaxed),
            n_gev: evals.grad.load(Ordering::Relaxed),
            converged,
            message: status.to_string(),
        })
    }
}
