//! # Portfolio Optimizers
//!
//! $$
//! \max_{\mathbf{w}} f(\mathbf{w})
//! \quad\text{s.t.}\quad \mathbf{1}^\top\mathbf{w} = 1,\ \ell \le w_i \le u
//! $$
//!
//! Constrained weight optimization with a spectral projected gradient solver
//! driven by `argmin`. The solver is local: it starts from equal weights and
//! stops at the nearest stationary point.

use anyhow::anyhow;
use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::IterState;
use argmin::core::Problem;
use argmin::core::Solver;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::core::KV;
use tracing::debug;

use super::metrics::Objective;
use super::types::Allocation;
use super::types::Metric;
use super::types::MetricParams;
use super::types::WeightBounds;
use crate::config::SolverConfig;
use crate::data::ReturnMatrix;
use crate::error::PortfolioError;

type PgState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

const ARMIJO: f64 = 1e-4;
const MIN_STEP: f64 = 1e-10;
const MAX_STEP: f64 = 1e4;
const MAX_BACKTRACKS: usize = 60;
/// Projected gradient norm accepted when the line search can no longer move.
const STALL_TOLERANCE: f64 = 1e-3;

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn sup_norm(a: &[f64]) -> f64 {
  a.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn sub(a: &[f64], b: &[f64]) -> Vec<f64> {
  a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
}

/// `x - alpha * g`
fn step(x: &[f64], g: &[f64], alpha: f64) -> Vec<f64> {
  x.iter().zip(g.iter()).map(|(x, g)| x - alpha * g).collect()
}

/// Euclidean projection of `v` onto `{sum w = 1, lower <= w <= upper}`.
///
/// The clamped sum `sum clamp(v_i - theta)` is non-increasing in `theta`;
/// bisection brackets the root and the free coordinates then give it exactly.
/// The set must be non-empty (`sum lower <= 1 <= sum upper`).
pub(crate) fn project_onto_budget(v: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
  let clamped = |theta: f64| -> Vec<f64> {
    v.iter()
      .zip(lower.iter().zip(upper.iter()))
      .map(|(x, (lo, hi))| (x - theta).clamp(*lo, *hi))
      .collect()
  };

  let mut a = v
    .iter()
    .zip(upper.iter())
    .map(|(x, hi)| x - hi)
    .fold(f64::INFINITY, f64::min);
  let mut b = v
    .iter()
    .zip(lower.iter())
    .map(|(x, lo)| x - lo)
    .fold(f64::NEG_INFINITY, f64::max);

  for _ in 0..200 {
    let mid = 0.5 * (a + b);
    if clamped(mid).iter().sum::<f64>() > 1.0 {
      a = mid;
    } else {
      b = mid;
    }
    if b - a <= f64::EPSILON * (1.0 + a.abs().max(b.abs())) {
      break;
    }
  }
  let mut theta = 0.5 * (a + b);

  let w = clamped(theta);
  let free: Vec<usize> = (0..v.len())
    .filter(|&i| w[i] > lower[i] && w[i] < upper[i])
    .collect();
  if !free.is_empty() {
    let fixed: f64 = (0..v.len())
      .filter(|i| !free.contains(i))
      .map(|i| w[i])
      .sum();
    let free_sum: f64 = free.iter().map(|&i| v[i]).sum();
    theta = (free_sum + fixed - 1.0) / free.len() as f64;
  }

  clamped(theta)
}

/// Negated objective with central finite-difference gradients.
struct NegatedObjective {
  objective: Objective,
  fd_step: f64,
}

impl CostFunction for NegatedObjective {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, Error> {
    Ok(-self.objective.score(w))
  }
}

impl Gradient for NegatedObjective {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, Error> {
    let h = self.fd_step;
    let mut probe = w.clone();
    let mut grad = Vec::with_capacity(w.len());

    for i in 0..w.len() {
      probe[i] = w[i] + h;
      let up = -self.objective.score(&probe);
      probe[i] = w[i] - h;
      let down = -self.objective.score(&probe);
      probe[i] = w[i];
      grad.push((up - down) / (2.0 * h));
    }

    Ok(grad)
  }
}

/// Spectral projected gradient (Barzilai-Borwein step with Armijo
/// backtracking) on the fully invested box.
#[derive(Clone, Debug)]
pub struct ProjectedGradient {
  lower: Vec<f64>,
  upper: Vec<f64>,
  gradient_tolerance: f64,
  cost_tolerance: f64,
  alpha: f64,
  outcome: Option<TerminationReason>,
}

impl ProjectedGradient {
  pub fn new(lower: Vec<f64>, upper: Vec<f64>, config: &SolverConfig) -> Self {
    Self {
      lower,
      upper,
      gradient_tolerance: config.gradient_tolerance,
      cost_tolerance: config.cost_tolerance,
      alpha: 1.0,
      outcome: None,
    }
  }

  fn project(&self, v: &[f64]) -> Vec<f64> {
    project_onto_budget(v, &self.lower, &self.upper)
  }

  /// Sup norm of the unit projected gradient step.
  fn stationarity(&self, x: &[f64], g: &[f64]) -> f64 {
    sup_norm(&sub(&self.project(&step(x, g, 1.0)), x))
  }
}

impl<O> Solver<O, PgState> for ProjectedGradient
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  const NAME: &'static str = "Spectral Projected Gradient";

  fn init(&mut self, problem: &mut Problem<O>, mut state: PgState) -> Result<(PgState, Option<KV>), Error> {
    let x0 = state
      .take_param()
      .ok_or_else(|| anyhow!("initial weights are required"))?;
    let x = self.project(&x0);
    let cost = problem.cost(&x)?;
    let grad = problem.gradient(&x)?;

    if !cost.is_finite() {
      self.outcome = Some(TerminationReason::SolverExit(
        "objective is not finite at the initial weights".to_string(),
      ));
    }

    Ok((state.param(x).cost(cost).gradient(grad), None))
  }

  fn next_iter(
    &mut self,
    problem: &mut Problem<O>,
    mut state: PgState,
  ) -> Result<(PgState, Option<KV>), Error> {
    if self.outcome.is_some() {
      return Ok((state, None));
    }

    let x = state
      .take_param()
      .ok_or_else(|| anyhow!("solver state lost its weights"))?;
    let g = state
      .take_gradient()
      .ok_or_else(|| anyhow!("solver state lost its gradient"))?;
    let f = state.get_cost();

    if g.iter().any(|v| !v.is_finite()) {
      self.outcome = Some(TerminationReason::SolverExit(
        "objective gradient is not finite".to_string(),
      ));
      return Ok((state.param(x).gradient(g), None));
    }

    let pg = self.stationarity(&x, &g);
    if pg <= self.gradient_tolerance {
      self.outcome = Some(TerminationReason::SolverConverged);
      return Ok((state.param(x).gradient(g), None));
    }

    let scale = 1.0 + sup_norm(&x);
    let mut alpha = self.alpha;
    let mut accepted = None;
    for _ in 0..MAX_BACKTRACKS {
      let candidate = self.project(&step(&x, &g, alpha));
      let d = sub(&candidate, &x);
      if sup_norm(&d) <= f64::EPSILON * scale {
        break;
      }

      let fc = problem.cost(&candidate)?;
      if fc.is_finite() && fc <= f + ARMIJO * dot(&g, &d) {
        accepted = Some((candidate, fc));
        break;
      }
      alpha *= 0.5;
    }

    let Some((x_next, f_next)) = accepted else {
      self.outcome = Some(if pg <= STALL_TOLERANCE {
        TerminationReason::SolverConverged
      } else {
        TerminationReason::SolverExit("Positive directional derivative for linesearch".to_string())
      });
      return Ok((state.param(x).gradient(g), None));
    };

    let g_next = problem.gradient(&x_next)?;
    let s = sub(&x_next, &x);
    let y = sub(&g_next, &g);
    let sy = dot(&s, &y);
    self.alpha = if sy > 0.0 {
      (dot(&s, &s) / sy).clamp(MIN_STEP, MAX_STEP)
    } else {
      MAX_STEP
    };

    if (f - f_next).abs() <= self.cost_tolerance * f.abs().max(1.0) {
      self.outcome = Some(TerminationReason::SolverConverged);
    }

    Ok((state.param(x_next).cost(f_next).gradient(g_next), None))
  }

  fn terminate(&mut self, _state: &PgState) -> TerminationStatus {
    match self.outcome.take() {
      Some(reason) => TerminationStatus::Terminated(reason),
      None => TerminationStatus::NotTerminated,
    }
  }
}

fn failure(metric: Metric, reason: impl Into<String>) -> PortfolioError {
  PortfolioError::OptimizationFailure {
    metric: metric.to_string(),
    reason: reason.into(),
  }
}

/// Maximize `metric` over fully invested weights within `bounds`, starting
/// from equal weights.
///
/// A single asset gets `[1.0]` without running the solver. Any solver outcome
/// other than convergence, including the iteration cap, is an
/// [`PortfolioError::OptimizationFailure`] carrying the solver's reason.
pub fn optimize_weights(
  returns: &ReturnMatrix,
  metric: Metric,
  bounds: &WeightBounds,
  params: &MetricParams,
  config: &SolverConfig,
) -> crate::error::Result<Allocation> {
  bounds.validate()?;
  let n = returns.n_assets();
  if !bounds.is_feasible(n) {
    return Err(failure(
      metric,
      format!(
        "bounds [{}, {}] cannot hold a fully invested portfolio of {n} assets",
        bounds.lower(),
        bounds.upper()
      ),
    ));
  }

  let objective = Objective::new(metric, returns, params);

  if n == 1 {
    let weights = vec![1.0];
    let score = objective.score(&weights);
    return Ok(Allocation {
      metric,
      weights,
      score,
      iterations: 0,
    });
  }

  let x0 = vec![1.0 / n as f64; n];
  let solver = ProjectedGradient::new(vec![bounds.lower(); n], vec![bounds.upper(); n], config);
  let problem = NegatedObjective {
    objective: objective.clone(),
    fd_step: config.fd_step,
  };

  let result = Executor::new(problem, solver)
    .configure(|state| state.param(x0).max_iters(config.max_iters))
    .run()
    .map_err(|e| failure(metric, e.to_string()))?;

  let state = result.state;
  let iterations = state.get_iter();
  match state.get_termination_reason() {
    Some(TerminationReason::SolverConverged) => {}
    Some(TerminationReason::MaxItersReached) => {
      return Err(failure(
        metric,
        format!("Iteration limit reached ({iterations} iterations)"),
      ));
    }
    Some(TerminationReason::SolverExit(reason)) => return Err(failure(metric, reason.clone())),
    Some(other) => return Err(failure(metric, format!("{other:?}"))),
    None => return Err(failure(metric, "solver stopped without a termination reason")),
  }

  let weights = state
    .get_best_param()
    .cloned()
    .ok_or_else(|| failure(metric, "solver returned no weights"))?;
  let score = objective.score(&weights);
  debug!(
    "{metric}: converged after {iterations} iterations, score {score:.6}, {} cost evaluations",
    state.get_func_counts().get("cost_count").copied().unwrap_or_default()
  );

  Ok(Allocation {
    metric,
    weights,
    score,
    iterations,
  })
}
