//! # Portfolio Metrics
//!
//! $$
//! S(\mathbf{w}) = \frac{P\,\mathbf{w}^\top\bar{\mathbf r} - r_f}{\sqrt{P}\sqrt{\mathbf{w}^\top \Sigma \mathbf{w}}}
//! $$
//!
//! Objective functions over a weight vector and a return matrix.
//!
//! Annualization is linear (`mean * periods`), not compounded. A portfolio with
//! zero volatility scores by plain IEEE division: `+inf` for a positive excess
//! return, `-inf` for a negative one and `NaN` when both are zero. With a
//! single return row the sample covariance is undefined and the ratios are `NaN`.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use serde::Serialize;

use super::types::Frequency;
use super::types::Metric;
use super::types::MetricParams;
use crate::data::ReturnMatrix;

pub(crate) fn column_means(values: ArrayView2<f64>) -> Array1<f64> {
  values
    .mean_axis(Axis(0))
    .unwrap_or_else(|| Array1::from_elem(values.ncols(), f64::NAN))
}

/// Sample covariance of the columns (`n - 1` degrees of freedom).
pub fn sample_covariance(values: ArrayView2<f64>) -> Array2<f64> {
  let n = values.nrows() as f64;
  let centered = &values - &column_means(values);
  centered.t().dot(&centered) / (n - 1.0)
}

/// Returns with every gain replaced by zero.
pub fn downside(values: ArrayView2<f64>) -> Array2<f64> {
  values.mapv(|r| r.min(0.0))
}

/// Compounded growth of every column over the whole window.
pub fn cumulative_growth(values: ArrayView2<f64>) -> Array1<f64> {
  values.map_axis(Axis(0), |col| col.fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0)
}

/// `sqrt(w' cov w)`; rounding below zero is clamped, NaN is kept.
pub fn portfolio_volatility(w: ArrayView1<f64>, cov: &Array2<f64>) -> f64 {
  let variance = w.dot(&cov.dot(&w));
  if variance < 0.0 {
    0.0
  } else {
    variance.sqrt()
  }
}

fn annualized_ratio(
  w: ArrayView1<f64>,
  mean: &Array1<f64>,
  cov: &Array2<f64>,
  params: &MetricParams,
) -> f64 {
  let excess = w.dot(mean) * params.periods_per_year - params.risk_free;
  excess / (portfolio_volatility(w, cov) * params.periods_per_year.sqrt())
}

/// A metric bound to one return matrix.
///
/// Statistics that do not depend on the weights are computed once here so the
/// optimizer inner loop only evaluates the quadratic or linear form.
#[derive(Clone, Debug)]
pub struct Objective {
  metric: Metric,
  params: MetricParams,
  /// Mean returns, or cumulative growth for [`Metric::TotalReturn`].
  location: Array1<f64>,
  form: Form,
}

/// How the weights enter an [`Objective`].
#[derive(Clone, Debug)]
enum Form {
  /// Annualized excess return over volatility under this covariance
  /// (downside covariance for Sortino).
  Ratio(Array2<f64>),
  /// `w . location` times a constant factor.
  Linear(f64),
}

impl Objective {
  pub fn new(metric: Metric, returns: &ReturnMatrix, params: &MetricParams) -> Self {
    let values = returns.values();
    let (location, form) = match metric {
      Metric::Sharpe => (column_means(values), Form::Ratio(sample_covariance(values))),
      Metric::Sortino => {
        let clipped = downside(values);
        (column_means(values), Form::Ratio(sample_covariance(clipped.view())))
      }
      Metric::TotalReturn => (cumulative_growth(values), Form::Linear(1.0)),
      Metric::PeriodicAverage(freq) => (column_means(values), Form::Linear(freq.periods())),
    };

    Self {
      metric,
      params: *params,
      location,
      form,
    }
  }

  pub fn metric(&self) -> Metric {
    self.metric
  }

  pub fn n_assets(&self) -> usize {
    self.location.len()
  }

  /// Objective value at `w`.
  ///
  /// # Panics
  ///
  /// Panics if `w.len()` differs from the number of assets.
  pub fn score(&self, w: &[f64]) -> f64 {
    let w = ArrayView1::from(w);
    match &self.form {
      Form::Ratio(cov) => annualized_ratio(w, &self.location, cov, &self.params),
      Form::Linear(factor) => w.dot(&self.location) * factor,
    }
  }
}

/// `w . (prod(1 + r) - 1)` per asset.
pub fn total_return(w: &[f64], returns: &ReturnMatrix) -> f64 {
  Objective::new(Metric::TotalReturn, returns, &MetricParams::default()).score(w)
}

/// `w . mean(r)` scaled linearly by the frequency.
pub fn periodic_avg_return(w: &[f64], returns: &ReturnMatrix, freq: Frequency) -> f64 {
  Objective::new(Metric::PeriodicAverage(freq), returns, &MetricParams::default()).score(w)
}

pub fn sharpe(w: &[f64], returns: &ReturnMatrix, params: &MetricParams) -> f64 {
  Objective::new(Metric::Sharpe, returns, params).score(w)
}

/// Sharpe with the covariance of the downside-clipped returns.
pub fn sortino(w: &[f64], returns: &ReturnMatrix, params: &MetricParams) -> f64 {
  Objective::new(Metric::Sortino, returns, params).score(w)
}

pub fn evaluate(metric: Metric, w: &[f64], returns: &ReturnMatrix, params: &MetricParams) -> f64 {
  Objective::new(metric, returns, params).score(w)
}

/// Every objective evaluated at one weight vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetricSummary {
  pub sharpe: f64,
  pub sortino: f64,
  pub total_return: f64,
  /// Daily average return, linearly annualized.
  pub annualized_return: f64,
}

impl MetricSummary {
  pub fn evaluate(w: &[f64], returns: &ReturnMatrix, params: &MetricParams) -> Self {
    Self {
      sharpe: sharpe(w, returns, params),
      sortino: sortino(w, returns, params),
      total_return: total_return(w, returns),
      annualized_return: periodic_avg_return(w, returns, Frequency::Daily),
    }
  }
}
