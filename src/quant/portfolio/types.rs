//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} f(\mathbf{w}, R)
//! \quad\text{s.t.}\quad \textstyle\sum_i w_i = 1,\ \ell \le w_i \le u
//! $$
//!
//! Objective selectors, weight bounds and result containers.

use std::fmt;
use std::str::FromStr;

use impl_new_derive::ImplNew;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// Sampling frequency used by the linear annualization of average returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Frequency {
  Daily,
  Weekly,
}

impl Frequency {
  /// Periods per year.
  pub fn periods(&self) -> f64 {
    match self {
      Frequency::Daily => 252.0,
      Frequency::Weekly => 52.0,
    }
  }
}

/// Objective maximized by the optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
  /// Annualized excess return over total volatility.
  Sharpe,
  /// Annualized excess return over downside volatility.
  Sortino,
  /// Compounded return over the whole window.
  TotalReturn,
  /// Mean period return scaled by the frequency.
  PeriodicAverage(Frequency),
}

impl Metric {
  pub const ALL: [Metric; 5] = [
    Metric::Sharpe,
    Metric::Sortino,
    Metric::TotalReturn,
    Metric::PeriodicAverage(Frequency::Weekly),
    Metric::PeriodicAverage(Frequency::Daily),
  ];

  /// Canonical tag.
  pub fn as_str(&self) -> &'static str {
    match self {
      Metric::Sharpe => "sharpe",
      Metric::Sortino => "sortino",
      Metric::TotalReturn => "total return",
      Metric::PeriodicAverage(Frequency::Weekly) => "weekly return",
      Metric::PeriodicAverage(Frequency::Daily) => "daily return",
    }
  }
}

impl fmt::Display for Metric {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Metric {
  type Err = PortfolioError;

  /// Case-insensitive; `_` and `-` are accepted in place of the space.
  fn from_str(s: &str) -> Result<Self> {
    let tag = s
      .trim()
      .to_lowercase()
      .replace(['_', '-'], " ")
      .split_whitespace()
      .collect::<Vec<_>>()
      .join(" ");

    match tag.as_str() {
      "sharpe" => Ok(Metric::Sharpe),
      "sortino" => Ok(Metric::Sortino),
      "total return" => Ok(Metric::TotalReturn),
      "weekly return" => Ok(Metric::PeriodicAverage(Frequency::Weekly)),
      "daily return" => Ok(Metric::PeriodicAverage(Frequency::Daily)),
      _ => Err(PortfolioError::UnsupportedMetric(s.to_string())),
    }
  }
}

impl TryFrom<String> for Metric {
  type Error = PortfolioError;

  fn try_from(s: String) -> Result<Self> {
    s.parse()
  }
}

impl From<Metric> for String {
  fn from(metric: Metric) -> Self {
    metric.as_str().to_string()
  }
}

/// Per-asset box constraint configuration.
///
/// Long-only portfolios use `[0, max_long]`, otherwise `[-max_short, max_long]`.
#[derive(ImplNew, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
  pub allow_short: bool,
  pub max_long: f64,
  pub max_short: f64,
}

impl Default for WeightBounds {
  fn default() -> Self {
    Self {
      allow_short: false,
      max_long: 1.0,
      max_short: 1.0,
    }
  }
}

impl WeightBounds {
  pub fn lower(&self) -> f64 {
    if self.allow_short {
      -self.max_short
    } else {
      0.0
    }
  }

  pub fn upper(&self) -> f64 {
    self.max_long
  }

  pub fn validate(&self) -> Result<()> {
    if !self.max_long.is_finite() || self.max_long <= 0.0 {
      return Err(PortfolioError::InvalidRequest(format!(
        "max_long must be positive, got {}",
        self.max_long
      )));
    }
    if !self.max_short.is_finite() || self.max_short < 0.0 {
      return Err(PortfolioError::InvalidRequest(format!(
        "max_short must be non-negative, got {}",
        self.max_short
      )));
    }
    Ok(())
  }

  /// Whether `n` assets can hold a fully invested portfolio.
  pub fn is_feasible(&self, n: usize) -> bool {
    let n = n as f64;
    n * self.lower() <= 1.0 && n * self.upper() >= 1.0
  }

  /// Whether `w` lies in the box, up to `tol`.
  pub fn contains(&self, w: f64, tol: f64) -> bool {
    w >= self.lower() - tol && w <= self.upper() + tol
  }
}

/// Constants of the annualized ratio metrics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricParams {
  /// Annual risk-free rate subtracted from the annualized mean.
  pub risk_free: f64,
  /// Periods per year used by Sharpe and Sortino.
  pub periods_per_year: f64,
}

impl Default for MetricParams {
  fn default() -> Self {
    Self {
      risk_free: 0.0,
      periods_per_year: 252.0,
    }
  }
}

/// Output of a weight optimization run.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
  pub metric: Metric,
  /// Weights in return-matrix column order.
  pub weights: Vec<f64>,
  /// Objective value at `weights`.
  pub score: f64,
  /// Solver iterations; zero when the solution is trivial.
  pub iterations: u64,
}
