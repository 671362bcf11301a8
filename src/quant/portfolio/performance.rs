//! # Portfolio Performance
//!
//! $$
//! C_t = \Big(\prod_{s\le t}(1 + \mathbf{w}^\top \mathbf{r}_s) - 1\Big)\times 100
//! $$
//!
//! Weighted per-period returns and their compounded percentage path.

use chrono::DateTime;
use chrono::Utc;
use ndarray::Array1;
use ndarray::ArrayView1;
use serde::Serialize;

use crate::data::ReturnMatrix;

/// One point of the cumulative performance series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PerformancePoint {
  pub timestamp: DateTime<Utc>,
  /// Compounded return since the first period, in percent.
  pub cumulative_pct: f64,
}

/// `R w`, one value per return row.
pub fn portfolio_returns(w: &[f64], returns: &ReturnMatrix) -> Array1<f64> {
  returns.values().dot(&ArrayView1::from(w))
}

pub fn cumulative_performance(w: &[f64], returns: &ReturnMatrix) -> Vec<PerformancePoint> {
  let mut growth = 1.0;
  portfolio_returns(w, returns)
    .iter()
    .zip(returns.index())
    .map(|(r, ts)| {
      growth *= 1.0 + r;
      PerformancePoint {
        timestamp: *ts,
        cumulative_pct: (growth - 1.0) * 100.0,
      }
    })
    .collect()
}
