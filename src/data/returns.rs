//! # Return Engine
//!
//! $$
//! r_t = \frac{p_t}{p_{t-1}} - 1
//! $$
//!
//! Resamples aligned prices to the interval's bucket and converts them to
//! simple period-over-period returns.

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use tracing::debug;

use super::align::PriceTable;
use super::interval::Interval;
use crate::error::PortfolioError;
use crate::error::Result;

/// Periodic returns, one row per period and one column per asset.
///
/// Never empty and never holds a missing or non-finite value.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnMatrix {
  assets: Vec<String>,
  index: Vec<DateTime<Utc>>,
  values: Array2<f64>,
}

impl ReturnMatrix {
  pub fn new(assets: Vec<String>, index: Vec<DateTime<Utc>>, values: Array2<f64>) -> Result<Self> {
    if values.nrows() != index.len() || values.ncols() != assets.len() {
      return Err(PortfolioError::InvalidRequest(format!(
        "return matrix is {}x{} but has {} timestamps and {} assets",
        values.nrows(),
        values.ncols(),
        index.len(),
        assets.len()
      )));
    }
    if values.is_empty() {
      return Err(PortfolioError::InvalidRequest(
        "return matrix needs at least one row and one asset".to_string(),
      ));
    }
    if values.iter().any(|r| !r.is_finite()) {
      return Err(PortfolioError::InvalidRequest(
        "return matrix holds non-finite values".to_string(),
      ));
    }

    Ok(Self {
      assets,
      index,
      values,
    })
  }

  /// Matrix from row-major returns on a synthetic daily index starting at
  /// the Unix epoch.
  pub fn from_rows(assets: &[&str], rows: &[Vec<f64>]) -> Result<Self> {
    let n = assets.len();
    if rows.iter().any(|row| row.len() != n) {
      return Err(PortfolioError::InvalidRequest(format!(
        "every row must hold {n} returns"
      )));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    let values = Array2::from_shape_vec((rows.len(), n), flat)
      .map_err(|e| PortfolioError::InvalidRequest(e.to_string()))?;
    let index = (0..rows.len())
      .map(|t| DateTime::UNIX_EPOCH + TimeDelta::days(t as i64))
      .collect();

    Self::new(assets.iter().map(|a| a.to_string()).collect(), index, values)
  }

  /// Resample `table` to `interval` (last observed price per bucket), keep
  /// complete buckets only and take simple returns between them.
  pub fn from_prices(table: &PriceTable, interval: Interval) -> Result<Self> {
    let n = table.n_assets();
    let Some(anchor) = table.index().first().map(|ts| ts.date_naive()) else {
      return Err(PortfolioError::InsufficientHistory {
        interval,
        reason: "price table is empty".to_string(),
      });
    };

    let mut buckets: Vec<(DateTime<Utc>, Vec<Option<f64>>)> = Vec::new();
    for (t, ts) in table.index().iter().enumerate() {
      let Some(label) = interval.bucket_label(*ts, anchor) else {
        continue;
      };
      if buckets.last().map(|(l, _)| *l) != Some(label) {
        buckets.push((label, vec![None; n]));
      }
      if let Some((_, cells)) = buckets.last_mut() {
        for (i, cell) in cells.iter_mut().enumerate() {
          if let Some(price) = table.column(i)[t] {
            *cell = Some(price);
          }
        }
      }
    }

    let complete: Vec<(DateTime<Utc>, Vec<f64>)> = buckets
      .into_iter()
      .filter_map(|(label, cells)| cells.into_iter().collect::<Option<Vec<f64>>>().map(|p| (label, p)))
      .collect();

    let mut index = Vec::new();
    let mut flat = Vec::new();
    for pair in complete.windows(2) {
      let (_, prev) = &pair[0];
      let (label, curr) = &pair[1];
      let row: Vec<f64> = curr.iter().zip(prev).map(|(c, p)| c / p - 1.0).collect();
      if row.iter().all(|r| r.is_finite()) {
        index.push(*label);
        flat.extend(row);
      }
    }

    if index.is_empty() {
      return Err(PortfolioError::InsufficientHistory {
        interval,
        reason: format!(
          "{} complete price rows after resampling [{}], at least 2 are needed",
          complete.len(),
          table.assets().join(", ")
        ),
      });
    }
    debug!("{} return rows at {interval}", index.len());

    let values = Array2::from_shape_vec((index.len(), n), flat)
      .map_err(|e| PortfolioError::InvalidRequest(e.to_string()))?;
    Self::new(table.assets().to_vec(), index, values)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn index(&self) -> &[DateTime<Utc>] {
    &self.index
  }

  pub fn values(&self) -> ArrayView2<'_, f64> {
    self.values.view()
  }

  pub fn column(&self, i: usize) -> ArrayView1<'_, f64> {
    self.values.column(i)
  }

  pub fn n_assets(&self) -> usize {
    self.values.ncols()
  }

  pub fn n_periods(&self) -> usize {
    self.values.nrows()
  }

  /// Same returns with columns reordered by `order`.
  pub fn select_columns(&self, order: &[usize]) -> Result<Self> {
    if order.iter().any(|&i| i >= self.n_assets()) {
      return Err(PortfolioError::InvalidRequest(
        "column index out of range".to_string(),
      ));
    }
    Self::new(
      order.iter().map(|&i| self.assets[i].clone()).collect(),
      self.index.clone(),
      self.values.select(Axis(1), order),
    )
  }
}
