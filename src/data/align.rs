//! # Price Alignment
//!
//! Outer-joins per-asset series onto one chronological index.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Utc;

use super::series::PriceSeries;
use crate::error::PortfolioError;
use crate::error::Result;

/// Prices of several assets on a shared timestamp index.
///
/// Columns follow the caller's asset order, rows are chronological and no row
/// is missing in every column. Individual cells may be missing.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceTable {
  assets: Vec<String>,
  index: Vec<DateTime<Utc>>,
  columns: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
  /// Align the series of `requested` assets that are present in `fetched`.
  /// Assets without a series are left out; if none remain this fails with
  /// `NoUsableData`.
  pub fn align(requested: &[String], fetched: &BTreeMap<String, PriceSeries>) -> Result<Self> {
    let present: Vec<&PriceSeries> = requested
      .iter()
      .filter_map(|ticker| fetched.get(ticker))
      .filter(|series| !series.is_empty())
      .collect();

    if present.is_empty() {
      return Err(PortfolioError::NoUsableData {
        tickers: requested.to_vec(),
      });
    }

    let stamps: BTreeSet<DateTime<Utc>> = present
      .iter()
      .flat_map(|series| series.points().iter().map(|(ts, _)| *ts))
      .collect();

    let mut index = Vec::with_capacity(stamps.len());
    let mut columns = vec![Vec::with_capacity(stamps.len()); present.len()];
    for ts in stamps {
      let row: Vec<Option<f64>> = present.iter().map(|s| s.price_at(ts)).collect();
      if row.iter().all(Option::is_none) {
        continue;
      }
      index.push(ts);
      for (column, cell) in columns.iter_mut().zip(row) {
        column.push(cell);
      }
    }

    if index.is_empty() {
      return Err(PortfolioError::NoUsableData {
        tickers: requested.to_vec(),
      });
    }

    Ok(Self {
      assets: present.iter().map(|s| s.ticker().to_string()).collect(),
      index,
      columns,
    })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn index(&self) -> &[DateTime<Utc>] {
    &self.index
  }

  pub fn column(&self, i: usize) -> &[Option<f64>] {
    &self.columns[i]
  }

  pub fn n_rows(&self) -> usize {
    self.index.len()
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Row `t` across all assets.
  pub fn row(&self, t: usize) -> Vec<Option<f64>> {
    self.columns.iter().map(|c| c[t]).collect()
  }
}
