//! # Pipeline Configuration
//!
//! Static data injected into the engine at startup: the provider's
//! history-limit table, the default watchlist and the numerical settings.
//! Nothing here is mutated after construction.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::data::Interval;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::quant::portfolio::MetricParams;

/// Watchlist used when a caller does not name any tickers.
pub const DEFAULT_WATCHLIST: [&str; 10] = [
  "AAPL", "MSFT", "GOOGL", "AMZN", "META", "TSLA", "NVDA", "JPM", "JNJ", "XOM",
];

/// Maximum history (in days) the provider serves for one interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackLimit {
  pub interval: Interval,
  pub days: u32,
}

/// Versioned per-interval lookback table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookbackTable {
  pub version: u32,
  pub limits: Vec<LookbackLimit>,
  /// Trailing window used by the period fallback for intervals without a limit.
  pub default_days: u32,
}

impl LookbackTable {
  /// Yahoo Finance limits as of the first table revision.
  pub fn v1() -> Self {
    let limits = [
      (Interval::OneMinute, 7),
      (Interval::TwoMinutes, 60),
      (Interval::FiveMinutes, 60),
      (Interval::FifteenMinutes, 60),
      (Interval::ThirtyMinutes, 60),
      (Interval::SixtyMinutes, 730),
      (Interval::NinetyMinutes, 60),
      (Interval::OneHour, 730),
      (Interval::FourHours, 730),
    ]
    .into_iter()
    .map(|(interval, days)| LookbackLimit { interval, days })
    .collect();

    Self {
      version: 1,
      limits,
      default_days: 30,
    }
  }

  /// Hard history limit of `interval`, `None` when effectively unbounded.
  pub fn max_lookback_days(&self, interval: Interval) -> Option<u32> {
    self
      .limits
      .iter()
      .find(|l| l.interval == interval)
      .map(|l| l.days)
  }

  /// Window requested by the period fallback.
  pub fn trailing_window_days(&self, interval: Interval) -> u32 {
    self
      .max_lookback_days(interval)
      .unwrap_or(self.default_days)
  }
}

impl Default for LookbackTable {
  fn default() -> Self {
    Self::v1()
  }
}

/// Settings of the weight optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
  /// Iteration cap; hitting it is reported as a failure.
  pub max_iters: u64,
  /// Converged once the projected gradient step is below this (sup norm).
  pub gradient_tolerance: f64,
  /// Converged once the relative objective decrease is below this.
  pub cost_tolerance: f64,
  /// Central finite-difference step for gradients.
  pub fd_step: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iters: 500,
      gradient_tolerance: 1e-6,
      cost_tolerance: 1e-12,
      fd_step: 1e-6,
    }
  }
}

/// Settings of the price fetch stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  /// Maximum number of assets fetched concurrently.
  pub concurrency: usize,
  /// Wall-clock budget of the whole fetch stage.
  pub timeout_secs: u64,
}

impl FetchConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      concurrency: 4,
      timeout_secs: 120,
    }
  }
}

/// Complete pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub lookback: LookbackTable,
  pub watchlist: Vec<String>,
  pub metric: MetricParams,
  pub solver: SolverConfig,
  pub fetch: FetchConfig,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      lookback: LookbackTable::v1(),
      watchlist: DEFAULT_WATCHLIST.iter().map(|t| t.to_string()).collect(),
      metric: MetricParams::default(),
      solver: SolverConfig::default(),
      fetch: FetchConfig::default(),
    }
  }
}

impl PipelineConfig {
  /// Parse a TOML document. Missing sections keep their defaults.
  pub fn from_toml_str(s: &str) -> Result<Self> {
    let config: Self = toml::from_str(s).map_err(|e| PortfolioError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
      .map_err(|e| PortfolioError::Config(format!("{}: {e}", path.display())))?;
    Self::from_toml_str(&raw)
  }

  fn validate(&self) -> Result<()> {
    if self.fetch.concurrency == 0 {
      return Err(PortfolioError::Config(
        "fetch.concurrency must be at least 1".to_string(),
      ));
    }
    if self.lookback.limits.iter().any(|l| l.days == 0) || self.lookback.default_days == 0 {
      return Err(PortfolioError::Config(
        "lookback limits must be at least one day".to_string(),
      ));
    }
    if self.solver.max_iters == 0 || !(self.solver.fd_step > 0.0) {
      return Err(PortfolioError::Config(
        "solver.max_iters and solver.fd_step must be positive".to_string(),
      ));
    }
    if !self.metric.periods_per_year.is_finite() || self.metric.periods_per_year <= 0.0 {
      return Err(PortfolioError::Config(
        "metric.periods_per_year must be positive".to_string(),
      ));
    }
    Ok(())
  }
}
