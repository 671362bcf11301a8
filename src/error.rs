//! # Errors
//!
//! Failure taxonomy of the allocation pipeline. Per-asset fetch failures are
//! recovered by the engine; every other variant aborts the request.

use std::time::Duration;

use thiserror::Error;

use crate::data::Interval;

/// Errors surfaced by the allocation pipeline.
#[derive(Debug, Error)]
pub enum PortfolioError {
  /// Interval tag outside the supported set. Raised before any network access.
  #[error("unsupported interval '{0}'")]
  UnsupportedInterval(String),

  /// Objective tag outside the supported set. Raised before any network access.
  #[error("unsupported metric '{0}'")]
  UnsupportedMetric(String),

  /// Malformed request (tickers, dates, bounds).
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// Fetching one asset failed after the retry and the period fallback.
  #[error("{ticker}: no price data available at {interval} ({reason})")]
  DataUnavailable {
    ticker: String,
    interval: Interval,
    reason: String,
  },

  /// None of the requested assets produced a price series.
  #[error("no usable price data fetched for [{}]", .tickers.join(", "))]
  NoUsableData { tickers: Vec<String> },

  /// The aligned prices left no complete return row.
  #[error("insufficient history at {interval}: {reason}")]
  InsufficientHistory { interval: Interval, reason: String },

  /// The solver did not report convergence.
  #[error("optimization of '{metric}' failed: {reason}")]
  OptimizationFailure { metric: String, reason: String },

  /// Caller-supplied weights violate the budget or bound constraints.
  #[error("invalid weights: {0}")]
  InvalidWeights(String),

  /// The fetch stage exceeded its wall-clock budget.
  #[error("price fetch did not finish within {0:?}")]
  FetchTimeout(Duration),

  /// The persistence collaborator has no portfolio under this id.
  #[error("portfolio '{0}' not found")]
  PortfolioNotFound(String),

  /// The persistence collaborator failed.
  #[error("portfolio store error: {0}")]
  Store(String),

  /// Configuration could not be loaded.
  #[error("invalid configuration: {0}")]
  Config(String),
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
