//! # Price History Provider
//!
//! Abstraction over the external market-data source. Implementations only
//! perform the network call; retry and fallback live in [`super::fetch`].

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use super::interval::Interval;
use super::series::RawBar;

/// Errors raised by a [`PriceHistorySource`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
  /// The provider answered but refused the request. The message is kept
  /// verbatim because it may encode the interval's history limit.
  #[error("provider rejected request: {0}")]
  Rejected(String),

  /// Transport-level failure (connection, timeout, malformed payload).
  #[error("request failed: {0}")]
  Request(String),
}

impl ProviderError {
  pub fn message(&self) -> &str {
    match self {
      ProviderError::Rejected(msg) | ProviderError::Request(msg) => msg,
    }
  }
}

/// A market-data source serving close-price bars.
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
  /// Bars for `ticker` in `[start, end)` sampled at `interval`.
  async fn fetch_range(
    &self,
    ticker: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
  ) -> Result<Vec<RawBar>, ProviderError>;

  /// Bars for the trailing `days` days up to now, sampled at `interval`.
  async fn fetch_trailing(
    &self,
    ticker: &str,
    days: u32,
    interval: Interval,
  ) -> Result<Vec<RawBar>, ProviderError>;
}

#[async_trait]
impl<S: PriceHistorySource + ?Sized> PriceHistorySource for std::sync::Arc<S> {
  async fn fetch_range(
    &self,
    ticker: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
  ) -> Result<Vec<RawBar>, ProviderError> {
    (**self).fetch_range(ticker, start, end, interval).await
  }

  async fn fetch_trailing(
    &self,
    ticker: &str,
    days: u32,
    interval: Interval,
  ) -> Result<Vec<RawBar>, ProviderError> {
    (**self).fetch_trailing(ticker, days, interval).await
  }
}
