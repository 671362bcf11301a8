//! # Yahoo Finance
//!
//! [`PriceHistorySource`] backed by the Yahoo Finance chart API.
//!
//! The chart endpoint is queried directly so that the body of a refused
//! request (`chart.error.description`) reaches the fetch state machine. That
//! description is where Yahoo states its per-interval history limit.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use yahoo_finance_api::YResponse;
use yahoo_finance_api::YahooError;

use super::interval::Interval;
use super::provider::PriceHistorySource;
use super::provider::ProviderError;
use super::series::RawBar;
use crate::config::LookbackTable;

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str =
  "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

pub struct YahooSource {
  client: Client,
  lookback: LookbackTable,
}

impl YahooSource {
  pub fn new() -> Result<Self, ProviderError> {
    let client = Client::builder()
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| ProviderError::Request(e.to_string()))?;
    Ok(Self {
      client,
      lookback: LookbackTable::default(),
    })
  }

  /// Limits used to describe a refused request whose body carries no reason.
  pub fn with_lookback(mut self, lookback: LookbackTable) -> Self {
    self.lookback = lookback;
    self
  }

  async fn chart(
    &self,
    ticker: &str,
    interval: Interval,
    query: &[(&str, String)],
  ) -> Result<Vec<RawBar>, ProviderError> {
    let response = self
      .client
      .get(format!("{CHART_URL}/{ticker}"))
      .query(query)
      .send()
      .await
      .map_err(|e| ProviderError::Request(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response
      .text()
      .await
      .map_err(|e| ProviderError::Request(e.to_string()))?;
    if !(200..300).contains(&status) {
      return Err(rejection(status, &body, interval, &self.lookback));
    }

    let json: Value = serde_json::from_str(&body)
      .map_err(|e| ProviderError::Request(format!("malformed chart payload: {e}")))?;
    let parsed = YResponse::from_json(json).map_err(translate)?;
    to_bars(&parsed)
  }
}

/// Provider error for a non-success chart response.
///
/// Yahoo explains a refusal in `chart.error.description`, e.g. "Only 7 days
/// worth of 1m granularity data are allowed to be fetched per request". A
/// bare 422 on an interval with a known limit is described from `lookback`.
/// Server-side failures are transport errors.
pub(crate) fn rejection(
  status: u16,
  body: &str,
  interval: Interval,
  lookback: &LookbackTable,
) -> ProviderError {
  let description = serde_json::from_str::<Value>(body).ok().and_then(|json| {
    json["chart"]["error"]["description"]
      .as_str()
      .map(str::to_string)
  });

  match description {
    Some(description) => ProviderError::Rejected(format!("HTTP {status}: {description}")),
    None if status >= 500 => ProviderError::Request(format!("HTTP {status}")),
    None => match (status, lookback.max_lookback_days(interval)) {
      (422, Some(days)) => ProviderError::Rejected(format!(
        "HTTP 422: Only {days} days worth of {interval} data are allowed per request"
      )),
      _ => ProviderError::Rejected(format!("HTTP {status}")),
    },
  }
}

pub(crate) fn translate(err: YahooError) -> ProviderError {
  match err {
    YahooError::FetchFailed(status) => ProviderError::Rejected(status),
    YahooError::EmptyDataSet => ProviderError::Rejected(err.to_string()),
    other => ProviderError::Request(other.to_string()),
  }
}

fn usable(price: f64) -> Option<f64> {
  (price.is_finite() && price > 0.0).then_some(price)
}

/// Yahoo reports a missing adjusted close as zero.
pub(crate) fn to_bars(response: &YResponse) -> Result<Vec<RawBar>, ProviderError> {
  if response.chart.result.is_empty() {
    return Err(ProviderError::Rejected("chart has no result".to_string()));
  }
  let quotes = response.quotes().map_err(translate)?;

  Ok(
    quotes
      .iter()
      .filter_map(|q| {
        let timestamp = DateTime::from_timestamp(i64::try_from(q.timestamp).ok()?, 0)?;
        Some(RawBar::new(timestamp, usable(q.close), usable(q.adjclose)))
      })
      .collect(),
  )
}

#[async_trait]
impl PriceHistorySource for YahooSource {
  async fn fetch_range(
    &self,
    ticker: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
  ) -> Result<Vec<RawBar>, ProviderError> {
    let query = [
      ("symbol", ticker.to_string()),
      ("period1", start.timestamp().to_string()),
      ("period2", end.timestamp().to_string()),
      ("interval", interval.as_str().to_string()),
    ];
    self.chart(ticker, interval, &query).await
  }

  async fn fetch_trailing(
    &self,
    ticker: &str,
    days: u32,
    interval: Interval,
  ) -> Result<Vec<RawBar>, ProviderError> {
    let query = [
      ("symbol", ticker.to_string()),
      ("range", format!("{days}d")),
      ("interval", interval.as_str().to_string()),
    ];
    self.chart(ticker, interval, &query).await
  }
}
