//! # Price Fetching
//!
//! Per-asset download with one clamped retry and a trailing-period fallback,
//! plus the batch fetch that drives it over a bounded worker pool.
//!
//! ```text
//! DirectAttempt --series--> done
//! DirectAttempt --day limit in message--> ClampedRetry
//! DirectAttempt --other error / empty--> PeriodFallback
//! ClampedRetry --series--> done
//! ClampedRetry --anything else--> PeriodFallback
//! PeriodFallback --series--> done
//! PeriodFallback --anything else--> Failed
//! ```

use std::sync::OnceLock;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use futures::stream;
use futures::StreamExt;
use regex::Regex;
use tracing::info;
use tracing::warn;

use super::interval::Interval;
use super::provider::PriceHistorySource;
use super::provider::ProviderError;
use super::series::PriceSeries;
use super::series::RawBar;
use crate::config::LookbackTable;
use crate::error::PortfolioError;
use crate::error::Result;

/// States of the per-asset download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
  DirectAttempt,
  ClampedRetry { start: DateTime<Utc> },
  PeriodFallback { days: u32 },
  Failed,
}

/// What a single provider call produced.
enum Attempt {
  Series(PriceSeries),
  DayLimit(u32, String),
  Unusable(String),
}

fn classify(ticker: &str, result: std::result::Result<Vec<RawBar>, ProviderError>) -> Attempt {
  match result {
    Ok(bars) => match PriceSeries::from_bars(ticker, &bars) {
      Some(series) => Attempt::Series(series),
      None => Attempt::Unusable("empty result".to_string()),
    },
    Err(err) => match parse_day_limit(err.message()) {
      Some(days) => Attempt::DayLimit(days, err.to_string()),
      None => Attempt::Unusable(err.to_string()),
    },
  }
}

fn day_limit_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(r"(?i)(?:only|last|within the last)\s+(\d+)\s+days").expect("valid day-limit pattern")
  })
}

/// Extract the history limit (in days) a provider error message encodes,
/// e.g. `"Only 7 days worth of 1m granularity data are allowed"`.
pub fn parse_day_limit(message: &str) -> Option<u32> {
  day_limit_pattern()
    .captures(message)
    .and_then(|caps| caps.get(1))
    .and_then(|m| m.as_str().parse::<u32>().ok())
    .filter(|days| *days > 0)
}

/// Earliest start that keeps `[start, end]` within a `days`-day window.
pub fn window_start(end: DateTime<Utc>, days: u32) -> DateTime<Utc> {
  end - TimeDelta::days(i64::from(days.saturating_sub(1)))
}

/// Clamped start when the requested span exceeds the interval's lookback,
/// `None` when the span already fits.
pub fn preflight_start(
  start: DateTime<Utc>,
  end: DateTime<Utc>,
  interval: Interval,
  lookback: &LookbackTable,
) -> Option<DateTime<Utc>> {
  let max_days = lookback.max_lookback_days(interval)?;
  ((end - start).num_days() + 1 > i64::from(max_days)).then(|| window_start(end, max_days))
}

/// Result of a batch fetch, in caller order.
#[derive(Debug)]
pub struct FetchReport {
  /// Start actually requested, after the pre-flight clamp.
  pub start: DateTime<Utc>,
  pub results: Vec<(String, Result<PriceSeries>)>,
  /// Non-fatal diagnostics for the caller.
  pub warnings: Vec<String>,
}

impl FetchReport {
  /// Successfully fetched series, in caller order.
  pub fn series(&self) -> impl Iterator<Item = &PriceSeries> {
    self.results.iter().filter_map(|(_, r)| r.as_ref().ok())
  }

  /// Tickers that produced no data.
  pub fn failed(&self) -> Vec<&str> {
    self
      .results
      .iter()
      .filter(|(_, r)| r.is_err())
      .map(|(t, _)| t.as_str())
      .collect()
  }
}

/// Drives a [`PriceHistorySource`] through the retry/fallback state machine.
pub struct PriceFetcher<'a, S: ?Sized> {
  source: &'a S,
  lookback: &'a LookbackTable,
}

impl<'a, S: PriceHistorySource + ?Sized> PriceFetcher<'a, S> {
  pub fn new(source: &'a S, lookback: &'a LookbackTable) -> Self {
    Self { source, lookback }
  }

  /// Download one asset. Fails with `DataUnavailable` once the retry and the
  /// period fallback are exhausted.
  pub async fn fetch_series(
    &self,
    ticker: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
  ) -> Result<PriceSeries> {
    let fallback = FetchState::PeriodFallback {
      days: self.lookback.trailing_window_days(interval),
    };
    let mut state = FetchState::DirectAttempt;
    let mut reason = String::new();

    loop {
      state = match state {
        FetchState::DirectAttempt => {
          info!("{ticker}: downloading {interval} {start} -> {end}");
          let result = self.source.fetch_range(ticker, start, end, interval).await;
          match classify(ticker, result) {
            Attempt::Series(series) => return Ok(series),
            Attempt::DayLimit(days, msg) => {
              let start = window_start(end, days);
              info!("{ticker}: provider limit {days} d, retrying with start={start}");
              reason = msg;
              FetchState::ClampedRetry { start }
            }
            Attempt::Unusable(msg) => {
              warn!("{ticker}: download failed ({msg})");
              reason = msg;
              fallback
            }
          }
        }
        FetchState::ClampedRetry { start } => {
          let result = self.source.fetch_range(ticker, start, end, interval).await;
          match classify(ticker, result) {
            Attempt::Series(series) => return Ok(series),
            Attempt::DayLimit(_, msg) | Attempt::Unusable(msg) => {
              warn!("{ticker}: clamped retry failed ({msg})");
              reason = msg;
              fallback
            }
          }
        }
        FetchState::PeriodFallback { days } => {
          info!("{ticker}: fallback using trailing {days} d");
          let result = self.source.fetch_trailing(ticker, days, interval).await;
          match classify(ticker, result) {
            Attempt::Series(series) => return Ok(series),
            Attempt::DayLimit(_, msg) | Attempt::Unusable(msg) => {
              warn!("{ticker}: fallback failed ({msg})");
              reason = msg;
              FetchState::Failed
            }
          }
        }
        FetchState::Failed => {
          return Err(PortfolioError::DataUnavailable {
            ticker: ticker.to_string(),
            interval,
            reason,
          });
        }
      };
    }
  }

  /// Download every ticker with at most `concurrency` requests in flight.
  /// Results come back in caller order whatever the completion order; a
  /// failed asset is reported, never fatal here.
  pub async fn fetch_all(
    &self,
    tickers: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
    concurrency: usize,
  ) -> FetchReport {
    let mut warnings = Vec::new();
    let start = match preflight_start(start, end, interval, self.lookback) {
      Some(clamped) => {
        let msg = format!(
          "interval '{interval}' is limited to {} days, start adjusted to {}",
          self.lookback.max_lookback_days(interval).unwrap_or_default(),
          clamped.date_naive()
        );
        warn!("{msg}");
        warnings.push(msg);
        clamped
      }
      None => start,
    };

    let results: Vec<(String, Result<PriceSeries>)> = stream::iter(tickers)
      .map(|ticker| async move {
        let result = self.fetch_series(ticker, start, end, interval).await;
        (ticker.clone(), result)
      })
      .buffered(concurrency.max(1))
      .collect()
      .await;

    for (ticker, result) in &results {
      if let Err(err) = result {
        warn!("{ticker}: no data retrieved, skipped");
        warnings.push(err.to_string());
      }
    }

    FetchReport {
      start,
      results,
      warnings,
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::collections::HashMap;
  use std::collections::VecDeque;
  use std::sync::Mutex;
  use std::time::Duration;

  use async_trait::async_trait;
  use chrono::TimeZone;
  use tracing_test::traced_test;

  use super::*;

  #[derive(Clone, Debug, PartialEq)]
  pub(crate) enum Call {
    Range {
      ticker: String,
      start: DateTime<Utc>,
      end: DateTime<Utc>,
    },
    Trailing {
      ticker: String,
      days: u32,
    },
  }

  type Reply = std::result::Result<Vec<RawBar>, ProviderError>;

  /// Replays queued replies per ticker and records every call.
  #[derive(Default)]
  pub(crate) struct ScriptedSource {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    delays: HashMap<String, Duration>,
    pub(crate) calls: Mutex<Vec<Call>>,
  }

  impl ScriptedSource {
    pub(crate) fn reply(self, ticker: &str, reply: Reply) -> Self {
      self
        .replies
        .lock()
        .unwrap()
        .entry(ticker.to_string())
        .or_default()
        .push_back(reply);
      self
    }

    pub(crate) fn delay(mut self, ticker: &str, delay: Duration) -> Self {
      self.delays.insert(ticker.to_string(), delay);
      self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
      self.calls.lock().unwrap().clone()
    }

    async fn next(&self, ticker: &str) -> Reply {
      if let Some(delay) = self.delays.get(ticker) {
        tokio::time::sleep(*delay).await;
      }
      self
        .replies
        .lock()
        .unwrap()
        .get_mut(ticker)
        .and_then(|q| q.pop_front())
        .unwrap_or_else(|| Err(ProviderError::Request("no scripted reply".to_string())))
    }
  }

  #[async_trait]
  impl PriceHistorySource for ScriptedSource {
    async fn fetch_range(
      &self,
      ticker: &str,
      start: DateTime<Utc>,
      end: DateTime<Utc>,
      _interval: Interval,
    ) -> Reply {
      self.calls.lock().unwrap().push(Call::Range {
        ticker: ticker.to_string(),
        start,
        end,
      });
      self.next(ticker).await
    }

    async fn fetch_trailing(&self, ticker: &str, days: u32, _interval: Interval) -> Reply {
      self.calls.lock().unwrap().push(Call::Trailing {
        ticker: ticker.to_string(),
        days,
      });
      self.next(ticker).await
    }
  }

  pub(crate) fn bars(prices: &[f64]) -> Vec<RawBar> {
    prices
      .iter()
      .enumerate()
      .map(|(i, p)| {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap() + TimeDelta::days(i as i64);
        RawBar::new(ts, Some(*p), None)
      })
      .collect()
  }

  fn end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap()
  }

  fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
  }

  fn limit_error() -> ProviderError {
    ProviderError::Rejected(
      "1m data not available for startTime=1714521600. Only 7 days worth of 1m granularity data are allowed to be fetched per request.".to_string(),
    )
  }

  #[test]
  fn parses_day_limits_from_provider_messages() {
    assert_eq!(parse_day_limit(limit_error().message()), Some(7));
    assert_eq!(
      parse_day_limit("The requested range must be within the last 730 days."),
      Some(730)
    );
    assert_eq!(parse_day_limit("data for LAST 60 days only"), Some(60));
    assert_eq!(parse_day_limit("Only 0 days"), None);
    assert_eq!(parse_day_limit("No data found, symbol may be delisted"), None);
  }

  #[test]
  fn direct_attempt_succeeds_with_single_call() {
    let source = ScriptedSource::default().reply("AAA", Ok(bars(&[1.0, 2.0])));
    let lookback = LookbackTable::v1();
    let fetcher = PriceFetcher::new(&source, &lookback);

    let series =
      tokio_test::block_on(fetcher.fetch_series("AAA", start(), end(), Interval::OneDay)).unwrap();

    assert_eq!(series.len(), 2);
    assert_eq!(source.calls().len(), 1);
  }

  #[test]
  fn day_limit_clamps_start_and_retries_once() {
    let source = ScriptedSource::default()
      .reply("AAA", Err(limit_error()))
      .reply("AAA", Ok(bars(&[1.0, 1.1])));
    let lookback = LookbackTable::v1();
    let fetcher = PriceFetcher::new(&source, &lookback);

    tokio_test::block_on(fetcher.fetch_series("AAA", start(), end(), Interval::OneMinute)).unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
      calls[1],
      Call::Range {
        ticker: "AAA".to_string(),
        start: end() - TimeDelta::days(6),
        end: end(),
      }
    );
  }

  #[test]
  fn failed_retry_falls_back_to_trailing_window() {
    let source = ScriptedSource::default()
      .reply("AAA", Err(limit_error()))
      .reply("AAA", Err(limit_error()))
      .reply("AAA", Ok(bars(&[1.0, 1.1])));
    let lookback = LookbackTable::v1();
    let fetcher = PriceFetcher::new(&source, &lookback);

    tokio_test::block_on(fetcher.fetch_series("AAA", start(), end(), Interval::OneMinute)).unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 3, "exactly one clamped retry before the fallback");
    assert!(matches!(calls[0], Call::Range { .. }));
    assert!(matches!(calls[1], Call::Range { .. }));
    assert_eq!(
      calls[2],
      Call::Trailing {
        ticker: "AAA".to_string(),
        days: 7,
      }
    );
  }

  #[test]
  fn unparsed_error_and_empty_result_go_straight_to_fallback() {
    let source = ScriptedSource::default()
      .reply("AAA", Err(ProviderError::Request("connection reset".to_string())))
      .reply("AAA", Ok(bars(&[1.0, 1.1])))
      .reply("BBB", Ok(Vec::new()))
      .reply("BBB", Ok(bars(&[2.0, 2.1])));
    let lookback = LookbackTable::v1();
    let fetcher = PriceFetcher::new(&source, &lookback);

    tokio_test::block_on(fetcher.fetch_series("AAA", start(), end(), Interval::OneDay)).unwrap();
    tokio_test::block_on(fetcher.fetch_series("BBB", start(), end(), Interval::OneDay)).unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(
      calls[1],
      Call::Trailing {
        ticker: "AAA".to_string(),
        days: 30,
      }
    );
    assert_eq!(
      calls[3],
      Call::Trailing {
        ticker: "BBB".to_string(),
        days: 30,
      }
    );
  }

  #[test]
  fn exhausted_attempts_yield_data_unavailable() {
    let source = ScriptedSource::default()
      .reply("AAA", Err(ProviderError::Request("timeout".to_string())))
      .reply("AAA", Ok(Vec::new()));
    let lookback = LookbackTable::v1();
    let fetcher = PriceFetcher::new(&source, &lookback);

    let err = tokio_test::block_on(fetcher.fetch_series("AAA", start(), end(), Interval::OneDay))
      .unwrap_err();

    match err {
      PortfolioError::DataUnavailable {
        ticker,
        interval,
        reason,
      } => {
        assert_eq!(ticker, "AAA");
        assert_eq!(interval, Interval::OneDay);
        assert_eq!(reason, "empty result");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn preflight_clamps_only_when_span_exceeds_limit() {
    let lookback = LookbackTable::v1();
    assert_eq!(
      preflight_start(start(), end(), Interval::OneMinute, &lookback),
      Some(end() - TimeDelta::days(6))
    );
    assert_eq!(
      preflight_start(end() - TimeDelta::days(6), end(), Interval::OneMinute, &lookback),
      None
    );
    assert_eq!(preflight_start(start(), end(), Interval::OneDay, &lookback), None);
  }

  #[test]
  #[traced_test]
  fn batch_surfaces_preflight_warning() {
    let source = ScriptedSource::default().reply("AAA", Ok(bars(&[1.0, 1.1])));
    let lookback = LookbackTable::v1();
    let fetcher = PriceFetcher::new(&source, &lookback);
    let tickers = vec!["AAA".to_string()];

    let report = tokio_test::block_on(fetcher.fetch_all(
      &tickers,
      start(),
      end(),
      Interval::OneMinute,
      2,
    ));

    assert_eq!(report.start, end() - TimeDelta::days(6));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("limited to 7 days"));
    assert!(logs_contain("limited to 7 days"));
    assert_eq!(
      source.calls()[0],
      Call::Range {
        ticker: "AAA".to_string(),
        start: end() - TimeDelta::days(6),
        end: end(),
      }
    );
  }

  #[test]
  fn batch_keeps_caller_order_and_isolates_failures() {
    let source = ScriptedSource::default()
      .reply("SLOW", Ok(bars(&[1.0, 1.1])))
      .reply("BAD", Err(ProviderError::Request("boom".to_string())))
      .reply("BAD", Err(ProviderError::Request("boom".to_string())))
      .reply("FAST", Ok(bars(&[2.0, 2.2])))
      .delay("SLOW", Duration::from_millis(30));
    let lookback = LookbackTable::v1();
    let fetcher = PriceFetcher::new(&source, &lookback);
    let tickers: Vec<String> = ["SLOW", "BAD", "FAST"].iter().map(|t| t.to_string()).collect();

    let report = tokio_test::block_on(fetcher.fetch_all(
      &tickers,
      start(),
      end(),
      Interval::OneDay,
      3,
    ));

    let order: Vec<&str> = report.results.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(order, vec!["SLOW", "BAD", "FAST"]);
    assert_eq!(report.failed(), vec!["BAD"]);
    let fetched: Vec<&str> = report.series().map(|s| s.ticker()).collect();
    assert_eq!(fetched, vec!["SLOW", "FAST"]);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].starts_with("BAD:"));
  }
}
