//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}\big(R(\text{prices}), f, \ell, u\big)
//! $$
//!
//! Request-scoped orchestration: validate, fetch, align, compute returns,
//! optimize (or score caller weights) and compound the result.

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveTime;
use chrono::Utc;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::metrics::evaluate;
use super::metrics::MetricSummary;
use super::optimizers::optimize_weights;
use super::performance::cumulative_performance;
use super::performance::PerformancePoint;
use super::types::Metric;
use super::types::WeightBounds;
use crate::collab::PortfolioStore;
use crate::collab::UserId;
use crate::config::PipelineConfig;
use crate::data::FetchReport;
use crate::data::Interval;
use crate::data::PriceFetcher;
use crate::data::PriceHistorySource;
use crate::data::PriceSeries;
use crate::data::PriceTable;
use crate::data::ReturnMatrix;
use crate::error::PortfolioError;
use crate::error::Result;

/// Tolerance on the budget constraint of caller-supplied weights.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Optimization request as accepted at the request surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRequest {
  pub tickers: Vec<String>,
  pub start_date: NaiveDate,
  #[serde(default)]
  pub end_date: Option<NaiveDate>,
  pub interval: String,
  pub metric: String,
  #[serde(default)]
  pub allow_short: Option<bool>,
  #[serde(default)]
  pub max_long: Option<f64>,
  #[serde(default)]
  pub max_short: Option<f64>,
}

/// A [`PortfolioRequest`] whose tags and window passed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedRequest {
  pub tickers: Vec<String>,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub interval: Interval,
  pub metric: Metric,
  pub bounds: WeightBounds,
}

impl PortfolioRequest {
  /// Check the request against the clock `now`. Tags are parsed first so an
  /// unsupported interval or metric never reaches the network.
  pub fn validate(&self, now: DateTime<Utc>) -> Result<ValidatedRequest> {
    let interval: Interval = self.interval.parse()?;
    let metric: Metric = self.metric.parse()?;

    let mut tickers: Vec<String> = Vec::with_capacity(self.tickers.len());
    for raw in &self.tickers {
      let ticker = raw.trim();
      if ticker.is_empty() {
        return Err(PortfolioError::InvalidRequest(
          "ticker symbols must not be empty".to_string(),
        ));
      }
      if tickers.iter().any(|t| t == ticker) {
        return Err(PortfolioError::InvalidRequest(format!(
          "ticker '{ticker}' is listed twice"
        )));
      }
      tickers.push(ticker.to_string());
    }
    if tickers.is_empty() {
      return Err(PortfolioError::InvalidRequest(
        "at least one ticker is required".to_string(),
      ));
    }

    let today = now.date_naive();
    if self.start_date > today {
      return Err(PortfolioError::InvalidRequest(format!(
        "start date {} is in the future",
        self.start_date
      )));
    }
    let start = self.start_date.and_time(NaiveTime::MIN).and_utc();
    let end = match self.end_date {
      Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
      None => now,
    };
    if start >= end {
      return Err(PortfolioError::InvalidRequest(format!(
        "start date {} must be before the end of the window {}",
        self.start_date,
        end.date_naive()
      )));
    }

    let bounds = WeightBounds::new(
      self.allow_short.unwrap_or(false),
      self.max_long.unwrap_or(1.0),
      self.max_short.unwrap_or(1.0),
    );
    bounds.validate()?;

    Ok(ValidatedRequest {
      tickers,
      start,
      end,
      interval,
      metric,
      bounds,
    })
  }
}

/// Window and objective applied to a saved portfolio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedPortfolioRequest {
  pub portfolio_id: String,
  pub start_date: NaiveDate,
  #[serde(default)]
  pub end_date: Option<NaiveDate>,
  pub interval: String,
  pub metric: String,
}

/// Result of an optimization or evaluation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioResponse {
  /// Display name of the saved portfolio, if the request referenced one.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub portfolio: Option<String>,
  pub metric: Metric,
  pub interval: Interval,
  /// Weights of the assets that produced data, in request order.
  pub weights: IndexMap<String, f64>,
  /// Selected objective at `weights`. May be infinite or NaN for a
  /// zero-volatility portfolio, see `score_is_finite`.
  pub score: f64,
  pub score_is_finite: bool,
  pub metrics: MetricSummary,
  pub cum_returns: Vec<PerformancePoint>,
  /// Requested assets excluded because no data could be fetched.
  pub dropped: Vec<String>,
  pub warnings: Vec<String>,
}

/// Aligned returns plus what the fetch stage gave up on.
#[derive(Debug)]
pub struct PreparedReturns {
  pub returns: ReturnMatrix,
  pub dropped: Vec<String>,
  pub failures: Vec<PortfolioError>,
  pub warnings: Vec<String>,
}

/// Single entry point from requests to allocations.
pub struct PortfolioEngine<S> {
  source: S,
  config: PipelineConfig,
}

impl<S: PriceHistorySource> PortfolioEngine<S> {
  pub fn new(source: S, config: PipelineConfig) -> Self {
    Self { source, config }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// Optimize the weights of `request` against the current clock.
  pub async fn optimize(&self, request: &PortfolioRequest) -> Result<PortfolioResponse> {
    self.optimize_at(request, Utc::now()).await
  }

  pub async fn optimize_at(
    &self,
    request: &PortfolioRequest,
    now: DateTime<Utc>,
  ) -> Result<PortfolioResponse> {
    let request = request.validate(now)?;
    info!(
      "optimizing {} over {} assets at {}",
      request.metric,
      request.tickers.len(),
      request.interval
    );

    let prepared = self
      .load_returns(&request.tickers, request.start, request.end, request.interval)
      .await?;
    let allocation = optimize_weights(
      &prepared.returns,
      request.metric,
      &request.bounds,
      &self.config.metric,
      &self.config.solver,
    )?;

    Ok(self.respond(&request, prepared, allocation.weights, allocation.score))
  }

  /// Score caller-supplied weights without optimizing. Weights are keyed by
  /// ticker and must cover exactly the requested tickers.
  pub async fn evaluate(
    &self,
    request: &PortfolioRequest,
    weights: &IndexMap<String, f64>,
  ) -> Result<PortfolioResponse> {
    self.evaluate_at(request, weights, Utc::now()).await
  }

  pub async fn evaluate_at(
    &self,
    request: &PortfolioRequest,
    weights: &IndexMap<String, f64>,
    now: DateTime<Utc>,
  ) -> Result<PortfolioResponse> {
    let request = request.validate(now)?;
    let ordered = check_weights(&request, weights)?;

    let mut prepared = self
      .load_returns(&request.tickers, request.start, request.end, request.interval)
      .await?;
    // the caller's budget only holds over the full universe
    if let Some(failure) = prepared.failures.drain(..).next() {
      return Err(failure);
    }

    let score = evaluate(
      request.metric,
      &ordered,
      &prepared.returns,
      &self.config.metric,
    );
    Ok(self.respond(&request, prepared, ordered, score))
  }

  /// Optimize a portfolio saved by `user`. The store is only read.
  pub async fn optimize_saved<P: PortfolioStore + ?Sized>(
    &self,
    store: &P,
    user: &UserId,
    request: &SavedPortfolioRequest,
    now: DateTime<Utc>,
  ) -> Result<PortfolioResponse> {
    let saved = store
      .load(user, &request.portfolio_id)
      .await?
      .ok_or_else(|| PortfolioError::PortfolioNotFound(request.portfolio_id.clone()))?;
    info!("{user}: loaded saved portfolio '{}'", saved.name);

    let full = PortfolioRequest {
      tickers: saved.tickers,
      start_date: request.start_date,
      end_date: request.end_date,
      interval: request.interval.clone(),
      metric: request.metric.clone(),
      allow_short: Some(saved.bounds.allow_short),
      max_long: Some(saved.bounds.max_long),
      max_short: Some(saved.bounds.max_short),
    };

    let mut response = self.optimize_at(&full, now).await?;
    response.portfolio = Some(saved.name);
    Ok(response)
  }

  /// Fetch, align and convert prices to returns. Assets without data are
  /// dropped as long as one survives; the fetch stage is bounded by the
  /// configured timeout.
  pub async fn load_returns(
    &self,
    tickers: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
  ) -> Result<PreparedReturns> {
    let fetcher = PriceFetcher::new(&self.source, &self.config.lookback);
    let budget = self.config.fetch.timeout();
    let report: FetchReport = tokio::time::timeout(
      budget,
      fetcher.fetch_all(tickers, start, end, interval, self.config.fetch.concurrency),
    )
    .await
    .map_err(|_| PortfolioError::FetchTimeout(budget))?;

    let FetchReport {
      results, warnings, ..
    } = report;
    let mut fetched = std::collections::BTreeMap::<String, PriceSeries>::new();
    let mut dropped = Vec::new();
    let mut failures = Vec::new();
    for (ticker, result) in results {
      match result {
        Ok(series) => {
          fetched.insert(ticker, series);
        }
        Err(err) => {
          dropped.push(ticker);
          failures.push(err);
        }
      }
    }

    let table = PriceTable::align(tickers, &fetched)?;
    let returns = ReturnMatrix::from_prices(&table, interval)?;

    Ok(PreparedReturns {
      returns,
      dropped,
      failures,
      warnings,
    })
  }

  fn respond(
    &self,
    request: &ValidatedRequest,
    prepared: PreparedReturns,
    weights: Vec<f64>,
    score: f64,
  ) -> PortfolioResponse {
    let PreparedReturns {
      returns,
      dropped,
      mut warnings,
      ..
    } = prepared;

    let score_is_finite = score.is_finite();
    if !score_is_finite {
      let msg = format!(
        "{} is not finite ({score}): the portfolio has zero volatility over the window",
        request.metric
      );
      warn!("{msg}");
      warnings.push(msg);
    }

    let metrics = MetricSummary::evaluate(&weights, &returns, &self.config.metric);
    let cum_returns = cumulative_performance(&weights, &returns);
    let weights = returns
      .assets()
      .iter()
      .cloned()
      .zip(weights)
      .collect::<IndexMap<_, _>>();

    PortfolioResponse {
      portfolio: None,
      metric: request.metric,
      interval: request.interval,
      weights,
      score,
      score_is_finite,
      metrics,
      cum_returns,
      dropped,
      warnings,
    }
  }
}

/// Order caller weights by the request tickers and check them against the
/// budget and bounds.
fn check_weights(request: &ValidatedRequest, weights: &IndexMap<String, f64>) -> Result<Vec<f64>> {
  if weights.len() != request.tickers.len() {
    return Err(PortfolioError::InvalidWeights(format!(
      "expected {} weights, got {}",
      request.tickers.len(),
      weights.len()
    )));
  }

  let mut ordered = Vec::with_capacity(weights.len());
  for ticker in &request.tickers {
    let w = *weights
      .get(ticker)
      .ok_or_else(|| PortfolioError::InvalidWeights(format!("no weight given for {ticker}")))?;
    if !w.is_finite() {
      return Err(PortfolioError::InvalidWeights(format!(
        "weight of {ticker} is not finite"
      )));
    }
    if !request.bounds.contains(w, 1e-9) {
      return Err(PortfolioError::InvalidWeights(format!(
        "weight {w} of {ticker} is outside [{}, {}]",
        request.bounds.lower(),
        request.bounds.upper()
      )));
    }
    ordered.push(w);
  }

  let total: f64 = ordered.iter().sum();
  if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
    return Err(PortfolioError::InvalidWeights(format!(
      "weights sum to {total}, expected 1"
    )));
  }

  Ok(ordered)
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use approx::assert_abs_diff_eq;
  use chrono::TimeZone;
  use tokio_test::block_on;
  use tracing_test::traced_test;

  use super::*;
  use crate::collab::InMemoryPortfolioStore;
  use crate::collab::SavedPortfolio;
  use crate::config::FetchConfig;
  use crate::data::fetch::tests::bars;
  use crate::data::fetch::tests::ScriptedSource;
  use crate::data::ProviderError;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
  }

  fn request(tickers: &[&str], metric: &str) -> PortfolioRequest {
    PortfolioRequest {
      tickers: tickers.iter().map(|t| t.to_string()).collect(),
      start_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
      end_date: Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
      interval: "1d".to_string(),
      metric: metric.to_string(),
      allow_short: None,
      max_long: None,
      max_short: None,
    }
  }

  fn source() -> ScriptedSource {
    ScriptedSource::default()
      .reply("AAA", Ok(bars(&[100.0, 101.2, 100.6, 102.4, 102.0, 103.9])))
      .reply("BBB", Ok(bars(&[50.0, 50.1, 50.4, 50.3, 50.7, 50.8])))
  }

  fn engine(source: ScriptedSource) -> PortfolioEngine<ScriptedSource> {
    PortfolioEngine::new(source, PipelineConfig::default())
  }

  #[test]
  fn validation_rejects_bad_tags_before_fetching() {
    let mut bad_interval = request(&["AAA"], "sharpe");
    bad_interval.interval = "7m".to_string();
    assert!(matches!(
      bad_interval.validate(now()),
      Err(PortfolioError::UnsupportedInterval(_))
    ));

    let source = ScriptedSource::default();
    let engine = engine(source);
    let err = block_on(engine.optimize_at(&request(&["AAA"], "omega"), now())).unwrap_err();
    assert!(matches!(err, PortfolioError::UnsupportedMetric(_)));
    assert!(engine.source.calls().is_empty());
  }

  #[test]
  fn validation_checks_tickers_dates_and_bounds() {
    let now = now();
    assert!(request(&[], "sharpe").validate(now).is_err());
    assert!(request(&["AAA", "AAA"], "sharpe").validate(now).is_err());
    assert!(request(&["AAA", " "], "sharpe").validate(now).is_err());

    let mut future = request(&["AAA"], "sharpe");
    future.start_date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
    future.end_date = None;
    assert!(future.validate(now).is_err());

    let mut reversed = request(&["AAA"], "sharpe");
    reversed.end_date = Some(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    assert!(reversed.validate(now).is_err());

    let mut negative = request(&["AAA"], "sharpe");
    negative.max_long = Some(-1.0);
    assert!(negative.validate(now).is_err());

    let mut open_ended = request(&[" AAA ", "BBB"], "Total Return");
    open_ended.end_date = None;
    open_ended.allow_short = Some(true);
    open_ended.max_short = Some(0.25);
    let valid = open_ended.validate(now).unwrap();
    assert_eq!(valid.tickers, vec!["AAA", "BBB"]);
    assert_eq!(valid.end, now);
    assert_eq!(valid.metric, Metric::TotalReturn);
    assert_eq!(valid.bounds.lower(), -0.25);
  }

  #[test]
  fn optimize_returns_weights_in_request_order() {
    let engine = engine(source());
    let response = block_on(engine.optimize_at(&request(&["BBB", "AAA"], "sharpe"), now())).unwrap();

    let keys: Vec<&str> = response.weights.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["BBB", "AAA"]);
    assert_abs_diff_eq!(response.weights.values().sum::<f64>(), 1.0, epsilon = 1e-6);
    assert!(response.weights.values().all(|w| (-1e-9..=1.0 + 1e-9).contains(w)));
    assert!(response.score_is_finite);
    assert_abs_diff_eq!(response.score, response.metrics.sharpe, epsilon = 1e-12);
    assert_eq!(response.cum_returns.len(), 5);
    assert!(response.dropped.is_empty());
  }

  #[test]
  #[traced_test]
  fn failed_asset_is_dropped_with_warning() {
    let source = source()
      .reply("ZZZ", Err(ProviderError::Rejected("No data found".to_string())))
      .reply("ZZZ", Ok(Vec::new()));
    let engine = engine(source);
    let response =
      block_on(engine.optimize_at(&request(&["AAA", "ZZZ", "BBB"], "total return"), now())).unwrap();

    assert_eq!(response.dropped, vec!["ZZZ"]);
    assert_eq!(response.weights.len(), 2);
    assert!(response.warnings.iter().any(|w| w.contains("ZZZ")));
    assert!(logs_contain("ZZZ: no data retrieved"));
  }

  #[test]
  fn all_assets_failing_is_fatal() {
    let engine = engine(ScriptedSource::default());
    let err = block_on(engine.optimize_at(&request(&["AAA", "BBB"], "sharpe"), now())).unwrap_err();
    assert!(matches!(err, PortfolioError::NoUsableData { .. }), "{err}");
  }

  #[test]
  fn evaluate_scores_caller_weights() {
    let engine = engine(source());
    let weights: IndexMap<String, f64> =
      [("AAA".to_string(), 0.25), ("BBB".to_string(), 0.75)].into_iter().collect();
    let response =
      block_on(engine.evaluate_at(&request(&["AAA", "BBB"], "sortino"), &weights, now())).unwrap();

    assert_eq!(response.weights, weights);
    assert_abs_diff_eq!(response.score, response.metrics.sortino, epsilon = 1e-12);
  }

  #[test]
  fn evaluate_rejects_invalid_weights() {
    let engine = engine(source());
    let req = request(&["AAA", "BBB"], "sharpe");
    let cases: [&[(&str, f64)]; 4] = [
      &[("AAA", 1.0)],
      &[("AAA", 0.5), ("CCC", 0.5)],
      &[("AAA", 0.7), ("BBB", 0.2)],
      &[("AAA", 1.5), ("BBB", -0.5)],
    ];

    for case in cases {
      let weights: IndexMap<String, f64> = case.iter().map(|(t, w)| (t.to_string(), *w)).collect();
      let err = block_on(engine.evaluate_at(&req, &weights, now())).unwrap_err();
      assert!(matches!(err, PortfolioError::InvalidWeights(_)), "{err}");
    }
    assert!(engine.source.calls().is_empty());
  }

  #[test]
  fn saved_portfolio_runs_with_stored_bounds() {
    let store = InMemoryPortfolioStore::new();
    let user = UserId::new("u-42");
    store
      .insert(
        user.clone(),
        "core",
        SavedPortfolio {
          name: "Core holdings".to_string(),
          tickers: vec!["AAA".to_string(), "BBB".to_string()],
          bounds: WeightBounds::new(false, 0.6, 1.0),
        },
      )
      .unwrap();

    let engine = engine(source());
    let saved = SavedPortfolioRequest {
      portfolio_id: "core".to_string(),
      start_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
      end_date: None,
      interval: "1d".to_string(),
      metric: "total return".to_string(),
    };
    let response = block_on(engine.optimize_saved(&store, &user, &saved, now())).unwrap();

    assert_eq!(response.portfolio.as_deref(), Some("Core holdings"));
    assert!(response.weights.values().all(|w| *w <= 0.6 + 1e-9));

    let missing = SavedPortfolioRequest {
      portfolio_id: "other".to_string(),
      ..saved
    };
    let err = block_on(engine.optimize_saved(&store, &user, &missing, now())).unwrap_err();
    assert!(matches!(err, PortfolioError::PortfolioNotFound(id) if id == "other"));
  }

  #[test]
  fn zero_volatility_score_is_flagged() {
    let source = ScriptedSource::default()
      .reply("CASH", Ok(bars(&[1.0, 2.0, 4.0, 8.0])));
    let engine = engine(source);
    let response = block_on(engine.optimize_at(&request(&["CASH"], "sharpe"), now())).unwrap();

    assert_eq!(response.weights["CASH"], 1.0);
    assert!(!response.score_is_finite);
    assert!(response.warnings.iter().any(|w| w.contains("not finite")));
  }

  #[test]
  fn slow_fetch_hits_the_timeout() {
    let source = source().delay("AAA", Duration::from_secs(5));
    let config = PipelineConfig {
      fetch: FetchConfig {
        concurrency: 2,
        timeout_secs: 1,
      },
      ..PipelineConfig::default()
    };
    let engine = PortfolioEngine::new(source, config);
    let err = block_on(engine.optimize_at(&request(&["AAA", "BBB"], "sharpe"), now())).unwrap_err();
    assert!(matches!(err, PortfolioError::FetchTimeout(_)));
  }
}
