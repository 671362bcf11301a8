//! # Price Series
//!
//! Raw provider bars and the validated per-asset close series built from them.

use chrono::DateTime;
use chrono::Utc;

/// One bar as returned by a provider. Either close may be absent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawBar {
  pub timestamp: DateTime<Utc>,
  pub close: Option<f64>,
  pub adj_close: Option<f64>,
}

impl RawBar {
  pub fn new(timestamp: DateTime<Utc>, close: Option<f64>, adj_close: Option<f64>) -> Self {
    Self {
      timestamp,
      close,
      adj_close,
    }
  }
}

/// Close-price history of one asset.
///
/// Timestamps are strictly increasing and every price is finite and positive.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
  ticker: String,
  points: Vec<(DateTime<Utc>, f64)>,
}

impl PriceSeries {
  /// Build a series from arbitrary points. Invalid prices are dropped, points
  /// are sorted and the last observation wins on duplicate timestamps.
  pub fn new(ticker: impl Into<String>, points: Vec<(DateTime<Utc>, f64)>) -> Self {
    let mut points: Vec<_> = points
      .into_iter()
      .filter(|(_, p)| p.is_finite() && *p > 0.0)
      .collect();
    points.sort_by_key(|(ts, _)| *ts);

    let mut deduped: Vec<(DateTime<Utc>, f64)> = Vec::with_capacity(points.len());
    for point in points {
      match deduped.last_mut() {
        Some(last) if last.0 == point.0 => *last = point,
        _ => deduped.push(point),
      }
    }

    Self {
      ticker: ticker.into(),
      points: deduped,
    }
  }

  /// Pick the price column from provider bars: adjusted close when the
  /// provider supplied one, unadjusted close otherwise. Returns `None` when
  /// no usable point remains.
  pub fn from_bars(ticker: &str, bars: &[RawBar]) -> Option<Self> {
    let has_adjusted = bars.iter().any(|b| b.adj_close.is_some());
    let points = bars
      .iter()
      .filter_map(|b| {
        let price = if has_adjusted { b.adj_close } else { b.close };
        price.map(|p| (b.timestamp, p))
      })
      .collect();

    let series = Self::new(ticker, points);
    (!series.is_empty()).then_some(series)
  }

  pub fn ticker(&self) -> &str {
    &self.ticker
  }

  pub fn points(&self) -> &[(DateTime<Utc>, f64)] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Price at exactly `ts`, if observed.
  pub fn price_at(&self, ts: DateTime<Utc>) -> Option<f64> {
    self
      .points
      .binary_search_by_key(&ts, |(t, _)| *t)
      .ok()
      .map(|i| self.points[i].1)
  }
}
