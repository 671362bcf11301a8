//! # Sampling Intervals
//!
//! The fixed set of sampling intervals the provider understands, together with
//! the resample bucket each one maps to.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Datelike;
use chrono::Days;
use chrono::NaiveDate;
use chrono::TimeDelta;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;

/// Sampling interval of a price request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interval {
  #[serde(rename = "1m")]
  OneMinute,
  #[serde(rename = "2m")]
  TwoMinutes,
  #[serde(rename = "5m")]
  FiveMinutes,
  #[serde(rename = "15m")]
  FifteenMinutes,
  #[serde(rename = "30m")]
  ThirtyMinutes,
  #[serde(rename = "60m")]
  SixtyMinutes,
  #[serde(rename = "90m")]
  NinetyMinutes,
  #[serde(rename = "1h")]
  OneHour,
  #[serde(rename = "4h")]
  FourHours,
  #[serde(rename = "1d")]
  OneDay,
  #[serde(rename = "5d")]
  FiveDays,
  #[serde(rename = "1wk")]
  OneWeek,
  #[serde(rename = "1mo")]
  OneMonth,
  #[serde(rename = "3mo")]
  ThreeMonths,
}

/// Resample bucket of an interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
  /// Fixed-width bucket, anchored at midnight UTC of the first observation.
  Fixed(TimeDelta),
  /// Calendar week ending on Sunday, labelled with that Sunday.
  Weekly,
  /// Run of calendar months starting at the first observation's month,
  /// labelled with the last day of the run.
  Months(i32),
}

impl Interval {
  pub const ALL: [Interval; 14] = [
    Interval::OneMinute,
    Interval::TwoMinutes,
    Interval::FiveMinutes,
    Interval::FifteenMinutes,
    Interval::ThirtyMinutes,
    Interval::SixtyMinutes,
    Interval::NinetyMinutes,
    Interval::OneHour,
    Interval::FourHours,
    Interval::OneDay,
    Interval::FiveDays,
    Interval::OneWeek,
    Interval::OneMonth,
    Interval::ThreeMonths,
  ];

  /// Provider tag, e.g. `"1m"` or `"1wk"`.
  pub fn as_str(&self) -> &'static str {
    match self {
      Interval::OneMinute => "1m",
      Interval::TwoMinutes => "2m",
      Interval::FiveMinutes => "5m",
      Interval::FifteenMinutes => "15m",
      Interval::ThirtyMinutes => "30m",
      Interval::SixtyMinutes => "60m",
      Interval::NinetyMinutes => "90m",
      Interval::OneHour => "1h",
      Interval::FourHours => "4h",
      Interval::OneDay => "1d",
      Interval::FiveDays => "5d",
      Interval::OneWeek => "1wk",
      Interval::OneMonth => "1mo",
      Interval::ThreeMonths => "3mo",
    }
  }

  /// Whether the interval is finer than one day.
  pub fn is_intraday(&self) -> bool {
    matches!(self.bucket(), Bucket::Fixed(width) if width < TimeDelta::days(1))
  }

  pub fn bucket(&self) -> Bucket {
    match self {
      Interval::OneMinute => Bucket::Fixed(TimeDelta::minutes(1)),
      Interval::TwoMinutes => Bucket::Fixed(TimeDelta::minutes(2)),
      Interval::FiveMinutes => Bucket::Fixed(TimeDelta::minutes(5)),
      Interval::FifteenMinutes => Bucket::Fixed(TimeDelta::minutes(15)),
      Interval::ThirtyMinutes => Bucket::Fixed(TimeDelta::minutes(30)),
      Interval::SixtyMinutes | Interval::OneHour => Bucket::Fixed(TimeDelta::hours(1)),
      Interval::NinetyMinutes => Bucket::Fixed(TimeDelta::minutes(90)),
      Interval::FourHours => Bucket::Fixed(TimeDelta::hours(4)),
      Interval::OneDay => Bucket::Fixed(TimeDelta::days(1)),
      Interval::FiveDays => Bucket::Fixed(TimeDelta::days(5)),
      Interval::OneWeek => Bucket::Weekly,
      Interval::OneMonth => Bucket::Months(1),
      Interval::ThreeMonths => Bucket::Months(3),
    }
  }

  /// Label of the bucket containing `ts`. Two timestamps share a bucket iff
  /// their labels are equal. `anchor` is the day of the first observation.
  pub fn bucket_label(&self, ts: DateTime<Utc>, anchor: NaiveDate) -> Option<DateTime<Utc>> {
    match self.bucket() {
      Bucket::Fixed(width) => {
        let origin = midnight(anchor)?;
        let width = width.num_seconds();
        let k = (ts - origin).num_seconds().div_euclid(width);
        origin.checked_add_signed(TimeDelta::try_seconds(k * width)?)
      }
      Bucket::Weekly => {
        let day = ts.date_naive();
        let to_sunday = (7 - day.weekday().num_days_from_sunday()) % 7;
        midnight(day.checked_add_days(Days::new(u64::from(to_sunday)))?)
      }
      Bucket::Months(k) => {
        let first = month_index(anchor);
        let run = (month_index(ts.date_naive()) - first).div_euclid(k);
        midnight(last_day_of_month(first + run * k + k - 1)?)
      }
    }
  }
}

fn midnight(day: NaiveDate) -> Option<DateTime<Utc>> {
  Some(day.and_hms_opt(0, 0, 0)?.and_utc())
}

fn month_index(day: NaiveDate) -> i32 {
  day.year() * 12 + day.month0() as i32
}

fn last_day_of_month(index: i32) -> Option<NaiveDate> {
  let next = index + 1;
  NaiveDate::from_ymd_opt(next.div_euclid(12), next.rem_euclid(12) as u32 + 1, 1)?.pred_opt()
}

impl fmt::Display for Interval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Interval {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let tag = s.trim().to_lowercase();
    Interval::ALL
      .into_iter()
      .find(|interval| interval.as_str() == tag)
      .ok_or_else(|| PortfolioError::UnsupportedInterval(s.to_string()))
  }
}
