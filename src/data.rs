//! # Market Data
//!
//! Price history acquisition and preparation: provider abstraction, the
//! retry/fallback fetch state machine, alignment and return construction.

pub mod align;
pub mod fetch;
pub mod interval;
pub mod provider;
pub mod returns;
pub mod series;
#[cfg(feature = "yahoo")]
pub mod yahoo;

pub use align::PriceTable;
pub use fetch::parse_day_limit;
pub use fetch::preflight_start;
pub use fetch::window_start;
pub use fetch::FetchReport;
pub use fetch::FetchState;
pub use fetch::PriceFetcher;
pub use interval::Bucket;
pub use interval::Interval;
pub use provider::PriceHistorySource;
pub use provider::ProviderError;
pub use returns::ReturnMatrix;
pub use series::PriceSeries;
pub use series::RawBar;
#[cfg(feature = "yahoo")]
pub use yahoo::YahooSource;
