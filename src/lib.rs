//! # Optimal Portfolio
//!
//! Constrained portfolio weight optimization over historical market data.
//!
//! A request names a set of tickers, a date window, a sampling interval and an
//! objective. The pipeline downloads close prices through a
//! [`data::PriceHistorySource`], aligns them, converts them to periodic
//! returns and searches for fully invested weights maximizing the objective
//! within per-asset bounds. See [`quant::portfolio::PortfolioEngine`].

pub mod collab;
pub mod config;
pub mod data;
pub mod error;
pub mod quant;

pub use config::PipelineConfig;
pub use error::PortfolioError;
pub use error::Result;
pub use quant::portfolio::PortfolioEngine;
pub use quant::portfolio::PortfolioRequest;
pub use quant::portfolio::PortfolioResponse;
