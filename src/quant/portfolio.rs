//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Objective functions, constrained weight optimization, performance
//! aggregation and the request-level engine.

pub mod engine;
pub mod metrics;
pub mod optimizers;
pub mod performance;
pub mod types;

pub use engine::PortfolioEngine;
pub use engine::PortfolioRequest;
pub use engine::PortfolioResponse;
pub use engine::PreparedReturns;
pub use engine::SavedPortfolioRequest;
pub use engine::ValidatedRequest;
pub use metrics::evaluate;
pub use metrics::periodic_avg_return;
pub use metrics::portfolio_volatility;
pub use metrics::sample_covariance;
pub use metrics::sharpe;
pub use metrics::sortino;
pub use metrics::total_return;
pub use metrics::MetricSummary;
pub use metrics::Objective;
pub use optimizers::optimize_weights;
pub use optimizers::ProjectedGradient;
pub use performance::cumulative_performance;
pub use performance::portfolio_returns;
pub use performance::PerformancePoint;
pub use types::Allocation;
pub use types::Frequency;
pub use types::Metric;
pub use types::MetricParams;
pub use types::WeightBounds;
