//! # Collaborators
//!
//! Contracts with the services the allocation core depends on but does not
//! own: an identity provider that hands out opaque user ids and a read-only
//! store of previously saved portfolios.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::quant::portfolio::WeightBounds;

/// Opaque caller identity. Never interpreted by the core.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Optimizer inputs of a stored portfolio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedPortfolio {
  pub name: String,
  pub tickers: Vec<String>,
  #[serde(default)]
  pub bounds: WeightBounds,
}

/// Read-only access to saved portfolios, scoped by user.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
  /// `Ok(None)` when the user has no portfolio under `portfolio_id`.
  async fn load(&self, user: &UserId, portfolio_id: &str) -> Result<Option<SavedPortfolio>>;
}

/// Map-backed [`PortfolioStore`].
#[derive(Debug, Default)]
pub struct InMemoryPortfolioStore {
  portfolios: RwLock<HashMap<(UserId, String), SavedPortfolio>>,
}

impl InMemoryPortfolioStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(
    &self,
    user: UserId,
    portfolio_id: impl Into<String>,
    portfolio: SavedPortfolio,
  ) -> Result<()> {
    let mut portfolios = self
      .portfolios
      .write()
      .map_err(|e| PortfolioError::Store(e.to_string()))?;
    portfolios.insert((user, portfolio_id.into()), portfolio);
    Ok(())
  }
}

#[async_trait]
impl PortfolioStore for InMemoryPortfolioStore {
  async fn load(&self, user: &UserId, portfolio_id: &str) -> Result<Option<SavedPortfolio>> {
    let portfolios = self
      .portfolios
      .read()
      .map_err(|e| PortfolioError::Store(e.to_string()))?;
    Ok(
      portfolios
        .get(&(user.clone(), portfolio_id.to_string()))
        .cloned(),
    )
  }
}

#[cfg(test)]
mod tests {
  use tokio_test::block_on;

  use super::*;

  fn saved() -> SavedPortfolio {
    SavedPortfolio {
      name: "Tech".to_string(),
      tickers: vec!["AAPL".to_string(), "MSFT".to_string()],
      bounds: WeightBounds::new(false, 0.7, 1.0),
    }
  }

  #[test]
  fn portfolios_are_scoped_by_user() {
    let store = InMemoryPortfolioStore::new();
    store.insert(UserId::new("alice"), "p1", saved()).unwrap();

    let found = block_on(store.load(&UserId::new("alice"), "p1")).unwrap();
    assert_eq!(found, Some(saved()));

    let other_user = block_on(store.load(&UserId::new("bob"), "p1")).unwrap();
    assert!(other_user.is_none());
    let other_id = block_on(store.load(&UserId::new("alice"), "p2")).unwrap();
    assert!(other_id.is_none());
  }

  #[test]
  fn saved_portfolio_defaults_bounds() {
    let portfolio: SavedPortfolio =
      serde_json::from_str(r#"{"name": "Core", "tickers": ["SPY"]}"#).unwrap();
    assert_eq!(portfolio.bounds, WeightBounds::default());
    assert_eq!(UserId::new("u-1").to_string(), "u-1");
  }
}
