use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use indexmap::IndexMap;
use optimal_portfolio::data::YahooSource;
use optimal_portfolio::PipelineConfig;
use optimal_portfolio::PortfolioEngine;
use optimal_portfolio::PortfolioRequest;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Optimize portfolio weights over Yahoo Finance price history.
#[derive(Parser)]
#[command(name = "allocate")]
#[command(version)]
#[command(about = "Constrained portfolio weight optimization", long_about = None)]
struct Cli {
  /// Tickers, comma separated. Defaults to the configured watchlist.
  #[arg(short, long, value_delimiter = ',')]
  tickers: Vec<String>,

  /// First day of the window (YYYY-MM-DD).
  #[arg(short, long)]
  start: NaiveDate,

  /// End of the window (YYYY-MM-DD), exclusive. Defaults to now.
  #[arg(short, long)]
  end: Option<NaiveDate>,

  #[arg(short, long, default_value = "1d")]
  interval: String,

  /// sharpe, sortino, total return, weekly return or daily return.
  #[arg(short, long, default_value = "sharpe")]
  metric: String,

  #[arg(long)]
  allow_short: bool,

  #[arg(long)]
  max_long: Option<f64>,

  #[arg(long)]
  max_short: Option<f64>,

  /// Score these weights (comma separated, ticker order) instead of optimizing.
  #[arg(short, long, value_delimiter = ',')]
  weights: Vec<f64>,

  /// Pipeline configuration (TOML).
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Verbosity level
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

fn init_tracing(verbose: u8) -> Result<()> {
  let level = match verbose {
    0 => Level::WARN,
    1 => Level::INFO,
    2 => Level::DEBUG,
    _ => Level::TRACE,
  };

  let subscriber = FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .with_writer(std::io::stderr)
    .finish();
  tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose)?;

  let config = match &cli.config {
    Some(path) => PipelineConfig::from_toml_file(path)?,
    None => PipelineConfig::default(),
  };
  let tickers = if cli.tickers.is_empty() {
    config.watchlist.clone()
  } else {
    cli.tickers.clone()
  };

  let request = PortfolioRequest {
    tickers: tickers.clone(),
    start_date: cli.start,
    end_date: cli.end,
    interval: cli.interval.clone(),
    metric: cli.metric.clone(),
    allow_short: Some(cli.allow_short),
    max_long: cli.max_long,
    max_short: cli.max_short,
  };

  let source = YahooSource::new()
    .context("failed to create Yahoo Finance client")?
    .with_lookback(config.lookback.clone());
  let engine = PortfolioEngine::new(source, config);

  let response = if cli.weights.is_empty() {
    engine.optimize(&request).await?
  } else {
    if cli.weights.len() != tickers.len() {
      bail!(
        "{} weights given for {} tickers",
        cli.weights.len(),
        tickers.len()
      );
    }
    let weights: IndexMap<String, f64> = tickers.into_iter().zip(cli.weights.iter().copied()).collect();
    engine.evaluate(&request, &weights).await?
  };

  println!("{}", serde_json::to_string_pretty(&response)?);
  Ok(())
}
