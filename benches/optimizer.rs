use std::hint::black_box;

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BenchmarkId;
use criterion::Criterion;
use optimal_portfolio::config::SolverConfig;
use optimal_portfolio::data::ReturnMatrix;
use optimal_portfolio::quant::portfolio::optimize_weights;
use optimal_portfolio::quant::portfolio::Metric;
use optimal_portfolio::quant::portfolio::MetricParams;
use optimal_portfolio::quant::portfolio::Objective;
use optimal_portfolio::quant::portfolio::WeightBounds;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal;

const PERIODS: usize = 252;

/// Seeded normal returns with asset-specific drift and volatility.
fn synthetic_returns(n_assets: usize) -> ReturnMatrix {
  let names: Vec<String> = (0..n_assets).map(|i| format!("A{i}")).collect();
  let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
  let mut rng = StdRng::seed_from_u64(42);
  let dists: Vec<Normal<f64>> = (0..n_assets)
    .map(|i| {
      let drift = 0.0002 * (i as f64 + 1.0);
      let vol = 0.01 * (1.0 + i as f64 / n_assets as f64);
      Normal::new(drift, vol).unwrap()
    })
    .collect();
  let rows: Vec<Vec<f64>> = (0..PERIODS)
    .map(|_| dists.iter().map(|d| d.sample(&mut rng)).collect())
    .collect();

  ReturnMatrix::from_rows(&names, &rows).unwrap()
}

fn bench_objective(c: &mut Criterion) {
  let mut group = c.benchmark_group("Objective");
  let params = MetricParams::default();

  for &n in &[5, 20, 50] {
    let returns = synthetic_returns(n);
    let w = vec![1.0 / n as f64; n];
    for metric in [Metric::Sharpe, Metric::Sortino] {
      let objective = Objective::new(metric, &returns, &params);
      group.bench_with_input(BenchmarkId::new(metric.as_str(), n), &w, |b, w| {
        b.iter(|| black_box(objective.score(black_box(w))))
      });
    }
  }

  group.finish();
}

fn bench_optimize(c: &mut Criterion) {
  let mut group = c.benchmark_group("Optimize");
  let params = MetricParams::default();
  let solver = SolverConfig::default();
  let bounds = WeightBounds::new(false, 0.4, 1.0);

  for &n in &[5, 20] {
    let returns = synthetic_returns(n);
    group.bench_with_input(BenchmarkId::new("sharpe", n), &returns, |b, returns| {
      b.iter(|| black_box(optimize_weights(returns, Metric::Sharpe, &bounds, &params, &solver)))
    });
  }

  group.finish();
}

criterion_group!(benches, bench_objective, bench_optimize);
criterion_main!(benches);
