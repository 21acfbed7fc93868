//! Integration tests for the strategy optimizer
//!
//! These drive the job manager end to end against an in-memory market data
//! source and a temporary result directory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use strategy_optimizer::backtest::{BacktestRunner, BacktestSettings, GridParameters};
use strategy_optimizer::config::{ParamRange, ParameterRanges, SearchMethod};
use strategy_optimizer::data::MarketDataProvider;
use strategy_optimizer::manager::{JobStatus, OptimizationManager, OptimizationStatus, STOPPED_BY_USER};
use strategy_optimizer::store::ResultStore;
use strategy_optimizer::{Candle, OptimizationConfig, OptimizerError, Side};

// =============================================================================
// Test Utilities
// =============================================================================

struct MemoryProvider {
    candles: Vec<Candle>,
    symbols: HashSet<String>,
    fail_with: Option<String>,
}

impl MemoryProvider {
    fn new(candles: Vec<Candle>) -> Self {
        MemoryProvider {
            candles,
            symbols: HashSet::from(["BTCUSDT".to_string()]),
            fail_with: None,
        }
    }

    fn failing(message: &str) -> Self {
        MemoryProvider {
            fail_with: Some(message.to_string()),
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl MarketDataProvider for MemoryProvider {
    async fn get_historical_data(
        &self,
        _symbol: &str,
        _timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>> {
        if let Some(msg) = &self.fail_with {
            anyhow::bail!("{}", msg);
        }
        Ok(self
            .candles
            .iter()
            .filter(|c| c.datetime >= start && c.datetime <= end)
            .cloned()
            .collect())
    }

    async fn get_symbols(&self) -> anyhow::Result<HashSet<String>> {
        Ok(self.symbols.clone())
    }
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Hourly candles oscillating around 100
fn generate_wave_candles(count: usize) -> Vec<Candle> {
    let price = |i: usize| {
        let t = i as f64;
        100.0 + 6.0 * (t / 8.0).sin() + 2.0 * (t / 3.0).cos()
    };
    (0..count)
        .map(|i| {
            let open = if i == 0 { price(0) } else { price(i - 1) };
            let close = price(i);
            Candle::new(
                start_time() + Duration::hours(i as i64),
                open,
                open.max(close) * 1.005,
                open.min(close) * 0.995,
                close,
                100.0,
            )
            .unwrap()
        })
        .collect()
}

fn ranges() -> ParameterRanges {
    ParameterRanges {
        grid_size: ParamRange::new(2.0, 8.0),
        grid_spacing: ParamRange::new(0.005, 0.03),
        max_positions: ParamRange::new(1.0, 4.0),
        stop_loss: ParamRange::new(0.02, 0.1),
        take_profit: ParamRange::new(0.005, 0.04),
    }
}

fn job(method: SearchMethod) -> OptimizationConfig {
    let mut cfg = OptimizationConfig::new(
        "BTCUSDT",
        "1h",
        start_time(),
        start_time() + Duration::days(30),
        1000.0,
        ranges(),
        method,
    );
    cfg.grid_steps = 2;
    cfg.population_size = 5;
    cfg.generations = 3;
    cfg.bayesian_initial_points = 4;
    cfg.bayesian_iterations = 4;
    cfg.bayesian_candidates = 30;
    cfg
}

fn temp_results_dir() -> PathBuf {
    std::env::temp_dir().join(format!("optimizer_it_{}", Uuid::new_v4()))
}

fn manager_with(provider: MemoryProvider, dir: &PathBuf) -> OptimizationManager {
    OptimizationManager::new(
        Arc::new(provider),
        ResultStore::new(dir),
        BacktestSettings::default(),
    )
}

fn assert_in_bounds(params: &GridParameters) {
    let r = ranges();
    assert!(r.grid_size.contains(params.grid_size as f64));
    assert!(r.grid_spacing.contains(params.grid_spacing));
    assert!(r.max_positions.contains(params.max_positions as f64));
    assert!(r.stop_loss.contains(params.stop_loss));
    assert!(r.take_profit.contains(params.take_profit));
}

/// Poll by yielding until the job ends, keeping every snapshot
async fn poll_until_done(manager: &OptimizationManager, id: Uuid) -> Vec<OptimizationStatus> {
    let mut snapshots = Vec::new();
    loop {
        tokio::task::yield_now().await;
        let status = manager.status(id).unwrap();
        let done = status.status.is_terminal();
        snapshots.push(status);
        if done {
            return snapshots;
        }
    }
}

// =============================================================================
// Job lifecycle
// =============================================================================

#[tokio::test]
async fn test_grid_job_completes_and_persists_best() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(generate_wave_candles(400)), &dir);

    let id = manager.start(job(SearchMethod::Grid)).unwrap();
    let running = manager.status(id).unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.total_iterations, 32);

    let status = manager.wait(id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.current_iteration, 32);
    assert_eq!(status.progress, 1.0);
    assert!(status.error.is_none());
    assert!(status.finished_at.is_some());

    let best = status.best_result.clone().unwrap();
    assert_in_bounds(&best.parameters);

    let results = manager.list_results().unwrap();
    assert_eq!(results.len(), 1);
    let result_id = status.result_id.clone().unwrap();
    assert_eq!(results[0].id, result_id);
    assert_eq!(results[0].job_id, id.to_string());
    assert_eq!(results[0].result.parameters.grid_size, best.parameters.grid_size);
    assert_eq!(results[0].result.total_trades, best.total_trades);
    assert!((results[0].result.total_profit - best.total_profit).abs() < 1e-9);

    // Reads are idempotent
    let first = manager.get_result(&result_id).unwrap();
    let second = manager.get_result(&result_id).unwrap();
    assert_eq!(first, second);
    assert!(first.is_some());

    assert!(manager.delete_result(&result_id).unwrap());
    assert!(manager.get_result(&result_id).unwrap().is_none());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_two_step_grid_writes_one_result_file() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(generate_wave_candles(400)), &dir);

    let mut cfg = job(SearchMethod::Grid);
    cfg.parameter_ranges = ParameterRanges {
        grid_size: ParamRange::new(5.0, 10.0),
        grid_spacing: ParamRange::new(0.05, 0.1),
        max_positions: ParamRange::new(1.0, 2.0),
        stop_loss: ParamRange::new(0.01, 0.02),
        take_profit: ParamRange::new(0.02, 0.04),
    };
    let bounds = cfg.parameter_ranges;
    let id = manager.start(cfg).unwrap();
    assert_eq!(manager.status(id).unwrap().total_iterations, 32);

    let status = manager.wait(id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.current_iteration, 32);

    let files: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(files.len(), 1);

    let stored = manager.list_results().unwrap().remove(0);
    let p = stored.result.parameters;
    assert!(bounds.grid_size.contains(p.grid_size as f64));
    assert!(bounds.grid_spacing.contains(p.grid_spacing));
    assert!(bounds.max_positions.contains(p.max_positions as f64));
    assert!(bounds.stop_loss.contains(p.stop_loss));
    assert!(bounds.take_profit.contains(p.take_profit));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_genetic_and_bayesian_jobs_complete() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(generate_wave_candles(300)), &dir);

    let genetic = manager.start(job(SearchMethod::Genetic)).unwrap();
    let bayesian = manager.start(job(SearchMethod::Bayesian)).unwrap();

    let g = manager.wait(genetic).await.unwrap();
    let b = manager.wait(bayesian).await.unwrap();

    assert_eq!(g.status, JobStatus::Completed);
    assert_eq!(g.current_iteration, 20);
    assert_eq!(b.status, JobStatus::Completed);
    assert_eq!(b.current_iteration, 8);
    assert_in_bounds(&g.best_result.unwrap().parameters);
    assert_in_bounds(&b.best_result.unwrap().parameters);

    assert_eq!(manager.jobs().len(), 2);
    assert_eq!(manager.list_results().unwrap().len(), 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_best_result_only_improves() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(generate_wave_candles(300)), &dir);

    let mut cfg = job(SearchMethod::Genetic);
    cfg.population_size = 6;
    cfg.generations = 5;
    let id = manager.start(cfg).unwrap();

    let snapshots = poll_until_done(&manager, id).await;
    let profits: Vec<f64> = snapshots
        .iter()
        .filter_map(|s| s.best_result.as_ref().map(|b| b.total_profit))
        .collect();
    assert!(!profits.is_empty());
    assert!(profits.windows(2).all(|w| w[1] >= w[0]));

    let iterations: Vec<u64> = snapshots.iter().map(|s| s.current_iteration).collect();
    assert!(iterations.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(*iterations.last().unwrap(), 36);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_data_fetch_failure_fails_job() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::failing("exchange unreachable"), &dir);

    let id = manager.start(job(SearchMethod::Grid)).unwrap();
    let status = manager.wait(id).await.unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.progress, 0.0);
    assert_eq!(status.current_iteration, 0);
    assert!(status.best_result.is_none());
    assert!(status.result_id.is_none());
    assert!(status.error.unwrap().contains("exchange unreachable"));
    assert!(manager.list_results().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_symbol_fails_job() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(generate_wave_candles(50)), &dir);

    let mut cfg = job(SearchMethod::Grid);
    cfg.symbol = "DOGEUSDT".to_string();
    let id = manager.start(cfg).unwrap();
    let status = manager.wait(id).await.unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.error.unwrap().contains("DOGEUSDT"));
}

#[tokio::test]
async fn test_symbol_match_ignores_case() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(generate_wave_candles(200)), &dir);

    let mut cfg = job(SearchMethod::Grid);
    cfg.symbol = "btcusdt".to_string();
    let id = manager.start(cfg).unwrap();
    let status = manager.wait(id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.result_id.is_some());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_invalid_config_rejected_at_start() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(Vec::new()), &dir);

    let mut cfg = job(SearchMethod::Grid);
    cfg.parameter_ranges.grid_spacing = ParamRange::new(0.2, 0.1);
    let err = manager.start(cfg).unwrap_err();

    assert!(matches!(err, OptimizerError::Validation(_)));
    assert!(err.is_client_error());
    assert!(manager.jobs().is_empty());
}

#[tokio::test]
async fn test_stop_cancels_and_sticks() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(generate_wave_candles(400)), &dir);

    let mut cfg = job(SearchMethod::Grid);
    cfg.grid_steps = 6;
    let id = manager.start(cfg).unwrap();

    for _ in 0..10_000 {
        tokio::task::yield_now().await;
        if manager.status(id).unwrap().current_iteration >= 3 {
            break;
        }
    }

    assert!(manager.stop(id));
    let stopped = manager.status(id).unwrap();
    assert_eq!(stopped.status, JobStatus::Failed);
    assert_eq!(stopped.error.as_deref(), Some(STOPPED_BY_USER));

    let after = manager.wait(id).await.unwrap();
    assert_eq!(after.status, JobStatus::Failed);
    assert_eq!(after.error.as_deref(), Some(STOPPED_BY_USER));
    assert!(after.current_iteration < after.total_iterations);
    assert!(after.result_id.is_none());
    // Partial best survives
    assert!(after.best_result.is_some());

    assert!(!manager.stop(id));
    assert!(manager.list_results().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_ids() {
    let dir = temp_results_dir();
    let manager = manager_with(MemoryProvider::new(Vec::new()), &dir);
    let id = Uuid::new_v4();

    assert!(manager.status(id).is_none());
    assert!(!manager.stop(id));
    assert!(manager.wait(id).await.is_none());
    assert!(manager.get_result("missing").unwrap().is_none());
    assert!(!manager.delete_result("missing").unwrap());
}

// =============================================================================
// Backtest runner
// =============================================================================

#[tokio::test]
async fn test_runner_fetches_window_and_simulates() {
    let provider = Arc::new(MemoryProvider::new(generate_wave_candles(200)));
    let runner = BacktestRunner::new(provider, BacktestSettings::default());
    let params = ranges().realize(&[4.0, 0.01, 2.0, 0.05, 0.01]);

    let end = start_time() + Duration::hours(199);
    let result = runner
        .run("BTCUSDT", "1h", start_time(), end, 1000.0, &params)
        .await
        .unwrap();

    let direct = runner
        .simulate(&generate_wave_candles(200), 1000.0, &params)
        .unwrap();
    assert_eq!(result, direct);
    assert!(result.total_trades > 0);
    let sells = result.trades.iter().filter(|t| t.side == Side::Sell).count();
    assert_eq!(result.total_trades, sells);
}

#[tokio::test]
async fn test_runner_errors() {
    let params = ranges().realize(&[4.0, 0.01, 2.0, 0.05, 0.01]);

    let runner = BacktestRunner::new(
        Arc::new(MemoryProvider::new(Vec::new())),
        BacktestSettings::default(),
    );
    let err = runner
        .run("BTCUSDT", "1h", start_time(), start_time(), 1000.0, &params)
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizerError::Validation(_)));

    let empty = runner
        .run("BTCUSDT", "1h", start_time(), start_time() + Duration::days(1), 1000.0, &params)
        .await
        .unwrap();
    assert_eq!(empty.total_trades, 0);
    assert_eq!(empty.final_balance, 1000.0);

    let failing = BacktestRunner::new(
        Arc::new(MemoryProvider::failing("timeout")),
        BacktestSettings::default(),
    );
    let err = failing
        .run("BTCUSDT", "1h", start_time(), start_time() + Duration::days(1), 1000.0, &params)
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizerError::DataFetch(_)));
}
