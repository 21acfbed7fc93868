//! Optimize command: run one job with a live progress bar

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use strategy_optimizer::backtest::BacktestSettings;
use strategy_optimizer::config::SearchMethod;
use strategy_optimizer::data::provider_from_config;
use strategy_optimizer::manager::{JobStatus, OptimizationManager};
use strategy_optimizer::optimizer::total_iterations;
use strategy_optimizer::store::ResultStore;
use strategy_optimizer::{AppConfig, OptimizationConfig};
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(
    config_path: String,
    job_path: String,
    method_override: Option<String>,
    seed_override: Option<u64>,
) -> Result<()> {
    info!("Starting optimization");

    let app = AppConfig::load_or_default(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let mut job = OptimizationConfig::from_file(&job_path)?;
    info!("Loaded job from: {}", job_path);

    if let Some(method) = method_override {
        job.method = method
            .parse::<SearchMethod>()
            .map_err(|e| anyhow::anyhow!(e))?;
        info!("Overriding method to: {}", job.method);
    }
    if let Some(seed) = seed_override {
        job.seed = seed;
        info!("Overriding seed to: {}", seed);
    }

    let total = total_iterations(&job);
    println!("\n{}", "=".repeat(70));
    println!("PARAMETER OPTIMIZATION");
    println!("{}", "=".repeat(70));
    println!("  Symbol:        {} ({})", job.symbol, job.timeframe);
    println!("  Window:        {} → {}", job.start.date_naive(), job.end.date_naive());
    println!("  Balance:       {:.2}", job.initial_balance);
    println!("  Method:        {}", job.method);
    println!("  Objective:     {}", job.objective);
    println!("  Evaluations:   {}", total);
    println!("{}\n", "=".repeat(70));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let provider = provider_from_config(&app)?;
        let manager = OptimizationManager::new(
            provider,
            ResultStore::new(&app.results_dir),
            BacktestSettings::from(&app.backtest),
        );

        let job_id = manager.start(job)?;
        info!("Job id: {}", job_id);

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}] ✓ {msg}")
                .context("Invalid progress bar template")?
                .progress_chars("█░ "),
        );

        let status = loop {
            let status = manager
                .status(job_id)
                .context("Job disappeared from the manager")?;
            pb.set_position(status.current_iteration);
            if let Some(best) = &status.best_result {
                pb.set_message(format!("best {:.2}", best.total_profit));
            }
            if status.status.is_terminal() {
                break status;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };
        manager.wait(job_id).await;

        match status.status {
            JobStatus::Completed => pb.finish_with_message("done"),
            _ => pb.abandon_with_message("failed"),
        }
        println!();

        if let Some(err) = &status.error {
            anyhow::bail!("Optimization failed: {}", err);
        }

        println!("{}", "=".repeat(60));
        println!("BEST RESULT");
        println!("{}", "=".repeat(60));
        match &status.best_result {
            Some(best) => super::print_result(best),
            None => println!("  No result"),
        }
        println!("{}", "=".repeat(60));
        if let Some(id) = &status.result_id {
            println!("Saved as {} in {}", id, app.results_dir);
        }

        info!("Optimization completed successfully");
        Ok(())
    })
}
