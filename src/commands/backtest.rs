//! Backtest command implementation

use anyhow::Result;
use strategy_optimizer::backtest::{BacktestRunner, BacktestSettings};
use strategy_optimizer::data::provider_from_config;
use strategy_optimizer::{AppConfig, OptimizationConfig};
use tracing::{debug, info};

/// Fixed parameters given on the command line
#[derive(Debug, Default)]
pub struct Overrides {
    pub grid_size: Option<u32>,
    pub grid_spacing: Option<f64>,
    pub max_positions: Option<u32>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

pub fn run(config_path: String, job_path: String, overrides: Overrides) -> Result<()> {
    info!("Starting backtest");

    let app = AppConfig::load_or_default(&config_path)?;
    info!("Loaded configuration from: {}", config_path);
    let job = OptimizationConfig::from_file(&job_path)?;
    job.validate()?;

    // Range midpoints, then command-line overrides
    let ranges = job.parameter_ranges;
    let mut params = ranges.realize(&ranges.as_array().map(|r| r.midpoint()));
    if let Some(v) = overrides.grid_size {
        params.grid_size = v;
    }
    if let Some(v) = overrides.grid_spacing {
        params.grid_spacing = v;
    }
    if let Some(v) = overrides.max_positions {
        params.max_positions = v;
    }
    if let Some(v) = overrides.stop_loss {
        params.stop_loss = v;
    }
    if let Some(v) = overrides.take_profit {
        params.take_profit = v;
    }
    debug!("Parameters: {}", params);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let runner = BacktestRunner::new(
            provider_from_config(&app)?,
            BacktestSettings::from(&app.backtest),
        );
        info!("Running backtest...");
        let result = runner
            .run(
                &job.symbol,
                &job.timeframe,
                job.start,
                job.end,
                job.initial_balance,
                &params,
            )
            .await?;
        anyhow::Ok(result)
    })?;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {} {}", job.symbol, job.timeframe);
    println!("{}", "=".repeat(60));
    println!("  Initial Balance: {:.2}", job.initial_balance);
    super::print_result(&result);
    println!("{}", "=".repeat(60));

    info!("Backtest completed");
    Ok(())
}
