//! Strategy optimizer - main entry point
//!
//! Subcommands:
//! - optimize: Run a parameter search job
//! - backtest: Run a single grid backtest
//! - results: Inspect or delete persisted results
//! - symbols: List symbols the configured data source offers
//! - download: Fetch candles from Binance into the CSV data directory

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "strategy-optimizer")]
#[command(about = "Grid strategy parameter optimization with grid, genetic and bayesian search", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a parameter optimization job
    Optimize {
        /// Path to application configuration file
        #[arg(short, long, default_value = "configs/app.json")]
        config: String,

        /// Path to optimization job file
        #[arg(short, long)]
        job: String,

        /// Search method (overrides job file): grid, genetic, bayesian
        #[arg(short, long)]
        method: Option<String>,

        /// Random seed (overrides job file)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run one backtest with fixed parameters
    Backtest {
        /// Path to application configuration file
        #[arg(short, long, default_value = "configs/app.json")]
        config: String,

        /// Job file supplying symbol, window, balance and parameter ranges.
        /// Parameters default to the middle of each range.
        #[arg(short, long)]
        job: String,

        #[arg(long)]
        grid_size: Option<u32>,

        #[arg(long)]
        grid_spacing: Option<f64>,

        #[arg(long)]
        max_positions: Option<u32>,

        #[arg(long)]
        stop_loss: Option<f64>,

        #[arg(long)]
        take_profit: Option<f64>,
    },

    /// Manage persisted optimization results
    Results {
        /// Path to application configuration file
        #[arg(short, long, default_value = "configs/app.json")]
        config: String,

        #[command(subcommand)]
        action: ResultsAction,
    },

    /// List available trading symbols
    Symbols {
        /// Path to application configuration file
        #[arg(short, long, default_value = "configs/app.json")]
        config: String,
    },

    /// Evaluate the indicator signal strategies on recent candles
    Signals {
        /// Path to application configuration file
        #[arg(short, long, default_value = "configs/app.json")]
        config: String,

        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        #[arg(short, long, default_value = "1h")]
        timeframe: String,

        /// Days of history before `end`
        #[arg(short, long, default_value = "30")]
        days: u32,

        /// End of the window (YYYY-MM-DD), defaults to now
        #[arg(short, long)]
        end: Option<String>,

        /// Only this strategy (rsi, macd, bollinger, ma_crossover)
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Download historical data from Binance into the data directory
    Download {
        /// Path to application configuration file
        #[arg(short, long, default_value = "configs/app.json")]
        config: String,

        /// Trading pairs (comma-separated). E.g., "BTCUSDT,ETHUSDT"
        #[arg(short, long, default_value = "BTCUSDT,ETHUSDT")]
        pairs: String,

        /// Timeframes (comma-separated). E.g., "1h,4h,1d"
        #[arg(short, long, default_value = "1h")]
        timeframes: String,

        /// Number of days of history to fetch
        #[arg(short, long, default_value = "365")]
        days: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ResultsAction {
    /// List stored results, newest first
    List,

    /// Show one stored result
    Show {
        id: String,

        /// Also print every trade
        #[arg(long)]
        trades: bool,
    },

    /// Delete one stored result
    Delete { id: String },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Console stays clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Results { .. } => ("results", false),
        Commands::Symbols { .. } => ("symbols", false),
        Commands::Signals { .. } => ("signals", false),
        Commands::Download { .. } => ("download", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Optimize {
            config,
            job,
            method,
            seed,
        } => commands::optimize::run(config, job, method, seed),

        Commands::Backtest {
            config,
            job,
            grid_size,
            grid_spacing,
            max_positions,
            stop_loss,
            take_profit,
        } => commands::backtest::run(
            config,
            job,
            commands::backtest::Overrides {
                grid_size,
                grid_spacing,
                max_positions,
                stop_loss,
                take_profit,
            },
        ),

        Commands::Results { config, action } => match action {
            ResultsAction::List => commands::results::list(config),
            ResultsAction::Show { id, trades } => commands::results::show(config, id, trades),
            ResultsAction::Delete { id } => commands::results::delete(config, id),
        },

        Commands::Symbols { config } => commands::symbols::run(config),

        Commands::Signals {
            config,
            symbol,
            timeframe,
            days,
            end,
            strategy,
        } => commands::signals::run(config, symbol, timeframe, days, end, strategy),

        Commands::Download {
            config,
            pairs,
            timeframes,
            days,
        } => commands::download::run(config, pairs, timeframes, days),
    }
}
