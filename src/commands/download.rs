//! Download command - fetch historical candles from Binance into CSV files
//! the csv data source can read back

use anyhow::Result;
use chrono::{Duration, Utc};
use strategy_optimizer::binance::is_valid_interval;
use strategy_optimizer::data::{save_csv, BinanceDataProvider, CsvDataProvider, MarketDataProvider};
use strategy_optimizer::AppConfig;
use tracing::{info, warn};

pub fn run(config_path: String, pairs: String, timeframes: String, days: u32) -> Result<()> {
    let app = AppConfig::load_or_default(&config_path)?;
    info!("Starting data download into {}", app.data.data_dir);

    let symbols: Vec<String> = pairs
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    let intervals: Vec<&str> = timeframes.split(',').map(|s| s.trim()).collect();
    if let Some(bad) = intervals.iter().find(|i| !is_valid_interval(i)) {
        anyhow::bail!("Unsupported Binance interval: {}", bad);
    }

    println!("\n{}", "=".repeat(60));
    println!("DOWNLOADING HISTORICAL DATA FROM BINANCE");
    println!("{}", "=".repeat(60));
    println!("  Symbols:    {:?}", symbols);
    println!("  Timeframes: {:?}", intervals);
    println!("  Days:       {}", days);
    println!("  Output:     {}", app.data.data_dir);
    println!("{}\n", "=".repeat(60));

    let end = Utc::now();
    let start = end - Duration::days(days as i64);
    let binance = BinanceDataProvider::new()?;
    let csv = CsvDataProvider::new(&app.data.data_dir);
    std::fs::create_dir_all(&app.data.data_dir)?;

    let rt = tokio::runtime::Runtime::new()?;
    let mut success_count = 0;
    let mut total_candles = 0;

    for symbol in &symbols {
        println!("{}:", symbol);
        for interval in &intervals {
            print!("  Downloading {} {}... ", symbol, interval);
            match rt.block_on(binance.get_historical_data(symbol, interval, start, end)) {
                Ok(candles) => {
                    let path = csv.path_for(symbol, interval);
                    save_csv(&path, &candles)?;
                    println!("✓ {} candles", candles.len());
                    total_candles += candles.len();
                    success_count += 1;
                }
                Err(e) => {
                    println!("✗ failed");
                    warn!("Download of {} {} failed: {:#}", symbol, interval, e);
                }
            }
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "Downloaded {}/{} series, {} candles total",
        success_count,
        symbols.len() * intervals.len(),
        total_candles
    );
    println!("{}", "=".repeat(60));

    info!("Download completed");
    Ok(())
}
