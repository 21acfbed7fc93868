//! Signals command: evaluate the indicator strategies on recent candles

use anyhow::Result;
use chrono::{Duration, Utc};
use strategy_optimizer::data::{parse_date, provider_from_config};
use strategy_optimizer::signals::{
    available_signal_strategies, create_signal_strategy, default_parameters,
};
use strategy_optimizer::AppConfig;
use tracing::{info, warn};

pub fn run(
    config_path: String,
    symbol: String,
    timeframe: String,
    days: u32,
    end: Option<String>,
    strategy: Option<String>,
) -> Result<()> {
    let app = AppConfig::load_or_default(&config_path)?;
    let symbol = symbol.trim().to_uppercase();

    let end = match end {
        Some(date) => parse_date(&date)?,
        None => Utc::now(),
    };
    let start = end - Duration::days(days as i64);

    let names: Vec<&str> = match &strategy {
        Some(name) => vec![name.as_str()],
        None => available_signal_strategies(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    let candles = rt.block_on(async {
        provider_from_config(&app)?
            .get_historical_data(&symbol, &timeframe, start, end)
            .await
    })?;
    info!("Loaded {} candles for {} {}", candles.len(), symbol, timeframe);

    if candles.is_empty() {
        warn!("No candles for {} {} between {} and {}", symbol, timeframe, start, end);
        println!("No data for {} {} in the requested window.", symbol, timeframe);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "SIGNALS {} {} (last close {:.4} at {})",
        symbol,
        timeframe,
        candles[candles.len() - 1].close,
        candles[candles.len() - 1].datetime.format("%Y-%m-%d %H:%M")
    );
    println!("{}", "=".repeat(60));

    for name in names {
        let Some(params) = default_parameters(name) else {
            anyhow::bail!(
                "Unknown signal strategy: '{}'. Available: {}",
                name,
                available_signal_strategies().join(", ")
            );
        };
        let strategy = create_signal_strategy(name, &params)?;
        let signal = strategy.generate_signal(&candles);

        let mut settings: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        settings.sort();
        println!(
            "  {:<14} {:<5} ({})",
            name,
            format!("{:?}", signal).to_uppercase(),
            settings.join(", ")
        );
    }
    println!("{}", "=".repeat(60));

    Ok(())
}
