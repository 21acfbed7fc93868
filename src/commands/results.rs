//! Results command: list, show and delete persisted results

use anyhow::Result;
use strategy_optimizer::store::ResultStore;
use strategy_optimizer::AppConfig;
use tracing::info;

fn open_store(config_path: &str) -> Result<ResultStore> {
    let app = AppConfig::load_or_default(config_path)?;
    Ok(ResultStore::new(&app.results_dir))
}

pub fn list(config_path: String) -> Result<()> {
    let store = open_store(&config_path)?;
    let results = store.list()?;
    info!("Found {} stored results in {}", results.len(), store.dir().display());

    if results.is_empty() {
        println!("No stored results.");
        return Ok(());
    }

    println!("\n{}", "=".repeat(110));
    println!(
        "{:<36} {:<19} {:<10} {:<4} {:<9} {:>10} {:>7} {:>8}",
        "Id", "Created", "Symbol", "TF", "Method", "Profit", "Trades", "Sharpe"
    );
    println!("{}", "-".repeat(110));
    for stored in &results {
        println!(
            "{:<36} {:<19} {:<10} {:<4} {:<9} {:>10.2} {:>7} {:>8.2}",
            stored.id,
            stored.created_at.format("%Y-%m-%d %H:%M:%S"),
            stored.config.symbol,
            stored.config.timeframe,
            stored.config.method.to_string(),
            stored.result.total_profit,
            stored.result.total_trades,
            stored.result.sharpe_ratio,
        );
    }
    println!("{}", "=".repeat(110));

    Ok(())
}

pub fn show(config_path: String, id: String, with_trades: bool) -> Result<()> {
    let store = open_store(&config_path)?;
    let Some(stored) = store.get(&id)? else {
        anyhow::bail!("No result with id {}", id);
    };

    println!("\n{}", "=".repeat(60));
    println!("RESULT {}", stored.id);
    println!("{}", "=".repeat(60));
    println!("  Job:            {}", stored.job_id);
    println!("  Created:        {}", stored.created_at);
    println!(
        "  Market:         {} {} ({} → {})",
        stored.config.symbol,
        stored.config.timeframe,
        stored.config.start.date_naive(),
        stored.config.end.date_naive()
    );
    println!(
        "  Search:         {} / {}",
        stored.config.method, stored.config.objective
    );
    println!("{}", "-".repeat(60));
    super::print_result(&stored.result);
    println!("{}", "=".repeat(60));

    if with_trades {
        println!(
            "{:<20} {:<5} {:>12} {:>14} {:>10}",
            "Time", "Side", "Price", "Size", "Profit"
        );
        for trade in &stored.result.trades {
            println!(
                "{:<20} {:<5} {:>12.4} {:>14.6} {:>10.2}",
                trade.timestamp.format("%Y-%m-%d %H:%M"),
                trade.side.to_string(),
                trade.price,
                trade.size,
                trade.profit
            );
        }
    }

    Ok(())
}

pub fn delete(config_path: String, id: String) -> Result<()> {
    let store = open_store(&config_path)?;
    if store.delete(&id)? {
        info!("Deleted result {}", id);
        println!("Deleted {}", id);
    } else {
        println!("No result with id {}", id);
    }
    Ok(())
}
