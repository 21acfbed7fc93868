//! Symbols command: list what the configured data source can serve

use anyhow::Result;
use strategy_optimizer::data::provider_from_config;
use strategy_optimizer::AppConfig;
use tracing::info;

pub fn run(config_path: String) -> Result<()> {
    let app = AppConfig::load_or_default(&config_path)?;

    let rt = tokio::runtime::Runtime::new()?;
    let symbols = rt.block_on(async { provider_from_config(&app)?.get_symbols().await })?;

    let mut symbols: Vec<String> = symbols.into_iter().collect();
    symbols.sort();
    info!("{} symbols available from {}", symbols.len(), app.data.source);

    for symbol in &symbols {
        println!("{}", symbol);
    }
    Ok(())
}
