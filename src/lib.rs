//! Strategy Parameter Optimizer
//!
//! Searches the parameter space of a grid-trading strategy against historical
//! market data. Three search methods (exhaustive grid, differential
//! evolution, Gaussian-process Bayesian search) run as background jobs whose
//! progress and best-so-far result can be polled; finished jobs persist their
//! best result as JSON.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strategy_optimizer::{
//!     backtest::BacktestSettings, data::CsvDataProvider, manager::OptimizationManager,
//!     store::ResultStore, OptimizationConfig,
//! };
//!
//! # async fn demo(config: OptimizationConfig) -> anyhow::Result<()> {
//! let manager = OptimizationManager::new(
//!     Arc::new(CsvDataProvider::new("data")),
//!     ResultStore::new("results"),
//!     BacktestSettings::default(),
//! );
//! let job_id = manager.start(config)?;
//! let status = manager.wait(job_id).await;
//! # Ok(())
//! # }
//! ```

pub mod backtest;
pub mod binance;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod manager;
pub mod optimizer;
pub mod signals;
pub mod store;
pub mod types;

pub use config::{AppConfig, OptimizationConfig};
pub use error::OptimizerError;
pub use types::*;
