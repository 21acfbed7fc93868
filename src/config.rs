//! Configuration management
//!
//! Two documents drive the optimizer: the application config (where market
//! data comes from, where results go, fee model) and the optimization job
//! config (symbol, window, parameter ranges, search method). Both are JSON.
//! The application config also honours a few environment overrides, read
//! after `.env` has been loaded.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::backtest::GridParameters;
use crate::error::OptimizerError;

// =============================================================================
// Application config
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data: DataConfig::default(),
            results_dir: default_results_dir(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let mut config = AppConfig::default();
            config.apply_env_overrides()?;
            Ok(config)
        }
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("OPTIMIZER_DATA_DIR") {
            self.data.data_dir = dir;
        }
        if let Ok(dir) = std::env::var("OPTIMIZER_RESULTS_DIR") {
            self.results_dir = dir;
        }
        if let Ok(source) = std::env::var("OPTIMIZER_DATA_SOURCE") {
            self.data.source = source
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid OPTIMIZER_DATA_SOURCE")?;
        }
        Ok(())
    }
}

/// Where candles come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Csv,
    Binance,
}

impl std::str::FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(DataSource::Csv),
            "binance" => Ok(DataSource::Binance),
            _ => Err(format!("Unknown data source: {}. Use 'csv' or 'binance'", s)),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Csv => write!(f, "csv"),
            DataSource::Binance => write!(f, "binance"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub source: DataSource,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Write candles fetched from the exchange back to `data_dir`
    #[serde(default = "default_true")]
    pub cache: bool,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            source: DataSource::Csv,
            data_dir: default_data_dir(),
            cache: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    /// Annualization factor for the Sharpe ratio (crypto trades every day)
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

fn default_fee_rate() -> f64 {
    0.001
}

fn default_periods_per_year() -> f64 {
    365.0
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            fee_rate: default_fee_rate(),
            periods_per_year: default_periods_per_year(),
        }
    }
}

// =============================================================================
// Optimization job config
// =============================================================================

/// Inclusive bounds for one tunable parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub fn new(min: f64, max: f64) -> Self {
        ParamRange { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// The five tunable ranges of the grid strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRanges {
    /// Number of buy levels below the anchor (integer)
    pub grid_size: ParamRange,
    /// Distance between levels as a fraction of the anchor price
    pub grid_spacing: ParamRange,
    /// Concurrent open positions (integer)
    pub max_positions: ParamRange,
    pub stop_loss: ParamRange,
    pub take_profit: ParamRange,
}

impl ParameterRanges {
    /// Names in search-vector order
    pub const NAMES: [&'static str; 5] = [
        "grid_size",
        "grid_spacing",
        "max_positions",
        "stop_loss",
        "take_profit",
    ];

    /// Which dimensions are integer-valued, in search-vector order
    pub const INTEGER: [bool; 5] = [true, false, true, false, false];

    /// Upper bound for `grid_size` and `max_positions`
    pub const MAX_INTEGER_VALUE: f64 = 10_000.0;

    pub fn as_array(&self) -> [ParamRange; 5] {
        [
            self.grid_size,
            self.grid_spacing,
            self.max_positions,
            self.stop_loss,
            self.take_profit,
        ]
    }

    /// Clamp a search vector into bounds and round the integer dimensions
    pub fn realize(&self, vector: &[f64; 5]) -> GridParameters {
        let mut v = [0.0; 5];
        for (i, range) in self.as_array().iter().enumerate() {
            let x = if vector[i].is_nan() {
                range.min
            } else {
                vector[i].clamp(range.min, range.max)
            };
            v[i] = if Self::INTEGER[i] {
                let lo = range.min.ceil();
                x.round().clamp(lo, range.max.floor().max(lo)).max(1.0)
            } else {
                x
            };
        }

        GridParameters {
            grid_size: v[0] as u32,
            grid_spacing: v[1],
            max_positions: v[2] as u32,
            stop_loss: v[3],
            take_profit: v[4],
        }
    }

    fn validate(&self) -> Result<(), OptimizerError> {
        for ((name, range), integer) in Self::NAMES
            .iter()
            .zip(self.as_array())
            .zip(Self::INTEGER)
        {
            if !range.min.is_finite() || !range.max.is_finite() {
                return Err(OptimizerError::validation(format!(
                    "{} range must be finite",
                    name
                )));
            }
            if range.min > range.max {
                return Err(OptimizerError::validation(format!(
                    "{} range min ({}) exceeds max ({})",
                    name, range.min, range.max
                )));
            }
            if integer {
                if range.min < 1.0 {
                    return Err(OptimizerError::validation(format!(
                        "{} must be at least 1",
                        name
                    )));
                }
                if range.max > Self::MAX_INTEGER_VALUE {
                    return Err(OptimizerError::validation(format!(
                        "{} must not exceed {}",
                        name,
                        Self::MAX_INTEGER_VALUE
                    )));
                }
                if range.min.fract() != 0.0 || range.max.fract() != 0.0 {
                    return Err(OptimizerError::validation(format!(
                        "{} bounds must be whole numbers",
                        name
                    )));
                }
            } else if range.min <= 0.0 || range.max >= 1.0 {
                return Err(OptimizerError::validation(format!(
                    "{} must lie strictly between 0 and 1",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    #[default]
    Grid,
    Genetic,
    Bayesian,
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMethod::Grid => write!(f, "grid"),
            SearchMethod::Genetic => write!(f, "genetic"),
            SearchMethod::Bayesian => write!(f, "bayesian"),
        }
    }
}

impl std::str::FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grid" => Ok(SearchMethod::Grid),
            "genetic" | "de" => Ok(SearchMethod::Genetic),
            "bayesian" | "bayes" => Ok(SearchMethod::Bayesian),
            _ => Err(format!(
                "Unknown search method: {}. Use 'grid', 'genetic' or 'bayesian'",
                s
            )),
        }
    }
}

/// Metric that ranks backtests; every search maximises its score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    TotalProfit,
    SharpeRatio,
    WinRate,
    AvgProfit,
    /// Minimised: the score is the negated drawdown
    MaxDrawdown,
}

impl std::fmt::Display for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Objective::TotalProfit => "total_profit",
            Objective::SharpeRatio => "sharpe_ratio",
            Objective::WinRate => "win_rate",
            Objective::AvgProfit => "avg_profit",
            Objective::MaxDrawdown => "max_drawdown",
        };
        write!(f, "{}", s)
    }
}

/// Everything a job needs. Never mutated once the job has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_balance: f64,
    pub parameter_ranges: ParameterRanges,
    #[serde(default)]
    pub method: SearchMethod,
    #[serde(default)]
    pub objective: Objective,
    #[serde(default = "default_grid_steps")]
    pub grid_steps: u32,
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_bayesian_initial_points")]
    pub bayesian_initial_points: usize,
    #[serde(default = "default_bayesian_iterations")]
    pub bayesian_iterations: usize,
    #[serde(default = "default_bayesian_candidates")]
    pub bayesian_candidates: usize,
}

fn default_grid_steps() -> u32 {
    5
}

fn default_population_size() -> usize {
    15
}

fn default_generations() -> usize {
    20
}

fn default_seed() -> u64 {
    42
}

fn default_bayesian_initial_points() -> usize {
    10
}

fn default_bayesian_iterations() -> usize {
    100
}

fn default_bayesian_candidates() -> usize {
    100
}

impl OptimizationConfig {
    /// Build a config with default search knobs
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_balance: f64,
        parameter_ranges: ParameterRanges,
        method: SearchMethod,
    ) -> Self {
        OptimizationConfig {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            start,
            end,
            initial_balance,
            parameter_ranges,
            method,
            objective: Objective::default(),
            grid_steps: default_grid_steps(),
            population_size: default_population_size(),
            generations: default_generations(),
            seed: default_seed(),
            bayesian_initial_points: default_bayesian_initial_points(),
            bayesian_iterations: default_bayesian_iterations(),
            bayesian_candidates: default_bayesian_candidates(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse job JSON")
    }

    pub fn validate(&self) -> Result<(), OptimizerError> {
        if self.symbol.trim().is_empty() {
            return Err(OptimizerError::validation("symbol must not be empty"));
        }
        if self.timeframe.trim().is_empty() {
            return Err(OptimizerError::validation("timeframe must not be empty"));
        }
        if self.start >= self.end {
            return Err(OptimizerError::validation(format!(
                "start ({}) must be before end ({})",
                self.start, self.end
            )));
        }
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(OptimizerError::validation(
                "initial_balance must be positive",
            ));
        }
        self.parameter_ranges.validate()?;

        match self.method {
            SearchMethod::Grid if self.grid_steps == 0 => {
                return Err(OptimizerError::validation("grid_steps must be at least 1"));
            }
            SearchMethod::Genetic if self.population_size < 4 => {
                return Err(OptimizerError::validation(
                    "population_size must be at least 4",
                ));
            }
            SearchMethod::Genetic if self.generations == 0 => {
                return Err(OptimizerError::validation("generations must be at least 1"));
            }
            SearchMethod::Bayesian if self.bayesian_initial_points == 0 => {
                return Err(OptimizerError::validation(
                    "bayesian_initial_points must be at least 1",
                ));
            }
            SearchMethod::Bayesian if self.bayesian_candidates == 0 => {
                return Err(OptimizerError::validation(
                    "bayesian_candidates must be at least 1",
                ));
            }
            _ => {}
        }

        Ok(())
    }
}
