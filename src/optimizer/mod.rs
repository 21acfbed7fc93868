//! Parameter search over the grid strategy
//!
//! Three strategies explore the same five-dimensional box:
//! - `grid`: exhaustive linspace product
//! - `genetic`: differential evolution
//! - `bayesian`: Gaussian-process surrogate with a lower-confidence-bound pick
//!
//! All of them drive an [`Evaluator`], which realizes a raw vector into
//! [`GridParameters`], runs the backtest, reports to a [`SearchObserver`] and
//! keeps the best result seen so far.

mod bayesian;
mod genetic;
pub mod gp;
mod grid;

pub use gp::GaussianProcess;

use std::collections::HashMap;
use tracing::{debug, info};

use crate::backtest::{BacktestResult, Backtester, GridParameters};
use crate::config::{Objective, OptimizationConfig, ParamRange, ParameterRanges, SearchMethod};
use crate::error::Result;
use crate::Candle;

/// Raw search point in the order grid_size, grid_spacing, max_positions,
/// stop_loss, take_profit
pub type ParameterVector = [f64; 5];

impl Objective {
    /// Higher is better for every objective
    pub fn score(&self, result: &BacktestResult) -> f64 {
        match self {
            Objective::TotalProfit => result.total_profit,
            Objective::SharpeRatio => result.sharpe_ratio,
            Objective::WinRate => result.win_rate,
            Objective::AvgProfit => result.avg_profit,
            Objective::MaxDrawdown => -result.max_drawdown,
        }
    }
}

/// Receives every evaluation of a running search
pub trait SearchObserver: Send {
    /// `iteration` is 1-based and never exceeds the search's total
    fn on_evaluation(&mut self, iteration: u64, result: &BacktestResult);

    /// Called before `on_evaluation` when `result` became the new best
    fn on_new_best(&mut self, _result: &BacktestResult) {}
}

impl SearchObserver for () {
    fn on_evaluation(&mut self, _iteration: u64, _result: &BacktestResult) {}
}

/// Keeps the single best result. Only a strictly greater score replaces it,
/// so the first of equally scored results wins.
#[derive(Debug, Clone)]
pub struct BestTracker {
    objective: Objective,
    best: Option<(f64, BacktestResult)>,
}

impl BestTracker {
    pub fn new(objective: Objective) -> Self {
        BestTracker {
            objective,
            best: None,
        }
    }

    /// Returns true when `result` became the new best
    pub fn offer(&mut self, result: &BacktestResult) -> bool {
        let score = self.objective.score(result);
        let improved = match &self.best {
            None => !score.is_nan(),
            Some((best, _)) => score > *best,
        };
        if improved {
            self.best = Some((score, result.clone()));
        }
        improved
    }

    pub fn best(&self) -> Option<&BacktestResult> {
        self.best.as_ref().map(|(_, r)| r)
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|(s, _)| *s)
    }

    pub fn into_best(self) -> Option<BacktestResult> {
        self.best.map(|(_, r)| r)
    }
}

/// Number of evaluations `run_search` will perform for `config`
pub fn total_iterations(config: &OptimizationConfig) -> u64 {
    match config.method {
        SearchMethod::Grid => (config.grid_steps as u64).saturating_pow(5),
        SearchMethod::Genetic => {
            (config.population_size as u64).saturating_mul(config.generations as u64 + 1)
        }
        SearchMethod::Bayesian => {
            (config.bayesian_initial_points + config.bayesian_iterations) as u64
        }
    }
}

/// Runs backtests for a search and tracks progress and the best result
pub struct Evaluator<'a> {
    candles: &'a [Candle],
    initial_balance: f64,
    ranges: ParameterRanges,
    objective: Objective,
    backtester: Backtester,
    observer: &'a mut dyn SearchObserver,
    best: BestTracker,
    iteration: u64,
    /// Results by realized parameter set; rounding maps many raw points to one
    memo: HashMap<[u64; 5], BacktestResult>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        config: &OptimizationConfig,
        candles: &'a [Candle],
        backtester: Backtester,
        observer: &'a mut dyn SearchObserver,
    ) -> Self {
        Evaluator {
            candles,
            initial_balance: config.initial_balance,
            ranges: config.parameter_ranges,
            objective: config.objective,
            backtester,
            observer,
            best: BestTracker::new(config.objective),
            iteration: 0,
            memo: HashMap::new(),
        }
    }

    pub fn bounds(&self) -> [ParamRange; 5] {
        self.ranges.as_array()
    }

    pub fn realize(&self, vector: &ParameterVector) -> GridParameters {
        self.ranges.realize(vector)
    }

    /// Backtest one point and return its score. A parameter set already
    /// seen is answered from memory but still counts as an iteration.
    /// Yields to the runtime afterwards so a cancelled job stops here.
    pub async fn evaluate(&mut self, vector: &ParameterVector) -> Result<f64> {
        let params = self.realize(vector);
        let key = params.to_vector().map(f64::to_bits);
        let result = match self.memo.get(&key) {
            Some(result) => result.clone(),
            None => {
                let result = self.backtester.run(self.candles, self.initial_balance, &params)?;
                self.memo.insert(key, result.clone());
                result
            }
        };
        let score = self.objective.score(&result);

        self.iteration += 1;
        if self.best.offer(&result) {
            debug!(iteration = self.iteration, score, %params, "New best");
            self.observer.on_new_best(&result);
        }
        self.observer.on_evaluation(self.iteration, &result);

        tokio::task::yield_now().await;
        Ok(score)
    }

    pub fn iterations(&self) -> u64 {
        self.iteration
    }

    /// Distinct parameter sets actually backtested
    pub fn backtests(&self) -> usize {
        self.memo.len()
    }

    pub fn best(&self) -> Option<&BacktestResult> {
        self.best.best()
    }

    pub fn into_best(self) -> Option<BacktestResult> {
        self.best.into_best()
    }
}

/// Run the configured search to completion and return its best result
pub async fn run_search(
    config: &OptimizationConfig,
    mut evaluator: Evaluator<'_>,
) -> Result<Option<BacktestResult>> {
    info!(
        method = %config.method,
        objective = %config.objective,
        total = total_iterations(config),
        "Starting search"
    );

    match config.method {
        SearchMethod::Grid => grid::search(config, &mut evaluator).await?,
        SearchMethod::Genetic => genetic::search(config, &mut evaluator).await?,
        SearchMethod::Bayesian => bayesian::search(config, &mut evaluator).await?,
    }

    info!(
        evaluations = evaluator.iterations(),
        best_score = evaluator.best.best_score(),
        "Search finished"
    );
    Ok(evaluator.into_best())
}

/// Map a unit-cube point into the search box
fn denormalize(unit: &ParameterVector, bounds: &[ParamRange; 5]) -> ParameterVector {
    let mut v = [0.0; 5];
    for (i, range) in bounds.iter().enumerate() {
        v[i] = range.min + unit[i] * range.span();
    }
    v
}

fn clamp_to(vector: &mut ParameterVector, bounds: &[ParamRange; 5]) {
    for (x, range) in vector.iter_mut().zip(bounds) {
        *x = x.clamp(range.min, range.max);
    }
}
