//! Grid-trading backtest engine
//!
//! Walks a candle series once and simulates a long-only grid:
//!
//! 1. The first close is the anchor. Buy levels sit at
//!    `anchor * (1 - k * grid_spacing)` for `k = 1..=grid_size`.
//! 2. On every candle, open positions are checked first: the stop loss is
//!    tested before the take profit, so a candle touching both counts as a
//!    loss. A level closed on a candle cannot be re-entered on that candle.
//! 3. Free levels the candle's low reaches are bought (nearest first) while
//!    fewer than `max_positions` are open. Each level gets
//!    `initial_balance / grid_size` of quote, capped by available cash.
//! 4. With nothing open and the close above `anchor * (1 + grid_spacing)`,
//!    the grid re-anchors on that close.
//!
//! Entries fill at the level price, exits at the stop or target price.
//! Fees are charged on both legs.
//! Positions still open after the last candle are closed at its close.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::sync::Arc;
use tracing::debug;

use crate::config::{BacktestConfig, ParameterRanges};
use crate::data::MarketDataProvider;
use crate::error::{OptimizerError, Result};
use crate::{Candle, EquityPoint, Side, Trade};

/// Smallest quote amount worth opening a position with
const MIN_NOTIONAL: f64 = 1e-8;

/// A realized parameter set for the grid strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParameters {
    pub grid_size: u32,
    pub grid_spacing: f64,
    pub max_positions: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl GridParameters {
    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 {
            return Err(OptimizerError::validation("grid_size must be at least 1"));
        }
        if self.max_positions == 0 {
            return Err(OptimizerError::validation(
                "max_positions must be at least 1",
            ));
        }
        for (name, value) in [
            ("grid_size", self.grid_size),
            ("max_positions", self.max_positions),
        ] {
            if value as f64 > ParameterRanges::MAX_INTEGER_VALUE {
                return Err(OptimizerError::validation(format!(
                    "{} must not exceed {}, got {}",
                    name,
                    ParameterRanges::MAX_INTEGER_VALUE,
                    value
                )));
            }
        }
        for (name, value) in [
            ("grid_spacing", self.grid_spacing),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(OptimizerError::validation(format!(
                    "{} must lie strictly between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Values in search-vector order
    pub fn to_vector(&self) -> [f64; 5] {
        [
            self.grid_size as f64,
            self.grid_spacing,
            self.max_positions as f64,
            self.stop_loss,
            self.take_profit,
        ]
    }
}

impl std::fmt::Display for GridParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "grid_size={}, grid_spacing={:.4}, max_positions={}, stop_loss={:.4}, take_profit={:.4}",
            self.grid_size, self.grid_spacing, self.max_positions, self.stop_loss, self.take_profit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    /// Charged on the notional of every fill
    pub fee_rate: f64,
    /// Sharpe annualization factor
    pub periods_per_year: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        BacktestSettings::from(&BacktestConfig::default())
    }
}

impl From<&BacktestConfig> for BacktestSettings {
    fn from(config: &BacktestConfig) -> Self {
        BacktestSettings {
            fee_rate: config.fee_rate,
            periods_per_year: config.periods_per_year,
        }
    }
}

/// Outcome of one backtest. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub parameters: GridParameters,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_profit: f64,
    /// Percentage of closing trades with positive profit
    pub win_rate: f64,
    /// Closing trades
    pub total_trades: usize,
    pub avg_profit: f64,
    /// Percent
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
}

impl BacktestResult {
    fn empty(parameters: GridParameters, initial_balance: f64) -> Self {
        BacktestResult {
            parameters,
            initial_balance,
            final_balance: initial_balance,
            total_profit: 0.0,
            win_rate: 0.0,
            total_trades: 0,
            avg_profit: 0.0,
            max_drawdown: 0.0,
            sharpe_ratio: 0.0,
            equity_curve: Vec::new(),
            trades: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct OpenPosition {
    level: usize,
    entry_price: f64,
    size: f64,
    /// Entry notional plus entry fee
    cost: f64,
    stop_price: f64,
    target_price: f64,
}

/// Mutable state of one simulation run
struct Simulation<'a> {
    params: &'a GridParameters,
    settings: &'a BacktestSettings,
    initial_balance: f64,
    cash: f64,
    realized: f64,
    levels: Vec<f64>,
    occupied: Vec<bool>,
    positions: Vec<OpenPosition>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    returns: Vec<f64>,
}

impl<'a> Simulation<'a> {
    fn new(
        params: &'a GridParameters,
        settings: &'a BacktestSettings,
        initial_balance: f64,
        anchor: f64,
    ) -> Self {
        let mut sim = Simulation {
            params,
            settings,
            initial_balance,
            cash: initial_balance,
            realized: initial_balance,
            levels: Vec::new(),
            occupied: Vec::new(),
            positions: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            returns: Vec::new(),
        };
        sim.anchor_at(anchor);
        sim
    }

    fn anchor_at(&mut self, anchor: f64) {
        self.levels = (1..=self.params.grid_size)
            .map(|k| anchor * (1.0 - k as f64 * self.params.grid_spacing))
            .filter(|&price| price > 0.0)
            .collect();
        self.occupied = vec![false; self.levels.len()];
    }

    fn step(&mut self, candle: &Candle) {
        let closed_levels = self.check_exits(candle);
        self.check_entries(candle, &closed_levels);

        let reanchor_above = self.anchor() * (1.0 + self.params.grid_spacing);
        if self.positions.is_empty() && candle.close > reanchor_above {
            self.anchor_at(candle.close);
        }
    }

    /// Current anchor, recovered from the first level
    fn anchor(&self) -> f64 {
        match self.levels.first() {
            Some(first) => first / (1.0 - self.params.grid_spacing),
            None => f64::INFINITY,
        }
    }

    fn check_exits(&mut self, candle: &Candle) -> Vec<usize> {
        let mut closed = Vec::new();
        let mut still_open = Vec::with_capacity(self.positions.len());

        for pos in std::mem::take(&mut self.positions) {
            let exit_price = if candle.low <= pos.stop_price {
                Some(pos.stop_price)
            } else if candle.high >= pos.target_price {
                Some(pos.target_price)
            } else {
                None
            };

            match exit_price {
                Some(price) => {
                    closed.push(pos.level);
                    self.close(pos, price, candle.datetime);
                }
                None => still_open.push(pos),
            }
        }

        self.positions = still_open;
        closed
    }

    fn check_entries(&mut self, candle: &Candle, closed_levels: &[usize]) {
        let budget_per_level = self.initial_balance / self.params.grid_size as f64;

        for level in 0..self.levels.len() {
            if self.positions.len() >= self.params.max_positions as usize {
                break;
            }
            let level_price = self.levels[level];
            if self.occupied[level] || closed_levels.contains(&level) || candle.low > level_price {
                continue;
            }

            let budget = budget_per_level.min(self.cash);
            if budget < MIN_NOTIONAL {
                break;
            }

            let entry_price = level_price;
            let size = budget / (entry_price * (1.0 + self.settings.fee_rate));
            let notional = size * entry_price;
            let cost = notional * (1.0 + self.settings.fee_rate);

            self.cash -= cost;
            self.occupied[level] = true;
            self.trades.push(Trade {
                timestamp: candle.datetime,
                side: Side::Buy,
                price: entry_price,
                size,
                profit: 0.0,
            });
            self.positions.push(OpenPosition {
                level,
                entry_price,
                size,
                cost,
                stop_price: entry_price * (1.0 - self.params.stop_loss),
                target_price: entry_price * (1.0 + self.params.take_profit),
            });
        }
    }

    fn close(&mut self, pos: OpenPosition, exit_price: f64, timestamp: DateTime<Utc>) {
        let proceeds = pos.size * exit_price * (1.0 - self.settings.fee_rate);
        let profit = proceeds - pos.cost;

        self.cash += proceeds;
        self.realized += profit;
        if let Some(slot) = self.occupied.get_mut(pos.level) {
            *slot = false;
        }

        self.trades.push(Trade {
            timestamp,
            side: Side::Sell,
            price: exit_price,
            size: pos.size,
            profit,
        });
        self.returns.push(profit / pos.cost);
        self.equity_curve.push(EquityPoint {
            timestamp,
            equity: self.realized,
        });

        debug!(
            entry = pos.entry_price,
            exit = exit_price,
            profit,
            "Position closed"
        );
    }

    fn close_all(&mut self, last: &Candle) {
        for pos in std::mem::take(&mut self.positions) {
            self.close(pos, last.close, last.datetime);
        }
    }

    fn finish(self) -> BacktestResult {
        let closing: Vec<f64> = self
            .trades
            .iter()
            .filter(|t| t.side == Side::Sell)
            .map(|t| t.profit)
            .collect();
        let total_trades = closing.len();
        let total_profit = self.realized - self.initial_balance;

        let (win_rate, avg_profit) = if total_trades > 0 {
            let wins = closing.iter().filter(|&&p| p > 0.0).count();
            (
                wins as f64 / total_trades as f64 * 100.0,
                total_profit / total_trades as f64,
            )
        } else {
            (0.0, 0.0)
        };

        BacktestResult {
            parameters: *self.params,
            initial_balance: self.initial_balance,
            final_balance: self.realized,
            total_profit,
            win_rate,
            total_trades,
            avg_profit,
            max_drawdown: max_drawdown(&self.equity_curve),
            sharpe_ratio: sharpe_ratio(&self.returns, self.settings.periods_per_year),
            equity_curve: self.equity_curve,
            trades: self.trades,
        }
    }
}

/// Annualized mean/std of per-trade returns. 0 for fewer than two returns
/// or zero variance.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().mean();
    let std_dev = returns.iter().std_dev();
    if !std_dev.is_finite() || std_dev <= f64::EPSILON {
        return 0.0;
    }
    mean / std_dev * periods_per_year.sqrt()
}

/// Largest peak-to-trough decline of the equity curve, in percent.
/// The peak starts at the first point, so fewer than two points give 0.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let Some(first) = equity_curve.first() else {
        return 0.0;
    };

    let mut peak = first.equity;
    let mut max_dd: f64 = 0.0;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
        }
    }
    max_dd * 100.0
}

/// Pure, synchronous grid backtester
#[derive(Debug, Clone, Copy, Default)]
pub struct Backtester {
    settings: BacktestSettings,
}

impl Backtester {
    pub fn new(settings: BacktestSettings) -> Self {
        Backtester { settings }
    }

    pub fn settings(&self) -> &BacktestSettings {
        &self.settings
    }

    /// Simulate `params` over `candles`.
    ///
    /// Empty input yields zeroed metrics. Invalid parameters, a non-positive
    /// balance or a malformed candle are validation errors.
    pub fn run(
        &self,
        candles: &[Candle],
        initial_balance: f64,
        params: &GridParameters,
    ) -> Result<BacktestResult> {
        params.validate()?;
        if !(initial_balance.is_finite() && initial_balance > 0.0) {
            return Err(OptimizerError::validation(format!(
                "initial balance must be positive, got {}",
                initial_balance
            )));
        }

        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            return Ok(BacktestResult::empty(*params, initial_balance));
        };

        let mut sim = Simulation::new(params, &self.settings, initial_balance, first.close);
        for (idx, candle) in candles.iter().enumerate() {
            candle.validate().map_err(|e| {
                OptimizerError::validation(format!("malformed candle at index {}: {}", idx, e))
            })?;
            sim.step(candle);
        }
        sim.close_all(last);

        Ok(sim.finish())
    }
}

/// Backtester bound to a market data source
#[derive(Clone)]
pub struct BacktestRunner {
    provider: Arc<dyn MarketDataProvider>,
    backtester: Backtester,
}

impl BacktestRunner {
    pub fn new(provider: Arc<dyn MarketDataProvider>, settings: BacktestSettings) -> Self {
        BacktestRunner {
            provider,
            backtester: Backtester::new(settings),
        }
    }

    pub fn backtester(&self) -> &Backtester {
        &self.backtester
    }

    /// Run over candles already in hand
    pub fn simulate(
        &self,
        candles: &[Candle],
        initial_balance: f64,
        params: &GridParameters,
    ) -> Result<BacktestResult> {
        self.backtester.run(candles, initial_balance, params)
    }

    /// Fetch the window and run one backtest over it
    pub async fn run(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_balance: f64,
        params: &GridParameters,
    ) -> Result<BacktestResult> {
        if start >= end {
            return Err(OptimizerError::validation(format!(
                "start ({}) must be before end ({})",
                start, end
            )));
        }

        let candles = self
            .provider
            .get_historical_data(symbol, timeframe, start, end)
            .await
            .map_err(|e| OptimizerError::DataFetch(format!("{:#}", e)))?;

        self.simulate(&candles, initial_balance, params)
    }
}
