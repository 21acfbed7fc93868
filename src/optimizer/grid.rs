//! Exhaustive grid search

use itertools::iproduct;
use tracing::debug;

use super::Evaluator;
use crate::config::{OptimizationConfig, ParamRange};
use crate::error::Result;

/// `steps` evenly spaced values from `min` to `max` inclusive; one step is `min`
pub(crate) fn linspace(range: &ParamRange, steps: u32) -> Vec<f64> {
    if steps <= 1 {
        return vec![range.min];
    }
    let last = (steps - 1) as f64;
    (0..steps)
        .map(|i| range.min + range.span() * i as f64 / last)
        .collect()
}

/// Evaluate every combination once, grid_size outermost and take_profit
/// innermost
pub(crate) async fn search(config: &OptimizationConfig, evaluator: &mut Evaluator<'_>) -> Result<()> {
    let [grid_size, spacing, positions, stop, take] = evaluator
        .bounds()
        .map(|range| linspace(&range, config.grid_steps));

    debug!(
        steps = config.grid_steps,
        combinations = grid_size.len() * spacing.len() * positions.len() * stop.len() * take.len(),
        "Grid axes built"
    );

    let points: Vec<[f64; 5]> = iproduct!(
        grid_size.iter(),
        spacing.iter(),
        positions.iter(),
        stop.iter(),
        take.iter()
    )
    .map(|(&g, &s, &m, &sl, &tp)| [g, s, m, sl, tp])
    .collect();

    for point in &points {
        evaluator.evaluate(point).await?;
    }

    Ok(())
}
