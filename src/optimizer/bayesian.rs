//! Bayesian search with a GP surrogate
//!
//! The surrogate models the negated score over the unit cube, so lower is
//! better and the next point is the random candidate with the smallest
//! lower confidence bound `mean - KAPPA * std`.

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::gp::{GaussianProcess, LENGTH_SCALES};
use super::{denormalize, Evaluator, ParameterVector};
use crate::config::OptimizationConfig;
use crate::error::{OptimizerError, Result};

/// Exploration weight of the confidence bound
const KAPPA: f64 = 2.0;

fn random_unit(rng: &mut StdRng) -> ParameterVector {
    let mut v = [0.0; 5];
    for x in v.iter_mut() {
        *x = rng.gen::<f64>();
    }
    v
}

/// Candidate with the lowest confidence bound under `gp`
fn propose(gp: &GaussianProcess, rng: &mut StdRng, candidates: usize) -> Result<ParameterVector> {
    (0..candidates)
        .map(|_| random_unit(rng))
        .map(|c| {
            let (mean, std) = gp.predict(&c);
            (c, mean - KAPPA * std)
        })
        .filter(|(_, lcb)| lcb.is_finite())
        .min_by_key(|(_, lcb)| OrderedFloat(*lcb))
        .map(|(c, _)| c)
        .ok_or_else(|| OptimizerError::computation("surrogate produced no usable candidate"))
}

pub(crate) async fn search(config: &OptimizationConfig, evaluator: &mut Evaluator<'_>) -> Result<()> {
    let bounds = evaluator.bounds();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut observed: Vec<ParameterVector> = Vec::new();
    let mut targets: Vec<f64> = Vec::new();

    for _ in 0..config.bayesian_initial_points {
        let unit = random_unit(&mut rng);
        let score = evaluator.evaluate(&denormalize(&unit, &bounds)).await?;
        observed.push(unit);
        targets.push(-score);
    }

    for round in 1..=config.bayesian_iterations {
        let gp = GaussianProcess::fit_best(&observed, &targets, &LENGTH_SCALES)?;
        let next = propose(&gp, &mut rng, config.bayesian_candidates)?;

        let score = evaluator.evaluate(&denormalize(&next, &bounds)).await?;
        debug!(
            round,
            length_scale = gp.length_scale(),
            score,
            "Surrogate proposal evaluated"
        );

        observed.push(next);
        targets.push(-score);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchMethod;
    use crate::optimizer::test_support::{config, run_recorded, wave_candles};

    #[test]
    fn test_propose_prefers_low_mean() {
        // Falls towards the far corner of the cube
        let x: Vec<ParameterVector> = vec![
            [0.0; 5],
            [0.25; 5],
            [0.5; 5],
            [0.75; 5],
            [1.0; 5],
        ];
        let y = vec![4.0, 3.0, 2.0, 1.0, 0.0];
        let gp = GaussianProcess::fit(&x, &y, 1.0).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let pick = propose(&gp, &mut rng, 200).unwrap();
        let (picked_mean, _) = gp.predict(&pick);
        let (origin_mean, _) = gp.predict(&[0.0; 5]);
        assert!(picked_mean < origin_mean);
    }

    #[test]
    fn test_propose_needs_candidates() {
        let gp = GaussianProcess::fit(&[[0.5; 5]], &[1.0], 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(propose(&gp, &mut rng, 0).is_err());
    }

    #[tokio::test]
    async fn test_reproducible_for_seed() {
        let candles = wave_candles(100);
        let mut cfg = config(SearchMethod::Bayesian);
        cfg.bayesian_initial_points = 3;
        cfg.bayesian_iterations = 3;
        cfg.bayesian_candidates = 20;

        let (_, a) = run_recorded(&cfg, &candles).await;
        let (_, b) = run_recorded(&cfg, &candles).await;
        assert_eq!(a.parameters, b.parameters);
        assert_eq!(a.iterations.len(), 6);
    }
}
