//! Gaussian-process regression with a Matern 5/2 kernel
//!
//! Targets are standardised before fitting and predictions are mapped back,
//! so the unit signal variance of the kernel matches any target scale.
//! Inputs are expected to be roughly unit-scaled.

use crate::error::{OptimizerError, Result};

/// Added to the kernel diagonal before factorising
pub const JITTER: f64 = 1e-6;

/// Length-scales tried by [`GaussianProcess::fit_best`]
pub const LENGTH_SCALES: [f64; 5] = [0.1, 0.2, 0.5, 1.0, 2.0];

fn matern52(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let r = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt();
    let s = 5f64.sqrt() * r / length_scale;
    (1.0 + s + s * s / 3.0) * (-s).exp()
}

/// Lower-triangular `L` with `L * L^T = a`
fn cholesky(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let dot: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = a[i][i] - dot;
                if !(d > 0.0) || !d.is_finite() {
                    return Err(OptimizerError::computation(format!(
                        "kernel matrix is not positive definite (pivot {} = {})",
                        i, d
                    )));
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (a[i][j] - dot) / l[j][j];
            }
        }
    }
    Ok(l)
}

/// Solve `L x = b`
fn solve_lower(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let dot: f64 = (0..i).map(|k| l[i][k] * x[k]).sum();
        x[i] = (b[i] - dot) / l[i][i];
    }
    x
}

/// Solve `L^T x = b`
fn solve_upper_transposed(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let dot: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (b[i] - dot) / l[i][i];
    }
    x
}

#[derive(Debug, Clone)]
pub struct GaussianProcess {
    inputs: Vec<Vec<f64>>,
    length_scale: f64,
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    y_mean: f64,
    y_std: f64,
    log_ml: f64,
}

impl GaussianProcess {
    /// Fit to `(inputs, targets)` with a fixed length-scale
    pub fn fit<P: AsRef<[f64]>>(inputs: &[P], targets: &[f64], length_scale: f64) -> Result<Self> {
        if inputs.is_empty() {
            return Err(OptimizerError::computation("cannot fit a GP to no points"));
        }
        if inputs.len() != targets.len() {
            return Err(OptimizerError::computation(format!(
                "{} inputs but {} targets",
                inputs.len(),
                targets.len()
            )));
        }
        if targets.iter().any(|t| !t.is_finite()) {
            return Err(OptimizerError::computation("GP targets must be finite"));
        }
        if !(length_scale > 0.0) {
            return Err(OptimizerError::computation("length-scale must be positive"));
        }

        let inputs: Vec<Vec<f64>> = inputs.iter().map(|p| p.as_ref().to_vec()).collect();
        let n = inputs.len();

        let y_mean = targets.iter().sum::<f64>() / n as f64;
        let variance = targets.iter().map(|t| (t - y_mean).powi(2)).sum::<f64>() / n as f64;
        let y_std = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let y: Vec<f64> = targets.iter().map(|t| (t - y_mean) / y_std).collect();

        let mut kernel = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let k = matern52(&inputs[i], &inputs[j], length_scale);
                kernel[i][j] = k;
                kernel[j][i] = k;
            }
            kernel[i][i] += JITTER;
        }

        let chol = cholesky(&kernel)?;
        let alpha = solve_upper_transposed(&chol, &solve_lower(&chol, &y));

        let data_fit: f64 = y.iter().zip(&alpha).map(|(a, b)| a * b).sum();
        let log_det: f64 = (0..n).map(|i| chol[i][i].ln()).sum();
        let log_ml =
            -0.5 * data_fit - log_det - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();

        Ok(GaussianProcess {
            inputs,
            length_scale,
            chol,
            alpha,
            y_mean,
            y_std,
            log_ml,
        })
    }

    /// Fit once per length-scale and keep the highest marginal likelihood.
    /// Scales that fail to factorise are skipped.
    pub fn fit_best<P: AsRef<[f64]>>(
        inputs: &[P],
        targets: &[f64],
        length_scales: &[f64],
    ) -> Result<Self> {
        let mut best: Option<GaussianProcess> = None;
        let mut last_err = None;

        for &scale in length_scales {
            match Self::fit(inputs, targets, scale) {
                Ok(gp) => {
                    let better = best
                        .as_ref()
                        .map_or(true, |b| gp.log_ml > b.log_ml);
                    if better {
                        best = Some(gp);
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }

        match (best, last_err) {
            (Some(gp), _) => Ok(gp),
            (None, Some(e)) => Err(e),
            (None, None) => Err(OptimizerError::computation("no length-scales to try")),
        }
    }

    /// Posterior mean and standard deviation at `point`, in target units
    pub fn predict(&self, point: &[f64]) -> (f64, f64) {
        let k_star: Vec<f64> = self
            .inputs
            .iter()
            .map(|x| matern52(x, point, self.length_scale))
            .collect();

        let mean: f64 = k_star.iter().zip(&self.alpha).map(|(k, a)| k * a).sum();
        let v = solve_lower(&self.chol, &k_star);
        let variance = (1.0 - v.iter().map(|x| x * x).sum::<f64>()).max(0.0);

        (
            mean * self.y_std + self.y_mean,
            variance.sqrt() * self.y_std,
        )
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_ml
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn points() -> (Vec<[f64; 2]>, Vec<f64>) {
        let x: Vec<[f64; 2]> = vec![[0.0, 0.0], [0.5, 0.2], [1.0, 1.0], [0.2, 0.8], [0.7, 0.5]];
        let y = x.iter().map(|p| (3.0_f64 * p[0]).sin() + p[1] * p[1]).collect();
        (x, y)
    }

    #[test]
    fn test_cholesky_reconstructs() {
        let a = vec![
            vec![4.0, 2.0, 0.4],
            vec![2.0, 5.0, 1.0],
            vec![0.4, 1.0, 3.0],
        ];
        let l = cholesky(&a).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|k| l[i][k] * l[j][k]).sum();
                assert_relative_eq!(v, a[i][j], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        let err = cholesky(&a).unwrap_err();
        assert!(matches!(err, OptimizerError::Computation(_)));
    }

    #[test]
    fn test_interpolates_training_points() {
        let (x, y) = points();
        let gp = GaussianProcess::fit(&x, &y, 0.5).unwrap();
        for (p, t) in x.iter().zip(&y) {
            let (mean, std) = gp.predict(p);
            assert_relative_eq!(mean, *t, epsilon = 1e-3);
            assert!(std < 1e-2);
        }
    }

    #[test]
    fn test_uncertainty_grows_away_from_data() {
        let (x, y) = points();
        let gp = GaussianProcess::fit(&x, &y, 0.3).unwrap();
        let (_, near) = gp.predict(&[0.5, 0.21]);
        let (_, far) = gp.predict(&[3.0, -2.0]);
        assert!(far > near);
    }

    #[test]
    fn test_fit_best_picks_max_likelihood() {
        let (x, y) = points();
        let best = GaussianProcess::fit_best(&x, &y, &LENGTH_SCALES).unwrap();
        for scale in LENGTH_SCALES {
            let gp = GaussianProcess::fit(&x, &y, scale).unwrap();
            assert!(best.log_marginal_likelihood() >= gp.log_marginal_likelihood());
        }
        assert!(best.log_marginal_likelihood().is_finite());
    }

    #[test]
    fn test_constant_targets() {
        let x = vec![[0.1], [0.4], [0.9]];
        let gp = GaussianProcess::fit(&x, &[2.0, 2.0, 2.0], 0.5).unwrap();
        let (mean, _) = gp.predict(&[0.5]);
        assert_relative_eq!(mean, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bad_input_is_computation_error() {
        let x: Vec<[f64; 1]> = Vec::new();
        assert!(GaussianProcess::fit(&x, &[], 0.5).is_err());
        assert!(GaussianProcess::fit(&[[0.0]], &[f64::NAN], 0.5).is_err());
        assert!(GaussianProcess::fit(&[[0.0]], &[1.0, 2.0], 0.5).is_err());
    }
}
