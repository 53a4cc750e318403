//! Maximum-likelihood estimation for [`LogDensityModel`]s.
//!
//! Minimizes the NLL with the L-BFGS wrapper, then derives uncertainties
//! from a finite-difference Hessian of the gradient (inverted via damped
//! Cholesky into a covariance matrix).

use crate::optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizerConfig};
use mp_core::traits::LogDensityModel;
use mp_core::{FitResult, Result};
use nalgebra::DMatrix;

/// Maximum likelihood estimator.
///
/// Fits statistical models by minimizing negative log-likelihood.
#[derive(Clone, Default)]
pub struct MaximumLikelihoodEstimator {
    config: OptimizerConfig,
}

struct ModelObjective<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
}

impl<M: LogDensityModel + ?Sized> ObjectiveFunction for ModelObjective<'_, M> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.model.nll(params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.model.grad_nll(params)
    }
}

impl MaximumLikelihoodEstimator {
    /// Create a new estimator with default optimizer configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an estimator with a custom optimizer configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Fit `model` by minimizing its NLL; uncertainties from the Hessian.
    pub fn fit<M: LogDensityModel>(&self, model: &M) -> Result<FitResult> {
        let objective = ModelObjective { model };
        let optimizer = LbfgsOptimizer::new(self.config.clone());
        let opt = optimizer.minimize(&objective, &model.parameter_init(), &model.parameter_bounds())?;

        let n = opt.parameters.len();
        let hessian = self.compute_hessian(model, &opt.parameters)?;
        let diag_uncertainties = diagonal_uncertainties(&hessian, n);

        let names = model.parameter_names();
        let fr = match invert_hessian(&hessian, n) {
            Some(covariance) => {
                let mut all_ok = true;
                let mut uncertainties = Vec::with_capacity(n);
                for i in 0..n {
                    let var = covariance[(i, i)];
                    if var.is_finite() && var > 0.0 {
                        uncertainties.push(var.sqrt());
                    } else {
                        all_ok = false;
                        uncertainties.push(diag_uncertainties[i]);
                    }
                }
                let base = FitResult::new(
                    names,
                    opt.parameters,
                    uncertainties,
                    opt.fval,
                    opt.converged,
                    opt.n_iter as usize,
                    opt.message,
                );
                if all_ok {
                    base.with_covariance(covariance.iter().copied().collect())
                } else {
                    log::warn!("invalid covariance diagonal; omitting covariance matrix");
                    base
                }
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                FitResult::new(
                    names,
                    opt.parameters,
                    diag_uncertainties,
                    opt.fval,
                    opt.converged,
                    opt.n_iter as usize,
                    opt.message,
                )
            }
        };

        Ok(fr)
    }

    /// Hessian via forward differences of the gradient, symmetrised.
    fn compute_hessian(
        &self,
        model: &impl LogDensityModel,
        best_params: &[f64],
    ) -> Result<DMatrix<f64>> {
        let n = best_params.len();
        let grad_center = model.grad_nll(best_params)?;

        let mut hessian = DMatrix::zeros(n, n);
        for j in 0..n {
            let eps = 1e-4 * best_params[j].abs().max(1.0);
            let mut params_plus = best_params.to_vec();
            params_plus[j] += eps;
            let grad_plus = model.grad_nll(&params_plus)?;
            for i in 0..n {
                hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
            }
        }

        let ht = hessian.transpose();
        Ok((&hessian + &ht) * 0.5)
    }
}

/// Invert the Hessian into a covariance matrix via damped Cholesky.
///
/// Returns `None` if no usable (positive-variance) inverse can be obtained.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    for attempt in 0..10 {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            return Some(chol.solve(&identity));
        }
        if attempt == 9 {
            break;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next - damping;
        for i in 0..n {
            h_damped[(i, i)] += add;
        }
        damping = next;
    }

    let cov = h_damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

fn diagonal_uncertainties(hessian: &DMatrix<f64>, n: usize) -> Vec<f64> {
    (0..n).map(|i| 1.0 / hessian[(i, i)].abs().max(1e-12).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Gaussian sample NLL in (mu, log_sigma): recoverable closed-form MLE.
    struct GaussianSample {
        y: Vec<f64>,
    }

    impl LogDensityModel for GaussianSample {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["mu".to_string(), "log_sigma".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY); 2]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            let mu = params[0];
            let sigma = params[1].exp();
            let n = self.y.len() as f64;
            let ss: f64 = self.y.iter().map(|y| (y - mu).powi(2)).sum();
            Ok(n * sigma.ln() + 0.5 * ss / (sigma * sigma))
        }
    }

    #[test]
    fn recovers_gaussian_mle() {
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 2.5, 3.5];
        let n = y.len() as f64;
        let mean = y.iter().sum::<f64>() / n;
        let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let model = GaussianSample { y };
        let fit = MaximumLikelihoodEstimator::new().fit(&model).unwrap();

        assert!(fit.converged, "{}", fit.termination_reason);
        assert_relative_eq!(fit.parameters[0], mean, epsilon = 1e-4);
        assert_relative_eq!(fit.parameters[1].exp(), var.sqrt(), epsilon = 1e-3);
        // SE(mu) = sigma/sqrt(n) at the MLE.
        assert_relative_eq!(fit.uncertainties[0], var.sqrt() / n.sqrt(), epsilon = 1e-2);
        assert!(fit.covariance.is_some());
    }
}
