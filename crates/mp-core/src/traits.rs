//! Core traits for medpath
//!
//! The inference layer (generic MLE) depends on this interface, not on
//! concrete model types.

use crate::Result;

/// Universal model interface for likelihood-based fitting.
///
/// A model exposes its parameterisation and a negative log-likelihood; the
/// generic optimizer does the rest.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names (stable order).
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max) (stable order).
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Suggested initial values (stable order).
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-likelihood.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of NLL.
    ///
    /// The default implementation uses central differences with an adaptive
    /// step; models with cheap analytic gradients should override it.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-6 * params[i].abs().max(1.0);
            let mut p_hi = params.to_vec();
            let mut p_lo = params.to_vec();
            p_hi[i] += eps;
            p_lo[i] -= eps;
            grad[i] = (self.nll(&p_hi)? - self.nll(&p_lo)?) / (2.0 * eps);
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl LogDensityModel for Quadratic {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["a".to_string(), "b".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY); 2]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok(params.iter().map(|&x| x * x).sum())
        }
    }

    #[test]
    fn default_gradient_is_central_difference() {
        let m = Quadratic;
        let g = m.grad_nll(&[2.0, -3.0]).unwrap();
        assert!((g[0] - 4.0).abs() < 1e-4);
        assert!((g[1] + 6.0).abs() < 1e-4);
    }
}
