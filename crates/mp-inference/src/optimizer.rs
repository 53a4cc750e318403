//! Generic numerical optimizer (L-BFGS backend).
//!
//! Thin wrapper around argmin's L-BFGS with box bounds handled by clamping
//! plus a projected-gradient heuristic at active bounds.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use mp_core::{Error, Result};

/// Configuration for the L-BFGS optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations.
    pub max_iter: u64,
    /// Convergence tolerance for the gradient norm.
    pub tol: f64,
    /// Number of corrections used to approximate the inverse Hessian.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-6, m: 10 }
    }
}

/// Result of a minimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters.
    pub parameters: Vec<f64>,
    /// Objective value at the minimum.
    pub fval: f64,
    /// Number of iterations.
    pub n_iter: u64,
    /// Convergence status.
    pub converged: bool,
    /// Termination message.
    pub message: String,
}

/// Objective function trait for optimization.
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params` (central differences if not overridden).
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);
            let mut p_hi = params.to_vec();
            p_hi[i] += eps;
            let mut p_lo = params.to_vec();
            p_lo[i] -= eps;
            grad[i] = (self.eval(&p_hi)? - self.eval(&p_lo)?) / (2.0 * eps);
        }
        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // At an active bound, zero any gradient component that points outside;
        // otherwise the line search keeps stepping into the clamped region.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// L-BFGS optimizer with box constraints.
pub struct LbfgsOptimizer {
    config: OptimizerConfig,
}

impl LbfgsOptimizer {
    /// Create a new optimizer with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` from `init_params`, subject to `bounds`.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);
        let problem = ArgminProblem { objective, bounds };

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance (~machine epsilon) is too strict for
        // NLL scales and forces max-iter terminations; relax it to the gradient
        // tolerance scale.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("invalid optimizer tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Validation(format!("invalid optimizer cost tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("optimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("no best parameters found".to_string()))?
            .clone();
        let parameters = clamp_params(&best, bounds);
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            converged,
            message: termination.to_string(),
        })
    }
}

impl Default for LbfgsOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)^2 + (y - 3)^2, minimum at (2, 3).
    struct Quadratic;

    impl ObjectiveFunction for Quadratic {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 2.0).powi(2) + (params[1] - 3.0).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0 * (params[0] - 2.0), 2.0 * (params[1] - 3.0)])
        }
    }

    #[test]
    fn quadratic_unconstrained() {
        let optimizer = LbfgsOptimizer::default();
        let result = optimizer
            .minimize(&Quadratic, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)])
            .unwrap();
        assert!(result.converged, "should converge: {}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
    }

    #[test]
    fn quadratic_pinned_at_bound() {
        // Constrain to x in [3, 5], y in [1, 2]: optimum moves to (3, 2).
        let optimizer = LbfgsOptimizer::default();
        let result =
            optimizer.minimize(&Quadratic, &[4.0, 1.5], &[(3.0, 5.0), (1.0, 2.0)]).unwrap();
        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
        assert!(result.converged, "should converge at bound: {}", result.message);
    }

    #[test]
    fn default_fd_gradient_is_usable() {
        // No analytic gradient: rely on the trait default.
        struct Shifted;
        impl ObjectiveFunction for Shifted {
            fn eval(&self, params: &[f64]) -> Result<f64> {
                Ok((params[0] + 1.0).powi(2) - 5.0)
            }
        }

        let optimizer = LbfgsOptimizer::default();
        let result = optimizer.minimize(&Shifted, &[3.0], &[(-10.0, 10.0)]).unwrap();
        assert_relative_eq!(result.parameters[0], -1.0, epsilon = 1e-3);
        assert_relative_eq!(result.fval, -5.0, epsilon = 1e-6);
    }

    #[test]
    fn bounds_length_mismatch_rejected() {
        let optimizer = LbfgsOptimizer::default();
        assert!(optimizer.minimize(&Quadratic, &[0.0], &[(-1.0, 1.0), (-1.0, 1.0)]).is_err());
    }
}
