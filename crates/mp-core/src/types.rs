//! Common data types for medpath

use serde::{Deserialize, Serialize};

/// Fit result containing parameter estimates and uncertainties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Parameter names (stable order, aligned with `parameters`).
    pub parameter_names: Vec<String>,

    /// Best-fit parameter values.
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal).
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if inversion failed or the
    /// resulting covariance is numerically invalid.
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at minimum.
    pub nll: f64,

    /// Convergence status.
    pub converged: bool,

    /// Number of optimizer iterations.
    pub n_iter: usize,

    /// Why the optimizer stopped.
    pub termination_reason: String,
}

impl FitResult {
    /// Create a new fit result without covariance.
    pub fn new(
        parameter_names: Vec<String>,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        nll: f64,
        converged: bool,
        n_iter: usize,
        termination_reason: String,
    ) -> Self {
        Self {
            parameter_names,
            parameters,
            uncertainties,
            covariance: None,
            nll,
            converged,
            n_iter,
            termination_reason,
        }
    }

    /// Attach a row-major covariance matrix (builder-style).
    pub fn with_covariance(mut self, covariance: Vec<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameter_names.iter().position(|n| n == name)
    }

    /// Covariance element (i, j). `None` without a covariance matrix.
    pub fn cov(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        Some(cov[i * n + j])
    }

    /// Correlation element (i, j). `None` without covariance or with
    /// non-positive uncertainties.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.cov(i, j)?;
        let si = self.uncertainties[i];
        let sj = self.uncertainties[j];
        if si <= 0.0 || sj <= 0.0 {
            return None;
        }
        Some(cov / (si * sj))
    }
}
