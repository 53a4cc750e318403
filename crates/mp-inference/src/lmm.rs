//! Gaussian linear mixed models for clustered data.
//!
//! The random effects are integrated out analytically per group, which is
//! exact for Gaussian outcomes, leaving a marginal likelihood over the
//! fixed effects and log-scale variance components. Scope: random
//! intercept, or random intercept plus one random slope with a diagonal
//! random-effects covariance; ML by default, REML optional.
//!
//! The constant `n/2·log(2π)` term is omitted throughout.

use crate::mle::MaximumLikelihoodEstimator;
use mp_core::traits::LogDensityModel;
use mp_core::{Error, FitResult, Result};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

/// Random-effects structure per grouping cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RandomEffects {
    /// Random intercept only.
    Intercept,
    /// Random intercept plus a random slope on one design column.
    InterceptSlope {
        /// Design-matrix column carrying the random-slope covariate.
        column: usize,
    },
}

#[derive(Debug, Clone)]
struct GroupStats {
    rows: Vec<usize>,
    // Z'Z entries: s00 = m, and for a random slope s01 = Σz, s11 = Σz².
    s00: f64,
    s01: f64,
    s11: f64,
}

/// Marginal likelihood of a Gaussian LMM.
///
/// Parameter vector: fixed effects (one per design column), then
/// `log_sigma`, `log_tau_intercept`, and `log_tau_slope` when a random
/// slope is present.
#[derive(Debug, Clone)]
pub struct LmmModel {
    x: DMatrix<f64>,
    y: DVector<f64>,
    names: Vec<String>,
    re: RandomEffects,
    groups: Vec<GroupStats>,
    reml: bool,
}

impl LmmModel {
    /// Build the model from a design matrix (intercept column included),
    /// response, and a 0-based group index per row.
    pub fn new(
        x: DMatrix<f64>,
        y: DVector<f64>,
        names: Vec<String>,
        group_idx: &[usize],
        n_groups: usize,
        re: RandomEffects,
    ) -> Result<Self> {
        let n = x.nrows();
        if n == 0 {
            return Err(Error::Validation("design matrix has no rows".to_string()));
        }
        if y.len() != n || group_idx.len() != n {
            return Err(Error::Validation(format!(
                "design has {n} rows; response has {} and group index has {}",
                y.len(),
                group_idx.len()
            )));
        }
        if names.len() != x.ncols() {
            return Err(Error::Validation(format!(
                "got {} names for {} design columns",
                names.len(),
                x.ncols()
            )));
        }
        if n_groups < 2 {
            return Err(Error::Validation("need at least two groups".to_string()));
        }
        if let Some(&g) = group_idx.iter().find(|&&g| g >= n_groups) {
            return Err(Error::Validation(format!(
                "group index {g} out of range (n_groups = {n_groups})"
            )));
        }
        if let RandomEffects::InterceptSlope { column } = re {
            if column >= x.ncols() {
                return Err(Error::Validation(format!(
                    "random-slope column {column} out of range (p = {})",
                    x.ncols()
                )));
            }
        }

        let mut groups: Vec<GroupStats> = (0..n_groups)
            .map(|_| GroupStats { rows: Vec::new(), s00: 0.0, s01: 0.0, s11: 0.0 })
            .collect();
        for (i, &g) in group_idx.iter().enumerate() {
            groups[g].rows.push(i);
        }
        for gd in &mut groups {
            gd.s00 = gd.rows.len() as f64;
            if let RandomEffects::InterceptSlope { column } = re {
                for &i in &gd.rows {
                    let z = x[(i, column)];
                    gd.s01 += z;
                    gd.s11 += z * z;
                }
            }
        }

        Ok(Self { x, y, names, re, groups, reml: false })
    }

    /// Switch to the REML criterion (`+0.5·log|X'V⁻¹X|`).
    pub fn with_reml(mut self, reml: bool) -> Self {
        self.reml = reml;
        self
    }

    fn n_beta(&self) -> usize {
        self.x.ncols()
    }

    fn n_re(&self) -> usize {
        match self.re {
            RandomEffects::Intercept => 1,
            RandomEffects::InterceptSlope { .. } => 2,
        }
    }

    fn slope_column(&self) -> Option<usize> {
        match self.re {
            RandomEffects::Intercept => None,
            RandomEffects::InterceptSlope { column } => Some(column),
        }
    }

    /// Precision matrix M = D⁻¹ + Z'Z/σ² for one group.
    fn group_precision(&self, gd: &GroupStats, inv_s2: f64, d_inv: &[f64]) -> DMatrix<f64> {
        match self.re {
            RandomEffects::Intercept => {
                DMatrix::from_element(1, 1, d_inv[0] + inv_s2 * gd.s00)
            }
            RandomEffects::InterceptSlope { .. } => DMatrix::from_row_slice(
                2,
                2,
                &[
                    d_inv[0] + inv_s2 * gd.s00,
                    inv_s2 * gd.s01,
                    inv_s2 * gd.s01,
                    d_inv[1] + inv_s2 * gd.s11,
                ],
            ),
        }
    }

    fn nll_at(&self, beta: &DVector<f64>, sigma: f64, taus: &[f64]) -> Result<f64> {
        if !(sigma.is_finite() && sigma > 0.0) || taus.iter().any(|t| !(t.is_finite() && *t > 0.0))
        {
            return Err(Error::Computation(
                "variance components must be finite and positive".to_string(),
            ));
        }
        let inv_s2 = 1.0 / (sigma * sigma);
        let d_inv: Vec<f64> = taus.iter().map(|t| 1.0 / (t * t)).collect();
        let log_d: f64 = taus.iter().map(|t| (t * t).ln()).sum();

        let resid = &self.y - &self.x * beta;

        let nb = self.n_beta();
        let mut xtvinvx = DMatrix::zeros(nb, nb);

        let mut nll = 0.0;
        for gd in &self.groups {
            let m = gd.rows.len();
            if m == 0 {
                continue;
            }

            let mut sum_r2 = 0.0;
            let mut t = DVector::zeros(self.n_re());
            for &i in &gd.rows {
                let r = resid[i];
                sum_r2 += r * r;
                t[0] += r;
                if let Some(col) = self.slope_column() {
                    t[1] += self.x[(i, col)] * r;
                }
            }

            let prec = self.group_precision(gd, inv_s2, &d_inv);
            let chol = nalgebra::linalg::Cholesky::new(prec.clone()).ok_or_else(|| {
                Error::Computation("group precision matrix not positive definite".to_string())
            })?;
            let l = chol.l();
            let log_det_m = 2.0 * (0..self.n_re()).map(|i| l[(i, i)].ln()).sum::<f64>();

            let b = &t * inv_s2;
            let u = chol.solve(&b);
            let log_det_v = m as f64 * (sigma * sigma).ln() + log_d + log_det_m;
            nll += 0.5 * (log_det_v + inv_s2 * sum_r2 - b.dot(&u));

            if self.reml {
                // Woodbury: X'V⁻¹X = X'X/σ² − (X'Z) M⁻¹ (Z'X)/σ⁴ per group.
                let mut xg = DMatrix::zeros(m, nb);
                let mut zg = DMatrix::zeros(m, self.n_re());
                for (k, &i) in gd.rows.iter().enumerate() {
                    for j in 0..nb {
                        xg[(k, j)] = self.x[(i, j)];
                    }
                    zg[(k, 0)] = 1.0;
                    if let Some(col) = self.slope_column() {
                        zg[(k, 1)] = self.x[(i, col)];
                    }
                }
                let xtz = xg.transpose() * &zg;
                let m_inv_ztx = chol.solve(&xtz.transpose());
                xtvinvx += xg.transpose() * &xg * inv_s2 - &xtz * m_inv_ztx * (inv_s2 * inv_s2);
            }
        }

        if self.reml {
            let chol = nalgebra::linalg::Cholesky::new(xtvinvx).ok_or_else(|| {
                Error::Computation("X'V^-1X not positive definite".to_string())
            })?;
            let l = chol.l();
            nll += (0..nb).map(|i| l[(i, i)].ln()).sum::<f64>();
        }

        Ok(nll)
    }

    fn split_params(&self, params: &[f64]) -> Result<(DVector<f64>, f64, Vec<f64>)> {
        if params.len() != self.dim() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.dim(),
                params.len()
            )));
        }
        let nb = self.n_beta();
        let beta = DVector::from_column_slice(&params[..nb]);
        let sigma = params[nb].exp();
        let taus: Vec<f64> = params[nb + 1..].iter().map(|v| v.exp()).collect();
        Ok((beta, sigma, taus))
    }
}

impl LogDensityModel for LmmModel {
    fn dim(&self) -> usize {
        self.n_beta() + 1 + self.n_re()
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut out = self.names.clone();
        out.push("log_sigma".to_string());
        out.push("log_tau_intercept".to_string());
        if let Some(col) = self.slope_column() {
            out.push(format!("log_tau_{}", self.names[col]));
        }
        out
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        vec![(f64::NEG_INFINITY, f64::INFINITY); self.dim()]
    }

    fn parameter_init(&self) -> Vec<f64> {
        // Pooled least squares for beta, residual spread for sigma, the
        // spread of group residual means for the intercept variance.
        let nb = self.n_beta();
        let xtx = self.x.transpose() * &self.x;
        let beta = match xtx.lu().try_inverse() {
            Some(inv) => inv * self.x.transpose() * &self.y,
            None => DVector::zeros(nb),
        };
        let resid = &self.y - &self.x * &beta;
        let n = self.y.len() as f64;
        let sigma = (resid.iter().map(|r| r * r).sum::<f64>() / n).sqrt().max(1e-6);

        let mut group_means = Vec::new();
        for gd in &self.groups {
            if !gd.rows.is_empty() {
                group_means
                    .push(gd.rows.iter().map(|&i| resid[i]).sum::<f64>() / gd.rows.len() as f64);
            }
        }
        let tau = if group_means.len() >= 2 {
            let k = group_means.len() as f64;
            let mean = group_means.iter().sum::<f64>() / k;
            (group_means.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / k).sqrt().max(1e-6)
        } else {
            1.0
        };

        let mut init: Vec<f64> = beta.iter().copied().collect();
        init.push(sigma.ln());
        init.push(tau.ln());
        if self.slope_column().is_some() {
            init.push((0.5 * sigma).max(1e-6).ln());
        }
        init
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        let (beta, sigma, taus) = self.split_params(params)?;
        self.nll_at(&beta, sigma, &taus)
    }
}

/// A fitted multilevel regression with Wald inference on the fixed effects.
#[derive(Debug, Clone, Serialize)]
pub struct LmmFit {
    /// Fixed-effect names, aligned with the coefficient vectors.
    pub names: Vec<String>,
    /// Fixed-effect estimates.
    pub coefficients: Vec<f64>,
    /// Standard errors from the inverse marginal-NLL Hessian.
    pub standard_errors: Vec<f64>,
    /// Wald z statistics.
    pub z_values: Vec<f64>,
    /// Two-sided normal p-values.
    pub p_values: Vec<f64>,
    /// Residual standard deviation.
    pub sigma: f64,
    /// Random-effect standard deviations (intercept first).
    pub tau: Vec<f64>,
    /// Whether the optimizer reported convergence.
    pub converged: bool,
    /// Rows used in the fit.
    pub n: usize,
    /// Number of grouping clusters.
    pub n_groups: usize,
    covariance: Option<Vec<f64>>,
}

impl LmmFit {
    /// Index of a named fixed effect.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Fixed-effect estimate by name.
    pub fn coef(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|i| self.coefficients[i])
    }

    /// Standard error by name.
    pub fn se(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|i| self.standard_errors[i])
    }

    /// Entry (i, j) of the fixed-effect covariance, if available.
    pub fn cov(&self, i: usize, j: usize) -> Option<f64> {
        self.covariance.as_ref().map(|c| c[i * self.names.len() + j])
    }
}

/// Fit a Gaussian LMM and summarise the fixed effects.
pub fn fit_lmm(
    x: DMatrix<f64>,
    y: DVector<f64>,
    names: Vec<String>,
    group_idx: &[usize],
    n_groups: usize,
    re: RandomEffects,
    reml: bool,
) -> Result<LmmFit> {
    let n = x.nrows();
    let model = LmmModel::new(x, y, names.clone(), group_idx, n_groups, re)?.with_reml(reml);
    let fit: FitResult = MaximumLikelihoodEstimator::new().fit(&model)?;
    if !fit.converged {
        return Err(Error::Computation(format!(
            "mixed-model optimization did not converge: {}",
            fit.termination_reason
        )));
    }

    let nb = names.len();
    let dim = fit.parameters.len();
    let sigma = fit.parameters[nb].exp();
    let tau: Vec<f64> = fit.parameters[nb + 1..].iter().map(|v| v.exp()).collect();

    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::Computation(format!("normal distribution: {e}")))?;
    let mut z_values = Vec::with_capacity(nb);
    let mut p_values = Vec::with_capacity(nb);
    for i in 0..nb {
        let se = fit.uncertainties[i];
        let z = if se > 0.0 { fit.parameters[i] / se } else { 0.0 };
        z_values.push(z);
        p_values.push(2.0 * normal.sf(z.abs()));
    }

    // Fixed-effect block of the full-parameter covariance.
    let covariance = fit.covariance.as_ref().map(|full| {
        let mut block = Vec::with_capacity(nb * nb);
        for i in 0..nb {
            for j in 0..nb {
                block.push(full[i * dim + j]);
            }
        }
        block
    });

    Ok(LmmFit {
        names,
        coefficients: fit.parameters[..nb].to_vec(),
        standard_errors: fit.uncertainties[..nb].to_vec(),
        z_values,
        p_values,
        sigma,
        tau,
        converged: fit.converged,
        n,
        n_groups,
        covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn toy() -> (DMatrix<f64>, DVector<f64>, Vec<usize>) {
        let xs = [1.0, 2.0, 3.0, 4.0, 1.5, 2.5];
        let x = DMatrix::from_fn(6, 2, |i, j| if j == 0 { 1.0 } else { xs[i] });
        let y = DVector::from_row_slice(&[1.0, 2.1, 2.9, 4.2, 1.4, 2.7]);
        (x, y, vec![0, 0, 0, 1, 1, 1])
    }

    // Reference marginal NLL via the dense per-group covariance
    // V = σ²I + Z D Z'.
    fn dense_nll(
        model: &LmmModel,
        beta: &DVector<f64>,
        sigma: f64,
        taus: &[f64],
    ) -> f64 {
        let resid = &model.y - &model.x * beta;
        let mut total = 0.0;
        for gd in &model.groups {
            let m = gd.rows.len();
            if m == 0 {
                continue;
            }
            let mut v = DMatrix::zeros(m, m);
            for a in 0..m {
                for b in 0..m {
                    let mut val = taus[0] * taus[0];
                    if let Some(col) = model.slope_column() {
                        val += taus[1]
                            * taus[1]
                            * model.x[(gd.rows[a], col)]
                            * model.x[(gd.rows[b], col)];
                    }
                    if a == b {
                        val += sigma * sigma;
                    }
                    v[(a, b)] = val;
                }
            }
            let chol = nalgebra::linalg::Cholesky::new(v).unwrap();
            let log_det = 2.0 * (0..m).map(|i| chol.l()[(i, i)].ln()).sum::<f64>();
            let r = DVector::from_fn(m, |i, _| resid[gd.rows[i]]);
            let quad = r.dot(&chol.solve(&r));
            total += 0.5 * (log_det + quad);
        }
        total
    }

    #[test]
    fn marginal_nll_matches_dense_intercept() {
        let (x, y, g) = toy();
        let names = vec!["Intercept".to_string(), "x".to_string()];
        let m = LmmModel::new(x, y, names, &g, 2, RandomEffects::Intercept).unwrap();
        let params = vec![0.3, 0.9, (0.5f64).ln(), (1.2f64).ln()];
        let nll = m.nll(&params).unwrap();
        let beta = DVector::from_row_slice(&params[..2]);
        let dense = dense_nll(&m, &beta, 0.5, &[1.2]);
        assert_relative_eq!(nll, dense, epsilon = 1e-10);
    }

    #[test]
    fn marginal_nll_matches_dense_intercept_slope() {
        let (x, y, g) = toy();
        let names = vec!["Intercept".to_string(), "x".to_string()];
        let m = LmmModel::new(x, y, names, &g, 2, RandomEffects::InterceptSlope { column: 1 })
            .unwrap();
        let params = vec![0.3, 0.9, (0.7f64).ln(), (1.1f64).ln(), (0.6f64).ln()];
        let nll = m.nll(&params).unwrap();
        let beta = DVector::from_row_slice(&params[..2]);
        let dense = dense_nll(&m, &beta, 0.7, &[1.1, 0.6]);
        assert_relative_eq!(nll, dense, epsilon = 1e-10);
    }

    #[test]
    fn reml_adds_fixed_effect_logdet() {
        let (x, y, g) = toy();
        let names = vec!["Intercept".to_string(), "x".to_string()];
        let ml = LmmModel::new(x.clone(), y.clone(), names.clone(), &g, 2, RandomEffects::Intercept)
            .unwrap();
        let reml = LmmModel::new(x.clone(), y.clone(), names, &g, 2, RandomEffects::Intercept)
            .unwrap()
            .with_reml(true);
        let params = vec![0.3, 0.9, (0.5f64).ln(), (1.2f64).ln()];
        let nll_ml = ml.nll(&params).unwrap();
        let nll_reml = reml.nll(&params).unwrap();

        // Dense reference for the correction term.
        let sigma = 0.5f64;
        let tau = 1.2f64;
        let n = x.nrows();
        let mut v = DMatrix::from_diagonal_element(n, n, sigma * sigma);
        for gd in &ml.groups {
            for &a in &gd.rows {
                for &b in &gd.rows {
                    v[(a, b)] += tau * tau;
                }
            }
        }
        let chol = nalgebra::linalg::Cholesky::new(v).unwrap();
        let xtvinvx = x.transpose() * chol.solve(&x);
        let c2 = nalgebra::linalg::Cholesky::new(xtvinvx).unwrap();
        let correction = (0..2).map(|i| c2.l()[(i, i)].ln()).sum::<f64>();

        assert_relative_eq!(nll_reml, nll_ml + correction, epsilon = 1e-10);
    }

    #[test]
    fn default_gradient_matches_manual_finite_diff() {
        let (x, y, g) = toy();
        let names = vec!["Intercept".to_string(), "x".to_string()];
        let m = LmmModel::new(x, y, names, &g, 2, RandomEffects::Intercept).unwrap();
        let p = vec![0.2, 1.0, 0.0, 0.0];
        let grad = m.grad_nll(&p).unwrap();
        for i in 0..p.len() {
            let eps = 1e-6;
            let mut hi = p.clone();
            let mut lo = p.clone();
            hi[i] += eps;
            lo[i] -= eps;
            let fd = (m.nll(&hi).unwrap() - m.nll(&lo).unwrap()) / (2.0 * eps);
            assert!((grad[i] - fd).abs() < 1e-6, "component {i}: {} vs {fd}", grad[i]);
        }
    }

    #[test]
    fn rejects_bad_shapes() {
        let (x, y, g) = toy();
        let names = vec!["Intercept".to_string(), "x".to_string()];
        assert!(LmmModel::new(x.clone(), y.clone(), names.clone(), &g[..5], 2,
            RandomEffects::Intercept).is_err());
        assert!(LmmModel::new(x.clone(), y.clone(), names.clone(), &g, 1,
            RandomEffects::Intercept).is_err());
        assert!(LmmModel::new(x, y, names, &g, 2,
            RandomEffects::InterceptSlope { column: 7 }).is_err());
    }
}
