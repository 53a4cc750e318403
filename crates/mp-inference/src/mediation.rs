//! Simple mediation analysis (single mediator, optional covariates).
//!
//! Three OLS models are fit over the same listwise-complete rows:
//!
//! - total:    Y ~ X (+ covariates), giving c
//! - mediator: M ~ X (+ covariates), giving a
//! - full:     Y ~ X + M (+ covariates), giving b and c′
//!
//! The indirect effect is a·b, tested with the Aroian–Sobel statistic
//! and a case-resampling bootstrap interval. A categorical X is expanded
//! to treatment-coded indicators and a relative effect is reported per
//! indicator.

use crate::bootstrap::{
    confidence_interval, resample_rows, run_replicates, BootstrapCi, CiMethod,
};
use crate::effects::{proportion_mediated, sobel_test, SobelTest, SobelVariant};
use crate::formula::{response_vector, DesignBuilder, Term};
use crate::ols::{fit_ols, OlsFit};
use crate::screen::{screen, OutlierPolicy, ScreeningReport};
use mp_core::{Dataset, Error, Result};
use serde::{Deserialize, Serialize};

/// Options shared by every analysis entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Nominal coverage of the bootstrap interval.
    pub conf_level: f64,
    /// Bootstrap replicate count.
    pub n_boot: usize,
    /// Interval construction method.
    pub ci_method: CiMethod,
    /// Variance formula for the Sobel test.
    pub sobel_variant: SobelVariant,
    /// Outlier handling before fitting.
    pub outlier_policy: OutlierPolicy,
    /// Base seed for the replicate RNGs.
    pub seed: u64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            conf_level: 0.95,
            n_boot: 1000,
            ci_method: CiMethod::Percentile,
            sobel_variant: SobelVariant::Aroian,
            outlier_policy: OutlierPolicy::Keep,
            seed: 0,
        }
    }
}

impl AnalysisOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.conf_level.is_finite() && self.conf_level > 0.0 && self.conf_level < 1.0) {
            return Err(Error::Validation(format!(
                "conf_level must be in (0,1), got {}",
                self.conf_level
            )));
        }
        if self.n_boot == 0 {
            return Err(Error::Validation(
                "n_boot must be > 0 (a bootstrap interval is always computed)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Variable roles for a simple mediation analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediationSpec {
    /// Outcome Y (numeric).
    pub dependent: String,
    /// Mediator M (numeric).
    pub mediator: String,
    /// Predictor X (numeric or categorical).
    pub predictor: String,
    /// Additional covariates entered in every model.
    pub covariates: Vec<String>,
    /// Analysis options.
    pub options: AnalysisOptions,
}

impl MediationSpec {
    /// Spec with default options and no covariates.
    pub fn new(
        dependent: impl Into<String>,
        mediator: impl Into<String>,
        predictor: impl Into<String>,
    ) -> Self {
        Self {
            dependent: dependent.into(),
            mediator: mediator.into(),
            predictor: predictor.into(),
            covariates: Vec::new(),
            options: AnalysisOptions::default(),
        }
    }
}

/// Effect decomposition for one predictor indicator.
#[derive(Debug, Clone, Serialize)]
pub struct IndirectEffect {
    /// Design-column name of the X indicator (`x`, or `x[level]`).
    pub term: String,
    /// X → M path.
    pub a: f64,
    /// SE of `a`.
    pub se_a: f64,
    /// M → Y path, adjusted for X.
    pub b: f64,
    /// SE of `b`.
    pub se_b: f64,
    /// Indirect effect a·b.
    pub indirect: f64,
    /// Direct effect c′.
    pub direct: f64,
    /// Total effect c.
    pub total: f64,
    /// indirect / total, when the total is bounded away from zero.
    pub proportion_mediated: Option<f64>,
    /// Aroian–Sobel test of the indirect effect.
    pub sobel: SobelTest,
    /// Bootstrap interval for the indirect effect.
    pub bootstrap: BootstrapCi,
}

/// Everything produced by one [`mediate`] call.
#[derive(Debug, Clone, Serialize)]
pub struct MediationResult {
    /// Y ~ X (+ covariates).
    pub total_model: OlsFit,
    /// M ~ X (+ covariates).
    pub mediator_model: OlsFit,
    /// Y ~ X + M (+ covariates).
    pub full_model: OlsFit,
    /// One decomposition per X indicator.
    pub effects: Vec<IndirectEffect>,
    /// Data screening that preceded the fits.
    pub screening: ScreeningReport,
}

pub(crate) fn require_numeric_role(ds: &Dataset, name: &str, role: &str) -> Result<()> {
    if !ds.require(name)?.is_numeric() {
        return Err(Error::Validation(format!(
            "{role} variable '{name}' is categorical; only numeric {role}s are supported"
        )));
    }
    Ok(())
}

pub(crate) fn require_distinct_roles(names: &[&str]) -> Result<()> {
    for (i, a) in names.iter().enumerate() {
        if names[i + 1..].contains(a) {
            return Err(Error::Validation(format!(
                "variable '{a}' is used in more than one role"
            )));
        }
    }
    Ok(())
}

/// Run a simple mediation analysis.
pub fn mediate(ds: &Dataset, spec: &MediationSpec) -> Result<MediationResult> {
    spec.options.validate()?;
    let mut roles: Vec<&str> = vec![&spec.dependent, &spec.mediator, &spec.predictor];
    roles.extend(spec.covariates.iter().map(String::as_str));
    require_distinct_roles(&roles)?;
    require_numeric_role(ds, &spec.dependent, "dependent")?;
    require_numeric_role(ds, &spec.mediator, "mediator")?;

    let screening = screen(ds, &roles, spec.options.outlier_policy)?;
    let rows = screening.analysis_rows.clone();

    let mut x_terms = vec![Term::main(&spec.predictor)];
    let mut xm_terms = vec![Term::main(&spec.predictor), Term::main(&spec.mediator)];
    for c in &spec.covariates {
        x_terms.push(Term::main(c));
        xm_terms.push(Term::main(c));
    }
    let builder_x = DesignBuilder::new(ds, &x_terms)?;
    let builder_xm = DesignBuilder::new(ds, &xm_terms)?;

    let y = response_vector(ds, &spec.dependent, &rows)?;
    let m = response_vector(ds, &spec.mediator, &rows)?;
    let dx = builder_x.build(ds, &rows)?;
    let dxm = builder_xm.build(ds, &rows)?;

    let total_model = fit_ols(&dx, &y, builder_x.column_names())?;
    let mediator_model = fit_ols(&dx, &m, builder_x.column_names())?;
    let full_model = fit_ols(&dxm, &y, builder_xm.column_names())?;

    let x_cols = builder_x.main_effect_columns(&spec.predictor);
    let x_names: Vec<String> =
        x_cols.iter().map(|&i| builder_x.column_names()[i].clone()).collect();

    // Per-replicate statistics: one indirect estimate per X indicator.
    let indirect_at = |rows: &[usize]| -> Result<Vec<f64>> {
        let m = response_vector(ds, &spec.mediator, rows)?;
        let y = response_vector(ds, &spec.dependent, rows)?;
        let dx = builder_x.build(ds, rows)?;
        let dxm = builder_xm.build(ds, rows)?;
        let med = fit_ols(&dx, &m, builder_x.column_names())?;
        let full = fit_ols(&dxm, &y, builder_xm.column_names())?;
        let b = full.coef(&spec.mediator).ok_or_else(|| {
            Error::Computation("mediator coefficient missing from full model".to_string())
        })?;
        x_names
            .iter()
            .map(|name| {
                med.coef(name).map(|a| a * b).ok_or_else(|| {
                    Error::Computation(format!("coefficient '{name}' missing from mediator model"))
                })
            })
            .collect()
    };

    let run = run_replicates(spec.options.n_boot, spec.options.seed, |rng| {
        indirect_at(&resample_rows(&rows, rng))
    })?;

    // Jackknife leave-one-out estimates, only needed for BCa.
    let jackknife: Option<Vec<Vec<f64>>> = match spec.options.ci_method {
        CiMethod::Percentile => None,
        CiMethod::Bca => {
            let mut out = Vec::with_capacity(rows.len());
            for i in 0..rows.len() {
                let mut loo = rows.clone();
                loo.remove(i);
                out.push(indirect_at(&loo)?);
            }
            Some(out)
        }
    };

    let b = full_model.coef(&spec.mediator).ok_or_else(|| {
        Error::Computation("mediator coefficient missing from full model".to_string())
    })?;
    let se_b = full_model.se(&spec.mediator).ok_or_else(|| {
        Error::Computation("mediator SE missing from full model".to_string())
    })?;

    let mut effects = Vec::with_capacity(x_names.len());
    for (k, name) in x_names.iter().enumerate() {
        let a = mediator_model.coef(name).ok_or_else(|| {
            Error::Computation(format!("coefficient '{name}' missing from mediator model"))
        })?;
        let se_a = mediator_model.se(name).ok_or_else(|| {
            Error::Computation(format!("SE '{name}' missing from mediator model"))
        })?;
        let direct = full_model.coef(name).ok_or_else(|| {
            Error::Computation(format!("coefficient '{name}' missing from full model"))
        })?;
        let total = total_model.coef(name).ok_or_else(|| {
            Error::Computation(format!("coefficient '{name}' missing from total model"))
        })?;
        let indirect = a * b;

        let samples = run.statistic(k);
        let jk: Option<Vec<f64>> =
            jackknife.as_ref().map(|j| j.iter().map(|v| v[k]).collect());
        let bootstrap = confidence_interval(
            indirect,
            &samples,
            jk.as_deref(),
            spec.options.conf_level,
            spec.options.ci_method,
            run.n_failed,
        )?;

        effects.push(IndirectEffect {
            term: name.clone(),
            a,
            se_a,
            b,
            se_b,
            indirect,
            direct,
            total,
            proportion_mediated: proportion_mediated(indirect, total),
            sobel: sobel_test(a, se_a, b, se_b, spec.options.sobel_variant)?,
            bootstrap,
        });
    }

    Ok(MediationResult { total_model, mediator_model, full_model, effects, screening })
}
