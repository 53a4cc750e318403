//! Moderation analysis: does a moderator W change the X → Y slope?
//!
//! Fits `Y ~ X + W + X·W (+ covariates)` with X (when numeric) and W
//! mean-centered over the analysis rows, so the lower-order coefficients
//! stay interpretable as effects at the mean. Simple slopes are probed at
//! the moderator mean and one SD either side whenever the predictor is
//! numeric.

use crate::formula::{response_vector, DesignBuilder, Term};
use crate::mediation::{require_distinct_roles, require_numeric_role, AnalysisOptions};
use crate::ols::{fit_ols, OlsFit};
use crate::screen::{screen, ScreeningReport};
use mp_core::{Column, Dataset, Error, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Variable roles for a moderation analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationSpec {
    /// Outcome Y (numeric).
    pub dependent: String,
    /// Predictor X (numeric or categorical).
    pub predictor: String,
    /// Moderator W (numeric).
    pub moderator: String,
    /// Additional covariates entered in the model.
    pub covariates: Vec<String>,
    /// Analysis options (bootstrap settings are unused here).
    pub options: AnalysisOptions,
}

impl ModerationSpec {
    /// Spec with default options and no covariates.
    pub fn new(
        dependent: impl Into<String>,
        predictor: impl Into<String>,
        moderator: impl Into<String>,
    ) -> Self {
        Self {
            dependent: dependent.into(),
            predictor: predictor.into(),
            moderator: moderator.into(),
            covariates: Vec::new(),
            options: AnalysisOptions::default(),
        }
    }
}

/// One interaction coefficient (one per X indicator).
#[derive(Debug, Clone, Serialize)]
pub struct InteractionEffect {
    /// Design-column name (`x:w`, or `x[level]:w`).
    pub term: String,
    /// Coefficient estimate.
    pub coefficient: f64,
    /// Standard error.
    pub se: f64,
    /// t statistic.
    pub t: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// The X → Y slope at a chosen moderator value.
#[derive(Debug, Clone, Serialize)]
pub struct SimpleSlope {
    /// Probe description (`mean - 1 SD`, `mean`, `mean + 1 SD`).
    pub label: String,
    /// Moderator value on the original (uncentered) scale.
    pub at: f64,
    /// Conditional slope of X.
    pub slope: f64,
    /// Standard error of the conditional slope.
    pub se: f64,
    /// t statistic.
    pub t: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Everything produced by one [`moderate`] call.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationResult {
    /// Y ~ X + W + X·W (+ covariates), X/W centered.
    pub model: OlsFit,
    /// Interaction coefficients, one per X indicator.
    pub interactions: Vec<InteractionEffect>,
    /// Simple slopes; empty when the predictor is categorical.
    pub simple_slopes: Vec<SimpleSlope>,
    /// Moderator mean over the analysis rows.
    pub moderator_mean: f64,
    /// Moderator SD over the analysis rows.
    pub moderator_sd: f64,
    /// Data screening that preceded the fit.
    pub screening: ScreeningReport,
}

fn mean_sd(ds: &Dataset, name: &str, rows: &[usize]) -> Result<(f64, f64)> {
    let values = match ds.require(name)? {
        Column::Numeric(v) => v,
        Column::Categorical(_) => {
            return Err(Error::Validation(format!("column '{name}' is not numeric")))
        }
    };
    if rows.len() < 2 {
        return Err(Error::Validation("too few rows to compute moderator spread".to_string()));
    }
    let n = rows.len() as f64;
    let mean = rows.iter().map(|&i| values[i]).sum::<f64>() / n;
    let ss = rows.iter().map(|&i| (values[i] - mean).powi(2)).sum::<f64>();
    Ok((mean, (ss / (n - 1.0)).sqrt()))
}

/// Copy the referenced columns, mean-centering the named numeric ones.
fn centered_copy(ds: &Dataset, names: &[&str], center: &[(&str, f64)]) -> Result<Dataset> {
    let mut out = Dataset::new();
    for &name in names {
        match ds.require(name)? {
            Column::Numeric(v) => {
                let shift =
                    center.iter().find(|(n, _)| *n == name).map(|(_, m)| *m).unwrap_or(0.0);
                out.push_numeric(name, v.iter().map(|x| x - shift).collect())?;
            }
            Column::Categorical(v) => out.push_categorical(name, v.clone())?,
        }
    }
    Ok(out)
}

/// Run a moderation analysis.
pub fn moderate(ds: &Dataset, spec: &ModerationSpec) -> Result<ModerationResult> {
    spec.options.validate()?;
    let mut roles: Vec<&str> = vec![&spec.dependent, &spec.predictor, &spec.moderator];
    roles.extend(spec.covariates.iter().map(String::as_str));
    require_distinct_roles(&roles)?;
    require_numeric_role(ds, &spec.dependent, "dependent")?;
    require_numeric_role(ds, &spec.moderator, "moderator")?;

    let screening = screen(ds, &roles, spec.options.outlier_policy)?;
    let rows = screening.analysis_rows.clone();

    let predictor_numeric = ds.require(&spec.predictor)?.is_numeric();
    let (w_mean, w_sd) = mean_sd(ds, &spec.moderator, &rows)?;
    let mut centers = vec![(spec.moderator.as_str(), w_mean)];
    if predictor_numeric {
        let (x_mean, _) = mean_sd(ds, &spec.predictor, &rows)?;
        centers.push((spec.predictor.as_str(), x_mean));
    }
    let cds = centered_copy(ds, &roles, &centers)?;

    let mut terms = vec![
        Term::main(&spec.predictor),
        Term::main(&spec.moderator),
        Term::interaction(&spec.predictor, &spec.moderator),
    ];
    for c in &spec.covariates {
        terms.push(Term::main(c));
    }
    let builder = DesignBuilder::new(&cds, &terms)?;
    let x = builder.build(&cds, &rows)?;
    let y = response_vector(&cds, &spec.dependent, &rows)?;
    let model = fit_ols(&x, &y, builder.column_names())?;

    let x_cols = builder.main_effect_columns(&spec.predictor);
    let mut interactions = Vec::with_capacity(x_cols.len());
    for &xi in &x_cols {
        let x_name = &model.names[xi];
        let term = format!("{x_name}:{}", spec.moderator);
        let i = model.index_of(&term).ok_or_else(|| {
            Error::Computation(format!("interaction column '{term}' missing from model"))
        })?;
        interactions.push(InteractionEffect {
            term,
            coefficient: model.coefficients[i],
            se: model.standard_errors[i],
            t: model.t_values[i],
            p_value: model.p_values[i],
        });
    }

    let mut simple_slopes = Vec::new();
    if predictor_numeric {
        let xi = x_cols[0];
        let wi = model
            .index_of(&format!("{}:{}", spec.predictor, spec.moderator))
            .ok_or_else(|| {
                Error::Computation("interaction column missing from model".to_string())
            })?;
        let t_dist = StudentsT::new(0.0, 1.0, model.df_resid as f64)
            .map_err(|e| Error::Computation(format!("t distribution: {e}")))?;

        for (label, offset) in
            [("mean - 1 SD", -w_sd), ("mean", 0.0), ("mean + 1 SD", w_sd)]
        {
            // Centered probe value; `at` reports the original scale.
            let w0 = offset;
            let slope = model.coefficients[xi] + w0 * model.coefficients[wi];
            let var = model.cov(xi, xi)
                + w0 * w0 * model.cov(wi, wi)
                + 2.0 * w0 * model.cov(xi, wi);
            if !(var.is_finite() && var >= 0.0) {
                return Err(Error::Computation(
                    "negative variance for a simple slope".to_string(),
                ));
            }
            let se = var.sqrt();
            let t = if se > 0.0 { slope / se } else { 0.0 };
            simple_slopes.push(SimpleSlope {
                label: label.to_string(),
                at: w_mean + offset,
                slope,
                se,
                t,
                p_value: 2.0 * t_dist.sf(t.abs()),
            });
        }
    }

    Ok(ModerationResult {
        model,
        interactions,
        simple_slopes,
        moderator_mean: w_mean,
        moderator_sd: w_sd,
        screening,
    })
}
