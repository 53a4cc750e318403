//! Data screening: per-variable descriptives, missingness and outlier flags.
//!
//! Every analysis bundle carries a [`ScreeningReport`] so that results are
//! interpretable next to the data quality that produced them.

use mp_core::{Column, Dataset, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard-score threshold above which a continuous value is flagged.
const OUTLIER_Z: f64 = 3.0;

/// What to do with flagged outlier rows before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutlierPolicy {
    /// Flag outliers in the report but keep every complete row.
    Keep,
    /// Drop any row flagged as an outlier on any screened variable.
    Exclude,
}

/// Screening summary for one variable.
#[derive(Debug, Clone, Serialize)]
pub struct VariableScreen {
    /// Variable name.
    pub name: String,
    /// `"numeric"` or `"categorical"`.
    pub kind: String,
    /// Missing observations over the whole dataset.
    pub n_missing: usize,
    /// Mean of observed values (numeric only).
    pub mean: Option<f64>,
    /// Sample standard deviation of observed values (numeric only).
    pub sd: Option<f64>,
    /// Smallest observed value (numeric only).
    pub min: Option<f64>,
    /// Largest observed value (numeric only).
    pub max: Option<f64>,
    /// Rows where |z| exceeds the threshold (numeric only).
    pub outlier_rows: Vec<usize>,
    /// Observed level frequencies (categorical only).
    pub levels: Option<BTreeMap<String, usize>>,
}

/// Screening result for one analysis call.
#[derive(Debug, Clone, Serialize)]
pub struct ScreeningReport {
    /// Per-variable summaries, in the order the analysis references them.
    pub variables: Vec<VariableScreen>,
    /// Rows in the dataset before any filtering.
    pub n_rows_total: usize,
    /// Rows complete on every screened variable.
    pub n_complete: usize,
    /// Outlier handling that was applied.
    pub policy: OutlierPolicy,
    /// Row indices actually passed to the fitters.
    #[serde(skip)]
    pub analysis_rows: Vec<usize>,
}

/// Screen the listed variables and determine the analysis rows.
///
/// Rows are dropped listwise on missingness; under
/// [`OutlierPolicy::Exclude`] rows flagged on any numeric variable are
/// dropped as well.
pub fn screen(ds: &Dataset, variables: &[&str], policy: OutlierPolicy) -> Result<ScreeningReport> {
    if ds.n_rows() == 0 {
        return Err(Error::Validation("dataset has no rows".to_string()));
    }
    let complete = ds.complete_rows(variables)?;

    let mut screens = Vec::with_capacity(variables.len());
    let mut flagged: Vec<usize> = Vec::new();
    for &name in variables {
        let sc = screen_variable(ds, name)?;
        flagged.extend(sc.outlier_rows.iter().copied());
        screens.push(sc);
    }
    flagged.sort_unstable();
    flagged.dedup();

    let analysis_rows = match policy {
        OutlierPolicy::Keep => complete.clone(),
        OutlierPolicy::Exclude => {
            complete.iter().copied().filter(|r| flagged.binary_search(r).is_err()).collect()
        }
    };

    Ok(ScreeningReport {
        variables: screens,
        n_rows_total: ds.n_rows(),
        n_complete: complete.len(),
        policy,
        analysis_rows,
    })
}

fn screen_variable(ds: &Dataset, name: &str) -> Result<VariableScreen> {
    match ds.require(name)? {
        Column::Numeric(values) => {
            let observed: Vec<(usize, f64)> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_nan())
                .map(|(i, v)| (i, *v))
                .collect();
            let n_missing = values.len() - observed.len();
            if observed.is_empty() {
                return Err(Error::Validation(format!(
                    "variable '{name}' has no observed values"
                )));
            }
            let n = observed.len() as f64;
            let mean = observed.iter().map(|(_, v)| v).sum::<f64>() / n;
            let ss = observed.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>();
            let sd = if observed.len() > 1 { (ss / (n - 1.0)).sqrt() } else { 0.0 };
            let min = observed.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
            let max = observed.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);

            let outlier_rows = if sd > 0.0 {
                observed
                    .iter()
                    .filter(|(_, v)| ((v - mean) / sd).abs() > OUTLIER_Z)
                    .map(|(i, _)| *i)
                    .collect()
            } else {
                Vec::new()
            };

            Ok(VariableScreen {
                name: name.to_string(),
                kind: "numeric".to_string(),
                n_missing,
                mean: Some(mean),
                sd: Some(sd),
                min: Some(min),
                max: Some(max),
                outlier_rows,
                levels: None,
            })
        }
        Column::Categorical(values) => {
            let mut levels: BTreeMap<String, usize> = BTreeMap::new();
            let mut n_missing = 0;
            for v in values {
                match v {
                    Some(level) => *levels.entry(level.clone()).or_insert(0) += 1,
                    None => n_missing += 1,
                }
            }
            Ok(VariableScreen {
                name: name.to_string(),
                kind: "categorical".to_string(),
                n_missing,
                mean: None,
                sd: None,
                min: None,
                max: None,
                outlier_rows: Vec::new(),
                levels: Some(levels),
            })
        }
    }
}
