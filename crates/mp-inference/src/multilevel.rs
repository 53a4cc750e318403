//! Mediation for clustered data via Gaussian mixed models.
//!
//! The three-model decomposition is the same as [`crate::mediation`],
//! with each regression replaced by a random-intercept (optionally
//! random-slope) LMM over a grouping variable. The bootstrap resamples
//! whole clusters with replacement, keeping within-cluster rows intact;
//! a cluster drawn twice enters the replicate as two distinct groups.
//!
//! Only numeric predictors are supported here; the grouping variable
//! must be categorical.

use crate::bootstrap::{confidence_interval, run_replicates, CiMethod};
use crate::effects::{proportion_mediated, sobel_test};
use crate::formula::{response_vector, DesignBuilder, Term};
use crate::lmm::{fit_lmm, LmmFit, RandomEffects};
use crate::mediation::{
    require_distinct_roles, require_numeric_role, AnalysisOptions, IndirectEffect,
};
use crate::screen::{screen, ScreeningReport};
use mp_core::{Column, Dataset, Error, Result};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Random-effects structure for the multilevel models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RandomSpec {
    /// Random intercept per cluster.
    #[default]
    Intercept,
    /// Random intercept plus a random slope on the predictor.
    InterceptAndSlope,
}

/// Variable roles for a multilevel mediation analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultilevelMediationSpec {
    /// Outcome Y (numeric).
    pub dependent: String,
    /// Mediator M (numeric).
    pub mediator: String,
    /// Predictor X (numeric).
    pub predictor: String,
    /// Grouping variable (categorical cluster labels).
    pub group: String,
    /// Additional covariates entered in every model.
    pub covariates: Vec<String>,
    /// Random-effects structure.
    pub random: RandomSpec,
    /// Use the REML criterion instead of ML.
    pub reml: bool,
    /// Analysis options.
    pub options: AnalysisOptions,
}

impl MultilevelMediationSpec {
    /// Spec with default options, random intercepts, and no covariates.
    pub fn new(
        dependent: impl Into<String>,
        mediator: impl Into<String>,
        predictor: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            dependent: dependent.into(),
            mediator: mediator.into(),
            predictor: predictor.into(),
            group: group.into(),
            covariates: Vec::new(),
            random: RandomSpec::default(),
            reml: false,
            options: AnalysisOptions::default(),
        }
    }
}

/// Everything produced by one [`mediate_multilevel`] call.
#[derive(Debug, Clone, Serialize)]
pub struct MultilevelMediationResult {
    /// Y ~ X (+ covariates), random effects by cluster.
    pub total_model: LmmFit,
    /// M ~ X (+ covariates), random effects by cluster.
    pub mediator_model: LmmFit,
    /// Y ~ X + M (+ covariates), random effects by cluster.
    pub full_model: LmmFit,
    /// Effect decomposition for the predictor.
    pub effect: IndirectEffect,
    /// Number of clusters in the analysis rows.
    pub n_groups: usize,
    /// Data screening that preceded the fits.
    pub screening: ScreeningReport,
}

/// Cluster membership over the analysis rows.
struct Clusters {
    /// Row indices per cluster, in order of first appearance.
    rows_by_cluster: Vec<Vec<usize>>,
}

fn cluster_rows(ds: &Dataset, group: &str, rows: &[usize]) -> Result<Clusters> {
    let labels = match ds.require(group)? {
        Column::Categorical(v) => v,
        Column::Numeric(_) => {
            return Err(Error::Validation(format!(
                "grouping variable '{group}' must be categorical"
            )))
        }
    };
    let mut order: Vec<&str> = Vec::new();
    let mut rows_by_cluster: Vec<Vec<usize>> = Vec::new();
    for &i in rows {
        let label = labels[i].as_deref().ok_or_else(|| {
            Error::Validation(format!("grouping variable '{group}' is missing at row {i}"))
        })?;
        match order.iter().position(|&l| l == label) {
            Some(g) => rows_by_cluster[g].push(i),
            None => {
                order.push(label);
                rows_by_cluster.push(vec![i]);
            }
        }
    }
    if rows_by_cluster.len() < 2 {
        return Err(Error::Validation(format!(
            "grouping variable '{group}' has fewer than 2 clusters in the analysis rows"
        )));
    }
    Ok(Clusters { rows_by_cluster })
}

impl Clusters {
    fn n(&self) -> usize {
        self.rows_by_cluster.len()
    }

    /// Flatten a selection of clusters into `(rows, group_idx)`, giving
    /// each selected cluster a fresh group number.
    fn flatten(&self, selected: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut group_idx = Vec::new();
        for (g, &c) in selected.iter().enumerate() {
            for &i in &self.rows_by_cluster[c] {
                rows.push(i);
                group_idx.push(g);
            }
        }
        (rows, group_idx)
    }
}

/// Run a multilevel mediation analysis.
pub fn mediate_multilevel(
    ds: &Dataset,
    spec: &MultilevelMediationSpec,
) -> Result<MultilevelMediationResult> {
    spec.options.validate()?;
    let mut roles: Vec<&str> =
        vec![&spec.dependent, &spec.mediator, &spec.predictor, &spec.group];
    roles.extend(spec.covariates.iter().map(String::as_str));
    require_distinct_roles(&roles)?;
    require_numeric_role(ds, &spec.dependent, "dependent")?;
    require_numeric_role(ds, &spec.mediator, "mediator")?;
    require_numeric_role(ds, &spec.predictor, "predictor")?;

    let screening = screen(ds, &roles, spec.options.outlier_policy)?;
    let clusters = cluster_rows(ds, &spec.group, &screening.analysis_rows)?;
    let all: Vec<usize> = (0..clusters.n()).collect();
    let (rows, group_idx) = clusters.flatten(&all);

    let mut x_terms = vec![Term::main(&spec.predictor)];
    let mut xm_terms = vec![Term::main(&spec.predictor), Term::main(&spec.mediator)];
    for c in &spec.covariates {
        x_terms.push(Term::main(c));
        xm_terms.push(Term::main(c));
    }
    let builder_x = DesignBuilder::new(ds, &x_terms)?;
    let builder_xm = DesignBuilder::new(ds, &xm_terms)?;
    let x_col = builder_x.main_effect_columns(&spec.predictor)[0];
    let x_col_full = builder_xm.main_effect_columns(&spec.predictor)[0];
    let re_x = match spec.random {
        RandomSpec::Intercept => RandomEffects::Intercept,
        RandomSpec::InterceptAndSlope => RandomEffects::InterceptSlope { column: x_col },
    };
    let re_xm = match spec.random {
        RandomSpec::Intercept => RandomEffects::Intercept,
        RandomSpec::InterceptAndSlope => RandomEffects::InterceptSlope { column: x_col_full },
    };

    let fit_three = |rows: &[usize], group_idx: &[usize], n_groups: usize, all_three: bool|
     -> Result<(Option<LmmFit>, LmmFit, LmmFit)> {
        let y = response_vector(ds, &spec.dependent, rows)?;
        let m = response_vector(ds, &spec.mediator, rows)?;
        let dx = builder_x.build(ds, rows)?;
        let dxm = builder_xm.build(ds, rows)?;
        let total = if all_three {
            Some(fit_lmm(
                dx.clone(),
                y.clone(),
                builder_x.column_names(),
                group_idx,
                n_groups,
                re_x,
                spec.reml,
            )?)
        } else {
            None
        };
        let mediator = fit_lmm(
            dx,
            m,
            builder_x.column_names(),
            group_idx,
            n_groups,
            re_x,
            spec.reml,
        )?;
        let full = fit_lmm(
            dxm,
            y,
            builder_xm.column_names(),
            group_idx,
            n_groups,
            re_xm,
            spec.reml,
        )?;
        Ok((total, mediator, full))
    };

    let (total_model, mediator_model, full_model) =
        fit_three(&rows, &group_idx, clusters.n(), true)?;
    let total_model = total_model.ok_or_else(|| {
        Error::Computation("total model missing from multilevel fit".to_string())
    })?;

    let x_name = builder_x.column_names()[x_col].clone();
    let missing = |what: &str| Error::Computation(format!("{what} missing from multilevel fit"));
    let a = mediator_model.coef(&x_name).ok_or_else(|| missing("a path"))?;
    let se_a = mediator_model.se(&x_name).ok_or_else(|| missing("a path SE"))?;
    let b = full_model.coef(&spec.mediator).ok_or_else(|| missing("b path"))?;
    let se_b = full_model.se(&spec.mediator).ok_or_else(|| missing("b path SE"))?;
    let direct = full_model.coef(&x_name).ok_or_else(|| missing("direct effect"))?;
    let total = total_model.coef(&x_name).ok_or_else(|| missing("total effect"))?;
    let indirect = a * b;

    // Cluster bootstrap of the indirect effect.
    let indirect_for = |selected: &[usize]| -> Result<f64> {
        let (rows, group_idx) = clusters.flatten(selected);
        let (_, med, full) = fit_three(&rows, &group_idx, selected.len(), false)?;
        let a = med.coef(&x_name).ok_or_else(|| missing("a path"))?;
        let b = full.coef(&spec.mediator).ok_or_else(|| missing("b path"))?;
        Ok(a * b)
    };
    let n_clusters = clusters.n();
    let run = run_replicates(spec.options.n_boot, spec.options.seed, |rng: &mut StdRng| {
        let selected: Vec<usize> =
            (0..n_clusters).map(|_| rng.gen_range(0..n_clusters)).collect();
        Ok(vec![indirect_for(&selected)?])
    })?;

    // Leave-one-cluster-out estimates for BCa.
    let jackknife: Option<Vec<f64>> = match spec.options.ci_method {
        CiMethod::Percentile => None,
        CiMethod::Bca => {
            let mut out = Vec::with_capacity(n_clusters);
            for drop in 0..n_clusters {
                let selected: Vec<usize> = (0..n_clusters).filter(|&c| c != drop).collect();
                out.push(indirect_for(&selected)?);
            }
            Some(out)
        }
    };

    let samples = run.statistic(0);
    let bootstrap = confidence_interval(
        indirect,
        &samples,
        jackknife.as_deref(),
        spec.options.conf_level,
        spec.options.ci_method,
        run.n_failed,
    )?;

    let effect = IndirectEffect {
        term: x_name,
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
    };

    Ok(MultilevelMediationResult {
        total_model,
        mediator_model,
        full_model,
        effect,
        n_groups: n_clusters,
        screening,
    })
}
