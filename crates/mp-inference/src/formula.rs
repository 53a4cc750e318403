//! Design-matrix construction from dataset columns.
//!
//! A [`DesignBuilder`] is created once against the full dataset so that
//! categorical encodings stay fixed, then used to materialise design
//! matrices for arbitrary row subsets (including bootstrap resamples).

use mp_core::{Column, Dataset, Error, Result};
use nalgebra::{DMatrix, DVector};

/// A model term on the right-hand side of a regression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// A single variable entered directly.
    Main(String),
    /// The product of two variables.
    Interaction(String, String),
}

impl Term {
    /// Convenience constructor for a main-effect term.
    pub fn main(name: impl Into<String>) -> Self {
        Term::Main(name.into())
    }

    /// Convenience constructor for a two-way interaction term.
    pub fn interaction(a: impl Into<String>, b: impl Into<String>) -> Self {
        Term::Interaction(a.into(), b.into())
    }
}

/// A single multiplicative factor of a design column.
#[derive(Debug, Clone)]
enum Indicator {
    Numeric(String),
    Dummy { var: String, level: String },
}

/// One column of the design matrix: the product of its factors.
///
/// An empty factor list is the intercept.
#[derive(Debug, Clone)]
struct DesignColumn {
    name: String,
    factors: Vec<Indicator>,
}

/// Builds conformable design matrices for a fixed set of terms.
///
/// Categorical variables use treatment coding: the first level observed
/// in the full dataset is the reference, and each remaining level gets a
/// dummy column named `var[level]`.
#[derive(Debug, Clone)]
pub struct DesignBuilder {
    columns: Vec<DesignColumn>,
}

impl DesignBuilder {
    /// Create a builder with an intercept followed by `terms`, with
    /// categorical encodings taken from `ds`.
    pub fn new(ds: &Dataset, terms: &[Term]) -> Result<Self> {
        let mut columns = vec![DesignColumn { name: "Intercept".to_string(), factors: vec![] }];
        for term in terms {
            match term {
                Term::Main(v) => {
                    for col in expand_variable(ds, v)? {
                        columns.push(col);
                    }
                }
                Term::Interaction(a, b) => {
                    let left = expand_variable(ds, a)?;
                    let right = expand_variable(ds, b)?;
                    for l in &left {
                        for r in &right {
                            let mut factors = l.factors.clone();
                            factors.extend(r.factors.iter().cloned());
                            columns.push(DesignColumn {
                                name: format!("{}:{}", l.name, r.name),
                                factors,
                            });
                        }
                    }
                }
            }
        }
        Ok(Self { columns })
    }

    /// Number of design columns, including the intercept.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Names of the design columns, in matrix order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Indices of the design columns carrying the main effect of `var`.
    ///
    /// A numeric variable yields one index; a categorical one yields one
    /// per non-reference level. Interaction columns are not included.
    pub fn main_effect_columns(&self, var: &str) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.factors.len() == 1
                    && match &c.factors[0] {
                        Indicator::Numeric(v) => v == var,
                        Indicator::Dummy { var: v, .. } => v == var,
                    }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of the interaction column for two numeric variables, if present.
    pub fn interaction_column(&self, a: &str, b: &str) -> Option<usize> {
        let want = format!("{a}:{b}");
        self.columns.iter().position(|c| c.name == want)
    }

    /// Materialise the design matrix over the given rows.
    pub fn build(&self, ds: &Dataset, rows: &[usize]) -> Result<DMatrix<f64>> {
        let p = self.columns.len();
        let mut x = DMatrix::zeros(rows.len(), p);
        for (i, &row) in rows.iter().enumerate() {
            for (j, col) in self.columns.iter().enumerate() {
                let mut v = 1.0;
                for factor in &col.factors {
                    v *= indicator_value(ds, factor, row)?;
                }
                x[(i, j)] = v;
            }
        }
        Ok(x)
    }
}

/// Extract a response vector over the given rows; the column must be numeric.
pub fn response_vector(ds: &Dataset, name: &str, rows: &[usize]) -> Result<DVector<f64>> {
    match ds.require(name)? {
        Column::Numeric(values) => {
            let mut y = DVector::zeros(rows.len());
            for (i, &row) in rows.iter().enumerate() {
                let v = values[row];
                if !v.is_finite() {
                    return Err(Error::Validation(format!(
                        "column '{name}' has a non-finite value at row {row}"
                    )));
                }
                y[i] = v;
            }
            Ok(y)
        }
        Column::Categorical(_) => Err(Error::Validation(format!(
            "column '{name}' is categorical, expected numeric"
        ))),
    }
}

fn expand_variable(ds: &Dataset, var: &str) -> Result<Vec<DesignColumn>> {
    match ds.require(var)? {
        Column::Numeric(_) => Ok(vec![DesignColumn {
            name: var.to_string(),
            factors: vec![Indicator::Numeric(var.to_string())],
        }]),
        Column::Categorical(values) => {
            let mut levels: Vec<&String> = Vec::new();
            for v in values.iter().flatten() {
                if !levels.contains(&v) {
                    levels.push(v);
                }
            }
            if levels.len() < 2 {
                return Err(Error::Validation(format!(
                    "categorical column '{var}' needs at least two levels, found {}",
                    levels.len()
                )));
            }
            // First observed level is the reference category.
            Ok(levels
                .into_iter()
                .skip(1)
                .map(|level| DesignColumn {
                    name: format!("{var}[{level}]"),
                    factors: vec![Indicator::Dummy { var: var.to_string(), level: level.clone() }],
                })
                .collect())
        }
    }
}

fn indicator_value(ds: &Dataset, factor: &Indicator, row: usize) -> Result<f64> {
    match factor {
        Indicator::Numeric(var) => match ds.require(var)? {
            Column::Numeric(values) => {
                let v = values[row];
                if v.is_finite() {
                    Ok(v)
                } else {
                    Err(Error::Validation(format!(
                        "column '{var}' has a non-finite value at row {row}"
                    )))
                }
            }
            Column::Categorical(_) => Err(Error::Validation(format!(
                "column '{var}' changed kind between construction and build"
            ))),
        },
        Indicator::Dummy { var, level } => match ds.require(var)? {
            Column::Categorical(values) => match &values[row] {
                Some(v) => Ok(if v == level { 1.0 } else { 0.0 }),
                None => Err(Error::Validation(format!(
                    "column '{var}' is missing at row {row}"
                ))),
            },
            Column::Numeric(_) => Err(Error::Validation(format!(
                "column '{var}' changed kind between construction and build"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.push_numeric("y", vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        ds.push_numeric("x", vec![0.5, 1.5, 2.5, 3.5]).unwrap();
        ds.push_categorical(
            "g",
            vec![
                Some("a".to_string()),
                Some("b".to_string()),
                Some("c".to_string()),
                Some("b".to_string()),
            ],
        )
        .unwrap();
        ds
    }

    #[test]
    fn numeric_main_effect() {
        let ds = mixed_dataset();
        let builder = DesignBuilder::new(&ds, &[Term::main("x")]).unwrap();
        assert_eq!(builder.column_names(), vec!["Intercept", "x"]);
        let x = builder.build(&ds, &[0, 2]).unwrap();
        assert_eq!(x.nrows(), 2);
        assert_eq!(x[(0, 0)], 1.0);
        assert_eq!(x[(1, 1)], 2.5);
    }

    #[test]
    fn treatment_coding_drops_reference() {
        let ds = mixed_dataset();
        let builder = DesignBuilder::new(&ds, &[Term::main("g")]).unwrap();
        assert_eq!(builder.column_names(), vec!["Intercept", "g[b]", "g[c]"]);
        let x = builder.build(&ds, &[0, 1, 2, 3]).unwrap();
        // Row 0 is the reference level "a".
        assert_eq!(x[(0, 1)], 0.0);
        assert_eq!(x[(0, 2)], 0.0);
        assert_eq!(x[(1, 1)], 1.0);
        assert_eq!(x[(2, 2)], 1.0);
        assert_eq!(builder.main_effect_columns("g"), vec![1, 2]);
    }

    #[test]
    fn encoding_fixed_for_subsets() {
        // A resample that never sees level "c" still gets its dummy column.
        let ds = mixed_dataset();
        let builder = DesignBuilder::new(&ds, &[Term::main("g")]).unwrap();
        let x = builder.build(&ds, &[0, 1, 1, 3]).unwrap();
        assert_eq!(x.ncols(), 3);
        assert!(x.column(2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn interaction_of_numeric_and_categorical() {
        let ds = mixed_dataset();
        let builder =
            DesignBuilder::new(&ds, &[Term::main("x"), Term::main("g"), Term::interaction("x", "g")])
                .unwrap();
        let names = builder.column_names();
        assert!(names.contains(&"x:g[b]".to_string()));
        assert!(names.contains(&"x:g[c]".to_string()));
        let x = builder.build(&ds, &[1]).unwrap();
        let j = names.iter().position(|n| n == "x:g[b]").unwrap();
        assert_eq!(x[(0, j)], 1.5);
    }

    #[test]
    fn numeric_interaction_column_lookup() {
        let mut ds = Dataset::new();
        ds.push_numeric("x", vec![1.0, 2.0]).unwrap();
        ds.push_numeric("w", vec![3.0, 4.0]).unwrap();
        let builder = DesignBuilder::new(
            &ds,
            &[Term::main("x"), Term::main("w"), Term::interaction("x", "w")],
        )
        .unwrap();
        let j = builder.interaction_column("x", "w").unwrap();
        let x = builder.build(&ds, &[1]).unwrap();
        assert_eq!(x[(0, j)], 8.0);
    }

    #[test]
    fn reference_is_first_observed_level() {
        let mut ds = Dataset::new();
        ds.push_categorical(
            "g",
            vec![
                Some("z".to_string()),
                Some("a".to_string()),
                Some("z".to_string()),
                Some("a".to_string()),
            ],
        )
        .unwrap();
        let builder = DesignBuilder::new(&ds, &[Term::main("g")]).unwrap();
        assert_eq!(builder.column_names(), vec!["Intercept", "g[a]"]);
        let x = builder.build(&ds, &[0, 1]).unwrap();
        assert_eq!(x[(0, 1)], 0.0);
        assert_eq!(x[(1, 1)], 1.0);
    }

    #[test]
    fn single_level_categorical_rejected() {
        let mut ds = Dataset::new();
        ds.push_categorical("g", vec![Some("a".to_string()), Some("a".to_string())]).unwrap();
        assert!(DesignBuilder::new(&ds, &[Term::main("g")]).is_err());
    }
}
