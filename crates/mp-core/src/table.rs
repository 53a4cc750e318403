//! Tabular dataset type.
//!
//! Analysis functions take a [`Dataset`]: named columns over aligned rows.
//! Numeric columns use `NaN` as the missing marker; categorical columns use
//! `None`. The type is deliberately small: it is an input container, not a
//! dataframe library.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single named column of observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum Column {
    /// Continuous values; `NaN` marks a missing observation.
    Numeric(Vec<f64>),
    /// Categorical labels; `None` marks a missing observation.
    Categorical(Vec<Option<String>>),
}

impl Column {
    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    /// True if the column holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the observation at `row` is missing.
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(v) => v.get(row).map(|x| x.is_nan()).unwrap_or(true),
            Column::Categorical(v) => v.get(row).map(|x| x.is_none()).unwrap_or(true),
        }
    }

    /// True for [`Column::Numeric`].
    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }
}

/// Named, row-aligned columns (rows = observations, columns = variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (0 for an empty dataset).
    pub fn n_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names, in insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names.iter().position(|n| n == name).map(|i| &self.columns[i])
    }

    /// Look up a column by name, or fail with a descriptive error.
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| {
            Error::Validation(format!("variable '{name}' not found in dataset"))
        })
    }

    fn push(&mut self, name: &str, column: Column) -> Result<()> {
        if self.names.iter().any(|n| n == name) {
            return Err(Error::Validation(format!("duplicate column name '{name}'")));
        }
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(Error::Validation(format!(
                "column '{}' has {} rows, expected {}",
                name,
                column.len(),
                self.n_rows()
            )));
        }
        self.names.push(name.to_string());
        self.columns.push(column);
        Ok(())
    }

    /// Add a numeric column (`NaN` = missing).
    pub fn push_numeric(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.iter().any(|v| v.is_infinite()) {
            return Err(Error::Validation(format!(
                "column '{name}' contains non-finite values (use NaN for missing)"
            )));
        }
        self.push(name, Column::Numeric(values))
    }

    /// Add a categorical column (`None` = missing).
    pub fn push_categorical(&mut self, name: &str, values: Vec<Option<String>>) -> Result<()> {
        self.push(name, Column::Categorical(values))
    }

    /// Row indices with a non-missing value in every listed variable.
    pub fn complete_rows(&self, variables: &[&str]) -> Result<Vec<usize>> {
        let cols: Vec<&Column> =
            variables.iter().map(|v| self.require(v)).collect::<Result<_>>()?;
        let n = self.n_rows();
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            if cols.iter().all(|c| !c.is_missing(i)) {
                out.push(i);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Dataset {
        let mut ds = Dataset::new();
        ds.push_numeric("y", vec![1.0, 2.0, f64::NAN, 4.0]).unwrap();
        ds.push_categorical(
            "g",
            vec![Some("a".into()), None, Some("b".into()), Some("a".into())],
        )
        .unwrap();
        ds
    }

    #[test]
    fn shape_and_lookup() {
        let ds = small();
        assert_eq!(ds.n_rows(), 4);
        assert_eq!(ds.n_cols(), 2);
        assert!(ds.column("y").unwrap().is_numeric());
        assert!(ds.column("nope").is_none());
        assert!(ds.require("nope").is_err());
    }

    #[test]
    fn missingness() {
        let ds = small();
        let y = ds.column("y").unwrap();
        assert!(!y.is_missing(0));
        assert!(y.is_missing(2));
        let g = ds.column("g").unwrap();
        assert!(g.is_missing(1));
    }

    #[test]
    fn complete_rows_listwise() {
        let ds = small();
        assert_eq!(ds.complete_rows(&["y", "g"]).unwrap(), vec![0, 3]);
        assert_eq!(ds.complete_rows(&["y"]).unwrap(), vec![0, 1, 3]);
    }

    #[test]
    fn rejects_ragged_and_duplicate_columns() {
        let mut ds = small();
        assert!(ds.push_numeric("y", vec![0.0; 4]).is_err());
        assert!(ds.push_numeric("short", vec![0.0; 2]).is_err());
        assert!(ds.push_numeric("inf", vec![f64::INFINITY; 4]).is_err());
    }

    #[test]
    fn json_roundtrip() {
        // serde_json cannot represent NaN, so roundtrip a complete dataset.
        let mut ds = Dataset::new();
        ds.push_numeric("y", vec![1.0, 2.0, 3.0]).unwrap();
        ds.push_categorical("g", vec![Some("a".into()), Some("b".into()), None]).unwrap();
        let json = serde_json::to_string(&ds).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n_rows(), 3);
        assert_eq!(back.names(), ds.names());
        assert!(back.column("g").unwrap().is_missing(2));
    }
}
