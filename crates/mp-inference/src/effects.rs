//! Indirect-effect significance testing.
//!
//! The Sobel z statistic tests `H0: a·b = 0` using the delta-method
//! variance of the product of the two path coefficients. The Aroian
//! variant adds the second-order `se_a²·se_b²` term and is the default.

use mp_core::{Error, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Variance formula for the product-of-coefficients test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SobelVariant {
    /// First-order delta method: `b²se_a² + a²se_b²`.
    Sobel,
    /// Adds the exact second-order term `se_a²se_b²`.
    #[default]
    Aroian,
}

/// Result of a Sobel-type test of the indirect effect.
#[derive(Debug, Clone, Serialize)]
pub struct SobelTest {
    /// Variance formula used.
    pub variant: SobelVariant,
    /// Standard error of the product `a·b`.
    pub se: f64,
    /// z statistic; its sign matches the sign of `a·b`.
    pub z: f64,
    /// Two-sided normal p-value.
    pub p_value: f64,
}

/// Test the product `a·b` against zero.
///
/// `se_a` and `se_b` are the standard errors of the two path
/// coefficients; both must be positive.
pub fn sobel_test(
    a: f64,
    se_a: f64,
    b: f64,
    se_b: f64,
    variant: SobelVariant,
) -> Result<SobelTest> {
    if !(a.is_finite() && b.is_finite()) {
        return Err(Error::Computation("path coefficients must be finite".to_string()));
    }
    if !(se_a.is_finite() && se_a > 0.0 && se_b.is_finite() && se_b > 0.0) {
        return Err(Error::Computation(format!(
            "path standard errors must be positive, got se_a = {se_a}, se_b = {se_b}"
        )));
    }

    let mut var = b * b * se_a * se_a + a * a * se_b * se_b;
    if variant == SobelVariant::Aroian {
        var += se_a * se_a * se_b * se_b;
    }
    let se = var.sqrt();
    let z = a * b / se;

    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::Computation(format!("normal distribution: {e}")))?;
    let p_value = 2.0 * normal.sf(z.abs());

    Ok(SobelTest { variant, se, z, p_value })
}

/// Indirect effect as a share of the total, when defensible.
///
/// Returns `None` when the total effect is too close to zero for the
/// ratio to mean anything.
pub fn proportion_mediated(indirect: f64, total: f64) -> Option<f64> {
    if total.abs() > 1e-10 {
        Some(indirect / total)
    } else {
        None
    }
}
