//! Bootstrap resampling for the indirect effect.
//!
//! Replicates are generated with per-replicate seeded RNGs and fan out
//! over a `rayon` parallel iterator, so a fixed seed gives identical
//! results at any thread count. Intervals: percentile (default) and BCa
//! (Efron 1987), with the acceleration constant from jackknife
//! leave-one-out estimates.

use mp_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

const PROB_EPS: f64 = 1e-12;

/// Interval construction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CiMethod {
    /// Plain quantiles of the replicate distribution.
    #[default]
    Percentile,
    /// Bias-corrected and accelerated quantiles.
    Bca,
}

/// A bootstrap confidence interval for one statistic.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapCi {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
    /// Nominal coverage.
    pub conf_level: f64,
    /// Replicates that contributed to the interval.
    pub n_replicates: usize,
    /// Replicates whose refit failed and were skipped.
    pub n_failed: usize,
    /// Method used.
    pub method: CiMethod,
}

/// Successful replicate statistics plus the failure count.
#[derive(Debug, Clone)]
pub struct ReplicateSet {
    /// One statistics vector per successful replicate.
    pub replicates: Vec<Vec<f64>>,
    /// Replicates that returned an error.
    pub n_failed: usize,
}

impl ReplicateSet {
    /// Values of statistic `k` across replicates.
    pub fn statistic(&self, k: usize) -> Vec<f64> {
        self.replicates.iter().map(|r| r[k]).collect()
    }
}

/// Run `n_boot` replicates of `estimate` in parallel.
///
/// Each replicate gets its own `StdRng` seeded from
/// `seed.wrapping_add(i)`, making the run reproducible regardless of
/// scheduling. Failed replicates are counted, not fatal, unless every
/// replicate fails.
pub fn run_replicates<F>(n_boot: usize, seed: u64, estimate: F) -> Result<ReplicateSet>
where
    F: Fn(&mut StdRng) -> Result<Vec<f64>> + Sync,
{
    if n_boot == 0 {
        return Err(Error::Validation("bootstrap replicate count must be > 0".to_string()));
    }

    let outcomes: Vec<Result<Vec<f64>>> = (0..n_boot as u64)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i));
            estimate(&mut rng)
        })
        .collect();

    let mut replicates = Vec::with_capacity(n_boot);
    let mut n_failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(stats) => replicates.push(stats),
            Err(e) => {
                n_failed += 1;
                log::warn!("bootstrap replicate failed: {e}");
            }
        }
    }
    if replicates.is_empty() {
        return Err(Error::Computation(format!(
            "all {n_boot} bootstrap replicates failed"
        )));
    }
    Ok(ReplicateSet { replicates, n_failed })
}

/// Draw `rows.len()` row indices from `rows` with replacement.
pub fn resample_rows(rows: &[usize], rng: &mut StdRng) -> Vec<usize> {
    (0..rows.len()).map(|_| rows[rng.gen_range(0..rows.len())]).collect()
}

/// Build the interval for one statistic from its replicate values.
///
/// `jackknife` (leave-one-out estimates of the same statistic) is
/// required for [`CiMethod::Bca`].
pub fn confidence_interval(
    theta_hat: f64,
    samples: &[f64],
    jackknife: Option<&[f64]>,
    conf_level: f64,
    method: CiMethod,
    n_failed: usize,
) -> Result<BootstrapCi> {
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!(
            "conf_level must be in (0,1), got {conf_level}"
        )));
    }
    if samples.len() < 2 {
        return Err(Error::Computation(
            "need at least 2 successful replicates for an interval".to_string(),
        ));
    }

    let alpha = (1.0 - conf_level) / 2.0;
    let (lo_q, hi_q) = match method {
        CiMethod::Percentile => (alpha, 1.0 - alpha),
        CiMethod::Bca => {
            let jk = jackknife.ok_or_else(|| {
                Error::Validation("BCa interval requires jackknife estimates".to_string())
            })?;
            let z0 = bias_correction(theta_hat, samples)?;
            let a = acceleration(jk)?;
            (adjusted_alpha(alpha, z0, a), adjusted_alpha(1.0 - alpha, z0, a))
        }
    };

    let lo = quantile(samples, lo_q);
    let hi = quantile(samples, hi_q);
    Ok(BootstrapCi {
        lower: lo.min(hi),
        upper: lo.max(hi),
        conf_level,
        n_replicates: samples.len(),
        n_failed,
        method,
    })
}

/// Quantile by sorting and linear interpolation; endpoints map to min/max.
pub fn quantile(data: &[f64], q: f64) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let i = pos.floor() as usize;
    let frac = pos - i as f64;
    if frac == 0.0 || i + 1 >= v.len() {
        v[i]
    } else {
        (1.0 - frac) * v[i] + frac * v[i + 1]
    }
}

/// Bias-correction constant z0, with mid-rank handling of ties.
fn bias_correction(theta_hat: f64, samples: &[f64]) -> Result<f64> {
    if !theta_hat.is_finite() || samples.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation(
            "bias correction needs finite point estimate and replicates".to_string(),
        ));
    }
    let n_lt = samples.iter().filter(|&&v| v < theta_hat).count() as f64;
    let n_eq = samples.iter().filter(|&&v| v == theta_hat).count() as f64;
    let p = (n_lt + 0.5 * n_eq) / samples.len() as f64;
    Ok(inv_norm_cdf(p))
}

/// Acceleration constant from jackknife leave-one-out estimates.
fn acceleration(jackknife: &[f64]) -> Result<f64> {
    if jackknife.len() < 3 {
        return Err(Error::Computation(
            "acceleration needs at least 3 jackknife estimates".to_string(),
        ));
    }
    if jackknife.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation("jackknife estimates must be finite".to_string()));
    }
    let mean = jackknife.iter().sum::<f64>() / jackknife.len() as f64;
    let mut sum2 = 0.0;
    let mut sum3 = 0.0;
    for &v in jackknife {
        let d = mean - v;
        sum2 += d * d;
        sum3 += d * d * d;
    }
    if sum2 <= 0.0 {
        // No variation across leave-one-out estimates.
        return Ok(0.0);
    }
    let a = sum3 / (6.0 * sum2.powf(1.5));
    if a.is_finite() {
        Ok(a)
    } else {
        Err(Error::Computation("acceleration estimate is non-finite".to_string()))
    }
}

fn adjusted_alpha(alpha: f64, z0: f64, a: f64) -> f64 {
    let z_alpha = inv_norm_cdf(alpha);
    let denom = 1.0 - a * (z0 + z_alpha);
    if !denom.is_finite() || denom.abs() < 1e-12 {
        return if denom.is_sign_negative() { PROB_EPS } else { 1.0 - PROB_EPS };
    }
    norm_cdf(z0 + (z0 + z_alpha) / denom).clamp(PROB_EPS, 1.0 - PROB_EPS)
}

fn standard_normal() -> Normal {
    // Safe by construction for mean=0, sigma=1.
    Normal::new(0.0, 1.0).expect("standard normal should be constructible")
}

fn inv_norm_cdf(p: f64) -> f64 {
    standard_normal().inverse_cdf(p.clamp(PROB_EPS, 1.0 - PROB_EPS))
}

fn norm_cdf(z: f64) -> f64 {
    standard_normal().cdf(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantile_endpoints_and_midpoint() {
        let xs = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert_relative_eq!(quantile(&xs, 0.0), 1.0);
        assert_relative_eq!(quantile(&xs, 1.0), 5.0);
        assert_relative_eq!(quantile(&xs, 0.5), 3.0);
        assert_relative_eq!(quantile(&xs, 0.25), 2.0);
    }

    #[test]
    fn percentile_interval_brackets_the_bulk() {
        let xs: Vec<f64> = (0..101).map(|i| i as f64).collect();
        let ci = confidence_interval(50.0, &xs, None, 0.90, CiMethod::Percentile, 0).unwrap();
        assert_relative_eq!(ci.lower, 5.0, epsilon = 1e-10);
        assert_relative_eq!(ci.upper, 95.0, epsilon = 1e-10);
        assert_eq!(ci.n_replicates, 101);
    }

    #[test]
    fn bca_reduces_to_percentile_for_symmetric_replicates() {
        // Symmetric around the point estimate: z0 ~ 0; flat jackknife: a = 0.
        let xs: Vec<f64> = (0..101).map(|i| i as f64).collect();
        let jk = vec![50.0; 10];
        let bca = confidence_interval(50.0, &xs, Some(&jk), 0.90, CiMethod::Bca, 0).unwrap();
        let pct =
            confidence_interval(50.0, &xs, None, 0.90, CiMethod::Percentile, 0).unwrap();
        assert_relative_eq!(bca.lower, pct.lower, epsilon = 0.5);
        assert_relative_eq!(bca.upper, pct.upper, epsilon = 0.5);
    }

    #[test]
    fn bca_requires_jackknife() {
        let xs = [1.0, 2.0, 3.0];
        assert!(confidence_interval(2.0, &xs, None, 0.95, CiMethod::Bca, 0).is_err());
    }

    #[test]
    fn replicates_are_deterministic_and_parallel_safe() {
        let rows: Vec<usize> = (0..50).collect();
        let run = |seed| {
            run_replicates(64, seed, |rng| {
                let sample = resample_rows(&rows, rng);
                Ok(vec![sample.iter().sum::<usize>() as f64 / sample.len() as f64])
            })
            .unwrap()
        };
        let a = run(7);
        let b = run(7);
        let c = run(8);
        assert_eq!(a.replicates, b.replicates);
        assert_ne!(a.replicates, c.replicates);
        assert_eq!(a.n_failed, 0);
    }

    #[test]
    fn failed_replicates_are_counted() {
        let run = run_replicates(10, 3, |rng| {
            if rng.gen_range(0..2) == 0 {
                Err(Error::Computation("singular".to_string()))
            } else {
                Ok(vec![1.0])
            }
        })
        .unwrap();
        assert_eq!(run.replicates.len() + run.n_failed, 10);
        assert!(run.n_failed > 0);
    }

    #[test]
    fn all_failures_is_an_error() {
        let out = run_replicates(5, 0, |_| -> Result<Vec<f64>> {
            Err(Error::Computation("no".to_string()))
        });
        assert!(out.is_err());
    }
}
