//! Draws of marginalized parameters from their conditional posteriors.
//!
//! After sampling with marginalized parameters, each one is restored by
//! drawing from its posterior conditioned on the other parameters, in the
//! order calibration, time, distance, phase. The helpers here turn tabulated
//! log-likelihoods into draws; the engine supplies the tables.
use ndarray::{Array1, ArrayView1};
use rand::{
    distributions::{Distribution, WeightedIndex},
    RngCore,
};

use crate::{
    likelihood::errors::{LikelihoodError, LikelihoodResult},
    numerics::sample_tabulated,
};

/// Fraction of the peak below which time bins are discarded.
pub const TIME_POSTERIOR_THRESHOLD: f64 = 1e-3;
/// Minimum number of time bins handed to the interpolating sampler.
pub const MINIMUM_TIME_SUPPORT: usize = 3;

/// `exp(ll − max ll)·prior`; all zeros when no entry is finite.
pub fn posterior_from_log_likelihood(log_likelihood: ArrayView1<f64>, prior: ArrayView1<f64>) -> Array1<f64> {
    let max = log_likelihood.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Array1::zeros(log_likelihood.len());
    }
    let mut post = log_likelihood.mapv(|v| if v.is_nan() { 0.0 } else { (v - max).exp() });
    post *= &prior;
    post
}

/// Draw from a tabulated posterior on `xs`.
///
/// Errors
/// ------
/// - `EmptyPosterior` when the posterior has no mass.
pub fn sample_posterior(
    parameter: &'static str, xs: ArrayView1<f64>, posterior: ArrayView1<f64>, rng: &mut dyn RngCore,
) -> LikelihoodResult<f64> {
    sample_tabulated(xs, posterior, rng).ok_or(LikelihoodError::EmptyPosterior { parameter })
}

/// Sort the time bins and keep those above `TIME_POSTERIOR_THRESHOLD` of the
/// peak.
///
/// When fewer than `MINIMUM_TIME_SUPPORT` bins survive, each kept bin also
/// keeps its immediate neighbors so the interpolating sampler has a
/// non-degenerate support.
pub fn trim_time_posterior(times: ArrayView1<f64>, posterior: ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) {
    let mut pairs: Vec<(f64, f64)> = times.iter().copied().zip(posterior.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let peak = pairs.iter().map(|p| p.1).fold(0.0, f64::max);
    let threshold = peak * TIME_POSTERIOR_THRESHOLD;
    let mut keep: Vec<bool> = pairs.iter().map(|p| p.1 > threshold).collect();
    if keep.iter().filter(|&&k| k).count() < MINIMUM_TIME_SUPPORT {
        let base = keep.clone();
        for (i, _) in base.iter().enumerate().filter(|(_, &k)| k) {
            if i > 0 {
                keep[i - 1] = true;
            }
            if i + 1 < keep.len() {
                keep[i + 1] = true;
            }
        }
    }
    let kept: Vec<(f64, f64)> = pairs.into_iter().zip(keep).filter_map(|(p, k)| k.then_some(p)).collect();
    (
        Array1::from_iter(kept.iter().map(|p| p.0)),
        Array1::from_iter(kept.iter().map(|p| p.1)),
    )
}

/// Index drawn with probability `∝ exp(ll_c)`.
///
/// Errors
/// ------
/// - `EmptyPosterior` when no entry is finite.
pub fn sample_calibration_index(log_likelihood: ArrayView1<f64>, rng: &mut dyn RngCore) -> LikelihoodResult<usize> {
    let weights = posterior_from_log_likelihood(log_likelihood, Array1::ones(log_likelihood.len()).view());
    let dist = WeightedIndex::new(weights.iter().copied())
        .map_err(|_| LikelihoodError::EmptyPosterior { parameter: "recalib_index" })?;
    Ok(dist.sample(rng))
}
