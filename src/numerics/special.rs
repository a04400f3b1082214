//! Log-space reductions and the log of the modified Bessel function `I0`.
//!
//! The helpers here keep likelihood arithmetic in log space so that sums of
//! exponentials over thousands of grid points (time samples, calibration
//! draws, distance grid) never overflow. They follow the guarded strategy of
//! shifting by the running maximum before exponentiating.
//!
//! # Provided items
//! - [`logsumexp`]: `ln Σ exp(aᵢ)`.
//! - [`logsumexp_weighted`]: `ln Σ bᵢ exp(aᵢ)` with non-negative weights;
//!   entries with `bᵢ == 0` are skipped entirely, so `-inf` log-likelihoods
//!   outside a prior support never poison the result.
//! - [`ln_i0`]: `ln I0(x)` via a power series below [`LN_I0_SERIES_CUTOFF`]
//!   and an asymptotic expansion above it.
//!
//! # Non-finite inputs
//! A `NaN` anywhere in a contributing entry yields `NaN`. An all-`-inf` (or
//! all-zero-weight) input yields `-inf`. A `+inf` entry yields `+inf`.
use ndarray::ArrayView1;

/// Switch-over point between the series and asymptotic branches of [`ln_i0`].
pub const LN_I0_SERIES_CUTOFF: f64 = 15.0;

const SERIES_MAX_TERMS: usize = 500;
const ASYMPTOTIC_MAX_TERMS: usize = 60;

/// Stable `ln Σ exp(aᵢ)`.
///
/// # Arguments
/// - `values`: log-space terms.
///
/// # Returns
/// `-inf` for an empty input or when every term is `-inf`.
pub fn logsumexp(values: ArrayView1<f64>) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Stable `ln Σ bᵢ exp(aᵢ)` for non-negative weights `bᵢ`.
///
/// # Arguments
/// - `values`: log-space terms `aᵢ`.
/// - `weights`: linear-space weights `bᵢ ≥ 0`, same length as `values`.
///
/// # Returns
/// The weighted log-sum. Terms whose weight is exactly zero do not
/// contribute, even when `aᵢ` is `±inf` or `NaN`.
///
/// # Panics
/// Panics if the two views differ in length.
pub fn logsumexp_weighted(values: ArrayView1<f64>, weights: ArrayView1<f64>) -> f64 {
    assert_eq!(values.len(), weights.len(), "logsumexp_weighted: length mismatch");

    let mut max = f64::NEG_INFINITY;
    for (&a, &b) in values.iter().zip(weights.iter()) {
        if b == 0.0 {
            continue;
        }
        if a.is_nan() || b.is_nan() {
            return f64::NAN;
        }
        if a > max {
            max = a;
        }
    }
    if !max.is_finite() {
        return max;
    }

    let sum: f64 = values
        .iter()
        .zip(weights.iter())
        .filter(|(_, b)| **b != 0.0)
        .map(|(&a, &b)| b * (a - max).exp())
        .sum();
    if sum <= 0.0 {
        return f64::NEG_INFINITY;
    }
    max + sum.ln()
}

/// Natural log of the modified Bessel function of the first kind, order 0.
///
/// `I0` is even, so only `|x|` matters. Below the cutoff the ascending series
/// `Σ (x²/4)ᵏ / (k!)²` is summed directly; above it the Hankel expansion
///
/// `ln I0(x) ≈ x − ½ ln(2πx) + ln(1 + Σ tₖ)`, `tₖ = tₖ₋₁ (2k − 1)² / (8xk)`
///
/// is used, truncated at the smallest term. Neither branch overflows for
/// large arguments.
pub fn ln_i0(x: f64) -> f64 {
    let x = x.abs();
    if x.is_nan() {
        return f64::NAN;
    }
    if x.is_infinite() {
        return f64::INFINITY;
    }

    if x < LN_I0_SERIES_CUTOFF {
        let quarter_x_sq = 0.25 * x * x;
        let mut term = 1.0;
        let mut sum = 1.0;
        for k in 1..SERIES_MAX_TERMS {
            let kf = k as f64;
            term *= quarter_x_sq / (kf * kf);
            sum += term;
            if term < sum * f64::EPSILON {
                break;
            }
        }
        sum.ln()
    } else {
        let mut term = 1.0;
        let mut sum = 1.0;
        for k in 1..ASYMPTOTIC_MAX_TERMS {
            let kf = k as f64;
            let odd = 2.0 * kf - 1.0;
            let next = term * odd * odd / (8.0 * x * kf);
            // asymptotic series: stop once terms stop shrinking
            if next >= term || next < sum * f64::EPSILON {
                break;
            }
            term = next;
            sum += term;
        }
        x - 0.5 * (2.0 * std::f64::consts::PI * x).ln() + sum.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // - `logsumexp` / `logsumexp_weighted` agreement with naive formulas and
    //   their handling of -inf terms and zero weights.
    // - `ln_i0` against reference values on both sides of the cutoff and its
    //   continuity at the switch-over point.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // `logsumexp` matches the naive formula on a well-scaled input.
    //
    // Given
    // -----
    // - values = [0, 1, 2].
    //
    // Expect
    // ------
    // - ln(e⁰ + e¹ + e²).
    fn logsumexp_matches_naive_sum() {
        let values = array![0.0, 1.0, 2.0];
        let expected = (1.0f64 + 1.0f64.exp() + 2.0f64.exp()).ln();
        assert_relative_eq!(logsumexp(values.view()), expected, epsilon = 1e-14);
    }

    #[test]
    // Purpose
    // -------
    // Large inputs do not overflow.
    //
    // Given
    // -----
    // - values = [1000, 1000].
    //
    // Expect
    // ------
    // - 1000 + ln 2.
    fn logsumexp_is_stable_for_large_inputs() {
        let values = array![1000.0, 1000.0];
        assert_relative_eq!(logsumexp(values.view()), 1000.0 + 2.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Zero weights skip their entries, including -inf ones.
    //
    // Given
    // -----
    // - values = [-inf, 0, 5], weights = [0, 2, 0].
    //
    // Expect
    // ------
    // - ln 2.
    fn logsumexp_weighted_skips_zero_weights() {
        let values = array![f64::NEG_INFINITY, 0.0, 5.0];
        let weights = array![0.0, 2.0, 0.0];
        assert_relative_eq!(
            logsumexp_weighted(values.view(), weights.view()),
            2.0f64.ln(),
            epsilon = 1e-14
        );
    }

    #[test]
    // Purpose
    // -------
    // An input with no contributing entries reduces to -inf.
    //
    // Given
    // -----
    // - all weights zero.
    //
    // Expect
    // ------
    // - -inf, not NaN.
    fn logsumexp_weighted_all_zero_weights_is_neg_infinity() {
        let values = array![1.0, 2.0];
        let weights = array![0.0, 0.0];
        assert_eq!(logsumexp_weighted(values.view(), weights.view()), f64::NEG_INFINITY);
    }

    #[test]
    // Purpose
    // -------
    // `ln_i0` matches tabulated values of I0.
    //
    // Given
    // -----
    // - I0(0) = 1, I0(1) = 1.2660658777520082, I0(20) = 4.355828255955353e7.
    //
    // Expect
    // ------
    // - Relative agreement at 1e-12 or better.
    fn ln_i0_matches_reference_values() {
        assert_eq!(ln_i0(0.0), 0.0);
        assert_relative_eq!(ln_i0(1.0), 1.2660658777520082f64.ln(), max_relative = 1e-12);
        assert_relative_eq!(ln_i0(-1.0), 1.2660658777520082f64.ln(), max_relative = 1e-12);
        assert_relative_eq!(ln_i0(20.0), 4.355828255955353e7f64.ln(), max_relative = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Both branches agree at the cutoff and large arguments stay finite.
    //
    // Given
    // -----
    // - x just below and at `LN_I0_SERIES_CUTOFF`, and x = 1e6.
    //
    // Expect
    // ------
    // - Values within 1e-10 relative across the switch; finite at 1e6.
    fn ln_i0_is_continuous_and_does_not_overflow() {
        let below = ln_i0(LN_I0_SERIES_CUTOFF - 1e-9);
        let at = ln_i0(LN_I0_SERIES_CUTOFF);
        assert_relative_eq!(below, at, max_relative = 1e-10);

        let big = ln_i0(1e6);
        assert!(big.is_finite());
        assert_relative_eq!(big, 1e6 - 0.5 * (2.0 * std::f64::consts::PI * 1e6).ln(), epsilon = 1e-6);
    }
}
