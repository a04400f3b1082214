//! Marginalization strategy: which grid is summed over, and how each grid
//! point is reduced.
//!
//! Purpose
//! -------
//! Resolve the four marginalization flags once at construction into a
//! [`MarginalizationStrategy`] and reduce a [`CalculatedSnrs`] record to a
//! log-likelihood ratio with it.
//!
//! Key behaviors
//! -------------
//! - The *outer* reduction sums over a grid produced by the kernel: time
//!   shifts, calibration draws, or both.
//! - The *inner* reduction turns one `(d·h, h·h)` pair into a log-likelihood:
//!   plain `Re(d·h) − h·h/2`, phase-marginalized `ln I0(|d·h|) − h·h/2`, or the
//!   distance lookup table (which itself covers the phase when requested).
//! - Reductions:
//!   - time: `ln Σ_n p(t_n) Δtc exp(ll_n)`;
//!   - calibration: `ln Σ_c exp(ll_c) − ln N`;
//!   - time + calibration: `ln Σ_{c,n} p(t_n) Δtc / N · exp(Re(d_{c,n}) − h_c/2)`.
//!
//! Invariants & assumptions
//! ------------------------
//! - Calibration is combined with at most one other flag (see
//!   [`validate_combination`]); with time it only admits the plain inner
//!   reduction.
//! - A record whose grid does not match the outer reduction falls back to
//!   the scalar inner reduction.
use ndarray::{Array1, Axis};
use num_complex::Complex64;

use crate::{
    likelihood::{
        core::{
            options::MarginalizationOptions,
            parameters::SourceParameters,
            snr::{CalculatedSnrs, SnrGrid},
            validation::validate_combination,
        },
        errors::LikelihoodResult,
        marginalization::{
            distance::DistanceLookupTable, phase::phase_marginalized_likelihood, time::TimeGrid,
        },
    },
    numerics::{logsumexp, logsumexp_weighted},
};

/// Grid the kernel evaluates and the reduction sums over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterMarginalization {
    None,
    Time,
    Calibration,
    TimeCalibration,
}

/// Per-grid-point reduction of `(d·h, h·h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerReduction {
    Plain,
    Phase,
    Distance,
}

/// Precomputed state the reductions read.
#[derive(Debug, Clone, Copy)]
pub struct ReductionContext<'a> {
    pub distance_table: Option<&'a DistanceLookupTable>,
    pub time_grid: Option<&'a TimeGrid>,
    pub parameters: &'a SourceParameters,
}

/// Resolved combination of marginalizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginalizationStrategy {
    pub outer: OuterMarginalization,
    pub inner: InnerReduction,
}

impl MarginalizationStrategy {
    /// Resolve `flags`.
    ///
    /// Errors
    /// ------
    /// - `InvalidMarginalizationCombination` for unsupported subsets.
    pub fn from_flags(flags: &MarginalizationOptions) -> LikelihoodResult<Self> {
        validate_combination(flags)?;
        let outer = match (flags.time, flags.calibration) {
            (false, false) => OuterMarginalization::None,
            (true, false) => OuterMarginalization::Time,
            (false, true) => OuterMarginalization::Calibration,
            (true, true) => OuterMarginalization::TimeCalibration,
        };
        let inner = if flags.distance {
            InnerReduction::Distance
        } else if flags.phase {
            InnerReduction::Phase
        } else {
            InnerReduction::Plain
        };
        Ok(MarginalizationStrategy { outer, inner })
    }

    pub fn needs_time_grid(&self) -> bool {
        matches!(self.outer, OuterMarginalization::Time | OuterMarginalization::TimeCalibration)
    }

    pub fn needs_calibration_draws(&self) -> bool {
        matches!(self.outer, OuterMarginalization::Calibration | OuterMarginalization::TimeCalibration)
    }

    /// Log-likelihood ratio of one `(d·h, h·h)` pair.
    pub fn inner_log_likelihood(&self, d_inner_h: Complex64, h_inner_h: f64, ctx: &ReductionContext<'_>) -> f64 {
        match self.inner {
            InnerReduction::Plain => d_inner_h.re - h_inner_h / 2.0,
            InnerReduction::Phase => phase_marginalized_likelihood(d_inner_h, h_inner_h),
            InnerReduction::Distance => ctx.distance_table.map_or(f64::NAN, |table| {
                table.marginalized_likelihood(d_inner_h, h_inner_h, ctx.parameters.luminosity_distance)
            }),
        }
    }

    /// Reduce an accumulated record to the log-likelihood ratio.
    pub fn reduce(&self, snrs: &CalculatedSnrs, ctx: &ReductionContext<'_>) -> f64 {
        let geocent = ctx.parameters.geocent_time;
        match (&snrs.grid, ctx.time_grid) {
            (SnrGrid::Time { d_inner_h }, Some(grid)) => {
                let ll = d_inner_h.mapv(|d| self.inner_log_likelihood(d, snrs.optimal_snr_squared, ctx));
                grid.marginalize(ll.view(), geocent)
            }
            (SnrGrid::Calibration { d_inner_h, optimal_snr_squared }, _) => {
                let ll = Array1::from_iter(
                    d_inner_h
                        .iter()
                        .zip(optimal_snr_squared.iter())
                        .map(|(&d, &h)| self.inner_log_likelihood(d, h, ctx)),
                );
                logsumexp(ll.view()) - (ll.len() as f64).ln()
            }
            (SnrGrid::TimeCalibration { d_inner_h, optimal_snr_squared }, Some(grid)) => {
                let n_draws = d_inner_h.len_of(Axis(0));
                let time_weights = grid.weights(geocent) / n_draws as f64;
                let mut ll = Vec::with_capacity(d_inner_h.len());
                let mut weights = Vec::with_capacity(d_inner_h.len());
                for (row, &h) in d_inner_h.outer_iter().zip(optimal_snr_squared.iter()) {
                    for (&d, &w) in row.iter().zip(time_weights.iter()) {
                        ll.push(d.re - h / 2.0);
                        weights.push(w);
                    }
                }
                logsumexp_weighted(Array1::from_vec(ll).view(), Array1::from_vec(weights).view())
            }
            _ => self.inner_log_likelihood(snrs.d_inner_h, snrs.optimal_snr_squared, ctx),
        }
    }

    /// Human-readable label, e.g. `time+distance`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.needs_time_grid() {
            parts.push("time");
        }
        match self.inner {
            InnerReduction::Distance => parts.push("distance"),
            InnerReduction::Phase => parts.push("phase"),
            InnerReduction::Plain => {}
        }
        if self.needs_calibration_draws() {
            parts.push("calibration");
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join("+")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::core::{options::TimeReference, priors::UniformPrior};
    use crate::numerics::ln_i0;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};
    use std::sync::Arc;

    fn flags(t: bool, d: bool, p: bool, c: bool) -> MarginalizationOptions {
        MarginalizationOptions::new(t, d, p, c, false, TimeReference::Geocenter)
    }

    fn context<'a>(params: &'a SourceParameters, grid: Option<&'a TimeGrid>) -> ReductionContext<'a> {
        ReductionContext { distance_table: None, time_grid: grid, parameters: params }
    }

    #[test]
    // Purpose
    // -------
    // Flags resolve to the documented outer/inner pair.
    //
    // Given
    // -----
    // - {time, phase}, {calibration}, {time, calibration}, {distance, phase}.
    //
    // Expect
    // ------
    // - (Time, Phase), (Calibration, Plain), (TimeCalibration, Plain),
    //   (None, Distance).
    fn flags_resolve_to_strategies() {
        let s = MarginalizationStrategy::from_flags(&flags(true, false, true, false)).unwrap();
        assert_eq!((s.outer, s.inner), (OuterMarginalization::Time, InnerReduction::Phase));
        let s = MarginalizationStrategy::from_flags(&flags(false, false, false, true)).unwrap();
        assert_eq!((s.outer, s.inner), (OuterMarginalization::Calibration, InnerReduction::Plain));
        let s = MarginalizationStrategy::from_flags(&flags(true, false, false, true)).unwrap();
        assert_eq!(s.outer, OuterMarginalization::TimeCalibration);
        assert_eq!(s.describe(), "time+calibration");
        let s = MarginalizationStrategy::from_flags(&flags(false, true, true, false)).unwrap();
        assert_eq!((s.outer, s.inner), (OuterMarginalization::None, InnerReduction::Distance));
        assert!(MarginalizationStrategy::from_flags(&flags(false, true, true, true)).is_err());
    }

    #[test]
    // Purpose
    // -------
    // Scalar records reduce through the inner reduction only.
    //
    // Given
    // -----
    // - d·h = 3 + 4i, h·h = 6.
    //
    // Expect
    // ------
    // - Plain: 0. Phase: ln I0(5) − 3.
    fn scalar_reductions() {
        let params = SourceParameters::default();
        let snrs = CalculatedSnrs::new(Complex64::new(3.0, 4.0), 6.0, SnrGrid::None);
        let plain = MarginalizationStrategy::from_flags(&flags(false, false, false, false)).unwrap();
        assert_relative_eq!(plain.reduce(&snrs, &context(&params, None)), 0.0);
        let phase = MarginalizationStrategy::from_flags(&flags(false, false, true, false)).unwrap();
        assert_relative_eq!(phase.reduce(&snrs, &context(&params, None)), ln_i0(5.0) - 3.0);
    }

    #[test]
    // Purpose
    // -------
    // Calibration averaging subtracts ln N.
    //
    // Given
    // -----
    // - Two draws with ll = [1 − 0.5, 3 − 1.5] = [0.5, 1.5].
    //
    // Expect
    // ------
    // - ln((e^0.5 + e^1.5) / 2).
    fn calibration_average() {
        let params = SourceParameters::default();
        let snrs = CalculatedSnrs::new(
            Complex64::new(0.0, 0.0),
            0.0,
            SnrGrid::Calibration {
                d_inner_h: array![Complex64::new(1.0, 0.0), Complex64::new(3.0, 2.0)],
                optimal_snr_squared: array![1.0, 3.0],
            },
        );
        let s = MarginalizationStrategy::from_flags(&flags(false, false, false, true)).unwrap();
        let expected = ((0.5f64.exp() + 1.5f64.exp()) / 2.0).ln();
        assert_relative_eq!(s.reduce(&snrs, &context(&params, None)), expected, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Time and time+calibration reductions weight bins by the time prior.
    //
    // Given
    // -----
    // - 4 bins over [0, 1) with Δtc = 0.25, prior uniform on [0, 0.4].
    // - d·h(t) = [2, 0, 0, 4] (real), h·h = 2; the template sits at t = 0
    //   so bins 0 and 1 lie inside the prior.
    // - The same series duplicated over two calibration draws.
    //
    // Expect
    // ------
    // - Time: ln(0.625 (e^1 + e^−1)), since p·Δtc = 2.5 · 0.25.
    // - Time+calibration: the same value (identical draws).
    fn time_reductions_use_prior_weights() {
        let params = SourceParameters::default();
        let prior = Arc::new(UniformPrior::new("t", 0.0, 0.4).unwrap());
        let grid = TimeGrid::new(0.0, 1.0, 8.0, 5, prior);
        let series = array![2.0, 0.0, 0.0, 4.0].mapv(|v| Complex64::new(v, 0.0));
        let expected = (0.625 * (1f64.exp() + (-1f64).exp())).ln();

        let time = MarginalizationStrategy::from_flags(&flags(true, false, false, false)).unwrap();
        let snrs = CalculatedSnrs::new(Complex64::new(0.0, 0.0), 2.0, SnrGrid::Time { d_inner_h: series.clone() });
        assert_relative_eq!(time.reduce(&snrs, &context(&params, Some(&grid))), expected, epsilon = 1e-12);

        let mut both = Array2::zeros((2, 4));
        both.row_mut(0).assign(&series);
        both.row_mut(1).assign(&series);
        let tc = MarginalizationStrategy::from_flags(&flags(true, false, false, true)).unwrap();
        let snrs = CalculatedSnrs::new(
            Complex64::new(0.0, 0.0),
            0.0,
            SnrGrid::TimeCalibration { d_inner_h: both, optimal_snr_squared: array![2.0, 2.0] },
        );
        assert_relative_eq!(tc.reduce(&snrs, &context(&params, Some(&grid))), expected, epsilon = 1e-12);
    }
}
