//! numerics — numerically robust building blocks for likelihood evaluation.
//!
//! Purpose
//! -------
//! Collect the log-space reductions, special functions, FFT wrappers,
//! interpolants and quadrature helpers shared by the likelihood kernels and
//! marginalization routines. Centralizing them here lets the rest of the
//! crate assume well-conditioned `f64` arithmetic and NumPy-compatible FFT
//! normalization.
//!
//! Key behaviors
//! -------------
//! - Log-space reductions (`logsumexp`, `logsumexp_weighted`) that never
//!   overflow and treat zero-weight entries as absent.
//! - `ln_i0`, a non-overflowing `ln I0(x)` used by phase marginalization.
//! - FFT plans (`FftPlan`, `RealFftPlan`) wrapping `rustfft` with
//!   `numpy.fft` normalization and real-FFT bin layout.
//! - Interpolants for the distance table, calibration envelopes and
//!   inverse-CDF sampling of reconstructed posteriors.
//! - Quadrature and grid utilities (trapezoid rule, power-of-two rounding,
//!   bisection, unique-with-inverse).
//!
//! Invariants & assumptions
//! ------------------------
//! - All helpers operate on `ndarray` views and owned arrays; none of them
//!   log, perform I/O or touch global state.
//! - Invalid inputs produce `NaN`/`-inf`/`None` rather than panics, except
//!   for documented length-mismatch assertions on internal call sites.
//!
//! Downstream usage
//! ----------------
//! - Kernels hold `FftPlan`/`RealFftPlan` values built once at construction
//!   and run them on per-worker scratch buffers.
//! - Marginalization code reduces per-grid log-likelihood arrays through the
//!   log-space helpers.
//!
//! Testing notes
//! -------------
//! - Each submodule carries unit tests against closed-form results.

pub mod fft;
pub mod interpolation;
pub mod quadrature;
pub mod special;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::fft::{fft, irfft, rfft, FftPlan, RealFftPlan};
pub use self::interpolation::{
    interp_linear, sample_tabulated, GridInterpolator2D, NaturalCubicSpline,
};
pub use self::quadrature::{
    bisect_threshold, cumulative_trapezoid, round_up_to_power_of_two, trapezoid,
    unique_with_inverse,
};
pub use self::special::{ln_i0, logsumexp, logsumexp_weighted, LN_I0_SERIES_CUTOFF};

// ---- Optional convenience prelude for downstream crates -------------------

pub mod prelude {
    pub use super::special::{ln_i0, logsumexp, logsumexp_weighted};
    pub use super::{FftPlan, RealFftPlan};
}
