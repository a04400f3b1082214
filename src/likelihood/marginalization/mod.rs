//! marginalization — analytic and numerical integration over nuisance
//! parameters of the transient likelihood.
//!
//! Purpose
//! -------
//! Hold the precomputed state and reductions for the four supported
//! marginalizations (coalescence time, luminosity distance, orbital phase
//! and detector calibration) and the helpers that reconstruct those
//! parameters after sampling.
//!
//! Key behaviors
//! -------------
//! - [`DistanceLookupTable`]: cached 2-D table of the distance-marginalized
//!   likelihood, optionally including the phase.
//! - [`TimeGrid`]: FFT time grid with prior weights.
//! - [`CalibrationDraws`]: per-detector response-curve draws.
//! - [`MarginalizationStrategy`]: resolved flag combination and the
//!   reduction of a [`CalculatedSnrs`](crate::likelihood::core::CalculatedSnrs)
//!   record to a log-likelihood ratio.
//! - Reconstruction helpers for drawing the marginalized parameters back.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every structure here is built once at likelihood construction and is
//!   read-only afterwards.
//!
//! Conventions
//! -----------
//! - Cache I/O is logged through `tracing`; a stale or unreadable cache is
//!   rebuilt rather than reported as an error.

pub mod calibration;
pub mod combination;
pub mod distance;
pub mod phase;
pub mod reconstruction;
pub mod time;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::calibration::CalibrationDraws;
pub use self::combination::{
    InnerReduction, MarginalizationStrategy, OuterMarginalization, ReductionContext,
};
pub use self::distance::DistanceLookupTable;
pub use self::phase::{phase_grid, phase_log_posterior, phase_marginalized_likelihood};
pub use self::reconstruction::{
    posterior_from_log_likelihood, sample_calibration_index, sample_posterior,
    trim_time_posterior,
};
pub use self::time::{matched_filter_integrand, time_shifted_inner_products, TimeGrid};
