//! likelihood — marginalized gravitational-wave transient likelihood stack.
//!
//! Purpose
//! -------
//! Provide the log-likelihood ratio of a compact-binary transient in a
//! network of detectors, with optional analytic or numerical marginalization
//! over coalescence time, luminosity distance, orbital phase and detector
//! calibration, and three interchangeable evaluation kernels (full grid,
//! reduced-order quadrature, multi-band). This is the main entry point of the
//! crate and the surface the Python bindings depend on.
//!
//! Key behaviors
//! -------------
//! - Collect detectors, parameters, priors, waveform interfaces, options and
//!   the matched-filter primitives in [`core`].
//! - Precompute and apply the marginalizations in [`marginalization`]: the
//!   distance lookup table, the FFT time grid, calibration draws, and the
//!   helpers that draw marginalized parameters back after sampling.
//! - Evaluate likelihoods in [`models`] through an [`SnrKernel`] plugged into
//!   [`GravitationalWaveTransient`].
//! - Centralize failures in [`errors`] (`LikelihoodError`,
//!   `LikelihoodResult`).
//!
//! Invariants & assumptions
//! ------------------------
//! - Every detector in an analysis shares duration, start time, sampling
//!   frequency and frequency grid.
//! - Construction is the only fallible phase; evaluation returns a number
//!   for every input (`-inf` when no waveform can be generated).
//! - Likelihood objects are immutable after construction and may be shared
//!   across threads.
//!
//! Conventions
//! -----------
//! - Frequencies in Hz, times in GPS seconds, distances in Mpc, angles in
//!   radians.
//! - Inner products are `4/T Σ conj(d)·h / S` over the detector's frequency
//!   mask.
//! - Setup decisions (default priors, disabled marginalizations, cache hits
//!   and rebuilds, band layouts) are logged through `tracing`; the
//!   evaluation path does not log.
//!
//! Downstream usage
//! ----------------
//! - Typical flow:
//!   1. Build [`Interferometer`]s (or implement [`Detector`]) on one shared
//!      frequency grid.
//!   2. Implement [`WaveformGenerator`] for the kernel's waveform type.
//!   3. Fill a [`PriorSet`] and [`LikelihoodOptions`].
//!   4. Construct a [`GravitationalWaveTransient`] and call
//!      `log_likelihood_ratio` from the sampler.
//!   5. Call `generate_posterior_sample` on each posterior point to recover
//!      the marginalized parameters.
//!
//! Testing notes
//! -------------
//! - Unit tests live next to each module; end-to-end scenarios with
//!   synthetic detectors and waveforms are in `tests/`.

pub mod core;
pub mod errors;
pub mod marginalization;
pub mod models;

// ---- Re-exports (primary public surface) ----------------------------------
//
// Lower-level pieces (inner-product helpers, reduction internals, ROQ weight
// construction) stay under their submodules.

pub use self::core::{
    CalibrationModel, CalibrationOptions, CubicSplineCalibration, DeltaPrior, Detector,
    DistanceMarginalizationOptions, FixedAntenna, FrequencyNodes, GaussianPrior, Interferometer,
    LikelihoodOptions, MarginalizationOptions, MultibandOptions, Polarizations, PowerLawPrior,
    Prior, PriorSet, ReconstructionOptions, RoqOptions, RoqPolarizations, RoqValidity,
    SourceParameters, TimeReference, UniformPrior, WaveformGenerator,
};

pub use self::errors::{LikelihoodError, LikelihoodResult};

pub use self::marginalization::{CalibrationDraws, DistanceLookupTable, TimeGrid};

pub use self::models::{
    GravitationalWaveTransient, LikelihoodMetaData, MultibandKernel, RoqBasis, RoqKernel,
    RoqWeights, SnrKernel, StandardKernel, OUTSIDE_KERNEL_SUPPORT,
};

// ---- Optional convenience prelude for downstream crates -------------------
//
// Downstream crates can write
//
//     use gw_likelihood::likelihood::prelude::*;
//
// to import the everyday likelihood surface in a single line.

pub mod prelude {
    pub use super::{
        Detector, GravitationalWaveTransient, Interferometer, LikelihoodError, LikelihoodOptions,
        LikelihoodResult, MarginalizationOptions, MultibandKernel, Polarizations, Prior, PriorSet,
        RoqKernel, SourceParameters, StandardKernel, TimeReference, WaveformGenerator,
    };
}
