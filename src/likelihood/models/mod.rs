//! models — SNR kernels and the transient likelihood engine.
//!
//! Purpose
//! -------
//! Turn a waveform and the detector data into the matched-filter quantities
//! the marginalizations consume, and wire kernels, marginalizations and the
//! waveform generator into [`GravitationalWaveTransient`].
//!
//! Key behaviors
//! -------------
//! - [`SnrKernel`]: per-detector `(d·h, h·h)` computation, including the
//!   time and calibration grids the outer marginalizations need.
//! - [`StandardKernel`]: full frequency-grid inner products.
//! - [`RoqKernel`]: reduced-order-quadrature inner products from
//!   precomputed basis weights, interpolated in time.
//! - [`MultibandKernel`]: inner products on a chirp-adapted multi-band
//!   frequency set.
//! - [`GravitationalWaveTransient`]: the engine; likelihood evaluation,
//!   metadata and posterior reconstruction of marginalized parameters.
//!
//! Invariants & assumptions
//! ------------------------
//! - Kernels are prepared once, before the first evaluation, and are
//!   read-only afterwards. Evaluation allocates per call and shares no
//!   mutable state between threads.
//! - A kernel rejects the marginalizations it cannot serve in
//!   [`SnrKernel::prepare`]; evaluation itself never fails.
//!
//! Conventions
//! -----------
//! - The generator's output type is the kernel's `Waveform`: full-grid
//!   [`Polarizations`](crate::likelihood::core::Polarizations) for the
//!   standard kernel, unique multi-band frequencies for the multi-band
//!   kernel, linear/quadratic node values for ROQ.
//!
//! Testing notes
//! -------------
//! - Each kernel is checked against the standard kernel on configurations
//!   where the reduced representation is exact.
//! - Engine tests cover the scalar identities, construction-time prior
//!   handling and reconstruction; full pipelines live in `tests/`.

pub mod kernel;
pub mod multiband;
pub mod roq;
pub mod transient;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::kernel::{CalibrationRequest, SnrKernel, SnrRequest, StandardKernel};
pub use self::multiband::{FrequencyBand, MultibandKernel, MultibandPlan};
pub use self::roq::{
    check_roq_params, interpolate_five_samples, DetectorRoqWeights, RoqBasis, RoqKernel, RoqWeights,
};
pub use self::transient::{GravitationalWaveTransient, LikelihoodMetaData, OUTSIDE_KERNEL_SUPPORT};

// ---- Optional convenience prelude for downstream crates -------------------

pub mod prelude {
    pub use super::{
        GravitationalWaveTransient, LikelihoodMetaData, MultibandKernel, RoqKernel, SnrKernel,
        StandardKernel,
    };
}
