//! core — detector data, parameters, priors, waveforms and matched-filter
//! primitives shared by every likelihood kernel.
//!
//! Purpose
//! -------
//! Collect the building blocks the likelihood engine and its
//! marginalizations operate on: the [`Detector`] interface and the in-memory
//! [`Interferometer`], the [`SourceParameters`] record, the [`Prior`] family,
//! the [`WaveformGenerator`] collaborator, calibration models, validated
//! option structs and the per-evaluation [`CalculatedSnrs`] record.
//!
//! Key behaviors
//! -------------
//! - Projection of polarizations onto a detector ([`project_signal`]) and the
//!   scalar inner products ([`inner_products`], [`noise_inner_product`]).
//! - Option structs with serde support and `validate` methods.
//! - Validation helpers for detector sets, marginalized priors and flag
//!   combinations.
//!
//! Invariants & assumptions
//! ------------------------
//! - Detectors in one analysis share duration, start time, sampling
//!   frequency and frequency grid; [`validate_detectors`] enforces it.
//! - Everything here is immutable after construction and `Send + Sync`
//!   unless documented otherwise.
//!
//! Conventions
//! -----------
//! - Inner products use `4/T Σ conj(d)·h / S` over the detector mask.
//! - No logging happens in this module; the engine logs setup decisions.

pub mod calibration_model;
pub mod detector;
pub mod options;
pub mod parameters;
pub mod priors;
pub mod snr;
pub mod validation;
pub mod waveform;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::calibration_model::{CalibrationModel, CubicSplineCalibration};
pub use self::detector::{
    antenna_weighted_sum, arrival_time_offset, project_signal, AntennaModel, Detector,
    FixedAntenna, Interferometer, ResponseCalibration, DEFAULT_MINIMUM_FREQUENCY,
};
pub use self::options::{
    CalibrationOptions, DistanceMarginalizationOptions, LikelihoodOptions,
    MarginalizationOptions, MultibandOptions, ReconstructionOptions, RoqOptions, RoqValidity,
    TimeReference,
};
pub use self::parameters::SourceParameters;
pub use self::priors::{DeltaPrior, GaussianPrior, PowerLawPrior, Prior, PriorSet, UniformPrior};
pub use self::snr::{inner_products, noise_inner_product, CalculatedSnrs, SnrGrid};
pub use self::validation::{
    validate_combination, validate_detectors, validate_marginalized_prior,
};
pub use self::waveform::{
    FrequencyNodes, Polarizations, Rescale, RoqPolarizations, WaveformGenerator,
};

// ---- Optional convenience prelude for downstream crates -------------------

pub mod prelude {
    pub use super::detector::{Detector, FixedAntenna, Interferometer};
    pub use super::options::{LikelihoodOptions, MarginalizationOptions, TimeReference};
    pub use super::parameters::SourceParameters;
    pub use super::priors::{Prior, PriorSet};
    pub use super::waveform::{Polarizations, WaveformGenerator};
}
