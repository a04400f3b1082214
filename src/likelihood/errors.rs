//! Errors for gravitational-wave likelihood construction, persistence and
//! posterior reconstruction.
//!
//! This module defines [`LikelihoodError`], the single error type surfaced by
//! the likelihood stack. It implements `Display`/`Error` and converts to
//! `PyErr` when the `python-bindings` feature is enabled.
//!
//! ## Conventions
//! - Construction is the only fallible phase of a likelihood object. A
//!   malformed configuration is reported here, never mid-evaluation.
//! - Evaluation-time failures (waveform generator returning no signal, a
//!   coalescence time outside the ROQ time window, zero optimal SNR) never
//!   reach the sampler as errors: the engine turns them into
//!   `-inf`/very low/`NaN` values so samplers can reject the point. The
//!   evaluation variants below only surface through reconstruction and the
//!   engine's `calculate_snrs`.
//! - A cached lookup table that does not match the current configuration is
//!   not an error either; it is rebuilt and the mismatch is logged.
//! - Foreign errors (I/O, JSON, NPZ, statrs parameter errors) are normalized
//!   into string-carrying variants so the enum stays `Clone + PartialEq`.
#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, PyErr};

/// Crate-wide result alias for likelihood operations that may produce
/// [`LikelihoodError`].
pub type LikelihoodResult<T> = Result<T, LikelihoodError>;

/// Unified error type for likelihood construction and reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub enum LikelihoodError {
    // ---- Configuration ----
    /// The requested set of marginalizations has no supported reduction.
    InvalidMarginalizationCombination { requested: String },

    /// An acceleration kernel cannot honor a requested marginalization.
    UnsupportedMarginalization { kernel: &'static str, marginalization: &'static str },

    /// A marginalized parameter's prior is a fixed (delta) prior.
    FixedMarginalizedPrior { name: String },

    /// Detector or prior configuration outside the ROQ basis validity range.
    RoqParamsRange { parameter: &'static str, value: f64, bound: f64 },

    /// A scalar option is out of range or not finite.
    InvalidOption { name: &'static str, value: f64, reason: &'static str },

    /// Two arrays that must be aligned differ in length.
    LengthMismatch { what: &'static str, expected: usize, actual: usize },

    /// Detectors disagree on a quantity that must be shared.
    InconsistentDetectors { what: &'static str, expected: f64, actual: f64 },

    /// No detectors were supplied.
    EmptyDetectorSet,

    /// A detector name referenced by the configuration is unknown.
    UnknownDetector { name: String },

    /// A prior could not be constructed from its parameters.
    InvalidPrior { name: String, reason: String },

    // ---- Missing priors ----
    /// A marginalized parameter has no prior and no default applies.
    MissingPrior { name: String },

    // ---- Calibration ----
    /// The calibration cache holds fewer draws than requested.
    InsufficientCalibrationDraws { available: usize, requested: usize, starting_index: usize },

    /// Calibration draws must be generated but the detector has no model.
    MissingCalibrationModel { detector: String },

    // ---- Persistence ----
    /// Underlying filesystem error.
    Io { reason: String },

    /// A cache file could not be parsed or is missing a required entry.
    CacheFormat { reason: String },

    // ---- Reconstruction ----
    /// The configured kernel or marginalization combination cannot
    /// reconstruct the requested parameter.
    ReconstructionUnsupported { parameter: &'static str, reason: &'static str },

    /// The reconstructed posterior has no mass on its grid.
    EmptyPosterior { parameter: &'static str },

    /// The waveform generator produced no signal for the given parameters.
    WaveformUnavailable,

    // ---- Evaluation ----
    /// A kernel cannot evaluate a detector at the requested parameters, e.g.
    /// an arrival time outside the ROQ weight window.
    OutsideKernelSupport { kernel: &'static str, detector: String },

    /// Per-detector grids that must be summed differ in layout or shape.
    SnrGridMismatch { expected: String, actual: String },
}

impl std::error::Error for LikelihoodError {}

impl std::fmt::Display for LikelihoodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Configuration ----
            LikelihoodError::InvalidMarginalizationCombination { requested } => {
                write!(f, "Unsupported combination of marginalizations: {requested}.")
            }
            LikelihoodError::UnsupportedMarginalization { kernel, marginalization } => {
                write!(f, "The {kernel} likelihood does not support {marginalization} marginalization.")
            }
            LikelihoodError::FixedMarginalizedPrior { name } => {
                write!(f, "Cannot marginalize over a fixed prior for '{name}'.")
            }
            LikelihoodError::RoqParamsRange { parameter, value, bound } => {
                write!(f, "{parameter} {value} is outside the ROQ basis bound {bound}.")
            }
            LikelihoodError::InvalidOption { name, value, reason } => {
                write!(f, "Invalid value for {name}: {value}. {reason}")
            }
            LikelihoodError::LengthMismatch { what, expected, actual } => {
                write!(f, "Length mismatch for {what}: expected {expected}, got {actual}.")
            }
            LikelihoodError::InconsistentDetectors { what, expected, actual } => {
                write!(f, "Detectors disagree on {what}: {expected} vs {actual}.")
            }
            LikelihoodError::EmptyDetectorSet => {
                write!(f, "At least one detector is required.")
            }
            LikelihoodError::UnknownDetector { name } => {
                write!(f, "Unknown detector '{name}'.")
            }
            LikelihoodError::InvalidPrior { name, reason } => {
                write!(f, "Invalid prior for '{name}': {reason}")
            }
            // ---- Missing priors ----
            LikelihoodError::MissingPrior { name } => {
                write!(f, "No prior supplied for marginalized parameter '{name}'.")
            }
            // ---- Calibration ----
            LikelihoodError::InsufficientCalibrationDraws {
                available,
                requested,
                starting_index,
            } => {
                write!(
                    f,
                    "Calibration file holds {available} draws; {requested} requested from index {starting_index}."
                )
            }
            LikelihoodError::MissingCalibrationModel { detector } => {
                write!(f, "Detector '{detector}' has no calibration model to draw response curves from.")
            }
            // ---- Persistence ----
            LikelihoodError::Io { reason } => {
                write!(f, "I/O error: {reason}")
            }
            LikelihoodError::CacheFormat { reason } => {
                write!(f, "Malformed cache file: {reason}")
            }
            // ---- Reconstruction ----
            LikelihoodError::ReconstructionUnsupported { parameter, reason } => {
                write!(f, "Cannot reconstruct {parameter}: {reason}")
            }
            LikelihoodError::EmptyPosterior { parameter } => {
                write!(f, "Reconstructed {parameter} posterior has no support.")
            }
            LikelihoodError::WaveformUnavailable => {
                write!(f, "The waveform generator returned no signal.")
            }
            // ---- Evaluation ----
            LikelihoodError::OutsideKernelSupport { kernel, detector } => {
                write!(f, "The {kernel} kernel cannot evaluate detector '{detector}' at these parameters.")
            }
            LikelihoodError::SnrGridMismatch { expected, actual } => {
                write!(f, "Cannot sum a {actual} into a {expected}.")
            }
        }
    }
}

impl From<std::io::Error> for LikelihoodError {
    fn from(err: std::io::Error) -> Self {
        LikelihoodError::Io { reason: err.to_string() }
    }
}

impl From<serde_json::Error> for LikelihoodError {
    fn from(err: serde_json::Error) -> Self {
        LikelihoodError::CacheFormat { reason: err.to_string() }
    }
}

impl From<ndarray_npy::ReadNpzError> for LikelihoodError {
    fn from(err: ndarray_npy::ReadNpzError) -> Self {
        LikelihoodError::CacheFormat { reason: err.to_string() }
    }
}

impl From<ndarray_npy::WriteNpzError> for LikelihoodError {
    fn from(err: ndarray_npy::WriteNpzError) -> Self {
        LikelihoodError::CacheFormat { reason: err.to_string() }
    }
}

impl From<ndarray::ShapeError> for LikelihoodError {
    fn from(err: ndarray::ShapeError) -> Self {
        LikelihoodError::CacheFormat { reason: err.to_string() }
    }
}

#[cfg(feature = "python-bindings")]
impl From<LikelihoodError> for PyErr {
    fn from(err: LikelihoodError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}
