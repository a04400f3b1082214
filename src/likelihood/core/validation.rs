//! Likelihood validation helpers: detector consistency, marginalized priors
//! and flag combinations.
//!
//! Purpose
//! -------
//! Centralize the construction-time checks shared by the engine and the
//! acceleration kernels, so every constructor fails fast with the same
//! structured errors.
//!
//! Key behaviors
//! -------------
//! - [`validate_detectors`] checks that a detector set is non-empty and that
//!   every detector shares the first one's duration, start time, sampling
//!   frequency and frequency-array length.
//! - [`validate_marginalized_prior`] rejects missing or fixed priors for a
//!   marginalized parameter.
//! - [`validate_combination`] enforces the allowed subsets of
//!   {time, distance, phase, calibration}.
//!
//! Invariants & assumptions
//! ------------------------
//! - Durations and start times are compared with a relative tolerance of
//!   `1e-9`; frequency-array lengths must match exactly.
//!
//! Conventions
//! -----------
//! - No logging and no I/O; callers decide how to report failures.
use crate::likelihood::{
    core::{detector::Detector, options::MarginalizationOptions, priors::PriorSet},
    errors::{LikelihoodError, LikelihoodResult},
};

const TIMING_TOLERANCE: f64 = 1e-9;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIMING_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

/// Check that `detectors` is non-empty and shares one segment layout.
///
/// Errors
/// ------
/// - `EmptyDetectorSet` for an empty slice.
/// - `InconsistentDetectors` naming the first mismatching quantity.
pub fn validate_detectors<D: AsRef<dyn Detector>>(detectors: &[D]) -> LikelihoodResult<()> {
    let Some(first) = detectors.first().map(AsRef::as_ref) else {
        return Err(LikelihoodError::EmptyDetectorSet);
    };
    for det in detectors.iter().skip(1).map(AsRef::as_ref) {
        if !close(det.duration(), first.duration()) {
            return Err(LikelihoodError::InconsistentDetectors {
                what: "duration",
                expected: first.duration(),
                actual: det.duration(),
            });
        }
        if !close(det.start_time(), first.start_time()) {
            return Err(LikelihoodError::InconsistentDetectors {
                what: "start_time",
                expected: first.start_time(),
                actual: det.start_time(),
            });
        }
        if !close(det.sampling_frequency(), first.sampling_frequency()) {
            return Err(LikelihoodError::InconsistentDetectors {
                what: "sampling_frequency",
                expected: first.sampling_frequency(),
                actual: det.sampling_frequency(),
            });
        }
        if det.frequency_array().len() != first.frequency_array().len() {
            return Err(LikelihoodError::InconsistentDetectors {
                what: "frequency_array length",
                expected: first.frequency_array().len() as f64,
                actual: det.frequency_array().len() as f64,
            });
        }
    }
    Ok(())
}

/// A marginalized parameter must have a prior, and it must not be fixed.
pub fn validate_marginalized_prior(priors: &PriorSet, name: &str) -> LikelihoodResult<()> {
    match priors.get(name) {
        None => Err(LikelihoodError::MissingPrior { name: name.to_string() }),
        Some(prior) if prior.is_fixed() => {
            Err(LikelihoodError::FixedMarginalizedPrior { name: name.to_string() })
        }
        Some(_) => Ok(()),
    }
}

/// Allowed flag subsets.
///
/// Any subset of {time, distance, phase} is accepted. Calibration may be
/// combined with at most one other flag, and calibration together with time
/// only admits the plain inner reduction (no phase or distance).
pub fn validate_combination(flags: &MarginalizationOptions) -> LikelihoodResult<()> {
    if flags.calibration {
        let others = [flags.time, flags.distance, flags.phase].iter().filter(|&&f| f).count();
        if others > 1 {
            return Err(LikelihoodError::InvalidMarginalizationCombination {
                requested: flags.describe(),
            });
        }
    }
    Ok(())
}
