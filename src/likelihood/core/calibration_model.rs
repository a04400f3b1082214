//! Detector calibration response models.
//!
//! A calibration model maps a set of nuisance parameters to a complex,
//! frequency-dependent correction applied multiplicatively to the projected
//! signal. Parameter names are given *without* the `recalib_<detector>_`
//! prefix; detectors strip it before calling the model.
use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array1, ArrayView1};
use num_complex::Complex64;

use crate::{
    likelihood::{
        core::priors::{GaussianPrior, PriorSet},
        errors::{LikelihoodError, LikelihoodResult},
    },
    numerics::NaturalCubicSpline,
};

/// Complex calibration response as a function of frequency and parameters.
pub trait CalibrationModel: Send + Sync + std::fmt::Debug {
    /// Unprefixed parameter names read by [`CalibrationModel::response`].
    fn parameter_names(&self) -> Vec<String>;

    /// Response at `frequencies`. Missing parameters are treated as zero.
    fn response(
        &self, frequencies: ArrayView1<f64>, parameters: &BTreeMap<String, f64>,
    ) -> Array1<Complex64>;
}

/// Cubic-spline amplitude/phase envelope with nodes log-spaced in frequency.
///
/// The response is `(1 + δA(f)) (2 + i δφ(f)) / (2 − i δφ(f))`, where `δA` and
/// `δφ` are natural cubic splines in `ln f` through the node values
/// `amplitude_<k>` and `phase_<k>`. Frequencies outside the node range use
/// the nearest node value.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSplineCalibration {
    log_nodes: Array1<f64>,
}

impl CubicSplineCalibration {
    pub fn new(
        minimum_frequency: f64, maximum_frequency: f64, n_points: usize,
    ) -> LikelihoodResult<Self> {
        if !(minimum_frequency > 0.0) || !minimum_frequency.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "calibration minimum_frequency",
                value: minimum_frequency,
                reason: "Must be finite and > 0.",
            });
        }
        if !(maximum_frequency > minimum_frequency) || !maximum_frequency.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "calibration maximum_frequency",
                value: maximum_frequency,
                reason: "Must be finite and above the minimum frequency.",
            });
        }
        if n_points < 2 {
            return Err(LikelihoodError::InvalidOption {
                name: "calibration n_points",
                value: n_points as f64,
                reason: "At least two spline nodes are required.",
            });
        }
        let log_nodes =
            Array1::linspace(minimum_frequency.ln(), maximum_frequency.ln(), n_points);
        Ok(CubicSplineCalibration { log_nodes })
    }

    pub fn n_points(&self) -> usize {
        self.log_nodes.len()
    }

    pub fn node_frequencies(&self) -> Array1<f64> {
        self.log_nodes.mapv(f64::exp)
    }

    /// Zero-mean Gaussian priors on every node, named with the
    /// `recalib_<detector>_` prefix.
    pub fn priors(
        &self, detector: &str, amplitude_sigma: f64, phase_sigma: f64,
    ) -> LikelihoodResult<PriorSet> {
        let mut priors = PriorSet::new();
        for k in 0..self.n_points() {
            let amp = format!("recalib_{detector}_amplitude_{k}");
            let phase = format!("recalib_{detector}_phase_{k}");
            priors.insert(&amp, Arc::new(GaussianPrior::new(&amp, 0.0, amplitude_sigma)?));
            priors.insert(&phase, Arc::new(GaussianPrior::new(&phase, 0.0, phase_sigma)?));
        }
        Ok(priors)
    }

    fn node_values(&self, kind: &str, parameters: &BTreeMap<String, f64>) -> Array1<f64> {
        Array1::from_iter(
            (0..self.n_points())
                .map(|k| parameters.get(&format!("{kind}_{k}")).copied().unwrap_or(0.0)),
        )
    }
}

impl CalibrationModel for CubicSplineCalibration {
    fn parameter_names(&self) -> Vec<String> {
        (0..self.n_points())
            .flat_map(|k| [format!("amplitude_{k}"), format!("phase_{k}")])
            .collect()
    }

    fn response(
        &self, frequencies: ArrayView1<f64>, parameters: &BTreeMap<String, f64>,
    ) -> Array1<Complex64> {
        let amplitude = NaturalCubicSpline::new(
            self.log_nodes.clone(),
            self.node_values("amplitude", parameters),
        );
        let phase =
            NaturalCubicSpline::new(self.log_nodes.clone(), self.node_values("phase", parameters));
        let (Some(amplitude), Some(phase)) = (amplitude, phase) else {
            return Array1::from_elem(frequencies.len(), Complex64::new(1.0, 0.0));
        };

        frequencies.mapv(|f| {
            if !(f > 0.0) {
                return Complex64::new(1.0, 0.0);
            }
            let log_f = f.ln();
            let delta_amplitude = amplitude.evaluate(log_f);
            let delta_phase = phase.evaluate(log_f);
            (1.0 + delta_amplitude) * Complex64::new(2.0, delta_phase)
                / Complex64::new(2.0, -delta_phase)
        })
    }
}
