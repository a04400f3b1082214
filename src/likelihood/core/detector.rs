//! Detector data interface and a concrete in-memory interferometer.
//!
//! Purpose
//! -------
//! Define what the likelihood needs to know about one detector: its
//! frequency-domain strain, PSD and analysis mask, segment timing, antenna
//! response and light-travel delay, plus an optional calibration model.
//! [`Interferometer`] is a validated, immutable implementation backed by
//! `ndarray` buffers.
//!
//! Key behaviors
//! -------------
//! - [`project_signal`] turns polarizations into the detector-frame signal:
//!   antenna-weighted sum over modes, arrival-time phase shift relative to
//!   the segment start, calibration, and zeroing outside the mask.
//! - [`Interferometer::new`] validates array alignment, segment duration and
//!   PSD positivity inside the mask.
//!
//! Invariants & assumptions
//! ------------------------
//! - `frequency_array`, `strain`, `psd` and `frequency_mask` share one length.
//! - The frequency array is the one-sided grid `k / duration`,
//!   `k = 0..=N/2`, so `sampling_frequency = 2 (len − 1) / duration`.
//! - PSD values inside the mask are finite and strictly positive.
//!
//! Conventions
//! -----------
//! - Time delays and antenna responses are evaluated at the geocenter time.
//! - Calibration parameters are read from `SourceParameters::extra` under the
//!   `recalib_<name>_` prefix.
use std::sync::Arc;

use ndarray::{Array1, ArrayView1, Zip};
use num_complex::Complex64;

use crate::likelihood::{
    core::{
        calibration_model::CalibrationModel, parameters::SourceParameters,
        waveform::Polarizations,
    },
    errors::{LikelihoodError, LikelihoodResult},
};

/// Frequency-domain data and geometry of one detector.
pub trait Detector: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn frequency_array(&self) -> ArrayView1<'_, f64>;
    fn strain(&self) -> ArrayView1<'_, Complex64>;
    fn power_spectral_density(&self) -> ArrayView1<'_, f64>;
    fn frequency_mask(&self) -> ArrayView1<'_, bool>;
    fn duration(&self) -> f64;
    fn sampling_frequency(&self) -> f64;
    fn start_time(&self) -> f64;

    /// Antenna response to `mode` at the given sky position and time.
    fn antenna_response(&self, ra: f64, dec: f64, time: f64, psi: f64, mode: &str) -> f64;

    /// Arrival-time delay relative to the geocenter (s).
    fn time_delay_from_geocenter(&self, ra: f64, dec: f64, time: f64) -> f64;

    fn calibration_model(&self) -> Option<&dyn CalibrationModel> {
        None
    }

    /// Lowest frequency inside the mask.
    fn minimum_frequency(&self) -> f64 {
        masked_extreme(self.frequency_array(), self.frequency_mask(), f64::min, f64::INFINITY)
    }

    /// Highest frequency inside the mask.
    fn maximum_frequency(&self) -> f64 {
        masked_extreme(self.frequency_array(), self.frequency_mask(), f64::max, f64::NEG_INFINITY)
    }

    /// Calibration factor at `frequencies` (unity without a model).
    fn calibration_factor(
        &self, frequencies: ArrayView1<f64>, parameters: &SourceParameters,
    ) -> Array1<Complex64> {
        match self.calibration_model() {
            Some(model) => {
                let prefix = format!("recalib_{}_", self.name());
                model.response(frequencies, &parameters.extras_with_prefix(&prefix))
            }
            None => Array1::from_elem(frequencies.len(), Complex64::new(1.0, 0.0)),
        }
    }
}

fn masked_extreme(
    frequencies: ArrayView1<f64>, mask: ArrayView1<bool>, pick: fn(f64, f64) -> f64, init: f64,
) -> f64 {
    frequencies.iter().zip(mask.iter()).filter(|(_, m)| **m).fold(init, |acc, (&f, _)| pick(acc, f))
}

/// Which calibration to apply during projection.
#[derive(Debug, Clone, Copy)]
pub enum ResponseCalibration<'a> {
    /// The detector's own calibration model at the current parameters.
    Model,
    /// A stored calibration draw aligned with the frequency array.
    Draw(ArrayView1<'a, Complex64>),
    /// No calibration correction.
    Uncalibrated,
}

/// Antenna-weighted sum over modes, without time shift or calibration.
pub fn antenna_weighted_sum(
    detector: &dyn Detector, polarizations: &Polarizations, parameters: &SourceParameters,
    len: usize,
) -> Array1<Complex64> {
    let mut signal = Array1::<Complex64>::zeros(len);
    for (mode, values) in polarizations.iter() {
        let response = detector.antenna_response(
            parameters.ra,
            parameters.dec,
            parameters.geocent_time,
            parameters.psi,
            mode,
        );
        if response == 0.0 {
            continue;
        }
        Zip::from(&mut signal).and(values).for_each(|s, &h| *s += h * response);
    }
    signal
}

/// Detector arrival time relative to the segment start.
pub fn arrival_time_offset(detector: &dyn Detector, parameters: &SourceParameters) -> f64 {
    let delay = detector.time_delay_from_geocenter(
        parameters.ra,
        parameters.dec,
        parameters.geocent_time,
    );
    parameters.geocent_time + delay - detector.start_time()
}

/// Project polarizations onto `detector`'s full frequency grid.
///
/// # Arguments
/// - `polarizations`: waveform modes aligned with the detector frequencies.
/// - `parameters`: extrinsic parameters (sky position, polarization, time).
/// - `calibration`: calibration to apply.
///
/// # Returns
/// The masked detector-frame signal `Σ F_mode h_mode · e^{-2πi f τ} · C(f)`.
pub fn project_signal(
    detector: &dyn Detector, polarizations: &Polarizations, parameters: &SourceParameters,
    calibration: ResponseCalibration<'_>,
) -> Array1<Complex64> {
    let frequencies = detector.frequency_array();
    let mut signal = antenna_weighted_sum(detector, polarizations, parameters, frequencies.len());

    let tau = arrival_time_offset(detector, parameters);
    let two_pi_tau = -2.0 * std::f64::consts::PI * tau;
    Zip::from(&mut signal)
        .and(&frequencies)
        .and(&detector.frequency_mask())
        .for_each(|s, &f, &inside| {
            *s = if inside { *s * Complex64::from_polar(1.0, two_pi_tau * f) } else { Complex64::new(0.0, 0.0) };
        });

    match calibration {
        ResponseCalibration::Model => {
            if detector.calibration_model().is_some() {
                let factor = detector.calibration_factor(frequencies, parameters);
                signal *= &factor;
            }
        }
        ResponseCalibration::Draw(draw) => signal *= &draw,
        ResponseCalibration::Uncalibrated => {}
    }
    signal
}

/// Antenna pattern and light-travel geometry.
pub trait AntennaModel: Send + Sync + std::fmt::Debug {
    fn response(&self, ra: f64, dec: f64, time: f64, psi: f64, mode: &str) -> f64;
    fn time_delay_from_geocenter(&self, ra: f64, dec: f64, time: f64) -> f64;
}

/// Constant antenna responses per mode and a constant geocenter delay.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedAntenna {
    plus: f64,
    cross: f64,
    time_delay: f64,
}

impl FixedAntenna {
    pub fn new(plus: f64, cross: f64, time_delay: f64) -> Self {
        FixedAntenna { plus, cross, time_delay }
    }
}

impl AntennaModel for FixedAntenna {
    fn response(&self, _ra: f64, _dec: f64, _time: f64, _psi: f64, mode: &str) -> f64 {
        match mode {
            "plus" => self.plus,
            "cross" => self.cross,
            _ => 0.0,
        }
    }

    fn time_delay_from_geocenter(&self, _ra: f64, _dec: f64, _time: f64) -> f64 {
        self.time_delay
    }
}

/// Validated in-memory detector.
#[derive(Debug, Clone)]
pub struct Interferometer {
    name: String,
    frequency_array: Array1<f64>,
    strain: Array1<Complex64>,
    psd: Array1<f64>,
    mask: Array1<bool>,
    duration: f64,
    start_time: f64,
    antenna: Arc<dyn AntennaModel>,
    calibration: Option<Arc<dyn CalibrationModel>>,
}

/// Default lower edge of the analysis band (Hz).
pub const DEFAULT_MINIMUM_FREQUENCY: f64 = 20.0;

impl Interferometer {
    /// Build a detector over the band `[20 Hz, Nyquist]`.
    ///
    /// # Errors
    /// - `LengthMismatch` when strain/PSD do not match the frequency array.
    /// - `InvalidOption` for a non-positive duration, a frequency array with
    ///   fewer than two bins, or a non-positive PSD inside the mask.
    pub fn new(
        name: &str, frequency_array: Array1<f64>, strain: Array1<Complex64>, psd: Array1<f64>,
        start_time: f64, duration: f64, antenna: Arc<dyn AntennaModel>,
    ) -> LikelihoodResult<Self> {
        let n = frequency_array.len();
        if n < 2 {
            return Err(LikelihoodError::InvalidOption {
                name: "frequency_array length",
                value: n as f64,
                reason: "At least two frequency bins are required.",
            });
        }
        if strain.len() != n {
            return Err(LikelihoodError::LengthMismatch {
                what: "strain",
                expected: n,
                actual: strain.len(),
            });
        }
        if psd.len() != n {
            return Err(LikelihoodError::LengthMismatch {
                what: "power_spectral_density",
                expected: n,
                actual: psd.len(),
            });
        }
        if !(duration > 0.0) || !duration.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "duration",
                value: duration,
                reason: "Must be finite and > 0.",
            });
        }
        if !start_time.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "start_time",
                value: start_time,
                reason: "Must be finite.",
            });
        }

        let mask = Array1::from_elem(n, true);
        let ifo = Interferometer {
            name: name.to_string(),
            frequency_array,
            strain,
            psd,
            mask,
            duration,
            start_time,
            antenna,
            calibration: None,
        };
        let nyquist = ifo.sampling_frequency() / 2.0;
        ifo.with_frequency_bounds(DEFAULT_MINIMUM_FREQUENCY, nyquist)
    }

    /// Restrict the analysis band to `[minimum, maximum]`.
    pub fn with_frequency_bounds(mut self, minimum: f64, maximum: f64) -> LikelihoodResult<Self> {
        if !(maximum > minimum) || !minimum.is_finite() || !maximum.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "maximum_frequency",
                value: maximum,
                reason: "Frequency bounds must be finite with minimum < maximum.",
            });
        }
        self.mask = self.frequency_array.mapv(|f| f >= minimum && f <= maximum);
        if !self.mask.iter().any(|&m| m) {
            return Err(LikelihoodError::InvalidOption {
                name: "minimum_frequency",
                value: minimum,
                reason: "No frequency bins fall inside the analysis band.",
            });
        }
        for ((&p, &m), &f) in self.psd.iter().zip(self.mask.iter()).zip(self.frequency_array.iter()) {
            if m && !(p > 0.0 && p.is_finite()) {
                return Err(LikelihoodError::InvalidOption {
                    name: "power_spectral_density",
                    value: f,
                    reason: "PSD must be finite and > 0 inside the analysis band (value is the frequency).",
                });
            }
        }
        Ok(self)
    }

    pub fn with_calibration_model(mut self, model: Arc<dyn CalibrationModel>) -> Self {
        self.calibration = Some(model);
        self
    }
}

impl Detector for Interferometer {
    fn name(&self) -> &str {
        &self.name
    }

    fn frequency_array(&self) -> ArrayView1<'_, f64> {
        self.frequency_array.view()
    }

    fn strain(&self) -> ArrayView1<'_, Complex64> {
        self.strain.view()
    }

    fn power_spectral_density(&self) -> ArrayView1<'_, f64> {
        self.psd.view()
    }

    fn frequency_mask(&self) -> ArrayView1<'_, bool> {
        self.mask.view()
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn sampling_frequency(&self) -> f64 {
        2.0 * (self.frequency_array.len() - 1) as f64 / self.duration
    }

    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn antenna_response(&self, ra: f64, dec: f64, time: f64, psi: f64, mode: &str) -> f64 {
        self.antenna.response(ra, dec, time, psi, mode)
    }

    fn time_delay_from_geocenter(&self, ra: f64, dec: f64, time: f64) -> f64 {
        self.antenna.time_delay_from_geocenter(ra, dec, time)
    }

    fn calibration_model(&self) -> Option<&dyn CalibrationModel> {
        self.calibration.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_detector(n: usize, duration: f64) -> Interferometer {
        let freqs = Array1::from_iter((0..n).map(|k| k as f64 / duration));
        Interferometer::new(
            "H1",
            freqs,
            Array1::zeros(n),
            Array1::ones(n),
            100.0,
            duration,
            Arc::new(FixedAntenna::new(1.0, 0.5, 0.01)),
        )
        .unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Default mask spans [20 Hz, Nyquist] and timing is derived correctly.
    //
    // Given
    // -----
    // - 129 bins at 1/4 Hz spacing over 4 s (fs = 64 Hz).
    //
    // Expect
    // ------
    // - sampling_frequency = 64; min/max masked frequencies 20 and 32.
    fn default_mask_and_timing() {
        let ifo = make_detector(129, 4.0);
        assert_relative_eq!(ifo.sampling_frequency(), 64.0);
        assert_relative_eq!(ifo.minimum_frequency(), 20.0);
        assert_relative_eq!(ifo.maximum_frequency(), 32.0);
    }

    #[test]
    // Purpose
    // -------
    // Misaligned inputs are rejected.
    //
    // Given
    // -----
    // - A PSD one element shorter than the frequency array.
    //
    // Expect
    // ------
    // - `LengthMismatch` for the PSD.
    fn misaligned_psd_is_rejected() {
        let freqs = Array1::linspace(0.0, 32.0, 129);
        let err = Interferometer::new(
            "L1",
            freqs,
            Array1::zeros(129),
            Array1::ones(128),
            0.0,
            4.0,
            Arc::new(FixedAntenna::new(1.0, 0.0, 0.0)),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LikelihoodError::LengthMismatch { what: "power_spectral_density", expected: 129, actual: 128 }
        );
    }

    #[test]
    // Purpose
    // -------
    // Projection applies antenna weights, the arrival-time phase and the
    // mask.
    //
    // Given
    // -----
    // - plus = cross = 1 everywhere, F+ = 1, F× = 0.5, delay 0.01 s,
    //   geocent_time = start + 0.5 s.
    //
    // Expect
    // ------
    // - Inside the mask: 1.5·e^{-2πi f·0.51}; outside: 0.
    fn project_signal_applies_geometry_and_mask() {
        let ifo = make_detector(129, 4.0);
        let ones = Array1::from_elem(129, Complex64::new(1.0, 0.0));
        let pols = Polarizations::plus_cross(ones.clone(), ones);
        let params = SourceParameters { geocent_time: 100.5, ..Default::default() };
        let signal = project_signal(&ifo, &pols, &params, ResponseCalibration::Model);

        assert_eq!(signal[10], Complex64::new(0.0, 0.0));
        let f = ifo.frequency_array()[100];
        let expected = 1.5 * Complex64::from_polar(1.0, -2.0 * std::f64::consts::PI * f * 0.51);
        assert_relative_eq!(signal[100].re, expected.re, epsilon = 1e-12);
        assert_relative_eq!(signal[100].im, expected.im, epsilon = 1e-12);
    }
}
