//! Reduced-order-quadrature kernel.
//!
//! Purpose
//! -------
//! Replace the full-grid inner products with compressed sums over an
//! empirical-interpolant basis. The waveform is evaluated only at the basis
//! frequency nodes; `d·h` comes from time-dependent linear weights and `h·h`
//! from fixed quadratic weights.
//!
//! Key behaviors
//! -------------
//! - Linear weights `W_i(τ_n) = 4/T Σ_k conj(d_k) B_ki / S_k · e^{-2πi f_k τ_n}`
//!   are built with one FFT per basis element and kept only on the window of
//!   times the coalescence-time prior can reach, padded by the Earth
//!   light-crossing time.
//! - `d·h(τ)` at an arbitrary arrival time is interpolated from the five
//!   nearest samples with a local cubic formula; an arrival time within two
//!   samples of either window edge cannot be evaluated and the kernel
//!   returns `None`.
//! - Quadratic weights `Q_j = 4/T Σ_k B^Q_kj / S_k` give
//!   `h·h = Σ_j |h^Q_j|² Q_j`.
//!
//! Invariants & assumptions
//! ------------------------
//! - Basis matrices are `(n_frequencies × n_basis)`; their rows follow the
//!   basis frequency grid `k / seglen` for `flow ≤ k / seglen ≤ fhigh` when
//!   validity parameters are given, and the masked detector frequencies
//!   otherwise.
//! - Time and calibration marginalization are rejected in `prepare`.
//!
//! Conventions
//! -----------
//! - Weight time samples are measured from the segment start.
//! - Weight caches are `.npz` (`time_samples`, `<det>_linear_real`,
//!   `<det>_linear_imag`, `<det>_quadratic`) or JSON.
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::path::Path;
use std::sync::Arc;

use ndarray::{s, Array1, Array2, ArrayView1, Ix1, Ix2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    likelihood::{
        core::{
            detector::{antenna_weighted_sum, arrival_time_offset, Detector},
            options::{RoqOptions, RoqValidity, TimeReference},
            parameters::SourceParameters,
            priors::PriorSet,
            snr::{CalculatedSnrs, SnrGrid},
            validation::validate_detectors,
            waveform::{FrequencyNodes, RoqPolarizations},
        },
        errors::{LikelihoodError, LikelihoodResult},
        marginalization::combination::MarginalizationStrategy,
        models::kernel::{SnrKernel, SnrRequest},
    },
    numerics::{round_up_to_power_of_two, trapezoid, FftPlan},
    persistence::{read_json, write_json, ArchiveReader, ArchiveWriter, CacheFormat},
};

pub const EARTH_RADIUS: f64 = 6_371_000.0;
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

const MINIMUM_ASSUMED_SNR: f64 = 10.0;
const DEFAULT_ASSUMED_SNR: f64 = 30.0;
const TIME_RESOLUTION_SAFETY: f64 = 5.0;
const FREQUENCY_MATCH_TOLERANCE: f64 = 1e-6;

/// Interpolate `values(t)` from five equally spaced samples around `t`.
///
/// The formula is a local cubic through the central samples with curvature
/// terms estimated from all five. It reproduces cubic polynomials exactly
/// and returns `values[2]` at `times[2]` and `values[3]` at `times[3]`.
///
/// Parameters
/// ----------
/// - `times`: five equally spaced sample times.
/// - `values`: samples at `times`.
/// - `time`: evaluation time, expected in `[times[2], times[3]]`.
pub fn interpolate_five_samples(times: ArrayView1<f64>, values: ArrayView1<Complex64>, time: f64) -> Complex64 {
    let r1 = (-values[0] + values[1] * 8.0 - values[2] * 14.0 + values[3] * 8.0 - values[4]) / 4.0;
    let r2 = values[2] - values[3] * 2.0 + values[4];
    let a = (times[3] - time) / (times[1] - times[0]);
    let b = 1.0 - a;
    let c = (a * a * a - a) / 6.0;
    let d = (b * b * b - b) / 6.0;
    values[2] * a + values[3] * b + r1 * c + r2 * d
}

/// Basis matrices and frequency nodes of an ROQ rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RoqBasis {
    /// `(n_frequencies × n_linear)` linear basis.
    pub linear_matrix: Array2<Complex64>,
    /// `(n_frequencies × n_quadratic)` quadratic basis.
    pub quadratic_matrix: Array2<f64>,
    pub linear_nodes: Array1<f64>,
    pub quadratic_nodes: Array1<f64>,
}

impl RoqBasis {
    fn validate(&self) -> LikelihoodResult<()> {
        if self.linear_matrix.ncols() != self.linear_nodes.len() {
            return Err(LikelihoodError::LengthMismatch {
                what: "linear frequency nodes",
                expected: self.linear_matrix.ncols(),
                actual: self.linear_nodes.len(),
            });
        }
        if self.quadratic_matrix.ncols() != self.quadratic_nodes.len() {
            return Err(LikelihoodError::LengthMismatch {
                what: "quadratic frequency nodes",
                expected: self.quadratic_matrix.ncols(),
                actual: self.quadratic_nodes.len(),
            });
        }
        if self.linear_matrix.nrows() != self.quadratic_matrix.nrows() {
            return Err(LikelihoodError::LengthMismatch {
                what: "quadratic basis rows",
                expected: self.linear_matrix.nrows(),
                actual: self.quadratic_matrix.nrows(),
            });
        }
        Ok(())
    }
}

/// Weights of one detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorRoqWeights {
    pub name: String,
    /// `(n_time × n_linear)` linear weights.
    pub linear: Array2<Complex64>,
    pub quadratic: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredDetectorWeights {
    linear_real: Array2<f64>,
    linear_imag: Array2<f64>,
    quadratic: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredWeights {
    time_samples: Array1<f64>,
    detectors: BTreeMap<String, StoredDetectorWeights>,
}

/// Precomputed ROQ weights for a detector set.
#[derive(Debug, Clone, PartialEq)]
pub struct RoqWeights {
    time_samples: Array1<f64>,
    detectors: Vec<DetectorRoqWeights>,
}

impl RoqWeights {
    /// Errors
    /// ------
    /// - `CacheFormat` with fewer than two time samples.
    /// - `LengthMismatch` when a linear weight matrix does not have one row
    ///   per time sample.
    pub fn new(time_samples: Array1<f64>, detectors: Vec<DetectorRoqWeights>) -> LikelihoodResult<Self> {
        if time_samples.len() < 2 {
            return Err(LikelihoodError::CacheFormat {
                reason: format!("ROQ weights need at least two time samples, got {}", time_samples.len()),
            });
        }
        for det in &detectors {
            if det.linear.nrows() != time_samples.len() {
                return Err(LikelihoodError::LengthMismatch {
                    what: "ROQ linear weight rows",
                    expected: time_samples.len(),
                    actual: det.linear.nrows(),
                });
            }
        }
        Ok(RoqWeights { time_samples, detectors })
    }

    pub fn time_samples(&self) -> ArrayView1<'_, f64> {
        self.time_samples.view()
    }

    pub fn time_step(&self) -> f64 {
        self.time_samples[1] - self.time_samples[0]
    }

    pub fn detectors(&self) -> &[DetectorRoqWeights] {
        &self.detectors
    }

    pub fn get(&self, name: &str) -> Option<&DetectorRoqWeights> {
        self.detectors.iter().find(|w| w.name == name)
    }

    /// Write the weights as `.npz` or JSON, chosen by extension.
    pub fn save(&self, path: &Path) -> LikelihoodResult<()> {
        info!(path = %path.display(), "Saving ROQ weights");
        match CacheFormat::from_path(path)? {
            CacheFormat::Json => {
                let stored = StoredWeights {
                    time_samples: self.time_samples.clone(),
                    detectors: self
                        .detectors
                        .iter()
                        .map(|w| {
                            (
                                w.name.clone(),
                                StoredDetectorWeights {
                                    linear_real: w.linear.mapv(|v| v.re),
                                    linear_imag: w.linear.mapv(|v| v.im),
                                    quadratic: w.quadratic.clone(),
                                },
                            )
                        })
                        .collect(),
                };
                write_json(path, &stored)
            }
            CacheFormat::Npz => {
                let mut archive = ArchiveWriter::create(path)?;
                archive.add("time_samples", &self.time_samples)?;
                for w in &self.detectors {
                    archive.add_complex(&format!("{}_linear", w.name), &w.linear)?;
                    archive.add(&format!("{}_quadratic", w.name), &w.quadratic)?;
                }
                archive.finish()
            }
        }
    }

    /// Read weights written by [`RoqWeights::save`].
    pub fn load(path: &Path) -> LikelihoodResult<Self> {
        info!(path = %path.display(), "Loading ROQ weights");
        let (time_samples, detectors) = match CacheFormat::from_path(path)? {
            CacheFormat::Json => {
                let stored: StoredWeights = read_json(path)?;
                let mut detectors = Vec::with_capacity(stored.detectors.len());
                for (name, w) in stored.detectors {
                    if w.linear_real.shape() != w.linear_imag.shape() {
                        return Err(LikelihoodError::CacheFormat {
                            reason: format!("linear weights of {name} have mismatched real/imaginary shapes"),
                        });
                    }
                    let mut linear = w.linear_real.mapv(|re| Complex64::new(re, 0.0));
                    ndarray::Zip::from(&mut linear).and(&w.linear_imag).for_each(|v, &im| v.im = im);
                    detectors.push(DetectorRoqWeights { name, linear, quadratic: w.quadratic });
                }
                (stored.time_samples, detectors)
            }
            CacheFormat::Npz => {
                let mut archive = ArchiveReader::open(path)?;
                let names: Vec<String> = archive
                    .names()
                    .iter()
                    .filter_map(|n| n.trim_end_matches(".npy").strip_suffix("_quadratic"))
                    .map(str::to_string)
                    .collect();
                let mut detectors = Vec::with_capacity(names.len());
                for name in names {
                    let linear = archive.complex::<Ix2>(&format!("{name}_linear"))?;
                    let quadratic = archive.array::<Ix1>(&format!("{name}_quadratic"))?;
                    detectors.push(DetectorRoqWeights { name, linear, quadratic });
                }
                (archive.array::<Ix1>("time_samples")?, detectors)
            }
        };
        RoqWeights::new(time_samples, detectors)
    }
}

/// Check detector bandwidth, duration and the mass priors against the
/// (scaled) basis validity.
///
/// Errors
/// ------
/// - `RoqParamsRange` naming the first violated bound.
pub fn check_roq_params(
    detector: &dyn Detector, validity: &RoqValidity, priors: &PriorSet,
) -> LikelihoodResult<()> {
    let fmax = detector.maximum_frequency();
    if fmax > validity.fhigh {
        return Err(LikelihoodError::RoqParamsRange { parameter: "maximum_frequency", value: fmax, bound: validity.fhigh });
    }
    let fmin = detector.minimum_frequency();
    if fmin < validity.flow {
        return Err(LikelihoodError::RoqParamsRange { parameter: "minimum_frequency", value: fmin, bound: validity.flow });
    }
    let duration = detector.duration();
    if (duration - validity.seglen).abs() > 1e-9 * validity.seglen.max(1.0) {
        return Err(LikelihoodError::RoqParamsRange { parameter: "duration", value: duration, bound: validity.seglen });
    }

    match priors.get("chirp_mass") {
        Some(prior) => {
            if prior.minimum() < validity.chirp_mass_min {
                return Err(LikelihoodError::RoqParamsRange {
                    parameter: "chirp_mass",
                    value: prior.minimum(),
                    bound: validity.chirp_mass_min,
                });
            }
            if prior.maximum() > validity.chirp_mass_max {
                return Err(LikelihoodError::RoqParamsRange {
                    parameter: "chirp_mass",
                    value: prior.maximum(),
                    bound: validity.chirp_mass_max,
                });
            }
        }
        None => warn!("Unable to check chirp mass ROQ bounds"),
    }

    let component_minimum = ["mass_1", "mass_2"]
        .iter()
        .filter_map(|name| priors.get(name).map(|p| p.minimum()))
        .reduce(f64::min);
    match component_minimum {
        Some(value) if value < validity.component_mass_min => Err(LikelihoodError::RoqParamsRange {
            parameter: "component_mass",
            value,
            bound: validity.component_mass_min,
        }),
        Some(_) => Ok(()),
        None => {
            warn!("Unable to check minimum component mass ROQ bounds");
            Ok(())
        }
    }
}

/// PSD-weighted frequency moment `f̄₃ = ∫ f^{2/3}/S df / ∫ f^{-7/3}/S df`.
fn frequency_moment(detector: &dyn Detector) -> f64 {
    let (freqs, psd): (Vec<f64>, Vec<f64>) = detector
        .frequency_array()
        .iter()
        .zip(detector.power_spectral_density().iter())
        .zip(detector.frequency_mask().iter())
        .filter(|((f, _), m)| **m && **f > 0.0)
        .map(|((&f, &s), _)| (f, s))
        .unzip();
    let freqs = Array1::from_vec(freqs);
    let psd = Array1::from_vec(psd);
    let low = Array1::from_shape_fn(freqs.len(), |k| freqs[k].powf(-7.0 / 3.0) / psd[k]);
    let normalization = trapezoid(low.view(), freqs.view());
    let high = Array1::from_shape_fn(freqs.len(), |k| freqs[k].powf(2.0 / 3.0) / (psd[k] * normalization));
    trapezoid(high.view(), freqs.view())
}

/// Time step and FFT length of the weight grid.
///
/// The step resolves the highest frequency that matters at the assumed
/// network SNR, divided by a safety factor, and is rounded so that the
/// segment holds a power-of-two number of samples that also covers every
/// frequency bin.
fn time_resolution(detectors: &[Arc<dyn Detector>], options: &RoqOptions) -> (f64, usize) {
    let first = &detectors[0];
    let duration = first.duration();
    let snr_squared: f64 = detectors
        .iter()
        .map(|d| {
            let snr = options.assumed_snr.get(d.name()).copied().unwrap_or(DEFAULT_ASSUMED_SNR);
            snr.max(MINIMUM_ASSUMED_SNR).powi(2)
        })
        .sum();
    let scaling = (PI * PI * snr_squared / 6.0).cbrt();
    let f_high = detectors.iter().map(|d| scaling * frequency_moment(d.as_ref()).cbrt()).fold(0.0, f64::max);
    let resolved_samples = if f_high.is_finite() && f_high > 0.0 {
        duration * f_high * TIME_RESOLUTION_SAFETY
    } else {
        0.0
    };
    let f_last = first.frequency_array().iter().copied().fold(0.0, f64::max);
    let n = round_up_to_power_of_two(resolved_samples.max(f_last * duration + 1.0));
    (duration / n as f64, n)
}

/// Pairs `(basis_row, frequency_bin)` shared by the basis and the detector.
fn basis_frequency_pairs(
    detector: &dyn Detector, n_rows: usize, validity: Option<&RoqValidity>,
) -> LikelihoodResult<Vec<(usize, usize)>> {
    let freqs = detector.frequency_array();
    let mask = detector.frequency_mask();
    let duration = detector.duration();
    let pairs: Vec<(usize, usize)> = match validity {
        Some(v) => {
            let k_low = (v.flow * v.seglen - 1e-9).ceil() as usize;
            let k_high = (v.fhigh * v.seglen + 1e-9).floor() as usize;
            let expected = (k_high + 1).saturating_sub(k_low);
            if expected != n_rows {
                return Err(LikelihoodError::LengthMismatch {
                    what: "ROQ basis rows",
                    expected,
                    actual: n_rows,
                });
            }
            (0..n_rows)
                .filter_map(|row| {
                    let f = (k_low + row) as f64 / v.seglen;
                    let bin = (f * duration).round() as usize;
                    let matches = bin < freqs.len()
                        && mask[bin]
                        && (freqs[bin] - f).abs() <= FREQUENCY_MATCH_TOLERANCE / duration;
                    matches.then_some((row, bin))
                })
                .collect()
        }
        None => {
            let bins: Vec<usize> = mask.iter().enumerate().filter_map(|(k, &m)| m.then_some(k)).collect();
            if bins.len() != n_rows {
                return Err(LikelihoodError::LengthMismatch {
                    what: "ROQ basis rows",
                    expected: bins.len(),
                    actual: n_rows,
                });
            }
            bins.into_iter().enumerate().collect()
        }
    };
    if pairs.is_empty() {
        return Err(LikelihoodError::LengthMismatch { what: "ROQ frequency overlap", expected: n_rows, actual: 0 });
    }
    Ok(pairs)
}

/// ROQ [`SnrKernel`].
#[derive(Debug, Clone)]
pub struct RoqKernel {
    weights: RoqWeights,
    linear_nodes: Array1<f64>,
    quadratic_nodes: Array1<f64>,
    /// Position in `weights` of each detector, by detector index.
    order: Vec<usize>,
}

impl RoqKernel {
    /// Build the weights for `detectors` from a basis.
    ///
    /// Parameters
    /// ----------
    /// - `basis`: linear/quadratic basis matrices and their nodes.
    /// - `priors`: read for the coalescence-time window and the mass-bound
    ///   checks.
    /// - `time_reference`: selects the time prior (`geocent_time` or
    ///   `<det>_time`).
    /// - `options`: validity parameters, scale factor and assumed SNRs.
    ///
    /// Errors
    /// ------
    /// - `RoqParamsRange` when a detector or prior falls outside the basis
    ///   validity.
    /// - `LengthMismatch` when the basis does not line up with the
    ///   frequency grid.
    /// - `InvalidPrior` when the time prior lies outside the segment.
    pub fn new(
        detectors: &[Arc<dyn Detector>], basis: RoqBasis, priors: &PriorSet, time_reference: &TimeReference,
        options: &RoqOptions,
    ) -> LikelihoodResult<Self> {
        options.validate()?;
        validate_detectors(detectors)?;
        basis.validate()?;

        let validity = options.validity.map(|v| v.scaled(options.roq_scale_factor));
        if let Some(v) = &validity {
            if options.check_params {
                info!(roq_scale_factor = options.roq_scale_factor, "Checking ROQ params");
                for det in detectors {
                    check_roq_params(det.as_ref(), v, priors)?;
                }
            } else {
                warn!("No ROQ params checking performed");
            }
        }

        let first = &detectors[0];
        let start = first.start_time();
        let duration = first.duration();
        let (time_step, n_samples) = time_resolution(detectors, options);
        info!(time_step, n_samples, "ROQ time resolution");

        let time_name = time_reference.parameter_name();
        let (t_min, t_max) = match priors.get(&time_name) {
            Some(prior) => (prior.minimum(), prior.maximum()),
            None => {
                debug!(parameter = %time_name, "No time prior; using the full segment for ROQ weights");
                (start, start + duration)
            }
        };
        let crossing = 2.0 * EARTH_RADIUS / SPEED_OF_LIGHT + 5.0 * time_step;
        let start_idx = ((t_min - crossing - start) / time_step).floor().max(0.0) as usize;
        let end_idx = (((t_max + crossing - start) / time_step).ceil().max(0.0) as usize).min(n_samples - 1);
        if start_idx >= end_idx {
            return Err(LikelihoodError::InvalidPrior {
                name: time_name,
                reason: "time prior does not overlap the data segment".to_string(),
            });
        }
        let time_samples = Array1::from_iter((start_idx..=end_idx).map(|i| i as f64 * time_step));
        info!(n_time_samples = time_samples.len(), "Using ROQ time samples");

        let plan = FftPlan::new(n_samples);
        let norm = 4.0 / duration;
        let mut buffer = vec![Complex64::new(0.0, 0.0); n_samples];
        let mut scratch = Vec::with_capacity(plan.scratch_len());
        let mut all_weights = Vec::with_capacity(detectors.len());
        for det in detectors {
            let pairs = basis_frequency_pairs(det.as_ref(), basis.linear_matrix.nrows(), validity.as_ref())?;
            let freqs = det.frequency_array();
            let strain = det.strain();
            let psd = det.power_spectral_density();
            info!(
                detector = det.name(),
                n_frequencies = pairs.len(),
                minimum_frequency = freqs[pairs[0].1],
                maximum_frequency = freqs[pairs[pairs.len() - 1].1],
                "Building ROQ weights"
            );

            let mut linear = Array2::<Complex64>::zeros((time_samples.len(), basis.linear_matrix.ncols()));
            for (i, mut column) in linear.columns_mut().into_iter().enumerate() {
                buffer.iter_mut().for_each(|v| *v = Complex64::new(0.0, 0.0));
                for &(row, bin) in &pairs {
                    if bin < n_samples {
                        buffer[bin] = strain[bin].conj() * basis.linear_matrix[[row, i]] / psd[bin];
                    }
                }
                plan.forward(&mut buffer, &mut scratch);
                for (out, &v) in column.iter_mut().zip(buffer[start_idx..=end_idx].iter()) {
                    *out = v * norm;
                }
            }

            let quadratic = Array1::from_shape_fn(basis.quadratic_matrix.ncols(), |j| {
                norm * pairs.iter().map(|&(row, bin)| basis.quadratic_matrix[[row, j]] / psd[bin]).sum::<f64>()
            });
            all_weights.push(DetectorRoqWeights { name: det.name().to_string(), linear, quadratic });
            info!(detector = det.name(), "Finished building ROQ weights");
        }

        let weights = RoqWeights::new(time_samples, all_weights)?;
        Self::from_weights(weights, basis.linear_nodes, basis.quadratic_nodes)
    }

    /// Kernel from precomputed (for example, loaded) weights.
    ///
    /// Errors
    /// ------
    /// - `LengthMismatch` when a detector's weights do not match the nodes.
    pub fn from_weights(
        weights: RoqWeights, linear_nodes: Array1<f64>, quadratic_nodes: Array1<f64>,
    ) -> LikelihoodResult<Self> {
        for w in weights.detectors() {
            if w.linear.ncols() != linear_nodes.len() {
                return Err(LikelihoodError::LengthMismatch {
                    what: "ROQ linear weight columns",
                    expected: linear_nodes.len(),
                    actual: w.linear.ncols(),
                });
            }
            if w.quadratic.len() != quadratic_nodes.len() {
                return Err(LikelihoodError::LengthMismatch {
                    what: "ROQ quadratic weights",
                    expected: quadratic_nodes.len(),
                    actual: w.quadratic.len(),
                });
            }
        }
        let order = (0..weights.detectors().len()).collect();
        Ok(RoqKernel { weights, linear_nodes, quadratic_nodes, order })
    }

    pub fn weights(&self) -> &RoqWeights {
        &self.weights
    }

    fn detector_weights(&self, detector_index: usize, name: &str) -> Option<&DetectorRoqWeights> {
        self.order
            .get(detector_index)
            .and_then(|&i| self.weights.detectors.get(i))
            .filter(|w| w.name == name)
            .or_else(|| self.weights.get(name))
    }

    /// The five sample indices around `time`, if all lie inside the window.
    fn closest_indices(&self, time: f64) -> Option<usize> {
        let samples = &self.weights.time_samples;
        let closest = ((time - samples[0]) / self.weights.time_step()).floor();
        if !closest.is_finite() || closest < 2.0 || closest + 2.0 >= samples.len() as f64 {
            return None;
        }
        Some(closest as usize - 2)
    }
}

impl SnrKernel for RoqKernel {
    type Waveform = RoqPolarizations;

    fn name(&self) -> &'static str {
        "ROQ"
    }

    fn prepare(
        &mut self, detectors: &[Arc<dyn Detector>], strategy: &MarginalizationStrategy,
    ) -> LikelihoodResult<()> {
        if strategy.needs_time_grid() {
            return Err(LikelihoodError::UnsupportedMarginalization { kernel: "ROQ", marginalization: "time" });
        }
        if strategy.needs_calibration_draws() {
            return Err(LikelihoodError::UnsupportedMarginalization {
                kernel: "ROQ",
                marginalization: "calibration",
            });
        }
        self.order = detectors
            .iter()
            .map(|det| {
                self.weights
                    .detectors
                    .iter()
                    .position(|w| w.name == det.name())
                    .ok_or_else(|| LikelihoodError::UnknownDetector { name: det.name().to_string() })
            })
            .collect::<LikelihoodResult<_>>()?;
        Ok(())
    }

    fn frequency_nodes(&self) -> Option<FrequencyNodes> {
        Some(FrequencyNodes::Roq { linear: self.linear_nodes.clone(), quadratic: self.quadratic_nodes.clone() })
    }

    fn calculate_snrs(
        &self, waveform: &RoqPolarizations, detector_index: usize, detector: &dyn Detector,
        parameters: &SourceParameters, _request: &SnrRequest<'_>,
    ) -> Option<CalculatedSnrs> {
        let weights = self.detector_weights(detector_index, detector.name())?;

        let mut h_linear = antenna_weighted_sum(detector, &waveform.linear, parameters, self.linear_nodes.len());
        let mut h_quadratic =
            antenna_weighted_sum(detector, &waveform.quadratic, parameters, self.quadratic_nodes.len());
        if detector.calibration_model().is_some() {
            h_linear *= &detector.calibration_factor(self.linear_nodes.view(), parameters);
            h_quadratic *= &detector.calibration_factor(self.quadratic_nodes.view(), parameters);
        }

        let ifo_time = arrival_time_offset(detector, parameters);
        let Some(first) = self.closest_indices(ifo_time) else {
            debug!(detector = detector.name(), ifo_time, "Requested time at edge of ROQ time samples");
            return None;
        };
        let d_at_samples = weights.linear.slice(s![first..first + 5, ..]).dot(&h_linear);
        let d_inner_h = interpolate_five_samples(
            self.weights.time_samples.slice(s![first..first + 5]),
            d_at_samples.view(),
            ifo_time,
        );
        let optimal_snr_squared = h_quadratic.mapv(|h| h.norm_sqr()).dot(&weights.quadratic);

        Some(CalculatedSnrs::new(d_inner_h, optimal_snr_squared, SnrGrid::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::core::{
        detector::{FixedAntenna, Interferometer},
        options::MarginalizationOptions,
        priors::UniformPrior,
        waveform::Polarizations,
    };
    use crate::likelihood::models::kernel::StandardKernel;
    use approx::assert_relative_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // - Five-sample interpolation: node values and cubic exactness.
    // - An identity basis reproduces the full-grid inner products at a time
    //   on the weight grid.
    // - Window-edge refusal, unsupported marginalizations, params checks.
    // - Weight caches in both formats.
    // -------------------------------------------------------------------------

    const N: usize = 129;
    const DURATION: f64 = 4.0;

    fn detector() -> Interferometer {
        let freqs = Array1::from_shape_fn(N, |k| k as f64 / DURATION);
        let strain = Array1::from_shape_fn(N, |k| Complex64::new((0.3 * k as f64).sin(), (0.1 * k as f64).cos()));
        let psd = Array1::from_shape_fn(N, |k| 1.0 + 0.02 * k as f64);
        Interferometer::new("H1", freqs, strain, psd, 100.0, DURATION, Arc::new(FixedAntenna::new(0.7, -0.4, 0.0)))
            .unwrap()
    }

    fn polarizations(len: usize, offset: usize) -> Polarizations {
        let plus = Array1::from_shape_fn(len, |k| Complex64::new(1.0 / (1.0 + (k + offset) as f64), 0.3));
        let cross = Array1::from_shape_fn(len, |k| Complex64::new(0.2, -0.5 / (2.0 + (k + offset) as f64)));
        Polarizations::plus_cross(plus, cross)
    }

    /// Identity basis over the masked bins of `ifo`.
    fn identity_kernel(ifo: &Interferometer, priors: &PriorSet) -> (RoqKernel, Vec<usize>) {
        let bins: Vec<usize> = ifo.frequency_mask().iter().enumerate().filter_map(|(k, &m)| m.then_some(k)).collect();
        let nodes = Array1::from_iter(bins.iter().map(|&k| ifo.frequency_array()[k]));
        let basis = RoqBasis {
            linear_matrix: Array2::from_shape_fn((bins.len(), bins.len()), |(r, c)| {
                Complex64::new(if r == c { 1.0 } else { 0.0 }, 0.0)
            }),
            quadratic_matrix: Array2::eye(bins.len()),
            linear_nodes: nodes.clone(),
            quadratic_nodes: nodes,
        };
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo.clone())];
        let kernel =
            RoqKernel::new(&detectors, basis, priors, &TimeReference::Geocenter, &RoqOptions::default()).unwrap();
        (kernel, bins)
    }

    fn time_priors() -> PriorSet {
        let mut priors = PriorSet::new();
        priors.insert("geocent_time", Arc::new(UniformPrior::new("geocent_time", 101.0, 103.0).unwrap()));
        priors
    }

    #[test]
    // Purpose
    // -------
    // The five-sample formula returns node values and is exact for cubics.
    //
    // Given
    // -----
    // - Samples of p(t) = 2 − t + 0.5t² + 0.25t³ at t = 0..4.
    //
    // Expect
    // ------
    // - Value at t = 2 is p(2) (a = 1, b = 0); at t = 2.3 it is p(2.3).
    fn five_sample_interpolation_is_exact_for_cubics() {
        let p = |t: f64| 2.0 - t + 0.5 * t * t + 0.25 * t * t * t;
        let times = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let values = times.mapv(|t| Complex64::new(p(t), -p(t)));
        let at_node = interpolate_five_samples(times.view(), values.view(), 2.0);
        assert_eq!(at_node, values[2]);
        let inside = interpolate_five_samples(times.view(), values.view(), 2.3);
        assert_relative_eq!(inside.re, p(2.3), epsilon = 1e-12);
        assert_relative_eq!(inside.im, -p(2.3), epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // With an identity basis the ROQ sums are the full-grid inner products.
    //
    // Given
    // -----
    // - One detector; waveform nodes = masked bins; arrival time placed on
    //   a weight-grid sample.
    //
    // Expect
    // ------
    // - d·h and h·h equal the standard kernel's values.
    fn identity_basis_matches_standard_kernel() {
        let ifo = detector();
        let (kernel, bins) = identity_kernel(&ifo, &time_priors());
        let samples = kernel.weights().time_samples();
        let params = SourceParameters { geocent_time: 100.0 + samples[samples.len() / 2], ..Default::default() };

        let full = polarizations(N, 0);
        let mut linear = Polarizations::new();
        for (mode, values) in full.iter() {
            linear.insert(mode, Array1::from_iter(bins.iter().map(|&k| values[k])));
        }
        let roq = RoqPolarizations { linear: linear.clone(), quadratic: linear };

        let fast = kernel.calculate_snrs(&roq, 0, &ifo, &params, &SnrRequest::scalar()).unwrap();
        let slow = StandardKernel::new().calculate_snrs(&full, 0, &ifo, &params, &SnrRequest::scalar()).unwrap();
        assert_relative_eq!(fast.d_inner_h.re, slow.d_inner_h.re, max_relative = 1e-9, epsilon = 1e-12);
        assert_relative_eq!(fast.d_inner_h.im, slow.d_inner_h.im, max_relative = 1e-9, epsilon = 1e-12);
        assert_relative_eq!(fast.optimal_snr_squared, slow.optimal_snr_squared, max_relative = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Arrival times near the window edge are refused instead of
    // extrapolated.
    //
    // Given
    // -----
    // - The identity kernel; arrival times at the first and the last weight
    //   sample, and at the middle sample.
    //
    // Expect
    // ------
    // - None at both edges; a finite record in the middle.
    fn window_edge_is_outside_support() {
        let ifo = detector();
        let (kernel, bins) = identity_kernel(&ifo, &time_priors());
        let samples = kernel.weights().time_samples().to_owned();
        let pols = polarizations(bins.len(), 0);
        let roq = RoqPolarizations { linear: pols.clone(), quadratic: pols };
        let at = |time: f64| {
            let params = SourceParameters { geocent_time: 100.0 + time, ..Default::default() };
            kernel.calculate_snrs(&roq, 0, &ifo, &params, &SnrRequest::scalar())
        };
        assert!(at(samples[0]).is_none());
        assert!(at(samples[samples.len() - 1]).is_none());
        let middle = at(samples[samples.len() / 2]).unwrap();
        assert!(middle.d_inner_h.re.is_finite());
        assert!(middle.optimal_snr_squared > 0.0);
    }

    #[test]
    // Purpose
    // -------
    // `prepare` rejects time and calibration marginalization and unknown
    // detectors.
    //
    // Given
    // -----
    // - The identity kernel for H1.
    //
    // Expect
    // ------
    // - UnsupportedMarginalization for time and for calibration.
    // - UnknownDetector for a detector named L1.
    fn prepare_rejects_unsupported_configurations() {
        let ifo = detector();
        let (mut kernel, _) = identity_kernel(&ifo, &time_priors());
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo.clone())];
        let strategy = |t: bool, c: bool| {
            MarginalizationStrategy::from_flags(&MarginalizationOptions::new(
                t,
                false,
                false,
                c,
                false,
                TimeReference::Geocenter,
            ))
            .unwrap()
        };
        assert!(matches!(
            kernel.prepare(&detectors, &strategy(true, false)),
            Err(LikelihoodError::UnsupportedMarginalization { marginalization: "time", .. })
        ));
        assert!(matches!(
            kernel.prepare(&detectors, &strategy(false, true)),
            Err(LikelihoodError::UnsupportedMarginalization { marginalization: "calibration", .. })
        ));
        assert!(kernel.prepare(&detectors, &strategy(false, false)).is_ok());

        let freqs = Array1::from_shape_fn(N, |k| k as f64 / DURATION);
        let other = Interferometer::new(
            "L1",
            freqs,
            ifo.strain().to_owned(),
            ifo.power_spectral_density().to_owned(),
            100.0,
            DURATION,
            Arc::new(FixedAntenna::new(1.0, 0.0, 0.0)),
        )
        .unwrap();
        let unknown: Vec<Arc<dyn Detector>> = vec![Arc::new(other)];
        assert_eq!(
            kernel.prepare(&unknown, &strategy(false, false)),
            Err(LikelihoodError::UnknownDetector { name: "L1".to_string() })
        );
    }

    #[test]
    // Purpose
    // -------
    // Params checks report the violated bound.
    //
    // Given
    // -----
    // - Detector band [20, 32] Hz, duration 4 s.
    // - Validity fhigh = 30; then a valid band with seglen 8; then a chirp
    //   mass prior below the basis minimum.
    //
    // Expect
    // ------
    // - RoqParamsRange on maximum_frequency, duration and chirp_mass in turn.
    fn params_check_reports_violated_bound() {
        let ifo = detector();
        let base = RoqValidity {
            flow: 20.0,
            fhigh: 32.0,
            seglen: 4.0,
            chirp_mass_min: 10.0,
            chirp_mass_max: 40.0,
            component_mass_min: 5.0,
        };
        let mut priors = PriorSet::new();
        assert!(check_roq_params(&ifo, &base, &priors).is_ok());

        let narrow = RoqValidity { fhigh: 30.0, ..base };
        assert!(matches!(
            check_roq_params(&ifo, &narrow, &priors),
            Err(LikelihoodError::RoqParamsRange { parameter: "maximum_frequency", .. })
        ));
        let long = RoqValidity { seglen: 8.0, ..base };
        assert!(matches!(
            check_roq_params(&ifo, &long, &priors),
            Err(LikelihoodError::RoqParamsRange { parameter: "duration", .. })
        ));
        priors.insert("chirp_mass", Arc::new(UniformPrior::new("chirp_mass", 5.0, 20.0).unwrap()));
        assert_eq!(
            check_roq_params(&ifo, &base, &priors),
            Err(LikelihoodError::RoqParamsRange { parameter: "chirp_mass", value: 5.0, bound: 10.0 })
        );
    }

    #[test]
    // Purpose
    // -------
    // A basis on the validity grid is aligned by frequency, and weight
    // caches reload identically in both formats.
    //
    // Given
    // -----
    // - Validity flow = 20, fhigh = 32, seglen = 4: 49 basis rows.
    // - Weights saved as .npz and as .json.
    //
    // Expect
    // ------
    // - Construction succeeds; a 48-row basis is a LengthMismatch.
    // - Reloaded weights equal the built ones.
    fn validity_grid_and_weight_caches() {
        let ifo = detector();
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo)];
        let validity = RoqValidity {
            flow: 20.0,
            fhigh: 32.0,
            seglen: 4.0,
            chirp_mass_min: 1.0,
            chirp_mass_max: 100.0,
            component_mass_min: 1.0,
        };
        let options = RoqOptions { validity: Some(validity), ..RoqOptions::default() };
        let basis = |rows: usize| RoqBasis {
            linear_matrix: Array2::from_shape_fn((rows, 3), |(r, c)| Complex64::new((r * (c + 1)) as f64 * 0.01, 0.1)),
            quadratic_matrix: Array2::from_shape_fn((rows, 2), |(r, c)| 1.0 + (r + c) as f64 * 0.1),
            linear_nodes: array![20.0, 25.0, 30.0],
            quadratic_nodes: array![20.0, 30.0],
        };
        let kernel =
            RoqKernel::new(&detectors, basis(49), &time_priors(), &TimeReference::Geocenter, &options).unwrap();
        assert!(matches!(
            RoqKernel::new(&detectors, basis(48), &time_priors(), &TimeReference::Geocenter, &options),
            Err(LikelihoodError::LengthMismatch { what: "ROQ basis rows", expected: 49, actual: 48 })
        ));

        let dir = tempfile::tempdir().unwrap();
        for name in ["weights.npz", "weights.json"] {
            let path = dir.path().join(name);
            kernel.weights().save(&path).unwrap();
            let loaded = RoqWeights::load(&path).unwrap();
            assert_eq!(&loaded, kernel.weights());
        }
    }
}
