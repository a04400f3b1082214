//! Multi-band kernel.
//!
//! Purpose
//! -------
//! Evaluate the waveform on a frequency grid whose resolution shrinks with
//! frequency. Band `b` has duration `T / 2^b` (resolution `2^b / T`) and is
//! used above its starting frequency, where the signal's time to merger
//! fits into that shorter duration.
//!
//! Key behaviors
//! -------------
//! - [`MultibandPlan`] lays out the bands from a reference chirp mass using
//!   the 0PN time-to-merger, windows each band with raised-cosine tapers so
//!   overlapping windows sum to one, and deduplicates the union of band
//!   frequencies into the grid handed to the waveform generator.
//! - Linear coefficients come from the whitened data downsampled to each
//!   band by an IRFFT/RFFT pair, so `d·h` is one dot product.
//! - `h·h` uses either linear-interpolation coefficients (one dot product
//!   against `|h|²`) or the IFFT-FFT algorithm (per-band convolution
//!   kernels applied through FFTs at evaluation time).
//!
//! Invariants & assumptions
//! ------------------------
//! - All detectors share duration, start time and frequency resolution.
//! - Band durations halve geometrically; band starting frequencies
//!   increase strictly.
//! - Time and calibration marginalization are rejected in `prepare`.
//! - The shortened bands assume the signal is localized in time: the merger
//!   must lie within `time_offset` of the segment end, so each band's
//!   waveform fits into its last `T_b` seconds. Signals arriving earlier
//!   wrap around inside the shorter bands and the IFFT-FFT `h·h` drifts
//!   from the full-grid value.
//!
//! Conventions
//! -----------
//! - Masses are in solar masses; times in seconds; frequencies in Hz.
use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{s, Array1, ArrayView1};
use num_complex::Complex64;
use tracing::{info, warn};

use crate::{
    likelihood::{
        core::{
            detector::{antenna_weighted_sum, arrival_time_offset, Detector},
            options::MultibandOptions,
            parameters::{SourceParameters, GEOCENT_TIME},
            priors::PriorSet,
            snr::{CalculatedSnrs, SnrGrid},
            validation::validate_detectors,
            waveform::{FrequencyNodes, Polarizations},
        },
        errors::{LikelihoodError, LikelihoodResult},
        marginalization::combination::MarginalizationStrategy,
        models::{
            kernel::{SnrKernel, SnrRequest},
            roq::{EARTH_RADIUS, SPEED_OF_LIGHT},
        },
    },
    numerics::{bisect_threshold, round_up_to_power_of_two, unique_with_inverse, RealFftPlan},
};

pub const GRAVITATIONAL_CONSTANT: f64 = 6.674_30e-11;
pub const SOLAR_MASS: f64 = 1.988_409_87e30;

const DEFAULT_TIME_OFFSET: f64 = 2.12;
const DEFAULT_DELTA_F_END: f64 = 53.0;
const INDEX_TOLERANCE: f64 = 1e-9;

/// `⌈x⌉` that ignores round-off just above an integer.
fn ceil_index(x: f64) -> usize {
    (x - INDEX_TOLERANCE).ceil().max(0.0) as usize
}

fn floor_index(x: f64) -> usize {
    (x + INDEX_TOLERANCE).floor().max(0.0) as usize
}

/// One frequency band.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyBand {
    /// Band duration `T / 2^b` (s).
    pub duration: f64,
    /// Starting frequency `f_b`.
    pub start_frequency: f64,
    /// Width `Δf_b` of the lower taper.
    pub smoothing: f64,
    /// Samples of the downsampled data, `N_b`.
    pub n_samples: usize,
    /// Samples of the shortened data, `M_b = N_b / 2^b`.
    pub n_shortened: usize,
    /// First frequency index `K_s` on the band grid `k / duration`.
    pub start_index: usize,
    /// Last frequency index `K_e`.
    pub end_index: usize,
    /// Position of the band's first point in the banded frequency array.
    pub offset: usize,
}

impl FrequencyBand {
    pub fn len(&self) -> usize {
        (self.end_index + 1).saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.end_index < self.start_index
    }

    /// Length `N̂_b = min(2 M_b, N_b)` of the IFFT-FFT buffers.
    pub fn n_hat(&self) -> usize {
        (2 * self.n_shortened).min(self.n_samples)
    }
}

/// 0PN chirp of the reference chirp mass.
#[derive(Debug, Clone, Copy)]
struct Chirp {
    chirp_mass_seconds: f64,
    highest_mode: f64,
}

impl Chirp {
    /// Time to merger from frequency `f` of the highest mode.
    fn tau(&self, f: f64) -> f64 {
        let f22 = 2.0 * f / self.highest_mode;
        5.0 / 256.0 * self.chirp_mass_seconds * (PI * self.chirp_mass_seconds * f22).powf(-8.0 / 3.0)
    }

    fn dtau_df(&self, f: f64) -> f64 {
        let f22 = 2.0 * f / self.highest_mode;
        -5.0 / 96.0 * self.chirp_mass_seconds * (PI * self.chirp_mass_seconds * f22).powf(-8.0 / 3.0) / f
    }

    /// Frequency where `f − 1/√(−dτ/df)` stops increasing.
    fn turning_frequency(&self) -> f64 {
        (15.0 / 968.0f64).powf(3.0 / 5.0) * (self.highest_mode / (2.0 * PI)).powf(8.0 / 5.0)
            / self.chirp_mass_seconds
    }
}

/// Band layout shared by every detector.
#[derive(Debug, Clone, PartialEq)]
pub struct MultibandPlan {
    duration: f64,
    bands: Vec<FrequencyBand>,
    /// Start frequency and taper width of the closing edge.
    end_edge: (f64, f64),
    banded_frequencies: Array1<f64>,
    windows: Array1<f64>,
    unique_frequencies: Array1<f64>,
    unique_to_banded: Vec<usize>,
    /// Largest `N_b`.
    n_full: usize,
}

impl MultibandPlan {
    /// Lay out the bands for `detectors`.
    ///
    /// Parameters
    /// ----------
    /// - `priors`: the `geocent_time` prior, if present, sets the default
    ///   time offset and end-taper width.
    /// - `options`: reference chirp mass, accuracy factor and overrides.
    ///
    /// Errors
    /// ------
    /// - `InvalidOption` for non-positive options.
    /// - `EmptyDetectorSet` / `InconsistentDetectors` from detector
    ///   validation.
    pub fn new(
        detectors: &[Arc<dyn Detector>], priors: &PriorSet, options: &MultibandOptions,
    ) -> LikelihoodResult<Self> {
        options.validate()?;
        validate_detectors(detectors)?;
        let first = &detectors[0];
        let duration = first.duration();
        let segment_end = first.start_time() + duration;
        let earth_crossing = EARTH_RADIUS / SPEED_OF_LIGHT;
        let time_prior = priors.get(GEOCENT_TIME);

        let time_offset = match (options.time_offset, time_prior) {
            (Some(v), _) => v,
            (None, Some(prior)) => segment_end - prior.minimum() + earth_crossing,
            (None, None) => {
                warn!(time_offset = DEFAULT_TIME_OFFSET, "Time offset can not be inferred; using the standard value");
                DEFAULT_TIME_OFFSET
            }
        };
        let delta_f_end = match (options.delta_f_end, time_prior) {
            (Some(v), _) => v,
            (None, Some(prior)) => 100.0 / (segment_end - prior.maximum() - earth_crossing),
            (None, None) => {
                warn!(delta_f_end = DEFAULT_DELTA_F_END, "delta_f_end can not be inferred; using the standard value");
                DEFAULT_DELTA_F_END
            }
        };
        if !(delta_f_end > 0.0) || !delta_f_end.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "delta_f_end",
                value: delta_f_end,
                reason: "The geocent_time prior must end before the segment end.",
            });
        }

        let chirp = Chirp {
            chirp_mass_seconds: GRAVITATIONAL_CONSTANT * options.reference_chirp_mass * SOLAR_MASS
                / SPEED_OF_LIGHT.powi(3),
            highest_mode: options.highest_mode as f64,
        };
        let turning = chirp.turning_frequency();
        let maximum_banding_frequency = match options.maximum_banding_frequency {
            Some(f) if f < turning => f,
            Some(f) => {
                warn!(requested = f, used = turning, "maximum_banding_frequency is too large");
                turning
            }
            None => turning,
        };

        let minimum_frequency =
            detectors.iter().map(|d| d.minimum_frequency()).fold(f64::INFINITY, f64::min);
        let maximum_frequency =
            detectors.iter().map(|d| d.maximum_frequency()).fold(f64::NEG_INFINITY, f64::max);

        // band starting frequencies (f_b, Δf_b)
        let mut durations = vec![duration];
        let mut edges = vec![(minimum_frequency, 0.0)];
        let mut next_duration = duration / 2.0;
        while next_duration > time_offset.max(options.minimum_banding_duration) {
            let current = edges[edges.len() - 1].0;
            let above_next = |f: f64| {
                let root = (-chirp.dtau_df(f)).sqrt();
                let fits = next_duration - time_offset - chirp.tau(f) - options.accuracy_factor * root > 0.0;
                let separated = f - 1.0 / root - current > 0.0;
                fits && separated
            };
            let found = bisect_threshold(current, maximum_banding_frequency, 1e-2 / next_duration, above_next);
            match found {
                Some(f) if f < maximum_frequency.min(maximum_banding_frequency) => {
                    durations.push(next_duration);
                    edges.push((f, 1.0 / (-chirp.dtau_df(f)).sqrt()));
                    next_duration /= 2.0;
                }
                _ => break,
            }
        }
        let end_edge = (maximum_frequency + delta_f_end, delta_f_end);
        edges.push(end_edge);

        let mut bands = Vec::with_capacity(durations.len());
        let mut offset = 0;
        for (b, &band_duration) in durations.iter().enumerate() {
            let (f_now, df_now) = edges[b];
            let f_next = edges[b + 1].0;
            let n_samples = round_up_to_power_of_two(2.0 * (f_next * duration + 1.0)).max(1 << b);
            let band = FrequencyBand {
                duration: band_duration,
                start_frequency: f_now,
                smoothing: df_now,
                n_samples,
                n_shortened: n_samples >> b,
                start_index: ceil_index((f_now - df_now) * band_duration),
                end_index: floor_index(f_next * band_duration),
                offset,
            };
            offset += band.len();
            bands.push(band);
        }
        info!(
            n_bands = bands.len(),
            durations = ?durations,
            "Divided the frequency range into bands"
        );

        let mut plan = MultibandPlan {
            duration,
            bands,
            end_edge,
            banded_frequencies: Array1::zeros(0),
            windows: Array1::zeros(0),
            unique_frequencies: Array1::zeros(0),
            unique_to_banded: Vec::new(),
            n_full: 0,
        };
        let mut frequencies = Vec::with_capacity(offset);
        let mut band_of_point = Vec::with_capacity(offset);
        for (b, band) in plan.bands.iter().enumerate() {
            for k in band.start_index..=band.end_index {
                frequencies.push(k as f64 / band.duration);
                band_of_point.push(b);
            }
        }
        plan.banded_frequencies = Array1::from_vec(frequencies);
        plan.windows = Array1::from_shape_fn(offset, |j| plan.window(plan.banded_frequencies[j], band_of_point[j]));
        let (unique, inverse) = unique_with_inverse(plan.banded_frequencies.view());
        plan.unique_frequencies = unique;
        plan.unique_to_banded = inverse;
        plan.n_full = plan.bands.iter().map(|b| b.n_samples).max().unwrap_or(1);

        info!(
            n_frequencies = plan.unique_frequencies.len(),
            speed_up = (maximum_frequency - minimum_frequency) * duration / plan.unique_frequencies.len() as f64,
            "Multi-banded waveform frequencies"
        );
        Ok(plan)
    }

    pub fn bands(&self) -> &[FrequencyBand] {
        &self.bands
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Frequencies of every band, concatenated (with duplicates).
    pub fn banded_frequencies(&self) -> ArrayView1<'_, f64> {
        self.banded_frequencies.view()
    }

    /// Sorted unique frequencies the waveform is evaluated at.
    pub fn unique_frequencies(&self) -> ArrayView1<'_, f64> {
        self.unique_frequencies.view()
    }

    /// Window values on the banded frequencies.
    pub fn windows(&self) -> ArrayView1<'_, f64> {
        self.windows.view()
    }

    /// Window of band `b` at frequency `f`.
    pub fn window(&self, f: f64, b: usize) -> f64 {
        let (f_now, df_now) = (self.bands[b].start_frequency, self.bands[b].smoothing);
        let (f_next, df_next) = match self.bands.get(b + 1) {
            Some(next) => (next.start_frequency, next.smoothing),
            None => self.end_edge,
        };
        if f_now - df_now < f && f < f_now {
            (1.0 + (PI * (f - f_now) / df_now).cos()) / 2.0
        } else if f_now <= f && f <= f_next - df_next {
            1.0
        } else if f_next - df_next < f && f < f_next {
            (1.0 - (PI * (f - f_next) / df_next).cos()) / 2.0
        } else {
            0.0
        }
    }

    fn band_points(&self, b: usize) -> std::ops::Range<usize> {
        let band = &self.bands[b];
        band.offset..band.offset + band.len()
    }

    /// `d/S` on the first `n_full/2 + 1` bins, zero outside the mask.
    fn whitened_data(&self, detector: &dyn Detector) -> Array1<Complex64> {
        let mut out = Array1::<Complex64>::zeros(self.n_full / 2 + 1);
        let strain = detector.strain();
        let psd = detector.power_spectral_density();
        for (k, &inside) in detector.frequency_mask().iter().enumerate() {
            if inside && k < out.len() {
                out[k] = strain[k] / psd[k];
            }
        }
        out
    }

    fn inverse_psd(&self, detector: &dyn Detector) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.n_full / 2 + 1);
        let psd = detector.power_spectral_density();
        for (k, &inside) in detector.frequency_mask().iter().enumerate() {
            if inside && k < out.len() {
                out[k] = 1.0 / psd[k];
            }
        }
        out
    }

    /// `(4/T_b)·w·conj(D_b)` on the banded grid.
    fn linear_coefficients(&self, detector: &dyn Detector) -> Array1<Complex64> {
        let data = self.whitened_data(detector);
        let mut coefficients = Array1::<Complex64>::zeros(self.banded_frequencies.len());
        let mut buffer = Vec::new();
        let mut scratch = Vec::new();
        for (b, band) in self.bands.iter().enumerate() {
            let half = band.n_samples / 2;
            let mut in_band = data.slice(s![..(half + 1).min(data.len())]).to_owned();
            if let Some(last) = in_band.get_mut(half) {
                *last = Complex64::new(0.0, 0.0);
            }
            let series = RealFftPlan::new(band.n_samples).irfft(in_band.view(), &mut buffer, &mut scratch);
            let shortened = series.slice(s![band.n_samples - band.n_shortened..]).to_owned();
            let downsampled = RealFftPlan::new(band.n_shortened).rfft(shortened.view(), &mut buffer, &mut scratch);
            let norm = 4.0 / band.duration;
            for (j, idx) in self.band_points(b).enumerate() {
                let value = downsampled.get(band.start_index + j).copied().unwrap_or_default();
                coefficients[idx] = value.conj() * self.windows[idx] * norm;
            }
        }
        coefficients
    }

    /// Coefficients reproducing the windowed full-resolution sum of `|h|²/S`
    /// when `|h|²` is linearly interpolated between banded points.
    fn linear_interpolation_coefficients(&self, detector: &dyn Detector) -> Array1<f64> {
        let inverse_psd = self.inverse_psd(detector);
        let n_bins = inverse_psd.len();
        let full_frequency = |i: usize| i as f64 / self.duration;
        let mut coefficients = Array1::<f64>::zeros(self.banded_frequencies.len());
        for (b, band) in self.bands.iter().enumerate() {
            let points = self.band_points(b);
            let freqs = self.banded_frequencies.slice(s![points.clone()]);
            let n = freqs.len();
            if n < 2 {
                continue;
            }
            let norm = 4.0 * band.duration / self.duration;
            let mut coeffs = coefficients.slice_mut(s![points]);
            for k in 0..n - 1 {
                let start = if k == 0 { 0 } else { ceil_index(self.duration * freqs[k]) };
                let end = if k == n - 2 {
                    n_bins - 1
                } else {
                    ceil_index(self.duration * freqs[k + 1]).saturating_sub(1).min(n_bins - 1)
                };
                for i in start..=end {
                    let weight = inverse_psd[i] * self.window(full_frequency(i), b);
                    if weight == 0.0 {
                        continue;
                    }
                    let f = full_frequency(i);
                    coeffs[k] += norm * (freqs[k + 1] - f) * weight;
                    coeffs[k + 1] += norm * (f - freqs[k]) * weight;
                }
            }
        }
        coefficients
    }

    /// Per-band convolution kernels for the IFFT-FFT algorithm.
    fn convolution_kernels(&self, detector: &dyn Detector) -> Vec<Array1<Complex64>> {
        let inverse_psd = self.inverse_psd(detector).mapv(|v| Complex64::new(v, 0.0));
        let mut buffer = Vec::new();
        let mut scratch = Vec::new();
        self.bands
            .iter()
            .map(|band| {
                let n_hat = band.n_hat();
                let half = band.n_samples / 2;
                let spectrum = inverse_psd.slice(s![..(half + 1).min(inverse_psd.len())]);
                let kernel = RealFftPlan::new(band.n_samples).irfft(spectrum, &mut buffer, &mut scratch);
                let half_length = n_hat / 2;
                let tail = n_hat - half_length - 1;
                let mut truncated = Array1::<f64>::zeros(n_hat);
                truncated.slice_mut(s![..half_length + 1]).assign(&kernel.slice(s![..half_length + 1]));
                if tail > 0 {
                    truncated.slice_mut(s![half_length + 1..]).assign(&kernel.slice(s![band.n_samples - tail..]));
                }
                RealFftPlan::new(n_hat).rfft(truncated.view(), &mut buffer, &mut scratch)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct BandTransforms {
    shortened: RealFftPlan,
    padded: RealFftPlan,
}

#[derive(Debug, Clone)]
enum QuadraticCoefficients {
    LinearInterpolation(Array1<f64>),
    IfftFft(Vec<Array1<Complex64>>),
}

#[derive(Debug, Clone)]
struct DetectorCoefficients {
    name: String,
    linear: Array1<Complex64>,
    quadratic: QuadraticCoefficients,
}

/// Multi-band [`SnrKernel`].
#[derive(Debug, Clone)]
pub struct MultibandKernel {
    plan: MultibandPlan,
    coefficients: Vec<DetectorCoefficients>,
    square_root_windows: Array1<f64>,
    transforms: Vec<BandTransforms>,
    order: Vec<usize>,
}

impl MultibandKernel {
    /// Lay out the bands and precompute every detector's coefficients.
    ///
    /// Errors
    /// ------
    /// - As [`MultibandPlan::new`].
    pub fn new(
        detectors: &[Arc<dyn Detector>], priors: &PriorSet, options: &MultibandOptions,
    ) -> LikelihoodResult<Self> {
        let plan = MultibandPlan::new(detectors, priors, options)?;
        if options.linear_interpolation {
            info!("Linear-interpolation algorithm is used for (h, h)");
        } else {
            info!("IFFT-FFT algorithm is used for (h, h)");
        }
        let coefficients = detectors
            .iter()
            .map(|det| {
                info!(detector = det.name(), "Pre-computing multi-band coefficients");
                let quadratic = if options.linear_interpolation {
                    QuadraticCoefficients::LinearInterpolation(plan.linear_interpolation_coefficients(det.as_ref()))
                } else {
                    QuadraticCoefficients::IfftFft(plan.convolution_kernels(det.as_ref()))
                };
                DetectorCoefficients {
                    name: det.name().to_string(),
                    linear: plan.linear_coefficients(det.as_ref()),
                    quadratic,
                }
            })
            .collect();
        let transforms = plan
            .bands
            .iter()
            .map(|band| BandTransforms {
                shortened: RealFftPlan::new(band.n_shortened),
                padded: RealFftPlan::new(band.n_hat()),
            })
            .collect();
        let square_root_windows = plan.windows.mapv(f64::sqrt);
        let order = (0..detectors.len()).collect();
        Ok(MultibandKernel { plan, coefficients, square_root_windows, transforms, order })
    }

    pub fn plan(&self) -> &MultibandPlan {
        &self.plan
    }

    fn detector_coefficients(&self, detector_index: usize, name: &str) -> Option<&DetectorCoefficients> {
        self.order
            .get(detector_index)
            .and_then(|&i| self.coefficients.get(i))
            .filter(|c| c.name == name)
            .or_else(|| self.coefficients.iter().find(|c| c.name == name))
    }

    /// `h·h` through per-band FFT convolutions.
    fn ifft_fft_optimal_snr(
        &self, signal: ArrayView1<Complex64>, kernels: &[Array1<Complex64>], detector: &dyn Detector,
    ) -> f64 {
        let psd = detector.power_spectral_density();
        let mask = detector.frequency_mask();
        let mut total = 0.0;
        let mut buffer = Vec::new();
        let mut scratch = Vec::new();
        for (b, band) in self.plan.bands.iter().enumerate() {
            let points = self.plan.band_points(b);
            if b == 0 {
                let norm = 4.0 / self.plan.duration;
                for (j, idx) in points.enumerate() {
                    let k = band.start_index + j;
                    if k < mask.len() && mask[k] {
                        total += norm * signal[idx].norm_sqr() * self.plan.windows[idx] / psd[k];
                    }
                }
                continue;
            }

            let transforms = &self.transforms[b];
            let mut weighted = Array1::<Complex64>::zeros(band.n_shortened / 2 + 1);
            for (j, idx) in points.enumerate() {
                if let Some(slot) = weighted.get_mut(band.start_index + j) {
                    *slot = signal[idx] * self.square_root_windows[idx];
                }
            }
            let series = transforms.shortened.irfft(weighted.view(), &mut buffer, &mut scratch);
            let n_hat = band.n_hat();
            let mut padded = Array1::<f64>::zeros(n_hat);
            padded.slice_mut(s![n_hat - band.n_shortened..]).assign(&series);
            let spectrum = transforms.padded.rfft(padded.view(), &mut buffer, &mut scratch);
            let t_hat = self.plan.duration * n_hat as f64 / band.n_samples as f64;
            let sum: f64 =
                spectrum.iter().zip(kernels[b].iter()).map(|(h, kernel)| h.norm_sqr() * kernel.re).sum();
            total += 4.0 / t_hat * sum;
        }
        total
    }
}

impl SnrKernel for MultibandKernel {
    type Waveform = Polarizations;

    fn name(&self) -> &'static str {
        "multi-band"
    }

    fn prepare(
        &mut self, detectors: &[Arc<dyn Detector>], strategy: &MarginalizationStrategy,
    ) -> LikelihoodResult<()> {
        if strategy.needs_time_grid() {
            return Err(LikelihoodError::UnsupportedMarginalization {
                kernel: "multi-band",
                marginalization: "time",
            });
        }
        if strategy.needs_calibration_draws() {
            return Err(LikelihoodError::UnsupportedMarginalization {
                kernel: "multi-band",
                marginalization: "calibration",
            });
        }
        self.order = detectors
            .iter()
            .map(|det| {
                self.coefficients
                    .iter()
                    .position(|c| c.name == det.name())
                    .ok_or_else(|| LikelihoodError::UnknownDetector { name: det.name().to_string() })
            })
            .collect::<LikelihoodResult<_>>()?;
        Ok(())
    }

    fn frequency_nodes(&self) -> Option<FrequencyNodes> {
        Some(FrequencyNodes::Multiband { frequencies: self.plan.unique_frequencies.clone() })
    }

    fn calculate_snrs(
        &self, waveform: &Polarizations, detector_index: usize, detector: &dyn Detector,
        parameters: &SourceParameters, _request: &SnrRequest<'_>,
    ) -> Option<CalculatedSnrs> {
        let coefficients = self.detector_coefficients(detector_index, detector.name())?;

        let unique = antenna_weighted_sum(detector, waveform, parameters, self.plan.unique_frequencies.len());
        let tau = arrival_time_offset(detector, parameters);
        let banded = self.plan.banded_frequencies.view();
        let mut signal = Array1::from_shape_fn(banded.len(), |j| {
            unique[self.plan.unique_to_banded[j]] * Complex64::from_polar(1.0, -2.0 * PI * banded[j] * tau)
        });
        if detector.calibration_model().is_some() {
            signal *= &detector.calibration_factor(banded, parameters);
        }

        let d_inner_h = signal.dot(&coefficients.linear);
        let optimal_snr_squared = match &coefficients.quadratic {
            QuadraticCoefficients::LinearInterpolation(q) => signal.mapv(|h| h.norm_sqr()).dot(q),
            QuadraticCoefficients::IfftFft(kernels) => self.ifft_fft_optimal_snr(signal.view(), kernels, detector),
        };
        Some(CalculatedSnrs::new(d_inner_h, optimal_snr_squared, SnrGrid::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::core::{
        detector::{FixedAntenna, Interferometer},
        priors::UniformPrior,
    };
    use crate::likelihood::models::kernel::StandardKernel;
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // - Band layout: geometric durations, increasing start frequencies,
    //   windows summing to one.
    // - A single band reproduces the full-grid inner products with both
    //   quadratic algorithms.
    // - Linear-interpolation coefficients are exact for |h|² linear in f.
    // - Across several bands both quadratic algorithms match the full grid
    //   for a merger near the segment end.
    // - Detectors without coefficients are outside the kernel's support.
    // -------------------------------------------------------------------------

    fn detector(n: usize, duration: f64) -> Interferometer {
        let freqs = Array1::from_shape_fn(n, |k| k as f64 / duration);
        let strain = Array1::from_shape_fn(n, |k| Complex64::new((0.05 * k as f64).cos(), (0.07 * k as f64).sin()));
        let psd = Array1::from_shape_fn(n, |k| 1.0 + 0.001 * k as f64);
        Interferometer::new("H1", freqs, strain, psd, 0.0, duration, Arc::new(FixedAntenna::new(0.8, 0.3, 0.0)))
            .unwrap()
    }

    fn waveform_at(frequencies: ArrayView1<f64>) -> Polarizations {
        let plus = frequencies.mapv(|f| Complex64::from_polar((1.0 + 0.01 * f).sqrt(), 0.3 * f));
        let cross = Array1::<Complex64>::zeros(frequencies.len());
        Polarizations::plus_cross(plus, cross)
    }

    fn multi_band_options() -> MultibandOptions {
        MultibandOptions {
            reference_chirp_mass: 30.0,
            time_offset: Some(0.5),
            delta_f_end: Some(20.0),
            ..MultibandOptions::default()
        }
    }

    #[test]
    // Purpose
    // -------
    // The band layout halves durations and tapers bands into each other.
    //
    // Given
    // -----
    // - T = 8 s, band [20, 128] Hz, chirp mass 30, time offset 0.5 s.
    //
    // Expect
    // ------
    // - At least two bands; durations T, T/2, ...; start frequencies
    //   strictly increase.
    // - Σ_b w_b(f) = 1 on a fine grid inside [20, 128].
    fn band_layout_and_windows_sum_to_one() {
        let ifo = detector(1025, 8.0);
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo)];
        let plan = MultibandPlan::new(&detectors, &PriorSet::new(), &multi_band_options()).unwrap();
        let bands = plan.bands();
        assert!(bands.len() >= 2);
        for (b, band) in bands.iter().enumerate() {
            assert_relative_eq!(band.duration, 8.0 / 2f64.powi(b as i32));
            assert_eq!(band.n_shortened, band.n_samples >> b);
            if b > 0 {
                assert!(band.start_frequency > bands[b - 1].start_frequency);
            }
        }
        for i in 0..=1080 {
            let f = 20.0 + i as f64 * 0.1;
            let total: f64 = (0..bands.len()).map(|b| plan.window(f, b)).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
        assert!(plan.unique_frequencies().len() < 1025);
    }

    #[test]
    // Purpose
    // -------
    // With one band both algorithms reproduce the standard kernel.
    //
    // Given
    // -----
    // - T = 4 s, 129 bins; minimum banding duration T forces one band.
    //
    // Expect
    // ------
    // - d·h matches the standard kernel; h·h from linear interpolation and
    //   from IFFT-FFT both match it.
    fn single_band_matches_standard_kernel() {
        let ifo = detector(129, 4.0);
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo.clone())];
        let params = SourceParameters { geocent_time: 1.25, ..SourceParameters::default() };
        let standard = StandardKernel::new().calculate_snrs(
            &waveform_at(ifo.frequency_array()),
            0,
            &ifo,
            &params,
            &SnrRequest::scalar(),
        )
        .unwrap();

        for linear_interpolation in [true, false] {
            let options = MultibandOptions {
                minimum_banding_duration: 4.0,
                linear_interpolation,
                ..multi_band_options()
            };
            let kernel = MultibandKernel::new(&detectors, &PriorSet::new(), &options).unwrap();
            assert_eq!(kernel.plan().bands().len(), 1);
            let pols = waveform_at(kernel.plan().unique_frequencies());
            let snrs = kernel.calculate_snrs(&pols, 0, &ifo, &params, &SnrRequest::scalar()).unwrap();
            assert_relative_eq!(snrs.d_inner_h.re, standard.d_inner_h.re, max_relative = 1e-9, epsilon = 1e-10);
            assert_relative_eq!(snrs.d_inner_h.im, standard.d_inner_h.im, max_relative = 1e-9, epsilon = 1e-10);
            assert_relative_eq!(snrs.optimal_snr_squared, standard.optimal_snr_squared, max_relative = 1e-9);
        }
    }

    #[test]
    // Purpose
    // -------
    // Across several bands the linear-interpolation h·h is exact when |h|²
    // is linear in frequency.
    //
    // Given
    // -----
    // - The multi-band layout of the first test; |h|² = 0.64 (1 + 0.01 f).
    //
    // Expect
    // ------
    // - h·h equals the standard kernel's value.
    fn linear_interpolation_is_exact_for_linear_power() {
        let ifo = detector(1025, 8.0);
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo.clone())];
        let kernel = MultibandKernel::new(&detectors, &PriorSet::new(), &multi_band_options()).unwrap();
        assert!(kernel.plan().bands().len() >= 2);
        let params = SourceParameters { geocent_time: 6.0, ..SourceParameters::default() };
        let fast = kernel.calculate_snrs(
            &waveform_at(kernel.plan().unique_frequencies()),
            0,
            &ifo,
            &params,
            &SnrRequest::scalar(),
        )
        .unwrap();
        let slow = StandardKernel::new()
            .calculate_snrs(&waveform_at(ifo.frequency_array()), 0, &ifo, &params, &SnrRequest::scalar())
            .unwrap();
        assert_relative_eq!(fast.optimal_snr_squared, slow.optimal_snr_squared, max_relative = 1e-9);
    }

    #[test]
    // Purpose
    // -------
    // Across several bands the two quadratic algorithms agree with each
    // other and with the full-grid h·h.
    //
    // Given
    // -----
    // - The multi-band layout of the first test (time offset 0.5 s).
    // - A merger at 7.55 s, within the time offset of the 8 s segment end.
    //
    // Expect
    // ------
    // - Linear interpolation and IFFT-FFT each match the standard kernel's
    //   h·h to 1e-6, and match each other.
    fn quadratic_algorithms_agree_across_bands() {
        let ifo = detector(1025, 8.0);
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo.clone())];
        let params = SourceParameters { geocent_time: 7.55, ..SourceParameters::default() };
        let slow = StandardKernel::new()
            .calculate_snrs(&waveform_at(ifo.frequency_array()), 0, &ifo, &params, &SnrRequest::scalar())
            .unwrap();

        let optimal_snr_squared = |linear_interpolation: bool| {
            let options = MultibandOptions { linear_interpolation, ..multi_band_options() };
            let kernel = MultibandKernel::new(&detectors, &PriorSet::new(), &options).unwrap();
            assert!(kernel.plan().bands().len() >= 2);
            let pols = waveform_at(kernel.plan().unique_frequencies());
            kernel.calculate_snrs(&pols, 0, &ifo, &params, &SnrRequest::scalar()).unwrap().optimal_snr_squared
        };
        let linear = optimal_snr_squared(true);
        let ifft_fft = optimal_snr_squared(false);

        assert_relative_eq!(linear, slow.optimal_snr_squared, max_relative = 1e-6);
        assert_relative_eq!(ifft_fft, slow.optimal_snr_squared, max_relative = 1e-6);
        assert_relative_eq!(ifft_fft, linear, max_relative = 1e-6);
    }

    #[test]
    // Purpose
    // -------
    // A detector the kernel holds no coefficients for is outside its
    // support.
    //
    // Given
    // -----
    // - A one-band kernel built for "H1"; the same data relabelled "L1".
    //
    // Expect
    // ------
    // - `calculate_snrs` returns None.
    fn unknown_detector_is_outside_support() {
        let ifo = detector(129, 4.0);
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo.clone())];
        let options = MultibandOptions { minimum_banding_duration: 4.0, ..multi_band_options() };
        let kernel = MultibandKernel::new(&detectors, &PriorSet::new(), &options).unwrap();
        let other = Interferometer::new(
            "L1",
            ifo.frequency_array().to_owned(),
            ifo.strain().to_owned(),
            ifo.power_spectral_density().to_owned(),
            0.0,
            4.0,
            Arc::new(FixedAntenna::new(0.8, 0.3, 0.0)),
        )
        .unwrap();
        let pols = waveform_at(kernel.plan().unique_frequencies());
        let params = SourceParameters { geocent_time: 3.6, ..SourceParameters::default() };
        assert!(kernel.calculate_snrs(&pols, 0, &other, &params, &SnrRequest::scalar()).is_none());
    }

    #[test]
    // Purpose
    // -------
    // Defaults come from the geocent_time prior.
    //
    // Given
    // -----
    // - T = 8 s starting at 0, geocent_time prior [6, 6.5].
    //
    // Expect
    // ------
    // - The closing taper has width 100 / (8 − 6.5 − R/c).
    fn defaults_follow_time_prior() {
        let ifo = detector(1025, 8.0);
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(ifo)];
        let mut priors = PriorSet::new();
        priors.insert(GEOCENT_TIME, Arc::new(UniformPrior::new(GEOCENT_TIME, 6.0, 6.5).unwrap()));
        let options = MultibandOptions::new(30.0).unwrap();
        let plan = MultibandPlan::new(&detectors, &priors, &options).unwrap();
        let expected = 100.0 / (1.5 - EARTH_RADIUS / SPEED_OF_LIGHT);
        assert_relative_eq!(plan.end_edge.1, expected, max_relative = 1e-12);
        assert_relative_eq!(plan.end_edge.0, 128.0 + expected, max_relative = 1e-12);
    }
}
