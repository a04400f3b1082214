//! Gravitational-wave transient likelihood engine.
//!
//! Purpose
//! -------
//! Combine a waveform generator, an [`SnrKernel`] and the precomputed
//! marginalization state into the log-likelihood ratio a sampler calls for
//! every candidate point, and reconstruct marginalized parameters after
//! sampling.
//!
//! Key behaviors
//! -------------
//! - Construction does all the slow work once: flag resolution into a
//!   [`MarginalizationStrategy`], default priors, the distance lookup table,
//!   the time grid, calibration draws, kernel preparation and the noise
//!   log-likelihood. Every failure is reported here.
//! - [`GravitationalWaveTransient::log_likelihood_ratio`] calls the
//!   generator once, sums per-detector [`CalculatedSnrs`] and reduces them
//!   with the strategy. It never fails: a missing waveform gives `-inf`,
//!   a point outside the kernel's support (an ROQ time outside the weight
//!   window) gives [`OUTSIDE_KERNEL_SUPPORT`] and any other evaluation
//!   error gives NaN.
//! - [`GravitationalWaveTransient::generate_posterior_sample`] draws the
//!   marginalized parameters in the order calibration, time, distance,
//!   phase, each conditioned on the values already drawn.
//!
//! Invariants & assumptions
//! ------------------------
//! - The engine is immutable after construction; shared state sits behind
//!   `Arc`, so clones are cheap and can be handed to independent workers.
//! - Parameters are never mutated in place: jitter and detector-frame time
//!   conversion are applied to a local copy.
//! - With a detector time reference, time marginalization and jitter are
//!   switched off.
//!
//! Conventions
//! -----------
//! - Marginalized parameters are frozen in [`GravitationalWaveTransient::sampling_priors`]:
//!   `geocent_time` at the segment start, `phase` at 0,
//!   `luminosity_distance` at the lookup table's reference distance and
//!   every `recalib_<det>_*` at 0. Time jitter adds a `time_jitter` prior
//!   uniform on `[-Δtc/2, Δtc/2]`.
//!
//! Downstream usage
//! ----------------
//! - Build once per analysis, then call `log_likelihood_ratio` (or
//!   `log_likelihood`) from the sampler loop.
//! - After sampling, map each posterior point through
//!   `generate_posterior_sample` with a seeded RNG.
use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::Array1;
use num_complex::Complex64;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    likelihood::{
        core::{
            detector::{Detector, ResponseCalibration},
            options::{LikelihoodOptions, MarginalizationOptions, TimeReference},
            parameters::{SourceParameters, GEOCENT_TIME, LUMINOSITY_DISTANCE, PHASE, TIME_JITTER},
            priors::{DeltaPrior, PriorSet, UniformPrior},
            snr::{inner_products, noise_inner_product, CalculatedSnrs, SnrGrid},
            validation::{validate_detectors, validate_marginalized_prior},
            waveform::{Rescale, WaveformGenerator},
        },
        errors::{LikelihoodError, LikelihoodResult},
        marginalization::{
            calibration::CalibrationDraws,
            combination::{MarginalizationStrategy, ReductionContext},
            distance::DistanceLookupTable,
            phase::{phase_grid, phase_log_posterior},
            reconstruction::{
                posterior_from_log_likelihood, sample_calibration_index, sample_posterior,
                trim_time_posterior,
            },
            time::TimeGrid,
        },
        models::kernel::{CalibrationRequest, SnrKernel, SnrRequest},
    },
    numerics::FftPlan,
};

/// Log-likelihood ratio returned for points the kernel cannot evaluate,
/// low enough that samplers reject them.
pub const OUTSIDE_KERNEL_SUPPORT: f64 = f64::MIN;

/// Serializable summary of a likelihood configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodMetaData {
    pub kernel: String,
    /// Effective flags after construction-time adjustments.
    pub marginalization: MarginalizationOptions,
    pub time_reference: TimeReference,
    pub detectors: Vec<String>,
    pub duration: f64,
    pub sampling_frequency: f64,
    pub start_time: f64,
    pub reference_distance: Option<f64>,
    pub number_of_response_curves: Option<usize>,
}

/// Gravitational-wave transient likelihood parameterized by its SNR kernel.
///
/// `G` produces the waveform representation `K` consumes: full-grid
/// polarizations for [`StandardKernel`](super::kernel::StandardKernel) and
/// [`MultibandKernel`](super::multiband::MultibandKernel), node values for
/// [`RoqKernel`](super::roq::RoqKernel).
#[derive(Debug, Clone)]
pub struct GravitationalWaveTransient<G, K> {
    detectors: Vec<Arc<dyn Detector>>,
    waveform_generator: G,
    kernel: K,
    priors: PriorSet,
    sampling_priors: PriorSet,
    options: LikelihoodOptions,
    strategy: MarginalizationStrategy,
    time_reference_index: Option<usize>,
    distance_table: Option<Arc<DistanceLookupTable>>,
    time_grid: Option<Arc<TimeGrid>>,
    calibration_draws: Option<Arc<Vec<CalibrationDraws>>>,
    noise_log_likelihood: f64,
}

impl<G, K> GravitationalWaveTransient<G, K>
where
    K: SnrKernel,
    G: WaveformGenerator<K::Waveform>,
{
    /// Build the likelihood and every precomputed marginalization structure.
    ///
    /// Parameters
    /// ----------
    /// - `detectors`: detectors sharing one segment (duration, start time,
    ///   sampling frequency, frequency grid).
    /// - `waveform_generator`: receives the kernel's reduced frequency
    ///   nodes, if any, before the first evaluation.
    /// - `kernel`: SNR kernel; it may reject the requested marginalizations.
    /// - `priors`: priors of the full parameter space. Missing
    ///   `geocent_time`/`phase` priors of marginalized parameters are
    ///   replaced by uniform defaults.
    /// - `options`: marginalization flags and the settings of each
    ///   marginalization.
    ///
    /// Errors
    /// ------
    /// - `InvalidOption` / `EmptyDetectorSet` / `InconsistentDetectors` for
    ///   malformed options or detectors.
    /// - `UnknownDetector` for a time reference naming no detector.
    /// - `InvalidMarginalizationCombination`, `UnsupportedMarginalization`.
    /// - `MissingPrior` / `FixedMarginalizedPrior` for marginalized priors.
    /// - Errors from the distance table and calibration draw setup.
    pub fn new(
        detectors: Vec<Arc<dyn Detector>>, mut waveform_generator: G, mut kernel: K, priors: PriorSet,
        options: LikelihoodOptions,
    ) -> LikelihoodResult<Self> {
        options.validate()?;
        validate_detectors(&detectors)?;
        let mut options = options;
        let flags = &mut options.marginalization;

        let time_reference_index = match &flags.time_reference {
            TimeReference::Geocenter => None,
            TimeReference::Detector(name) => {
                let idx = detectors
                    .iter()
                    .position(|d| d.name() == name.as_str())
                    .ok_or_else(|| LikelihoodError::UnknownDetector { name: name.clone() })?;
                if flags.time || flags.jitter_time {
                    info!(reference = %name, "Cannot marginalize over non-geocenter time; disabling time marginalization");
                    flags.time = false;
                    flags.jitter_time = false;
                }
                Some(idx)
            }
        };
        if flags.jitter_time && !flags.time {
            debug!("Time jitter requested without time marginalization; ignoring it");
            flags.jitter_time = false;
        }

        let strategy = MarginalizationStrategy::from_flags(flags)?;
        kernel.prepare(&detectors, &strategy)?;

        let first = Arc::clone(&detectors[0]);
        let start_time = first.start_time();
        let duration = first.duration();
        let mut priors = priors;
        if flags.time && !priors.contains(GEOCENT_TIME) {
            warn!(
                minimum = start_time,
                maximum = start_time + duration,
                "Prior not provided for geocent_time; using a uniform prior over the segment"
            );
            priors.insert(GEOCENT_TIME, Arc::new(UniformPrior::new(GEOCENT_TIME, start_time, start_time + duration)?));
        }
        if flags.phase && !priors.contains(PHASE) {
            warn!("Prior not provided for phase; using a uniform prior on [0, 2π]");
            priors.insert(PHASE, Arc::new(UniformPrior::new(PHASE, 0.0, 2.0 * PI)?));
        }
        for (on, name) in [(flags.time, GEOCENT_TIME), (flags.distance, LUMINOSITY_DISTANCE), (flags.phase, PHASE)] {
            if on {
                validate_marginalized_prior(&priors, name)?;
            }
        }

        let mut sampling_priors = priors.clone();

        let distance_table = match priors.get(LUMINOSITY_DISTANCE).filter(|_| flags.distance) {
            Some(prior) => {
                let table = DistanceLookupTable::setup(prior.as_ref(), flags.phase, &options.distance)?;
                sampling_priors
                    .insert(LUMINOSITY_DISTANCE, Arc::new(DeltaPrior::new(table.reference_distance())));
                Some(Arc::new(table))
            }
            None => None,
        };
        if flags.phase {
            sampling_priors.insert(PHASE, Arc::new(DeltaPrior::new(0.0)));
        }

        let time_grid = match priors.get(GEOCENT_TIME).filter(|_| flags.time) {
            Some(prior) => {
                let grid = TimeGrid::new(
                    start_time,
                    duration,
                    first.sampling_frequency(),
                    first.frequency_array().len(),
                    Arc::clone(prior),
                );
                sampling_priors.insert(GEOCENT_TIME, Arc::new(DeltaPrior::new(start_time)));
                if flags.jitter_time {
                    sampling_priors.insert(TIME_JITTER, Arc::new(grid.jitter_prior()?));
                }
                Some(Arc::new(grid))
            }
            None => None,
        };

        let calibration_draws = if flags.calibration {
            let draws = detectors
                .iter()
                .map(|det| CalibrationDraws::setup(det.as_ref(), &mut sampling_priors, &options.calibration))
                .collect::<LikelihoodResult<Vec<_>>>()?;
            Some(Arc::new(draws))
        } else {
            None
        };

        if let Some(nodes) = kernel.frequency_nodes() {
            waveform_generator.set_frequency_nodes(&nodes);
        }

        let noise_log_likelihood: f64 = detectors
            .iter()
            .map(|det| {
                -0.5 * noise_inner_product(
                    det.strain(),
                    det.power_spectral_density(),
                    det.frequency_mask(),
                    det.duration(),
                )
            })
            .sum();

        info!(
            kernel = kernel.name(),
            marginalization = %strategy.describe(),
            detectors = detectors.len(),
            "Initialized gravitational-wave transient likelihood"
        );

        Ok(GravitationalWaveTransient {
            detectors,
            waveform_generator,
            kernel,
            priors,
            sampling_priors,
            options,
            strategy,
            time_reference_index,
            distance_table,
            time_grid,
            calibration_draws,
            noise_log_likelihood,
        })
    }

    pub fn detectors(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn waveform_generator(&self) -> &G {
        &self.waveform_generator
    }

    /// Priors of the full parameter space, defaults included.
    pub fn priors(&self) -> &PriorSet {
        &self.priors
    }

    /// Priors the sampler should draw from: marginalized parameters frozen.
    pub fn sampling_priors(&self) -> &PriorSet {
        &self.sampling_priors
    }

    /// Effective marginalization flags.
    pub fn marginalization(&self) -> &MarginalizationOptions {
        &self.options.marginalization
    }

    pub fn strategy(&self) -> &MarginalizationStrategy {
        &self.strategy
    }

    pub fn distance_table(&self) -> Option<&DistanceLookupTable> {
        self.distance_table.as_deref()
    }

    pub fn time_grid(&self) -> Option<&TimeGrid> {
        self.time_grid.as_deref()
    }

    pub fn calibration_draws(&self) -> Option<&[CalibrationDraws]> {
        self.calibration_draws.as_deref().map(Vec::as_slice)
    }

    /// `Σ_det −½ · 4/T Σ_mask |d|²/S`, independent of any marginalization.
    pub fn noise_log_likelihood(&self) -> f64 {
        self.noise_log_likelihood
    }

    /// Log-likelihood ratio of signal against noise at `parameters`.
    pub fn log_likelihood_ratio(&self, parameters: &SourceParameters) -> f64 {
        let parameters = self.evaluation_parameters(parameters);
        let Some(waveform) = self.waveform_generator.frequency_domain_strain(&parameters) else {
            return f64::NEG_INFINITY;
        };
        match self.accumulated_snrs(&waveform, &parameters, true) {
            Ok(total) => self.strategy.reduce(&total, &self.reduction_context(&parameters)),
            Err(LikelihoodError::OutsideKernelSupport { .. }) => OUTSIDE_KERNEL_SUPPORT,
            Err(err) => {
                warn!(%err, "Log-likelihood evaluation failed");
                f64::NAN
            }
        }
    }

    pub fn log_likelihood(&self, parameters: &SourceParameters) -> f64 {
        self.log_likelihood_ratio(parameters) + self.noise_log_likelihood
    }

    /// Summed matched-filter record of `waveform` at `parameters`, with the
    /// grids the marginalization strategy needs.
    ///
    /// `parameters` are used as given: no jitter or time-reference
    /// conversion is applied.
    ///
    /// Errors
    /// ------
    /// - `OutsideKernelSupport` when the kernel cannot evaluate a detector
    ///   at `parameters`.
    pub fn calculate_snrs(
        &self, waveform: &K::Waveform, parameters: &SourceParameters,
    ) -> LikelihoodResult<CalculatedSnrs> {
        self.accumulated_snrs(waveform, parameters, true)
    }

    /// Serializable configuration summary.
    pub fn meta_data(&self) -> LikelihoodMetaData {
        let first = &self.detectors[0];
        LikelihoodMetaData {
            kernel: self.kernel.name().to_string(),
            marginalization: self.options.marginalization.clone(),
            time_reference: self.options.marginalization.time_reference.clone(),
            detectors: self.detectors.iter().map(|d| d.name().to_string()).collect(),
            duration: first.duration(),
            sampling_frequency: first.sampling_frequency(),
            start_time: first.start_time(),
            reference_distance: self.distance_table.as_ref().map(|t| t.reference_distance()),
            number_of_response_curves: self.calibration_draws.as_ref().and_then(|d| d.first().map(|c| c.len())),
        }
    }

    /// Draw every marginalized parameter from its conditional posterior.
    ///
    /// Parameters are drawn in the order calibration index, coalescence
    /// time, luminosity distance, phase; each draw conditions on those
    /// before it.
    ///
    /// Errors
    /// ------
    /// - `WaveformUnavailable` when the generator returns no signal.
    /// - `ReconstructionUnsupported` for time reconstruction with a kernel
    ///   that cannot project onto the full grid.
    /// - `EmptyPosterior` when a conditional posterior has no mass.
    pub fn generate_posterior_sample(
        &self, parameters: &SourceParameters, rng: &mut dyn RngCore,
    ) -> LikelihoodResult<SourceParameters> {
        let mut sample = self.evaluation_parameters(parameters);
        let mut waveform = self
            .waveform_generator
            .frequency_domain_strain(&sample)
            .ok_or(LikelihoodError::WaveformUnavailable)?;

        if let Some(draws) = self.calibration_draws.as_deref() {
            let index = self.sample_calibration(&waveform, &sample, rng)?;
            sample.recalib_index = Some(index);
            for set in draws {
                for (name, values) in set.parameter_draws() {
                    sample.set(name, values[index]);
                }
            }
        }
        if let Some(grid) = self.time_grid.as_deref() {
            sample.geocent_time = self.sample_time(grid, &waveform, &sample, rng)?;
        }
        if let Some(table) = self.distance_table.as_deref() {
            let snrs = self.accumulated_snrs(&waveform, &sample, false)?;
            let log_likelihood =
                table.conditional_log_likelihood(snrs.d_inner_h, snrs.optimal_snr_squared, sample.luminosity_distance);
            let posterior = posterior_from_log_likelihood(log_likelihood.view(), table.prior_array());
            let distance = sample_posterior(LUMINOSITY_DISTANCE, table.distance_array(), posterior.view(), rng)?;
            waveform.rescale(sample.luminosity_distance / distance);
            sample.luminosity_distance = distance;
        }
        if self.options.marginalization.phase {
            let snrs = self.accumulated_snrs(&waveform, &sample, false)?;
            let phases = phase_grid(self.options.reconstruction.phase_grid_points);
            let log_posterior = phase_log_posterior(snrs.d_inner_h, snrs.optimal_snr_squared, phases.view());
            let posterior = posterior_from_log_likelihood(log_posterior.view(), Array1::ones(phases.len()).view());
            let phase = sample_posterior(PHASE, phases.view(), posterior.view(), rng)?;
            sample.phase = (sample.phase + phase).rem_euclid(2.0 * PI);
        }
        Ok(sample)
    }

    /// Copy of `parameters` with the geocenter time resolved from the time
    /// reference and the jitter applied.
    fn evaluation_parameters(&self, parameters: &SourceParameters) -> SourceParameters {
        let mut resolved = parameters.clone();
        if let Some(idx) = self.time_reference_index {
            let name = self.options.marginalization.time_reference.parameter_name();
            if let Some(time) = parameters.get(&name) {
                let delay = self.detectors[idx].time_delay_from_geocenter(parameters.ra, parameters.dec, time);
                resolved.geocent_time = time - delay;
            }
        }
        if self.options.marginalization.jitter_time {
            resolved.geocent_time += parameters.time_jitter;
        }
        resolved
    }

    fn reduction_context<'a>(&'a self, parameters: &'a SourceParameters) -> ReductionContext<'a> {
        ReductionContext {
            distance_table: self.distance_table.as_deref(),
            time_grid: self.time_grid.as_deref(),
            parameters,
        }
    }

    /// Request for detector `idx`; `marginalized` asks for the strategy's
    /// grids, otherwise a scalar record with the selected draw applied.
    fn snr_request<'a>(&'a self, idx: usize, parameters: &SourceParameters, marginalized: bool) -> SnrRequest<'a> {
        let calibration = match (self.calibration_draws.as_deref(), parameters.recalib_index) {
            (Some(draws), _) if marginalized => CalibrationRequest::Marginalize(&draws[idx]),
            (Some(draws), Some(index)) => CalibrationRequest::Fixed(&draws[idx], index),
            _ => CalibrationRequest::Model,
        };
        SnrRequest { time: marginalized && self.strategy.needs_time_grid(), calibration }
    }

    fn accumulated_snrs(
        &self, waveform: &K::Waveform, parameters: &SourceParameters, marginalized: bool,
    ) -> LikelihoodResult<CalculatedSnrs> {
        let mut total = CalculatedSnrs::zero();
        for (idx, det) in self.detectors.iter().enumerate() {
            let request = self.snr_request(idx, parameters, marginalized);
            let snrs = self
                .kernel
                .calculate_snrs(waveform, idx, det.as_ref(), parameters, &request)
                .ok_or_else(|| LikelihoodError::OutsideKernelSupport {
                    kernel: self.kernel.name(),
                    detector: det.name().to_string(),
                })?;
            total.accumulate(snrs)?;
        }
        Ok(total)
    }

    /// Calibration index drawn from `exp(ll_c)`, each draw marginalized over
    /// time when time is marginalized too.
    fn sample_calibration(
        &self, waveform: &K::Waveform, parameters: &SourceParameters, rng: &mut dyn RngCore,
    ) -> LikelihoodResult<usize> {
        let snrs = self.accumulated_snrs(waveform, parameters, true)?;
        let ctx = self.reduction_context(parameters);
        let log_likelihood = match (&snrs.grid, self.time_grid.as_deref()) {
            (SnrGrid::Calibration { d_inner_h, optimal_snr_squared }, _) => Array1::from_iter(
                d_inner_h
                    .iter()
                    .zip(optimal_snr_squared.iter())
                    .map(|(&d, &h)| self.strategy.inner_log_likelihood(d, h, &ctx)),
            ),
            (SnrGrid::TimeCalibration { d_inner_h, optimal_snr_squared }, Some(grid)) => Array1::from_iter(
                d_inner_h.outer_iter().zip(optimal_snr_squared.iter()).map(|(row, &h)| {
                    let ll = row.mapv(|d| d.re - h / 2.0);
                    grid.marginalize(ll.view(), parameters.geocent_time)
                }),
            ),
            _ => {
                return Err(LikelihoodError::ReconstructionUnsupported {
                    parameter: "recalib_index",
                    reason: "the kernel produced no calibration grid",
                })
            }
        };
        sample_calibration_index(log_likelihood.view(), rng)
    }

    /// Coalescence time drawn on an upsampled grid wrapping around the
    /// segment.
    fn sample_time(
        &self, grid: &TimeGrid, waveform: &K::Waveform, parameters: &SourceParameters, rng: &mut dyn RngCore,
    ) -> LikelihoodResult<f64> {
        let first = &self.detectors[0];
        let start_time = first.start_time();
        let duration = first.duration();
        let sampling_frequency = self.options.reconstruction.sampling_frequency;
        let n_times = (duration * sampling_frequency).round() as usize;
        let plan = FftPlan::new(n_times);

        let mut d_inner_h = Array1::<Complex64>::zeros(n_times);
        let mut h_inner_h = 0.0;
        let mut buffer = vec![Complex64::new(0.0, 0.0); n_times];
        let mut scratch = Vec::new();
        for (idx, det) in self.detectors.iter().enumerate() {
            let response = match (self.calibration_draws.as_deref(), parameters.recalib_index) {
                (Some(draws), Some(index)) => Some(draws[idx].full_response(index, det.frequency_array().len())),
                _ => None,
            };
            let calibration = match &response {
                Some(r) => ResponseCalibration::Draw(r.view()),
                None => ResponseCalibration::Model,
            };
            let signal = self.kernel.project(waveform, det.as_ref(), parameters, calibration).ok_or(
                LikelihoodError::ReconstructionUnsupported {
                    parameter: "geocent_time",
                    reason: "the kernel cannot project the waveform onto the full frequency grid",
                },
            )?;
            let strain = det.strain();
            let psd = det.power_spectral_density();
            let mask = det.frequency_mask();
            buffer.iter_mut().for_each(|v| *v = Complex64::new(0.0, 0.0));
            for (k, slot) in buffer.iter_mut().enumerate().take(signal.len()) {
                if mask[k] {
                    *slot = strain[k].conj() * signal[k] / psd[k];
                }
            }
            plan.forward(&mut buffer, &mut scratch);
            d_inner_h.iter_mut().zip(buffer.iter()).for_each(|(acc, &v)| *acc += v);
            h_inner_h += inner_products(strain, signal.view(), psd, mask, duration).1;
        }
        d_inner_h *= Complex64::new(4.0 / duration, 0.0);

        let prior = grid.prior();
        let offset = parameters.geocent_time - start_time;
        let (minimum, maximum) = (prior.minimum(), prior.maximum());
        let mut times = Vec::new();
        let mut log_likelihood = Vec::new();
        let ctx = self.reduction_context(parameters);
        for (j, &d) in d_inner_h.iter().enumerate() {
            let time = start_time + (offset + j as f64 / sampling_frequency).rem_euclid(duration);
            if time >= minimum && time < maximum {
                times.push(time);
                log_likelihood.push(self.strategy.inner_log_likelihood(d, h_inner_h, &ctx));
            }
        }
        let times = Array1::from_vec(times);
        let log_likelihood = Array1::from_vec(log_likelihood);
        let posterior = posterior_from_log_likelihood(log_likelihood.view(), times.mapv(|t| prior.prob(t)).view());
        let (times, posterior) = trim_time_posterior(times.view(), posterior.view());
        sample_posterior(GEOCENT_TIME, times.view(), posterior.view(), rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::core::{
        detector::{project_signal, FixedAntenna, Interferometer},
        options::ReconstructionOptions,
        priors::PowerLawPrior,
        waveform::Polarizations,
    };
    use crate::likelihood::models::kernel::StandardKernel;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // - Scalar likelihood identities: zero signal, matched data, noise term.
    // - Construction-time prior handling and flag adjustments.
    // - Reconstruction of time and phase from a loud matched signal.
    // - Time jitter shifts a local copy of the parameters only.
    // -------------------------------------------------------------------------

    const N: usize = 129;
    const DURATION: f64 = 4.0;
    const START: f64 = 100.0;

    /// Band-limited signal with distance scaling and `e^{-2iφ}` phase.
    #[derive(Debug, Clone)]
    struct ToyGenerator {
        frequencies: Array1<f64>,
        amplitude: f64,
    }

    impl WaveformGenerator for ToyGenerator {
        fn frequency_domain_strain(&self, parameters: &SourceParameters) -> Option<Polarizations> {
            if parameters.get("fail").is_some() {
                return None;
            }
            let scale = self.amplitude / parameters.luminosity_distance;
            let phasor = Complex64::from_polar(1.0, -2.0 * parameters.phase);
            let plus = self.frequencies.mapv(|f| Complex64::from_polar(scale, 0.01 * f * f) * phasor);
            let cross = plus.mapv(|v| v * Complex64::new(0.0, 0.5));
            Some(Polarizations::plus_cross(plus, cross))
        }
    }

    fn frequencies() -> Array1<f64> {
        Array1::from_shape_fn(N, |k| k as f64 / DURATION)
    }

    fn detector(strain: Array1<Complex64>) -> Arc<dyn Detector> {
        Arc::new(
            Interferometer::new(
                "H1",
                frequencies(),
                strain,
                Array1::ones(N),
                START,
                DURATION,
                Arc::new(FixedAntenna::new(0.9, 0.4, 0.0)),
            )
            .unwrap(),
        )
    }

    fn injection() -> SourceParameters {
        SourceParameters { geocent_time: 102.0, luminosity_distance: 1.0, ..SourceParameters::default() }
    }

    /// Detector whose strain is exactly the projected injection.
    fn matched_detector(generator: &ToyGenerator) -> Arc<dyn Detector> {
        let empty = detector(Array1::zeros(N));
        let pols = generator.frequency_domain_strain(&injection()).unwrap();
        let strain = project_signal(empty.as_ref(), &pols, &injection(), ResponseCalibration::Model);
        detector(strain)
    }

    fn generator(amplitude: f64) -> ToyGenerator {
        ToyGenerator { frequencies: frequencies(), amplitude }
    }

    fn options(time: bool, distance: bool, phase: bool) -> LikelihoodOptions {
        let mut opts = LikelihoodOptions::default();
        opts.marginalization = MarginalizationOptions::new(time, distance, phase, false, false, TimeReference::Geocenter);
        opts.distance.distance_grid_size = 200;
        opts.distance.optimal_snr_squared_points = 40;
        opts.distance.d_inner_h_points = 80;
        opts.reconstruction = ReconstructionOptions { sampling_frequency: 256.0, phase_grid_points: 101 };
        opts
    }

    fn engine(
        det: Arc<dyn Detector>, gen: ToyGenerator, priors: PriorSet, opts: LikelihoodOptions,
    ) -> LikelihoodResult<GravitationalWaveTransient<ToyGenerator, StandardKernel>> {
        GravitationalWaveTransient::new(vec![det], gen, StandardKernel::new(), priors, opts)
    }

    #[test]
    // Purpose
    // -------
    // A zero waveform gives a zero log-likelihood ratio, with and without
    // time and phase marginalization.
    //
    // Given
    // -----
    // - Noise-free data containing a signal; a generator with amplitude 0.
    // - Time prior spanning the whole segment (the default).
    //
    // Expect
    // ------
    // - log_likelihood_ratio == 0 for none, phase, time and time+phase.
    fn zero_signal_gives_zero_ratio() {
        let det = matched_detector(&generator(1.0));
        for (time, phase) in [(false, false), (false, true), (true, false), (true, true)] {
            let like = engine(det.clone(), generator(0.0), PriorSet::new(), options(time, false, phase)).unwrap();
            assert_relative_eq!(like.log_likelihood_ratio(&injection()), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    // Purpose
    // -------
    // Matched noise-free data with unit PSD gives `ln L = h·h / 2`, and the
    // noise term is the documented sum.
    //
    // Given
    // -----
    // - strain = projected injection, PSD = 1, no marginalization.
    //
    // Expect
    // ------
    // - ratio = (4/T) Σ_mask |h|² / 2; noise = −(4/T) Σ_mask |d|² / 2;
    //   log_likelihood = ratio + noise ≈ 0 here.
    fn matched_data_scenario() {
        let gen = generator(1.0);
        let det = matched_detector(&gen);
        let like = engine(det.clone(), gen, PriorSet::new(), options(false, false, false)).unwrap();
        let mask = det.frequency_mask();
        let power: f64 = det.strain().iter().zip(mask.iter()).filter(|(_, m)| **m).map(|(d, _)| d.norm_sqr()).sum();
        let expected = 4.0 / DURATION * power / 2.0;
        assert_relative_eq!(like.log_likelihood_ratio(&injection()), expected, max_relative = 1e-12);
        assert_relative_eq!(like.noise_log_likelihood(), -expected, max_relative = 1e-12);
        assert_relative_eq!(like.log_likelihood(&injection()), 0.0, epsilon = 1e-9);
    }

    #[test]
    // Purpose
    // -------
    // A waveform failure is a −inf likelihood, not an error.
    //
    // Given
    // -----
    // - A parameter set carrying the generator's `fail` flag.
    //
    // Expect
    // ------
    // - log_likelihood_ratio == −inf; reconstruction reports
    //   WaveformUnavailable.
    fn waveform_failure_is_negative_infinity() {
        let gen = generator(1.0);
        let like = engine(matched_detector(&gen), gen, PriorSet::new(), options(false, false, true)).unwrap();
        let mut params = injection();
        params.set("fail", 1.0);
        assert_eq!(like.log_likelihood_ratio(&params), f64::NEG_INFINITY);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(like.generate_posterior_sample(&params, &mut rng).unwrap_err(), LikelihoodError::WaveformUnavailable);
    }

    #[test]
    // Purpose
    // -------
    // Marginalized priors are checked and replaced at construction.
    //
    // Given
    // -----
    // - Distance marginalization without a distance prior.
    // - Phase marginalization with a fixed phase prior.
    // - Time + phase marginalization with jitter and no priors at all.
    //
    // Expect
    // ------
    // - MissingPrior, then FixedMarginalizedPrior.
    // - Defaults for geocent_time and phase; sampling priors freeze them at
    //   the segment start and 0 and add the jitter prior.
    fn marginalized_priors_are_handled() {
        let gen = generator(1.0);
        let det = matched_detector(&gen);
        let err = engine(det.clone(), gen.clone(), PriorSet::new(), options(false, true, false)).unwrap_err();
        assert_eq!(err, LikelihoodError::MissingPrior { name: "luminosity_distance".into() });

        let mut fixed = PriorSet::new();
        fixed.insert(PHASE, Arc::new(DeltaPrior::new(0.3)));
        let err = engine(det.clone(), gen.clone(), fixed, options(false, false, true)).unwrap_err();
        assert_eq!(err, LikelihoodError::FixedMarginalizedPrior { name: "phase".into() });

        let mut opts = options(true, false, true);
        opts.marginalization.jitter_time = true;
        let like = engine(det, gen, PriorSet::new(), opts).unwrap();
        let time_prior = like.priors().get(GEOCENT_TIME).unwrap();
        assert_eq!((time_prior.minimum(), time_prior.maximum()), (START, START + DURATION));
        let sampling = like.sampling_priors();
        assert!(sampling.get(GEOCENT_TIME).unwrap().is_fixed());
        assert_eq!(sampling.get(GEOCENT_TIME).unwrap().minimum(), START);
        assert!(sampling.get(PHASE).unwrap().is_fixed());
        let jitter = sampling.get(TIME_JITTER).unwrap();
        let half_bin = like.time_grid().unwrap().delta_tc() / 2.0;
        assert_relative_eq!(jitter.maximum(), half_bin);
        assert_relative_eq!(jitter.minimum(), -half_bin);
    }

    #[test]
    // Purpose
    // -------
    // Unsupported combinations fail at construction, and a detector time
    // reference switches time marginalization off.
    //
    // Given
    // -----
    // - time + distance + calibration.
    // - time marginalization with an H1 time reference, evaluated with
    //   `H1_time` instead of `geocent_time`.
    //
    // Expect
    // ------
    // - InvalidMarginalizationCombination.
    // - Effective flags have time off; the ratio equals the geocenter
    //   likelihood at the equivalent time (zero delay).
    fn combinations_and_time_reference() {
        let gen = generator(1.0);
        let det = matched_detector(&gen);
        let mut opts = options(true, true, false);
        opts.marginalization.calibration = true;
        let err = engine(det.clone(), gen.clone(), PriorSet::new(), opts).unwrap_err();
        assert!(matches!(err, LikelihoodError::InvalidMarginalizationCombination { .. }));

        let mut opts = options(true, false, false);
        opts.marginalization.time_reference = TimeReference::Detector("H1".into());
        let like = engine(det.clone(), gen.clone(), PriorSet::new(), opts).unwrap();
        assert!(!like.marginalization().time);
        assert_eq!(like.meta_data().time_reference, TimeReference::Detector("H1".into()));

        let geocentric = engine(det, gen, PriorSet::new(), options(false, false, false)).unwrap();
        let mut params = injection();
        params.geocent_time = 0.0;
        params.set("H1_time", 102.0);
        assert_relative_eq!(
            like.log_likelihood_ratio(&params),
            geocentric.log_likelihood_ratio(&injection()),
            max_relative = 1e-12
        );
    }

    #[test]
    // Purpose
    // -------
    // Distance marginalization with a narrow prior around the injected
    // distance reproduces the plain likelihood.
    //
    // Given
    // -----
    // - A power-law prior on [0.999, 1.001]; the data match D = 1.
    //
    // Expect
    // ------
    // - |ratio_distance − ratio_plain| small relative to the ratio.
    fn narrow_distance_prior_matches_plain_likelihood() {
        let gen = generator(0.3);
        let det = matched_detector(&gen);
        let mut priors = PriorSet::new();
        priors.insert(LUMINOSITY_DISTANCE, Arc::new(PowerLawPrior::new(LUMINOSITY_DISTANCE, 2.0, 0.999, 1.001).unwrap()));
        let marginal = engine(det.clone(), gen.clone(), priors, options(false, true, false)).unwrap();
        let plain = engine(det, gen, PriorSet::new(), options(false, false, false)).unwrap();
        let expected = plain.log_likelihood_ratio(&injection());
        let params = SourceParameters {
            luminosity_distance: marginal.distance_table().unwrap().reference_distance(),
            ..injection()
        };
        assert_relative_eq!(marginal.log_likelihood_ratio(&params), expected, max_relative = 1e-2);
    }

    #[test]
    // Purpose
    // -------
    // Time reconstruction concentrates at the injected time.
    //
    // Given
    // -----
    // - Matched data injected at t = 102 s; time marginalization with the
    //   default prior; the sampler point sits at the segment start.
    //
    // Expect
    // ------
    // - Every draw lies within 0.05 s of 102 s; the phase draw is in
    //   [0, 2π) when phase is marginalized as well.
    fn time_reconstruction_finds_injection() {
        let gen = generator(1.0);
        let det = matched_detector(&gen);
        let like = engine(det, gen, PriorSet::new(), options(true, false, true)).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let params = SourceParameters { geocent_time: START, ..injection() };
        for _ in 0..5 {
            let sample = like.generate_posterior_sample(&params, &mut rng).unwrap();
            assert!((sample.geocent_time - 102.0).abs() < 0.05, "t = {}", sample.geocent_time);
            assert!((0.0..2.0 * PI).contains(&sample.phase));
        }
    }

    #[test]
    // Purpose
    // -------
    // Time jitter shifts the evaluated time without touching the caller's
    // parameters.
    //
    // Given
    // -----
    // - Time marginalization with jitter on; a point carrying a jitter of
    //   0.3 Δtc.
    // - The same engine with jitter off, evaluated at the shifted time.
    //
    // Expect
    // ------
    // - The caller's parameters are unchanged after evaluation and after
    //   reconstruction.
    // - The jittered ratio equals the unjittered ratio at the shifted time.
    fn jitter_shifts_a_local_copy() {
        let gen = generator(1.0);
        let det = matched_detector(&gen);
        let mut opts = options(true, false, false);
        opts.marginalization.jitter_time = true;
        let jittered = engine(det.clone(), gen.clone(), PriorSet::new(), opts).unwrap();
        let plain = engine(det, gen, PriorSet::new(), options(true, false, false)).unwrap();

        let jitter = 0.3 * jittered.time_grid().unwrap().delta_tc();
        let params = SourceParameters { geocent_time: START + 1.1, time_jitter: jitter, ..injection() };
        let before = params.clone();

        let value = jittered.log_likelihood_ratio(&params);
        assert_eq!(params, before);
        let mut rng = StdRng::seed_from_u64(17);
        jittered.generate_posterior_sample(&params, &mut rng).unwrap();
        assert_eq!(params, before);

        let shifted = SourceParameters { geocent_time: params.geocent_time + jitter, time_jitter: 0.0, ..params.clone() };
        assert_relative_eq!(value, plain.log_likelihood_ratio(&shifted), max_relative = 1e-12);
    }
}
