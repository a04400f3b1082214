//! SNR kernels: the per-detector matched-filter step behind every
//! likelihood variant.
//!
//! Purpose
//! -------
//! Abstract how `d·h` and `h·h` are computed from a waveform so the engine
//! can run the full frequency-grid computation, the ROQ compressed sums or
//! the multi-band sums behind one interface.
//!
//! Key behaviors
//! -------------
//! - [`SnrKernel::prepare`] sees the detector set and the resolved
//!   marginalization strategy once at construction; kernels that cannot
//!   serve a strategy reject it there.
//! - [`SnrKernel::calculate_snrs`] returns one detector's
//!   [`CalculatedSnrs`] (or `None` outside the kernel's support), including the time and/or calibration grid the
//!   strategy asks for through [`SnrRequest`].
//! - [`StandardKernel`] evaluates on the full frequency grid, using one FFT
//!   per evaluation (and per calibration draw) for time marginalization.
//!
//! Invariants & assumptions
//! ------------------------
//! - Kernels are immutable after `prepare` and hold no per-call state, so a
//!   likelihood can be shared across threads.
//! - The time grid has `N = n_frequencies − 1` samples; the highest
//!   frequency bin is dropped from the FFT integrand.
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};
use num_complex::Complex64;

use crate::{
    likelihood::{
        core::{
            detector::{project_signal, Detector, ResponseCalibration},
            parameters::SourceParameters,
            snr::{inner_products, CalculatedSnrs, SnrGrid},
            waveform::{FrequencyNodes, Polarizations, Rescale},
        },
        errors::LikelihoodResult,
        marginalization::{
            calibration::CalibrationDraws,
            combination::MarginalizationStrategy,
            time::{matched_filter_integrand, time_shifted_inner_products},
        },
    },
    numerics::FftPlan,
};

/// Calibration treatment for one detector and one evaluation.
#[derive(Debug, Clone, Copy)]
pub enum CalibrationRequest<'a> {
    /// The detector's own calibration model at the current parameters.
    Model,
    /// Evaluate once per stored draw.
    Marginalize(&'a CalibrationDraws),
    /// Apply one stored draw.
    Fixed(&'a CalibrationDraws, usize),
}

/// What a kernel must produce for one detector.
#[derive(Debug, Clone, Copy)]
pub struct SnrRequest<'a> {
    pub time: bool,
    pub calibration: CalibrationRequest<'a>,
}

impl<'a> SnrRequest<'a> {
    pub fn scalar() -> Self {
        SnrRequest { time: false, calibration: CalibrationRequest::Model }
    }
}

/// Matched-filter computation for one detector.
pub trait SnrKernel: Send + Sync {
    /// Waveform representation the kernel consumes.
    type Waveform: Rescale + Clone + Send;

    /// Short kernel name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Precompute detector-dependent state and reject unsupported
    /// marginalizations.
    fn prepare(
        &mut self, _detectors: &[Arc<dyn Detector>], _strategy: &MarginalizationStrategy,
    ) -> LikelihoodResult<()> {
        Ok(())
    }

    /// Reduced frequency set the waveform generator should evaluate on.
    fn frequency_nodes(&self) -> Option<FrequencyNodes> {
        None
    }

    /// Matched-filter record of `detector` (at position `detector_index` of
    /// the prepared set).
    ///
    /// Returns `None` when the kernel cannot evaluate the detector at
    /// `parameters`: an arrival time outside a precomputed time window, or
    /// a detector the kernel holds no coefficients for.
    fn calculate_snrs(
        &self, waveform: &Self::Waveform, detector_index: usize, detector: &dyn Detector,
        parameters: &SourceParameters, request: &SnrRequest<'_>,
    ) -> Option<CalculatedSnrs>;

    /// Full-grid detector-frame signal, when the kernel can produce one.
    fn project(
        &self, _waveform: &Self::Waveform, _detector: &dyn Detector, _parameters: &SourceParameters,
        _calibration: ResponseCalibration<'_>,
    ) -> Option<Array1<Complex64>> {
        None
    }
}

/// Full frequency-grid kernel.
#[derive(Debug, Clone, Default)]
pub struct StandardKernel {
    time_plan: Option<FftPlan>,
}

impl StandardKernel {
    pub fn new() -> Self {
        StandardKernel::default()
    }

    fn time_plan(&self, n_frequencies: usize) -> FftPlan {
        match &self.time_plan {
            Some(plan) if plan.len() + 1 == n_frequencies => plan.clone(),
            _ => FftPlan::new(n_frequencies.saturating_sub(1)),
        }
    }
}

impl SnrKernel for StandardKernel {
    type Waveform = Polarizations;

    fn name(&self) -> &'static str {
        "standard"
    }

    fn prepare(
        &mut self, detectors: &[Arc<dyn Detector>], strategy: &MarginalizationStrategy,
    ) -> LikelihoodResult<()> {
        self.time_plan = match (strategy.needs_time_grid(), detectors.first()) {
            (true, Some(det)) => Some(FftPlan::new(det.frequency_array().len().saturating_sub(1))),
            _ => None,
        };
        Ok(())
    }

    fn calculate_snrs(
        &self, waveform: &Polarizations, _detector_index: usize, detector: &dyn Detector,
        parameters: &SourceParameters, request: &SnrRequest<'_>,
    ) -> Option<CalculatedSnrs> {
        let calibration = match request.calibration {
            CalibrationRequest::Model => ResponseCalibration::Model,
            _ => ResponseCalibration::Uncalibrated,
        };
        let mut signal = project_signal(detector, waveform, parameters, calibration);
        if let CalibrationRequest::Fixed(draws, index) = request.calibration {
            draws.apply(index, &mut signal);
        }

        let strain = detector.strain();
        let psd = detector.power_spectral_density();
        let mask = detector.frequency_mask();
        let duration = detector.duration();
        let (d_inner_h, optimal_snr_squared) =
            inner_products(strain, signal.view(), psd, mask, duration);
        let norm = 4.0 / duration;

        let grid = match (request.time, request.calibration) {
            (true, CalibrationRequest::Marginalize(draws)) => {
                let plan = self.time_plan(strain.len());
                let n_time = plan.len();
                let mut base = Vec::new();
                matched_filter_integrand(strain, signal.view(), psd, mask, n_time, &mut base);
                let mut d_grid = Array2::<Complex64>::zeros((draws.len(), n_time));
                let mut buffer = Vec::with_capacity(n_time);
                let mut scratch = Vec::new();
                for (c, mut row) in d_grid.outer_iter_mut().enumerate() {
                    buffer.clear();
                    buffer.extend_from_slice(&base);
                    for (&k, &response) in draws.mask_indices().iter().zip(draws.draws().row(c).iter()) {
                        if k < n_time {
                            buffer[k] *= response;
                        }
                    }
                    row.assign(&time_shifted_inner_products(&plan, &mut buffer, &mut scratch, duration));
                }
                SnrGrid::TimeCalibration {
                    d_inner_h: d_grid,
                    optimal_snr_squared: calibrated_optimal_snrs(draws, signal.view(), psd, norm),
                }
            }
            (true, _) => {
                let plan = self.time_plan(strain.len());
                let mut buffer = Vec::new();
                matched_filter_integrand(strain, signal.view(), psd, mask, plan.len(), &mut buffer);
                SnrGrid::Time {
                    d_inner_h: time_shifted_inner_products(&plan, &mut buffer, &mut Vec::new(), duration),
                }
            }
            (false, CalibrationRequest::Marginalize(draws)) => {
                let integrand: Array1<Complex64> = draws
                    .mask_indices()
                    .iter()
                    .map(|&k| strain[k].conj() * signal[k] / psd[k] * norm)
                    .collect();
                SnrGrid::Calibration {
                    d_inner_h: draws.draws().dot(&integrand),
                    optimal_snr_squared: calibrated_optimal_snrs(draws, signal.view(), psd, norm),
                }
            }
            (false, _) => SnrGrid::None,
        };

        Some(CalculatedSnrs::new(d_inner_h, optimal_snr_squared, grid))
    }

    fn project(
        &self, waveform: &Polarizations, detector: &dyn Detector, parameters: &SourceParameters,
        calibration: ResponseCalibration<'_>,
    ) -> Option<Array1<Complex64>> {
        Some(project_signal(detector, waveform, parameters, calibration))
    }
}

/// `h·h` per draw: `4/T Σ_mask |h|²·|C_c|² / S`.
fn calibrated_optimal_snrs(
    draws: &CalibrationDraws, signal: ArrayView1<Complex64>, psd: ArrayView1<f64>, norm: f64,
) -> Array1<f64> {
    let power: Array1<f64> =
        draws.mask_indices().iter().map(|&k| signal[k].norm_sqr() / psd[k] * norm).collect();
    draws.abs_squared().dot(&power)
}
