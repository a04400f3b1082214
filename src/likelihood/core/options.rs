//! Likelihood configuration — marginalization flags, setup grids, cache
//! locations and acceleration settings.
//!
//! Purpose
//! -------
//! Collect every construction-time knob of the likelihood stack in small,
//! validated, serializable option structs. A driver can build them in code
//! through the `new` constructors or load them from JSON; either way the
//! engine re-validates them once at construction.
//!
//! Key behaviors
//! -------------
//! - [`MarginalizationOptions`] holds the four marginalization flags, the
//!   time-jitter switch and the [`TimeReference`].
//! - [`DistanceMarginalizationOptions`] sizes the distance grid and lookup
//!   table and says where the table is cached.
//! - [`CalibrationOptions`] sizes and locates the calibration draw sets.
//! - [`ReconstructionOptions`] sizes the posterior reconstruction grids.
//! - [`RoqOptions`] and [`MultibandOptions`] configure the acceleration
//!   kernels.
//! - [`LikelihoodOptions`] bundles the options the engine itself consumes.
//!
//! Invariants & assumptions
//! ------------------------
//! - Grid sizes are ≥ 2 (distance grid, table axes, phase grid).
//! - The distance table's matched-filter axis has an even number of points
//!   when phase marginalization is off (it is split into negative and
//!   positive halves); odd sizes are rounded by giving the positive half the
//!   extra point.
//! - Reconstruction sampling frequency is finite and > 0.
//!
//! Conventions
//! -----------
//! - Defaults mirror common production settings: 10 000 distance points,
//!   a 400 × 800 table, 1000 calibration draws, a 16 384 Hz time
//!   reconstruction grid and 101 phase points.
//! - All structs derive `Serialize`/`Deserialize`; missing fields fall back
//!   to their defaults when loading JSON.
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    likelihood::errors::{LikelihoodError, LikelihoodResult},
    persistence::CacheFormat,
};

/// Where the sampled coalescence time is measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeReference {
    #[default]
    Geocenter,
    /// Arrival time at the named detector (`<name>_time` in the parameters).
    Detector(String),
}

impl TimeReference {
    /// Name of the sampled time parameter (`geocent_time` or `<det>_time`).
    pub fn parameter_name(&self) -> String {
        match self {
            TimeReference::Geocenter => "geocent_time".to_string(),
            TimeReference::Detector(name) => format!("{name}_time"),
        }
    }
}

/// Which nuisance parameters are integrated out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MarginalizationOptions {
    pub time: bool,
    pub distance: bool,
    pub phase: bool,
    pub calibration: bool,
    pub jitter_time: bool,
    pub time_reference: TimeReference,
}

impl MarginalizationOptions {
    pub fn new(
        time: bool, distance: bool, phase: bool, calibration: bool, jitter_time: bool,
        time_reference: TimeReference,
    ) -> Self {
        MarginalizationOptions { time, distance, phase, calibration, jitter_time, time_reference }
    }

    /// Human-readable list of the active flags.
    pub fn describe(&self) -> String {
        let names: Vec<&str> = [
            (self.time, "time"),
            (self.distance, "distance"),
            (self.phase, "phase"),
            (self.calibration, "calibration"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() { "none".to_string() } else { names.join("+") }
    }
}

/// Distance grid, lookup-table shape and cache location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceMarginalizationOptions {
    /// Points in the luminosity-distance integration grid.
    pub distance_grid_size: usize,
    /// Rows (optimal SNR² axis) of the lookup table.
    pub optimal_snr_squared_points: usize,
    /// Columns (matched-filter axis) of the lookup table.
    pub d_inner_h_points: usize,
    /// Directory for hash-keyed cache files.
    pub cache_directory: Option<PathBuf>,
    /// Explicit cache file; takes precedence over `cache_directory`.
    pub lookup_table: Option<PathBuf>,
}

impl Default for DistanceMarginalizationOptions {
    fn default() -> Self {
        DistanceMarginalizationOptions {
            distance_grid_size: 10_000,
            optimal_snr_squared_points: 400,
            d_inner_h_points: 800,
            cache_directory: None,
            lookup_table: None,
        }
    }
}

impl DistanceMarginalizationOptions {
    pub fn new(
        distance_grid_size: usize, optimal_snr_squared_points: usize, d_inner_h_points: usize,
        cache_directory: Option<PathBuf>, lookup_table: Option<PathBuf>,
    ) -> LikelihoodResult<Self> {
        let opts = DistanceMarginalizationOptions {
            distance_grid_size,
            optimal_snr_squared_points,
            d_inner_h_points,
            cache_directory,
            lookup_table,
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> LikelihoodResult<()> {
        for (name, value, minimum) in [
            ("distance_grid_size", self.distance_grid_size, 2),
            ("optimal_snr_squared_points", self.optimal_snr_squared_points, 4),
            ("d_inner_h_points", self.d_inner_h_points, 8),
        ] {
            if value < minimum {
                return Err(LikelihoodError::InvalidOption {
                    name,
                    value: value as f64,
                    reason: "Grid too small for cubic interpolation.",
                });
            }
        }
        Ok(())
    }
}

/// Calibration draw set size, location and generation seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    pub number_of_response_curves: usize,
    pub starting_index: usize,
    /// Per-detector cache files; detectors not listed use
    /// `<directory>/<name>_calibration_file.<ext>`.
    pub lookup_files: BTreeMap<String, PathBuf>,
    pub directory: Option<PathBuf>,
    /// Format used for default file names.
    pub format: CacheFormat,
    /// Seed for generating draws when no file exists.
    pub seed: u64,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        CalibrationOptions {
            number_of_response_curves: 1000,
            starting_index: 0,
            lookup_files: BTreeMap::new(),
            directory: None,
            format: CacheFormat::Npz,
            seed: 0,
        }
    }
}

impl CalibrationOptions {
    pub fn validate(&self) -> LikelihoodResult<()> {
        if self.number_of_response_curves == 0 {
            return Err(LikelihoodError::InvalidOption {
                name: "number_of_response_curves",
                value: 0.0,
                reason: "At least one response curve is required.",
            });
        }
        Ok(())
    }

    /// Cache file for `detector`.
    pub fn file_for(&self, detector: &str) -> PathBuf {
        if let Some(path) = self.lookup_files.get(detector) {
            return path.clone();
        }
        let file = format!("{detector}_calibration_file.{}", self.format.extension());
        match &self.directory {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }
}

/// Grids used when drawing marginalized parameters after sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionOptions {
    /// Sampling rate of the upsampled time-reconstruction grid (Hz).
    pub sampling_frequency: f64,
    /// Points in the phase grid over `[0, 2π]`.
    pub phase_grid_points: usize,
}

impl Default for ReconstructionOptions {
    fn default() -> Self {
        ReconstructionOptions { sampling_frequency: 16_384.0, phase_grid_points: 101 }
    }
}

impl ReconstructionOptions {
    pub fn validate(&self) -> LikelihoodResult<()> {
        if !(self.sampling_frequency > 0.0) || !self.sampling_frequency.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "reconstruction sampling_frequency",
                value: self.sampling_frequency,
                reason: "Must be finite and > 0.",
            });
        }
        if self.phase_grid_points < 2 {
            return Err(LikelihoodError::InvalidOption {
                name: "phase_grid_points",
                value: self.phase_grid_points as f64,
                reason: "At least two phase points are required.",
            });
        }
        Ok(())
    }
}

/// Options consumed by the likelihood engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LikelihoodOptions {
    pub marginalization: MarginalizationOptions,
    pub distance: DistanceMarginalizationOptions,
    pub calibration: CalibrationOptions,
    pub reconstruction: ReconstructionOptions,
}

impl LikelihoodOptions {
    pub fn validate(&self) -> LikelihoodResult<()> {
        self.distance.validate()?;
        self.calibration.validate()?;
        self.reconstruction.validate()
    }
}

/// Validity range of an ROQ basis, before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoqValidity {
    pub flow: f64,
    pub fhigh: f64,
    pub seglen: f64,
    pub chirp_mass_min: f64,
    pub chirp_mass_max: f64,
    pub component_mass_min: f64,
}

impl RoqValidity {
    /// Apply a basis scale factor: frequencies scale up, the segment length
    /// and the mass bounds scale down.
    pub fn scaled(&self, factor: f64) -> RoqValidity {
        RoqValidity {
            flow: self.flow * factor,
            fhigh: self.fhigh * factor,
            seglen: self.seglen / factor,
            chirp_mass_min: self.chirp_mass_min / factor,
            chirp_mass_max: self.chirp_mass_max / factor,
            component_mass_min: self.component_mass_min / factor,
        }
    }
}

/// ROQ kernel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoqOptions {
    pub validity: Option<RoqValidity>,
    pub roq_scale_factor: f64,
    pub check_params: bool,
    /// Assumed optimal SNR per detector when sizing the time grid.
    pub assumed_snr: BTreeMap<String, f64>,
}

impl Default for RoqOptions {
    fn default() -> Self {
        RoqOptions {
            validity: None,
            roq_scale_factor: 1.0,
            check_params: true,
            assumed_snr: BTreeMap::new(),
        }
    }
}

impl RoqOptions {
    pub fn validate(&self) -> LikelihoodResult<()> {
        if !(self.roq_scale_factor > 0.0) || !self.roq_scale_factor.is_finite() {
            return Err(LikelihoodError::InvalidOption {
                name: "roq_scale_factor",
                value: self.roq_scale_factor,
                reason: "Must be finite and > 0.",
            });
        }
        Ok(())
    }
}

/// Multi-band kernel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultibandOptions {
    /// Chirp mass (solar masses) used to lay out the bands.
    pub reference_chirp_mass: f64,
    /// Highest azimuthal mode number of the waveform model.
    pub highest_mode: u32,
    /// Use the linear-interpolation quadratic coefficients instead of the
    /// IFFT-FFT algorithm.
    pub linear_interpolation: bool,
    pub accuracy_factor: f64,
    pub time_offset: Option<f64>,
    pub delta_f_end: Option<f64>,
    pub maximum_banding_frequency: Option<f64>,
    pub minimum_banding_duration: f64,
}

impl Default for MultibandOptions {
    fn default() -> Self {
        MultibandOptions {
            reference_chirp_mass: 1.0,
            highest_mode: 2,
            linear_interpolation: true,
            accuracy_factor: 5.0,
            time_offset: None,
            delta_f_end: None,
            maximum_banding_frequency: None,
            minimum_banding_duration: 0.0,
        }
    }
}

impl MultibandOptions {
    pub fn new(reference_chirp_mass: f64) -> LikelihoodResult<Self> {
        let opts = MultibandOptions { reference_chirp_mass, ..Default::default() };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> LikelihoodResult<()> {
        let positive = |name: &'static str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(LikelihoodError::InvalidOption { name, value, reason: "Must be finite and > 0." })
            }
        };
        positive("reference_chirp_mass", self.reference_chirp_mass)?;
        positive("accuracy_factor", self.accuracy_factor)?;
        positive("highest_mode", self.highest_mode as f64)?;
        if let Some(v) = self.time_offset {
            positive("time_offset", v)?;
        }
        if let Some(v) = self.delta_f_end {
            positive("delta_f_end", v)?;
        }
        if let Some(v) = self.maximum_banding_frequency {
            positive("maximum_banding_frequency", v)?;
        }
        if !(self.minimum_banding_duration >= 0.0) {
            return Err(LikelihoodError::InvalidOption {
                name: "minimum_banding_duration",
                value: self.minimum_banding_duration,
                reason: "Must be >= 0.",
            });
        }
        Ok(())
    }
}
