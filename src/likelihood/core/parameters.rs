//! Source parameters passed by value through a likelihood evaluation.
//!
//! Purpose
//! -------
//! Represent one candidate point of the sampler as an explicit struct instead
//! of a mutable string-keyed dictionary. Extrinsic parameters used by the
//! detector projection and the marginalizations get named fields; everything
//! else (masses, spins, calibration nodes, detector-frame times) lives in
//! [`SourceParameters::extra`] and is forwarded untouched to the waveform
//! generator and calibration models.
//!
//! Key behaviors
//! -------------
//! - Temporary shifts (time jitter, detector-frame time conversion) are
//!   applied to a by-value copy via [`SourceParameters::with_geocent_time`];
//!   the caller's struct is never mutated, so there is nothing to restore.
//! - [`SourceParameters::get`] / [`SourceParameters::set`] give name-based
//!   access to both named fields and extras, used by prior handling and
//!   posterior reconstruction.
//!
//! Conventions
//! -----------
//! - Times are GPS seconds, distances are Mpc, angles are radians.
//! - `recalib_index` selects a stored calibration draw when calibration is
//!   marginalized; `None` means "use the detector's own calibration model".
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const RA: &str = "ra";
pub const DEC: &str = "dec";
pub const PSI: &str = "psi";
pub const GEOCENT_TIME: &str = "geocent_time";
pub const LUMINOSITY_DISTANCE: &str = "luminosity_distance";
pub const PHASE: &str = "phase";
pub const TIME_JITTER: &str = "time_jitter";

/// One candidate parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceParameters {
    /// Right ascension (rad).
    pub ra: f64,
    /// Declination (rad).
    pub dec: f64,
    /// Polarization angle (rad).
    pub psi: f64,
    /// Coalescence time at the geocenter (GPS s).
    pub geocent_time: f64,
    /// Luminosity distance (Mpc).
    pub luminosity_distance: f64,
    /// Orbital reference phase (rad).
    pub phase: f64,
    /// Sub-bin offset applied to the time-marginalization grid.
    #[serde(default)]
    pub time_jitter: f64,
    /// Index of the stored calibration draw to apply, if any.
    #[serde(default)]
    pub recalib_index: Option<usize>,
    /// Every other parameter, keyed by name.
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

impl Default for SourceParameters {
    fn default() -> Self {
        SourceParameters {
            ra: 0.0,
            dec: 0.0,
            psi: 0.0,
            geocent_time: 0.0,
            luminosity_distance: 1.0,
            phase: 0.0,
            time_jitter: 0.0,
            recalib_index: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SourceParameters {
    /// Copy of `self` with a different geocenter time.
    pub fn with_geocent_time(&self, geocent_time: f64) -> Self {
        SourceParameters { geocent_time, ..self.clone() }
    }

    /// Look up a parameter by name, covering both named fields and extras.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            RA => Some(self.ra),
            DEC => Some(self.dec),
            PSI => Some(self.psi),
            GEOCENT_TIME => Some(self.geocent_time),
            LUMINOSITY_DISTANCE => Some(self.luminosity_distance),
            PHASE => Some(self.phase),
            TIME_JITTER => Some(self.time_jitter),
            other => self.extra.get(other).copied(),
        }
    }

    /// Set a parameter by name; unknown names go to `extra`.
    pub fn set(&mut self, name: &str, value: f64) {
        match name {
            RA => self.ra = value,
            DEC => self.dec = value,
            PSI => self.psi = value,
            GEOCENT_TIME => self.geocent_time = value,
            LUMINOSITY_DISTANCE => self.luminosity_distance = value,
            PHASE => self.phase = value,
            TIME_JITTER => self.time_jitter = value,
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }

    /// Extras whose names start with `prefix`, with the prefix stripped.
    pub fn extras_with_prefix(&self, prefix: &str) -> BTreeMap<String, f64> {
        self.extra
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|rest| (rest.to_string(), *v)))
            .collect()
    }
}
