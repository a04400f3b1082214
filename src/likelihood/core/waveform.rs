//! Waveform generator interface and polarization containers.
//!
//! Purpose
//! -------
//! Describe the single external collaborator that turns a parameter set into
//! frequency-domain polarizations. The likelihood engine calls it exactly
//! once per evaluation; everything downstream (projection, inner products,
//! marginalizations) works on the returned arrays.
//!
//! Key behaviors
//! -------------
//! - [`WaveformGenerator`] is generic over its output type so each SNR
//!   kernel can ask for the representation it needs: full-grid
//!   [`Polarizations`] for the standard kernel and multi-banding, or
//!   [`RoqPolarizations`] (linear and quadratic node values) for ROQ.
//! - Returning `None` signals "no waveform for these parameters"; the engine
//!   maps it to a `-inf` log-likelihood ratio.
//! - Kernels that evaluate on reduced frequency sets publish them as
//!   [`FrequencyNodes`], which the engine hands to the generator once at
//!   construction.
//! - [`Rescale`] lets posterior reconstruction rescale a retained waveform
//!   after drawing a new distance.
//!
//! Conventions
//! -----------
//! - Mode names are free-form strings; detectors report an antenna response
//!   per mode name (`"plus"`, `"cross"`, ...).
//! - All arrays of one [`Polarizations`] share the same length.
use std::collections::BTreeMap;

use ndarray::Array1;
use num_complex::Complex64;

use crate::likelihood::core::parameters::SourceParameters;

/// Frequency-domain polarizations keyed by mode name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polarizations {
    modes: BTreeMap<String, Array1<Complex64>>,
}

impl Polarizations {
    pub fn new() -> Self {
        Polarizations { modes: BTreeMap::new() }
    }

    /// Convenience constructor for the common two-mode case.
    pub fn plus_cross(plus: Array1<Complex64>, cross: Array1<Complex64>) -> Self {
        let mut pols = Polarizations::new();
        pols.insert("plus", plus);
        pols.insert("cross", cross);
        pols
    }

    pub fn insert(&mut self, mode: &str, values: Array1<Complex64>) {
        self.modes.insert(mode.to_string(), values);
    }

    pub fn get(&self, mode: &str) -> Option<&Array1<Complex64>> {
        self.modes.get(mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array1<Complex64>)> {
        self.modes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Common array length, or 0 when empty.
    pub fn len(&self) -> usize {
        self.modes.values().next().map_or(0, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

/// ROQ waveform: polarizations at the linear and quadratic basis nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoqPolarizations {
    pub linear: Polarizations,
    pub quadratic: Polarizations,
}

/// Multiply every mode by a real factor.
pub trait Rescale {
    fn rescale(&mut self, factor: f64);
}

impl Rescale for Polarizations {
    fn rescale(&mut self, factor: f64) {
        for values in self.modes.values_mut() {
            values.mapv_inplace(|v| v * factor);
        }
    }
}

impl Rescale for RoqPolarizations {
    fn rescale(&mut self, factor: f64) {
        self.linear.rescale(factor);
        self.quadratic.rescale(factor);
    }
}

/// Reduced frequency sets a kernel evaluates the waveform on.
#[derive(Debug, Clone, PartialEq)]
pub enum FrequencyNodes {
    /// ROQ empirical-interpolation nodes.
    Roq { linear: Array1<f64>, quadratic: Array1<f64> },
    /// Deduplicated union of every band's frequency points.
    Multiband { frequencies: Array1<f64> },
}

/// Maps a parameter set to frequency-domain polarizations.
pub trait WaveformGenerator<W = Polarizations> {
    /// Evaluate the model; `None` means no waveform could be generated.
    fn frequency_domain_strain(&self, parameters: &SourceParameters) -> Option<W>;

    /// Receive the reduced frequency set of the kernel in use.
    fn set_frequency_nodes(&mut self, _nodes: &FrequencyNodes) {}
}
