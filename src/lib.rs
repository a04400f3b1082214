//! gw_likelihood — marginalized gravitational-wave transient likelihoods with
//! Python bindings.
//!
//! Purpose
//! -------
//! Serve as the crate root for Rust callers and as the PyO3 bridge that exposes
//! the numerical kernels of the likelihood stack to Python via the
//! `_gw_likelihood` extension module. When the `python-bindings` feature is
//! enabled, this module defines the Python-facing classes and functions used
//! by the `gw_likelihood` package.
//!
//! Key behaviors
//! -------------
//! - Re-export the core Rust modules (`likelihood`, `numerics`,
//!   `persistence`) as the public crate surface.
//! - Define `#[pyclass]` wrappers and the `#[pymodule]` initializer for the
//!   `_gw_likelihood` Python extension.
//!
//! Invariants & assumptions
//! ------------------------
//! - All heavy numerical work is implemented in the inner Rust modules; this
//!   file performs only FFI glue, input validation, and error mapping.
//! - On successful conversion from Python objects to Rust types, the
//!   invariants documented in the core modules are assumed to hold.
//!
//! Conventions
//! -----------
//! - Errors from core Rust code are propagated as [`LikelihoodError`]
//!   internally and converted to `ValueError` at the PyO3 boundary.
//! - Units follow the likelihood stack: Hz, GPS seconds, Mpc, radians.
//!
//! Downstream usage
//! ----------------
//! - Native Rust code should depend directly on [`likelihood`] (or its
//!   prelude) and can ignore the PyO3 items guarded by `python-bindings`.
//! - The full engine is generic over the waveform generator and kernel, so
//!   it is driven from Rust; Python gets the self-contained pieces (the
//!   distance lookup table, `ln_i0`, ROQ time interpolation).
//!
//! Testing notes
//! -------------
//! - Core numerical behavior is covered by unit tests in the inner modules and
//!   by the integration tests under `tests/`.

pub mod likelihood;
pub mod numerics;
pub mod persistence;
pub mod utils;

pub use crate::likelihood::{LikelihoodError, LikelihoodResult};

#[cfg(feature = "python-bindings")]
use numpy::{IntoPyArray, PyArray1};

#[cfg(feature = "python-bindings")]
use num_complex::Complex64;

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use crate::{
    likelihood::{marginalization::distance::DistanceLookupTable, models::roq},
    utils::{build_distance_table, extract_complex_array, extract_f64_vec},
};

/// DistanceMarginalization — Python-facing wrapper for the distance lookup
/// table.
///
/// Purpose
/// -------
/// Build (or load from cache) the distance-marginalized likelihood table for
/// a power-law distance prior and evaluate it from Python.
///
/// Parameters
/// ----------
/// Constructed from Python via
/// `DistanceMarginalization(minimum, maximum, alpha=2.0,
/// phase_marginalization=False, distance_grid_size=None, table_shape=None,
/// cache_directory=None)`.
///
/// Notes
/// -----
/// - Rust callers should use [`DistanceLookupTable`] directly.
#[cfg(feature = "python-bindings")]
#[pyclass(module = "gw_likelihood.marginalization")]
pub struct DistanceMarginalization {
    pub inner: DistanceLookupTable,
}

#[cfg(feature = "python-bindings")]
#[pymethods]
impl DistanceMarginalization {
    #[new]
    #[pyo3(
        signature = (
            minimum,
            maximum,
            alpha = None,
            phase_marginalization = None,
            distance_grid_size = None,
            table_shape = None,
            cache_directory = None,
        ),
        text_signature = "(minimum, maximum, /, alpha=None, phase_marginalization=None, \
                          distance_grid_size=None, table_shape=None, cache_directory=None)"
    )]
    pub fn new(
        minimum: f64, maximum: f64, alpha: Option<f64>, phase_marginalization: Option<bool>,
        distance_grid_size: Option<usize>, table_shape: Option<(usize, usize)>,
        cache_directory: Option<&str>,
    ) -> PyResult<Self> {
        let inner = build_distance_table(
            minimum,
            maximum,
            alpha,
            phase_marginalization,
            distance_grid_size,
            table_shape,
            cache_directory,
        )?;
        Ok(DistanceMarginalization { inner })
    }

    /// Distance-marginalized log-likelihood ratio for `(d·h, h·h)` computed
    /// at `distance`.
    pub fn marginalized_likelihood(&self, d_inner_h: Complex64, h_inner_h: f64, distance: f64) -> f64 {
        self.inner.marginalized_likelihood(d_inner_h, h_inner_h, distance)
    }

    /// Log-likelihood on the distance grid, for posterior reconstruction.
    pub fn conditional_log_likelihood<'py>(
        &self, py: Python<'py>, d_inner_h: Complex64, h_inner_h: f64, distance: f64,
    ) -> Bound<'py, PyArray1<f64>> {
        self.inner.conditional_log_likelihood(d_inner_h, h_inner_h, distance).into_pyarray(py)
    }

    pub fn save(&self, path: &str) -> PyResult<()> {
        Ok(self.inner.save(std::path::Path::new(path))?)
    }

    #[getter]
    pub fn reference_distance(&self) -> f64 {
        self.inner.reference_distance()
    }

    #[getter]
    pub fn phase_marginalization(&self) -> bool {
        self.inner.phase_marginalization()
    }

    #[getter]
    pub fn distance_array<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.distance_array().to_owned().into_pyarray(py)
    }

    #[getter]
    pub fn prior_array<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.prior_array().to_owned().into_pyarray(py)
    }
}

/// `ln I0(x)` without overflow for large arguments.
#[cfg(feature = "python-bindings")]
#[pyfunction]
fn ln_i0(x: f64) -> f64 {
    crate::numerics::ln_i0(x)
}

/// Five-point cubic interpolation of uniformly sampled complex `values`
/// at `time`.
#[cfg(feature = "python-bindings")]
#[pyfunction]
fn interpolate_five_samples<'py>(
    py: Python<'py>, times: &Bound<'py, PyAny>, values: &Bound<'py, PyAny>, time: f64,
) -> PyResult<Complex64> {
    let times = extract_f64_vec(py, times, "times")?;
    let values = extract_complex_array(values)?;
    if times.len() != values.len() {
        return Err(PyValueError::new_err(format!(
            "times and values must have the same length, got {} and {}",
            times.len(),
            values.len()
        )));
    }
    if times.len() < 5 {
        return Err(PyValueError::new_err("at least five samples are required"));
    }
    Ok(roq::interpolate_five_samples(times.view(), values.view(), time))
}

/// _gw_likelihood — PyO3 module initializer for the Python extension.
///
/// Registers the `marginalization` submodule and the free functions, and
/// inserts the submodule into `sys.modules` so dotted imports work.
#[cfg(feature = "python-bindings")]
#[pymodule]
fn _gw_likelihood<'py>(py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    let marginalization_mod = PyModule::new(py, "marginalization")?;
    marginalization_mod.add_class::<DistanceMarginalization>()?;
    marginalization_mod.add_function(wrap_pyfunction!(ln_i0, &marginalization_mod)?)?;
    m.add_submodule(&marginalization_mod)?;
    m.add_function(wrap_pyfunction!(interpolate_five_samples, m)?)?;

    // Manually add submodules into sys.modules to allow for dot notation.
    py.import("sys")?.getattr("modules")?.set_item("gw_likelihood.marginalization", marginalization_mod)?;
    Ok(())
}
