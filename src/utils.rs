#[cfg(feature = "python-bindings")]
use ndarray::Array1;

#[cfg(feature = "python-bindings")]
use num_complex::Complex64;

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use numpy::{
    IntoPyArray,    // Vec → PyArray
    PyArrayMethods, // .readonly()
    PyReadonlyArray1,
};

#[cfg(feature = "python-bindings")]
use crate::likelihood::{
    core::{options::DistanceMarginalizationOptions, priors::PowerLawPrior},
    marginalization::distance::DistanceLookupTable,
};

/// Borrow a 1-D `float64` array from NumPy, or copy any float sequence.
#[cfg(feature = "python-bindings")]
#[inline]
pub fn extract_f64_array<'py>(
    py: Python<'py>, raw_data: &Bound<'py, PyAny>,
) -> PyResult<PyReadonlyArray1<'py, f64>> {
    if let Ok(arr_ro) = raw_data.extract::<PyReadonlyArray1<f64>>() {
        if arr_ro.as_slice().is_ok() {
            return Ok(arr_ro);
        }
    }

    let vec: Vec<f64> = raw_data.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err("expected a 1-D numpy.ndarray or sequence of float64")
    })?;
    Ok(vec.into_pyarray(py).readonly())
}

/// Owned copy of a 1-D `complex128` array or sequence of Python complex
/// numbers.
#[cfg(feature = "python-bindings")]
pub fn extract_complex_array<'py>(raw_data: &Bound<'py, PyAny>) -> PyResult<Array1<Complex64>> {
    if let Ok(arr_ro) = raw_data.extract::<PyReadonlyArray1<Complex64>>() {
        return Ok(arr_ro.as_array().to_owned());
    }
    let vec: Vec<Complex64> = raw_data.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err("expected a 1-D numpy.ndarray or sequence of complex128")
    })?;
    Ok(Array1::from(vec))
}

/// Owned copy of a 1-D float array; fails on non-contiguous input.
#[cfg(feature = "python-bindings")]
pub fn extract_f64_vec<'py>(py: Python<'py>, raw_data: &Bound<'py, PyAny>, name: &str) -> PyResult<Array1<f64>> {
    let arr = extract_f64_array(py, raw_data)?;
    let slice = arr
        .as_slice()
        .map_err(|_| PyValueError::new_err(format!("{name} must be a 1-D contiguous float64 array or sequence")))?;
    Ok(Array1::from(slice.to_vec()))
}

/// Distance lookup table for a power-law distance prior on
/// `[minimum, maximum]`.
#[cfg(feature = "python-bindings")]
pub fn build_distance_table(
    minimum: f64, maximum: f64, alpha: Option<f64>, phase_marginalization: Option<bool>,
    distance_grid_size: Option<usize>, table_shape: Option<(usize, usize)>, cache_directory: Option<&str>,
) -> PyResult<DistanceLookupTable> {
    let prior = PowerLawPrior::new("luminosity_distance", alpha.unwrap_or(2.0), minimum, maximum)?;

    let defaults = DistanceMarginalizationOptions::default();
    let (rows, cols) =
        table_shape.unwrap_or((defaults.optimal_snr_squared_points, defaults.d_inner_h_points));
    let options = DistanceMarginalizationOptions {
        distance_grid_size: distance_grid_size.unwrap_or(defaults.distance_grid_size),
        optimal_snr_squared_points: rows,
        d_inner_h_points: cols,
        cache_directory: cache_directory.map(Into::into),
        lookup_table: None,
    };

    Ok(DistanceLookupTable::setup(&prior, phase_marginalization.unwrap_or(false), &options)?)
}
