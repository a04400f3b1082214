//! Matched-filter statistics for one detector and one signal realization.
//!
//! Purpose
//! -------
//! Hold the per-evaluation record produced by an SNR kernel and provide the
//! scalar noise-weighted inner products every kernel is built from.
//!
//! Key behaviors
//! -------------
//! - [`inner_products`] returns `d·h = 4/T Σ_mask conj(d)·h / S` and
//!   `h·h = 4/T Σ_mask |h|² / S` in one pass.
//! - [`noise_inner_product`] returns `4/T Σ_mask |d|² / S`.
//! - [`CalculatedSnrs`] carries the scalars, the complex matched-filter SNR
//!   and an optional [`SnrGrid`] indexed over time samples and/or
//!   calibration draws. Records from several detectors are summed with
//!   [`CalculatedSnrs::accumulate`].
//!
//! Invariants & assumptions
//! ------------------------
//! - `complex_matched_filter_snr = d·h / √(h·h)` follows IEEE semantics: a
//!   zero optimal SNR yields `NaN`/`inf`, never a panic.
//! - Grids summed across detectors must share layout and shape;
//!   [`CalculatedSnrs::accumulate`] rejects anything else with
//!   `SnrGridMismatch`. An empty record adopts the first grid it sees.
use ndarray::{Array1, Array2, ArrayView1, Zip};
use num_complex::Complex64;

use crate::likelihood::errors::{LikelihoodError, LikelihoodResult};

/// Per-grid inner products for marginalized evaluations.
#[derive(Debug, Clone, PartialEq)]
pub enum SnrGrid {
    None,
    /// `d·h(t)` for every time sample; `h·h` is time-independent.
    Time { d_inner_h: Array1<Complex64> },
    /// Inner products per calibration draw.
    Calibration { d_inner_h: Array1<Complex64>, optimal_snr_squared: Array1<f64> },
    /// `d·h` per (draw, time) and `h·h` per draw.
    TimeCalibration { d_inner_h: Array2<Complex64>, optimal_snr_squared: Array1<f64> },
}

impl SnrGrid {
    /// Layout and shape, for error messages.
    pub fn layout(&self) -> String {
        match self {
            SnrGrid::None => "no grid".to_string(),
            SnrGrid::Time { d_inner_h } => format!("time grid {:?}", d_inner_h.shape()),
            SnrGrid::Calibration { d_inner_h, .. } => format!("calibration grid {:?}", d_inner_h.shape()),
            SnrGrid::TimeCalibration { d_inner_h, .. } => {
                format!("time-calibration grid {:?}", d_inner_h.shape())
            }
        }
    }
}

/// Matched-filter record for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedSnrs {
    pub d_inner_h: Complex64,
    pub optimal_snr_squared: f64,
    pub complex_matched_filter_snr: Complex64,
    pub grid: SnrGrid,
}

impl CalculatedSnrs {
    pub fn new(d_inner_h: Complex64, optimal_snr_squared: f64, grid: SnrGrid) -> Self {
        CalculatedSnrs {
            d_inner_h,
            optimal_snr_squared,
            complex_matched_filter_snr: d_inner_h / optimal_snr_squared.sqrt(),
            grid,
        }
    }

    /// Record with every statistic zero and no grid.
    pub fn zero() -> Self {
        CalculatedSnrs {
            d_inner_h: Complex64::new(0.0, 0.0),
            optimal_snr_squared: 0.0,
            complex_matched_filter_snr: Complex64::new(0.0, 0.0),
            grid: SnrGrid::None,
        }
    }

    /// Add another detector's record into `self`.
    ///
    /// Errors
    /// ------
    /// - `SnrGridMismatch` when both records carry grids of different
    ///   layout or shape, or when `other` drops a grid `self` already holds.
    ///   `self` is left unchanged in that case.
    pub fn accumulate(&mut self, other: CalculatedSnrs) -> LikelihoodResult<()> {
        let mismatch = |a: &SnrGrid, b: &SnrGrid| LikelihoodError::SnrGridMismatch {
            expected: a.layout(),
            actual: b.layout(),
        };
        match (&mut self.grid, &other.grid) {
            (SnrGrid::None, _) => {}
            (SnrGrid::Time { d_inner_h: a }, SnrGrid::Time { d_inner_h: b }) if a.shape() == b.shape() => {
                *a += b;
            }
            (
                SnrGrid::Calibration { d_inner_h: a, optimal_snr_squared: ha },
                SnrGrid::Calibration { d_inner_h: b, optimal_snr_squared: hb },
            ) if a.shape() == b.shape() && ha.len() == hb.len() => {
                *a += b;
                *ha += hb;
            }
            (
                SnrGrid::TimeCalibration { d_inner_h: a, optimal_snr_squared: ha },
                SnrGrid::TimeCalibration { d_inner_h: b, optimal_snr_squared: hb },
            ) if a.shape() == b.shape() && ha.len() == hb.len() => {
                *a += b;
                *ha += hb;
            }
            (mine, theirs) => return Err(mismatch(&*mine, theirs)),
        }
        if matches!(self.grid, SnrGrid::None) {
            self.grid = other.grid;
        }
        self.d_inner_h += other.d_inner_h;
        self.optimal_snr_squared += other.optimal_snr_squared;
        self.complex_matched_filter_snr += other.complex_matched_filter_snr;
        Ok(())
    }
}

/// `(d·h, h·h)` over the masked band.
pub fn inner_products(
    strain: ArrayView1<Complex64>, signal: ArrayView1<Complex64>, psd: ArrayView1<f64>,
    mask: ArrayView1<bool>, duration: f64,
) -> (Complex64, f64) {
    let mut d_inner_h = Complex64::new(0.0, 0.0);
    let mut h_inner_h = 0.0;
    Zip::from(&strain).and(&signal).and(&psd).and(&mask).for_each(|&d, &h, &s, &m| {
        if m {
            d_inner_h += d.conj() * h / s;
            h_inner_h += h.norm_sqr() / s;
        }
    });
    let norm = 4.0 / duration;
    (d_inner_h * norm, h_inner_h * norm)
}

/// `4/T Σ_mask |d|² / S`.
pub fn noise_inner_product(
    strain: ArrayView1<Complex64>, psd: ArrayView1<f64>, mask: ArrayView1<bool>, duration: f64,
) -> f64 {
    let mut acc = 0.0;
    Zip::from(&strain).and(&psd).and(&mask).for_each(|&d, &s, &m| {
        if m {
            acc += d.norm_sqr() / s;
        }
    });
    4.0 / duration * acc
}
