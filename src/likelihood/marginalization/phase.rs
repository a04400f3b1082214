//! Phase marginalization: closed-form integral over the orbital phase.
//!
//! For templates whose phase dependence is `h(φ) = h(0)·e^{-2iφ}`, the
//! likelihood averaged over a uniform phase prior is
//! `ln I0(|d·h|) − h·h / 2`. The same assumption gives the conditional
//! phase posterior used for reconstruction:
//! `ln p(φ) = Re(d·h · e^{-2iφ}) − h·h / 2`.
use std::f64::consts::PI;

use ndarray::{Array1, ArrayView1};
use num_complex::Complex64;

use crate::numerics::ln_i0;

/// `ln I0(|d·h|) − h·h / 2`.
pub fn phase_marginalized_likelihood(d_inner_h: Complex64, h_inner_h: f64) -> f64 {
    ln_i0(d_inner_h.norm()) - h_inner_h / 2.0
}

/// Evenly spaced phases on `[0, 2π]`, both ends included.
pub fn phase_grid(n_points: usize) -> Array1<f64> {
    Array1::linspace(0.0, 2.0 * PI, n_points)
}

/// Unnormalized log posterior of the phase on `phases`.
pub fn phase_log_posterior(
    d_inner_h: Complex64, h_inner_h: f64, phases: ArrayView1<f64>,
) -> Array1<f64> {
    phases.mapv(|phi| (d_inner_h * Complex64::from_polar(1.0, -2.0 * phi)).re - h_inner_h / 2.0)
}
