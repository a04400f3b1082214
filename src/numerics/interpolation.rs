//! Interpolation and tabulated sampling.
//!
//! Purpose
//! -------
//! Provide the small set of interpolants the likelihood stack needs:
//! one-dimensional linear interpolation with explicit fill values, a natural
//! cubic spline for calibration envelopes, a local-cubic interpolant on a
//! nonuniform rectilinear 2-D grid for the distance lookup table, and
//! inverse-CDF sampling from a tabulated density.
//!
//! Key behaviors
//! -------------
//! - [`interp_linear`] mirrors `numpy.interp` with caller-supplied
//!   out-of-range values.
//! - [`GridInterpolator2D`] evaluates a tensor-product 4-point Lagrange
//!   polynomial on the cell containing the query point and returns the fill
//!   value outside the grid.
//! - [`sample_tabulated`] integrates a non-negative density with the
//!   trapezoid rule and inverts the cumulative distribution linearly.
//!
//! Invariants & assumptions
//! ------------------------
//! - Abscissae are strictly increasing; construction validates this where a
//!   constructor exists and plain functions assume it.
//! - Densities passed to [`sample_tabulated`] are finite and non-negative.
//!
//! Testing notes
//! -------------
//! - Unit tests cover exact reproduction of low-order polynomials, fill
//!   behavior outside the grid, and sampling support.
use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, RngCore};

use crate::numerics::quadrature::cumulative_trapezoid;

/// `numpy.interp(x, xp, fp, left, right)`.
pub fn interp_linear(x: f64, xp: ArrayView1<f64>, fp: ArrayView1<f64>, left: f64, right: f64) -> f64 {
    let n = xp.len();
    if n == 0 || x.is_nan() {
        return f64::NAN;
    }
    if x < xp[0] {
        return left;
    }
    if x > xp[n - 1] {
        return right;
    }
    let upper = partition_point(xp, x).clamp(1, n - 1);
    let lower = upper - 1;
    let span = xp[upper] - xp[lower];
    if span == 0.0 {
        return fp[lower];
    }
    let t = (x - xp[lower]) / span;
    fp[lower] + t * (fp[upper] - fp[lower])
}

/// First index `i` with `xs[i] > x`.
fn partition_point(xs: ArrayView1<f64>, x: f64) -> usize {
    let (mut lo, mut hi) = (0usize, xs.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        if xs[mid] <= x {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Start of the 4-point stencil around the cell containing `x`.
fn stencil_start(xs: ArrayView1<f64>, x: f64) -> usize {
    let n = xs.len();
    let cell = partition_point(xs, x).saturating_sub(1).min(n.saturating_sub(2));
    cell.saturating_sub(1).min(n.saturating_sub(4))
}

fn lagrange_weights(xs: ArrayView1<f64>, start: usize, x: f64) -> [f64; 4] {
    let mut weights = [0.0; 4];
    let width = xs.len().min(4);
    for (j, weight) in weights.iter_mut().enumerate().take(width) {
        let xj = xs[start + j];
        let mut w = 1.0;
        for m in 0..width {
            if m != j {
                let xm = xs[start + m];
                w *= (x - xm) / (xj - xm);
            }
        }
        *weight = w;
    }
    weights
}

/// Local-cubic interpolant on a rectilinear grid.
///
/// `values[[i, j]]` is the function at `(rows[i], cols[j])`. Queries outside
/// `[rows₀, rowsₙ] × [cols₀, colsₘ]` return `fill`.
#[derive(Debug, Clone, PartialEq)]
pub struct GridInterpolator2D {
    rows: Array1<f64>,
    cols: Array1<f64>,
    values: Array2<f64>,
    fill: f64,
}

impl GridInterpolator2D {
    /// Returns `None` when the axes are not strictly increasing or do not
    /// match the table shape.
    pub fn new(rows: Array1<f64>, cols: Array1<f64>, values: Array2<f64>, fill: f64) -> Option<Self> {
        let increasing = |a: &Array1<f64>| a.len() >= 2 && a.windows(2).into_iter().all(|w| w[1] > w[0]);
        if !increasing(&rows) || !increasing(&cols) || values.dim() != (rows.len(), cols.len()) {
            return None;
        }
        Some(GridInterpolator2D { rows, cols, values, fill })
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn evaluate(&self, row: f64, col: f64) -> f64 {
        let (nr, nc) = self.values.dim();
        if !(row >= self.rows[0] && row <= self.rows[nr - 1])
            || !(col >= self.cols[0] && col <= self.cols[nc - 1])
        {
            return self.fill;
        }
        let r0 = stencil_start(self.rows.view(), row);
        let c0 = stencil_start(self.cols.view(), col);
        let wr = lagrange_weights(self.rows.view(), r0, row);
        let wc = lagrange_weights(self.cols.view(), c0, col);

        let mut acc = 0.0;
        for (i, &w_row) in wr.iter().enumerate().take(nr.min(4)) {
            if w_row == 0.0 {
                continue;
            }
            for (j, &w_col) in wc.iter().enumerate().take(nc.min(4)) {
                if w_col == 0.0 {
                    continue;
                }
                acc += w_row * w_col * self.values[[r0 + i, c0 + j]];
            }
        }
        acc
    }
}

/// Natural cubic spline through `(x, y)`; evaluation clamps to the node range.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalCubicSpline {
    x: Array1<f64>,
    y: Array1<f64>,
    second_derivatives: Array1<f64>,
}

impl NaturalCubicSpline {
    pub fn new(x: Array1<f64>, y: Array1<f64>) -> Option<Self> {
        let n = x.len();
        if n < 2 || y.len() != n || x.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return None;
        }
        let mut m = Array1::zeros(n);
        if n > 2 {
            // tridiagonal solve for the interior second derivatives
            let mut diag = vec![0.0; n];
            let mut rhs = vec![0.0; n];
            let mut upper = vec![0.0; n];
            for i in 1..n - 1 {
                let h0 = x[i] - x[i - 1];
                let h1 = x[i + 1] - x[i];
                let lower = h0 / 6.0;
                diag[i] = (h0 + h1) / 3.0;
                upper[i] = h1 / 6.0;
                rhs[i] = (y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0;
                if i > 1 {
                    let factor = lower / diag[i - 1];
                    diag[i] -= factor * upper[i - 1];
                    rhs[i] -= factor * rhs[i - 1];
                }
            }
            for i in (1..n - 1).rev() {
                let next = if i + 1 < n - 1 { m[i + 1] } else { 0.0 };
                m[i] = (rhs[i] - upper[i] * next) / diag[i];
            }
        }
        Some(NaturalCubicSpline { x, y, second_derivatives: m })
    }

    pub fn evaluate(&self, at: f64) -> f64 {
        let n = self.x.len();
        let at = at.clamp(self.x[0], self.x[n - 1]);
        let upper = partition_point(self.x.view(), at).clamp(1, n - 1);
        let lower = upper - 1;
        let h = self.x[upper] - self.x[lower];
        let a = (self.x[upper] - at) / h;
        let b = (at - self.x[lower]) / h;
        let m = &self.second_derivatives;
        a * self.y[lower]
            + b * self.y[upper]
            + ((a * a * a - a) * m[lower] + (b * b * b - b) * m[upper]) * h * h / 6.0
    }
}

/// Draw one value from a tabulated, unnormalized density by inverse-CDF
/// interpolation.
///
/// Returns `None` when the density integrates to zero (or is not finite).
pub fn sample_tabulated(
    xs: ArrayView1<f64>, density: ArrayView1<f64>, rng: &mut dyn RngCore,
) -> Option<f64> {
    if xs.is_empty() || xs.len() != density.len() {
        return None;
    }
    if xs.len() == 1 {
        return (density[0] > 0.0).then_some(xs[0]);
    }
    let cdf = cumulative_trapezoid(density, xs);
    let total = cdf[cdf.len() - 1];
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }
    let target = rng.gen::<f64>() * total;
    let idx = partition_point(cdf.view(), target).clamp(1, cdf.len() - 1);
    let (c0, c1) = (cdf[idx - 1], cdf[idx]);
    if c1 <= c0 {
        return Some(xs[idx]);
    }
    let t = (target - c0) / (c1 - c0);
    Some(xs[idx - 1] + t * (xs[idx] - xs[idx - 1]))
}
