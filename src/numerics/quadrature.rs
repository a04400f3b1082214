//! Quadrature, grid and root-bracketing helpers.
use ndarray::{Array1, ArrayView1};

/// Smallest power of two `≥ x` (at least 1).
pub fn round_up_to_power_of_two(x: f64) -> usize {
    if !(x > 1.0) {
        return 1;
    }
    let exponent = x.log2().ceil() as u32;
    let candidate = 1usize << exponent;
    // guard against log2 rounding just below an exact power
    if (candidate as f64) < x { candidate << 1 } else { candidate }
}

/// Trapezoidal integral of `y(x)` on a possibly nonuniform grid.
pub fn trapezoid(y: ArrayView1<f64>, x: ArrayView1<f64>) -> f64 {
    let n = y.len().min(x.len());
    (1..n).map(|i| 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1])).sum()
}

/// Running trapezoidal integral starting at zero (same length as `x`).
pub fn cumulative_trapezoid(y: ArrayView1<f64>, x: ArrayView1<f64>) -> Array1<f64> {
    let n = y.len().min(x.len());
    let mut out = Array1::zeros(n);
    for i in 1..n {
        out[i] = out[i - 1] + 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
    }
    out
}

/// Bisection for the smallest `x` in `[low, high]` where a monotone predicate
/// flips from `false` to `true`.
///
/// Returns `None` when `predicate(high)` is false. Otherwise returns the
/// upper end of the final bracket, which satisfies the predicate.
pub fn bisect_threshold<F>(mut low: f64, mut high: f64, tolerance: f64, predicate: F) -> Option<f64>
where
    F: Fn(f64) -> bool,
{
    if !predicate(high) {
        return None;
    }
    while high - low > tolerance {
        let mid = 0.5 * (low + high);
        if predicate(mid) {
            high = mid;
        } else {
            low = mid;
        }
    }
    Some(high)
}

/// Sorted unique values together with the inverse index mapping every input
/// position to its slot in the unique array.
pub fn unique_with_inverse(values: ArrayView1<f64>) -> (Array1<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut unique = Vec::with_capacity(values.len());
    let mut inverse = vec![0; values.len()];
    for &idx in &order {
        let v = values[idx];
        if unique.last().map_or(true, |&last: &f64| last != v) {
            unique.push(v);
        }
        inverse[idx] = unique.len() - 1;
    }
    (Array1::from_vec(unique), inverse)
}
