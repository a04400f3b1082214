//! FFT helpers with NumPy normalization conventions.
//!
//! - Forward transforms are unnormalized: `X[k] = Σ x[n] e^{-2πikn/N}`.
//! - Inverse transforms carry the `1/N` factor.
//! - [`RealFftPlan::rfft`] returns the `N/2 + 1` non-negative frequency bins
//!   and [`RealFftPlan::irfft`] rebuilds a length-`N` real series from a
//!   half spectrum, zero-padding or truncating the input exactly like
//!   `numpy.fft.irfft(x, n)`. The imaginary parts of the DC bin and (for even
//!   `N`) the Nyquist bin are ignored.
//!
//! Plans are built once and shared through `Arc<dyn Fft<f64>>`, so cloning a
//! plan is cheap and every clone can run on its own scratch buffer.
use std::sync::Arc;

use ndarray::{Array1, ArrayView1};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

/// Forward/inverse complex FFT plans of a fixed length.
#[derive(Clone)]
pub struct FftPlan {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for FftPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPlan").field("len", &self.len).finish()
    }
}

impl FftPlan {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        FftPlan { len, forward, inverse }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Scratch length large enough for both directions.
    pub fn scratch_len(&self) -> usize {
        self.forward.get_inplace_scratch_len().max(self.inverse.get_inplace_scratch_len())
    }

    /// In-place unnormalized forward transform.
    ///
    /// `scratch` is resized on demand, so callers may hand in an empty vector.
    pub fn forward(&self, buffer: &mut [Complex64], scratch: &mut Vec<Complex64>) {
        debug_assert_eq!(buffer.len(), self.len);
        let needed = self.forward.get_inplace_scratch_len();
        if scratch.len() < needed {
            scratch.resize(needed, Complex64::new(0.0, 0.0));
        }
        self.forward.process_with_scratch(buffer, &mut scratch[..needed]);
    }

    /// In-place inverse transform including the `1/N` factor.
    pub fn inverse(&self, buffer: &mut [Complex64], scratch: &mut Vec<Complex64>) {
        debug_assert_eq!(buffer.len(), self.len);
        let needed = self.inverse.get_inplace_scratch_len();
        if scratch.len() < needed {
            scratch.resize(needed, Complex64::new(0.0, 0.0));
        }
        self.inverse.process_with_scratch(buffer, &mut scratch[..needed]);
        let norm = 1.0 / self.len as f64;
        buffer.iter_mut().for_each(|v| *v *= norm);
    }
}

/// Real-input FFT pair of a fixed length built on [`FftPlan`].
#[derive(Clone, Debug)]
pub struct RealFftPlan {
    plan: FftPlan,
}

impl RealFftPlan {
    pub fn new(len: usize) -> Self {
        RealFftPlan { plan: FftPlan::new(len) }
    }

    pub fn len(&self) -> usize {
        self.plan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    /// Number of bins returned by [`RealFftPlan::rfft`].
    pub fn spectrum_len(&self) -> usize {
        self.plan.len() / 2 + 1
    }

    /// `numpy.fft.rfft(x)` for `x.len() == self.len()`.
    pub fn rfft(
        &self, input: ArrayView1<f64>, buffer: &mut Vec<Complex64>, scratch: &mut Vec<Complex64>,
    ) -> Array1<Complex64> {
        let n = self.plan.len();
        buffer.clear();
        buffer.extend(input.iter().take(n).map(|&v| Complex64::new(v, 0.0)));
        buffer.resize(n, Complex64::new(0.0, 0.0));
        self.plan.forward(buffer, scratch);
        Array1::from_iter(buffer.iter().take(self.spectrum_len()).copied())
    }

    /// `numpy.fft.irfft(x, n)` with `n == self.len()`.
    pub fn irfft(
        &self, spectrum: ArrayView1<Complex64>, buffer: &mut Vec<Complex64>,
        scratch: &mut Vec<Complex64>,
    ) -> Array1<f64> {
        let n = self.plan.len();
        if n == 0 {
            return Array1::zeros(0);
        }
        let half = n / 2;
        let zero = Complex64::new(0.0, 0.0);
        let bin = |k: usize| if k < spectrum.len() { spectrum[k] } else { zero };

        buffer.clear();
        buffer.resize(n, zero);
        buffer[0] = Complex64::new(bin(0).re, 0.0);
        for k in 1..=half {
            let value = bin(k);
            if 2 * k == n {
                buffer[k] = Complex64::new(value.re, 0.0);
            } else {
                buffer[k] = value;
                buffer[n - k] = value.conj();
            }
        }
        self.plan.inverse(buffer, scratch);
        Array1::from_iter(buffer.iter().map(|v| v.re))
    }
}

/// One-shot `numpy.fft.rfft(x)`. Plans on every call; use [`RealFftPlan`]
/// inside loops.
pub fn rfft(input: ArrayView1<f64>) -> Array1<Complex64> {
    let plan = RealFftPlan::new(input.len());
    plan.rfft(input, &mut Vec::new(), &mut Vec::new())
}

/// One-shot `numpy.fft.irfft(x, n)`.
pub fn irfft(spectrum: ArrayView1<Complex64>, n: usize) -> Array1<f64> {
    let plan = RealFftPlan::new(n);
    plan.irfft(spectrum, &mut Vec::new(), &mut Vec::new())
}

/// One-shot unnormalized complex forward FFT.
pub fn fft(input: ArrayView1<Complex64>) -> Array1<Complex64> {
    let plan = FftPlan::new(input.len());
    let mut buffer = input.to_vec();
    plan.forward(&mut buffer, &mut Vec::new());
    Array1::from_vec(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // - Normalization and bin layout of the real-FFT pair.
    // - irfft zero-padding / truncation semantics.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // rfft followed by irfft recovers the input for even and odd lengths.
    //
    // Given
    // -----
    // - Two short real series of lengths 6 and 5.
    //
    // Expect
    // ------
    // - Element-wise agreement at 1e-12.
    fn rfft_irfft_recovers_real_series() {
        for input in [array![1.0, -2.0, 3.5, 0.25, 4.0, -1.0], array![0.5, 1.5, -3.0, 2.0, 7.0]] {
            let spectrum = rfft(input.view());
            assert_eq!(spectrum.len(), input.len() / 2 + 1);
            let back = irfft(spectrum.view(), input.len());
            for (a, b) in back.iter().zip(input.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // Forward transforms are unnormalized.
    //
    // Given
    // -----
    // - A constant series of ones, length 8.
    //
    // Expect
    // ------
    // - DC bin equals 8, every other bin is zero.
    fn forward_transform_is_unnormalized() {
        let spectrum = rfft(Array1::ones(8).view());
        assert_abs_diff_eq!(spectrum[0].re, 8.0, epsilon = 1e-12);
        for v in spectrum.iter().skip(1) {
            assert_abs_diff_eq!(v.norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // irfft zero-pads a short half spectrum.
    //
    // Given
    // -----
    // - Spectrum [4] (DC only) inverted to length 4.
    //
    // Expect
    // ------
    // - Constant series of ones.
    fn irfft_zero_pads_missing_bins() {
        let spectrum = array![Complex64::new(4.0, 0.0)];
        let out = irfft(spectrum.view(), 4);
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-12);
        }
    }
}
