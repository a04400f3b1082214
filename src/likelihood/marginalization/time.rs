//! Coalescence-time marginalization on the FFT grid.
//!
//! Shifting a signal in time by `τ` multiplies it by `e^{-2πi f τ}`, so the
//! matched filter for every shift `τ_n = n·T/N` comes out of one FFT of the
//! integrand `conj(d)·h/S`:
//!
//! `d·h(τ_n) = 4/T · FFT[conj(d_k)·h_k/S_k](n)`.
//!
//! [`TimeGrid`] maps FFT bins back to absolute coalescence times and reduces
//! the per-bin log-likelihoods against the time prior. The grid spacing is
//! `Δtc = 2/f_s`, i.e. `N = n_frequencies − 1` shifts over the segment.
use std::sync::Arc;

use ndarray::{Array1, ArrayView1};
use num_complex::Complex64;

use crate::{
    likelihood::{
        core::priors::{Prior, UniformPrior},
        errors::LikelihoodResult,
    },
    numerics::{logsumexp_weighted, FftPlan},
};

/// Coalescence times sampled by the FFT of a segment.
#[derive(Debug, Clone)]
pub struct TimeGrid {
    start_time: f64,
    duration: f64,
    delta_tc: f64,
    n_samples: usize,
    prior: Arc<dyn Prior>,
}

impl TimeGrid {
    /// Grid for a segment with `n_frequencies` one-sided bins.
    pub fn new(
        start_time: f64, duration: f64, sampling_frequency: f64, n_frequencies: usize,
        prior: Arc<dyn Prior>,
    ) -> Self {
        TimeGrid {
            start_time,
            duration,
            delta_tc: 2.0 / sampling_frequency,
            n_samples: n_frequencies.saturating_sub(1),
            prior,
        }
    }

    pub fn delta_tc(&self) -> f64 {
        self.delta_tc
    }

    pub fn len(&self) -> usize {
        self.n_samples
    }

    pub fn is_empty(&self) -> bool {
        self.n_samples == 0
    }

    pub fn prior(&self) -> &dyn Prior {
        self.prior.as_ref()
    }

    /// Absolute coalescence time of every FFT bin for a template generated
    /// at `geocent_time`, wrapped into the segment.
    pub fn times(&self, geocent_time: f64) -> Array1<f64> {
        let offset = geocent_time - self.start_time;
        Array1::from_shape_fn(self.n_samples, |n| {
            self.start_time + (offset + n as f64 * self.delta_tc).rem_euclid(self.duration)
        })
    }

    /// Prior mass of every bin, `p(t_n)·Δtc`.
    pub fn weights(&self, geocent_time: f64) -> Array1<f64> {
        self.times(geocent_time).mapv(|t| self.prior.prob(t) * self.delta_tc)
    }

    /// `ln Σ_n p(t_n) Δtc exp(ll_n)`.
    pub fn marginalize(&self, log_likelihood: ArrayView1<f64>, geocent_time: f64) -> f64 {
        logsumexp_weighted(log_likelihood, self.weights(geocent_time).view())
    }

    /// Prior on the sub-bin jitter, uniform on `[-Δtc/2, Δtc/2]`.
    pub fn jitter_prior(&self) -> LikelihoodResult<UniformPrior> {
        UniformPrior::new("time_jitter", -self.delta_tc / 2.0, self.delta_tc / 2.0)
    }
}

/// Fill `buffer` with the masked integrand `conj(d)·h/S`, zero-padded or
/// truncated to `len` bins.
pub fn matched_filter_integrand(
    strain: ArrayView1<Complex64>, signal: ArrayView1<Complex64>, psd: ArrayView1<f64>,
    mask: ArrayView1<bool>, len: usize, buffer: &mut Vec<Complex64>,
) {
    let zero = Complex64::new(0.0, 0.0);
    buffer.clear();
    buffer.resize(len, zero);
    let used = len.min(strain.len());
    for k in 0..used {
        if mask[k] {
            buffer[k] = strain[k].conj() * signal[k] / psd[k];
        }
    }
}

/// `4/T · FFT(integrand)`, consuming the integrand in place.
pub fn time_shifted_inner_products(
    plan: &FftPlan, integrand: &mut [Complex64], scratch: &mut Vec<Complex64>, duration: f64,
) -> Array1<Complex64> {
    plan.forward(integrand, scratch);
    let norm = 4.0 / duration;
    Array1::from_iter(integrand.iter().map(|v| v * norm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::core::snr::inner_products;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    // Purpose
    // -------
    // Bin times wrap around the segment and start at the template time.
    //
    // Given
    // -----
    // - Segment [100, 104), f_s = 8 (Δtc = 0.25, 16 bins), template at 103.5.
    //
    // Expect
    // ------
    // - t_0 = 103.5, t_1 = 103.75, t_2 = 100.0 and every time lies in the
    //   segment.
    fn times_wrap_into_segment() {
        let prior = Arc::new(UniformPrior::new("t", 100.0, 104.0).unwrap());
        let grid = TimeGrid::new(100.0, 4.0, 8.0, 17, prior);
        let times = grid.times(103.5);
        assert_eq!(grid.len(), 16);
        assert_relative_eq!(times[0], 103.5);
        assert_relative_eq!(times[1], 103.75);
        assert_relative_eq!(times[2], 100.0);
        assert!(times.iter().all(|t| (100.0..104.0).contains(t)));
        assert_relative_eq!(grid.weights(103.5).sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Each FFT bin equals the direct inner product with the template shifted
    // by n·Δtc.
    //
    // Given
    // -----
    // - 9 frequency bins over T = 2 s, random-looking data and template.
    //
    // Expect
    // ------
    // - FFT bin 3 equals inner_products with h·e^{-2πi f 3Δtc}.
    fn fft_bins_match_shifted_inner_products() {
        let n = 9;
        let duration = 2.0;
        let freqs = Array1::from_shape_fn(n, |k| k as f64 / duration);
        let strain = Array1::from_shape_fn(n, |k| Complex64::new((k as f64).sin(), (k as f64 * 0.3).cos()));
        let signal = Array1::from_shape_fn(n, |k| Complex64::new(1.0 + k as f64, -0.5 * k as f64));
        let psd = Array1::from_shape_fn(n, |k| 1.0 + 0.1 * k as f64);
        let mask = Array1::from_shape_fn(n, |k| k > 0);

        let plan = FftPlan::new(n - 1);
        let mut buffer = Vec::new();
        matched_filter_integrand(strain.view(), signal.view(), psd.view(), mask.view(), n - 1, &mut buffer);
        let series = time_shifted_inner_products(&plan, &mut buffer, &mut Vec::new(), duration);

        let delta_tc = duration / (n - 1) as f64;
        let mut shifted = signal.clone();
        for (k, s) in shifted.iter_mut().enumerate() {
            *s *= Complex64::from_polar(1.0, -2.0 * PI * freqs[k] * 3.0 * delta_tc);
        }
        let mut truncated_mask = mask.clone();
        truncated_mask[n - 1] = false;
        let (direct, _) = inner_products(strain.view(), shifted.view(), psd.view(), truncated_mask.view(), duration);
        assert_relative_eq!(series[3].re, direct.re, epsilon = 1e-10);
        assert_relative_eq!(series[3].im, direct.im, epsilon = 1e-10);
    }

    #[test]
    // Purpose
    // -------
    // Marginalizing a flat log-likelihood returns it unchanged under a prior
    // that covers the segment.
    //
    // Given
    // -----
    // - ll_n = −2 for every bin; uniform prior on the full segment.
    //
    // Expect
    // ------
    // - The marginalized value is −2.
    fn flat_likelihood_marginalizes_to_itself() {
        let prior = Arc::new(UniformPrior::new("t", 0.0, 4.0).unwrap());
        let grid = TimeGrid::new(0.0, 4.0, 16.0, 33, prior);
        let ll = Array1::from_elem(grid.len(), -2.0);
        assert_relative_eq!(grid.marginalize(ll.view(), 1.3), -2.0, epsilon = 1e-12);
        let jitter = grid.jitter_prior().unwrap();
        assert_relative_eq!(jitter.maximum(), 0.0625);
    }
}
