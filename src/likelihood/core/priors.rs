//! Prior distributions consumed by marginalization setup.
//!
//! Purpose
//! -------
//! Provide the minimal prior interface the likelihood needs (bounds,
//! density, fixed-ness, inverse CDF and sampling) plus a handful of concrete
//! priors and a named collection, [`PriorSet`].
//!
//! Key behaviors
//! -------------
//! - [`Prior::rescale`] maps a unit-interval value through the inverse CDF;
//!   [`Prior::sample`] draws by rescaling a uniform variate, so every prior
//!   is sampleable from a single seeded RNG.
//! - [`UniformPrior`] and [`GaussianPrior`] delegate densities to `statrs`.
//! - [`PowerLawPrior`] covers the usual `p(d) ∝ d^α` luminosity-distance
//!   priors, including `α = −1`.
//! - [`DeltaPrior`] is the fixed prior used to freeze marginalized
//!   parameters in the sampling prior set.
//!
//! Invariants & assumptions
//! ------------------------
//! - Constructors validate their parameters and return
//!   [`LikelihoodError::InvalidPrior`] otherwise.
//! - `prob` is zero outside `[minimum, maximum]`.
//!
//! Conventions
//! -----------
//! - Priors are shared as `Arc<dyn Prior>`; they are immutable after
//!   construction and safe to read from many workers.
use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{Rng, RngCore};
use statrs::distribution::{Continuous, ContinuousCDF, Normal, Uniform};

use crate::likelihood::errors::{LikelihoodError, LikelihoodResult};

/// One-dimensional prior.
pub trait Prior: Send + Sync + std::fmt::Debug {
    fn minimum(&self) -> f64;
    fn maximum(&self) -> f64;
    /// Probability density at `x` (zero outside the support).
    fn prob(&self, x: f64) -> f64;
    /// Inverse CDF evaluated at `u ∈ [0, 1]`.
    fn rescale(&self, u: f64) -> f64;

    fn is_fixed(&self) -> bool {
        false
    }

    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.rescale(rng.gen::<f64>())
    }
}

/// Uniform prior on `[minimum, maximum]`.
#[derive(Debug, Clone)]
pub struct UniformPrior {
    minimum: f64,
    maximum: f64,
    dist: Uniform,
}

impl UniformPrior {
    pub fn new(name: &str, minimum: f64, maximum: f64) -> LikelihoodResult<Self> {
        let dist = Uniform::new(minimum, maximum).map_err(|e| LikelihoodError::InvalidPrior {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(UniformPrior { minimum, maximum, dist })
    }
}

impl Prior for UniformPrior {
    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }

    fn prob(&self, x: f64) -> f64 {
        self.dist.pdf(x)
    }

    fn rescale(&self, u: f64) -> f64 {
        self.minimum + u * (self.maximum - self.minimum)
    }
}

/// Power-law prior `p(x) ∝ x^α` on `[minimum, maximum]`, `minimum > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerLawPrior {
    alpha: f64,
    minimum: f64,
    maximum: f64,
}

impl PowerLawPrior {
    pub fn new(name: &str, alpha: f64, minimum: f64, maximum: f64) -> LikelihoodResult<Self> {
        if !(minimum > 0.0) || !(maximum > minimum) || !maximum.is_finite() || !alpha.is_finite() {
            return Err(LikelihoodError::InvalidPrior {
                name: name.to_string(),
                reason: format!(
                    "power law needs finite alpha and 0 < minimum < maximum; got alpha={alpha}, [{minimum}, {maximum}]"
                ),
            });
        }
        Ok(PowerLawPrior { alpha, minimum, maximum })
    }
}

impl Prior for PowerLawPrior {
    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }

    fn prob(&self, x: f64) -> f64 {
        if x < self.minimum || x > self.maximum {
            return 0.0;
        }
        if self.alpha == -1.0 {
            1.0 / (x * (self.maximum / self.minimum).ln())
        } else {
            let a1 = self.alpha + 1.0;
            a1 * x.powf(self.alpha) / (self.maximum.powf(a1) - self.minimum.powf(a1))
        }
    }

    fn rescale(&self, u: f64) -> f64 {
        if self.alpha == -1.0 {
            self.minimum * (u * (self.maximum / self.minimum).ln()).exp()
        } else {
            let a1 = self.alpha + 1.0;
            let lo = self.minimum.powf(a1);
            let hi = self.maximum.powf(a1);
            (lo + u * (hi - lo)).powf(1.0 / a1)
        }
    }
}

/// Gaussian prior on the real line.
#[derive(Debug, Clone)]
pub struct GaussianPrior {
    dist: Normal,
}

impl GaussianPrior {
    pub fn new(name: &str, mu: f64, sigma: f64) -> LikelihoodResult<Self> {
        let dist = Normal::new(mu, sigma).map_err(|e| LikelihoodError::InvalidPrior {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(GaussianPrior { dist })
    }
}

impl Prior for GaussianPrior {
    fn minimum(&self) -> f64 {
        f64::NEG_INFINITY
    }

    fn maximum(&self) -> f64 {
        f64::INFINITY
    }

    fn prob(&self, x: f64) -> f64 {
        self.dist.pdf(x)
    }

    fn rescale(&self, u: f64) -> f64 {
        self.dist.inverse_cdf(u)
    }
}

/// Point mass at `peak`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaPrior {
    peak: f64,
}

impl DeltaPrior {
    pub fn new(peak: f64) -> Self {
        DeltaPrior { peak }
    }
}

impl Prior for DeltaPrior {
    fn minimum(&self) -> f64 {
        self.peak
    }

    fn maximum(&self) -> f64 {
        self.peak
    }

    fn prob(&self, x: f64) -> f64 {
        if x == self.peak { 1.0 } else { 0.0 }
    }

    fn rescale(&self, _u: f64) -> f64 {
        self.peak
    }

    fn is_fixed(&self) -> bool {
        true
    }
}

/// Named collection of priors.
#[derive(Debug, Clone, Default)]
pub struct PriorSet {
    priors: BTreeMap<String, Arc<dyn Prior>>,
}

impl PriorSet {
    pub fn new() -> Self {
        PriorSet { priors: BTreeMap::new() }
    }

    pub fn insert(&mut self, name: &str, prior: Arc<dyn Prior>) {
        self.priors.insert(name.to_string(), prior);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Prior>> {
        self.priors.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Prior>> {
        self.priors.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.priors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.priors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Prior>)> {
        self.priors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names starting with `prefix`.
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.priors.keys().filter(|k| k.starts_with(prefix)).cloned().collect()
    }

    /// One joint draw from every prior in the set.
    pub fn sample(&self, rng: &mut dyn RngCore) -> BTreeMap<String, f64> {
        self.priors.iter().map(|(k, p)| (k.clone(), p.sample(rng))).collect()
    }
}
