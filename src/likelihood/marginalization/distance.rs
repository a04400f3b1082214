//! Distance marginalization through a precomputed 2-D lookup table.
//!
//! Purpose
//! -------
//! Replace the per-evaluation integral over luminosity distance with one
//! table lookup. Signal amplitude scales as `1/D`, so for a reference
//! distance `D_ref` the inner products at any `D` follow from their values
//! at `D_ref`: `d·h(D) = d·h_ref · D_ref/D` and `h·h(D) = h·h_ref · (D_ref/D)²`.
//! The table tabulates
//!
//! `L(ρ_opt, ρ_mf) = ln Σ_k p(D_k) ΔD exp(g(ρ_mf s_k) − ρ_opt s_k² / 2) − ln Σ_k p(D_k) ΔD`
//!
//! with `s_k = D_ref / D_k` and `g(x) = x` (real part) or `ln I0(|x|)` when
//! the phase is also marginalized.
//!
//! Key behaviors
//! -------------
//! - [`DistanceLookupTable::setup`] loads a cached table when one exists and
//!   matches the current configuration, otherwise builds it and saves it.
//! - [`DistanceLookupTable::marginalized_likelihood`] maps the current
//!   `(d·h, h·h, D)` to reference values and interpolates.
//! - [`DistanceLookupTable::conditional_log_likelihood`] evaluates the
//!   distance-conditional log-likelihood on the grid for reconstruction.
//!
//! Invariants & assumptions
//! ------------------------
//! - `D_ref` is the prior median; the distance grid is uniform on
//!   `[prior.min, prior.max]`.
//! - Optimal-SNR axis: `logspace(-5, 10)`. Matched-filter axis:
//!   `logspace(-5, 10)` with phase marginalization, otherwise a negative
//!   half `-logspace(3, -3)` followed by `logspace(-3, 10)`.
//! - Queries outside the table return `-inf`.
//!
//! Conventions
//! -----------
//! - A cached table is reused only when its distance grid, prior values,
//!   reference distance, phase flag and table shape all match exactly. A
//!   mismatch is logged at info level and the table is rebuilt; an
//!   unreadable cache is logged as a warning and rebuilt. Failing to save
//!   is a warning, never an error.
//! - Cache files are `.npz` archives or JSON, chosen by extension. Without
//!   an explicit path, `distance_marginalization_<key>.npz` is placed in the
//!   cache directory, keyed by a hash of the configuration.
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView1, Ix1, Ix2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    likelihood::{
        core::{options::DistanceMarginalizationOptions, priors::Prior},
        errors::{LikelihoodError, LikelihoodResult},
    },
    numerics::{ln_i0, logsumexp_weighted, GridInterpolator2D},
    persistence::{cache_key, read_json, write_json, ArchiveReader, ArchiveWriter, CacheFormat},
};

/// Lowest and highest decades of the optimal-SNR axis.
const OPTIMAL_AXIS_DECADES: (f64, f64) = (-5.0, 10.0);
/// Decades of the negative half of the matched-filter axis.
const NEGATIVE_AXIS_DECADES: (f64, f64) = (3.0, -3.0);
/// Decades of the positive half of the matched-filter axis without phase
/// marginalization.
const POSITIVE_AXIS_DECADES: (f64, f64) = (-3.0, 10.0);

fn logspace(start: f64, stop: f64, n: usize) -> Array1<f64> {
    Array1::linspace(start, stop, n).mapv(|e| 10f64.powf(e))
}

/// Axis of reference optimal SNRs squared.
pub fn optimal_snr_squared_axis(n: usize) -> Array1<f64> {
    logspace(OPTIMAL_AXIS_DECADES.0, OPTIMAL_AXIS_DECADES.1, n)
}

/// Axis of reference matched-filter values.
pub fn d_inner_h_axis(n: usize, phase_marginalization: bool) -> Array1<f64> {
    if phase_marginalization {
        return logspace(OPTIMAL_AXIS_DECADES.0, OPTIMAL_AXIS_DECADES.1, n);
    }
    let negative = n / 2;
    let positive = n - negative;
    let mut axis = Vec::with_capacity(n);
    axis.extend(logspace(NEGATIVE_AXIS_DECADES.0, NEGATIVE_AXIS_DECADES.1, negative).iter().map(|v| -v));
    axis.extend(logspace(POSITIVE_AXIS_DECADES.0, POSITIVE_AXIS_DECADES.1, positive).iter());
    Array1::from_vec(axis)
}

/// Configuration a table depends on; hashed into the cache key.
#[derive(Serialize)]
struct TableIdentity<'a> {
    distance_array: &'a Array1<f64>,
    prior_array: &'a Array1<f64>,
    reference_distance: f64,
    phase_marginalization: bool,
    optimal_snr_squared_points: usize,
    d_inner_h_points: usize,
}

/// On-disk layout of a lookup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredTable {
    distance_array: Array1<f64>,
    prior_array: Array1<f64>,
    lookup_table: Array2<f64>,
    reference_distance: f64,
    phase_marginalization: bool,
    optimal_snr_squared_array: Array1<f64>,
    d_inner_h_array: Array1<f64>,
}

impl StoredTable {
    fn read(path: &Path) -> LikelihoodResult<Self> {
        match CacheFormat::from_path(path)? {
            CacheFormat::Json => read_json(path),
            CacheFormat::Npz => {
                let mut archive = ArchiveReader::open(path)?;
                Ok(StoredTable {
                    distance_array: archive.array::<Ix1>("distance_array")?,
                    prior_array: archive.array::<Ix1>("prior_array")?,
                    lookup_table: archive.array::<Ix2>("lookup_table")?,
                    reference_distance: archive.scalar("reference_distance")?,
                    phase_marginalization: archive.flag("phase_marginalization")?,
                    optimal_snr_squared_array: archive.array::<Ix1>("optimal_snr_squared_array")?,
                    d_inner_h_array: archive.array::<Ix1>("d_inner_h_array")?,
                })
            }
        }
    }

    fn write(&self, path: &Path) -> LikelihoodResult<()> {
        match CacheFormat::from_path(path)? {
            CacheFormat::Json => write_json(path, self),
            CacheFormat::Npz => {
                let mut archive = ArchiveWriter::create(path)?;
                archive.add("distance_array", &self.distance_array)?;
                archive.add("prior_array", &self.prior_array)?;
                archive.add("lookup_table", &self.lookup_table)?;
                archive.add_scalar("reference_distance", self.reference_distance)?;
                archive.add_flag("phase_marginalization", self.phase_marginalization)?;
                archive.add("optimal_snr_squared_array", &self.optimal_snr_squared_array)?;
                archive.add("d_inner_h_array", &self.d_inner_h_array)?;
                archive.finish()
            }
        }
    }
}

/// Precomputed distance-marginalized log-likelihood.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceLookupTable {
    distance_array: Array1<f64>,
    prior_array: Array1<f64>,
    reference_distance: f64,
    phase_marginalization: bool,
    optimal_snr_squared_array: Array1<f64>,
    d_inner_h_array: Array1<f64>,
    interpolator: GridInterpolator2D,
}

impl DistanceLookupTable {
    /// Load or build the table for `prior`.
    ///
    /// Parameters
    /// ----------
    /// - `prior`: luminosity-distance prior; must have a finite, non-empty
    ///   support.
    /// - `phase_marginalization`: whether the matched-filter term is
    ///   `ln I0(|d·h|)` rather than `Re(d·h)`.
    /// - `options`: grid sizes and cache location.
    ///
    /// Errors
    /// ------
    /// - `InvalidPrior` when the prior support is not finite or the prior
    ///   has no mass on the grid.
    /// - `InvalidOption` for undersized grids.
    pub fn setup(
        prior: &dyn Prior, phase_marginalization: bool, options: &DistanceMarginalizationOptions,
    ) -> LikelihoodResult<Self> {
        options.validate()?;
        let (min, max) = (prior.minimum(), prior.maximum());
        if !(min.is_finite() && max.is_finite() && max > min && min >= 0.0) {
            return Err(LikelihoodError::InvalidPrior {
                name: "luminosity_distance".into(),
                reason: format!("distance marginalization needs a finite support, got [{min}, {max}]"),
            });
        }
        let distance_array = Array1::linspace(min, max, options.distance_grid_size);
        let prior_array = distance_array.mapv(|d| prior.prob(d));
        let reference_distance = prior.rescale(0.5);

        let path = Self::cache_path(
            &distance_array,
            &prior_array,
            reference_distance,
            phase_marginalization,
            options,
        )?;

        if let Some(path) = path.as_deref().filter(|p| p.exists()) {
            match StoredTable::read(path) {
                Ok(stored) => {
                    let expected_shape = (options.optimal_snr_squared_points, options.d_inner_h_points);
                    if stored.distance_array == distance_array
                        && stored.prior_array == prior_array
                        && stored.reference_distance == reference_distance
                        && stored.phase_marginalization == phase_marginalization
                        && stored.lookup_table.dim() == expected_shape
                    {
                        info!(path = %path.display(), "Loaded distance marginalization lookup table");
                        return Self::from_stored(stored);
                    }
                    info!(
                        path = %path.display(),
                        "Distance marginalization lookup table does not match the configuration; rebuilding"
                    );
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to read distance lookup table; rebuilding");
                }
            }
        }

        let table = Self::build(
            distance_array,
            prior_array,
            reference_distance,
            phase_marginalization,
            options.optimal_snr_squared_points,
            options.d_inner_h_points,
        )?;
        if let Some(path) = path.as_deref() {
            match table.save(path) {
                Ok(()) => info!(path = %path.display(), "Saved distance marginalization lookup table"),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to save distance lookup table")
                }
            }
        }
        Ok(table)
    }

    fn cache_path(
        distance_array: &Array1<f64>, prior_array: &Array1<f64>, reference_distance: f64,
        phase_marginalization: bool, options: &DistanceMarginalizationOptions,
    ) -> LikelihoodResult<Option<PathBuf>> {
        if let Some(explicit) = &options.lookup_table {
            return Ok(Some(explicit.clone()));
        }
        let Some(directory) = &options.cache_directory else {
            return Ok(None);
        };
        let key = cache_key(&TableIdentity {
            distance_array,
            prior_array,
            reference_distance,
            phase_marginalization,
            optimal_snr_squared_points: options.optimal_snr_squared_points,
            d_inner_h_points: options.d_inner_h_points,
        })?;
        Ok(Some(directory.join(format!("distance_marginalization_{}.npz", &key[..16]))))
    }

    /// Tabulate the marginalized likelihood on fresh axes.
    ///
    /// Errors
    /// ------
    /// - `InvalidPrior` when the prior has no mass on `distance_array`.
    pub fn build(
        distance_array: Array1<f64>, prior_array: Array1<f64>, reference_distance: f64,
        phase_marginalization: bool, optimal_points: usize, d_inner_h_points: usize,
    ) -> LikelihoodResult<Self> {
        let n_dist = distance_array.len();
        if n_dist < 2 || prior_array.len() != n_dist {
            return Err(LikelihoodError::LengthMismatch {
                what: "distance prior array",
                expected: n_dist,
                actual: prior_array.len(),
            });
        }
        let delta = distance_array[1] - distance_array[0];
        let prior_term = prior_array.mapv(|p| p * delta);
        let log_norm = logsumexp_weighted(Array1::zeros(n_dist).view(), prior_term.view());
        if !log_norm.is_finite() {
            return Err(LikelihoodError::InvalidPrior {
                name: "luminosity_distance".into(),
                reason: "prior has no mass on the distance grid".into(),
            });
        }

        let optimal_axis = optimal_snr_squared_axis(optimal_points);
        let d_axis = d_inner_h_axis(d_inner_h_points, phase_marginalization);
        let scaling = distance_array.mapv(|d| reference_distance / d);
        let scaling_sq = scaling.mapv(|s| s * s);

        info!(
            rows = optimal_points,
            cols = d_inner_h_points,
            distances = n_dist,
            phase_marginalization,
            "Building distance marginalization lookup table"
        );

        // Matched-filter term per (column, distance), shared by every row.
        let mut d_term = Array2::<f64>::zeros((d_inner_h_points, n_dist));
        for (mut row, &d) in d_term.outer_iter_mut().zip(d_axis.iter()) {
            for (out, &s) in row.iter_mut().zip(scaling.iter()) {
                *out = if phase_marginalization { ln_i0(d * s) } else { d * s };
            }
        }

        let mut table = Array2::<f64>::zeros((optimal_points, d_inner_h_points));
        let mut buffer = Array1::<f64>::zeros(n_dist);
        let report_every = (optimal_points / 10).max(1);
        for (i, &h) in optimal_axis.iter().enumerate() {
            for j in 0..d_inner_h_points {
                let d_row = d_term.row(j);
                for k in 0..n_dist {
                    buffer[k] = d_row[k] - h * scaling_sq[k] / 2.0;
                }
                table[[i, j]] = logsumexp_weighted(buffer.view(), prior_term.view()) - log_norm;
            }
            if (i + 1) % report_every == 0 {
                debug!(done = i + 1, total = optimal_points, "Distance lookup table progress");
            }
        }

        Self::from_stored(StoredTable {
            distance_array,
            prior_array,
            lookup_table: table,
            reference_distance,
            phase_marginalization,
            optimal_snr_squared_array: optimal_axis,
            d_inner_h_array: d_axis,
        })
    }

    fn from_stored(stored: StoredTable) -> LikelihoodResult<Self> {
        let interpolator = GridInterpolator2D::new(
            stored.optimal_snr_squared_array.clone(),
            stored.d_inner_h_array.clone(),
            stored.lookup_table,
            f64::NEG_INFINITY,
        )
        .ok_or_else(|| LikelihoodError::CacheFormat {
            reason: "distance lookup table axes are not increasing or do not match the table".into(),
        })?;
        Ok(DistanceLookupTable {
            distance_array: stored.distance_array,
            prior_array: stored.prior_array,
            reference_distance: stored.reference_distance,
            phase_marginalization: stored.phase_marginalization,
            optimal_snr_squared_array: stored.optimal_snr_squared_array,
            d_inner_h_array: stored.d_inner_h_array,
            interpolator,
        })
    }

    /// Write the table to `path` (`.npz` or `.json`).
    pub fn save(&self, path: &Path) -> LikelihoodResult<()> {
        StoredTable {
            distance_array: self.distance_array.clone(),
            prior_array: self.prior_array.clone(),
            lookup_table: self.interpolator.values().clone(),
            reference_distance: self.reference_distance,
            phase_marginalization: self.phase_marginalization,
            optimal_snr_squared_array: self.optimal_snr_squared_array.clone(),
            d_inner_h_array: self.d_inner_h_array.clone(),
        }
        .write(path)
    }

    /// Distance-marginalized log-likelihood ratio for the current inner
    /// products, evaluated at `distance`.
    pub fn marginalized_likelihood(&self, d_inner_h: Complex64, h_inner_h: f64, distance: f64) -> f64 {
        let ratio = distance / self.reference_distance;
        let d_ref = d_inner_h * ratio;
        let d_ref = if self.phase_marginalization { d_ref.norm() } else { d_ref.re };
        let h_ref = h_inner_h * ratio * ratio;
        self.interpolator.evaluate(h_ref, d_ref)
    }

    /// Log-likelihood on the distance grid given inner products computed at
    /// `distance`.
    pub fn conditional_log_likelihood(
        &self, d_inner_h: Complex64, h_inner_h: f64, distance: f64,
    ) -> Array1<f64> {
        self.distance_array.mapv(|dist| {
            let s = distance / dist;
            let d = d_inner_h * s;
            let d_term = if self.phase_marginalization { ln_i0(d.norm()) } else { d.re };
            d_term - h_inner_h * s * s / 2.0
        })
    }

    pub fn distance_array(&self) -> ArrayView1<'_, f64> {
        self.distance_array.view()
    }

    pub fn prior_array(&self) -> ArrayView1<'_, f64> {
        self.prior_array.view()
    }

    pub fn reference_distance(&self) -> f64 {
        self.reference_distance
    }

    pub fn phase_marginalization(&self) -> bool {
        self.phase_marginalization
    }

    pub fn table(&self) -> &Array2<f64> {
        self.interpolator.values()
    }

    /// `(optimal-SNR axis, matched-filter axis)`.
    pub fn axes(&self) -> (ArrayView1<'_, f64>, ArrayView1<'_, f64>) {
        (self.optimal_snr_squared_array.view(), self.d_inner_h_array.view())
    }

    /// Table row for the `i`-th optimal-SNR node.
    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.interpolator.values().row(i)
    }
}
