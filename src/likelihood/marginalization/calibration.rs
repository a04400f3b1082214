//! Calibration marginalization over a fixed set of response-curve draws.
//!
//! Purpose
//! -------
//! Replace the per-evaluation calibration model by `N` response curves drawn
//! once from the calibration priors. The likelihood is averaged over the
//! draws (`ln Σ_c exp(ll_c) − ln N`), and reconstruction later picks one
//! draw index from its conditional posterior.
//!
//! Key behaviors
//! -------------
//! - [`CalibrationDraws::setup`] reads draws from the detector's cache file
//!   when it exists (interpolating them onto the detector grid, filling 1
//!   outside the stored range) and otherwise draws them from the
//!   `recalib_<name>_*` priors through the detector's calibration model and
//!   writes the file.
//! - The calibration priors are then frozen to zero in the sampling prior
//!   set so the sampler no longer explores them.
//! - Only the masked bins are kept in memory, with `|C|²` precomputed for the
//!   optimal-SNR weights.
//!
//! Invariants & assumptions
//! ------------------------
//! - `draws` is `(n_draws, n_masked)` and aligned with `mask_indices`.
//! - Generated draw sets are reproducible for a given seed.
//!
//! Conventions
//! -----------
//! - Files hold `frequency_array`, `calibration_draws` (complex, split into
//!   real and imaginary members in `.npz`) and one `parameter_<name>` array
//!   per calibration parameter.
//! - A file with fewer than `starting_index + N` draws is an error; a
//!   failure to write a freshly generated file is only a warning.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Ix1, Ix2};
use num_complex::Complex64;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    likelihood::{
        core::{
            detector::Detector,
            options::CalibrationOptions,
            priors::{DeltaPrior, PriorSet},
        },
        errors::{LikelihoodError, LikelihoodResult},
    },
    numerics::interp_linear,
    persistence::{read_json, write_json, ArchiveReader, ArchiveWriter, CacheFormat},
};

const PARAMETER_PREFIX: &str = "parameter_";

/// On-disk layout of a draw set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredCalibration {
    frequency_array: Array1<f64>,
    calibration_draws_real: Array2<f64>,
    calibration_draws_imag: Array2<f64>,
    parameter_draws: BTreeMap<String, Array1<f64>>,
}

impl StoredCalibration {
    fn read(path: &Path) -> LikelihoodResult<Self> {
        match CacheFormat::from_path(path)? {
            CacheFormat::Json => read_json(path),
            CacheFormat::Npz => {
                let mut archive = ArchiveReader::open(path)?;
                let names: Vec<String> = archive
                    .names()
                    .iter()
                    .filter_map(|n| n.trim_end_matches(".npy").strip_prefix(PARAMETER_PREFIX))
                    .map(str::to_string)
                    .collect();
                let mut parameter_draws = BTreeMap::new();
                for name in names {
                    let values = archive.array::<Ix1>(&format!("{PARAMETER_PREFIX}{name}"))?;
                    parameter_draws.insert(name, values);
                }
                let draws = archive.complex::<Ix2>("calibration_draws")?;
                Ok(StoredCalibration {
                    frequency_array: archive.array::<Ix1>("frequency_array")?,
                    calibration_draws_real: draws.mapv(|v| v.re),
                    calibration_draws_imag: draws.mapv(|v| v.im),
                    parameter_draws,
                })
            }
        }
    }

    fn write(&self, path: &Path) -> LikelihoodResult<()> {
        match CacheFormat::from_path(path)? {
            CacheFormat::Json => write_json(path, self),
            CacheFormat::Npz => {
                let mut archive = ArchiveWriter::create(path)?;
                archive.add("frequency_array", &self.frequency_array)?;
                archive.add("calibration_draws_real", &self.calibration_draws_real)?;
                archive.add("calibration_draws_imag", &self.calibration_draws_imag)?;
                for (name, values) in &self.parameter_draws {
                    archive.add(&format!("{PARAMETER_PREFIX}{name}"), values)?;
                }
                archive.finish()
            }
        }
    }

    fn n_draws(&self) -> usize {
        self.calibration_draws_real.nrows()
    }
}

/// Response-curve draws for one detector, restricted to its mask.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationDraws {
    detector: String,
    mask_indices: Vec<usize>,
    draws: Array2<Complex64>,
    abs_squared: Array2<f64>,
    parameter_draws: BTreeMap<String, Array1<f64>>,
}

impl CalibrationDraws {
    /// Load or generate the draws for `detector` and freeze its calibration
    /// priors in `sampling_priors`.
    ///
    /// Errors
    /// ------
    /// - `InsufficientCalibrationDraws` when the file holds too few draws.
    /// - `MissingCalibrationModel` when draws must be generated but the
    ///   detector has no calibration model.
    /// - `CacheFormat` / `Io` for an unreadable file.
    pub fn setup(
        detector: &dyn Detector, sampling_priors: &mut PriorSet, options: &CalibrationOptions,
    ) -> LikelihoodResult<Self> {
        options.validate()?;
        let name = detector.name().to_string();
        let prefix = format!("recalib_{name}_");
        let path = options.file_for(&name);
        let mask_indices: Vec<usize> = detector
            .frequency_mask()
            .iter()
            .enumerate()
            .filter_map(|(k, &m)| m.then_some(k))
            .collect();
        let masked_frequencies =
            Array1::from_iter(mask_indices.iter().map(|&k| detector.frequency_array()[k]));

        let n = options.number_of_response_curves;
        let draws = if path.exists() {
            let stored = StoredCalibration::read(&path)?;
            let available = stored.n_draws();
            if available < options.starting_index + n {
                return Err(LikelihoodError::InsufficientCalibrationDraws {
                    available,
                    requested: n,
                    starting_index: options.starting_index,
                });
            }
            info!(
                detector = %name,
                path = %path.display(),
                draws = n,
                starting_index = options.starting_index,
                "Loaded calibration draws"
            );
            Self::from_stored(&name, mask_indices, masked_frequencies.view(), &stored, options.starting_index, n)
        } else {
            let model = detector
                .calibration_model()
                .ok_or_else(|| LikelihoodError::MissingCalibrationModel { detector: name.clone() })?;
            let names = sampling_priors.names_with_prefix(&prefix);
            if names.is_empty() {
                warn!(detector = %name, "No calibration priors found; every draw uses the nominal response");
            }
            info!(detector = %name, draws = n, "Generating calibration draws");

            let frequencies = detector.frequency_array();
            let mut rng = StdRng::seed_from_u64(options.seed);
            let mut full = Array2::<Complex64>::zeros((n, frequencies.len()));
            let mut parameter_draws: BTreeMap<String, Array1<f64>> =
                names.iter().map(|p| (p.clone(), Array1::zeros(n))).collect();
            for (c, mut row) in full.outer_iter_mut().enumerate() {
                let mut values = BTreeMap::new();
                for p in &names {
                    let Some(prior) = sampling_priors.get(p) else { continue };
                    let value = prior.sample(&mut rng);
                    if let Some(column) = parameter_draws.get_mut(p) {
                        column[c] = value;
                    }
                    if let Some(short) = p.strip_prefix(&prefix) {
                        values.insert(short.to_string(), value);
                    }
                }
                row.assign(&model.response(frequencies, &values));
            }

            let stored = StoredCalibration {
                frequency_array: frequencies.to_owned(),
                calibration_draws_real: full.mapv(|v| v.re),
                calibration_draws_imag: full.mapv(|v| v.im),
                parameter_draws,
            };
            match stored.write(&path) {
                Ok(()) => info!(detector = %name, path = %path.display(), "Saved calibration draws"),
                Err(err) => {
                    warn!(detector = %name, path = %path.display(), error = %err, "Failed to save calibration draws")
                }
            }
            Self::from_stored(&name, mask_indices, masked_frequencies.view(), &stored, 0, n)
        };

        for p in sampling_priors.names_with_prefix(&prefix) {
            sampling_priors.insert(&p, Arc::new(DeltaPrior::new(0.0)));
        }
        Ok(draws)
    }

    fn from_stored(
        detector: &str, mask_indices: Vec<usize>, frequencies: ArrayView1<f64>,
        stored: &StoredCalibration, start: usize, n: usize,
    ) -> Self {
        let mut draws = Array2::<Complex64>::zeros((n, mask_indices.len()));
        for (c, mut row) in draws.outer_iter_mut().enumerate() {
            let re = stored.calibration_draws_real.row(start + c);
            let im = stored.calibration_draws_imag.row(start + c);
            for (out, &f) in row.iter_mut().zip(frequencies.iter()) {
                *out = Complex64::new(
                    interp_linear(f, stored.frequency_array.view(), re, 1.0, 1.0),
                    interp_linear(f, stored.frequency_array.view(), im, 0.0, 0.0),
                );
            }
        }
        let parameter_draws = stored
            .parameter_draws
            .iter()
            .filter(|(_, v)| v.len() >= start + n)
            .map(|(k, v)| (k.clone(), v.slice(s![start..start + n]).to_owned()))
            .collect();
        Self::from_masked(detector, mask_indices, draws, parameter_draws)
    }

    /// Draw set from responses already restricted to `mask_indices`.
    pub fn from_masked(
        detector: &str, mask_indices: Vec<usize>, draws: Array2<Complex64>,
        parameter_draws: BTreeMap<String, Array1<f64>>,
    ) -> Self {
        let abs_squared = draws.mapv(|v| v.norm_sqr());
        CalibrationDraws { detector: detector.to_string(), mask_indices, draws, abs_squared, parameter_draws }
    }

    pub fn detector(&self) -> &str {
        &self.detector
    }

    pub fn len(&self) -> usize {
        self.draws.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.nrows() == 0
    }

    pub fn mask_indices(&self) -> &[usize] {
        &self.mask_indices
    }

    /// `(n_draws, n_masked)` responses.
    pub fn draws(&self) -> ArrayView2<'_, Complex64> {
        self.draws.view()
    }

    pub fn abs_squared(&self) -> ArrayView2<'_, f64> {
        self.abs_squared.view()
    }

    /// Calibration parameters behind each draw, keyed by prior name.
    pub fn parameter_draws(&self) -> &BTreeMap<String, Array1<f64>> {
        &self.parameter_draws
    }

    /// Multiply the masked bins of `signal` by draw `index`.
    pub fn apply(&self, index: usize, signal: &mut Array1<Complex64>) {
        for (&k, &c) in self.mask_indices.iter().zip(self.draws.row(index).iter()) {
            signal[k] *= c;
        }
    }

    /// Draw `index` on the full frequency grid, 1 outside the mask.
    pub fn full_response(&self, index: usize, len: usize) -> Array1<Complex64> {
        let mut response = Array1::from_elem(len, Complex64::new(1.0, 0.0));
        self.apply(index, &mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::core::{
        calibration_model::CubicSplineCalibration,
        detector::{FixedAntenna, Interferometer},
        priors::Prior,
    };
    use tempfile::tempdir;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // - Generation, persistence and reload of draw sets.
    // - Prior freezing after setup.
    // - Error paths: too few stored draws, no calibration model.
    // -------------------------------------------------------------------------

    fn detector(with_model: bool) -> Interferometer {
        let n = 129;
        let duration = 4.0;
        let freqs = Array1::from_shape_fn(n, |k| k as f64 / duration);
        let ifo = Interferometer::new(
            "H1",
            freqs,
            Array1::zeros(n),
            Array1::ones(n),
            0.0,
            duration,
            Arc::new(FixedAntenna::new(1.0, 0.0, 0.0)),
        )
        .unwrap();
        if with_model {
            ifo.with_calibration_model(Arc::new(CubicSplineCalibration::new(20.0, 32.0, 4).unwrap()))
        } else {
            ifo
        }
    }

    fn priors() -> PriorSet {
        CubicSplineCalibration::new(20.0, 32.0, 4).unwrap().priors("H1", 0.1, 0.1).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Generated draws are saved, reloaded identically and freeze the priors.
    //
    // Given
    // -----
    // - A detector with a spline model and Gaussian node priors; 20 draws
    //   written to a temporary directory.
    //
    // Expect
    // ------
    // - The file exists; a second setup loads the same draws.
    // - Every `recalib_H1_*` prior is fixed afterwards.
    // - Draws differ from each other and |C|² matches the stored draws.
    fn generated_draws_round_trip_and_freeze_priors() {
        let dir = tempdir().unwrap();
        let options = CalibrationOptions {
            number_of_response_curves: 20,
            directory: Some(dir.path().to_path_buf()),
            seed: 7,
            ..CalibrationOptions::default()
        };
        let ifo = detector(true);
        let mut sampling = priors();
        let generated = CalibrationDraws::setup(&ifo, &mut sampling, &options).unwrap();
        assert!(dir.path().join("H1_calibration_file.npz").exists());
        assert!(sampling.iter().all(|(_, p)| p.is_fixed()));
        assert_eq!(generated.len(), 20);
        assert_eq!(generated.parameter_draws().len(), 8);
        assert_ne!(generated.draws()[[0, 0]], generated.draws()[[1, 0]]);
        assert_eq!(generated.abs_squared()[[3, 2]], generated.draws()[[3, 2]].norm_sqr());

        let mut fresh = priors();
        let loaded = CalibrationDraws::setup(&ifo, &mut fresh, &options).unwrap();
        assert_eq!(generated, loaded);
    }

    #[test]
    // Purpose
    // -------
    // Reading a subset honors `starting_index` and rejects short files.
    //
    // Given
    // -----
    // - A JSON file with 10 draws; requests for (5 from 5) and (5 from 6).
    //
    // Expect
    // ------
    // - The first matches rows 5..10 of the full set.
    // - The second fails with InsufficientCalibrationDraws.
    fn starting_index_selects_rows_and_short_files_fail() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("h1.json");
        let mut options = CalibrationOptions { number_of_response_curves: 10, seed: 3, ..Default::default() };
        options.lookup_files.insert("H1".into(), file.clone());
        let ifo = detector(true);
        let full = CalibrationDraws::setup(&ifo, &mut priors(), &options).unwrap();

        options.number_of_response_curves = 5;
        options.starting_index = 5;
        let subset = CalibrationDraws::setup(&ifo, &mut priors(), &options).unwrap();
        assert_eq!(subset.draws().row(0), full.draws().row(5));

        options.starting_index = 6;
        let err = CalibrationDraws::setup(&ifo, &mut priors(), &options).unwrap_err();
        assert_eq!(
            err,
            LikelihoodError::InsufficientCalibrationDraws { available: 10, requested: 5, starting_index: 6 }
        );
    }

    #[test]
    // Purpose
    // -------
    // Without a file and without a model there is nothing to draw from.
    //
    // Given
    // -----
    // - A detector without a calibration model and an empty directory.
    //
    // Expect
    // ------
    // - MissingCalibrationModel naming the detector.
    fn missing_model_is_an_error() {
        let dir = tempdir().unwrap();
        let options = CalibrationOptions { directory: Some(dir.path().to_path_buf()), ..Default::default() };
        let err = CalibrationDraws::setup(&detector(false), &mut priors(), &options).unwrap_err();
        assert_eq!(err, LikelihoodError::MissingCalibrationModel { detector: "H1".into() });
    }

    #[test]
    // Purpose
    // -------
    // Applying a draw touches only masked bins.
    //
    // Given
    // -----
    // - Mask indices [1, 3] with draws [2, i].
    //
    // Expect
    // ------
    // - full_response = [1, 2, 1, i, 1].
    fn apply_touches_masked_bins_only() {
        let draws = Array2::from_shape_vec((1, 2), vec![Complex64::new(2.0, 0.0), Complex64::new(0.0, 1.0)]).unwrap();
        let set = CalibrationDraws::from_masked("H1", vec![1, 3], draws, BTreeMap::new());
        let response = set.full_response(0, 5);
        assert_eq!(response[0], Complex64::new(1.0, 0.0));
        assert_eq!(response[1], Complex64::new(2.0, 0.0));
        assert_eq!(response[3], Complex64::new(0.0, 1.0));
        assert_eq!(response[4], Complex64::new(1.0, 0.0));
    }
}
