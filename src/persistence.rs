//! persistence — on-disk caches for lookup tables, calibration draws and ROQ
//! weights.
//!
//! Purpose
//! -------
//! Give every cache in the crate one small vocabulary: a [`CacheFormat`]
//! chosen from the file extension, NumPy `.npz` archives read and written
//! through [`ArchiveReader`] / [`ArchiveWriter`], JSON files through
//! [`read_json`] / [`write_json`], and content keys through [`cache_key`].
//!
//! Key behaviors
//! -------------
//! - Archives store `f64` arrays of any dimension. Scalars and flags are
//!   stored as one-element arrays; complex arrays are split into
//!   `<key>_real` / `<key>_imag` members.
//! - Archive members are looked up as `<key>.npy` first and `<key>`
//!   second, so files written by NumPy and by this crate both load.
//! - [`cache_key`] hashes the JSON serialization of any `Serialize` value
//!   with SHA-256 and returns lowercase hex.
//!
//! Invariants & assumptions
//! ------------------------
//! - Readers never panic on malformed files; every failure surfaces as
//!   `LikelihoodError::CacheFormat` or `LikelihoodError::Io`.
//!
//! Conventions
//! -----------
//! - Writers create parent directories on demand.
use std::fs::File;
use std::path::Path;

use ndarray::{Array, Array1, ArrayBase, ArrayView1, Data, Dimension};
use ndarray_npy::{NpzReader, NpzWriter};
use num_complex::Complex64;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::likelihood::errors::{LikelihoodError, LikelihoodResult};

/// File format of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CacheFormat {
    #[default]
    Npz,
    Json,
}

impl CacheFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CacheFormat::Npz => "npz",
            CacheFormat::Json => "json",
        }
    }

    /// Format implied by the extension of `path`.
    pub fn from_path(path: &Path) -> LikelihoodResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("npz") => Ok(CacheFormat::Npz),
            Some("json") => Ok(CacheFormat::Json),
            other => Err(LikelihoodError::CacheFormat {
                reason: format!(
                    "unsupported cache extension {:?} for {}",
                    other.unwrap_or(""),
                    path.display()
                ),
            }),
        }
    }
}

/// Lowercase hex SHA-256 of the JSON form of `value`.
pub fn cache_key<T: Serialize + ?Sized>(value: &T) -> LikelihoodResult<String> {
    let bytes = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn ensure_parent(path: &Path) -> LikelihoodResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Serialize `value` as pretty JSON at `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> LikelihoodResult<()> {
    ensure_parent(path)?;
    let file = File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> LikelihoodResult<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

/// Complex vector as parallel real/imaginary columns, for JSON caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComplexColumns {
    pub real: Vec<f64>,
    pub imag: Vec<f64>,
}

impl ComplexColumns {
    pub fn from_view(values: ArrayView1<Complex64>) -> Self {
        ComplexColumns {
            real: values.iter().map(|v| v.re).collect(),
            imag: values.iter().map(|v| v.im).collect(),
        }
    }

    pub fn to_array(&self) -> LikelihoodResult<Array1<Complex64>> {
        if self.real.len() != self.imag.len() {
            return Err(LikelihoodError::CacheFormat {
                reason: format!(
                    "complex column lengths differ: {} real vs {} imaginary",
                    self.real.len(),
                    self.imag.len()
                ),
            });
        }
        Ok(self.real.iter().zip(self.imag.iter()).map(|(&re, &im)| Complex64::new(re, im)).collect())
    }
}

/// Writer for `.npz` archives of `f64` arrays.
pub struct ArchiveWriter {
    inner: NpzWriter<File>,
}

impl ArchiveWriter {
    pub fn create(path: &Path) -> LikelihoodResult<Self> {
        ensure_parent(path)?;
        Ok(ArchiveWriter { inner: NpzWriter::new(File::create(path)?) })
    }

    pub fn add<S, D>(&mut self, key: &str, array: &ArrayBase<S, D>) -> LikelihoodResult<()>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        self.inner.add_array(key, array)?;
        Ok(())
    }

    pub fn add_scalar(&mut self, key: &str, value: f64) -> LikelihoodResult<()> {
        self.add(key, &Array1::from_elem(1, value))
    }

    pub fn add_flag(&mut self, key: &str, value: bool) -> LikelihoodResult<()> {
        self.add_scalar(key, if value { 1.0 } else { 0.0 })
    }

    /// Store a complex array as `<key>_real` and `<key>_imag`.
    pub fn add_complex<S, D>(&mut self, key: &str, array: &ArrayBase<S, D>) -> LikelihoodResult<()>
    where
        S: Data<Elem = Complex64>,
        D: Dimension,
    {
        self.add(&format!("{key}_real"), &array.mapv(|v| v.re))?;
        self.add(&format!("{key}_imag"), &array.mapv(|v| v.im))
    }

    pub fn finish(self) -> LikelihoodResult<()> {
        self.inner.finish()?;
        Ok(())
    }
}

/// Reader for `.npz` archives of `f64` arrays.
pub struct ArchiveReader {
    inner: NpzReader<File>,
    names: Vec<String>,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> LikelihoodResult<Self> {
        let mut inner = NpzReader::new(File::open(path)?)?;
        let names = inner.names()?;
        Ok(ArchiveReader { inner, names })
    }

    fn member(&self, key: &str) -> LikelihoodResult<String> {
        let with_ext = format!("{key}.npy");
        if self.names.iter().any(|n| *n == with_ext) {
            Ok(with_ext)
        } else if self.names.iter().any(|n| n == key) {
            Ok(key.to_string())
        } else {
            Err(LikelihoodError::CacheFormat { reason: format!("archive has no member {key:?}") })
        }
    }

    /// Member names as stored, including any `.npy` suffix.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, key: &str) -> bool {
        self.member(key).is_ok()
    }

    pub fn array<D: Dimension>(&mut self, key: &str) -> LikelihoodResult<Array<f64, D>> {
        let member = self.member(key)?;
        Ok(self.inner.by_name(&member)?)
    }

    pub fn scalar(&mut self, key: &str) -> LikelihoodResult<f64> {
        let values: Array<f64, ndarray::IxDyn> = self.array(key)?;
        values.iter().next().copied().ok_or_else(|| LikelihoodError::CacheFormat {
            reason: format!("archive member {key:?} is empty"),
        })
    }

    pub fn flag(&mut self, key: &str) -> LikelihoodResult<bool> {
        Ok(self.scalar(key)? != 0.0)
    }

    pub fn complex<D: Dimension>(&mut self, key: &str) -> LikelihoodResult<Array<Complex64, D>> {
        let real: Array<f64, D> = self.array(&format!("{key}_real"))?;
        let imag: Array<f64, D> = self.array(&format!("{key}_imag"))?;
        if real.shape() != imag.shape() {
            return Err(LikelihoodError::CacheFormat {
                reason: format!("complex member {key:?} has mismatched real/imaginary shapes"),
            });
        }
        let mut out = real.mapv(|re| Complex64::new(re, 0.0));
        ndarray::Zip::from(&mut out).and(&imag).for_each(|o, &im| o.im = im);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // - Extension-based format detection.
    // - Archive members of mixed dimension, scalars, flags and complex data.
    // - Stable content keys.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Formats follow the file extension.
    //
    // Given
    // -----
    // - `.npz`, `.json` and `.txt` paths.
    //
    // Expect
    // ------
    // - Npz, Json, and a CacheFormat error.
    fn format_from_extension() {
        assert_eq!(CacheFormat::from_path(Path::new("a/b.npz")).unwrap(), CacheFormat::Npz);
        assert_eq!(CacheFormat::from_path(Path::new("b.json")).unwrap(), CacheFormat::Json);
        assert!(matches!(
            CacheFormat::from_path(Path::new("b.txt")),
            Err(LikelihoodError::CacheFormat { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // An archive keeps every member it was given.
    //
    // Given
    // -----
    // - A 1-D array, a 2-D table, a scalar, a flag and a complex vector in a
    //   nested temporary directory.
    //
    // Expect
    // ------
    // - Every member reads back unchanged; a missing key is an error.
    fn archive_keeps_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("table.npz");
        let table = Array2::from_shape_fn((3, 2), |(i, j)| (i * 2 + j) as f64);
        let complex = array![Complex64::new(1.0, -2.0), Complex64::new(0.5, 3.0)];

        let mut writer = ArchiveWriter::create(&path).unwrap();
        writer.add("grid", &array![1.0, 2.0, 3.0]).unwrap();
        writer.add("table", &table).unwrap();
        writer.add_scalar("reference", 42.0).unwrap();
        writer.add_flag("phase", true).unwrap();
        writer.add_complex("weights", &complex).unwrap();
        writer.finish().unwrap();

        let mut reader = ArchiveReader::open(&path).unwrap();
        let grid: Array1<f64> = reader.array("grid").unwrap();
        let back: Array2<f64> = reader.array("table").unwrap();
        let weights: Array1<Complex64> = reader.complex("weights").unwrap();
        assert_eq!(grid, array![1.0, 2.0, 3.0]);
        assert_eq!(back, table);
        assert_eq!(reader.scalar("reference").unwrap(), 42.0);
        assert!(reader.flag("phase").unwrap());
        assert_eq!(weights, complex);
        assert!(!reader.contains("missing"));
        assert!(reader.array::<ndarray::Ix1>("missing").is_err());
    }

    #[test]
    // Purpose
    // -------
    // Content keys are deterministic and input-sensitive.
    //
    // Given
    // -----
    // - Two equal vectors and one that differs in the last element.
    //
    // Expect
    // ------
    // - Equal keys for equal inputs, 64 hex chars, different key otherwise.
    fn cache_key_is_stable() {
        let a = cache_key(&vec![1.0, 2.0, 3.0]).unwrap();
        let b = cache_key(&vec![1.0, 2.0, 3.0]).unwrap();
        let c = cache_key(&vec![1.0, 2.0, 3.5]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, c);
    }

    #[test]
    // Purpose
    // -------
    // JSON helpers write and read complex columns.
    //
    // Given
    // -----
    // - A two-element complex vector.
    //
    // Expect
    // ------
    // - The reloaded columns rebuild the same vector.
    fn json_complex_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draws.json");
        let values = array![Complex64::new(1.0, 0.0), Complex64::new(0.0, -1.0)];
        write_json(&path, &ComplexColumns::from_view(values.view())).unwrap();
        let back: ComplexColumns = read_json(&path).unwrap();
        assert_eq!(back.to_array().unwrap(), values);
    }
}
