//! Model store: the two pretrained probability tables of the digit model.
//!
//! Artifacts are JSON arrays. Priors are a flat array of 10 floats, the pixel
//! likelihoods an array of 10 rows with one float per pixel. Paths ending in
//! `.gz` are read and written through gzip.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ModelLoadError, ModelSaveError};

/// Size of the label space (digits 0 through 9).
pub const NUM_CLASSES: usize = 10;

/// Class prior probabilities indexed by digit label.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPriors([f64; NUM_CLASSES]);

impl ClassPriors {
    pub fn get(&self, label: usize) -> f64 {
        self.0[label]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Per-label probability that each pixel is "on".
#[derive(Debug, Clone, PartialEq)]
pub struct PixelLikelihoods {
    rows: Vec<Vec<f64>>,
    pixels: usize,
}

impl PixelLikelihoods {
    /// Likelihood row for `label`, one entry per pixel.
    pub fn row(&self, label: usize) -> &[f64] {
        &self.rows[label]
    }

    /// Number of pixels N every row carries.
    pub fn pixel_count(&self) -> usize {
        self.pixels
    }
}

/// Immutable pair of tables, built once and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelStore {
    priors: ClassPriors,
    likelihoods: PixelLikelihoods,
}

impl ModelStore {
    /// Loads and validates both artifacts. No store is produced unless both
    /// tables pass validation.
    pub fn load(
        priors_path: impl AsRef<Path>,
        likelihoods_path: impl AsRef<Path>,
    ) -> Result<Self, ModelLoadError> {
        let priors: Vec<f64> = read_artifact(priors_path.as_ref())?;
        let likelihoods: Vec<Vec<f64>> = read_artifact(likelihoods_path.as_ref())?;
        Self::from_tables(priors, likelihoods)
    }

    /// Builds a store from in-memory tables with the same checks as [`load`].
    ///
    /// [`load`]: ModelStore::load
    pub fn from_tables(
        priors: Vec<f64>,
        likelihoods: Vec<Vec<f64>>,
    ) -> Result<Self, ModelLoadError> {
        let priors: [f64; NUM_CLASSES] = priors
            .try_into()
            .map_err(|v: Vec<f64>| ModelLoadError::LabelCount { found: v.len() })?;
        for (label, &value) in priors.iter().enumerate() {
            check_probability("prior", label, 0, value)?;
        }

        if likelihoods.len() != NUM_CLASSES {
            return Err(ModelLoadError::LabelCount {
                found: likelihoods.len(),
            });
        }
        let pixels = likelihoods[0].len();
        if pixels == 0 {
            return Err(ModelLoadError::EmptyRow);
        }
        for (label, row) in likelihoods.iter().enumerate() {
            if row.len() != pixels {
                return Err(ModelLoadError::PixelCountMismatch {
                    label,
                    expected: pixels,
                    found: row.len(),
                });
            }
            for (index, &value) in row.iter().enumerate() {
                check_probability("likelihood", label, index, value)?;
            }
        }

        Ok(Self {
            priors: ClassPriors(priors),
            likelihoods: PixelLikelihoods {
                rows: likelihoods,
                pixels,
            },
        })
    }

    /// Writes both tables in the format [`ModelStore::load`] reads.
    pub fn save(
        &self,
        priors_path: impl AsRef<Path>,
        likelihoods_path: impl AsRef<Path>,
    ) -> Result<(), ModelSaveError> {
        write_artifact(priors_path.as_ref(), &self.priors.0)?;
        write_artifact(likelihoods_path.as_ref(), &self.likelihoods.rows)
    }

    pub fn priors(&self) -> &ClassPriors {
        &self.priors
    }

    pub fn likelihoods(&self) -> &PixelLikelihoods {
        &self.likelihoods
    }

    pub fn pixel_count(&self) -> usize {
        self.likelihoods.pixels
    }
}

// Boundary values 0 and 1 are accepted; scoring turns them into -inf.
fn check_probability(
    table: &'static str,
    label: usize,
    index: usize,
    value: f64,
) -> Result<(), ModelLoadError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ModelLoadError::ProbabilityOutOfRange {
            table,
            label,
            index,
            value,
        })
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, ModelLoadError> {
    let io_err = |source: std::io::Error| ModelLoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    serde_json::from_reader(BufReader::new(reader)).map_err(|source| ModelLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_artifact<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ModelSaveError> {
    let io_err = |source: std::io::Error| ModelSaveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json_err = |source: serde_json::Error| ModelSaveError::Encode {
        path: path.to_path_buf(),
        source,
    };
    let writer = BufWriter::new(File::create(path).map_err(io_err)?);
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        serde_json::to_writer(&mut encoder, value).map_err(json_err)?;
        encoder.finish().map_err(io_err)?.flush().map_err(io_err)
    } else {
        let mut writer = writer;
        serde_json::to_writer(&mut writer, value).map_err(json_err)?;
        writer.flush().map_err(io_err)
    }
}
