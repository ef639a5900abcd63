//! MNIST test set download, IDX parsing and model evaluation.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use indicatif::ProgressBar;
use tracing::info;

use crate::classifier::Classifier;
use crate::error::MnistError;
use crate::model::NUM_CLASSES;

pub const MNIST_BASE: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte.gz";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte.gz";

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Downloads `fname` into `cache_dir` unless it is already there.
pub fn download_if_needed(cache_dir: &Path, fname: &str) -> Result<PathBuf, MnistError> {
    fs::create_dir_all(cache_dir)?;
    let path = cache_dir.join(fname);

    if path.exists() {
        info!(path = %path.display(), "using cached file");
        return Ok(path);
    }

    let url = format!("{MNIST_BASE}{fname}");
    info!(%url, "downloading");
    let download_err = |source: reqwest::Error| MnistError::Download {
        url: url.clone(),
        source,
    };
    let mut resp = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;
    let mut out = File::create(&path)?;
    if let Err(source) = resp.copy_to(&mut out) {
        // Leave no partial file behind to be mistaken for a cached copy.
        drop(out);
        fs::remove_file(&path)?;
        return Err(download_err(source));
    }
    info!(path = %path.display(), "saved");
    Ok(path)
}

fn read_gz(path: &Path) -> Result<Vec<u8>, MnistError> {
    let mut buf = vec![];
    GzDecoder::new(File::open(path)?).read_to_end(&mut buf)?;
    Ok(buf)
}

fn be_u32(buf: &[u8], offset: usize) -> usize {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]) as usize
}

/// Parses an uncompressed IDX image file into flattened images scaled to
/// `[0, 1]`.
pub fn parse_idx_images(buf: &[u8]) -> Result<Vec<Vec<f64>>, MnistError> {
    // magic, n_items, rows, cols
    if buf.len() < 16 {
        return Err(MnistError::BadIdx("image header too short"));
    }
    if be_u32(buf, 0) as u32 != IMAGES_MAGIC {
        return Err(MnistError::BadIdx("not an idx3 image file"));
    }
    let n = be_u32(buf, 4);
    let size = be_u32(buf, 8)
        .checked_mul(be_u32(buf, 12))
        .ok_or(MnistError::BadIdx("idx dimensions overflow"))?;
    let expected = n
        .checked_mul(size)
        .and_then(|body| body.checked_add(16))
        .ok_or(MnistError::BadIdx("idx dimensions overflow"))?;
    if buf.len() < expected {
        return Err(MnistError::Truncated {
            expected,
            found: buf.len(),
        });
    }
    if size == 0 {
        return if n == 0 {
            Ok(Vec::new())
        } else {
            Err(MnistError::BadIdx("idx images have no pixels"))
        };
    }
    Ok(buf[16..expected]
        .chunks_exact(size)
        .map(|img| img.iter().map(|&b| b as f64 / 255.0).collect())
        .collect())
}

/// Parses an uncompressed IDX label file.
pub fn parse_idx_labels(buf: &[u8]) -> Result<Vec<u8>, MnistError> {
    if buf.len() < 8 {
        return Err(MnistError::BadIdx("label header too short"));
    }
    if be_u32(buf, 0) as u32 != LABELS_MAGIC {
        return Err(MnistError::BadIdx("not an idx1 label file"));
    }
    let n = be_u32(buf, 4);
    if buf.len() < 8 + n {
        return Err(MnistError::Truncated {
            expected: 8 + n,
            found: buf.len(),
        });
    }
    let labels = buf[8..8 + n].to_vec();
    if labels.iter().any(|&l| l as usize >= NUM_CLASSES) {
        return Err(MnistError::BadIdx("label outside 0..=9"));
    }
    Ok(labels)
}

/// Fetches (or reuses) and parses the MNIST test split.
pub fn load_test_set(cache_dir: &Path) -> Result<(Vec<Vec<f64>>, Vec<u8>), MnistError> {
    let images_path = download_if_needed(cache_dir, TEST_IMAGES)?;
    let labels_path = download_if_needed(cache_dir, TEST_LABELS)?;

    info!("parsing test images");
    let images = parse_idx_images(&read_gz(&images_path)?)?;
    info!("parsing test labels");
    let labels = parse_idx_labels(&read_gz(&labels_path)?)?;
    if images.len() != labels.len() {
        return Err(MnistError::BadIdx("image and label counts differ"));
    }
    Ok((images, labels))
}

/// Outcome of running the classifier over a labelled set.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
    /// `confusion[truth][predicted]`
    pub confusion: [[usize; NUM_CLASSES]; NUM_CLASSES],
    /// Images the model could not score (e.g. wrong size) or whose label is
    /// not a digit.
    pub rejected: usize,
}

impl Evaluation {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Classifies up to `limit` images and tallies the results.
pub fn evaluate(
    classifier: &Classifier,
    images: &[Vec<f64>],
    labels: &[u8],
    limit: Option<usize>,
    progress: &ProgressBar,
) -> Evaluation {
    let count = limit.map_or(images.len(), |l| l.min(images.len()));
    progress.set_length(count as u64);

    let mut eval = Evaluation {
        correct: 0,
        total: 0,
        confusion: [[0; NUM_CLASSES]; NUM_CLASSES],
        rejected: 0,
    };
    for (image, &label) in images.iter().zip(labels).take(count) {
        match classifier.estimate(image) {
            // Labels outside the model's label space cannot be tallied.
            Ok(_) if label as usize >= NUM_CLASSES => eval.rejected += 1,
            Ok(digit) => {
                let predicted = usize::from(digit);
                eval.confusion[label as usize][predicted] += 1;
                eval.total += 1;
                if predicted == label as usize {
                    eval.correct += 1;
                }
            }
            Err(_) => eval.rejected += 1,
        }
        progress.inc(1);
    }
    progress.finish_with_message("done");
    eval
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::ModelStore;

    fn idx_images(images: &[[u8; 4]]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
        buf.extend_from_slice(&(images.len() as u32).to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());
        for img in images {
            buf.extend_from_slice(img);
        }
        buf
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
        buf.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        buf.extend_from_slice(labels);
        buf
    }

    #[test]
    fn parses_images_and_scales_to_unit_range() {
        let buf = idx_images(&[[0, 255, 0, 255], [255, 255, 0, 0]]);
        let images = parse_idx_images(&buf).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0], vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(images[1], vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_truncated_and_foreign_files() {
        let mut buf = idx_images(&[[0, 0, 0, 0]]);
        buf.pop();
        assert!(matches!(
            parse_idx_images(&buf),
            Err(MnistError::Truncated { expected: 20, found: 19 })
        ));
        assert!(matches!(
            parse_idx_images(&idx_labels(&[1])),
            Err(MnistError::BadIdx(_))
        ));
        assert!(matches!(parse_idx_labels(&[0, 0]), Err(MnistError::BadIdx(_))));
        assert!(matches!(
            parse_idx_labels(&idx_labels(&[3, 12])),
            Err(MnistError::BadIdx(_))
        ));
    }

    #[test]
    fn oversized_or_empty_dimensions_are_rejected_without_panicking() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
        for _ in 0..3 {
            buf.extend_from_slice(&u32::MAX.to_be_bytes());
        }
        assert!(matches!(parse_idx_images(&buf), Err(MnistError::BadIdx(_))));

        let mut empty = Vec::new();
        empty.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
        empty.extend_from_slice(&u32::MAX.to_be_bytes());
        empty.extend_from_slice(&0u32.to_be_bytes());
        empty.extend_from_slice(&28u32.to_be_bytes());
        assert!(matches!(parse_idx_images(&empty), Err(MnistError::BadIdx(_))));
    }

    #[test]
    fn parses_labels() {
        assert_eq!(parse_idx_labels(&idx_labels(&[7, 2, 1])).unwrap(), vec![7, 2, 1]);
    }

    #[test]
    fn evaluate_tallies_accuracy_and_confusion() {
        // Label 1 favours the left column, everything else is uniform.
        let mut likelihoods = vec![vec![0.5; 4]; NUM_CLASSES];
        likelihoods[1] = vec![0.9, 0.1, 0.9, 0.1];
        let model = ModelStore::from_tables(vec![0.1; NUM_CLASSES], likelihoods).unwrap();
        let classifier = Classifier::new(Arc::new(model));

        let images = vec![
            vec![1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0],
            vec![1.0, 0.0, 1.0, 0.0],
            vec![0.0; 3],
        ];
        let labels = [1, 0, 0, 4];
        let eval = evaluate(&classifier, &images, &labels, None, &ProgressBar::hidden());

        assert_eq!(eval.total, 3);
        assert_eq!(eval.correct, 2);
        assert_eq!(eval.rejected, 1);
        assert_eq!(eval.confusion[1][1], 1);
        assert_eq!(eval.confusion[0][0], 1);
        assert_eq!(eval.confusion[0][1], 1);
        assert!((eval.accuracy() - 2.0 / 3.0).abs() < 1e-12);

        let limited = evaluate(&classifier, &images, &labels, Some(1), &ProgressBar::hidden());
        assert_eq!((limited.total, limited.correct), (1, 1));

        let foreign = evaluate(&classifier, &images[..1], &[10], None, &ProgressBar::hidden());
        assert_eq!((foreign.total, foreign.rejected), (0, 1));
    }

    #[test]
    fn cached_files_are_not_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TEST_LABELS), b"cached").unwrap();
        let path = download_if_needed(dir.path(), TEST_LABELS).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"cached");
    }
}
