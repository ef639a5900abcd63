//! Error types for model loading, classification and image capture.

use std::path::PathBuf;

use thiserror::Error;

/// A model artifact was missing, malformed, or dimensionally inconsistent.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed model artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected 10 labels, found {found}")]
    LabelCount { found: usize },

    #[error("likelihood table has no pixels")]
    EmptyRow,

    #[error("label {label} has {found} pixel likelihoods, expected {expected}")]
    PixelCountMismatch {
        label: usize,
        expected: usize,
        found: usize,
    },

    #[error("{table} value {value} at label {label}, index {index} is not a probability")]
    ProbabilityOutOfRange {
        table: &'static str,
        label: usize,
        index: usize,
        value: f64,
    },
}

/// A model artifact could not be written.
#[derive(Error, Debug)]
pub enum ModelSaveError {
    #[error("failed to write model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode model artifact {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The image handed to the classifier cannot be scored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidInputError {
    #[error("image has {found} pixels, model expects {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("pixel {index} has value {value}, expected a value in [0, 1]")]
    PixelOutOfRange { index: usize, value: f64 },
}

/// Still-image preprocessing failed before classification.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("region {roi} does not fit in a {width}x{height} image")]
    RoiOutOfBounds {
        roi: String,
        width: u32,
        height: u32,
    },

    #[error("region of interest is empty")]
    EmptyRoi,

    #[error("invalid region '{0}', expected x,y,width,height")]
    RoiSyntax(String),
}

/// MNIST evaluation data could not be fetched or parsed.
#[derive(Error, Debug)]
pub enum MnistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("bad idx file: {0}")]
    BadIdx(&'static str),

    #[error("idx file truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
}
