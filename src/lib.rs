//! Handwritten digit recognition with a pretrained Bernoulli Naive Bayes model.
//!
//! [`model::ModelStore`] holds the class priors and per-pixel likelihoods;
//! [`classifier`] computes the maximum-a-posteriori digit for a flattened
//! image. [`capture`] prepares still photos for the classifier and [`mnist`]
//! measures accuracy on the MNIST test split.

pub mod capture;
pub mod classifier;
pub mod error;
pub mod mnist;
pub mod model;

pub use classifier::{binarize, estimate, scores, Classifier, Digit};
pub use error::{CaptureError, InvalidInputError, MnistError, ModelLoadError, ModelSaveError};
pub use model::{ClassPriors, ModelStore, PixelLikelihoods, NUM_CLASSES};
