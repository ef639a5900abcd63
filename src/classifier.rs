//! MAP digit estimation under the independent-pixel Bernoulli Naive Bayes model.
//!
//! For every label `j` the score is the log-prior plus, per pixel `i`,
//! `x_i * ln(p[j][i]) + (1 - x_i) * ln(1 - p[j][i])`. Fractional pixels
//! interpolate linearly between the two log terms. The estimate is the label
//! with the greatest score, scanning labels upward with a strict `>` so ties
//! stay with the lowest label.
//!
//! Probabilities of exactly 0 or 1 give `-inf` log terms, which propagate and
//! rule the label out. A log term whose weight is exactly zero is skipped, so
//! `0 * ln(0)` never turns a score into NaN.

use std::fmt;
use std::sync::Arc;

use crate::error::InvalidInputError;
use crate::model::{ClassPriors, ModelStore, PixelLikelihoods, NUM_CLASSES};

/// Estimated digit, always in `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digit(u8);

impl Digit {
    pub fn value(self) -> u8 {
        self.0
    }

    /// The winning label of a score vector from [`scores`], with ties kept
    /// by the lowest label.
    pub fn from_scores(scores: &[f64; NUM_CLASSES]) -> Self {
        Self::from_label(argmax(scores))
    }

    fn from_label(label: usize) -> Self {
        debug_assert!(label < NUM_CLASSES);
        Self(label as u8)
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Digit> for usize {
    fn from(digit: Digit) -> usize {
        digit.0 as usize
    }
}

/// Log of the unnormalised joint probability of `image` under each label.
pub fn scores(
    image: &[f64],
    priors: &ClassPriors,
    likelihoods: &PixelLikelihoods,
) -> Result<[f64; NUM_CLASSES], InvalidInputError> {
    validate(image, likelihoods.pixel_count())?;

    let mut out = [0.0; NUM_CLASSES];
    for (label, score) in out.iter_mut().enumerate() {
        *score = image
            .iter()
            .zip(likelihoods.row(label))
            .fold(priors.get(label).ln(), |acc, (&x, &p)| {
                // Both log terms are summed before joining the running total.
                acc + (weighted_ln(x, p) + weighted_ln(1.0 - x, 1.0 - p))
            });
    }
    Ok(out)
}

/// The maximum-a-posteriori digit for `image`.
pub fn estimate(
    image: &[f64],
    priors: &ClassPriors,
    likelihoods: &PixelLikelihoods,
) -> Result<Digit, InvalidInputError> {
    let scores = scores(image, priors, likelihoods)?;
    Ok(Digit::from_scores(&scores))
}

/// Thresholds every pixel at 1/2 into a new strictly 0/1 image.
pub fn binarize(image: &[f64]) -> Vec<f64> {
    image
        .iter()
        .map(|&x| if x >= 0.5 { 1.0 } else { 0.0 })
        .collect()
}

fn weighted_ln(weight: f64, p: f64) -> f64 {
    if weight == 0.0 {
        0.0
    } else {
        weight * p.ln()
    }
}

// The first label always seeds the maximum, so an all -inf score vector
// still yields label 0.
fn argmax(scores: &[f64; NUM_CLASSES]) -> usize {
    let mut best = 0;
    for (label, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = label;
        }
    }
    best
}

fn validate(image: &[f64], expected: usize) -> Result<(), InvalidInputError> {
    if image.len() != expected {
        return Err(InvalidInputError::LengthMismatch {
            expected,
            found: image.len(),
        });
    }
    match image.iter().position(|x| !(0.0..=1.0).contains(x)) {
        Some(index) => Err(InvalidInputError::PixelOutOfRange {
            index,
            value: image[index],
        }),
        None => Ok(()),
    }
}

/// Shareable handle over a loaded model.
///
/// Cloning is cheap; every clone reads the same tables, so one classifier can
/// be handed to several threads.
#[derive(Debug, Clone)]
pub struct Classifier {
    model: Arc<ModelStore>,
    binarize_input: bool,
}

impl Classifier {
    pub fn new(model: Arc<ModelStore>) -> Self {
        Self {
            model,
            binarize_input: false,
        }
    }

    /// Threshold images at 1/2 before scoring instead of using raw intensities.
    pub fn with_binarize(mut self, binarize_input: bool) -> Self {
        self.binarize_input = binarize_input;
        self
    }

    pub fn model(&self) -> &ModelStore {
        &self.model
    }

    pub fn estimate(&self, image: &[f64]) -> Result<Digit, InvalidInputError> {
        let scores = self.scores(image)?;
        Ok(Digit::from_scores(&scores))
    }

    pub fn scores(&self, image: &[f64]) -> Result<[f64; NUM_CLASSES], InvalidInputError> {
        let (priors, likelihoods) = (self.model.priors(), self.model.likelihoods());
        if self.binarize_input {
            // Range is checked on the raw input, not on the thresholded copy.
            validate(image, likelihoods.pixel_count())?;
            scores(&binarize(image), priors, likelihoods)
        } else {
            scores(image, priors, likelihoods)
        }
    }
}
