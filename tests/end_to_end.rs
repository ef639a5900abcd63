use std::sync::Arc;

use digit_scan::capture::{Preprocessor, Roi, MNIST_SIDE};
use digit_scan::{Classifier, ModelLoadError, ModelStore, NUM_CLASSES};
use image::{DynamicImage, GrayImage, Luma};

const PIXELS: usize = (MNIST_SIDE * MNIST_SIDE) as usize;

/// A "1": a vertical stroke down the middle columns of a 28x28 grid.
fn stroke_mask() -> Vec<bool> {
    (0..PIXELS)
        .map(|i| {
            let col = i % MNIST_SIDE as usize;
            (12..16).contains(&col)
        })
        .collect()
}

fn write_model(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let mut likelihoods = vec![vec![0.5; PIXELS]; NUM_CLASSES];
    likelihoods[1] = stroke_mask()
        .into_iter()
        .map(|on| if on { 0.95 } else { 0.05 })
        .collect();
    let model = ModelStore::from_tables(vec![0.1; NUM_CLASSES], likelihoods).unwrap();

    let priors = dir.join("prior_distribution.json");
    let pixels = dir.join("pixel_probabilities.json.gz");
    model.save(&priors, &pixels).unwrap();
    (priors, pixels)
}

#[test]
fn photo_of_a_stroke_is_read_as_one() {
    let dir = tempfile::tempdir().unwrap();
    let (priors, pixels) = write_model(dir.path());
    let classifier = Classifier::new(Arc::new(ModelStore::load(&priors, &pixels).unwrap()));

    // Dark ink on a bright 280x280 page placed at the live-capture region.
    let roi = Roi::LIVE_CAPTURE;
    let frame = GrayImage::from_fn(1280, 720, |x, y| {
        let inside = x >= roi.x && x < roi.x + roi.width && y >= roi.y && y < roi.y + roi.height;
        let col = x.wrapping_sub(roi.x);
        if inside && (120..160).contains(&col) {
            Luma([15])
        } else {
            Luma([240])
        }
    });

    let preprocessor = Preprocessor {
        roi: Some(roi),
        ..Preprocessor::default()
    };
    let image = preprocessor
        .prepare(&DynamicImage::ImageLuma8(frame))
        .unwrap();
    assert_eq!(image.len(), PIXELS);

    let digit = classifier.estimate(&image).unwrap();
    assert_eq!(digit.value(), 1);
    assert_eq!(classifier.clone().with_binarize(true).estimate(&image).unwrap(), digit);
}

#[test]
fn inconsistent_artifacts_never_yield_a_model() {
    let dir = tempfile::tempdir().unwrap();
    let priors = dir.path().join("priors.json");
    let pixels = dir.path().join("pixels.json");
    std::fs::write(&priors, serde_json::to_string(&vec![0.1; NUM_CLASSES]).unwrap()).unwrap();

    let mut rows = vec![vec![0.5; 4]; NUM_CLASSES];
    rows[3] = vec![0.5; 5];
    std::fs::write(&pixels, serde_json::to_string(&rows).unwrap()).unwrap();

    let err = ModelStore::load(&priors, &pixels).unwrap_err();
    assert!(matches!(err, ModelLoadError::PixelCountMismatch { label: 3, .. }));
}

#[test]
fn wrong_sized_image_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (priors, pixels) = write_model(dir.path());
    let classifier = Classifier::new(Arc::new(ModelStore::load(&priors, &pixels).unwrap()));
    assert!(classifier.estimate(&[0.0; 10]).is_err());
}
