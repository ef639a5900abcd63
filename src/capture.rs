//! Still-image preprocessing: turns a photographed digit into the flattened
//! 28x28 image the classifier consumes.
//!
//! The steps mirror the live capture loop: grayscale, crop the region of
//! interest, Otsu threshold, resize, normalise to `[0, 1]`. Photos of ink on
//! paper are inverted first so the digit is bright on a dark background, the
//! way MNIST digits are drawn.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

use crate::error::CaptureError;

/// Side length of the images the bundled model was trained on.
pub const MNIST_SIDE: u32 = 28;

/// Rectangle of a frame treated as the digit image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// Region sampled by the live camera loop on a 1280x720 frame.
    pub const LIVE_CAPTURE: Roi = Roi {
        x: 560,
        y: 160,
        width: 280,
        height: 280,
    };
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Roi {
    type Err = CaptureError;

    /// Parses `x,y,width,height`, or `live` for [`Roi::LIVE_CAPTURE`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("live") {
            return Ok(Roi::LIVE_CAPTURE);
        }
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CaptureError::RoiSyntax(s.to_string()))?;
        match parts[..] {
            [x, y, width, height] => Ok(Roi {
                x,
                y,
                width,
                height,
            }),
            _ => Err(CaptureError::RoiSyntax(s.to_string())),
        }
    }
}

/// Copies `roi` out of `image`, failing if it is empty or does not fit.
pub fn crop(image: &GrayImage, roi: Roi) -> Result<GrayImage, CaptureError> {
    if roi.width == 0 || roi.height == 0 {
        return Err(CaptureError::EmptyRoi);
    }
    let fits_x = roi.x.checked_add(roi.width).is_some_and(|r| r <= image.width());
    let fits_y = roi.y.checked_add(roi.height).is_some_and(|b| b <= image.height());
    if !fits_x || !fits_y {
        return Err(CaptureError::RoiOutOfBounds {
            roi: roi.to_string(),
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image())
}

/// Otsu's method: the level that maximises between-class variance.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    let total = image.width() as f64 * image.height() as f64;
    if total == 0.0 {
        return 0;
    }
    let weighted_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let (mut best_level, mut best_variance) = (0u8, -1.0f64);
    let (mut background, mut background_sum) = (0.0f64, 0.0f64);
    for (level, &count) in histogram.iter().enumerate() {
        background += count as f64;
        if background == 0.0 {
            continue;
        }
        let foreground = total - background;
        if foreground == 0.0 {
            break;
        }
        background_sum += level as f64 * count as f64;
        let mean_b = background_sum / background;
        let mean_f = (weighted_sum - background_sum) / foreground;
        let variance = background * foreground * (mean_b - mean_f).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }
    best_level
}

/// Binary threshold: levels above `level` become 255, the rest 0.
pub fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

pub fn mean_intensity(image: &GrayImage) -> f64 {
    let count = image.width() as f64 * image.height() as f64;
    if count == 0.0 {
        return 0.0;
    }
    image.pixels().map(|p| p[0] as f64).sum::<f64>() / count
}

/// True when the digit is already bright on a dark background.
pub fn is_dark_background(image: &GrayImage) -> bool {
    mean_intensity(image) <= 128.0
}

pub fn resize_to(image: &GrayImage, side: u32) -> GrayImage {
    imageops::resize(image, side, side, FilterType::Triangle)
}

/// Row-major pixels scaled from `0..=255` into `[0, 1]`.
pub fn to_pixels(image: &GrayImage) -> Vec<f64> {
    image.pixels().map(|p| p[0] as f64 / 255.0).collect()
}

pub fn open_image(path: impl AsRef<Path>) -> Result<DynamicImage, CaptureError> {
    Ok(image::open(path)?)
}

/// Preprocessing settings for one still image.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    /// Region to crop; `None` uses the whole frame.
    pub roi: Option<Roi>,
    pub side: u32,
    /// Invert bright-background photos to MNIST polarity.
    pub auto_invert: bool,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            roi: None,
            side: MNIST_SIDE,
            auto_invert: true,
        }
    }
}

impl Preprocessor {
    /// Runs the full pipeline and returns `side * side` pixels in `[0, 1]`.
    pub fn prepare(&self, image: &DynamicImage) -> Result<Vec<f64>, CaptureError> {
        let gray = image.to_luma8();
        let mut region = match self.roi {
            Some(roi) => crop(&gray, roi)?,
            None => gray,
        };
        if region.width() == 0 || region.height() == 0 {
            return Err(CaptureError::EmptyRoi);
        }

        if self.auto_invert && !is_dark_background(&region) {
            debug!(mean = mean_intensity(&region), "inverting bright background");
            imageops::invert(&mut region);
        }

        let level = otsu_threshold(&region);
        let binary = threshold(&region, level);
        let resized = resize_to(&binary, self.side);
        debug!(
            otsu = level,
            width = region.width(),
            height = region.height(),
            side = self.side,
            "preprocessed region"
        );
        Ok(to_pixels(&resized))
    }
}
