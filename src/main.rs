//! digit-scan - recognise handwritten digits with a Naive Bayes model
//!
//! Usage:
//!   digit-scan classify digit.png              # Classify a photo
//!   digit-scan classify frame.png --roi live   # Crop the live-capture region first
//!   digit-scan evaluate --limit 1000           # Accuracy on the MNIST test split
//!   digit-scan inspect                         # Show model dimensions and priors

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use digit_scan::capture::{self, Preprocessor, Roi};
use digit_scan::mnist;
use digit_scan::{Classifier, Digit, ModelStore};

#[derive(Parser)]
#[command(name = "digit-scan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Class prior artifact (JSON, optionally .gz)
    #[arg(
        long,
        global = true,
        env = "DIGIT_SCAN_PRIORS",
        default_value = "data/prior_distribution.json"
    )]
    priors: PathBuf,

    /// Pixel likelihood artifact (JSON, optionally .gz)
    #[arg(
        long,
        global = true,
        env = "DIGIT_SCAN_LIKELIHOODS",
        default_value = "data/pixel_probabilities.json"
    )]
    likelihoods: PathBuf,

    /// Threshold pixels at 1/2 before scoring
    #[arg(long, global = true)]
    binarize: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the digit in an image file
    Classify {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Region of interest as x,y,width,height, or `live`
        #[arg(long)]
        roi: Option<Roi>,

        /// Keep the image polarity instead of inverting bright backgrounds
        #[arg(long)]
        no_invert: bool,

        /// Print the log-score of every label
        #[arg(long)]
        scores: bool,
    },

    /// Measure accuracy on the MNIST test split
    Evaluate {
        /// Where downloaded MNIST files are cached
        #[arg(long, default_value = "training_data")]
        cache_dir: PathBuf,

        /// Only evaluate the first N images
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show model dimensions and class priors
    Inspect,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let model = ModelStore::load(&cli.priors, &cli.likelihoods).with_context(|| {
        format!(
            "loading model from {} and {}",
            cli.priors.display(),
            cli.likelihoods.display()
        )
    })?;
    info!(pixels = model.pixel_count(), "model loaded");
    let classifier = Classifier::new(Arc::new(model)).with_binarize(cli.binarize);

    match cli.command {
        Commands::Classify {
            image,
            roi,
            no_invert,
            scores,
        } => classify(&classifier, image, roi, !no_invert, scores),
        Commands::Evaluate { cache_dir, limit } => evaluate(&classifier, cache_dir, limit),
        Commands::Inspect => {
            inspect(classifier.model());
            Ok(())
        }
    }
}

fn classify(
    classifier: &Classifier,
    path: PathBuf,
    roi: Option<Roi>,
    auto_invert: bool,
    show_scores: bool,
) -> Result<()> {
    info!(path = %path.display(), "loading image");
    let img = capture::open_image(&path).with_context(|| format!("opening {}", path.display()))?;

    let preprocessor = Preprocessor {
        roi,
        auto_invert,
        ..Preprocessor::default()
    };
    let pixels = preprocessor.prepare(&img)?;
    debug!(pixels = pixels.len(), "image prepared");

    let scores = classifier
        .scores(&pixels)
        .context("model and preprocessed image disagree on size")?;
    let digit = Digit::from_scores(&scores);

    if show_scores {
        for (label, score) in scores.iter().enumerate() {
            println!("{label}: {score:.3}");
        }
    }
    println!("Predicted digit for {}: {}", path.display(), digit);
    Ok(())
}

fn evaluate(classifier: &Classifier, cache_dir: PathBuf, limit: Option<usize>) -> Result<()> {
    let (images, labels) =
        mnist::load_test_set(&cache_dir).context("preparing MNIST test split")?;
    info!(images = images.len(), "test split ready");

    let pb = ProgressBar::new(images.len() as u64);
    let eval = mnist::evaluate(classifier, &images, &labels, limit, &pb);

    if eval.rejected > 0 {
        warn!(rejected = eval.rejected, "some images could not be scored");
    }
    println!(
        "Accuracy: {:.2}% ({}/{})",
        100.0 * eval.accuracy(),
        eval.correct,
        eval.total
    );
    println!("Confusion (rows = truth, columns = predicted):");
    for (truth, row) in eval.confusion.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|n| format!("{n:5}")).collect();
        println!("{truth}: {}", cells.join(""));
    }
    Ok(())
}

fn inspect(model: &ModelStore) {
    println!("Pixels per image: {}", model.pixel_count());
    println!("Class priors:");
    for (label, prior) in model.priors().as_slice().iter().enumerate() {
        println!("  {label}: {prior:.6}");
    }
}
