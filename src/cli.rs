use std::path::PathBuf;

use burn::optim::AdamConfig;
use clap::Parser;

use crate::training::TrainingConfig;

/// Train a convolutional image classifier from labeled image folders.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Cli {
    /// Training images, one subdirectory per class.
    #[arg(long)]
    pub train_dir: PathBuf,

    /// Test images, one subdirectory per class.
    #[arg(long)]
    pub test_dir: PathBuf,

    /// Number of passes over the training batches.
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Square resolution every image is resized to.
    #[arg(long, default_value_t = 256)]
    pub image_size: usize,

    /// Fraction of the training directory withheld for validation.
    #[arg(long, default_value_t = 0.2)]
    pub validation_fraction: f64,

    /// Seed for the shuffle and for weight initialization.
    #[arg(long, default_value_t = 123)]
    pub seed: u64,

    #[arg(long, default_value_t = 1e-3)]
    pub learning_rate: f64,

    /// Dataloader worker threads.
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    /// Reshuffle training batches every epoch.
    #[arg(long)]
    pub reshuffle: bool,
}

impl Cli {
    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig::new(AdamConfig::new())
            .with_num_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_image_size(self.image_size)
            .with_validation_fraction(self.validation_fraction)
            .with_seed(self.seed)
            .with_learning_rate(self.learning_rate)
            .with_num_workers(self.num_workers)
            .with_reshuffle(self.reshuffle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_run() {
        let cli = Cli::parse_from([
            "image-classifier",
            "--train-dir",
            "Train",
            "--test-dir",
            "Test",
        ]);
        let config = cli.training_config();

        assert_eq!(config.num_epochs, 10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.image_size, 256);
        assert_eq!(config.seed, 123);
        assert!((config.validation_fraction - 0.2).abs() < 1e-12);
        assert!(!config.reshuffle);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "image-classifier",
            "--train-dir",
            "Train",
            "--test-dir",
            "Test",
            "--epochs",
            "3",
            "--image-size",
            "64",
            "--reshuffle",
        ]);
        let config = cli.training_config();

        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.image_size, 64);
        assert!(config.reshuffle);
    }
}
