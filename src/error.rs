use std::path::PathBuf;

use thiserror::Error;

/// Error type for dataset discovery and decoding.
///
/// Every variant fires while the dataset is being loaded, before any batch
/// is handed to the trainer.
#[derive(Error, Debug)]
pub enum DataLoadError {
    /// Dataset root is missing or could not be opened.
    #[error("dataset directory `{path}` could not be read: {source}")]
    MissingDirectory {
        /// Root directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// I/O failure while walking the tree.
    #[error("I/O error while scanning `{path}`: {source}")]
    Io {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The root contains no class subdirectories.
    #[error("no class subdirectories found under `{path}`")]
    NoClasses {
        /// Root directory.
        path: PathBuf,
    },

    /// A class subdirectory contains no supported image files.
    #[error("class `{class}` under `{path}` contains no images")]
    EmptyClass {
        /// Class name (subdirectory name).
        class: String,
        /// Root directory.
        path: PathBuf,
    },

    /// An image file could not be decoded.
    #[error("failed to decode image `{path}`: {source}")]
    Decode {
        /// Offending file.
        path: PathBuf,
        /// Underlying decoder error.
        source: image::ImageError,
    },
}

/// Error type for invalid or inconsistent run parameters and layer plans.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Image resolution of zero pixels.
    #[error("image size must be at least 1 pixel")]
    ZeroImageSize,

    /// Channel count of zero.
    #[error("channel count must be at least 1")]
    ZeroChannels,

    /// Classification needs at least two classes.
    #[error("classification requires at least 2 classes, got {0}")]
    TooFewClasses(usize),

    /// A layer was declared with a zero-sized dimension.
    #[error("layer {index} ({kind}) has a zero-sized dimension")]
    ZeroLayerDimension {
        /// Position in the layer plan.
        index: usize,
        /// Layer kind name.
        kind: &'static str,
    },

    /// Dropout probability outside `[0, 1)`.
    #[error("dropout probability must be in [0, 1), got {0}")]
    InvalidDropout(f64),

    /// A convolution or pooling layer shrinks the feature map below 1x1.
    #[error("layer {index} ({kind}) shrinks the {size}x{size} feature map below 1x1")]
    SpatialCollapse {
        /// Position in the layer plan.
        index: usize,
        /// Layer kind name.
        kind: &'static str,
        /// Spatial extent entering the layer.
        size: usize,
    },

    /// A layer was applied to a feature map of the wrong rank.
    #[error("layer {index} ({kind}) cannot be applied to a {found} feature map")]
    RankMismatch {
        /// Position in the layer plan.
        index: usize,
        /// Layer kind name.
        kind: &'static str,
        /// Rank the plan reached at that point.
        found: &'static str,
    },

    /// The plan never flattens its feature map.
    #[error("layer plan must flatten the feature map before producing logits")]
    MissingFlatten,

    /// The plan's final width does not match the class count.
    #[error("final layer must produce {expected} logits, got {found}")]
    OutputWidth {
        /// Class count the model was configured for.
        expected: usize,
        /// Width the plan actually ends with.
        found: usize,
    },

    /// Model output width and dataset label cardinality disagree.
    #[error("model outputs {model} classes but the dataset has {dataset}")]
    ClassCountMismatch {
        /// Model output width.
        model: usize,
        /// Dataset class count.
        dataset: usize,
    },

    /// Batch size of zero.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    /// Epoch count of zero.
    #[error("epoch count must be at least 1")]
    ZeroEpochs,

    /// Worker count of zero.
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// Validation fraction outside `[0, 1)`.
    #[error("validation fraction must be in [0, 1), got {0}")]
    InvalidValidationFraction(f64),

    /// Non-positive or non-finite learning rate.
    #[error("learning rate must be positive and finite, got {0}")]
    InvalidLearningRate(f64),
}

/// Raised when a training batch produces a non-finite loss.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("loss became non-finite ({loss}) at epoch {epoch}, batch {batch}")]
pub struct TrainingDivergedError {
    /// Epoch in which the loss diverged (1-based).
    pub epoch: usize,
    /// Batch index within the epoch (0-based).
    pub batch: usize,
    /// The offending loss value.
    pub loss: f32,
}

/// Top-level pipeline error; the display message names the failing stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Dataset loading failed.
    #[error("data loading failed: {0}")]
    DataLoad(#[from] DataLoadError),

    /// Run parameters or model plan were rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Training diverged.
    #[error("training failed: {0}")]
    Diverged(#[from] TrainingDivergedError),
}
