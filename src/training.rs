use std::path::Path;
use std::sync::Arc;

use burn::{
    config::Config,
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::{
    data::{ClassificationBatch, ClassificationBatcher},
    dataset::FolderDataset,
    error::{ConfigError, PipelineError, TrainingDivergedError},
    evaluate::{evaluate, num_correct},
    model::{default_layer_plan, ImageClassifier, ModelConfig},
};

/// Loaded images are always RGB.
const CHANNELS: usize = 3;

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 256)]
    pub image_size: usize,
    #[config(default = 0.2)]
    pub validation_fraction: f64,
    #[config(default = 123)]
    pub seed: u64,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 4)]
    pub num_workers: usize,
    /// Reshuffle training batches every epoch instead of keeping the
    /// loader's order.
    #[config(default = "false")]
    pub reshuffle: bool,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_epochs == 0 {
            return Err(ConfigError::ZeroEpochs);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.image_size == 0 {
            return Err(ConfigError::ZeroImageSize);
        }
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(ConfigError::InvalidValidationFraction(
                self.validation_fraction,
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }

        Ok(())
    }
}

/// Aggregate metrics for one epoch over the training batches.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    /// Mean loss and accuracy over the validation batches, when present.
    pub validation: Option<(f64, f64)>,
}

/// Fit the model over the training batches.
///
/// Epochs run strictly in sequence; batch order within an epoch is
/// whatever the loader delivers. Each epoch prints its aggregate metrics
/// and, when a validation loader is given, a forward-only validation pass.
pub fn train<B: AutodiffBackend>(
    mut model: ImageClassifier<B>,
    config: &TrainingConfig,
    dataloader_train: Arc<dyn DataLoader<B, ClassificationBatch<B>>>,
    dataloader_valid: Option<Arc<dyn DataLoader<B::InnerBackend, ClassificationBatch<B::InnerBackend>>>>,
) -> Result<(ImageClassifier<B>, Vec<EpochMetrics>), TrainingDivergedError> {
    let mut optim = config.optimizer.init::<B, ImageClassifier<B>>();
    let num_items = dataloader_train.num_items();
    let mut history = Vec::with_capacity(config.num_epochs);

    for epoch in 1..=config.num_epochs {
        let mut total_loss = 0.0;
        let mut correct = 0;

        for (batch_index, batch) in dataloader_train.iter().enumerate() {
            let batch_size = batch.targets.dims()[0];

            let logits = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.targets.clone());

            let loss_value = loss.clone().into_scalar().elem::<f32>();
            if !loss_value.is_finite() {
                return Err(TrainingDivergedError {
                    epoch,
                    batch: batch_index,
                    loss: loss_value,
                });
            }
            total_loss += loss_value as f64 * batch_size as f64;
            correct += num_correct(logits, batch.targets);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let loss = total_loss / num_items as f64;
        let accuracy = correct as f64 / num_items as f64;

        let validation = dataloader_valid.as_ref().map(|loader| {
            let evaluation = evaluate(&model.valid(), loader.as_ref());
            (evaluation.loss, evaluation.accuracy())
        });

        match validation {
            Some((val_loss, val_accuracy)) => println!(
                "Epoch {epoch}/{} - loss: {loss:.4}, accuracy: {accuracy:.4}, val loss: {val_loss:.4}, val accuracy: {val_accuracy:.4}",
                config.num_epochs
            ),
            None => println!(
                "Epoch {epoch}/{} - loss: {loss:.4}, accuracy: {accuracy:.4}",
                config.num_epochs
            ),
        }

        history.push(EpochMetrics {
            epoch,
            loss,
            accuracy,
            validation,
        });
    }

    Ok((model, history))
}

/// Load both directory trees, fit the stock model, and report test-set
/// metrics: the whole pipeline behind the binary.
pub fn run<B: AutodiffBackend>(
    config: TrainingConfig,
    train_dir: &Path,
    test_dir: &Path,
    device: B::Device,
) -> Result<(), PipelineError> {
    config.validate()?;
    B::seed(config.seed);

    let (train_dataset, valid_dataset) = FolderDataset::split_from_folder(
        train_dir,
        config.image_size,
        config.validation_fraction,
        config.seed,
    )?;
    let test_dataset = FolderDataset::from_folder(test_dir, config.image_size)?;

    let num_classes = train_dataset.num_classes();
    let classes = train_dataset.classes().to_vec();
    log::info!(
        "loaded {} training / {} validation / {} test samples over {num_classes} classes",
        train_dataset.len(),
        valid_dataset.len(),
        test_dataset.len(),
    );

    // The test labels must line up with the model's output width.
    if test_dataset.num_classes() != num_classes {
        return Err(ConfigError::ClassCountMismatch {
            model: num_classes,
            dataset: test_dataset.num_classes(),
        }
        .into());
    }

    let model_config = ModelConfig::new(
        config.image_size,
        CHANNELS,
        num_classes,
        default_layer_plan(num_classes),
    );
    let model = model_config.init::<B>(&device)?;
    log::info!("model has {} parameters", model.num_params());

    let batcher = ClassificationBatcher::new(config.image_size);

    let mut builder = DataLoaderBuilder::new(batcher.clone())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers);
    if config.reshuffle {
        builder = builder.shuffle(config.seed);
    }
    let dataloader_train = builder.build(train_dataset);

    let dataloader_valid: Option<
        Arc<dyn DataLoader<B::InnerBackend, ClassificationBatch<B::InnerBackend>>>,
    > = if valid_dataset.is_empty() {
        None
    } else {
        Some(
            DataLoaderBuilder::new(batcher.clone())
                .batch_size(config.batch_size)
                .num_workers(config.num_workers)
                .build(valid_dataset),
        )
    };

    let (model, _history) = train(model, &config, dataloader_train, dataloader_valid)?;

    let dataloader_test = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(test_dataset);

    let test = evaluate(&model.valid(), dataloader_test.as_ref());
    println!("Test - loss: {:.4}, accuracy: {:.4}", test.loss, test.accuracy());
    print!("{}", test.confusion.report(&classes));

    Ok(())
}
