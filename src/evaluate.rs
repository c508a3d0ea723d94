use std::fmt::Write as _;

use burn::{
    data::dataloader::DataLoader,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};

use crate::{data::ClassificationBatch, model::ImageClassifier};

/// Count of samples whose top-scoring class equals the label.
pub(crate) fn num_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> i64 {
    let [batch_size, _num_classes] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);

    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>()
}

/// Class-by-class tally of actual labels against predicted labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    // Row-major, actual * num_classes + predicted.
    counts: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub fn record(&mut self, actual: usize, predicted: usize) {
        self.counts[actual * self.num_classes + predicted] += 1;
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Total number of samples recorded.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Samples on the diagonal.
    pub fn correct(&self) -> usize {
        (0..self.num_classes)
            .map(|class| self.counts[class * self.num_classes + class])
            .sum()
    }

    /// Top-1 accuracy, `correct / total`; 0 when nothing was recorded.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.correct() as f64 / total as f64
    }

    /// Number of samples whose actual label is `class`.
    pub fn support(&self, class: usize) -> usize {
        (0..self.num_classes)
            .map(|predicted| self.counts[class * self.num_classes + predicted])
            .sum()
    }

    fn predicted(&self, class: usize) -> usize {
        (0..self.num_classes)
            .map(|actual| self.counts[actual * self.num_classes + class])
            .sum()
    }

    pub fn precision(&self, class: usize) -> f64 {
        let predicted = self.predicted(class);
        if predicted == 0 {
            return 0.0;
        }
        self.counts[class * self.num_classes + class] as f64 / predicted as f64
    }

    pub fn recall(&self, class: usize) -> f64 {
        let support = self.support(class);
        if support == 0 {
            return 0.0;
        }
        self.counts[class * self.num_classes + class] as f64 / support as f64
    }

    pub fn f1(&self, class: usize) -> f64 {
        let precision = self.precision(class);
        let recall = self.recall(class);
        if precision + recall == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / (precision + recall)
    }

    /// Render per-class precision/recall/F1/support, one line per class.
    pub fn report(&self, classes: &[String]) -> String {
        let width = classes.iter().map(|name| name.len()).max().unwrap_or(0);
        let mut out = String::new();
        for (class, name) in classes.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {name:<width$}  precision {:.4}  recall {:.4}  f1 {:.4}  support {}",
                self.precision(class),
                self.recall(class),
                self.f1(class),
                self.support(class),
            );
        }
        out
    }
}

/// Outcome of a forward-only pass over a batch sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Sample-weighted mean loss.
    pub loss: f64,
    /// Actual-versus-predicted tally for the whole sequence.
    pub confusion: ConfusionMatrix,
}

impl Evaluation {
    /// Top-1 accuracy over the whole sequence.
    pub fn accuracy(&self) -> f64 {
        self.confusion.accuracy()
    }
}

/// Run the model over every batch without touching its weights.
///
/// Call with the inner-backend model (`model.valid()`) so no gradient
/// graph is built and dropout stays inert.
pub fn evaluate<B: Backend>(
    model: &ImageClassifier<B>,
    loader: &dyn DataLoader<B, ClassificationBatch<B>>,
) -> Evaluation {
    let mut total_loss = 0.0;
    let mut confusion: Option<ConfusionMatrix> = None;

    for batch in loader.iter() {
        let logits = model.forward(batch.images);
        let [batch_size, num_classes] = logits.dims();

        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets.clone());
        total_loss += loss.into_scalar().elem::<f32>() as f64 * batch_size as f64;

        let predictions: Vec<i64> = logits
            .argmax(1)
            .reshape([batch_size])
            .into_data()
            .convert::<i64>()
            .to_vec()
            .expect("argmax output should convert to a vector of class ids");
        let targets: Vec<i64> = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec()
            .expect("targets should convert to a vector of class ids");

        let matrix = confusion.get_or_insert_with(|| ConfusionMatrix::new(num_classes));
        for (actual, predicted) in targets.iter().zip(&predictions) {
            matrix.record(*actual as usize, *predicted as usize);
        }
    }

    let confusion = confusion.unwrap_or_else(|| ConfusionMatrix::new(0));
    let total = confusion.total();
    let loss = if total == 0 {
        0.0
    } else {
        total_loss / total as f64
    };

    Evaluation { loss, confusion }
}
