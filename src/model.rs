use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One stage of a network plan.
///
/// A model is described as an explicit ordered list of these instead of a
/// mutate-as-you-go builder; the list is validated as a whole before any
/// weight tensor is allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerSpec {
    /// Square convolution with valid padding, stride 1, relu activation.
    Conv { filters: usize, kernel: usize },
    /// Square max-pooling; stride equals the window.
    Pool { size: usize },
    /// Collapse the spatial feature map into a vector.
    Flatten,
    /// Fully-connected layer, optionally relu-activated.
    Dense { units: usize, relu: bool },
    /// Randomly zero activations during training.
    Dropout { prob: f64 },
}

impl LayerSpec {
    fn kind(&self) -> &'static str {
        match self {
            LayerSpec::Conv { .. } => "conv",
            LayerSpec::Pool { .. } => "pool",
            LayerSpec::Flatten => "flatten",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Dropout { .. } => "dropout",
        }
    }
}

/// The stock topology: three relu convolutions with two pooling stages,
/// a 64-unit hidden layer, light dropout, and a raw-logit output layer.
pub fn default_layer_plan(num_classes: usize) -> Vec<LayerSpec> {
    vec![
        LayerSpec::Conv {
            filters: 32,
            kernel: 3,
        },
        LayerSpec::Pool { size: 2 },
        LayerSpec::Conv {
            filters: 64,
            kernel: 3,
        },
        LayerSpec::Pool { size: 2 },
        LayerSpec::Conv {
            filters: 64,
            kernel: 3,
        },
        LayerSpec::Flatten,
        LayerSpec::Dense {
            units: 64,
            relu: true,
        },
        LayerSpec::Dropout { prob: 0.1 },
        LayerSpec::Dense {
            units: num_classes,
            relu: false,
        },
    ]
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Square input resolution in pixels.
    pub image_size: usize,
    /// Input channel count.
    pub channels: usize,
    /// Number of output classes.
    pub num_classes: usize,
    /// Ordered layer plan.
    pub layers: Vec<LayerSpec>,
}

/// Shape the plan has reached at a given stage.
#[derive(Clone, Copy)]
enum PlanShape {
    Spatial { channels: usize, size: usize },
    Flat { features: usize },
}

impl PlanShape {
    fn name(&self) -> &'static str {
        match self {
            PlanShape::Spatial { .. } => "spatial",
            PlanShape::Flat { .. } => "flattened",
        }
    }
}

impl ModelConfig {
    /// Check the plan without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.walk().map(|_| ())
    }

    /// Thread the input shape through the plan, rejecting plans that a
    /// forward pass could not execute. Returns the final logit width.
    fn walk(&self) -> Result<usize, ConfigError> {
        if self.image_size == 0 {
            return Err(ConfigError::ZeroImageSize);
        }
        if self.channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if self.num_classes < 2 {
            return Err(ConfigError::TooFewClasses(self.num_classes));
        }

        let mut shape = PlanShape::Spatial {
            channels: self.channels,
            size: self.image_size,
        };
        for (index, spec) in self.layers.iter().enumerate() {
            shape = match (spec, shape) {
                (LayerSpec::Conv { filters, kernel }, PlanShape::Spatial { size, .. }) => {
                    if *filters == 0 || *kernel == 0 {
                        return Err(ConfigError::ZeroLayerDimension {
                            index,
                            kind: spec.kind(),
                        });
                    }
                    if size < *kernel {
                        return Err(ConfigError::SpatialCollapse {
                            index,
                            kind: spec.kind(),
                            size,
                        });
                    }
                    PlanShape::Spatial {
                        channels: *filters,
                        size: size - kernel + 1,
                    }
                }
                (LayerSpec::Pool { size: window }, PlanShape::Spatial { channels, size }) => {
                    if *window == 0 {
                        return Err(ConfigError::ZeroLayerDimension {
                            index,
                            kind: spec.kind(),
                        });
                    }
                    if size < *window {
                        return Err(ConfigError::SpatialCollapse {
                            index,
                            kind: spec.kind(),
                            size,
                        });
                    }
                    PlanShape::Spatial {
                        channels,
                        size: size / window,
                    }
                }
                (LayerSpec::Flatten, PlanShape::Spatial { channels, size }) => PlanShape::Flat {
                    features: channels * size * size,
                },
                (LayerSpec::Dense { units, .. }, PlanShape::Flat { .. }) => {
                    if *units == 0 {
                        return Err(ConfigError::ZeroLayerDimension {
                            index,
                            kind: spec.kind(),
                        });
                    }
                    PlanShape::Flat { features: *units }
                }
                (LayerSpec::Dropout { prob }, shape) => {
                    if !(0.0..1.0).contains(prob) {
                        return Err(ConfigError::InvalidDropout(*prob));
                    }
                    shape
                }
                (spec, shape) => {
                    return Err(ConfigError::RankMismatch {
                        index,
                        kind: spec.kind(),
                        found: shape.name(),
                    })
                }
            };
        }

        match shape {
            PlanShape::Flat { features } if features == self.num_classes => Ok(features),
            PlanShape::Flat { features } => Err(ConfigError::OutputWidth {
                expected: self.num_classes,
                found: features,
            }),
            PlanShape::Spatial { .. } => Err(ConfigError::MissingFlatten),
        }
    }

    /// Validate the plan and materialize the model on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ImageClassifier<B>, ConfigError> {
        self.validate()?;

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut channels = self.channels;
        let mut size = self.image_size;
        let mut features = 0;

        for spec in &self.layers {
            match spec {
                LayerSpec::Conv { filters, kernel } => {
                    let conv =
                        Conv2dConfig::new([channels, *filters], [*kernel, *kernel]).init(device);
                    layers.push(Layer::Conv(ConvBlock {
                        conv,
                        activation: Relu::new(),
                    }));
                    size = size - kernel + 1;
                    channels = *filters;
                }
                LayerSpec::Pool { size: window } => {
                    layers.push(Layer::Pool(
                        MaxPool2dConfig::new([*window, *window])
                            .with_strides([*window, *window])
                            .init(),
                    ));
                    size /= window;
                }
                LayerSpec::Flatten => {
                    features = channels * size * size;
                    layers.push(Layer::Flatten(Flatten));
                }
                LayerSpec::Dense { units, relu } => {
                    let linear = LinearConfig::new(features, *units).init(device);
                    layers.push(Layer::Dense(DenseBlock {
                        linear,
                        activation: relu.then(Relu::new),
                    }));
                    features = *units;
                }
                LayerSpec::Dropout { prob } => {
                    layers.push(Layer::Dropout(DropoutConfig::new(*prob).init()));
                }
            }
        }

        Ok(ImageClassifier { layers })
    }
}

/// Marker stage that reshapes the spatial feature map into a vector.
#[derive(Module, Clone, Debug, Default)]
pub struct Flatten;

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.forward(self.conv.forward(input))
    }
}

#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    activation: Option<Relu>,
}

impl<B: Backend> DenseBlock<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = self.linear.forward(input);
        match &self.activation {
            Some(activation) => activation.forward(output),
            None => output,
        }
    }
}

/// A built network stage, one per plan entry.
#[derive(Module, Debug)]
pub enum Layer<B: Backend> {
    Conv(ConvBlock<B>),
    Pool(MaxPool2d),
    Flatten(Flatten),
    Dense(DenseBlock<B>),
    Dropout(Dropout),
}

/// Feature map threaded through the plan by the forward evaluator.
enum FeatureMap<B: Backend> {
    Spatial(Tensor<B, 4>),
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Layer<B> {
    fn forward(&self, input: FeatureMap<B>) -> FeatureMap<B> {
        match (self, input) {
            (Layer::Conv(block), FeatureMap::Spatial(x)) => FeatureMap::Spatial(block.forward(x)),
            (Layer::Pool(pool), FeatureMap::Spatial(x)) => FeatureMap::Spatial(pool.forward(x)),
            (Layer::Flatten(_), FeatureMap::Spatial(x)) => FeatureMap::Flat(x.flatten(1, 3)),
            (Layer::Dense(block), FeatureMap::Flat(x)) => FeatureMap::Flat(block.forward(x)),
            (Layer::Dropout(dropout), FeatureMap::Flat(x)) => FeatureMap::Flat(dropout.forward(x)),
            (Layer::Dropout(dropout), FeatureMap::Spatial(x)) => {
                FeatureMap::Spatial(dropout.forward(x))
            }
            _ => panic!("layer applied to a feature map of the wrong rank"),
        }
    }
}

/// Feed-forward image classifier over an explicit layer sequence.
///
/// The model owns its weights; nothing here touches global state.
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    layers: Vec<Layer<B>>,
}

impl<B: Backend> ImageClassifier<B> {
    /// Produce raw class scores for a `[batch, channels, size, size]` input.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut features = FeatureMap::Spatial(images);
        for layer in &self.layers {
            features = layer.forward(features);
        }

        match features {
            FeatureMap::Flat(logits) => logits,
            FeatureMap::Spatial(_) => panic!("layer plan did not flatten the feature map"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    fn config(image_size: usize, num_classes: usize) -> ModelConfig {
        ModelConfig::new(
            image_size,
            3,
            num_classes,
            default_layer_plan(num_classes),
        )
    }

    #[test]
    fn logits_match_batch_and_class_count() {
        let device = NdArrayDevice::Cpu;
        let model = config(32, 4).init::<NdArray>(&device).unwrap();

        for batch_size in [1, 5] {
            let images = Tensor::zeros([batch_size, 3, 32, 32], &device);
            assert_eq!(model.forward(images).dims(), [batch_size, 4]);
        }
    }

    #[test]
    fn single_class_is_rejected() {
        assert_eq!(
            config(32, 1).validate(),
            Err(ConfigError::TooFewClasses(1))
        );
    }

    #[test]
    fn zero_image_size_is_rejected() {
        assert_eq!(config(0, 4).validate(), Err(ConfigError::ZeroImageSize));
    }

    #[test]
    fn plan_that_exhausts_the_feature_map_is_rejected() {
        // 4 -> conv3 -> 2 -> pool2 -> 1, then another 3x3 conv cannot fit.
        assert_eq!(
            config(4, 4).validate(),
            Err(ConfigError::SpatialCollapse {
                index: 2,
                kind: "conv",
                size: 1
            })
        );
    }

    #[test]
    fn dense_before_flatten_is_rejected() {
        let config = ModelConfig::new(
            8,
            3,
            2,
            vec![LayerSpec::Dense {
                units: 2,
                relu: false,
            }],
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::RankMismatch {
                index: 0,
                kind: "dense",
                found: "spatial"
            })
        );
    }

    #[test]
    fn conv_after_flatten_is_rejected() {
        let config = ModelConfig::new(
            8,
            3,
            2,
            vec![
                LayerSpec::Flatten,
                LayerSpec::Conv {
                    filters: 8,
                    kernel: 3,
                },
            ],
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::RankMismatch {
                index: 1,
                kind: "conv",
                found: "flattened"
            })
        );
    }

    #[test]
    fn saturated_dropout_is_rejected() {
        let config = ModelConfig::new(
            8,
            3,
            2,
            vec![
                LayerSpec::Flatten,
                LayerSpec::Dropout { prob: 1.0 },
                LayerSpec::Dense {
                    units: 2,
                    relu: false,
                },
            ],
        );
        assert_eq!(config.validate(), Err(ConfigError::InvalidDropout(1.0)));
    }

    #[test]
    fn output_width_must_match_class_count() {
        let config = ModelConfig::new(
            8,
            3,
            4,
            vec![
                LayerSpec::Flatten,
                LayerSpec::Dense {
                    units: 3,
                    relu: false,
                },
            ],
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutputWidth {
                expected: 4,
                found: 3
            })
        );
    }

    #[test]
    fn plan_without_flatten_is_rejected() {
        let config = ModelConfig::new(
            8,
            3,
            2,
            vec![LayerSpec::Conv {
                filters: 8,
                kernel: 3,
            }],
        );
        assert_eq!(config.validate(), Err(ConfigError::MissingFlatten));
    }
}
