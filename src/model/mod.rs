//! EEGNet, a compact convolutional classifier for `[channels, samples]` epochs.
//!
//! ```text
//! [1, C, T]
//!   │
//!   ├─ temporal conv     F1 filters of length K, same padding          → [F1, C, T]
//!   ├─ batch norm
//!   ├─ depthwise conv    D spatial filters per map over C, max-norm    → [F1·D, 1, T]
//!   ├─ batch norm, ELU
//!   ├─ average pool      1 × P1                                        → [F1·D, 1, T / P1]
//!   ├─ dropout
//!   ├─ separable conv    depthwise 1 × K2 (same), then pointwise F2    → [F2, 1, T / P1]
//!   ├─ batch norm, ELU
//!   ├─ average pool      1 × P2                                        → [F2, 1, T / P1 / P2]
//!   ├─ dropout
//!   ├─ dense             flattened → 3, max-norm
//!   └─ softmax
//! ```
//!
//! Targets are used as given by the categorical cross-entropy `-Σ yᵢ log pᵢ`, so the
//! non-normalized quadrant vectors of [`crate::labels`] train without rescaling.
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
    PaddingConfig2d,
};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use ndarray::{Array2, Array3, Axis};

use crate::error::Error;

pub mod batch;

pub use batch::{signal_batch, target_batch, to_array};

/// CPU backend used for evaluation and prediction.
pub type InferenceBackend = burn::backend::NdArray<f32>;
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

pub const NUM_OUTPUTS: usize = 3;

// Probabilities are clipped to [EPSILON, 1 - EPSILON] inside the loss
const EPSILON: f64 = 1e-7;

const NORM_EPSILON: f64 = 1e-3;
// Share of the batch statistics blended into the running ones
const NORM_MOMENTUM: f64 = 0.01;

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 8)]
    pub temporal_filters: usize,
    #[config(default = 2)]
    pub depth_multiplier: usize,
    #[config(default = 16)]
    pub separable_filters: usize,
    #[config(default = 64)]
    pub kernel_length: usize,
    #[config(default = 16)]
    pub separable_kernel_length: usize,
    #[config(default = 4)]
    pub pool_length: usize,
    #[config(default = 8)]
    pub separable_pool_length: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Largest L2 norm of each depthwise spatial filter.
    #[config(default = 1.0)]
    pub depthwise_max_norm: f64,
    /// Largest L2 norm of the dense weights feeding each output.
    #[config(default = 0.25)]
    pub dense_max_norm: f64,
}

// Keras-style "same" padding: the extra sample goes to the right
fn same_padding(kernel: usize) -> (usize, usize) {
    (kernel.saturating_sub(1) / 2, kernel / 2)
}

impl ModelConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        let sizes = [
            ("temporal_filters", self.temporal_filters),
            ("depth_multiplier", self.depth_multiplier),
            ("separable_filters", self.separable_filters),
            ("kernel_length", self.kernel_length),
            ("separable_kernel_length", self.separable_kernel_length),
            ("pool_length", self.pool_length),
            ("separable_pool_length", self.separable_pool_length),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(Error::Config(format!("{} must be positive", name)));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!("dropout {} must lie in [0, 1)", self.dropout)));
        }
        if !(self.depthwise_max_norm > 0.0 && self.dense_max_norm > 0.0) {
            return Err(Error::Config("max-norm limits must be positive".to_string()));
        }
        Ok(())
    }

    /// Width of the flattened feature map fed to the dense layer.
    pub fn flattened_features(&self, num_samples: usize) -> usize {
        self.separable_filters * (num_samples / self.pool_length / self.separable_pool_length)
    }

    pub fn init<B: Backend>(
        &self,
        num_channels: usize,
        num_samples: usize,
        device: &B::Device,
    ) -> crate::error::Result<EEGNet<B>> {
        self.validate()?;
        let features = self.flattened_features(num_samples);
        if num_channels == 0 || features == 0 {
            return Err(Error::Shape(format!(
                "cannot fit {} channels x {} samples through pooling of {} x {}",
                num_channels, num_samples, self.pool_length, self.separable_pool_length
            )));
        }

        let maps = self.temporal_filters * self.depth_multiplier;
        let glorot = Initializer::XavierUniform { gain: 1.0 };
        let conv = |channels: [usize; 2], kernel: [usize; 2], groups: usize| {
            Conv2dConfig::new(channels, kernel)
                .with_groups(groups)
                .with_bias(false)
                .with_padding(PaddingConfig2d::Valid)
                .with_initializer(glorot.clone())
        };
        let norm = |features: usize| {
            BatchNormConfig::new(features)
                .with_epsilon(NORM_EPSILON)
                .with_momentum(NORM_MOMENTUM)
        };

        Ok(EEGNet {
            temporal: conv([1, self.temporal_filters], [1, self.kernel_length], 1).init(device),
            temporal_norm: norm(self.temporal_filters).init(device),
            depthwise: conv([self.temporal_filters, maps], [num_channels, 1], self.temporal_filters)
                .init(device),
            depthwise_norm: norm(maps).init(device),
            pool: AvgPool2dConfig::new([1, self.pool_length])
                .with_strides([1, self.pool_length])
                .init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            separable_depthwise: conv([maps, maps], [1, self.separable_kernel_length], maps).init(device),
            separable_pointwise: conv([maps, self.separable_filters], [1, 1], 1).init(device),
            separable_norm: norm(self.separable_filters).init(device),
            separable_pool: AvgPool2dConfig::new([1, self.separable_pool_length])
                .with_strides([1, self.separable_pool_length])
                .init(),
            separable_dropout: DropoutConfig::new(self.dropout).init(),
            dense: LinearConfig::new(features, NUM_OUTPUTS)
                .with_initializer(glorot.clone())
                .init(device),
            num_channels,
            num_samples,
            kernel_length: self.kernel_length,
            separable_kernel_length: self.separable_kernel_length,
        })
    }

    /// One line per layer with its output shape and trainable parameter count.
    pub fn summary(&self, num_channels: usize, num_samples: usize) -> Vec<String> {
        let (f1, f2) = (self.temporal_filters, self.separable_filters);
        let maps = f1 * self.depth_multiplier;
        let t1 = num_samples / self.pool_length.max(1);
        let t2 = t1 / self.separable_pool_length.max(1);
        let features = f2 * t2;
        vec![
            format!("input                [1, {}, {}]", num_channels, num_samples),
            format!(
                "temporal_conv        [{}, {}, {}]  params {}",
                f1,
                num_channels,
                num_samples,
                f1 * self.kernel_length
            ),
            format!("batch_norm           [{}, {}, {}]  params {}", f1, num_channels, num_samples, 2 * f1),
            format!("depthwise_conv       [{}, 1, {}]  params {}", maps, num_samples, maps * num_channels),
            format!("batch_norm, elu      [{}, 1, {}]  params {}", maps, num_samples, 2 * maps),
            format!("average_pool         [{}, 1, {}]", maps, t1),
            format!(
                "separable_conv       [{}, 1, {}]  params {}",
                f2,
                t1,
                maps * self.separable_kernel_length + maps * f2
            ),
            format!("batch_norm, elu      [{}, 1, {}]  params {}", f2, t1, 2 * f2),
            format!("average_pool         [{}, 1, {}]", f2, t2),
            format!("dense, softmax       [{}]  params {}", NUM_OUTPUTS, (features + 1) * NUM_OUTPUTS),
        ]
    }
}

#[derive(Module, Debug)]
pub struct EEGNet<B: Backend> {
    temporal: Conv2d<B>,
    temporal_norm: BatchNorm<B, 2>,
    depthwise: Conv2d<B>,
    depthwise_norm: BatchNorm<B, 2>,
    pool: AvgPool2d,
    dropout: Dropout,
    separable_depthwise: Conv2d<B>,
    separable_pointwise: Conv2d<B>,
    separable_norm: BatchNorm<B, 2>,
    separable_pool: AvgPool2d,
    separable_dropout: Dropout,
    dense: Linear<B>,
    num_channels: usize,
    num_samples: usize,
    kernel_length: usize,
    separable_kernel_length: usize,
}

fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let negative = x.clone().clamp_max(0.0).exp().sub_scalar(1.0);
    x.clamp_min(0.0) + negative
}

/// Rescales the slices of `weight` along `dim` whose L2 norm exceeds `limit`.
pub fn max_norm<B: Backend, const D: usize>(weight: Tensor<B, D>, dim: usize, limit: f64) -> Tensor<B, D> {
    let require_grad = weight.is_require_grad();
    let weight = weight.detach();
    let norms = (weight.clone() * weight.clone()).sum_dim(dim).sqrt();
    let scale = norms.clone().clamp(0.0, limit) / norms.add_scalar(EPSILON);
    (weight * scale).set_require_grad(require_grad)
}

/// Mean categorical cross-entropy `-Σ yᵢ log pᵢ` of a batch.
pub fn cross_entropy<B: Backend>(probabilities: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_p = probabilities.clamp(EPSILON, 1.0 - EPSILON).log();
    (targets * log_p).sum_dim(1).neg().mean()
}

impl<B: Backend> EEGNet<B> {
    pub fn input_shape(&self) -> (usize, usize) {
        (self.num_channels, self.num_samples)
    }

    pub fn check_input(&self, x: &Array3<f32>) -> crate::error::Result<()> {
        let (_, c, t) = x.dim();
        if (c, t) != self.input_shape() {
            return Err(Error::Shape(format!(
                "epochs of {:?} do not match network input {:?}",
                (c, t),
                self.input_shape()
            )));
        }
        Ok(())
    }

    /// `[N, 1, C, T]` → class probabilities `[N, 3]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let (left, right) = same_padding(self.kernel_length);
        let x = self.temporal.forward(x.pad((left, right, 0, 0), 0.0));
        let x = self.temporal_norm.forward(x);
        let x = elu(self.depthwise_norm.forward(self.depthwise.forward(x)));
        let x = self.dropout.forward(self.pool.forward(x));

        let (left, right) = same_padding(self.separable_kernel_length);
        let x = self.separable_depthwise.forward(x.pad((left, right, 0, 0), 0.0));
        let x = elu(self.separable_norm.forward(self.separable_pointwise.forward(x)));
        let x = self.separable_dropout.forward(self.separable_pool.forward(x));

        softmax(self.dense.forward(x.flatten::<2>(1, 3)), 1)
    }

    /// Class probabilities, `[N, C, T]` → `[N, 3]`.
    ///
    /// Dropout and batch statistics follow the backend: call it on the inference copy
    /// of a trained model (`valid()`).
    pub fn predict(&self, x: &Array3<f32>, device: &B::Device) -> crate::error::Result<Array2<f32>> {
        self.check_input(x)?;
        let n = x.len_of(Axis(0));
        if n == 0 {
            return Ok(Array2::zeros((0, NUM_OUTPUTS)));
        }
        let rows = (0..n).collect::<Vec<usize>>();
        to_array(self.forward(signal_batch(x, &rows, device)))
    }

    /// Applies the max-norm constraints after an optimizer step.
    pub fn constrain(mut self, config: &ModelConfig) -> Self {
        let limit = config.depthwise_max_norm;
        // `[F1·D, 1, C, 1]`: one norm per spatial filter, over the channels
        self.depthwise.weight = self.depthwise.weight.map(|w| max_norm(w, 2, limit));
        let limit = config.dense_max_norm;
        // `[features, 3]`: one norm per output
        self.dense.weight = self.dense.weight.map(|w| max_norm(w, 0, limit));
        self
    }
}
