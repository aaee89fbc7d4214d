//! LeafNet: backbone plus classification head
//!
//! Head: global average pooling → dense(256, relu) → dropout(0.5)
//! → dense(128, relu) → dropout(0.3) → dense(num_classes).
//!
//! `forward` returns logits (cross-entropy applies its own log-softmax);
//! `forward_softmax` returns class probabilities.

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};

use crate::model::backbone::{Backbone, BackboneConfig};

#[derive(Config, Debug)]
pub struct LeafNetConfig {
    pub backbone: BackboneConfig,

    /// Output width, taken from the number of class directories
    pub num_classes: usize,

    #[config(default = "224")]
    pub input_size: usize,

    #[config(default = "256")]
    pub hidden_units: usize,

    #[config(default = "128")]
    pub hidden_units_2: usize,

    #[config(default = "0.5")]
    pub dropout: f64,

    #[config(default = "0.3")]
    pub dropout_2: f64,
}

impl LeafNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeafNet<B> {
        let backbone = self.backbone.init(device);
        let head = ClassifierHead {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dense_1: LinearConfig::new(backbone.out_channels(), self.hidden_units).init(device),
            dropout_1: DropoutConfig::new(self.dropout).init(),
            dense_2: LinearConfig::new(self.hidden_units, self.hidden_units_2).init(device),
            dropout_2: DropoutConfig::new(self.dropout_2).init(),
            output: LinearConfig::new(self.hidden_units_2, self.num_classes).init(device),
            activation: Relu::new(),
        };

        LeafNet { backbone, head }
    }
}

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub dense_1: Linear<B>,
    pub dropout_1: Dropout,
    pub dense_2: Linear<B>,
    pub dropout_2: Dropout,
    pub output: Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    /// `[batch, channels, h, w]` feature map to `[batch, num_classes]` logits
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, _, _] = features.dims();
        let x = self.pool.forward(features).reshape([batch_size, channels]);

        let x = self.dropout_1.forward(self.activation.forward(self.dense_1.forward(x)));
        let x = self.dropout_2.forward(self.activation.forward(self.dense_2.forward(x)));
        self.output.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.output.weight.val().dims()[1]
    }
}

#[derive(Module, Debug)]
pub struct LeafNet<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> LeafNet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }
}

impl<B: AutodiffBackend> LeafNet<B> {
    /// Training forward pass with all but the last `trainable_tail` backbone
    /// layers frozen.
    ///
    /// Frozen layers run on the inner backend: no gradients reach their
    /// parameters and their BatchNorm layers use running statistics. The
    /// trainable tail and the head run with autodiff in training mode.
    pub fn forward_with_frozen_backbone(
        &self,
        images: Tensor<B, 4>,
        trainable_tail: usize,
    ) -> Tensor<B, 2> {
        let layers = &self.backbone.layers;
        let split = layers.len().saturating_sub(trainable_tail);

        let frozen = layers[..split]
            .iter()
            .fold(images.inner(), |x, layer| layer.clone().valid().forward(x));

        let features = layers[split..]
            .iter()
            .fold(Tensor::from_inner(frozen), |x, layer| layer.forward(x));

        self.head.forward(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backbone::BackboneLayer;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn tiny_config(num_classes: usize) -> LeafNetConfig {
        LeafNetConfig::new(BackboneConfig::tiny(), num_classes)
            .with_input_size(32)
            .with_hidden_units(16)
            .with_hidden_units_2(8)
    }

    #[test]
    fn test_default_head_matches_recipe() {
        let config = LeafNetConfig::new(BackboneConfig::mobilenet_v2(), 38);
        assert_eq!(config.input_size, 224);
        assert_eq!(config.hidden_units, 256);
        assert_eq!(config.hidden_units_2, 128);
        assert_eq!(config.dropout, 0.5);
        assert_eq!(config.dropout_2, 0.3);
    }

    #[test]
    fn test_output_width_follows_class_count() {
        let device = Default::default();
        let model = tiny_config(5).init::<TestBackend>(&device);
        assert_eq!(model.num_classes(), 5);

        let input = Tensor::<TestBackend, 4>::zeros([3, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [3, 5]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = tiny_config(4).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::random(
            [2, 3, 32, 32],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let probs = model.forward_softmax(input).into_data().to_vec::<f32>().unwrap();
        for row in probs.chunks(4) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_frozen_backbone_gets_no_gradients() {
        let device = Default::default();
        let model = tiny_config(3).init::<TestAutodiffBackend>(&device);
        let input = Tensor::<TestAutodiffBackend, 4>::ones([2, 3, 32, 32], &device);

        let logits = model.forward_with_frozen_backbone(input, 0);
        let grads = logits.sum().backward();

        let head_weight = model.head.output.weight.val();
        assert!(head_weight.grad(&grads).is_some());

        let BackboneLayer::Conv(stem) = &model.backbone.layers[0] else {
            panic!("stem should be a conv layer");
        };
        assert!(stem.conv.weight.val().grad(&grads).is_none());
    }

    #[test]
    fn test_trainable_tail_gets_gradients() {
        let device = Default::default();
        let model = tiny_config(3).init::<TestAutodiffBackend>(&device);
        let input = Tensor::<TestAutodiffBackend, 4>::ones([2, 3, 32, 32], &device);

        let tail = 1;
        let logits = model.forward_with_frozen_backbone(input, tail);
        let grads = logits.sum().backward();

        let last = model.backbone.layers.last().unwrap();
        let BackboneLayer::Conv(final_conv) = last else {
            panic!("last backbone unit should be a conv layer");
        };
        assert!(final_conv.conv.weight.val().grad(&grads).is_some());
    }
}
