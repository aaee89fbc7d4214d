//! MobileNetV2-style feature extractor
//!
//! Stem conv (stride 2), a stack of inverted-residual blocks, and a final
//! 1x1 conv widening to the feature width. Activations are ReLU6.
//!
//! The backbone is stored as an ordered list of units so the fine-tuning
//! phase can unfreeze "the last N layers" by position.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

/// One stage of inverted-residual blocks: `[expansion, out_channels, repeats, stride]`
pub type StageSpec = [usize; 4];

/// The standard MobileNetV2 stage table
pub const MOBILENET_V2_STAGES: [StageSpec; 7] = [
    [1, 16, 1, 1],
    [6, 24, 2, 2],
    [6, 32, 3, 2],
    [6, 64, 4, 2],
    [6, 96, 3, 1],
    [6, 160, 3, 2],
    [6, 320, 1, 1],
];

#[derive(Config, Debug)]
pub struct BackboneConfig {
    pub stages: Vec<StageSpec>,

    #[config(default = "3")]
    pub in_channels: usize,

    #[config(default = "32")]
    pub stem_channels: usize,

    /// Channels produced by the final 1x1 conv, i.e. the feature width
    #[config(default = "1280")]
    pub out_channels: usize,

    #[config(default = "1e-3")]
    pub bn_epsilon: f64,
}

impl BackboneConfig {
    /// Full-width MobileNetV2
    pub fn mobilenet_v2() -> Self {
        Self::new(MOBILENET_V2_STAGES.to_vec())
    }

    /// A few thousand parameters; used by tests and quick CPU smoke runs
    pub fn tiny() -> Self {
        Self::new(vec![[1, 8, 1, 1], [2, 16, 2, 2]])
            .with_stem_channels(8)
            .with_out_channels(32)
    }

    /// Number of freezable units: stem, every block, final conv
    pub fn num_units(&self) -> usize {
        2 + self.stages.iter().map(|s| s[2]).sum::<usize>()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let mut layers = Vec::with_capacity(self.num_units());

        layers.push(BackboneLayer::Conv(ConvNormAct::new(
            self.in_channels,
            self.stem_channels,
            3,
            2,
            1,
            true,
            self.bn_epsilon,
            device,
        )));

        let mut channels = self.stem_channels;
        for &[expansion, out_channels, repeats, stride] in &self.stages {
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                layers.push(BackboneLayer::Block(InvertedResidual::new(
                    channels,
                    out_channels,
                    stride,
                    expansion,
                    self.bn_epsilon,
                    device,
                )));
                channels = out_channels;
            }
        }

        layers.push(BackboneLayer::Conv(ConvNormAct::new(
            channels,
            self.out_channels,
            1,
            1,
            1,
            true,
            self.bn_epsilon,
            device,
        )));

        Backbone {
            layers,
            out_channels: self.out_channels,
        }
    }
}

/// Conv2d + BatchNorm, optionally followed by ReLU6
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B, 2>,
    activate: bool,
}

impl<B: Backend> ConvNormAct<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activate: bool,
        bn_epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let norm = BatchNormConfig::new(out_channels)
            .with_epsilon(bn_epsilon)
            .init(device);

        Self {
            conv,
            norm,
            activate,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(self.conv.forward(x));
        if self.activate {
            relu6(x)
        } else {
            x
        }
    }
}

/// Expand (1x1) → depthwise (3x3) → linear projection (1x1), with a skip
/// connection when the block keeps resolution and width.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvNormAct<B>>,
    pub depthwise: ConvNormAct<B>,
    pub project: ConvNormAct<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        bn_epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;
        let expand = (expansion != 1)
            .then(|| ConvNormAct::new(in_channels, hidden, 1, 1, 1, true, bn_epsilon, device));

        Self {
            expand,
            depthwise: ConvNormAct::new(hidden, hidden, 3, stride, hidden, true, bn_epsilon, device),
            project: ConvNormAct::new(hidden, out_channels, 1, 1, 1, false, bn_epsilon, device),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.project.forward(self.depthwise.forward(x));

        if self.use_residual {
            x + input
        } else {
            x
        }
    }
}

/// One freezable unit of the backbone
#[derive(Module, Debug)]
pub enum BackboneLayer<B: Backend> {
    Conv(ConvNormAct<B>),
    Block(InvertedResidual<B>),
}

impl<B: Backend> BackboneLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            BackboneLayer::Conv(layer) => layer.forward(x),
            BackboneLayer::Block(block) => block.forward(x),
        }
    }
}

#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub layers: Vec<BackboneLayer<B>>,
    out_channels: usize,
}

impl<B: Backend> Backbone<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Channel count of the feature map
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clamp(0.0, 6.0)
}
