//! MobileNetV2 feature extractor truncated at `block_6_expand_relu` (output stride 8).

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::{backend::Backend, Tensor};

/// Name of the layer the backbone is cut at; deeper layers are never built.
pub const CUT_POINT: &str = "block_6_expand_relu";

const STEM_FILTERS: usize = 32;
const EXPANSION: usize = 6;
const BN_EPSILON: f64 = 1e-3;

/// (expansion, filters, stride) for blocks 0..=5.
const BLOCKS: [(usize, usize, usize); 6] = [
    (1, 16, 1),
    (EXPANSION, 24, 2),
    (EXPANSION, 24, 1),
    (EXPANSION, 32, 2),
    (EXPANSION, 32, 1),
    (EXPANSION, 32, 1),
];

/// Round `v` to the nearest multiple of `divisor`, never dropping more than 10%.
pub fn make_divisible(v: f32, divisor: usize) -> usize {
    let d = divisor as f32;
    let mut new_v = (((v + d / 2.0) / d).floor() * d).max(d);
    if new_v < 0.9 * v {
        new_v += d;
    }
    new_v as usize
}

#[derive(Debug, Clone)]
pub struct MobileNetV2Config {
    pub in_channels: usize,
    /// Width multiplier.
    pub alpha: f32,
    /// Keras-convention momentum (weight of the old running statistic).
    pub bn_momentum: f64,
}

impl Default for MobileNetV2Config {
    fn default() -> Self {
        Self {
            in_channels: 3,
            alpha: 0.35,
            bn_momentum: 0.9,
        }
    }
}

impl MobileNetV2Config {
    pub fn stem_channels(&self) -> usize {
        make_divisible(STEM_FILTERS as f32 * self.alpha, 8)
    }

    /// Output channels of each inverted residual block 0..=5.
    pub fn block_channels(&self) -> Vec<usize> {
        BLOCKS
            .iter()
            .map(|(_, filters, _)| make_divisible((*filters as f32 * self.alpha).floor(), 8))
            .collect()
    }

    /// Channels of the feature map at the cut point.
    pub fn out_channels(&self) -> usize {
        self.block_channels().last().copied().unwrap_or(0) * EXPANSION
    }

    fn batch_norm<B: Backend>(&self, channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
        // burn weights the new statistic, Keras the old one.
        BatchNormConfig::new(channels)
            .with_epsilon(BN_EPSILON)
            .with_momentum(1.0 - self.bn_momentum)
            .init(device)
    }
}

/// Conv + BN + ReLU6.
#[derive(Module, Debug)]
pub struct ConvBnRelu6<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBnRelu6<B> {
    fn new(
        cfg: &MobileNetV2Config,
        conv: Conv2dConfig,
        channels: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv.with_bias(false).init(device),
            bn: cfg.batch_norm(channels, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        x.clamp(0.0, 6.0)
    }
}

/// Linear bottleneck projection: 1x1 conv + BN, no activation.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBnRelu6<B>>,
    depthwise: ConvBnRelu6<B>,
    project: ConvBn<B>,
    residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        cfg: &MobileNetV2Config,
        in_channels: usize,
        out_channels: usize,
        expansion: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;
        let expand = (expansion != 1).then(|| {
            ConvBnRelu6::new(
                cfg,
                Conv2dConfig::new([in_channels, hidden], [1, 1]),
                hidden,
                device,
            )
        });
        let depthwise = ConvBnRelu6::new(
            cfg,
            Conv2dConfig::new([hidden, hidden], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(hidden),
            hidden,
            device,
        );
        let project = ConvBn {
            conv: Conv2dConfig::new([hidden, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            bn: cfg.batch_norm(out_channels, device),
        };
        Self {
            expand,
            depthwise,
            project,
            residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let Some(expand) = &self.expand {
            x = expand.forward(x);
        }
        let x = self.project.forward(self.depthwise.forward(x));
        if self.residual {
            x + input
        } else {
            x
        }
    }
}

#[derive(Module, Debug)]
pub struct MobileNetV2Backbone<B: Backend> {
    stem: ConvBnRelu6<B>,
    blocks: Vec<InvertedResidual<B>>,
    block6_expand: ConvBnRelu6<B>,
}

impl<B: Backend> MobileNetV2Backbone<B> {
    pub fn new(cfg: &MobileNetV2Config, device: &B::Device) -> Self {
        let stem_channels = cfg.stem_channels();
        let stem = ConvBnRelu6::new(
            cfg,
            Conv2dConfig::new([cfg.in_channels, stem_channels], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
            stem_channels,
            device,
        );

        let mut blocks = Vec::with_capacity(BLOCKS.len());
        let mut in_channels = stem_channels;
        for ((expansion, _, stride), out_channels) in BLOCKS.iter().zip(cfg.block_channels()) {
            blocks.push(InvertedResidual::new(
                cfg,
                in_channels,
                out_channels,
                *expansion,
                *stride,
                device,
            ));
            in_channels = out_channels;
        }

        let expanded = in_channels * EXPANSION;
        let block6_expand = ConvBnRelu6::new(
            cfg,
            Conv2dConfig::new([in_channels, expanded], [1, 1]),
            expanded,
            device,
        );

        Self {
            stem,
            blocks,
            block6_expand,
        }
    }

    /// `[B, C, H, W]` → `[B, out_channels, ceil(H/8), ceil(W/8)]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.block6_expand.forward(x)
    }
}
