//! Residual networks (18/34/50/101/152) for small images.
//!
//! The stem is a single stride-1 3×3 convolution and there is no initial max-pool,
//! so 28×28 and 32×32 inputs keep enough resolution for four stages.

use super::{Backbone, BackboneOutput, InputShape};
use crate::context::ForwardContext;
use crate::error::Result;
use crate::layers::{Activation, ActivationPlan, Conv2d, ConvSpec, LayerFactory, Linear};
use candle_core::Tensor;
use candle_nn::{BatchNorm, BatchNormConfig, VarBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResNetDepth {
    R18,
    R34,
    R50,
    R101,
    R152,
}

impl ResNetDepth {
    pub const ALL: [ResNetDepth; 5] = [Self::R18, Self::R34, Self::R50, Self::R101, Self::R152];

    pub fn layers(&self) -> usize {
        match self {
            Self::R18 => 18,
            Self::R34 => 34,
            Self::R50 => 50,
            Self::R101 => 101,
            Self::R152 => 152,
        }
    }

    pub fn from_layers(layers: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.layers() == layers)
    }

    fn blocks(&self) -> [usize; 4] {
        match self {
            Self::R18 => [2, 2, 2, 2],
            Self::R34 | Self::R50 => [3, 4, 6, 3],
            Self::R101 => [3, 4, 23, 3],
            Self::R152 => [3, 8, 36, 3],
        }
    }

    fn bottleneck(&self) -> bool {
        !matches!(self, Self::R18 | Self::R34)
    }
}

fn batch_norm(channels: usize, vb: VarBuilder) -> Result<BatchNorm> {
    Ok(candle_nn::batch_norm(channels, BatchNormConfig::default(), vb)?)
}

/// Convolution followed by batch normalization.
struct ConvBn {
    conv: Conv2d,
    bn: BatchNorm,
}

impl ConvBn {
    fn new(
        factory: &LayerFactory,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        spec: ConvSpec,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            conv: factory.conv2d(in_channels, out_channels, kernel, spec, vb.pp("conv"))?,
            bn: batch_norm(out_channels, vb.pp("bn"))?,
        })
    }

    fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> candle_core::Result<Tensor> {
        self.conv
            .forward(xs, ctx)?
            .apply_t(&self.bn, ctx.updates_statistics())
    }
}

struct ResidualBlock {
    /// Main path; the activation runs between consecutive stages.
    stages: Vec<ConvBn>,
    shortcut: Option<ConvBn>,
    activation: Activation,
}

impl ResidualBlock {
    fn new(
        factory: &LayerFactory,
        in_channels: usize,
        planes: usize,
        stride: usize,
        bottleneck: bool,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let expansion = if bottleneck { 4 } else { 1 };
        let out_channels = planes * expansion;
        let stages = if bottleneck {
            vec![
                ConvBn::new(factory, in_channels, planes, 1, ConvSpec::new(0, 1), vb.pp("0"))?,
                ConvBn::new(factory, planes, planes, 3, ConvSpec::new(1, stride), vb.pp("1"))?,
                ConvBn::new(factory, planes, out_channels, 1, ConvSpec::new(0, 1), vb.pp("2"))?,
            ]
        } else {
            vec![
                ConvBn::new(factory, in_channels, planes, 3, ConvSpec::new(1, stride), vb.pp("0"))?,
                ConvBn::new(factory, planes, planes, 3, ConvSpec::new(1, 1), vb.pp("1"))?,
            ]
        };
        let shortcut = if stride != 1 || in_channels != out_channels {
            Some(ConvBn::new(
                factory,
                in_channels,
                out_channels,
                1,
                ConvSpec::new(0, stride),
                vb.pp("shortcut"),
            )?)
        } else {
            None
        };
        Ok(Self {
            stages,
            shortcut,
            activation,
        })
    }

    fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> candle_core::Result<Tensor> {
        let mut out = xs.clone();
        let last = self.stages.len() - 1;
        for (i, stage) in self.stages.iter().enumerate() {
            out = stage.forward(&out, ctx)?;
            if i < last {
                out = self.activation.apply(&out)?;
            }
        }
        let residual = match &self.shortcut {
            Some(shortcut) => shortcut.forward(xs, ctx)?,
            None => xs.clone(),
        };
        self.activation.apply(&(out + residual)?)
    }
}

pub struct ResNet {
    stem: ConvBn,
    stem_activation: Activation,
    blocks: Vec<ResidualBlock>,
    head: Linear,
}

impl ResNet {
    pub fn new(
        depth: ResNetDepth,
        input: InputShape,
        factory: LayerFactory,
        activations: ActivationPlan,
        vb: VarBuilder,
    ) -> Result<Self> {
        let bottleneck = depth.bottleneck();
        let expansion = if bottleneck { 4 } else { 1 };
        let stem = ConvBn::new(&factory, input.channels, 64, 3, ConvSpec::new(1, 1), vb.pp("stem"))?;

        let mut blocks = Vec::new();
        let mut in_channels = 64;
        for (stage, (count, planes)) in depth.blocks().into_iter().zip([64, 128, 256, 512]).enumerate() {
            let stage_vb = vb.pp(format!("layer{}", stage + 1));
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                let activation = activations.for_layer(blocks.len() + 1);
                blocks.push(ResidualBlock::new(
                    &factory,
                    in_channels,
                    planes,
                    stride,
                    bottleneck,
                    activation,
                    stage_vb.pp(i.to_string()),
                )?);
                in_channels = planes * expansion;
            }
        }

        Ok(Self {
            stem,
            stem_activation: activations.for_layer(0),
            blocks,
            head: factory.linear(512 * expansion, input.classes, vb.pp("head"))?,
        })
    }
}

impl Backbone for ResNet {
    fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> candle_core::Result<BackboneOutput> {
        let mut xs = self.stem_activation.apply(&self.stem.forward(xs, ctx)?)?;
        for block in &self.blocks {
            xs = block.forward(&xs, ctx)?;
        }
        let pooled = xs.mean((2, 3))?;
        let (logits, variance) = self.head.forward_with_variance(&pooled, ctx)?;
        Ok(BackboneOutput { logits, variance })
    }
}
