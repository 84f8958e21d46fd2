//! VGG networks (11/13/16/19) with batch normalization.

use super::{Backbone, BackboneOutput, InputShape};
use crate::context::ForwardContext;
use crate::error::Result;
use crate::layers::{Activation, ActivationPlan, Conv2d, ConvSpec, LayerFactory, Linear};
use candle_core::Tensor;
use candle_nn::{BatchNorm, BatchNormConfig, VarBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VggDepth {
    V11,
    V13,
    V16,
    V19,
}

/// One entry of a VGG configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Item {
    Conv(usize),
    Pool,
}

use Item::{Conv as C, Pool as M};

const VGG11: &[Item] = &[C(64), M, C(128), M, C(256), C(256), M, C(512), C(512), M, C(512), C(512), M];
const VGG13: &[Item] = &[
    C(64), C(64), M, C(128), C(128), M, C(256), C(256), M, C(512), C(512), M, C(512), C(512), M,
];
const VGG16: &[Item] = &[
    C(64), C(64), M, C(128), C(128), M, C(256), C(256), C(256), M, C(512), C(512), C(512), M,
    C(512), C(512), C(512), M,
];
const VGG19: &[Item] = &[
    C(64), C(64), M, C(128), C(128), M, C(256), C(256), C(256), C(256), M, C(512), C(512), C(512),
    C(512), M, C(512), C(512), C(512), C(512), M,
];

impl VggDepth {
    pub const ALL: [VggDepth; 4] = [Self::V11, Self::V13, Self::V16, Self::V19];

    pub fn layers(&self) -> usize {
        match self {
            Self::V11 => 11,
            Self::V13 => 13,
            Self::V16 => 16,
            Self::V19 => 19,
        }
    }

    pub fn from_layers(layers: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.layers() == layers)
    }

    fn config(&self) -> &'static [Item] {
        match self {
            Self::V11 => VGG11,
            Self::V13 => VGG13,
            Self::V16 => VGG16,
            Self::V19 => VGG19,
        }
    }
}

enum Stage {
    Conv {
        conv: Conv2d,
        bn: BatchNorm,
        activation: Activation,
    },
    Pool,
}

pub struct Vgg {
    stages: Vec<Stage>,
    head: Linear,
}

impl Vgg {
    pub fn new(
        depth: VggDepth,
        input: InputShape,
        factory: LayerFactory,
        activations: ActivationPlan,
        vb: VarBuilder,
    ) -> Result<Self> {
        let features = vb.pp("features");
        let mut stages = Vec::new();
        let mut in_channels = input.channels;
        let mut side = input.height.min(input.width);
        let mut conv_index = 0;

        for (i, item) in depth.config().iter().enumerate() {
            match *item {
                Item::Conv(out_channels) => {
                    let vb = features.pp(i.to_string());
                    stages.push(Stage::Conv {
                        conv: factory.conv2d(in_channels, out_channels, 3, ConvSpec::new(1, 1), vb.pp("conv"))?,
                        bn: candle_nn::batch_norm(out_channels, BatchNormConfig::default(), vb.pp("bn"))?,
                        activation: activations.for_layer(conv_index),
                    });
                    in_channels = out_channels;
                    conv_index += 1;
                }
                // Small inputs run out of resolution before the last pool.
                Item::Pool if side >= 2 => {
                    stages.push(Stage::Pool);
                    side /= 2;
                }
                Item::Pool => {}
            }
        }

        Ok(Self {
            stages,
            head: factory.linear(in_channels, input.classes, vb.pp("head"))?,
        })
    }
}

impl Backbone for Vgg {
    fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> candle_core::Result<BackboneOutput> {
        let mut xs = xs.clone();
        for stage in &self.stages {
            xs = match stage {
                Stage::Conv {
                    conv,
                    bn,
                    activation,
                } => {
                    let out = conv.forward(&xs, ctx)?.apply_t(bn, ctx.updates_statistics())?;
                    activation.apply(&out)?
                }
                Stage::Pool => xs.max_pool2d(2)?,
            };
        }
        let pooled = xs.mean((2, 3))?;
        let (logits, variance) = self.head.forward_with_variance(&pooled, ctx)?;
        Ok(BackboneOutput { logits, variance })
    }
}
