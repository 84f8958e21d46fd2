//! Two-convolution base networks for MNIST and CIFAR-10.

use super::{Backbone, BackboneOutput, InputShape};
use crate::context::ForwardContext;
use crate::error::{MlError, Result};
use crate::layers::{ActivationPlan, Conv2d, ConvSpec, LayerFactory, Linear};
use candle_core::Tensor;
use candle_nn::VarBuilder;

const KERNEL: usize = 5;
const POOL: usize = 2;

/// Channel and hidden widths of one base network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseWidths {
    pub conv1: usize,
    pub conv2: usize,
    pub hidden: usize,
}

impl BaseWidths {
    pub const MNIST: BaseWidths = BaseWidths {
        conv1: 32,
        conv2: 64,
        hidden: 256,
    };
    pub const CIFAR10: BaseWidths = BaseWidths {
        conv1: 64,
        conv2: 128,
        hidden: 384,
    };
}

/// conv → act → pool → conv → act → pool → fc → act → head.
pub struct BaseNet {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    head: Linear,
    activations: ActivationPlan,
}

fn pooled_side(side: usize) -> Option<usize> {
    let convolved = ConvSpec::default().output_side(side, KERNEL)?;
    (convolved >= POOL).then_some(convolved / POOL)
}

impl BaseNet {
    pub fn new(
        widths: BaseWidths,
        input: InputShape,
        factory: LayerFactory,
        activations: ActivationPlan,
        vb: VarBuilder,
    ) -> Result<Self> {
        let side = |s: usize| pooled_side(s).and_then(pooled_side);
        let (height, width) = match (side(input.height), side(input.width)) {
            (Some(h), Some(w)) if h > 0 && w > 0 => (h, w),
            _ => {
                return Err(MlError::model(format!(
                    "input {}x{} is too small for the base network",
                    input.height, input.width
                )));
            }
        };
        let flat = widths.conv2 * height * width;

        let spec = ConvSpec::default();
        Ok(Self {
            conv1: factory.conv2d(input.channels, widths.conv1, KERNEL, spec, vb.pp("conv1"))?,
            conv2: factory.conv2d(widths.conv1, widths.conv2, KERNEL, spec, vb.pp("conv2"))?,
            fc1: factory.linear(flat, widths.hidden, vb.pp("fc1"))?,
            head: factory.linear(widths.hidden, input.classes, vb.pp("head"))?,
            activations,
        })
    }
}

impl Backbone for BaseNet {
    fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> candle_core::Result<BackboneOutput> {
        let xs = self.conv1.forward(xs, ctx)?;
        let xs = self.activations.for_layer(0).apply(&xs)?.max_pool2d(POOL)?;
        let xs = self.conv2.forward(&xs, ctx)?;
        let xs = self.activations.for_layer(1).apply(&xs)?.max_pool2d(POOL)?;
        let xs = self.fc1.forward(&xs.flatten_from(1)?, ctx)?;
        let xs = self.activations.for_layer(2).apply(&xs)?;
        let (logits, variance) = self.head.forward_with_variance(&xs, ctx)?;
        Ok(BackboneOutput { logits, variance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Parameterization;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(widths: BaseWidths, input: InputShape, p: Parameterization) -> Result<BaseNet> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        BaseNet::new(
            widths,
            input,
            LayerFactory::new(p, 0.2, -5.0),
            ActivationPlan::default(),
            vb,
        )
    }

    #[test]
    fn test_pooled_side() {
        assert_eq!(pooled_side(28).and_then(pooled_side), Some(4));
        assert_eq!(pooled_side(32).and_then(pooled_side), Some(5));
        assert_eq!(pooled_side(8).and_then(pooled_side), None);
    }

    #[test]
    fn test_mnist_logits_shape() {
        let input = InputShape {
            channels: 1,
            height: 28,
            width: 28,
            classes: 10,
        };
        let net = build(BaseWidths::MNIST, input, Parameterization::Classic).unwrap();
        let xs = Tensor::zeros((3, 1, 28, 28), DType::F32, &Device::Cpu).unwrap();
        let out = net.forward(&xs, &ForwardContext::evaluation()).unwrap();
        assert_eq!(out.logits.dims(), &[3, 10]);
        assert!(out.variance.is_none());
    }

    #[test]
    fn test_variational_head_reports_variance() {
        let input = InputShape {
            channels: 3,
            height: 32,
            width: 32,
            classes: 10,
        };
        let net = build(BaseWidths::CIFAR10, input, Parameterization::Variational).unwrap();
        let xs = Tensor::zeros((2, 3, 32, 32), DType::F32, &Device::Cpu).unwrap();
        let out = net.forward(&xs, &ForwardContext::training(1.0)).unwrap();
        assert_eq!(out.variance.unwrap().dims(), &[2, 10]);
    }

    #[test]
    fn test_tiny_input_is_rejected() {
        let input = InputShape {
            channels: 1,
            height: 8,
            width: 8,
            classes: 10,
        };
        assert!(build(BaseWidths::MNIST, input, Parameterization::Classic).is_err());
    }
}
