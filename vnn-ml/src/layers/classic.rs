//! Point-estimate convolution and linear layers.

use super::ConvSpec;
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder, init};

/// Uniform bias initialization bound `1/sqrt(fan_in)`.
pub(crate) fn bias_init(fan_in: usize) -> Init {
    let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// `conv2d(xs, weight) + bias`, bias broadcast over the spatial dims.
pub(crate) fn conv2d_with_bias(
    xs: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    spec: ConvSpec,
) -> Result<Tensor> {
    let out = xs.conv2d(weight, spec.padding, spec.stride, 1, 1)?;
    let channels = bias.dim(0)?;
    out.broadcast_add(&bias.reshape((1, channels, 1, 1))?)
}

/// `xs · weightᵀ + bias`.
pub(crate) fn linear_with_bias(xs: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
    xs.matmul(&weight.t()?)?.broadcast_add(bias)
}

#[derive(Debug, Clone)]
pub struct ClassicConv2d {
    weight: Tensor,
    bias: Tensor,
    spec: ConvSpec,
}

impl ClassicConv2d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        spec: ConvSpec,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kernel, kernel),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", bias_init(in_channels * kernel * kernel))?;
        Ok(Self { weight, bias, spec })
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        conv2d_with_bias(xs, &self.weight, &self.bias, self.spec)
    }
}

#[derive(Debug, Clone)]
pub struct ClassicLinear {
    weight: Tensor,
    bias: Tensor,
}

impl ClassicLinear {
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_features, in_features),
            "weight",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(out_features, "bias", bias_init(in_features))?;
        Ok(Self { weight, bias })
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        linear_with_bias(xs, &self.weight, &self.bias)
    }
}
