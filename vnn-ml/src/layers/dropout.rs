//! Dropout-regularized layers: classic weights, inputs dropped while training or sampling.

use super::ConvSpec;
use super::classic::{ClassicConv2d, ClassicLinear};
use crate::context::ForwardContext;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

fn maybe_drop(xs: &Tensor, p: f32, ctx: &ForwardContext) -> Result<Tensor> {
    if ctx.drops_units() && p > 0.0 {
        candle_nn::ops::dropout(xs, p)
    } else {
        Ok(xs.clone())
    }
}

#[derive(Debug, Clone)]
pub struct DropoutConv2d {
    inner: ClassicConv2d,
    p: f32,
}

impl DropoutConv2d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        spec: ConvSpec,
        p: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            inner: ClassicConv2d::new(in_channels, out_channels, kernel, spec, vb)?,
            p,
        })
    }

    pub fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        self.inner.forward(&maybe_drop(xs, self.p, ctx)?)
    }
}

#[derive(Debug, Clone)]
pub struct DropoutLinear {
    inner: ClassicLinear,
    p: f32,
}

impl DropoutLinear {
    pub fn new(in_features: usize, out_features: usize, p: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            inner: ClassicLinear::new(in_features, out_features, vb)?,
            p,
        })
    }

    pub fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        self.inner.forward(&maybe_drop(xs, self.p, ctx)?)
    }
}
