//! Variational layers with Gaussian weights.
//!
//! Each weight has a mean and a pre-softplus scale `rho` (`sigma = softplus(rho)`).
//! The forward pass uses the local reparameterization trick: the output mean comes
//! from the weight means, the output variance from `x²` against `sigma²`, and one
//! standard-normal draw per output element is scaled by
//! `ctx.stochasticity * sqrt(variance)`. At stochasticity `0` the layer reduces to
//! its mean network.

use super::classic::{bias_init, conv2d_with_bias, linear_with_bias};
use super::{ConvSpec, softplus};
use crate::context::ForwardContext;
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder, init};

const VARIANCE_FLOOR: f64 = 1e-8;

fn sample(mean: &Tensor, variance: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
    if !ctx.samples_weights() {
        return Ok(mean.clone());
    }
    let std = variance.affine(1.0, VARIANCE_FLOOR)?.sqrt()?;
    let eps = mean.randn_like(0.0, 1.0)?;
    let noise = eps.mul(&std)?.affine(ctx.stochasticity, 0.0)?;
    mean.add(&noise)
}

#[derive(Debug, Clone)]
pub struct VariationalConv2d {
    weight_mean: Tensor,
    weight_rho: Tensor,
    bias_mean: Tensor,
    bias_rho: Tensor,
    spec: ConvSpec,
}

impl VariationalConv2d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        spec: ConvSpec,
        initial_rho: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let shape = (out_channels, in_channels, kernel, kernel);
        Ok(Self {
            weight_mean: vb.get_with_hints(shape, "weight_mean", init::DEFAULT_KAIMING_NORMAL)?,
            weight_rho: vb.get_with_hints(shape, "weight_rho", Init::Const(initial_rho))?,
            bias_mean: vb.get_with_hints(
                out_channels,
                "bias_mean",
                bias_init(in_channels * kernel * kernel),
            )?,
            bias_rho: vb.get_with_hints(out_channels, "bias_rho", Init::Const(initial_rho))?,
            spec,
        })
    }

    /// Output mean and output variance.
    pub fn moments(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let mean = conv2d_with_bias(xs, &self.weight_mean, &self.bias_mean, self.spec)?;
        let weight_var = softplus(&self.weight_rho)?.sqr()?;
        let bias_var = softplus(&self.bias_rho)?.sqr()?;
        let variance = conv2d_with_bias(&xs.sqr()?, &weight_var, &bias_var, self.spec)?;
        Ok((mean, variance))
    }

    pub fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        if !ctx.samples_weights() {
            return conv2d_with_bias(xs, &self.weight_mean, &self.bias_mean, self.spec);
        }
        let (mean, variance) = self.moments(xs)?;
        sample(&mean, &variance, ctx)
    }
}

#[derive(Debug, Clone)]
pub struct VariationalLinear {
    weight_mean: Tensor,
    weight_rho: Tensor,
    bias_mean: Tensor,
    bias_rho: Tensor,
}

impl VariationalLinear {
    pub fn new(
        in_features: usize,
        out_features: usize,
        initial_rho: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let shape = (out_features, in_features);
        Ok(Self {
            weight_mean: vb.get_with_hints(shape, "weight_mean", init::DEFAULT_KAIMING_NORMAL)?,
            weight_rho: vb.get_with_hints(shape, "weight_rho", Init::Const(initial_rho))?,
            bias_mean: vb.get_with_hints(out_features, "bias_mean", bias_init(in_features))?,
            bias_rho: vb.get_with_hints(out_features, "bias_rho", Init::Const(initial_rho))?,
        })
    }

    pub fn moments(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let mean = linear_with_bias(xs, &self.weight_mean, &self.bias_mean)?;
        let weight_var = softplus(&self.weight_rho)?.sqr()?;
        let bias_var = softplus(&self.bias_rho)?.sqr()?;
        let variance = linear_with_bias(&xs.sqr()?, &weight_var, &bias_var)?;
        Ok((mean, variance))
    }

    pub fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        if !ctx.samples_weights() {
            return linear_with_bias(xs, &self.weight_mean, &self.bias_mean);
        }
        let (mean, variance) = self.moments(xs)?;
        sample(&mean, &variance, ctx)
    }

    /// Sampled output together with the unscaled predictive variance.
    pub fn forward_with_variance(
        &self,
        xs: &Tensor,
        ctx: &ForwardContext,
    ) -> Result<(Tensor, Tensor)> {
        let (mean, variance) = self.moments(xs)?;
        let out = sample(&mean, &variance, ctx)?;
        Ok((out, variance))
    }
}
