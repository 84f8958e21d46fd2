//! Parameterized layers: classic, dropout and variational convolution/linear.
//!
//! Architectures never name a concrete family. They ask a [`LayerFactory`] for a
//! [`Conv2d`] or [`Linear`] and the factory picks the family the registry key asked
//! for, so one topology builder serves all three parameterizations.

pub mod activation;
pub mod classic;
pub mod dropout;
pub mod variational;

use crate::context::ForwardContext;
use crate::error::MlError;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use activation::{Activation, ActivationPlan};
pub use classic::{ClassicConv2d, ClassicLinear};
pub use dropout::{DropoutConv2d, DropoutLinear};
pub use variational::{VariationalConv2d, VariationalLinear};

/// How a layer's weights are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameterization {
    /// Point-estimate weights.
    Classic,
    /// Point-estimate weights with dropout on the layer input.
    Dropout,
    /// Gaussian weights sampled with the reparameterization trick.
    Variational,
}

impl Parameterization {
    pub const ALL: [Parameterization; 3] = [Self::Classic, Self::Dropout, Self::Variational];

    /// Token used in registry keys.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Dropout => "dropout",
            Self::Variational => "vnn",
        }
    }
}

impl fmt::Display for Parameterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Parameterization {
    type Err = MlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "classic" => Ok(Self::Classic),
            "dropout" => Ok(Self::Dropout),
            "vnn" | "variational" => Ok(Self::Variational),
            other => Err(MlError::not_found("parameterization", other)),
        }
    }
}

/// Stride and zero padding of a square convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub padding: usize,
    pub stride: usize,
}

impl ConvSpec {
    pub const fn new(padding: usize, stride: usize) -> Self {
        Self { padding, stride }
    }

    /// Output side length for an input side and kernel size.
    pub fn output_side(&self, input: usize, kernel: usize) -> Option<usize> {
        let padded = input + 2 * self.padding;
        padded
            .checked_sub(kernel)
            .map(|span| span / self.stride + 1)
    }
}

impl Default for ConvSpec {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

/// Builds layers of one parameterization family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerFactory {
    pub parameterization: Parameterization,
    /// Drop probability of dropout layers.
    pub dropout: f32,
    /// Initial pre-softplus value of variational standard deviations.
    pub initial_rho: f64,
}

impl LayerFactory {
    pub fn new(parameterization: Parameterization, dropout: f32, initial_rho: f64) -> Self {
        Self {
            parameterization,
            dropout,
            initial_rho,
        }
    }

    pub fn conv2d(
        &self,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        spec: ConvSpec,
        vb: VarBuilder,
    ) -> Result<Conv2d> {
        let conv = match self.parameterization {
            Parameterization::Classic => {
                Conv2d::Classic(ClassicConv2d::new(in_channels, out_channels, kernel, spec, vb)?)
            }
            Parameterization::Dropout => Conv2d::Dropout(DropoutConv2d::new(
                in_channels,
                out_channels,
                kernel,
                spec,
                self.dropout,
                vb,
            )?),
            Parameterization::Variational => Conv2d::Variational(VariationalConv2d::new(
                in_channels,
                out_channels,
                kernel,
                spec,
                self.initial_rho,
                vb,
            )?),
        };
        Ok(conv)
    }

    pub fn linear(&self, in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Linear> {
        let linear = match self.parameterization {
            Parameterization::Classic => {
                Linear::Classic(ClassicLinear::new(in_features, out_features, vb)?)
            }
            Parameterization::Dropout => Linear::Dropout(DropoutLinear::new(
                in_features,
                out_features,
                self.dropout,
                vb,
            )?),
            Parameterization::Variational => Linear::Variational(VariationalLinear::new(
                in_features,
                out_features,
                self.initial_rho,
                vb,
            )?),
        };
        Ok(linear)
    }
}

/// A 2-D convolution of any family.
#[derive(Debug, Clone)]
pub enum Conv2d {
    Classic(ClassicConv2d),
    Dropout(DropoutConv2d),
    Variational(VariationalConv2d),
}

impl Conv2d {
    pub fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        match self {
            Self::Classic(conv) => conv.forward(xs),
            Self::Dropout(conv) => conv.forward(xs, ctx),
            Self::Variational(conv) => conv.forward(xs, ctx),
        }
    }
}

/// A fully connected layer of any family.
#[derive(Debug, Clone)]
pub enum Linear {
    Classic(ClassicLinear),
    Dropout(DropoutLinear),
    Variational(VariationalLinear),
}

impl Linear {
    pub fn forward(&self, xs: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        match self {
            Self::Classic(linear) => linear.forward(xs),
            Self::Dropout(linear) => linear.forward(xs, ctx),
            Self::Variational(linear) => linear.forward(xs, ctx),
        }
    }

    /// Forward pass that also reports the predictive variance of each output.
    ///
    /// Only variational layers carry a variance; the other families return `None`.
    pub fn forward_with_variance(
        &self,
        xs: &Tensor,
        ctx: &ForwardContext,
    ) -> Result<(Tensor, Option<Tensor>)> {
        match self {
            Self::Variational(linear) => {
                let (out, variance) = linear.forward_with_variance(xs, ctx)?;
                Ok((out, Some(variance)))
            }
            other => Ok((other.forward(xs, ctx)?, None)),
        }
    }
}

/// `ln(1 + e^x)`.
pub(crate) fn softplus(xs: &Tensor) -> Result<Tensor> {
    xs.exp()?.affine(1.0, 1.0)?.log()
}
