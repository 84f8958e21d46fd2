//! Loss functions over logits and integer class targets.

use crate::error::MlError;
use candle_core::{DType, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PROBABILITY_EPS: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    #[default]
    CrossEntropy,
    /// Mean squared error against one-hot targets.
    Mse,
    /// Binary cross entropy of sigmoid outputs against one-hot targets.
    Bce,
}

impl LossFunction {
    pub const ALL: [LossFunction; 3] = [Self::CrossEntropy, Self::Mse, Self::Bce];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CrossEntropy => "cross_entropy",
            Self::Mse => "mse",
            Self::Bce => "bce",
        }
    }

    /// Scalar loss of `logits` `(N, classes)` against `target` `(N,)`.
    pub fn compute(&self, logits: &Tensor, target: &Tensor) -> Result<Tensor> {
        match self {
            Self::CrossEntropy => {
                candle_nn::loss::cross_entropy(logits, &target.to_dtype(DType::U32)?)
            }
            Self::Mse => candle_nn::loss::mse(logits, &one_hot_like(logits, target)?),
            Self::Bce => {
                let y = one_hot_like(logits, target)?;
                let p = candle_nn::ops::sigmoid(logits)?
                    .clamp(PROBABILITY_EPS, 1.0 - PROBABILITY_EPS)?;
                let positive = y.mul(&p.log()?)?;
                let negative = y.affine(-1.0, 1.0)?.mul(&p.affine(-1.0, 1.0)?.log()?)?;
                positive.add(&negative)?.neg()?.mean_all()
            }
        }
    }
}

/// One-hot encoding of `target` with the dtype and width of `logits`.
fn one_hot_like(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    let classes = logits.dim(1)? as u32;
    let range = Tensor::arange(0u32, classes, logits.device())?.unsqueeze(0)?;
    target
        .to_dtype(DType::U32)?
        .unsqueeze(1)?
        .broadcast_eq(&range)?
        .to_dtype(logits.dtype())
}

impl fmt::Display for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossFunction {
    type Err = MlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|loss| loss.name() == s)
            .ok_or_else(|| MlError::not_found("loss function", s))
    }
}
