//! The model contract every registry entry satisfies.
//!
//! Training and evaluation code only ever talks to a [`Network`]: one training
//! step, one evaluation step, persistence and an uncertainty query. Whether the
//! weights are point estimates, dropout-regularized or variational is decided when
//! the registry builds the instance and is invisible from here.

pub mod loss;
pub mod model;
pub mod optim;
pub mod uncertainty;

use crate::context::ForwardContext;
use crate::error::{MlError, Result};
use candle_core::{D, DType, Device, Tensor};
use std::path::Path;

pub use loss::LossFunction;
pub use model::CandleNetwork;
pub use optim::{AdamParams, OptimizerConfig, ParamOptimizer, SgdParams};
pub use uncertainty::{MeanStdMetric, monte_carlo};

/// Parameter blob inside a model directory.
pub const MODEL_FILE: &str = "model.safetensors";
/// Optimizer state blob inside a model directory.
pub const OPTIMIZER_FILE: &str = "optimizer.safetensors";

/// Monte-Carlo repeats used when none are requested.
pub const DEFAULT_MC_REPEATS: usize = 10;

/// One mini-batch: `(N, C, H, W)` f32 images and `(N,)` u32 class labels.
#[derive(Debug, Clone)]
pub struct Batch {
    pub input: Tensor,
    pub target: Tensor,
}

impl Batch {
    pub fn new(input: Tensor, target: Tensor) -> Self {
        Self { input, target }
    }

    /// Number of examples actually present.
    pub fn len(&self) -> usize {
        self.target.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_device(&self, device: &Device) -> Result<Batch> {
        Ok(Self {
            input: self.input.to_device(device)?,
            target: self.target.to_device(device)?,
        })
    }
}

/// Result of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f32,
    pub correct: Option<usize>,
}

/// Result of one evaluation step. `loss` is `None` when no loss function is bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalOutput {
    pub loss: Option<f32>,
    pub correct: Option<usize>,
}

/// Counts correct predictions given logits and targets.
pub type CorrectCounter = fn(&Tensor, &Tensor) -> Result<usize>;

/// Number of rows whose arg-max matches the target label.
pub fn correct_count(logits: &Tensor, target: &Tensor) -> Result<usize> {
    let predicted = logits.argmax_keepdim(D::Minus1)?;
    let target = target.to_dtype(DType::U32)?.reshape(predicted.shape())?;
    let correct = predicted
        .eq(&target)?
        .to_dtype(DType::U32)?
        .sum_all()?
        .to_scalar::<u32>()?;
    Ok(correct as usize)
}

/// How to quantify predictive uncertainty.
#[derive(Debug, Clone, Copy)]
pub enum UncertaintyMethod<'a> {
    /// The value cached by the last forward pass of a variational head.
    UncertaintyLayer,
    /// Repeated stochastic forward passes over one input.
    MonteCarlo { input: &'a Tensor, repeats: usize },
}

impl<'a> UncertaintyMethod<'a> {
    /// Resolve a method name. `input` is required for `monte-carlo`.
    pub fn from_name(
        name: &str,
        input: Option<&'a Tensor>,
        repeats: Option<usize>,
    ) -> Result<Self> {
        match name {
            "uncertainty_layer" => Ok(Self::UncertaintyLayer),
            "monte-carlo" => {
                let input = input.ok_or_else(|| {
                    MlError::config("monte-carlo uncertainty needs an input tensor")
                })?;
                Ok(Self::MonteCarlo {
                    input,
                    repeats: repeats.unwrap_or(DEFAULT_MC_REPEATS),
                })
            }
            other => Err(MlError::not_found("uncertainty method", other)),
        }
    }
}

/// Answer of an uncertainty query.
#[derive(Debug, Clone)]
pub enum Uncertainty {
    Cached(f64),
    MeanStd { mean: Tensor, std: Tensor },
}

/// Uniform train/eval/persist/uncertainty interface of a model instance.
pub trait Network {
    /// Bind an optimizer over the trainable parameters, the loss and an optional
    /// gradient-norm ceiling.
    fn prepare_train(
        &mut self,
        optimizer: &OptimizerConfig,
        loss: LossFunction,
        clip_grad: Option<f64>,
    ) -> Result<()>;

    /// Forward, loss, backward, optional clipping and one optimizer step.
    fn train_step(
        &mut self,
        batch: &Batch,
        ctx: &ForwardContext,
        counter: Option<CorrectCounter>,
    ) -> Result<StepOutput>;

    /// Forward only; parameters are left untouched.
    fn eval_step(
        &mut self,
        batch: &Batch,
        ctx: &ForwardContext,
        counter: Option<CorrectCounter>,
    ) -> Result<EvalOutput>;

    /// Write parameter and optimizer state into `dir`, creating it.
    fn save(&self, dir: &Path) -> Result<()>;

    /// Restore parameter state from `dir` onto this instance's device.
    fn load(&mut self, dir: &Path) -> Result<()>;

    fn uncertainty(
        &mut self,
        method: UncertaintyMethod<'_>,
        ctx: &ForwardContext,
    ) -> Result<Uncertainty>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// Stochasticity for training steps when no annealing is configured.
    fn default_stochasticity(&self) -> f64;

    fn device(&self) -> &Device;
}

/// Parse `cpu`, `cuda` or `cuda:<n>`, falling back to the CPU without CUDA.
pub fn parse_device(spec: &str) -> Result<Device> {
    let ordinal = match spec.trim() {
        "cpu" => return Ok(Device::Cpu),
        "cuda" => 0,
        other => other
            .strip_prefix("cuda:")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| MlError::not_found("device", other))?,
    };
    let device = Device::cuda_if_available(ordinal)?;
    if device.is_cpu() {
        tracing::warn!(requested = spec, "CUDA unavailable, falling back to CPU");
    }
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_count() {
        let logits = Tensor::new(
            &[[0.1f32, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5], [0.6, 0.3, 0.1]],
            &Device::Cpu,
        )
        .unwrap();
        let target = Tensor::new(&[1u32, 0, 1, 0], &Device::Cpu).unwrap();
        assert_eq!(correct_count(&logits, &target).unwrap(), 3);
    }

    #[test]
    fn test_correct_count_beyond_u8() {
        let logits = Tensor::zeros((300, 2), DType::F32, &Device::Cpu).unwrap();
        let target = Tensor::zeros(300, DType::U32, &Device::Cpu).unwrap();
        assert_eq!(correct_count(&logits, &target).unwrap(), 300);
    }

    #[test]
    fn test_uncertainty_method_names() {
        let input = Tensor::zeros((1, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            UncertaintyMethod::from_name("uncertainty_layer", None, None).unwrap(),
            UncertaintyMethod::UncertaintyLayer
        ));
        assert!(matches!(
            UncertaintyMethod::from_name("monte-carlo", Some(&input), None).unwrap(),
            UncertaintyMethod::MonteCarlo { repeats: 10, .. }
        ));
        let err = UncertaintyMethod::from_name("entropy", Some(&input), None).unwrap_err();
        assert_eq!(err.to_string(), "No such uncertainty method: entropy");
    }

    #[test]
    fn test_parse_device() {
        assert!(parse_device("cpu").unwrap().is_cpu());
        assert!(parse_device("tpu").is_err());
        assert!(parse_device("cuda:x").is_err());
    }

    #[test]
    fn test_batch_len() {
        let batch = Batch::new(
            Tensor::zeros((5, 1, 2, 2), DType::F32, &Device::Cpu).unwrap(),
            Tensor::zeros(5, DType::U32, &Device::Cpu).unwrap(),
        );
        assert_eq!(batch.len(), 5);
        assert!(!batch.is_empty());
    }
}
