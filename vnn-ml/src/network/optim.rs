//! SGD and Adam over named candle variables.
//!
//! Update rules follow the usual PyTorch definitions (momentum with dampening and
//! Nesterov for SGD, bias-corrected moments with optional AMSGrad for Adam) so
//! hyperparameters carry over unchanged. Parameters without a gradient in a step
//! are skipped entirely.

use crate::error::{MlError, Result};
use candle_core::backprop::GradStore;
use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdParams {
    pub lr: f64,
    #[serde(default)]
    pub momentum: f64,
    #[serde(default)]
    pub dampening: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub nesterov: bool,
}

impl Default for SgdParams {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            momentum: 0.9,
            dampening: 0.0,
            weight_decay: 0.0,
            nesterov: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamParams {
    pub lr: f64,
    pub betas: (f64, f64),
    pub eps: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub amsgrad: bool,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-8,
            weight_decay: 0.0,
            amsgrad: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd(SgdParams),
    Adam(AdamParams),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Sgd(SgdParams::default())
    }
}

impl OptimizerConfig {
    /// Build from an optimizer name and the hyperparameters the CLI exposes.
    pub fn from_name(name: &str, lr: f64, momentum: f64, weight_decay: f64) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::Sgd(SgdParams {
                lr,
                momentum,
                weight_decay,
                ..SgdParams::default()
            })),
            "adam" => Ok(Self::Adam(AdamParams {
                lr,
                weight_decay,
                ..AdamParams::default()
            })),
            _ => Err(MlError::not_found("optimizer", name)),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd(p) => p.lr,
            Self::Adam(p) => p.lr,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let lr = self.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(MlError::config(format!("learning rate must be positive, got {lr}")));
        }
        match self {
            Self::Sgd(p) => {
                if p.momentum < 0.0 || p.dampening < 0.0 || p.weight_decay < 0.0 {
                    return Err(MlError::config(
                        "SGD momentum, dampening and weight decay must be non-negative",
                    ));
                }
                if p.nesterov && (p.momentum <= 0.0 || p.dampening != 0.0) {
                    return Err(MlError::config(
                        "Nesterov momentum requires momentum > 0 and zero dampening",
                    ));
                }
            }
            Self::Adam(p) => {
                let (b1, b2) = p.betas;
                if !(0.0..1.0).contains(&b1) || !(0.0..1.0).contains(&b2) {
                    return Err(MlError::config(format!(
                        "Adam betas must be in [0, 1), got ({b1}, {b2})"
                    )));
                }
                if p.eps <= 0.0 || p.weight_decay < 0.0 {
                    return Err(MlError::config(
                        "Adam eps must be positive and weight decay non-negative",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SlotState {
    momentum_buffer: Option<Tensor>,
    exp_avg: Option<Tensor>,
    exp_avg_sq: Option<Tensor>,
    max_exp_avg_sq: Option<Tensor>,
}

#[derive(Debug)]
struct Slot {
    name: String,
    var: Var,
    state: SlotState,
}

/// An optimizer bound to a fixed set of named variables.
#[derive(Debug)]
pub struct ParamOptimizer {
    config: OptimizerConfig,
    slots: Vec<Slot>,
    steps: u64,
    device: Device,
}

impl ParamOptimizer {
    pub fn new(config: OptimizerConfig, vars: Vec<(String, Var)>, device: &Device) -> Result<Self> {
        config.validate()?;
        let mut slots: Vec<Slot> = vars
            .into_iter()
            .map(|(name, var)| Slot {
                name,
                var,
                state: SlotState::default(),
            })
            .collect();
        slots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self {
            config,
            slots,
            steps: 0,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn param_count(&self) -> usize {
        self.slots.len()
    }

    /// Rescale gradients so their global L2 norm is at most `max_norm`.
    /// Returns the norm before clipping.
    pub fn clip_grad_norm(&self, grads: &mut GradStore, max_norm: f64) -> Result<f64> {
        let mut total = 0f64;
        for slot in &self.slots {
            if let Some(grad) = grads.get(slot.var.as_tensor()) {
                total += grad.sqr()?.sum_all()?.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?;
            }
        }
        let norm = total.sqrt();
        if norm > max_norm {
            let scale = max_norm / (norm + 1e-6);
            for slot in &self.slots {
                if let Some(grad) = grads.remove(slot.var.as_tensor()) {
                    grads.insert(slot.var.as_tensor(), grad.affine(scale, 0.0)?);
                }
            }
        }
        Ok(norm)
    }

    /// Apply one update from `grads`.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.steps += 1;
        let step = self.steps;
        let config = self.config;
        for slot in &mut self.slots {
            let Some(grad) = grads.get(slot.var.as_tensor()) else {
                continue;
            };
            let grad = grad.detach();
            let param = slot.var.as_tensor().detach();
            let updated = match config {
                OptimizerConfig::Sgd(p) => sgd_update(&p, &mut slot.state, &param, grad)?,
                OptimizerConfig::Adam(p) => adam_update(&p, &mut slot.state, &param, grad, step)?,
            };
            slot.var.set(&updated)?;
        }
        Ok(())
    }

    /// Optimizer state keyed `<param>.<buffer>`, plus the global `step` counter.
    pub fn state_tensors(&self) -> Result<HashMap<String, Tensor>> {
        let mut tensors = HashMap::new();
        for slot in &self.slots {
            let buffers = [
                ("momentum_buffer", &slot.state.momentum_buffer),
                ("exp_avg", &slot.state.exp_avg),
                ("exp_avg_sq", &slot.state.exp_avg_sq),
                ("max_exp_avg_sq", &slot.state.max_exp_avg_sq),
            ];
            for (suffix, buffer) in buffers {
                if let Some(tensor) = buffer {
                    tensors.insert(format!("{}.{suffix}", slot.name), tensor.clone());
                }
            }
        }
        tensors.insert(
            "step".to_string(),
            Tensor::new(&[self.steps as f64], &self.device)?,
        );
        Ok(tensors)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        candle_core::safetensors::save(&self.state_tensors()?, path)?;
        Ok(())
    }
}

fn sgd_update(p: &SgdParams, state: &mut SlotState, param: &Tensor, grad: Tensor) -> Result<Tensor> {
    let mut grad = grad;
    if p.weight_decay != 0.0 {
        grad = grad.add(&param.affine(p.weight_decay, 0.0)?)?;
    }
    if p.momentum != 0.0 {
        let buffer = match state.momentum_buffer.take() {
            None => grad.clone(),
            Some(buffer) => buffer
                .affine(p.momentum, 0.0)?
                .add(&grad.affine(1.0 - p.dampening, 0.0)?)?,
        };
        grad = if p.nesterov {
            grad.add(&buffer.affine(p.momentum, 0.0)?)?
        } else {
            buffer.clone()
        };
        state.momentum_buffer = Some(buffer);
    }
    Ok(param.sub(&grad.affine(p.lr, 0.0)?)?)
}

fn adam_update(
    p: &AdamParams,
    state: &mut SlotState,
    param: &Tensor,
    grad: Tensor,
    step: u64,
) -> Result<Tensor> {
    let (beta1, beta2) = p.betas;
    let mut grad = grad;
    if p.weight_decay != 0.0 {
        grad = grad.add(&param.affine(p.weight_decay, 0.0)?)?;
    }

    let exp_avg = match state.exp_avg.take() {
        Some(m) => m.affine(beta1, 0.0)?.add(&grad.affine(1.0 - beta1, 0.0)?)?,
        None => grad.affine(1.0 - beta1, 0.0)?,
    };
    let grad_sq = grad.sqr()?;
    let exp_avg_sq = match state.exp_avg_sq.take() {
        Some(v) => v.affine(beta2, 0.0)?.add(&grad_sq.affine(1.0 - beta2, 0.0)?)?,
        None => grad_sq.affine(1.0 - beta2, 0.0)?,
    };

    let exponent = i32::try_from(step).unwrap_or(i32::MAX);
    let bias_correction1 = 1.0 - beta1.powi(exponent);
    let bias_correction2 = 1.0 - beta2.powi(exponent);

    let second_moment = if p.amsgrad {
        let max = match state.max_exp_avg_sq.take() {
            Some(max) => max.maximum(&exp_avg_sq)?,
            None => exp_avg_sq.clone(),
        };
        state.max_exp_avg_sq = Some(max.clone());
        max
    } else {
        exp_avg_sq.clone()
    };

    let denom = second_moment
        .sqrt()?
        .affine(1.0 / bias_correction2.sqrt(), p.eps)?;
    let update = exp_avg.div(&denom)?.affine(p.lr / bias_correction1, 0.0)?;

    state.exp_avg = Some(exp_avg);
    state.exp_avg_sq = Some(exp_avg_sq);
    Ok(param.sub(&update)?)
}
