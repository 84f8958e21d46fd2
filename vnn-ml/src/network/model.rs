//! [`Network`] implementation over a candle variable map and a registry backbone.

use super::{
    Batch, CorrectCounter, EvalOutput, LossFunction, MODEL_FILE, Network, OPTIMIZER_FILE,
    OptimizerConfig, ParamOptimizer, StepOutput, Uncertainty, UncertaintyMethod, monte_carlo,
};
use crate::context::ForwardContext;
use crate::error::{MlError, Result};
use crate::zoo::{Backbone, NetworkKind};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use std::collections::BTreeMap;
use std::path::Path;

/// Batch-norm running statistics live in the variable map but are not trained.
fn is_trainable(name: &str) -> bool {
    !(name.ends_with("running_mean") || name.ends_with("running_var"))
}

pub struct CandleNetwork {
    kind: NetworkKind,
    varmap: VarMap,
    backbone: Box<dyn Backbone>,
    device: Device,
    optimizer: Option<ParamOptimizer>,
    loss: Option<LossFunction>,
    clip_grad: Option<f64>,
    training: bool,
    default_stochasticity: f64,
    uncertainty_value: Option<f64>,
}

impl CandleNetwork {
    pub fn new(
        kind: NetworkKind,
        varmap: VarMap,
        backbone: Box<dyn Backbone>,
        device: Device,
        default_stochasticity: f64,
    ) -> Self {
        Self {
            kind,
            varmap,
            backbone,
            device,
            optimizer: None,
            loss: None,
            clip_grad: None,
            training: true,
            default_stochasticity,
            uncertainty_value: None,
        }
    }

    pub fn kind(&self) -> NetworkKind {
        self.kind
    }

    pub fn var_map(&self) -> &VarMap {
        &self.varmap
    }

    fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| MlError::model("variable map lock poisoned"))?;
        Ok(data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect())
    }

    /// Number of trainable scalars.
    pub fn parameter_count(&self) -> Result<usize> {
        Ok(self
            .named_vars()?
            .iter()
            .filter(|(name, _)| is_trainable(name))
            .map(|(_, var)| var.elem_count())
            .sum())
    }

    /// Copy of every variable, keyed by name.
    pub fn parameter_snapshot(&self) -> Result<BTreeMap<String, Vec<f32>>> {
        self.named_vars()?
            .into_iter()
            .map(|(name, var)| {
                let values = var
                    .as_tensor()
                    .flatten_all()?
                    .to_dtype(DType::F32)?
                    .to_vec1::<f32>()?;
                Ok((name, values))
            })
            .collect()
    }

    /// Forward pass returning logits; caches the head variance when there is one.
    pub fn forward(&mut self, xs: &Tensor, ctx: &ForwardContext) -> Result<Tensor> {
        let out = self.backbone.forward(xs, ctx)?;
        if let Some(variance) = out.variance {
            let value = variance.mean_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
            self.uncertainty_value = Some(value);
        }
        Ok(out.logits)
    }

    /// Context a step actually runs with: inference mode overrides the caller.
    fn step_context(&self, ctx: &ForwardContext) -> ForwardContext {
        if self.training {
            *ctx
        } else {
            ForwardContext::evaluation()
        }
    }
}

impl Network for CandleNetwork {
    fn prepare_train(
        &mut self,
        optimizer: &OptimizerConfig,
        loss: LossFunction,
        clip_grad: Option<f64>,
    ) -> Result<()> {
        if let Some(max) = clip_grad.filter(|max| !(max.is_finite() && *max > 0.0)) {
            return Err(MlError::config(format!("clip_grad must be positive, got {max}")));
        }
        let vars = self
            .named_vars()?
            .into_iter()
            .filter(|(name, _)| is_trainable(name))
            .collect();
        let optimizer = ParamOptimizer::new(*optimizer, vars, &self.device)?;
        tracing::debug!(
            network = %self.kind,
            params = optimizer.param_count(),
            loss = %loss,
            "prepared for training"
        );
        self.optimizer = Some(optimizer);
        self.loss = Some(loss);
        self.clip_grad = clip_grad;
        Ok(())
    }

    fn train_step(
        &mut self,
        batch: &Batch,
        ctx: &ForwardContext,
        counter: Option<CorrectCounter>,
    ) -> Result<StepOutput> {
        let (Some(loss_fn), true) = (self.loss, self.optimizer.is_some()) else {
            return Err(MlError::precondition("train_step called before prepare_train"));
        };

        let ctx = self.step_context(ctx);
        let logits = self.forward(&batch.input, &ctx)?;
        let loss = loss_fn.compute(&logits, &batch.target)?;
        let mut grads = loss.backward()?;

        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| MlError::precondition("train_step called before prepare_train"))?;
        if let Some(max) = self.clip_grad {
            optimizer.clip_grad_norm(&mut grads, max)?;
        }
        optimizer.step(&grads)?;
        drop(grads);

        let correct = counter
            .map(|count| count(&logits.detach(), &batch.target))
            .transpose()?;
        Ok(StepOutput {
            loss: loss.to_dtype(DType::F32)?.to_scalar::<f32>()?,
            correct,
        })
    }

    fn eval_step(
        &mut self,
        batch: &Batch,
        ctx: &ForwardContext,
        counter: Option<CorrectCounter>,
    ) -> Result<EvalOutput> {
        let ctx = self.step_context(ctx).frozen();
        let logits = self.forward(&batch.input, &ctx)?.detach();
        let loss = match self.loss {
            Some(loss_fn) => Some(
                loss_fn
                    .compute(&logits, &batch.target)?
                    .to_dtype(DType::F32)?
                    .to_scalar::<f32>()?,
            ),
            None => None,
        };
        let correct = counter
            .map(|count| count(&logits, &batch.target))
            .transpose()?;
        Ok(EvalOutput { loss, correct })
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let optimizer = self
            .optimizer
            .as_ref()
            .ok_or_else(|| MlError::precondition("save called before prepare_train"))?;
        std::fs::create_dir_all(dir)?;
        self.varmap.save(dir.join(MODEL_FILE))?;
        optimizer.save(&dir.join(OPTIMIZER_FILE))?;
        tracing::debug!(dir = %dir.display(), "saved checkpoint");
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        let path = dir.join(MODEL_FILE);
        if !path.exists() {
            return Err(MlError::not_found("checkpoint", path.display().to_string()));
        }
        self.varmap.load(&path)?;
        tracing::debug!(path = %path.display(), "loaded parameters");
        Ok(())
    }

    fn uncertainty(
        &mut self,
        method: UncertaintyMethod<'_>,
        ctx: &ForwardContext,
    ) -> Result<Uncertainty> {
        match method {
            UncertaintyMethod::UncertaintyLayer => self
                .uncertainty_value
                .map(Uncertainty::Cached)
                .ok_or_else(|| {
                    MlError::precondition(
                        "no uncertainty value cached; run a forward pass of a network with a variational head first",
                    )
                }),
            UncertaintyMethod::MonteCarlo { input, repeats } => {
                let sampling = ForwardContext::sampling(ctx.stochasticity);
                let (mean, std) =
                    monte_carlo(repeats, |_| Ok(self.forward(input, &sampling)?.detach()))?;
                Ok(Uncertainty::MeanStd { mean, std })
            }
        }
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn default_stochasticity(&self) -> f64 {
        self.default_stochasticity
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Parameterization;
    use crate::network::{SgdParams, correct_count};
    use crate::zoo::{Architecture, InputShape, NetworkOptions, build_network};
    use pretty_assertions::assert_eq;

    const INPUT: InputShape = InputShape {
        channels: 1,
        height: 28,
        width: 28,
        classes: 10,
    };

    fn network(parameterization: Parameterization) -> CandleNetwork {
        let key = NetworkKind::new(Architecture::MnistBase, parameterization).to_string();
        build_network(&key, INPUT, &NetworkOptions::default(), &Device::Cpu).unwrap()
    }

    fn batch(n: usize) -> Batch {
        let input = Tensor::randn(0f32, 1.0, (n, 1, 28, 28), &Device::Cpu).unwrap();
        let labels: Vec<u32> = (0..n as u32).map(|i| i % 10).collect();
        Batch::new(input, Tensor::new(labels.as_slice(), &Device::Cpu).unwrap())
    }

    fn sgd() -> OptimizerConfig {
        OptimizerConfig::Sgd(SgdParams {
            lr: 0.01,
            ..Default::default()
        })
    }

    #[test]
    fn test_train_step_requires_prepare() {
        let mut net = network(Parameterization::Classic);
        let err = net
            .train_step(&batch(2), &ForwardContext::training(1.0), None)
            .unwrap_err();
        assert!(matches!(err, MlError::Precondition(_)));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(net.save(dir.path()), Err(MlError::Precondition(_))));
    }

    #[test]
    fn test_train_step_changes_parameters() {
        let mut net = network(Parameterization::Classic);
        net.prepare_train(&sgd(), LossFunction::CrossEntropy, Some(5.0))
            .unwrap();
        let before = net.parameter_snapshot().unwrap();
        let out = net
            .train_step(&batch(4), &ForwardContext::training(1.0), Some(correct_count))
            .unwrap();
        assert!(out.loss.is_finite());
        assert!(out.correct.unwrap() <= 4);
        assert_ne!(before, net.parameter_snapshot().unwrap());
    }

    #[test]
    fn test_eval_step_leaves_parameters_bit_identical() {
        let mut net = network(Parameterization::Variational);
        let before = net.parameter_snapshot().unwrap();
        let out = net
            .eval_step(&batch(3), &ForwardContext::evaluation(), Some(correct_count))
            .unwrap();
        assert_eq!(out.loss, None);
        assert!(out.correct.is_some());
        assert_eq!(before, net.parameter_snapshot().unwrap());
    }

    #[test]
    fn test_eval_steps_over_many_batches_keep_parameters_and_statistics() {
        // The ResNet carries batch-norm running statistics in its variable map.
        let small = InputShape {
            height: 16,
            width: 16,
            ..INPUT
        };
        let ctx = ForwardContext::training(1.0);
        for (key, input) in [("mnist_base_vnn", INPUT), ("resnet_vnn_18", small)] {
            let mut net = build_network(key, input, &NetworkOptions::default(), &Device::Cpu).unwrap();
            net.prepare_train(&sgd(), LossFunction::CrossEntropy, None)
                .unwrap();
            let before = net.parameter_snapshot().unwrap();
            for n in [2, 3, 4] {
                let xs = Tensor::randn(0f32, 1.0, (n, 1, input.height, input.width), &Device::Cpu).unwrap();
                let labels: Vec<u32> = (0..n as u32).collect();
                let data = Batch::new(xs, Tensor::new(labels.as_slice(), &Device::Cpu).unwrap());
                let out = net.eval_step(&data, &ctx, Some(correct_count)).unwrap();
                assert!(out.loss.is_some_and(f32::is_finite));
            }
            assert_eq!(before, net.parameter_snapshot().unwrap(), "{key}");
        }
    }

    #[test]
    fn test_inference_mode_makes_dropout_deterministic() {
        let mut net = build_network(
            "mnist_base_dropout",
            INPUT,
            &NetworkOptions {
                dropout: 0.5,
                ..NetworkOptions::default()
            },
            &Device::Cpu,
        )
        .unwrap();
        net.prepare_train(&sgd(), LossFunction::CrossEntropy, None)
            .unwrap();
        net.set_training(false);
        assert!(!net.is_training());

        let data = batch(4);
        let ctx = ForwardContext::training(0.0);
        let first = net.eval_step(&data, &ctx, None).unwrap().loss;
        let second = net.eval_step(&data, &ctx, None).unwrap().loss;
        assert!(first.is_some());
        assert_eq!(first, second);

        net.set_training(true);
        assert!(net.is_training());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = batch(2);

        let mut trained = network(Parameterization::Dropout);
        trained
            .prepare_train(&sgd(), LossFunction::CrossEntropy, None)
            .unwrap();
        trained
            .train_step(&data, &ForwardContext::training(0.0), None)
            .unwrap();
        trained.save(dir.path()).unwrap();
        assert!(dir.path().join(MODEL_FILE).exists());
        assert!(dir.path().join(OPTIMIZER_FILE).exists());

        let mut restored = network(Parameterization::Dropout);
        restored.load(dir.path()).unwrap();

        let ctx = ForwardContext::evaluation();
        let a = trained.forward(&data.input, &ctx).unwrap().to_vec2::<f32>().unwrap();
        let b = restored.forward(&data.input, &ctx).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = network(Parameterization::Classic);
        assert!(matches!(
            net.load(dir.path()),
            Err(MlError::NotFound { kind: "checkpoint", .. })
        ));
    }

    #[test]
    fn test_uncertainty_layer_needs_forward_pass() {
        let mut net = network(Parameterization::Variational);
        let ctx = ForwardContext::evaluation();
        assert!(net
            .uncertainty(UncertaintyMethod::UncertaintyLayer, &ctx)
            .is_err());

        net.eval_step(&batch(2), &ctx, None).unwrap();
        let value = net
            .uncertainty(UncertaintyMethod::UncertaintyLayer, &ctx)
            .unwrap();
        assert!(matches!(value, Uncertainty::Cached(v) if v > 0.0));
    }

    #[test]
    fn test_classic_network_caches_nothing() {
        let mut net = network(Parameterization::Classic);
        let ctx = ForwardContext::evaluation();
        net.eval_step(&batch(2), &ctx, None).unwrap();
        assert!(net
            .uncertainty(UncertaintyMethod::UncertaintyLayer, &ctx)
            .is_err());
    }

    #[test]
    fn test_monte_carlo_uncertainty() {
        let mut net = network(Parameterization::Variational);
        let data = batch(2);
        let method = UncertaintyMethod::MonteCarlo {
            input: &data.input,
            repeats: 5,
        };
        let Uncertainty::MeanStd { mean, std } =
            net.uncertainty(method, &ForwardContext::sampling(1.0)).unwrap()
        else {
            panic!("expected mean/std");
        };
        assert_eq!(mean.dims(), &[2, 10]);
        let std = std.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(std.iter().any(|s| *s > 0.0));
    }
}
