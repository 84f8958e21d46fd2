//! Scripted stand-ins for a network, a batch source and a progress sink.

use super::progress::{EvalProgress, ProgressReporter, StepProgress};
use crate::context::ForwardContext;
use crate::data::loader::BatchSource;
use crate::error::{MlError, Result};
use crate::network::{
    Batch, CorrectCounter, EvalOutput, LossFunction, Network, OptimizerConfig, StepOutput,
    Uncertainty, UncertaintyMethod,
};
use candle_core::{DType, Device, Tensor};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Network whose correct counts are scripted and whose calls are recorded.
pub(crate) struct ScriptedNetwork {
    device: Device,
    prepared: bool,
    training: bool,
    default_stochasticity: f64,
    train_correct: Vec<usize>,
    eval_correct: Vec<usize>,
    fail_eval_at: Option<usize>,
    train_contexts: Vec<ForwardContext>,
    eval_calls: Vec<(ForwardContext, bool)>,
    eval_attempts: usize,
    saved: RefCell<Vec<PathBuf>>,
}

impl ScriptedNetwork {
    pub(crate) fn new() -> Self {
        Self {
            device: Device::Cpu,
            prepared: false,
            training: true,
            default_stochasticity: 1.0,
            train_correct: Vec::new(),
            eval_correct: Vec::new(),
            fail_eval_at: None,
            train_contexts: Vec::new(),
            eval_calls: Vec::new(),
            eval_attempts: 0,
            saved: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn prepared() -> Self {
        Self {
            prepared: true,
            ..Self::new()
        }
    }

    pub(crate) fn with_default_stochasticity(mut self, level: f64) -> Self {
        self.default_stochasticity = level;
        self
    }

    /// Correct counts returned by successive training steps, cycled.
    pub(crate) fn with_train_correct(mut self, counts: Vec<usize>) -> Self {
        self.train_correct = counts;
        self
    }

    /// Correct counts returned by successive evaluation steps, cycled.
    pub(crate) fn with_eval_correct(mut self, counts: Vec<usize>) -> Self {
        self.eval_correct = counts;
        self
    }

    /// Fail the evaluation call with this 0-based index.
    pub(crate) fn failing_eval_at(mut self, call: usize) -> Self {
        self.fail_eval_at = Some(call);
        self
    }

    pub(crate) fn train_contexts(&self) -> &[ForwardContext] {
        &self.train_contexts
    }

    /// Context and training flag of every successful evaluation step.
    pub(crate) fn eval_calls(&self) -> Vec<(ForwardContext, bool)> {
        self.eval_calls.clone()
    }

    pub(crate) fn saved_dirs(&self) -> Vec<PathBuf> {
        self.saved.borrow().clone()
    }

    fn scripted(counts: &[usize], call: usize, fallback: usize) -> usize {
        if counts.is_empty() {
            fallback
        } else {
            counts[call % counts.len()]
        }
    }
}

impl Network for ScriptedNetwork {
    fn prepare_train(
        &mut self,
        _optimizer: &OptimizerConfig,
        _loss: LossFunction,
        _clip_grad: Option<f64>,
    ) -> Result<()> {
        self.prepared = true;
        Ok(())
    }

    fn train_step(
        &mut self,
        batch: &Batch,
        ctx: &ForwardContext,
        counter: Option<CorrectCounter>,
    ) -> Result<StepOutput> {
        if !self.prepared {
            return Err(MlError::precondition("train_step called before prepare_train"));
        }
        let call = self.train_contexts.len();
        self.train_contexts.push(*ctx);
        let correct = counter.map(|_| Self::scripted(&self.train_correct, call, batch.len()));
        Ok(StepOutput {
            loss: 1.0 / (call + 1) as f32,
            correct,
        })
    }

    fn eval_step(
        &mut self,
        batch: &Batch,
        ctx: &ForwardContext,
        counter: Option<CorrectCounter>,
    ) -> Result<EvalOutput> {
        let attempt = self.eval_attempts;
        self.eval_attempts += 1;
        if self.fail_eval_at == Some(attempt) {
            return Err(MlError::evaluation("scripted failure"));
        }
        let call = self.eval_calls.len();
        self.eval_calls.push((*ctx, self.training));
        let correct = counter.map(|_| Self::scripted(&self.eval_correct, call, batch.len()));
        Ok(EvalOutput {
            loss: None,
            correct,
        })
    }

    fn save(&self, dir: &Path) -> Result<()> {
        if !self.prepared {
            return Err(MlError::precondition("save called before prepare_train"));
        }
        std::fs::create_dir_all(dir)?;
        self.saved.borrow_mut().push(dir.to_path_buf());
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        if self.saved.borrow().iter().any(|saved| saved == dir) {
            Ok(())
        } else {
            Err(MlError::not_found("checkpoint", dir.display().to_string()))
        }
    }

    fn uncertainty(
        &mut self,
        _method: UncertaintyMethod<'_>,
        _ctx: &ForwardContext,
    ) -> Result<Uncertainty> {
        Ok(Uncertainty::Cached(0.0))
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

/// Batches of zero images with the given sizes.
pub(crate) struct ScriptedSource {
    sizes: Vec<usize>,
    batch_size: usize,
}

impl ScriptedSource {
    pub(crate) fn new(sizes: Vec<usize>, batch_size: usize) -> Self {
        Self { sizes, batch_size }
    }
}

impl BatchSource for ScriptedSource {
    fn len(&self) -> usize {
        self.sizes.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(self.sizes.iter().map(|&n| -> Result<Batch> {
            let input = Tensor::zeros((n, 1, 2, 2), DType::F32, &Device::Cpu)?;
            let target = Tensor::zeros(n, DType::U32, &Device::Cpu)?;
            Ok(Batch::new(input, target))
        }))
    }
}

/// Keeps what a run reported.
#[derive(Debug, Default)]
pub(crate) struct RecordingProgress {
    /// `(epoch, step_in_epoch, accuracy, stochasticity)` per training step.
    pub(crate) steps: Vec<(usize, usize, f64, Option<f64>)>,
    pub(crate) eval_steps: usize,
    pub(crate) notices: Vec<String>,
}

impl ProgressReporter for RecordingProgress {
    fn train_step(&mut self, progress: &StepProgress<'_>) {
        self.steps.push((
            progress.epoch,
            progress.step_in_epoch,
            progress.accuracy,
            progress.stochasticity,
        ));
    }

    fn eval_step(&mut self, _progress: &EvalProgress) {
        self.eval_steps += 1;
    }

    fn end_line(&mut self) {}

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}
