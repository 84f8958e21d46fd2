//! The step-level training loop.
//!
//! Every step advances the global counter, applies the annealed level, trains on
//! one batch and reports progress. Checkpoints and validations fire on their
//! resolved step intervals; validation results go to the persistent log and
//! through the best-model protocol.

use super::best::{BestModelProtocol, BestModelRecord};
use super::evaluation::run_evaluation;
use super::layout::ModelLayout;
use super::metrics::{RunningAccuracy, TrainSummary, ValidationLabel, ValidationResult};
use super::progress::{ProgressReporter, StepProgress};
use super::schedule::{AnnealingSchedule, StepInterval};
use crate::context::ForwardContext;
use crate::data::loader::BatchSource;
use crate::error::{MlError, Result};
use crate::network::{Network, correct_count};
use vnn_core::persistence;

/// Settings of one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Name shown on the progress line.
    pub network_name: String,
    pub epochs: usize,
    pub save_steps: StepInterval,
    pub validation_steps: StepInterval,
    pub save_best: bool,
    pub start_stochasticity: Option<f64>,
    pub end_stochasticity: Option<f64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            network_name: String::new(),
            epochs: 1,
            save_steps: StepInterval::Epochs(1),
            validation_steps: StepInterval::Epochs(1),
            save_best: true,
            start_stochasticity: None,
            end_stochasticity: None,
        }
    }
}

/// Mutable state of a run in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRunState {
    /// 0-based epoch.
    pub epoch: usize,
    /// Global 1-based step counter; `0` before the first step.
    pub step: u64,
    /// Epoch-scoped training accuracy.
    pub accuracy: RunningAccuracy,
    pub save_interval: u64,
    pub validation_interval: u64,
    pub stochasticity: f64,
}

pub struct TrainingRunner<P: ProgressReporter> {
    options: RunOptions,
    layout: ModelLayout,
    progress: P,
}

impl<P: ProgressReporter> TrainingRunner<P> {
    pub fn new(options: RunOptions, layout: ModelLayout, progress: P) -> Self {
        Self {
            options,
            layout,
            progress,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn layout(&self) -> &ModelLayout {
        &self.layout
    }

    pub fn into_progress(self) -> P {
        self.progress
    }

    /// Train `net` on `train` for the configured epochs, validating on `validation`.
    ///
    /// The network must already be prepared for training. Any failing step,
    /// checkpoint or log write stops the run.
    pub fn run<N, T, V>(&mut self, net: &mut N, train: &mut T, validation: &mut V) -> Result<TrainSummary>
    where
        N: Network + ?Sized,
        T: BatchSource + ?Sized,
        V: BatchSource + ?Sized,
    {
        let steps_per_epoch = train.len();
        if steps_per_epoch == 0 {
            return Err(MlError::training("training partition yielded no batches"));
        }
        let nominal = train.batch_size();
        let epochs = self.options.epochs;
        let total_steps = (steps_per_epoch as u64).saturating_mul(epochs as u64);

        let mut state = TrainingRunState {
            epoch: 0,
            step: 0,
            accuracy: RunningAccuracy::new(),
            save_interval: self.options.save_steps.resolve(steps_per_epoch)?,
            validation_interval: self.options.validation_steps.resolve(steps_per_epoch)?,
            stochasticity: net.default_stochasticity(),
        };
        let schedule = AnnealingSchedule::from_bounds(
            self.options.start_stochasticity,
            self.options.end_stochasticity,
            total_steps,
        )?;
        let label_by_epoch = state.validation_interval % steps_per_epoch as u64 == 0;

        self.layout.ensure()?;
        let protocol = BestModelProtocol::new(self.layout.best_dir());
        let validation_log = self.layout.validation_log(nominal);

        tracing::info!(
            network = %self.options.network_name,
            dir = %self.layout.dir().display(),
            epochs,
            steps_per_epoch,
            save_interval = state.save_interval,
            validation_interval = state.validation_interval,
            annealing = schedule.is_some(),
            "starting training run"
        );

        let mut summary = TrainSummary {
            epochs,
            ..TrainSummary::default()
        };

        for epoch in 0..epochs {
            state.epoch = epoch;
            state.accuracy.reset();

            for (i, batch) in train.batches().enumerate() {
                state.step += 1;
                if let Some(schedule) = &schedule {
                    state.stochasticity = schedule.level_at(state.step);
                }

                let batch = batch?.to_device(net.device())?;
                let ctx = ForwardContext::training(state.stochasticity);
                let out = net.train_step(&batch, &ctx, Some(correct_count))?;
                state.accuracy.add(out.correct.unwrap_or(0), nominal);

                tracing::debug!(
                    step = state.step,
                    loss = out.loss,
                    stochasticity = state.stochasticity,
                    "training step"
                );
                self.progress.train_step(&StepProgress {
                    network: &self.options.network_name,
                    epoch: epoch + 1,
                    epochs,
                    step_in_epoch: i + 1,
                    steps_per_epoch,
                    loss: out.loss,
                    accuracy: state.accuracy.value(),
                    stochasticity: schedule.map(|_| state.stochasticity),
                });

                if state.step % state.save_interval == 0 {
                    self.progress.end_line();
                    net.save(self.layout.dir())?;
                    summary.checkpoints += 1;
                    tracing::info!(step = state.step, dir = %self.layout.dir().display(), "saved checkpoint");
                }

                if state.step % state.validation_interval == 0 {
                    self.progress.end_line();
                    let accuracy = run_evaluation(net, validation, &mut self.progress)?;
                    let label = if label_by_epoch {
                        ValidationLabel::Epoch(epoch + 1)
                    } else {
                        ValidationLabel::Step(state.step)
                    };
                    let result = ValidationResult {
                        label,
                        step: state.step,
                        accuracy,
                    };
                    persistence::append_line(&validation_log, &result.log_line())?;
                    tracing::info!(%label, accuracy, "validation finished");
                    self.progress.notice(&format!("validation {}", result.log_line()));
                    summary.validations.push(result);

                    if self.options.save_best {
                        let record = BestModelRecord {
                            epoch: epoch + 1,
                            batch_size: nominal,
                            result: accuracy,
                        };
                        if protocol.consider(&*net, record)? {
                            self.progress.notice(&format!("new best model: {accuracy}"));
                        }
                    }
                }
            }
        }
        self.progress.end_line();

        summary.steps = state.step;
        summary.final_stochasticity = state.stochasticity;
        if self.options.save_best {
            summary.best = protocol.load_record()?;
        }
        tracing::info!(
            steps = summary.steps,
            checkpoints = summary.checkpoints,
            validations = summary.validations.len(),
            "training run finished"
        );
        Ok(summary)
    }
}
