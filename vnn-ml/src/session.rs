//! The `train` and `evaluate` entry points.
//!
//! Both resolve the model directory the same way, build the network from its
//! registry key and forward the architecture options to the registry.

use crate::data::{BatchLoader, DatasetKind, DatasetProvisioner, Partitions, Split};
use crate::error::Result;
use crate::network::{LossFunction, Network, OptimizerConfig, parse_device};
use crate::training::{
    ModelLayout, ProgressReporter, RunOptions, StepInterval, TrainSummary, TrainingRunner,
    run_evaluation,
};
use crate::zoo::{NetworkOptions, build_network};
use std::path::PathBuf;
use vnn_core::persistence;

/// Where a model lives and what it is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTarget {
    /// Registry key, e.g. `mnist_base_vnn`.
    pub network: String,
    pub dataset: DatasetKind,
    /// Explicit model directory; overrides `models_dir` and the derived name.
    pub model_path: Option<PathBuf>,
    pub models_dir: PathBuf,
    pub model_suffix: Option<String>,
    pub network_options: NetworkOptions,
}

impl ModelTarget {
    pub fn new(network: impl Into<String>, dataset: DatasetKind) -> Self {
        Self {
            network: network.into(),
            dataset,
            model_path: None,
            models_dir: PathBuf::from("./models"),
            model_suffix: None,
            network_options: NetworkOptions::default(),
        }
    }

    pub fn layout(&self) -> ModelLayout {
        ModelLayout::resolve(
            self.model_path.as_deref(),
            &self.models_dir,
            &self.network,
            self.dataset.name(),
            self.model_suffix.as_deref(),
        )
    }
}

/// Settings of one `train` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub target: ModelTarget,
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: OptimizerConfig,
    pub loss: LossFunction,
    pub clip_grad: Option<f64>,
    /// Positive: absolute steps. Zero or negative: every `|n|` epochs.
    pub save_steps: i64,
    pub validation_steps: i64,
    pub save_best: bool,
    pub start_stochasticity: Option<f64>,
    pub end_stochasticity: Option<f64>,
    pub datasets_dir: PathBuf,
    pub device: String,
    pub seed: u64,
}

impl TrainOptions {
    pub fn new(target: ModelTarget) -> Self {
        Self {
            target,
            epochs: 1,
            batch_size: 32,
            optimizer: OptimizerConfig::default(),
            loss: LossFunction::default(),
            clip_grad: None,
            save_steps: -1,
            validation_steps: -1,
            save_best: true,
            start_stochasticity: None,
            end_stochasticity: None,
            datasets_dir: PathBuf::from("./datasets/"),
            device: "cpu".to_string(),
            seed: 42,
        }
    }
}

/// Settings of one `evaluate` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    pub target: ModelTarget,
    pub split: Split,
    pub batch_size: usize,
    /// Load the parameters from `best/` instead of the model directory.
    pub use_best: bool,
    pub datasets_dir: PathBuf,
    pub device: String,
    pub seed: u64,
}

impl EvalOptions {
    pub fn new(target: ModelTarget) -> Self {
        Self {
            target,
            split: Split::Test,
            batch_size: 32,
            use_best: false,
            datasets_dir: PathBuf::from("./datasets/"),
            device: "cpu".to_string(),
            seed: 42,
        }
    }
}

/// Provision the dataset and train.
pub fn train<P: ProgressReporter>(options: &TrainOptions, progress: P) -> Result<TrainSummary> {
    let provisioner = DatasetProvisioner::new(&options.datasets_dir, options.seed);
    let partitions = provisioner.partitions(options.target.dataset)?;
    train_on(options, partitions, progress)
}

/// Train on already provisioned partitions.
pub fn train_on<P: ProgressReporter>(
    options: &TrainOptions,
    partitions: Partitions,
    progress: P,
) -> Result<TrainSummary> {
    options.optimizer.validate()?;
    let device = parse_device(&options.device)?;
    let target = &options.target;
    let input = target.dataset.spec().input;

    let mut net = build_network(&target.network, input, &target.network_options, &device)?;
    net.prepare_train(&options.optimizer, options.loss, options.clip_grad)?;

    let layout = target.layout();
    tracing::info!(
        network = %target.network,
        dataset = %target.dataset,
        dir = %layout.dir().display(),
        parameters = net.parameter_count()?,
        optimizer = ?options.optimizer,
        loss = %options.loss,
        "training"
    );

    let Partitions {
        train, validation, ..
    } = partitions;
    let mut train_loader = BatchLoader::new(train, options.batch_size, true, options.seed)?;
    let mut validation_loader = BatchLoader::new(validation, options.batch_size, false, options.seed)?;

    let run = RunOptions {
        network_name: layout.full_name().to_string(),
        epochs: options.epochs,
        save_steps: StepInterval::from_signed(options.save_steps),
        validation_steps: StepInterval::from_signed(options.validation_steps),
        save_best: options.save_best,
        start_stochasticity: options.start_stochasticity,
        end_stochasticity: options.end_stochasticity,
    };
    TrainingRunner::new(run, layout, progress).run(&mut net, &mut train_loader, &mut validation_loader)
}

/// Provision the dataset and evaluate a trained model.
pub fn evaluate<P: ProgressReporter>(options: &EvalOptions, progress: P) -> Result<f64> {
    let provisioner = DatasetProvisioner::new(&options.datasets_dir, options.seed);
    let partitions = provisioner.partitions(options.target.dataset)?;
    evaluate_on(options, partitions, progress)
}

/// Evaluate a trained model on already provisioned partitions.
///
/// The accuracy is also written to `results/eval_<split>.txt`.
pub fn evaluate_on<P: ProgressReporter>(
    options: &EvalOptions,
    partitions: Partitions,
    mut progress: P,
) -> Result<f64> {
    let device = parse_device(&options.device)?;
    let target = &options.target;
    let input = target.dataset.spec().input;

    let mut net = build_network(&target.network, input, &target.network_options, &device)?;
    let layout = target.layout();
    let source = if options.use_best {
        layout.best_dir()
    } else {
        layout.dir().to_path_buf()
    };
    net.load(&source)?;

    let split = partitions.into_split(options.split);
    let mut loader = BatchLoader::new(split, options.batch_size, false, options.seed)?;
    let accuracy = run_evaluation(&mut net, &mut loader, &mut progress)?;

    let result_path = layout.eval_result(options.split);
    persistence::write_line(&result_path, &accuracy.to_string())?;
    tracing::info!(
        network = %target.network,
        split = %options.split,
        accuracy,
        path = %result_path.display(),
        "evaluation finished"
    );
    progress.notice(&format!("{} accuracy: {accuracy}", options.split));
    Ok(accuracy)
}
