//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, EvalArgs, ModelArgs, TrainArgs};
use std::collections::BTreeMap;
use std::path::Path;
use vnn_core::VnnConfig;
use vnn_ml::data::DatasetKind;
use vnn_ml::network::{LossFunction, OptimizerConfig};
use vnn_ml::session::{EvalOptions, ModelTarget, TrainOptions};
use vnn_ml::training::{ConsoleProgress, SilentProgress, TrainSummary};
use vnn_ml::zoo::{NetworkKind, NetworkOptions};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config: &VnnConfig,
    quiet: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => handle_train(args, config, quiet),
        Commands::Evaluate(args) => handle_evaluate(args, config, quiet),
        Commands::Networks => {
            for kind in NetworkKind::all() {
                println!("{kind}");
            }
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config),
    }
}

fn handle_config(action: ConfigAction, workspace: &Path, config: &VnnConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let (path, created) = vnn_core::config::init_workspace_config(workspace)?;
            if created {
                println!("Created default configuration at: {}", path.display());
            } else {
                println!("Configuration file already exists at: {}", path.display());
            }
            Ok(())
        }
        ConfigAction::Show => {
            if !vnn_core::config_exists(Some(workspace)) {
                println!("# No configuration file found; built-in defaults and environment only.");
            }
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

/// Split repeated `<name>_<option>=<value>` arguments into a map.
fn parse_activation_options(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| {
                    anyhow::anyhow!("activation option '{}' is not of the form KEY=VALUE", entry)
                })
        })
        .collect()
}

fn model_target(args: &ModelArgs, config: &VnnConfig) -> anyhow::Result<ModelTarget> {
    let dataset: DatasetKind = args.dataset.parse()?;
    let defaults = NetworkOptions::default();
    let network_options = NetworkOptions {
        activation: args.activation.clone(),
        activation_options: parse_activation_options(&args.activation_options)?,
        dropout: args.dropout.unwrap_or(defaults.dropout),
        initial_rho: args.initial_rho.unwrap_or(defaults.initial_rho),
        stochasticity: args.stochasticity.unwrap_or(defaults.stochasticity),
    };
    Ok(ModelTarget {
        network: args.network.clone(),
        dataset,
        model_path: args.model_path.clone(),
        models_dir: config.paths.models_dir.clone(),
        model_suffix: args.model_suffix.clone(),
        network_options,
    })
}

fn train_options(args: &TrainArgs, config: &VnnConfig) -> anyhow::Result<TrainOptions> {
    let defaults = &config.training;
    let optimizer = OptimizerConfig::from_name(
        args.optimizer.as_deref().unwrap_or(&defaults.optimizer),
        args.lr.unwrap_or(defaults.learning_rate),
        args.momentum.unwrap_or(defaults.momentum),
        args.weight_decay.unwrap_or(defaults.weight_decay),
    )?;
    let loss: LossFunction = args.loss.as_deref().unwrap_or(&defaults.loss).parse()?;

    let mut options = TrainOptions::new(model_target(&args.model, config)?);
    options.epochs = args.epochs;
    options.batch_size = args.model.batch_size;
    options.optimizer = optimizer;
    options.loss = loss;
    options.clip_grad = args.clip_grad.or(defaults.clip_grad);
    options.save_steps = args.save_steps.unwrap_or(defaults.save_steps);
    options.validation_steps = args.validation_steps.unwrap_or(defaults.validation_steps);
    options.save_best = defaults.save_best && !args.no_save_best;
    options.start_stochasticity = args.start_stochasticity;
    options.end_stochasticity = args.end_stochasticity;
    options.datasets_dir = config.paths.datasets_dir.clone();
    options.device = args.model.device.clone().unwrap_or_else(|| config.runtime.device.clone());
    options.seed = args.model.seed.unwrap_or(config.runtime.seed);
    Ok(options)
}

fn handle_train(args: TrainArgs, config: &VnnConfig, quiet: bool) -> anyhow::Result<()> {
    let options = train_options(&args, config)?;
    let summary = if quiet {
        vnn_ml::train(&options, SilentProgress)?
    } else {
        vnn_ml::train(&options, ConsoleProgress::new())?
    };
    if !quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &TrainSummary) {
    println!(
        "Finished {} epochs ({} steps, {} checkpoints)",
        summary.epochs, summary.steps, summary.checkpoints
    );
    if let Some(last) = summary.validations.last() {
        println!("Last validation: {}", last.log_line());
    }
    if let Some(best) = &summary.best {
        println!(
            "Best model: {} (epoch {}, batch {})",
            best.result, best.epoch, best.batch_size
        );
    }
}

fn eval_options(args: &EvalArgs, config: &VnnConfig) -> anyhow::Result<EvalOptions> {
    let mut options = EvalOptions::new(model_target(&args.model, config)?);
    options.split = args.split.parse()?;
    options.batch_size = args.model.batch_size;
    options.use_best = args.best;
    options.datasets_dir = config.paths.datasets_dir.clone();
    options.device = args.model.device.clone().unwrap_or_else(|| config.runtime.device.clone());
    options.seed = args.model.seed.unwrap_or(config.runtime.seed);
    Ok(options)
}

fn handle_evaluate(args: EvalArgs, config: &VnnConfig, quiet: bool) -> anyhow::Result<()> {
    let options = eval_options(&args, config)?;
    let accuracy = if quiet {
        vnn_ml::evaluate(&options, SilentProgress)?
    } else {
        vnn_ml::evaluate(&options, ConsoleProgress::new())?
    };
    tracing::debug!(accuracy, "evaluate command finished");
    Ok(())
}
