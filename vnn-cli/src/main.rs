//! vnn CLI: train and evaluate classic, dropout and variational networks.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// vnn: variational neural network training and evaluation
#[derive(Parser, Debug)]
#[command(name = "vnn", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output, including the progress line
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train a network and checkpoint it under the models directory
    Train(TrainArgs),
    /// Evaluate a trained network on one partition
    Evaluate(EvalArgs),
    /// List every registry key
    Networks,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to .vnn/config.toml
    Init,
    /// Print the effective configuration
    Show,
}

/// Options shared by `train` and `evaluate`.
#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// Registry key, e.g. mnist_base_vnn, resnet_classic_50, vgg_dropout_16
    network: String,

    /// Dataset: mnist, mnist_0_1 or cifar10
    #[arg(short, long, default_value = "mnist")]
    dataset: String,

    /// Nominal batch size
    #[arg(short, long, default_value = "32")]
    batch_size: usize,

    /// Explicit model directory
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Appended to the derived model directory name
    #[arg(long)]
    model_suffix: Option<String>,

    /// cpu, cuda or cuda:<n>
    #[arg(long)]
    device: Option<String>,

    /// Seed for the train/validation split and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Space-separated activation names, one per hidden layer
    #[arg(long)]
    activation: Option<String>,

    /// Activation sub-option as <name>_<option>=<value>, repeatable
    #[arg(long = "activation-option", value_name = "KEY=VALUE")]
    activation_options: Vec<String>,

    /// Dropout probability of dropout networks
    #[arg(long)]
    dropout: Option<f32>,

    /// Initial rho of variational layers
    #[arg(long, allow_negative_numbers = true)]
    initial_rho: Option<f64>,

    /// Stochasticity of training steps when not annealing
    #[arg(long)]
    stochasticity: Option<f64>,
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Number of epochs
    #[arg(short, long, default_value = "1")]
    epochs: usize,

    /// sgd or adam
    #[arg(long)]
    optimizer: Option<String>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// SGD momentum
    #[arg(long)]
    momentum: Option<f64>,

    /// L2 weight decay
    #[arg(long)]
    weight_decay: Option<f64>,

    /// cross_entropy, mse or bce
    #[arg(long)]
    loss: Option<String>,

    /// Gradient-norm ceiling
    #[arg(long)]
    clip_grad: Option<f64>,

    /// Checkpoint interval; positive counts steps, zero or negative counts epochs
    #[arg(long, allow_negative_numbers = true)]
    save_steps: Option<i64>,

    /// Validation interval; positive counts steps, zero or negative counts epochs
    #[arg(long, allow_negative_numbers = true)]
    validation_steps: Option<i64>,

    /// Do not keep a best model under best/
    #[arg(long)]
    no_save_best: bool,

    /// Stochasticity at the start of the annealing ramp
    #[arg(long, allow_negative_numbers = true)]
    start_stochasticity: Option<f64>,

    /// Stochasticity at the end of the annealing ramp
    #[arg(long, allow_negative_numbers = true)]
    end_stochasticity: Option<f64>,
}

#[derive(clap::Args, Debug)]
struct EvalArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// train, validation or test
    #[arg(short, long, default_value = "test")]
    split: String,

    /// Load the parameters saved under best/
    #[arg(long)]
    best: bool,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = vnn_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Human-readable stderr + optional JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let mut guard = None;
    let json_layer = if config.logging.json_file {
        let log_dir = vnn_core::config::project_dirs()
            .map(|d| d.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("."));
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "vnn.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(&config.logging.file_filter)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let result = commands::handle_command(cli.command, &workspace, &config, cli.quiet);
    drop(guard);
    result
}
