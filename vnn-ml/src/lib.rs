//! # vnn-ml: classic, dropout and variational image classifiers
//!
//! Every registry key builds a [`network::Network`]; the training runner drives it
//! step by step with an annealed stochasticity level, periodic checkpoints,
//! validation and best-model selection. The evaluation runner measures accuracy
//! over a partition with all noise switched off.

// Forward pass
pub mod context;
pub mod layers;

// Models
pub mod network;
pub mod zoo;

// Data
pub mod data;

// Orchestration
pub mod session;
pub mod training;

pub mod error;

// Re-exports
pub use context::{ForwardContext, PassMode};
pub use data::{DatasetKind, DatasetProvisioner, Split};
pub use error::{MlError, Result};
pub use network::{CandleNetwork, LossFunction, Network, OptimizerConfig};
pub use session::{EvalOptions, ModelTarget, TrainOptions, evaluate, train};
pub use training::{ConsoleProgress, SilentProgress, TrainSummary};
pub use zoo::{NetworkKind, NetworkOptions, build_network};
