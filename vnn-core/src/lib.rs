//! # vnn-core
//!
//! Pieces shared by every vnn crate: the layered configuration model and the
//! synchronous file persistence helpers used for checkpoints, best-model records
//! and result logs.

pub mod config;
pub mod persistence;

pub use config::{VnnConfig, config_exists, load_config};
