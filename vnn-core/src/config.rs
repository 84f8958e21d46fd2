//! Configuration system for vnn.
//!
//! Uses `figment` for layered configuration: defaults -> user file -> workspace file
//! -> explicit file -> environment. Command-line flags are applied on top by the CLI.
//! Configuration is read from `~/.config/vnn/config.toml` and/or `.vnn/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VnnConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub training: TrainingDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where models and datasets live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root under which `<full_network_name>/` model directories are created.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    /// Dataset cache directory.
    #[serde(default = "default_datasets_dir")]
    pub datasets_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            datasets_dir: default_datasets_dir(),
        }
    }
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("./models")
}

fn default_datasets_dir() -> PathBuf {
    PathBuf::from("./datasets/")
}

/// Compute device and randomness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// `cpu`, `cuda` or `cuda:<ordinal>`; CUDA falls back to CPU when unavailable.
    #[serde(default = "default_device")]
    pub device: String,
    /// Seed for the train/validation split and epoch shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            seed: default_seed(),
        }
    }
}

fn default_device() -> String {
    "cuda:0".to_string()
}

fn default_seed() -> u64 {
    42
}

/// Defaults for `vnn train` flags that are not given on the command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingDefaults {
    /// `sgd` or `adam`.
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_loss")]
    pub loss: String,
    /// Positive: absolute steps. Zero or negative: every `|n|` epochs.
    #[serde(default = "default_interval")]
    pub save_steps: i64,
    #[serde(default = "default_interval")]
    pub validation_steps: i64,
    #[serde(default = "default_true")]
    pub save_best: bool,
    #[serde(default)]
    pub clip_grad: Option<f64>,
}

impl Default for TrainingDefaults {
    fn default() -> Self {
        Self {
            optimizer: default_optimizer(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            weight_decay: 0.0,
            loss: default_loss(),
            save_steps: default_interval(),
            validation_steps: default_interval(),
            save_best: true,
            clip_grad: None,
        }
    }
}

fn default_optimizer() -> String {
    "sgd".to_string()
}

fn default_learning_rate() -> f64 {
    0.0001
}

fn default_momentum() -> f64 {
    0.9
}

fn default_loss() -> String {
    "cross_entropy".to_string()
}

fn default_interval() -> i64 {
    -1
}

fn default_true() -> bool {
    true
}

/// Logging sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Write JSON logs to the per-user data directory.
    #[serde(default = "default_true")]
    pub json_file: bool,
    /// Filter for the JSON file layer.
    #[serde(default = "default_file_filter")]
    pub file_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_file: true,
            file_filter: default_file_filter(),
        }
    }
}

fn default_file_filter() -> String {
    "debug".to_string()
}

/// Per-user project directories (`dev.vnn.vnn`).
pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "vnn", "vnn")
}

/// Path of the workspace-local configuration file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".vnn").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `VNN_`, `__` separates sections)
/// 2. An explicit config file (`vnn -c <file>`)
/// 3. Workspace-local config (`.vnn/config.toml`)
/// 4. User config (`~/.config/vnn/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<VnnConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VnnConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        tracing::debug!(path = %path.display(), "Merging explicit config file");
        figment = figment.merge(Toml::file(path));
    }

    // VNN_RUNTIME__DEVICE, VNN_TRAINING__LEARNING_RATE, ...
    figment = figment.merge(Env::prefixed("VNN_").split("__"));

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }

    if let Some(ws) = workspace {
        if workspace_config_path(ws).exists() {
            return true;
        }
    }

    false
}

/// Write the default configuration to `.vnn/config.toml` unless one is present.
///
/// Returns the path and whether a new file was created.
pub fn init_workspace_config(workspace: &Path) -> anyhow::Result<(PathBuf, bool)> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Ok((path, false));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(&VnnConfig::default())?;
    std::fs::write(&path, toml_str)?;
    Ok((path, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = VnnConfig::default();
        assert_eq!(config.paths.models_dir, PathBuf::from("./models"));
        assert_eq!(config.runtime.device, "cuda:0");
        assert_eq!(config.training.optimizer, "sgd");
        assert_eq!(config.training.learning_rate, 0.0001);
        assert_eq!(config.training.momentum, 0.9);
        assert_eq!(config.training.save_steps, -1);
        assert!(config.training.save_best);
    }

    #[test]
    fn test_workspace_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[runtime]\ndevice = \"cpu\"\n\n[training]\nvalidation_steps = 500\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.runtime.device, "cpu");
        assert_eq!(config.training.validation_steps, 500);
        // Untouched keys keep their defaults.
        assert_eq!(config.training.save_steps, -1);
        assert_eq!(config.runtime.seed, 42);
    }

    #[test]
    fn test_explicit_file_wins_over_workspace() {
        let dir = TempDir::new().unwrap();
        let ws = workspace_config_path(dir.path());
        std::fs::create_dir_all(ws.parent().unwrap()).unwrap();
        std::fs::write(&ws, "[training]\nloss = \"mse\"\n").unwrap();

        let explicit = dir.path().join("override.toml");
        std::fs::write(&explicit, "[training]\nloss = \"bce\"\n").unwrap();

        let config = load_config(Some(dir.path()), Some(&explicit)).unwrap();
        assert_eq!(config.training.loss, "bce");
    }

    #[test]
    fn test_init_workspace_config_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (path, created) = init_workspace_config(dir.path()).unwrap();
        assert!(created);
        assert!(path.exists());

        let (_, created_again) = init_workspace_config(dir.path()).unwrap();
        assert!(!created_again);

        let parsed: VnnConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, VnnConfig::default());
    }
}
