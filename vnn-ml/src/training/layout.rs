//! Model directory layout.
//!
//! ```text
//! <models>/<full_network_name>/
//!     model.safetensors  optimizer.safetensors
//!     results/eval_<split>.txt  results/validation_batch_<batch>.txt
//!     best/model.safetensors  best/optimizer.safetensors  best/description.json
//! ```

use super::best::RECORD_FILE;
use crate::data::Split;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Network name prefixed with the dataset unless it already mentions it, and
/// suffixed with `_<suffix>` when a non-empty suffix is given.
pub fn full_network_name(network: &str, dataset: &str, suffix: Option<&str>) -> String {
    let mut name = if network.contains(dataset) {
        network.to_string()
    } else {
        format!("{dataset}_{network}")
    };
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        name.push('_');
        name.push_str(suffix);
    }
    name
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLayout {
    dir: PathBuf,
    full_name: String,
}

impl ModelLayout {
    /// Use `model_path` when given, otherwise `<models_root>/<full_network_name>`.
    pub fn resolve(
        model_path: Option<&Path>,
        models_root: &Path,
        network: &str,
        dataset: &str,
        suffix: Option<&str>,
    ) -> Self {
        let full_name = full_network_name(network, dataset, suffix);
        let dir = match model_path {
            Some(path) => path.to_path_buf(),
            None => models_root.join(&full_name),
        };
        Self { dir, full_name }
    }

    /// Create the model, `results` and `best` directories.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.results_dir())?;
        std::fs::create_dir_all(self.best_dir())?;
        Ok(())
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.join("results")
    }

    pub fn best_dir(&self) -> PathBuf {
        self.dir.join("best")
    }

    pub fn best_record(&self) -> PathBuf {
        self.best_dir().join(RECORD_FILE)
    }

    pub fn validation_log(&self, batch_size: usize) -> PathBuf {
        self.results_dir()
            .join(format!("validation_batch_{batch_size}.txt"))
    }

    pub fn eval_result(&self, split: Split) -> PathBuf {
        self.results_dir().join(format!("eval_{split}.txt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_network_name() {
        assert_eq!(full_network_name("mnist_base_vnn", "mnist", None), "mnist_base_vnn");
        assert_eq!(full_network_name("resnet_vnn_18", "cifar10", None), "cifar10_resnet_vnn_18");
        assert_eq!(
            full_network_name("mnist_base_vnn", "mnist_0_1", Some("run2")),
            "mnist_0_1_mnist_base_vnn_run2"
        );
        assert_eq!(full_network_name("vgg_classic_11", "mnist", Some("")), "mnist_vgg_classic_11");
    }

    #[test]
    fn test_paths() {
        let layout = ModelLayout::resolve(None, Path::new("./models"), "vgg_vnn_16", "cifar10", None);
        assert_eq!(layout.dir(), Path::new("./models/cifar10_vgg_vnn_16"));
        assert_eq!(
            layout.validation_log(64),
            Path::new("./models/cifar10_vgg_vnn_16/results/validation_batch_64.txt")
        );
        assert_eq!(
            layout.eval_result(Split::Test),
            Path::new("./models/cifar10_vgg_vnn_16/results/eval_test.txt")
        );
        assert_eq!(
            layout.best_record(),
            Path::new("./models/cifar10_vgg_vnn_16/best/description.json")
        );
    }

    #[test]
    fn test_explicit_path_wins() {
        let layout = ModelLayout::resolve(
            Some(Path::new("/tmp/custom")),
            Path::new("./models"),
            "mnist_base_classic",
            "mnist",
            None,
        );
        assert_eq!(layout.dir(), Path::new("/tmp/custom"));
        assert_eq!(layout.full_name(), "mnist_base_classic");
    }

    #[test]
    fn test_ensure_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::resolve(None, dir.path(), "mnist_base_vnn", "mnist", None);
        layout.ensure().unwrap();
        assert!(layout.results_dir().is_dir());
        assert!(layout.best_dir().is_dir());
    }
}
