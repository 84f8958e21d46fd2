//! Dataset provisioning: train/validation/test partitions for named datasets.
//!
//! The official training set is split into train and validation partitions with a
//! seeded shuffle; the official test set is the test partition. Pixels are scaled
//! to `[0, 1]` and normalized per channel with the dataset's mean and std.

pub mod cifar;
pub mod loader;
pub mod mnist;

use crate::error::{MlError, Result};
use crate::zoo::InputShape;
use candle_core::{Device, Tensor};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use loader::{BatchLoader, BatchSource};

/// Static description of a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetSpec {
    pub mean: &'static [f32],
    pub std: &'static [f32],
    pub train_size: usize,
    pub validation_size: usize,
    pub input: InputShape,
}

const MNIST_INPUT: InputShape = InputShape {
    channels: 1,
    height: 28,
    width: 28,
    classes: 10,
};

const CIFAR10_INPUT: InputShape = InputShape {
    channels: 3,
    height: 32,
    width: 32,
    classes: 10,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Mnist,
    /// MNIST scaled to `[0, 1]` without normalization.
    Mnist01,
    Cifar10,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [Self::Mnist, Self::Mnist01, Self::Cifar10];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::Mnist01 => "mnist_0_1",
            Self::Cifar10 => "cifar10",
        }
    }

    pub fn spec(&self) -> DatasetSpec {
        match self {
            Self::Mnist => DatasetSpec {
                mean: &[0.1307],
                std: &[0.3081],
                train_size: 50_000,
                validation_size: 10_000,
                input: MNIST_INPUT,
            },
            Self::Mnist01 => DatasetSpec {
                mean: &[0.0],
                std: &[1.0],
                train_size: 50_000,
                validation_size: 10_000,
                input: MNIST_INPUT,
            },
            Self::Cifar10 => DatasetSpec {
                mean: &[0.5, 0.5, 0.5],
                std: &[0.5, 0.5, 0.5],
                train_size: 40_000,
                validation_size: 10_000,
                input: CIFAR10_INPUT,
            },
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetKind {
    type Err = MlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| MlError::not_found("dataset", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Split {
    type Err = MlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "validation" => Ok(Self::Validation),
            "test" => Ok(Self::Test),
            other => Err(MlError::not_found("split", other)),
        }
    }
}

/// Decoded examples in file order: `u8` pixels laid out `(N, C, H, W)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImages {
    pub pixels: Vec<u8>,
    pub labels: Vec<u8>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl RawImages {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Scale to `[0, 1]`, normalize per channel and move into tensors.
    pub fn normalize(&self, mean: &[f32], std: &[f32]) -> Result<DataSplit> {
        if mean.len() != self.channels || std.len() != self.channels {
            return Err(MlError::dataset(format!(
                "normalization has {} channels, images have {}",
                mean.len(),
                self.channels
            )));
        }
        let plane = self.height * self.width;
        let values: Vec<f32> = self
            .pixels
            .iter()
            .enumerate()
            .map(|(i, pixel)| {
                let c = (i / plane) % self.channels;
                (*pixel as f32 / 255.0 - mean[c]) / std[c]
            })
            .collect();
        let images = Tensor::from_vec(
            values,
            (self.len(), self.channels, self.height, self.width),
            &Device::Cpu,
        )?;
        let labels: Vec<u32> = self.labels.iter().map(|l| *l as u32).collect();
        let labels = Tensor::from_vec(labels, self.len(), &Device::Cpu)?;
        Ok(DataSplit { images, labels })
    }
}

/// One partition: `(N, C, H, W)` f32 images and `(N,)` u32 labels, on the CPU.
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub images: Tensor,
    pub labels: Tensor,
}

impl DataSplit {
    pub fn len(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Examples at `indices`, in that order.
    pub fn select(&self, indices: &[u32]) -> Result<DataSplit> {
        let index = Tensor::from_slice(indices, indices.len(), &Device::Cpu)?;
        Ok(Self {
            images: self.images.index_select(&index, 0)?,
            labels: self.labels.index_select(&index, 0)?,
        })
    }
}

/// The three partitions of one dataset.
#[derive(Debug, Clone)]
pub struct Partitions {
    pub train: DataSplit,
    pub validation: DataSplit,
    pub test: DataSplit,
}

impl Partitions {
    pub fn into_split(self, split: Split) -> DataSplit {
        match split {
            Split::Train => self.train,
            Split::Validation => self.validation,
            Split::Test => self.test,
        }
    }
}

/// Seeded permutation of `0..n` split into the first `train` and next `validation` indices.
pub fn split_indices(n: usize, train: usize, validation: usize, seed: u64) -> Result<(Vec<u32>, Vec<u32>)> {
    if train + validation > n {
        return Err(MlError::dataset(format!(
            "cannot split {n} examples into {train} train and {validation} validation"
        )));
    }
    let mut indices: Vec<u32> = (0..n as u32).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let validation_indices = indices[train..train + validation].to_vec();
    indices.truncate(train);
    Ok((indices, validation_indices))
}

/// Loads datasets from a cache directory, downloading them when absent.
#[derive(Debug, Clone)]
pub struct DatasetProvisioner {
    root: PathBuf,
    seed: u64,
}

impl DatasetProvisioner {
    pub fn new(root: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            root: root.into(),
            seed,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn raw(&self, kind: DatasetKind) -> Result<(RawImages, RawImages)> {
        match kind {
            DatasetKind::Mnist | DatasetKind::Mnist01 => mnist::load(&self.root),
            DatasetKind::Cifar10 => cifar::load(&self.root),
        }
    }

    /// Train, validation and test partitions of `kind`.
    pub fn partitions(&self, kind: DatasetKind) -> Result<Partitions> {
        let spec = kind.spec();
        let (train_raw, test_raw) = self.raw(kind)?;
        let full_train = train_raw.normalize(spec.mean, spec.std)?;
        let test = test_raw.normalize(spec.mean, spec.std)?;

        let (train_idx, validation_idx) = split_indices(
            full_train.len(),
            spec.train_size,
            spec.validation_size,
            self.seed,
        )?;
        tracing::info!(
            dataset = %kind,
            train = train_idx.len(),
            validation = validation_idx.len(),
            test = test.len(),
            "provisioned dataset"
        );
        Ok(Partitions {
            train: full_train.select(&train_idx)?,
            validation: full_train.select(&validation_idx)?,
            test,
        })
    }
}
