//! Mini-batch iteration over a partition.

use super::DataSplit;
use crate::error::{MlError, Result};
use crate::network::Batch;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Anything the training loop and evaluation runner can draw batches from.
pub trait BatchSource {
    /// Batches per pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured batch size; the last batch of a pass may be smaller.
    fn batch_size(&self) -> usize;

    /// One pass over the data.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// Batches a [`DataSplit`], optionally reshuffled at the start of every pass.
#[derive(Debug)]
pub struct BatchLoader {
    split: DataSplit,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl BatchLoader {
    pub fn new(split: DataSplit, batch_size: usize, shuffle: bool, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(MlError::config("batch size must be at least 1"));
        }
        Ok(Self {
            split,
            batch_size,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn examples(&self) -> usize {
        self.split.len()
    }
}

impl BatchSource for BatchLoader {
    fn len(&self) -> usize {
        self.split.len().div_ceil(self.batch_size)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let mut order: Vec<u32> = (0..self.split.len() as u32).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let split = &self.split;
        let chunks: Vec<Vec<u32>> = order.chunks(self.batch_size).map(<[u32]>::to_vec).collect();
        Box::new(chunks.into_iter().map(move |indices| -> Result<Batch> {
            let part = split.select(&indices)?;
            Ok(Batch::new(part.images, part.labels))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawImages;
    use pretty_assertions::assert_eq;

    fn split(n: u8) -> DataSplit {
        RawImages {
            pixels: (0..n).collect(),
            labels: (0..n).map(|i| i % 10).collect(),
            channels: 1,
            height: 1,
            width: 1,
        }
        .normalize(&[0.0], &[1.0])
        .unwrap()
    }

    fn labels(loader: &mut BatchLoader) -> Vec<Vec<u32>> {
        loader
            .batches()
            .map(|b| b.unwrap().target.to_vec1::<u32>().unwrap())
            .collect()
    }

    #[test]
    fn test_len_includes_partial_batch() {
        let loader = BatchLoader::new(split(10), 4, false, 0).unwrap();
        assert_eq!(loader.len(), 3);
        assert_eq!(loader.batch_size(), 4);
    }

    #[test]
    fn test_sequential_order() {
        let mut loader = BatchLoader::new(split(5), 2, false, 0).unwrap();
        assert_eq!(labels(&mut loader), vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_shuffle_reorders_between_passes() {
        let mut loader = BatchLoader::new(split(50), 50, true, 3).unwrap();
        let first = labels(&mut loader);
        let second = labels(&mut loader);
        assert_ne!(first, second);

        let mut sorted: Vec<u32> = first.concat();
        sorted.sort();
        let mut expected: Vec<u32> = (0..50).map(|i| i % 10).collect();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(BatchLoader::new(split(3), 0, false, 0).is_err());
    }
}
