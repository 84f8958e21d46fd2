//! Best-model selection. One persisted record per model directory.

use crate::error::Result;
use crate::network::Network;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vnn_core::persistence;

/// A candidate must beat the recorded result by this factor to replace it.
pub const IMPROVEMENT_MARGIN: f64 = 1.001;

pub const RECORD_FILE: &str = "description.json";

/// Persisted as `{"epoch": .., "batch": .., "result": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestModelRecord {
    /// 1-based epoch of the validation that produced the result.
    pub epoch: usize,
    /// Nominal batch size of the run.
    #[serde(rename = "batch")]
    pub batch_size: usize,
    pub result: f64,
}

#[derive(Debug, Clone)]
pub struct BestModelProtocol {
    best_dir: PathBuf,
    margin: f64,
}

impl BestModelProtocol {
    pub fn new(best_dir: impl Into<PathBuf>) -> Self {
        Self {
            best_dir: best_dir.into(),
            margin: IMPROVEMENT_MARGIN,
        }
    }

    pub fn best_dir(&self) -> &Path {
        &self.best_dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.best_dir.join(RECORD_FILE)
    }

    pub fn load_record(&self) -> Result<Option<BestModelRecord>> {
        Ok(persistence::load_json(&self.record_path())?)
    }

    /// Absent record ⇒ new best; otherwise `candidate > recorded × margin`.
    pub fn is_improvement(&self, candidate: f64, recorded: Option<&BestModelRecord>) -> bool {
        match recorded {
            None => true,
            Some(record) => candidate > record.result * self.margin,
        }
    }

    /// Save `net` and `record` as the new best when the record improves on the
    /// stored one. The checkpoint is written before the record describing it.
    pub fn consider<N: Network + ?Sized>(&self, net: &N, record: BestModelRecord) -> Result<bool> {
        let prior = self.load_record()?;
        if !self.is_improvement(record.result, prior.as_ref()) {
            tracing::debug!(
                candidate = record.result,
                recorded = prior.map(|p| p.result),
                "validation result is not a new best"
            );
            return Ok(false);
        }
        net.save(&self.best_dir)?;
        persistence::atomic_write_json(&self.record_path(), &record)?;
        tracing::info!(
            epoch = record.epoch,
            result = record.result,
            dir = %self.best_dir.display(),
            "saved new best model"
        );
        Ok(true)
    }
}
