//! Accuracy accumulators and run summaries.

use super::best::BestModelRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correct predictions over `batches × nominal batch size` elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningAccuracy {
    correct: usize,
    elements: usize,
}

impl RunningAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one batch. `nominal` is the configured batch size, also for a
    /// short final batch.
    pub fn add(&mut self, correct: usize, nominal: usize) {
        self.correct += correct;
        self.elements += nominal;
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    /// `0` before any batch has been counted.
    pub fn value(&self) -> f64 {
        if self.elements == 0 {
            0.0
        } else {
            self.correct as f64 / self.elements as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Position label of a validation run in the persistent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationLabel {
    /// 1-based epoch, used when the validation interval is a whole number of epochs.
    Epoch(usize),
    Step(u64),
}

impl fmt::Display for ValidationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch(epoch) => write!(f, "epoch {epoch}"),
            Self::Step(step) => write!(f, "step {step}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub label: ValidationLabel,
    pub step: u64,
    pub accuracy: f64,
}

impl ValidationResult {
    /// Line appended to the validation log.
    pub fn log_line(&self) -> String {
        format!("{}: {}", self.label, self.accuracy)
    }
}

/// What a finished training run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    pub epochs: usize,
    pub steps: u64,
    pub checkpoints: usize,
    pub validations: Vec<ValidationResult>,
    pub best: Option<BestModelRecord>,
    pub final_stochasticity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_denominator() {
        let mut acc = RunningAccuracy::new();
        for correct in [3, 4, 1] {
            acc.add(correct, 4);
        }
        assert_eq!(acc.elements(), 12);
        assert_eq!(acc.value(), 8.0 / 12.0);

        acc.reset();
        assert_eq!(acc.value(), 0.0);
    }

    #[test]
    fn test_log_line() {
        let epoch = ValidationResult {
            label: ValidationLabel::Epoch(3),
            step: 300,
            accuracy: 0.5,
        };
        assert_eq!(epoch.log_line(), "epoch 3: 0.5");

        let step = ValidationResult {
            label: ValidationLabel::Step(150),
            step: 150,
            accuracy: 0.25,
        };
        assert_eq!(step.log_line(), "step 150: 0.25");
    }
}
