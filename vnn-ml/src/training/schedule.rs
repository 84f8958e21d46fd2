//! Step intervals and the annealed stochasticity schedule.

use crate::error::{MlError, Result};
use serde::{Deserialize, Serialize};

/// How often something happens, in steps or whole epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepInterval {
    Steps(u64),
    Epochs(u64),
}

impl StepInterval {
    /// Positive values count steps; zero and negative values count `|value|` epochs.
    pub fn from_signed(value: i64) -> Self {
        if value > 0 {
            Self::Steps(value.unsigned_abs())
        } else {
            Self::Epochs(value.unsigned_abs())
        }
    }

    /// Interval in steps. A zero interval is a configuration error.
    pub fn resolve(&self, steps_per_epoch: usize) -> Result<u64> {
        let steps = match *self {
            Self::Steps(steps) => steps,
            Self::Epochs(epochs) => epochs.saturating_mul(steps_per_epoch as u64),
        };
        if steps == 0 {
            return Err(MlError::config(format!(
                "{self:?} resolves to a zero-step interval ({steps_per_epoch} steps per epoch)"
            )));
        }
        Ok(steps)
    }
}

/// Linear ramp of the stochasticity level from `start` to `end` over a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnealingSchedule {
    pub start: f64,
    pub end: f64,
    pub total_steps: u64,
}

impl AnnealingSchedule {
    /// Build from the optional bounds of a run.
    ///
    /// Both bounds enable annealing. A start without an end is rejected; an end
    /// without a start is ignored with a warning.
    pub fn from_bounds(start: Option<f64>, end: Option<f64>, total_steps: u64) -> Result<Option<Self>> {
        match (start, end) {
            (Some(start), Some(end)) => {
                if !start.is_finite() || !end.is_finite() {
                    return Err(MlError::config(format!(
                        "annealing bounds must be finite, got {start} and {end}"
                    )));
                }
                Ok(Some(Self {
                    start,
                    end,
                    total_steps,
                }))
            }
            (Some(_), None) => Err(MlError::config(
                "start stochasticity given without an end stochasticity",
            )),
            (None, Some(end)) => {
                tracing::warn!(end, "end stochasticity given without a start; annealing disabled");
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    /// Level used by 1-based step `step`.
    pub fn level_at(&self, step: u64) -> f64 {
        if self.start == self.end {
            return self.start;
        }
        if self.total_steps == 0 || step >= self.total_steps {
            return self.end;
        }
        let t = step as f64 / self.total_steps as f64;
        let level = self.start + t * (self.end - self.start);
        level.clamp(self.start.min(self.end), self.start.max(self.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_negative_interval_counts_epochs() {
        assert_eq!(StepInterval::from_signed(-2).resolve(100).unwrap(), 200);
        assert_eq!(StepInterval::from_signed(-1).resolve(100).unwrap(), 100);
        assert_eq!(StepInterval::from_signed(250).resolve(100).unwrap(), 250);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(StepInterval::from_signed(0).resolve(100).is_err());
        assert!(StepInterval::from_signed(-3).resolve(0).is_err());
    }

    #[test]
    fn test_bounds() {
        assert!(AnnealingSchedule::from_bounds(Some(1.0), None, 10).is_err());
        assert_eq!(AnnealingSchedule::from_bounds(None, Some(1.0), 10).unwrap(), None);
        assert_eq!(AnnealingSchedule::from_bounds(None, None, 10).unwrap(), None);
        assert!(AnnealingSchedule::from_bounds(Some(f64::NAN), Some(1.0), 10).is_err());
    }

    #[test]
    fn test_linear_ramp() {
        let schedule = AnnealingSchedule {
            start: 0.0,
            end: 1.0,
            total_steps: 4,
        };
        let levels: Vec<f64> = (1..=4).map(|s| schedule.level_at(s)).collect();
        assert_eq!(levels, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_constant_when_bounds_equal() {
        let schedule = AnnealingSchedule {
            start: 0.3,
            end: 0.3,
            total_steps: 7,
        };
        assert!((1..=7).all(|s| schedule.level_at(s) == 0.3));
    }

    proptest! {
        #[test]
        fn prop_level_stays_within_bounds(
            start in -5.0f64..5.0,
            end in -5.0f64..5.0,
            total in 1u64..10_000,
            step in 1u64..10_000,
        ) {
            let schedule = AnnealingSchedule { start, end, total_steps: total };
            let level = schedule.level_at(step.min(total));
            prop_assert!(level >= start.min(end) && level <= start.max(end));
        }

        #[test]
        fn prop_level_reaches_end_exactly(
            start in -5.0f64..5.0,
            end in -5.0f64..5.0,
            total in 1u64..10_000,
        ) {
            let schedule = AnnealingSchedule { start, end, total_steps: total };
            prop_assert_eq!(schedule.level_at(total), end);
        }

        #[test]
        fn prop_epoch_interval_is_multiple(epochs in 1i64..50, per_epoch in 1usize..1_000) {
            let steps = StepInterval::from_signed(-epochs).resolve(per_epoch).unwrap();
            prop_assert_eq!(steps, epochs as u64 * per_epoch as u64);
        }
    }
}
