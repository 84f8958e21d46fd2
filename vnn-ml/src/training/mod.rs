//! Training orchestration: schedule, loop, validation, checkpoints, best model.

pub mod best;
pub mod evaluation;
pub mod layout;
pub mod metrics;
pub mod progress;
pub mod runner;
pub mod schedule;

#[cfg(test)]
pub(crate) mod testing;

pub use best::{BestModelProtocol, BestModelRecord, IMPROVEMENT_MARGIN};
pub use evaluation::run_evaluation;
pub use layout::{ModelLayout, full_network_name};
pub use metrics::{RunningAccuracy, TrainSummary, ValidationLabel, ValidationResult};
pub use progress::{ConsoleProgress, EvalProgress, ProgressReporter, SilentProgress, StepProgress};
pub use runner::{RunOptions, TrainingRunState, TrainingRunner};
pub use schedule::{AnnealingSchedule, StepInterval};
