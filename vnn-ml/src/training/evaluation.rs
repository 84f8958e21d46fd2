//! Accuracy of a network over one partition.

use super::metrics::RunningAccuracy;
use super::progress::{EvalProgress, ProgressReporter};
use crate::context::ForwardContext;
use crate::data::loader::BatchSource;
use crate::error::{MlError, Result};
use crate::network::{Network, correct_count};

/// Evaluate `net` over every batch of `source` with stochasticity `0`.
///
/// Returns correct predictions over `batches × nominal batch size`. The network
/// is switched to inference mode for the duration and back to training mode
/// afterwards, also when a step fails.
pub fn run_evaluation<N, S, P>(net: &mut N, source: &mut S, progress: &mut P) -> Result<f64>
where
    N: Network + ?Sized,
    S: BatchSource + ?Sized,
    P: ProgressReporter + ?Sized,
{
    net.set_training(false);
    let result = evaluate_batches(net, source, progress);
    progress.end_line();
    net.set_training(true);
    result
}

fn evaluate_batches<N, S, P>(net: &mut N, source: &mut S, progress: &mut P) -> Result<f64>
where
    N: Network + ?Sized,
    S: BatchSource + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let steps = source.len();
    let nominal = source.batch_size();
    let device = net.device().clone();
    let ctx = ForwardContext::evaluation();
    let mut accuracy = RunningAccuracy::new();

    for (i, batch) in source.batches().enumerate() {
        let batch = batch?.to_device(&device)?;
        let out = net.eval_step(&batch, &ctx, Some(correct_count))?;
        accuracy.add(out.correct.unwrap_or(0), nominal);
        progress.eval_step(&EvalProgress {
            step: i + 1,
            steps,
            loss: out.loss,
            accuracy: accuracy.value(),
        });
    }

    if accuracy.elements() == 0 {
        return Err(MlError::evaluation("partition yielded no batches"));
    }
    tracing::debug!(
        correct = accuracy.correct(),
        elements = accuracy.elements(),
        "evaluation finished"
    );
    Ok(accuracy.value())
}
