//! Per-step progress reporting, overwritten in place on the terminal.

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{QueueableCommand, queue};
use std::fmt;
use std::io::{self, Stdout, Write};

/// One training step as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepProgress<'a> {
    pub network: &'a str,
    pub epoch: usize,
    pub epochs: usize,
    pub step_in_epoch: usize,
    pub steps_per_epoch: usize,
    pub loss: f32,
    pub accuracy: f64,
    /// Present only while annealing.
    pub stochasticity: Option<f64>,
}

impl fmt::Display for StepProgress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} e[{}/{}] s[{}/{}] loss={} acc={}",
            self.network,
            self.epoch,
            self.epochs,
            self.step_in_epoch,
            self.steps_per_epoch,
            self.loss,
            self.accuracy
        )?;
        if let Some(level) = self.stochasticity {
            write!(f, " stochasticity={level}")?;
        }
        Ok(())
    }
}

/// One evaluation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalProgress {
    pub step: usize,
    pub steps: usize,
    pub loss: Option<f32>,
    pub accuracy: f64,
}

impl fmt::Display for EvalProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval s[{}/{}]", self.step, self.steps)?;
        match self.loss {
            Some(loss) => write!(f, " loss={loss}")?,
            None => write!(f, " loss=-")?,
        }
        write!(f, " acc={}", self.accuracy)
    }
}

pub trait ProgressReporter {
    fn train_step(&mut self, progress: &StepProgress<'_>);

    fn eval_step(&mut self, progress: &EvalProgress);

    /// Terminate the line being overwritten.
    fn end_line(&mut self);

    /// A standalone message on its own line.
    fn notice(&mut self, message: &str);
}

impl<P: ProgressReporter + ?Sized> ProgressReporter for &mut P {
    fn train_step(&mut self, progress: &StepProgress<'_>) {
        (**self).train_step(progress)
    }

    fn eval_step(&mut self, progress: &EvalProgress) {
        (**self).eval_step(progress)
    }

    fn end_line(&mut self) {
        (**self).end_line()
    }

    fn notice(&mut self, message: &str) {
        (**self).notice(message)
    }
}

/// Writes progress to stdout, redrawing the current line.
pub struct ConsoleProgress {
    out: Stdout,
    dirty: bool,
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            out: io::stdout(),
            dirty: false,
        }
    }

    fn redraw(&mut self, line: String) {
        let queued = queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        );
        if let Err(e) = queued.and_then(|()| self.out.flush()) {
            tracing::debug!(error = %e, "progress output failed");
        }
        self.dirty = true;
    }
}

impl ProgressReporter for ConsoleProgress {
    fn train_step(&mut self, progress: &StepProgress<'_>) {
        self.redraw(progress.to_string());
    }

    fn eval_step(&mut self, progress: &EvalProgress) {
        self.redraw(progress.to_string());
    }

    fn end_line(&mut self) {
        if self.dirty {
            let result = self
                .out
                .queue(Print("\n"))
                .and_then(|out| out.flush());
            if let Err(e) = result {
                tracing::debug!(error = %e, "progress output failed");
            }
            self.dirty = false;
        }
    }

    fn notice(&mut self, message: &str) {
        self.end_line();
        let result = writeln!(self.out, "{message}");
        if let Err(e) = result {
            tracing::debug!(error = %e, "progress output failed");
        }
    }
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn train_step(&mut self, _progress: &StepProgress<'_>) {}

    fn eval_step(&mut self, _progress: &EvalProgress) {}

    fn end_line(&mut self) {}

    fn notice(&mut self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_line() {
        let mut progress = StepProgress {
            network: "mnist_base_vnn",
            epoch: 1,
            epochs: 3,
            step_in_epoch: 7,
            steps_per_epoch: 100,
            loss: 0.5,
            accuracy: 0.25,
            stochasticity: None,
        };
        assert_eq!(
            progress.to_string(),
            "mnist_base_vnn e[1/3] s[7/100] loss=0.5 acc=0.25"
        );
        progress.stochasticity = Some(0.75);
        assert!(progress.to_string().ends_with(" stochasticity=0.75"));
    }

    #[test]
    fn test_eval_line() {
        let progress = EvalProgress {
            step: 2,
            steps: 10,
            loss: None,
            accuracy: 0.5,
        };
        assert_eq!(progress.to_string(), "eval s[2/10] loss=- acc=0.5");
    }
}
