//! Forward-pass context shared by every layer of one pass.
//!
//! Variational layers scale their sampled noise by `stochasticity`; dropout layers
//! and batch normalization look at the mode. A single context value is threaded
//! through the whole model, so all layers observe the same level within one pass.

/// What a forward pass is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Training step: dropout active, batch-norm statistics updated.
    Train,
    /// Deterministic inference.
    Eval,
    /// Stochastic inference for Monte-Carlo sampling: dropout active,
    /// batch-norm running statistics left alone.
    Sample,
}

/// Settings for one forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardContext {
    /// Noise scale used by variational layers. `0` makes them deterministic.
    pub stochasticity: f64,
    pub mode: PassMode,
}

impl ForwardContext {
    /// Context for a training step at the given level.
    pub fn training(stochasticity: f64) -> Self {
        Self {
            stochasticity,
            mode: PassMode::Train,
        }
    }

    /// Deterministic inference at level `0`.
    pub fn evaluation() -> Self {
        Self {
            stochasticity: 0.0,
            mode: PassMode::Eval,
        }
    }

    /// Stochastic inference at the given level.
    pub fn sampling(stochasticity: f64) -> Self {
        Self {
            stochasticity,
            mode: PassMode::Sample,
        }
    }

    /// The same pass with batch-norm running statistics left untouched.
    pub fn frozen(&self) -> Self {
        let mode = match self.mode {
            PassMode::Train => PassMode::Sample,
            other => other,
        };
        Self { mode, ..*self }
    }

    /// Dropout layers drop units in training and sampling passes.
    pub fn drops_units(&self) -> bool {
        matches!(self.mode, PassMode::Train | PassMode::Sample)
    }

    /// Batch normalization uses batch statistics and updates its running averages.
    pub fn updates_statistics(&self) -> bool {
        self.mode == PassMode::Train
    }

    /// Variational layers add noise only at a non-zero level.
    pub fn samples_weights(&self) -> bool {
        self.stochasticity != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_is_noise_free() {
        let ctx = ForwardContext::evaluation();
        assert_eq!(ctx.stochasticity, 0.0);
        assert!(!ctx.drops_units());
        assert!(!ctx.updates_statistics());
        assert!(!ctx.samples_weights());
    }

    #[test]
    fn test_sampling_keeps_running_statistics() {
        let ctx = ForwardContext::sampling(0.5);
        assert!(ctx.drops_units());
        assert!(ctx.samples_weights());
        assert!(!ctx.updates_statistics());
    }

    #[test]
    fn test_frozen_training_pass() {
        let ctx = ForwardContext::training(0.3).frozen();
        assert_eq!(ctx.mode, PassMode::Sample);
        assert_eq!(ctx.stochasticity, 0.3);
        assert_eq!(ForwardContext::evaluation().frozen(), ForwardContext::evaluation());
    }

    #[test]
    fn test_training_at_zero_level_is_weight_deterministic() {
        let ctx = ForwardContext::training(0.0);
        assert!(ctx.drops_units());
        assert!(!ctx.samples_weights());
    }
}
