// The crate's entire configuration surface: VM limits the host constructs
// and passes into `Vm::new`. There is no file/env loader here; that
// boundary belongs to the embedding application.

/// Bounds and tuning knobs for a single `Vm::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VdbeLimits {
    /// Maximum instructions a single `run` may execute before
    /// `VdbeError::StepLimitExceeded`.
    pub step_limit: u64,
    /// How often (in instructions) the interpreter polls the cancel source.
    pub cancel_poll_interval: u64,
    /// Initial register file capacity, grown on demand past this.
    pub initial_registers: usize,
    /// Initial cursor table capacity, grown on demand past this.
    pub initial_cursors: usize,
}

impl Default for VdbeLimits {
    fn default() -> Self {
        Self {
            step_limit: 1_000_000,
            cancel_poll_interval: 100,
            initial_registers: 16,
            initial_cursors: 4,
        }
    }
}
