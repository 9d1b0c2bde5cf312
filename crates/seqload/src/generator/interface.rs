use crate::{Checkpoint, Error};
use num_bigint::BigUint;

/// Which field of a checkpoint drives a sequence forward.
///
/// The driving quantity is both the input to [`SequenceGenerator::next`] and
/// the quantity compared against the run's ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The next term is derived from the previous *value* (primes).
    Value,
    /// The next term is derived from the previous *position* (Fibonacci).
    Position,
}

impl Progress {
    /// Selects the driving quantity of `checkpoint`.
    pub fn of(self, checkpoint: &Checkpoint) -> &BigUint {
        match self {
            Self::Value => &checkpoint.value,
            Self::Position => &checkpoint.position,
        }
    }
}

/// Outcome of a single [`SequenceGenerator::next`] call.
///
/// A [`Step::Failed`] is never fatal: the worker logs it, writes nothing for
/// this iteration and tries again after its pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The next term of the sequence.
    Computed(BigUint),
    /// No term could be produced this cycle.
    Failed(Error),
}

impl Step {
    /// Returns the computed value, if any.
    pub fn computed(self) -> Option<BigUint> {
        match self {
            Self::Computed(value) => Some(value),
            Self::Failed(_) => None,
        }
    }
}

impl From<crate::Result<BigUint>> for Step {
    fn from(res: crate::Result<BigUint>) -> Self {
        match res {
            Ok(value) => Self::Computed(value),
            Err(e) => Self::Failed(e),
        }
    }
}

/// A deterministic, I/O-free sequence.
///
/// Implementations may keep private state (e.g. a cache of the last terms) to
/// speed up the common case of being called with consecutive inputs, but the
/// result of `next` must depend on `previous` alone. Each worker owns its own
/// clone, so `&mut self` never crosses partitions.
pub trait SequenceGenerator: Clone + Send + Sync + 'static {
    /// Short name used in logs and metric attributes.
    fn name(&self) -> &'static str;

    /// Value stored at position zero, used for an empty partition.
    fn seed(&self) -> BigUint;

    /// Which checkpoint field feeds `next` and the ceiling check.
    fn progress(&self) -> Progress;

    /// Computes the term following `previous`.
    fn next(&mut self, previous: &BigUint) -> Step;

    /// Checkpoint of a partition that has never written anything.
    fn seed_checkpoint(&self) -> Checkpoint {
        Checkpoint::seed(self.seed())
    }
}
