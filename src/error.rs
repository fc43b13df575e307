//! Structured recoverable-error type for the kernel.
//!
//! Fatal programmer errors (monotonicity violations, negative holds, double
//! passivation, catch/finally misuse — tier 1 in the design notes) are
//! surfaced with `panic!` at the call site, naming the offending primitive.
//! Everything recoverable (tier 2/3) is returned as a [`KernelError`] instead
//! of aborting the run.

use thiserror::Error;

/// Recoverable errors produced by kernel operations.
///
/// These never originate from a programmer misusing a primitive (those are
/// `panic!`s); they originate from run configuration or from conditions the
/// simulation model itself is expected to handle (a `lost_count` bump is not
/// one of these — it is carried as a statistic, not an error, per
/// `spec.md` §7 tier 2).
#[derive(Debug, Error)]
pub enum KernelError {
    /// `Specs::new` was given a non-positive `dt` or a `stop_time` before
    /// `start_time`.
    #[error("invalid run specs: {0}")]
    InvalidSpecs(String),

    /// A user exception propagated out of a process that was not created
    /// with catch enabled (spec.md §7 tier 3); this aborts the run it
    /// occurred in.
    #[error("unhandled exception in process: {0}")]
    UnhandledException(String),

    /// A model-supplied callback reported an error through `anyhow`-free
    /// boxed-error interop (e.g. a `Dynamics` closure that fails).
    #[error("model error: {0}")]
    Model(String),
}
