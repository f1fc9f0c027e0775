//! Error taxonomy for the simulator.
//!
//! Only three kinds of failure are *recoverable enough* to surface as
//! values: configuration errors (caught while building the simulated
//! machine), trace errors (bad input), and the retire-watchdog lockup.
//! Everything else in the pipeline is a modelling invariant and asserts.

use thiserror::Error;

/// Fatal simulator errors surfaced to the top level.
///
/// The launcher prints the message and exits non-zero. Nothing in the
/// pipeline attempts recovery: the model is deterministic, not a runtime.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid configuration detected while building the machine.
    #[error("configuration error: {0}")]
    Config(String),

    /// The trace source handed us something the decoder cannot digest.
    #[error("trace error: {0}")]
    Trace(String),

    /// The ROB made no forward progress for the configured interval.
    ///
    /// Carries a textual dump of the LSU and ROB contents at the time the
    /// watchdog fired.
    #[error("no retirement in {cycles} cycles — pipeline locked up\n{dump}")]
    Lockup {
        /// Cycles since the last retirement.
        cycles: u64,
        /// Debug dump of the stuck units.
        dump: String,
    },
}

impl SimError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Config(msg.into())
    }

    /// Shorthand for a trace error.
    pub fn trace(msg: impl Into<String>) -> Self {
        SimError::Trace(msg.into())
    }
}
