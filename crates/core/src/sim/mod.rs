//! The discrete-event simulation fabric.
//!
//! This module provides:
//! 1. **Scheduler:** phase-ordered event loop (`scheduler`).
//! 2. **Events:** the wire/event vocabulary (`event`).
//! 3. **Pipelines:** stage-slot pipelines (`pipeline`).
//! 4. **Credits:** backpressure counters (`ports`).
//! 5. **Simulator:** unit construction, wiring and run control
//!    (`simulator`).

/// Wire and event vocabulary.
pub mod event;
/// Stage-slot pipelines.
pub mod pipeline;
/// Credit counters.
pub mod ports;
/// Phase-ordered event scheduler.
pub mod scheduler;
/// Top-level simulator.
pub mod simulator;
