//! Cycle-accurate, event-driven out-of-order RISC-V performance model.
//!
//! This crate implements the core of a trace-driven timing simulator:
//! 1. **Fabric:** a phase-ordered discrete-event scheduler, stage-slot
//!    pipelines and credit-based backpressure (`sim`).
//! 2. **Front end:** trace-driven Fetch with a non-blocking ICache, a
//!    two-tier branch predictor (base + TAGE) and a fetch target queue.
//! 3. **Out-of-order machinery:** Decode with vector uop generation,
//!    Rename with move elimination and reference-counted free lists,
//!    credit-bound Dispatch, execution pipes and an in-order-retiring ROB.
//! 4. **Memory:** an LSU with replay and speculative-load aborts, a
//!    DCache with MSHR coalescing, an arbitrated L2 and an address-routed
//!    BIU with mapped devices.
//! 5. **Control:** a centralised flush manager and a pluggable prefetcher.
//!
//! The model is timing-only: it tracks dependency readiness, never
//! architectural values. Instruction semantics, trace decoding beyond the
//! built-in facade, and reporting sinks live outside this crate.

/// Common types and the error taxonomy.
pub mod common;
/// Hierarchical simulator configuration.
pub mod config;
/// The pipeline microarchitecture.
pub mod core;
/// The discrete-event simulation fabric.
pub mod sim;
/// Statistics aggregation and reporting.
pub mod stats;

/// Root configuration type; deserialize from JSON or use `Config::default()`.
pub use crate::config::Config;
/// The fatal error taxonomy.
pub use crate::common::error::SimError;
/// Top-level simulator; owns every unit and the scheduler.
pub use crate::sim::simulator::Simulator;
/// Aggregated run statistics.
pub use crate::stats::SimStats;
