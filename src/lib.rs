//! DNS latency monitor
//!
//! Probes a set of nameservers with A queries over a single UDP socket,
//! correlates responses by DNS message ID and reports per-probe latency,
//! including timeouts, to a pluggable telemetry sink.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod internal_metrics;
pub mod logging;
pub mod probe;
pub mod task_manager;
pub mod types;

// Re-export core types for convenience
pub use core::*;
