//! sersec - serial-section analysis for multi-cpu memory access traces
//!
//! Reconstructs the intervals during which a lock was held (or an access was
//! made with no lock held) from a totally ordered trace, and attributes held
//! cycles, coherence misses and lock-protected instructions to each lock,
//! acquiring call site and thread.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod cpu;
pub mod error;
pub mod objects;
pub mod report;
pub mod serial;
pub mod trace;
