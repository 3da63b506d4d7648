//! Scenario and stress harness for ultramalloc.
//!
//! This crate provides:
//! - Canned scenarios that exercise best-fit, splitting, coalescing, leak
//!   attribution and pointer validation, each producing a pass/fail report
//! - A seeded multi-threaded churn workload with a consistency check
//! - Conversion of the allocator's lifecycle records into JSONL log lines

pub mod churn;
pub mod error;
pub mod rng;
pub mod scenarios;
pub mod structured_log;

pub use churn::{ChurnConfig, ChurnReport, run_churn};
pub use error::HarnessError;
pub use scenarios::{Scenario, ScenarioReport, run_scenario};
pub use structured_log::{LogEmitter, LogEntry};
