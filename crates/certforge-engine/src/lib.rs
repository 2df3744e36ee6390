//! Job orchestration for certforge.
//!
//! Wires the deterministic synthesizers, the bounded producer/consumer
//! pipeline, and the streaming store into a job surface: `start_job`,
//! `get_status`, `cancel_job`, `query_active`, plus the CSV export of the
//! active subset.

pub mod errors;
pub mod export;
pub mod job;
pub mod pipeline;

pub use errors::JobError;
pub use export::{export_active_csv, ExportSummary};
pub use job::{JobRegistry, JobRequest};
