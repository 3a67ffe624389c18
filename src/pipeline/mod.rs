//! Pipeline entry points.
//!
//! - `run_pipeline`: fetch, filter, dedupe and deliver for every destination
//! - `preview`: the same without delivering or recording

pub mod context;
pub mod report;
pub mod run;

pub use context::RunContext;
pub use report::{DestinationReport, DestinationState, RunSummary};
pub use run::{preview, run_pipeline};
