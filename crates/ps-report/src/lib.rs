//! # ps-report
//!
//! Run Log adapter for PipeSweep: the experiment log, best-trial selection,
//! checkpoint pruning and the ranked comparison report.

mod checkpoints;
mod log;
mod report;
mod runlog;

pub use checkpoints::{retain_only, SCRATCH_DIR};
pub use log::{ExperimentInfo, ExperimentLog};
pub use report::render_report;
pub use runlog::{JsonRunLog, RunLog};
