//! # ps-runner
//!
//! Runs a PipeSweep experiment: builds trial units from the pipeline stream,
//! dispatches them to device-bound workers, runs the validation dry run and
//! hands every result to the run log.

pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod experiment;
pub mod pool;
pub mod source;
pub mod trial;
pub mod validation;

pub use command::CommandEngine;
pub use dispatcher::{Dispatcher, RunSummary};
pub use engine::{ExecutionMode, TrainingEngine, TrialContext};
pub use experiment::Experiment;
pub use pool::WorkerPool;
pub use source::{JsonLinesGenerator, JsonLinesSource, VecGenerator, VecSource};
pub use trial::{prepare_workspace, TrialRunner, TrialWorkspace};
pub use validation::{check_iterator, truncate, ValidationPass, ValidationReport};
