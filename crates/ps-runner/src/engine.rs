//! The training engine seam.
//!
//! An engine turns one resolved configuration into a [`ResultsRecord`]. It is
//! an opaque, possibly long-running, possibly failing black box; the runner
//! only decides where it runs, which device it may use and where its console
//! output goes.

use std::fs::File;
use std::path::Path;

use ps_types::{DataIterator, EngineError, PipelineConfig, ResultsRecord};

/// Whether the engine trains and/or evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionMode {
    pub train: bool,
    pub validate: bool,
}

impl ExecutionMode {
    /// Full trial: train, then evaluate.
    pub const FULL: Self = Self {
        train: true,
        validate: true,
    };

    /// Validation pass: prove the pipeline builds and trains, skip evaluation.
    pub const DRY_RUN: Self = Self {
        train: true,
        validate: false,
    };
}

/// Everything a trial is bound to while it runs.
#[derive(Debug, Clone, Copy)]
pub struct TrialContext<'a> {
    pub index: usize,
    /// Device the trial may use; `None` means CPU only.
    pub device: Option<u32>,
    /// Isolated output location of this trial.
    pub trial_dir: &'a Path,
    /// Per-trial console log; engine output must go here, never to the
    /// process' shared stdout.
    pub console: &'a File,
}

pub trait TrainingEngine: Sync {
    /// Read the dataset of `config` and build its data iterator.
    fn load_data(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
    ) -> Result<DataIterator, EngineError>;

    /// Train and/or evaluate `config`. With `iterator` the engine uses the
    /// given data instead of reading the dataset itself.
    fn execute(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
        iterator: Option<&DataIterator>,
        mode: ExecutionMode,
    ) -> Result<ResultsRecord, EngineError>;
}

impl<E: TrainingEngine + ?Sized> TrainingEngine for &E {
    fn load_data(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
    ) -> Result<DataIterator, EngineError> {
        (**self).load_data(ctx, config)
    }

    fn execute(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
        iterator: Option<&DataIterator>,
        mode: ExecutionMode,
    ) -> Result<ResultsRecord, EngineError> {
        (**self).execute(ctx, config, iterator, mode)
    }
}
