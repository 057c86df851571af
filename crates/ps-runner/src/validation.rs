//! Validation pass: a cheap, strictly ordered dry run of every configuration
//! on a tiny sample of its dataset, before any real trial is scheduled.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use ps_types::{
    ConfigError, DataIterator, DatasetComposition, IteratorKind, PipelineGenerator, SampleCeiling,
    Split, Splits, SweepResult, TrainRequirements,
};

use crate::engine::{ExecutionMode, TrainingEngine, TrialContext};
use crate::trial::prepare_workspace;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub trials: usize,
    /// Split layout recorded from the first configuration.
    pub composition: Option<DatasetComposition>,
    pub duration: Duration,
}

/// Structural checks on the data iterator of trial `index`.
///
/// The first call records `baseline`; later calls fail when a split recorded
/// as non-empty has become empty. A split that was empty in the baseline may
/// become non-empty.
pub fn check_iterator(
    index: usize,
    dataset: &str,
    iterator: &DataIterator,
    requirements: &TrainRequirements,
    baseline: &mut Option<DatasetComposition>,
) -> Result<(), ConfigError> {
    if iterator.kind == IteratorKind::Fitting {
        return Err(ConfigError::UnsupportedIterator { index });
    }

    match baseline {
        None => *baseline = Some(DatasetComposition::from_splits(&iterator.data)),
        Some(composition) => composition.check(&iterator.data, dataset)?,
    }

    if requirements.test_best && iterator.data.is_empty(Split::Test) {
        return Err(ConfigError::EmptyEvaluationSplit {
            split: Split::Test.to_string(),
            requirement: "the best model is evaluated on it ('test_best')".to_string(),
        });
    }
    if requirements.needs_valid() && iterator.data.is_empty(Split::Valid) {
        return Err(ConfigError::EmptyEvaluationSplit {
            split: Split::Valid.to_string(),
            requirement: "'validate_best' or 'val_every_n_epochs' needs it".to_string(),
        });
    }
    Ok(())
}

/// Cut every split down to its ceiling. Splits already at or under the
/// ceiling are kept whole; a non-empty one under it is reported.
pub fn truncate(iterator: &DataIterator, ceiling: &SampleCeiling) -> DataIterator {
    let cut = |split: Split| {
        let samples = iterator.data.get(split);
        let limit = ceiling.get(split);
        if !samples.is_empty() && samples.len() < limit {
            warn!(
                "The '{}' split has only {} sample(s), fewer than the {} used for validation",
                split,
                samples.len(),
                limit
            );
        }
        samples[..samples.len().min(limit)].to_vec()
    };
    DataIterator::new(
        iterator.kind,
        Splits {
            train: cut(Split::Train),
            valid: cut(Split::Valid),
            test: cut(Split::Test),
        },
    )
}

pub struct ValidationPass<'a, E: ?Sized> {
    engine: &'a E,
    ceiling: SampleCeiling,
    scratch_dir: PathBuf,
}

impl<'a, E: TrainingEngine + ?Sized> ValidationPass<'a, E> {
    pub fn new(engine: &'a E, ceiling: SampleCeiling, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            ceiling,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Dry-run every configuration in generation order, without devices and
    /// without evaluation. The first error of any kind aborts the pass; the
    /// scratch directory is only cleaned up when every configuration passed.
    pub fn validate<G: PipelineGenerator + ?Sized>(&self, generator: &G) -> SweepResult<ValidationReport> {
        let total = generator.len();
        let start = Instant::now();
        info!("Validation start: {} pipeline(s) will be dry-run", total);

        let mut baseline = None;
        let mut trials = 0;
        for (index, item) in generator.configs()?.enumerate() {
            let config = item?;
            let dataset = config.dataset_name()?;
            let workspace = prepare_workspace(&self.scratch_dir, &dataset, index + 1)?;
            let ctx = TrialContext {
                index,
                device: None,
                trial_dir: &workspace.dir,
                console: &workspace.console,
            };

            let iterator = self.engine.load_data(&ctx, &config)?;
            check_iterator(
                index,
                config.dataset_path()?,
                &iterator,
                &config.train_requirements(),
                &mut baseline,
            )?;
            let tiny = truncate(&iterator, &self.ceiling);

            // The score of a dry run means nothing.
            let _ = self
                .engine
                .execute(&ctx, &config, Some(&tiny), ExecutionMode::DRY_RUN)?;
            trials += 1;
            debug!("Validated pipeline {}/{}", index + 1, total);
        }

        if self.scratch_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.scratch_dir) {
                warn!("Failed to remove {}: {}", self.scratch_dir.display(), e);
            }
        }

        info!("Validation passed for {} pipeline(s)", trials);
        Ok(ValidationReport {
            trials,
            composition: baseline,
            duration: start.elapsed(),
        })
    }
}
