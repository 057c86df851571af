//! Execution of a single trial, isolated at the trial boundary.

use chrono::Utc;
use std::any::Any;
use std::fs::{self, File};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

use ps_types::{SweepResult, TrialError, TrialOutcome, TrialResult, TrialUnit};

use crate::engine::{ExecutionMode, TrainingEngine, TrialContext};

pub const CONFIG_FILE: &str = "config.json";
pub const CONSOLE_FILE: &str = "out.txt";

/// Isolated output location of one trial.
#[derive(Debug)]
pub struct TrialWorkspace {
    pub dir: PathBuf,
    pub console: File,
}

/// Create `<root>/<dataset>/pipe_<n>`. An existing directory (a re-run into
/// the same experiment) falls back to `pipe_<n>_rerun`.
pub fn prepare_workspace(root: &Path, dataset: &str, ordinal: usize) -> SweepResult<TrialWorkspace> {
    let parent = root.join(dataset);
    fs::create_dir_all(&parent)?;

    let primary = parent.join(format!("pipe_{ordinal}"));
    let dir = match fs::create_dir(&primary) {
        Ok(()) => primary,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let alternate = parent.join(format!("pipe_{ordinal}_rerun"));
            warn!(
                "{} already exists, writing trial output to {}",
                primary.display(),
                alternate.display()
            );
            fs::create_dir_all(&alternate)?;
            alternate
        }
        Err(e) => return Err(e.into()),
    };

    let console = File::create(dir.join(CONSOLE_FILE))?;
    Ok(TrialWorkspace { dir, console })
}

/// Runs trial units against an engine. Shared read-only by every worker.
pub struct TrialRunner<'e, E: ?Sized> {
    engine: &'e E,
    checkpoint_dir: PathBuf,
}

impl<'e, E: TrainingEngine + ?Sized> TrialRunner<'e, E> {
    pub fn new(engine: &'e E, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Run one unit. Never panics and never returns an error: every failure,
    /// including a panicking engine, becomes a [`TrialOutcome::Failed`].
    pub fn run(&self, unit: &TrialUnit) -> TrialOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_run(unit))) {
            Ok(Ok(result)) => TrialOutcome::Completed(result),
            Ok(Err(e)) => TrialOutcome::Failed(TrialError::new(unit.index, e.to_string())),
            Err(payload) => TrialOutcome::Failed(TrialError::new(
                unit.index,
                format!("trial panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }

    fn try_run(&self, unit: &TrialUnit) -> SweepResult<TrialResult> {
        let dataset_name = unit.config.dataset_name()?;
        let workspace = prepare_workspace(&self.checkpoint_dir, &dataset_name, unit.ordinal())?;
        let ctx = TrialContext {
            index: unit.index,
            device: unit.device,
            trial_dir: &workspace.dir,
            console: &workspace.console,
        };

        debug!(
            "Starting trial {} on device {:?} in {}",
            unit.ordinal(),
            unit.device,
            workspace.dir.display()
        );
        let start = Instant::now();
        let metrics = self
            .engine
            .execute(&ctx, &unit.config, None, ExecutionMode::FULL)?;
        let elapsed = start.elapsed();

        fs::write(
            workspace.dir.join(CONFIG_FILE),
            serde_json::to_vec_pretty(&unit.config)?,
        )?;

        Ok(TrialResult {
            index: unit.index,
            device: unit.device,
            dataset_name,
            elapsed_seconds: elapsed.as_secs_f64(),
            metrics,
            config: unit.config.clone(),
            trial_dir: workspace.dir,
            finished_at: Utc::now(),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_types::{DataIterator, EngineError, PipelineConfig, ResultsRecord, Split};
    use serde_json::json;
    use std::io::Write;

    struct Scripted;

    impl TrainingEngine for Scripted {
        fn load_data(
            &self,
            _ctx: &TrialContext<'_>,
            _config: &PipelineConfig,
        ) -> Result<DataIterator, EngineError> {
            Ok(DataIterator::default())
        }

        fn execute(
            &self,
            ctx: &TrialContext<'_>,
            config: &PipelineConfig,
            _iterator: Option<&DataIterator>,
            _mode: ExecutionMode,
        ) -> Result<ResultsRecord, EngineError> {
            writeln!(&*ctx.console, "training trial {}", ctx.index)?;
            match config.as_json().get("behaviour").and_then(|b| b.as_str()) {
                Some("fail") => Err(EngineError::InvalidConfig {
                    message: "bad component".to_string(),
                }),
                Some("panic") => panic!("engine blew up"),
                _ => Ok(ResultsRecord::new().with_metric(Split::Test, "accuracy", 0.9)),
            }
        }
    }

    fn unit(index: usize, behaviour: &str) -> TrialUnit {
        TrialUnit::new(
            index,
            PipelineConfig::new(json!({
                "dataset_reader": {"data_path": "data/snips"},
                "behaviour": behaviour,
            })),
            Some(1),
        )
    }

    #[test]
    fn completed_trial_persists_config_and_console() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TrialRunner::new(&Scripted, dir.path());

        let TrialOutcome::Completed(result) = runner.run(&unit(0, "ok")) else {
            panic!("trial should complete");
        };
        assert_eq!(result.index, 0);
        assert_eq!(result.device, Some(1));
        assert_eq!(result.dataset_name, "snips");
        assert_eq!(result.trial_dir, dir.path().join("snips").join("pipe_1"));
        assert_eq!(result.metrics.objective("accuracy"), Some(0.9));

        let saved: PipelineConfig =
            serde_json::from_slice(&fs::read(result.trial_dir.join(CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(saved, result.config);
        let console = fs::read_to_string(result.trial_dir.join(CONSOLE_FILE)).unwrap();
        assert_eq!(console, "training trial 0\n");
    }

    #[test]
    fn engine_error_becomes_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TrialRunner::new(&Scripted, dir.path());
        let outcome = runner.run(&unit(3, "fail"));
        let TrialOutcome::Failed(error) = outcome else {
            panic!("trial should fail");
        };
        assert_eq!(error.index, 3);
        assert!(error.message.contains("bad component"));
        assert!(!dir.path().join("snips/pipe_4").join(CONFIG_FILE).exists());
    }

    #[test]
    fn panic_is_caught_at_trial_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TrialRunner::new(&Scripted, dir.path());
        let TrialOutcome::Failed(error) = runner.run(&unit(1, "panic")) else {
            panic!("panic should be isolated");
        };
        assert!(error.message.contains("engine blew up"));
    }

    #[test]
    fn missing_dataset_path_fails_the_trial_only() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TrialRunner::new(&Scripted, dir.path());
        let unit = TrialUnit::new(0, PipelineConfig::new(json!({})), None);
        assert!(matches!(runner.run(&unit), TrialOutcome::Failed(_)));
    }

    #[test]
    fn existing_workspace_falls_back_to_rerun_directory() {
        let dir = tempfile::tempdir().unwrap();
        let first = prepare_workspace(dir.path(), "snips", 2).unwrap();
        assert_eq!(first.dir, dir.path().join("snips/pipe_2"));

        let second = prepare_workspace(dir.path(), "snips", 2).unwrap();
        assert_eq!(second.dir, dir.path().join("snips/pipe_2_rerun"));
        assert!(second.dir.join(CONSOLE_FILE).exists());

        // The alternate is deterministic: a third attempt reuses it.
        let third = prepare_workspace(dir.path(), "snips", 2).unwrap();
        assert_eq!(third.dir, second.dir);
    }
}
