//! Training engine backed by an external program.
//!
//! Every call spawns one child process. The child learns what to do from its
//! environment, writes its answer as JSON to the results path, and has its
//! stdout/stderr attached to the trial's console log. The device binding is
//! set on the child only, so it never leaks into the parent or a sibling.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use ps_planner::VISIBLE_DEVICES_ENV;
use ps_types::{DataIterator, EngineError, PipelineConfig, ResultsRecord};

use crate::engine::{ExecutionMode, TrainingEngine, TrialContext};

pub const ENV_ACTION: &str = "PIPESWEEP_ACTION";
pub const ENV_CONFIG: &str = "PIPESWEEP_CONFIG";
pub const ENV_RESULTS: &str = "PIPESWEEP_RESULTS";
pub const ENV_DATA: &str = "PIPESWEEP_DATA";
pub const ENV_TRAIN: &str = "PIPESWEEP_TRAIN";
pub const ENV_VALIDATE: &str = "PIPESWEEP_VALIDATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Dataset,
    Train,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Dataset => "dataset",
            Action::Train => "train",
        }
    }
}

/// Runs `program args...` once per engine call.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn invoke(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
        action: Action,
        data: Option<&DataIterator>,
        mode: ExecutionMode,
    ) -> Result<serde_json::Value, EngineError> {
        let config_path = ctx.trial_dir.join("pipeline.json");
        write_json(&config_path, config)?;

        let results_path = ctx.trial_dir.join(format!("{}.json", action.as_str()));
        if results_path.exists() {
            fs::remove_file(&results_path)?;
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(
                VISIBLE_DEVICES_ENV,
                ctx.device.map(|d| d.to_string()).unwrap_or_default(),
            )
            .env(ENV_ACTION, action.as_str())
            .env(ENV_CONFIG, &config_path)
            .env(ENV_RESULTS, &results_path)
            .env(ENV_TRAIN, flag(mode.train))
            .env(ENV_VALIDATE, flag(mode.validate))
            .stdin(Stdio::null())
            .stdout(Stdio::from(ctx.console.try_clone()?))
            .stderr(Stdio::from(ctx.console.try_clone()?));

        match data {
            Some(iterator) => {
                let data_path = ctx.trial_dir.join("data.json");
                write_json(&data_path, iterator)?;
                command.env(ENV_DATA, data_path);
            }
            None => {
                command.env_remove(ENV_DATA);
            }
        }

        debug!(
            "Trial {}: running {} ({}) on device {:?}",
            ctx.index,
            self.program.display(),
            action.as_str(),
            ctx.device
        );

        let status = command.status().map_err(|e| EngineError::SpawnFailed {
            message: format!("{}: {}", self.program.display(), e),
        })?;
        if !status.success() {
            return Err(EngineError::ExitStatus {
                status: status.to_string(),
            });
        }

        let text = fs::read_to_string(&results_path).map_err(|e| EngineError::MalformedOutput {
            message: format!("cannot read {}: {}", results_path.display(), e),
        })?;
        serde_json::from_str(&text).map_err(|e| EngineError::MalformedOutput {
            message: format!("{}: {}", results_path.display(), e),
        })
    }
}

impl TrainingEngine for CommandEngine {
    fn load_data(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
    ) -> Result<DataIterator, EngineError> {
        let value = self.invoke(ctx, config, Action::Dataset, None, ExecutionMode::DRY_RUN)?;
        serde_json::from_value(value).map_err(|e| EngineError::MalformedOutput {
            message: format!("dataset description: {e}"),
        })
    }

    fn execute(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
        iterator: Option<&DataIterator>,
        mode: ExecutionMode,
    ) -> Result<ResultsRecord, EngineError> {
        let value = self.invoke(ctx, config, Action::Train, iterator, mode)?;
        serde_json::from_value(value).map_err(|e| EngineError::MalformedOutput {
            message: format!("results record: {e}"),
        })
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| EngineError::InvalidConfig {
        message: e.to_string(),
    })?;
    fs::write(path, bytes)?;
    Ok(())
}
