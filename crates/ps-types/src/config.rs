//! Experiment configuration.
//!
//! [`ExperimentSettings`] is the raw, serde-friendly view of the experiment
//! file. [`ExperimentConfig`] is the validated, immutable configuration built
//! from it once at startup; contradictory settings never get past
//! [`ExperimentConfig::try_from`].

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::dataset::SampleCeiling;
use crate::errors::{ConfigError, SweepResult};

/// Unique experiment run identifier.
pub type ExperimentId = Uuid;

/// Whether the target metric is maximized or minimized when ranking trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

impl ObjectiveDirection {
    /// True when `candidate` beats `current` in this direction.
    pub fn improves(&self, candidate: f64, current: f64) -> bool {
        match self {
            ObjectiveDirection::Maximize => candidate > current,
            ObjectiveDirection::Minimize => candidate < current,
        }
    }
}

/// Raw experiment settings as found in the experiment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    pub exp_name: String,
    /// Experiment date, `%Y-%m-%d`. Defaults to today.
    pub date: Option<String>,
    /// Free-form information copied into the experiment log.
    pub info: serde_json::Value,
    pub root: PathBuf,
    pub plot: bool,
    pub save_best: bool,
    pub do_test: bool,
    pub sample_num: usize,
    pub target_metric: Option<String>,
    pub direction: ObjectiveDirection,
    pub multiprocessing: bool,
    pub max_num_workers: Option<i64>,
    pub use_all_gpus: bool,
    pub use_multi_gpus: Option<Vec<u32>>,
    pub gpu_memory_fraction: f64,
    pub test_sample_sizes: SampleCeiling,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            exp_name: "experiment".to_string(),
            date: None,
            info: serde_json::Value::Null,
            root: PathBuf::from("download/experiments/"),
            plot: false,
            save_best: false,
            do_test: false,
            sample_num: 10,
            target_metric: None,
            direction: ObjectiveDirection::Maximize,
            multiprocessing: true,
            max_num_workers: None,
            use_all_gpus: false,
            use_multi_gpus: None,
            gpu_memory_fraction: 1.0,
            test_sample_sizes: SampleCeiling::default(),
        }
    }
}

impl ExperimentSettings {
    pub fn new(exp_name: impl Into<String>) -> Self {
        Self {
            exp_name: exp_name.into(),
            ..Self::default()
        }
    }

    /// Parse settings from a JSON document. Accepts either the settings object
    /// itself or a full experiment file carrying it under `"enumerate"`.
    pub fn from_json(value: serde_json::Value) -> SweepResult<Self> {
        let section = match value {
            serde_json::Value::Object(mut map) if map.contains_key("enumerate") => {
                map.remove("enumerate").unwrap_or_default()
            }
            other => other,
        };
        Ok(serde_json::from_value(section)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SweepResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(serde_json::from_str(&text)?)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_multiprocessing(mut self, enabled: bool) -> Self {
        self.multiprocessing = enabled;
        self
    }

    pub fn with_max_workers(mut self, n: i64) -> Self {
        self.max_num_workers = Some(n);
        self
    }

    pub fn with_all_gpus(mut self) -> Self {
        self.use_all_gpus = true;
        self
    }

    pub fn with_gpus(mut self, ids: Vec<u32>) -> Self {
        self.use_multi_gpus = Some(ids);
        self
    }

    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.gpu_memory_fraction = fraction;
        self
    }

    pub fn with_objective(mut self, metric: &str, direction: ObjectiveDirection) -> Self {
        self.target_metric = Some(metric.to_string());
        self.direction = direction;
        self
    }

    pub fn with_save_best(mut self, enabled: bool) -> Self {
        self.save_best = enabled;
        self
    }

    pub fn with_test(mut self, enabled: bool) -> Self {
        self.do_test = enabled;
        self
    }
}

/// How trials are spread over compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyMode {
    /// Sequential execution, no device pinning.
    Off,
    /// CPU-only worker pool.
    FixedWorkers,
    /// Every device whose free memory clears the threshold.
    AllDevices,
    /// An explicit device id list, in the requested order.
    ExplicitDevices(Vec<u32>),
}

impl ConcurrencyMode {
    pub fn uses_devices(&self) -> bool {
        matches!(
            self,
            ConcurrencyMode::AllDevices | ConcurrencyMode::ExplicitDevices(_)
        )
    }
}

/// Validated experiment configuration. Immutable after construction.
///
/// Serializable for the record, but only ever built from
/// [`ExperimentSettings`] so validation cannot be skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentConfig {
    id: ExperimentId,
    name: String,
    date: String,
    info: serde_json::Value,
    root: PathBuf,
    plot: bool,
    save_best: bool,
    do_test: bool,
    sample_num: usize,
    target_metric: Option<String>,
    direction: ObjectiveDirection,
    concurrency: ConcurrencyMode,
    max_workers: Option<usize>,
    memory_fraction: f64,
    sample_ceiling: SampleCeiling,
}

impl TryFrom<ExperimentSettings> for ExperimentConfig {
    type Error = ConfigError;

    fn try_from(settings: ExperimentSettings) -> Result<Self, Self::Error> {
        if settings.use_all_gpus && settings.use_multi_gpus.is_some() {
            return Err(ConfigError::ConflictingDeviceStrategies);
        }

        let max_workers = match settings.max_num_workers {
            Some(n) if n < 1 => return Err(ConfigError::InvalidWorkerCap { requested: n }),
            Some(n) => Some(n as usize),
            None => None,
        };

        let fraction = settings.gpu_memory_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidMemoryFraction {
                fraction: fraction.to_string(),
            });
        }

        if settings.exp_name.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                field: "exp_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let concurrency = if !settings.multiprocessing {
            ConcurrencyMode::Off
        } else if settings.use_all_gpus {
            ConcurrencyMode::AllDevices
        } else if let Some(ids) = settings.use_multi_gpus {
            if ids.is_empty() {
                return Err(ConfigError::EmptyDeviceRequest);
            }
            ConcurrencyMode::ExplicitDevices(ids)
        } else {
            ConcurrencyMode::FixedWorkers
        };

        let date = settings
            .date
            .unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string());

        Ok(Self {
            id: Uuid::new_v4(),
            name: settings.exp_name,
            date,
            info: settings.info,
            root: settings.root,
            plot: settings.plot,
            save_best: settings.save_best,
            do_test: settings.do_test,
            sample_num: settings.sample_num,
            target_metric: settings.target_metric,
            direction: settings.direction,
            concurrency,
            max_workers,
            memory_fraction: fraction,
            sample_ceiling: settings.test_sample_sizes,
        })
    }
}

impl ExperimentConfig {
    pub fn id(&self) -> ExperimentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn info(&self) -> &serde_json::Value {
        &self.info
    }

    pub fn plot(&self) -> bool {
        self.plot
    }

    pub fn save_best(&self) -> bool {
        self.save_best
    }

    pub fn do_test(&self) -> bool {
        self.do_test
    }

    /// Number of pipelines the external generator samples in random search.
    /// Not used for scheduling; recorded in the experiment log header.
    pub fn sample_num(&self) -> usize {
        self.sample_num
    }

    /// Pre-declared target metric, if any.
    pub fn target_metric(&self) -> Option<&str> {
        self.target_metric.as_deref()
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    pub fn concurrency(&self) -> &ConcurrencyMode {
        &self.concurrency
    }

    pub fn max_workers(&self) -> Option<usize> {
        self.max_workers
    }

    pub fn memory_fraction(&self) -> f64 {
        self.memory_fraction
    }

    pub fn sample_ceiling(&self) -> SampleCeiling {
        self.sample_ceiling
    }

    /// `<root>/<date>/<name>`: log, report and checkpoints live here.
    pub fn experiment_dir(&self) -> PathBuf {
        self.root.join(&self.date).join(&self.name)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.experiment_dir().join("checkpoints")
    }

    /// Scratch space for the validation pass, removed once it succeeds.
    pub fn scratch_dir(&self) -> PathBuf {
        self.checkpoint_dir().join("tmp")
    }
}
