//! Resolved pipeline configurations and the generator seam that produces them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::SweepResult;
use crate::pipeline_error;

/// One fully-resolved pipeline configuration, as produced by a generator.
///
/// The document itself is opaque to the orchestrator; only the handful of
/// fields needed for scheduling, validation and bookkeeping are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig(serde_json::Value);

impl PipelineConfig {
    pub fn new(document: serde_json::Value) -> Self {
        Self(document)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }

    /// `dataset_reader.data_path`
    pub fn dataset_path(&self) -> SweepResult<&str> {
        self.0
            .pointer("/dataset_reader/data_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| pipeline_error!("'dataset_reader.data_path' is missing or not a string"))
    }

    /// Short dataset name used to key trial directories: the last component
    /// of the dataset path.
    pub fn dataset_name(&self) -> SweepResult<String> {
        let path = self.dataset_path()?;
        let name = Path::new(path.trim_end_matches('/'))
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| pipeline_error!("dataset path '{}' has no usable name", path))?;
        Ok(name.to_string())
    }

    /// Metric names declared under `train.metrics`; entries are either bare
    /// names or objects with a `name` field.
    pub fn declared_metrics(&self) -> Vec<String> {
        self.0
            .pointer("/train/metrics")
            .and_then(|m| m.as_array())
            .map(|metrics| {
                metrics
                    .iter()
                    .filter_map(|m| match m {
                        serde_json::Value::String(name) => Some(name.clone()),
                        serde_json::Value::Object(obj) => {
                            obj.get("name").and_then(|n| n.as_str()).map(str::to_string)
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn train_requirements(&self) -> TrainRequirements {
        TrainRequirements::from_config(self)
    }

    /// Redirect checkpoint output under `root` (`metadata.checkpoint_root`).
    pub fn with_checkpoint_root(mut self, root: &Path) -> Self {
        let metadata = self.0.as_object_mut().map(|obj| {
            obj.entry("metadata")
                .or_insert_with(|| serde_json::Value::Object(Default::default()))
        });
        if let Some(serde_json::Value::Object(meta)) = metadata {
            meta.insert(
                "checkpoint_root".to_string(),
                serde_json::Value::String(root.to_string_lossy().into_owned()),
            );
        }
        self
    }

    pub fn checkpoint_root(&self) -> Option<&str> {
        self.0
            .pointer("/metadata/checkpoint_root")
            .and_then(|v| v.as_str())
    }
}

/// Evaluation requirements a configuration declares for training time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainRequirements {
    /// Evaluate the best model on the test split.
    pub test_best: bool,
    /// Evaluate the best model on the valid split.
    pub validate_best: bool,
    /// Periodic validation every N epochs; 0 disables it.
    pub val_every_n_epochs: u64,
}

impl TrainRequirements {
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.as_json().get("train") {
            // No train section: the engine's defaults only test the best model.
            None | Some(serde_json::Value::Null) => Self {
                test_best: true,
                validate_best: false,
                val_every_n_epochs: 0,
            },
            Some(train) => Self {
                test_best: train.get("test_best").and_then(|v| v.as_bool()).unwrap_or(true),
                validate_best: train
                    .get("validate_best")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                val_every_n_epochs: train
                    .get("val_every_n_epochs")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
            },
        }
    }

    pub fn needs_valid(&self) -> bool {
        self.validate_best || self.val_every_n_epochs > 0
    }
}

/// Which run a generator feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorMode {
    /// Truncated dry run; artifacts go to scratch space.
    Validation,
    Full,
}

/// A lazy, re-iterable stream of resolved pipeline configurations.
pub trait PipelineGenerator: Send {
    /// Total number of configurations the stream yields.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the configurations in generation order. A malformed item is
    /// reported in place so the caller can attribute it to its index.
    fn configs(&self) -> SweepResult<Box<dyn Iterator<Item = SweepResult<PipelineConfig>> + '_>>;
}

/// Builds independent generators for the validation and the full run.
pub trait PipelineSource {
    type Generator: PipelineGenerator;

    fn generator(&self, mode: GeneratorMode) -> SweepResult<Self::Generator>;
}
