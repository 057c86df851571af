//! Trial units, results and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::dataset::Split;
use crate::errors::TrialError;
use crate::pipeline::PipelineConfig;

/// The unit of work: one resolved configuration, its position in generation
/// order, and the device it is bound to (if any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialUnit {
    pub index: usize,
    pub config: PipelineConfig,
    pub device: Option<u32>,
}

impl TrialUnit {
    pub fn new(index: usize, config: PipelineConfig, device: Option<u32>) -> Self {
        Self {
            index,
            config,
            device,
        }
    }

    /// 1-based trial number, used in directory names and progress output.
    pub fn ordinal(&self) -> usize {
        self.index + 1
    }
}

/// Metric values for one split.
pub type SplitMetrics = BTreeMap<String, f64>;

/// Metrics reported by the training engine, keyed by split name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsRecord(BTreeMap<String, SplitMetrics>);

impl ResultsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, split: Split, metric: &str, value: f64) -> Self {
        self.insert(split.as_str(), metric, value);
        self
    }

    pub fn insert(&mut self, split: &str, metric: &str, value: f64) {
        self.0
            .entry(split.to_string())
            .or_default()
            .insert(metric.to_string(), value);
    }

    pub fn split(&self, split: &str) -> Option<&SplitMetrics> {
        self.0.get(split)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|m| m.is_empty())
    }

    /// Value used to rank a trial: the test score, falling back to valid.
    pub fn objective(&self, metric: &str) -> Option<f64> {
        [Split::Test, Split::Valid]
            .iter()
            .find_map(|split| self.0.get(split.as_str()).and_then(|m| m.get(metric)))
            .copied()
    }
}

/// A completed trial. Created once on completion, appended once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: usize,
    pub device: Option<u32>,
    pub dataset_name: String,
    pub elapsed_seconds: f64,
    pub metrics: ResultsRecord,
    pub config: PipelineConfig,
    pub trial_dir: PathBuf,
    pub finished_at: DateTime<Utc>,
}

impl TrialResult {
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_seconds.max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// What a worker hands back to the dispatcher for every unit it ran.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Completed(TrialResult),
    Failed(TrialError),
}

impl TrialOutcome {
    pub fn index(&self) -> usize {
        match self {
            TrialOutcome::Completed(result) => result.index,
            TrialOutcome::Failed(error) => error.index,
        }
    }

    pub fn status(&self) -> TrialStatus {
        match self {
            TrialOutcome::Completed(_) => TrialStatus::Completed,
            TrialOutcome::Failed(_) => TrialStatus::Failed,
        }
    }
}

/// `H:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objective_prefers_test_over_valid() {
        let record = ResultsRecord::new()
            .with_metric(Split::Valid, "accuracy", 0.7)
            .with_metric(Split::Test, "accuracy", 0.65);
        assert_eq!(record.objective("accuracy"), Some(0.65));

        let valid_only = ResultsRecord::new().with_metric(Split::Valid, "f1", 0.5);
        assert_eq!(valid_only.objective("f1"), Some(0.5));
        assert_eq!(valid_only.objective("accuracy"), None);
    }

    #[test]
    fn results_record_serializes_as_nested_map() {
        let record = ResultsRecord::new().with_metric(Split::Test, "accuracy", 0.9);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"test": {"accuracy": 0.9}})
        );
        assert!(!record.is_empty());
        assert!(ResultsRecord::new().is_empty());
    }

    #[test]
    fn outcome_reports_index_and_status() {
        let failed = TrialOutcome::Failed(TrialError::new(4, "engine exited"));
        assert_eq!(failed.index(), 4);
        assert_eq!(failed.status(), TrialStatus::Failed);
    }

    #[test]
    fn trial_unit_ordinal_is_one_based() {
        let unit = TrialUnit::new(0, PipelineConfig::new(json!({})), Some(3));
        assert_eq!(unit.ordinal(), 1);
        assert_eq!(unit.device, Some(3));
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_elapsed(Duration::from_secs(90061)), "25:01:01");
    }
}
