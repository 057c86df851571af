//! The experiment log: one header plus one record per completed trial.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

use ps_types::{format_elapsed, ExperimentConfig, ExperimentId, ObjectiveDirection, TrialResult};

/// Run-wide bookkeeping written at the top of the experiment log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInfo {
    pub id: ExperimentId,
    pub exp_name: String,
    pub date: String,
    pub info: serde_json::Value,
    pub number_of_pipes: usize,
    /// Random-search sample size handed to the pipeline generator.
    #[serde(default)]
    pub sample_num: usize,
    /// Metric list of the first trial that declared one.
    pub metrics: Option<Vec<String>>,
    pub target_metric: Option<String>,
    pub direction: ObjectiveDirection,
    pub started_at: DateTime<Utc>,
    pub full_time: Option<String>,
    pub full_time_seconds: Option<f64>,
}

impl ExperimentInfo {
    pub fn new(config: &ExperimentConfig, number_of_pipes: usize) -> Self {
        Self {
            id: config.id(),
            exp_name: config.name().to_string(),
            date: config.date().to_string(),
            info: config.info().clone(),
            number_of_pipes,
            sample_num: config.sample_num(),
            metrics: None,
            target_metric: config.target_metric().map(str::to_string),
            direction: config.direction(),
            started_at: Utc::now(),
            full_time: None,
            full_time_seconds: None,
        }
    }

    pub fn mark_finished(&mut self, total: Duration) {
        self.full_time = Some(format_elapsed(total));
        self.full_time_seconds = Some(total.as_secs_f64());
    }
}

/// Header and trial records. Records arrive in completion order, which is not
/// index order in parallel runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLog {
    pub experiment_info: ExperimentInfo,
    pub trials: Vec<TrialResult>,
}

impl ExperimentLog {
    pub fn new(experiment_info: ExperimentInfo) -> Self {
        Self {
            experiment_info,
            trials: Vec::new(),
        }
    }

    pub fn push(&mut self, result: TrialResult) {
        self.trials.push(result);
    }

    fn objective(&self, result: &TrialResult) -> Option<f64> {
        let metric = self.experiment_info.target_metric.as_deref()?;
        result.metrics.objective(metric).filter(|v| v.is_finite())
    }

    /// Best trial by target metric and direction.
    pub fn best_trial(&self) -> Option<&TrialResult> {
        let direction = self.experiment_info.direction;
        let mut best: Option<(&TrialResult, f64)> = None;
        for trial in &self.trials {
            let Some(score) = self.objective(trial) else {
                continue;
            };
            let dominated = match best {
                None => true,
                Some((_, current)) => direction.improves(score, current),
            };
            if dominated {
                best = Some((trial, score));
            }
        }
        best.map(|(trial, _)| trial)
    }

    /// Trials ordered best first; unscored trials trail in index order.
    pub fn ranked(&self) -> Vec<(&TrialResult, Option<f64>)> {
        let direction = self.experiment_info.direction;
        let mut rows: Vec<_> = self.trials.iter().map(|t| (t, self.objective(t))).collect();
        rows.sort_by(|(a, sa), (b, sb)| match (sa, sb) {
            (Some(x), Some(y)) => {
                let ord = match direction {
                    ObjectiveDirection::Maximize => y.partial_cmp(x),
                    ObjectiveDirection::Minimize => x.partial_cmp(y),
                };
                ord.unwrap_or(Ordering::Equal).then(a.index.cmp(&b.index))
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.index.cmp(&b.index),
        });
        rows
    }
}
