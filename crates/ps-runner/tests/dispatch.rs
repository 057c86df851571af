mod common;

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{config, pipeline, settings, ScriptedEngine};
use ps_planner::WorkerPlan;
use ps_report::{ExperimentInfo, JsonRunLog, RunLog};
use ps_runner::{ExecutionMode, Experiment, JsonLinesSource, VecSource};
use ps_types::{internal_error, ObjectiveDirection, PipelineConfig, SweepResult, TrialResult};

fn scored(dataset: &str, score: f64) -> PipelineConfig {
    pipeline(dataset, json!({"score": score}))
}

#[test]
fn sequential_run_survives_failing_trials() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        settings(dir.path())
            .with_multiprocessing(false)
            .with_objective("accuracy", ObjectiveDirection::Maximize),
    );
    let pipelines = vec![
        scored("snips", 0.7),
        pipeline("snips", json!({"fail": true})),
        scored("snips", 0.9),
        pipeline("snips", json!({"panic": true})),
        scored("snips", 0.8),
    ];
    let experiment_dir = config.experiment_dir();
    let experiment = Experiment::new(
        config,
        WorkerPlan::sequential(),
        VecSource::new(pipelines),
        ScriptedEngine::default(),
    );
    let mut run_log = JsonRunLog::new(&experiment_dir);

    let summary = experiment.run(&mut run_log).unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.completed, 3);
    let mut failed: Vec<usize> = summary.failed.iter().map(|e| e.index).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![1, 3]);

    let log = JsonRunLog::load(run_log.path()).unwrap();
    let logged: Vec<usize> = log.trials.iter().map(|t| t.index).collect();
    assert_eq!(logged, vec![0, 2, 4]);
    assert!(log.experiment_info.full_time.is_some());
    assert_eq!(summary.best_trial.unwrap().index, 2);
    assert!(summary.report.unwrap().exists());

    // Sequential runs go in generation order with no device.
    let executions = experiment.engine().executions();
    assert!(executions.iter().all(|(_, device, mode)| device.is_none() && *mode == ExecutionMode::FULL));
}

#[test]
fn device_bound_run_assigns_round_robin_and_never_shares_a_device() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(settings(dir.path()).with_objective("accuracy", ObjectiveDirection::Maximize));
    let pipelines = (0..9)
        .map(|i| pipeline("snips", json!({"score": i as f64 / 10.0, "sleep_ms": 15})))
        .collect();
    let experiment_dir = config.experiment_dir();
    let experiment = Experiment::new(
        config,
        WorkerPlan::on_devices(vec![2, 5, 6]).unwrap(),
        VecSource::new(pipelines),
        ScriptedEngine::default(),
    );
    let mut run_log = JsonRunLog::new(&experiment_dir);

    let summary = experiment.run(&mut run_log).unwrap();
    assert_eq!(summary.completed, 9);
    assert!(summary.failed.is_empty());

    for (index, device, _) in experiment.engine().executions() {
        assert_eq!(device, Some([2, 5, 6][index % 3]));
    }
    let peaks = experiment.engine().max_active_per_device.lock().unwrap().clone();
    assert_eq!(peaks.len(), 3);
    assert!(peaks.values().all(|&peak| peak == 1));

    let log = run_log.log().unwrap();
    let mut indices: Vec<usize> = log.trials.iter().map(|t| t.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..9).collect::<Vec<_>>());
    assert_eq!(run_log.best_trial().unwrap().index, 8);
}

#[test]
fn parallel_cpu_run_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(settings(dir.path()).with_max_workers(3));
    let pipelines = (0..8)
        .map(|i| {
            if i % 4 == 1 {
                pipeline("atis", json!({"panic": true}))
            } else {
                scored("atis", 0.5)
            }
        })
        .collect();
    let experiment_dir = config.experiment_dir();
    let experiment = Experiment::new(
        config,
        WorkerPlan::cpu(3),
        VecSource::new(pipelines),
        ScriptedEngine::default(),
    );
    let mut run_log = JsonRunLog::new(&experiment_dir);

    let summary = experiment.run(&mut run_log).unwrap();
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.failed.len(), 2);
    assert_eq!(run_log.log().unwrap().trials.len(), 6);
}

#[test]
fn target_metric_is_frozen_from_the_first_trial() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(settings(dir.path()).with_multiprocessing(false));
    let pipelines = vec![
        pipeline("snips", json!({"score": 0.4, "train": {"metrics": ["accuracy", "f1"]}})),
        pipeline("snips", json!({"score": 0.6, "train": {"metrics": ["f1"]}})),
    ];
    let experiment_dir = config.experiment_dir();
    let experiment = Experiment::new(
        config,
        WorkerPlan::sequential(),
        VecSource::new(pipelines),
        ScriptedEngine::default(),
    );
    let mut run_log = JsonRunLog::new(&experiment_dir);

    let summary = experiment.run(&mut run_log).unwrap();
    assert_eq!(summary.target_metric.as_deref(), Some("accuracy"));

    let info = &run_log.log().unwrap().experiment_info;
    assert_eq!(info.target_metric.as_deref(), Some("accuracy"));
    assert_eq!(info.metrics, Some(vec!["accuracy".to_string(), "f1".to_string()]));
    assert_eq!(summary.best_trial.unwrap().index, 1);
}

#[test]
fn save_best_keeps_only_the_winning_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        settings(dir.path())
            .with_multiprocessing(false)
            .with_save_best(true)
            .with_objective("accuracy", ObjectiveDirection::Minimize),
    );
    let checkpoints = config.checkpoint_dir();
    let experiment_dir = config.experiment_dir();
    let pipelines = vec![scored("snips", 0.3), scored("snips", 0.1), scored("atis", 0.2)];
    let experiment = Experiment::new(
        config,
        WorkerPlan::sequential(),
        VecSource::new(pipelines),
        ScriptedEngine::default(),
    );
    let mut run_log = JsonRunLog::new(&experiment_dir);

    let summary = experiment.run(&mut run_log).unwrap();
    let best = summary.best_trial.unwrap();
    assert_eq!(best.index, 1);
    assert!(best.trial_dir.join("config.json").exists());
    assert!(!checkpoints.join("snips/pipe_1").exists());
    assert!(!checkpoints.join("atis").exists());
    // The log keeps every record.
    assert_eq!(run_log.log().unwrap().trials.len(), 3);
}

#[test]
fn rerun_into_same_experiment_uses_alternate_directories() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(settings(dir.path()).with_multiprocessing(false));
    let checkpoints = config.checkpoint_dir();
    let experiment_dir = config.experiment_dir();
    let experiment = Experiment::new(
        config,
        WorkerPlan::sequential(),
        VecSource::new(vec![scored("snips", 0.5)]),
        ScriptedEngine::default(),
    );

    experiment.run(&mut JsonRunLog::new(&experiment_dir)).unwrap();
    let summary = experiment.run(&mut JsonRunLog::new(&experiment_dir)).unwrap();

    assert_eq!(summary.completed, 1);
    assert!(checkpoints.join("snips/pipe_1/out.txt").exists());
    assert!(checkpoints.join("snips/pipe_1_rerun/out.txt").exists());
}

#[test]
fn malformed_stream_item_fails_only_its_trial() {
    let dir = tempfile::tempdir().unwrap();
    let lines = dir.path().join("pipelines.jsonl");
    fs::write(
        &lines,
        [
            r#"{"dataset_reader": {"data_path": "data/snips"}, "score": 0.1}"#,
            r#"{"dataset_reader": "#,
            r#"{"dataset_reader": {"data_path": "data/snips"}, "score": 0.2}"#,
        ]
        .join("\n"),
    )
    .unwrap();
    let config = config(settings(dir.path()).with_multiprocessing(false));
    let experiment_dir = config.experiment_dir();
    let experiment = Experiment::new(
        config,
        WorkerPlan::sequential(),
        JsonLinesSource::new(&lines),
        ScriptedEngine::default(),
    );

    let summary = experiment.run(&mut JsonRunLog::new(&experiment_dir)).unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed[0].index, 1);
}

/// Run log whose storage breaks: one append is rejected, finishing and
/// rendering always fail.
struct BrokenLog {
    reject_index: usize,
    trials: Vec<TrialResult>,
    finish_calls: usize,
}

impl RunLog for BrokenLog {
    fn begin(&mut self, _info: ExperimentInfo) -> SweepResult<()> {
        Ok(())
    }

    fn set_target_metric(&mut self, _metric: &str, _metrics: &[String]) -> SweepResult<()> {
        Err(internal_error!("metric header not writable"))
    }

    fn append(&mut self, result: TrialResult) -> SweepResult<()> {
        if result.index == self.reject_index {
            return Err(internal_error!("disk full while logging trial {}", result.index));
        }
        self.trials.push(result);
        Ok(())
    }

    fn finish(&mut self, _total: Duration) -> SweepResult<()> {
        self.finish_calls += 1;
        Err(internal_error!("log header not writable"))
    }

    fn best_trial(&self) -> Option<&TrialResult> {
        self.trials.first()
    }

    fn render(&self, _output_dir: &Path, _with_plot: bool) -> SweepResult<PathBuf> {
        Err(internal_error!("report template missing"))
    }
}

#[test]
fn run_log_failures_do_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        settings(dir.path())
            .with_multiprocessing(false)
            .with_objective("accuracy", ObjectiveDirection::Maximize),
    );
    let experiment = Experiment::new(
        config,
        WorkerPlan::sequential(),
        VecSource::new(vec![scored("snips", 0.1), scored("snips", 0.2), scored("snips", 0.3)]),
        ScriptedEngine::default(),
    );
    let mut run_log = BrokenLog {
        reject_index: 1,
        trials: Vec::new(),
        finish_calls: 0,
    };

    let summary = experiment.run(&mut run_log).unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].index, 1);
    assert!(summary.failed[0].message.contains("disk full"));
    assert!(summary.report.is_none());
    assert_eq!(run_log.finish_calls, 1);
    assert_eq!(
        run_log.trials.iter().map(|t| t.index).collect::<Vec<_>>(),
        vec![0, 2]
    );
}
