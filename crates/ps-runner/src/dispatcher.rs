//! The dispatcher: turns the lazy configuration stream into trial units,
//! schedules them according to the worker plan and records every outcome.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use ps_planner::WorkerPlan;
use ps_report::{retain_only, ExperimentInfo, RunLog};
use ps_types::{
    format_elapsed, ExperimentConfig, ExperimentId, PipelineGenerator, SweepResult, TrialError,
    TrialOutcome, TrialResult, TrialUnit,
};

use crate::engine::TrainingEngine;
use crate::pool::WorkerPool;
use crate::trial::TrialRunner;

/// What a finished run looks like from the outside.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub experiment_id: ExperimentId,
    pub total: usize,
    pub completed: usize,
    pub failed: Vec<TrialError>,
    pub duration: Duration,
    pub target_metric: Option<String>,
    pub best_trial: Option<TrialResult>,
    pub report: Option<PathBuf>,
}

impl RunSummary {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

pub struct Dispatcher<'a, E: ?Sized> {
    config: &'a ExperimentConfig,
    plan: &'a WorkerPlan,
    engine: &'a E,
}

impl<'a, E: TrainingEngine + ?Sized> Dispatcher<'a, E> {
    pub fn new(config: &'a ExperimentConfig, plan: &'a WorkerPlan, engine: &'a E) -> Self {
        Self {
            config,
            plan,
            engine,
        }
    }

    /// Run every configuration of `generator`. Trial failures are recorded
    /// in the summary; only a broken stream or run log setup fails the run.
    pub fn run<G, L>(&self, generator: &G, run_log: &mut L) -> SweepResult<RunSummary>
    where
        G: PipelineGenerator + ?Sized,
        L: RunLog + ?Sized,
    {
        let total = generator.len();
        let start = Instant::now();
        run_log.begin(ExperimentInfo::new(self.config, total))?;

        let mut configs = generator.configs()?.peekable();

        // Frozen before dispatch so every trial is ranked by the same key.
        let declared = match configs.peek() {
            Some(Ok(first)) => first.declared_metrics(),
            _ => Vec::new(),
        };
        let target_metric = self
            .config
            .target_metric()
            .map(str::to_string)
            .or_else(|| declared.first().cloned());
        match &target_metric {
            Some(metric) => {
                info!("Target metric: {}", metric);
                if let Err(e) = run_log.set_target_metric(metric, &declared) {
                    warn!("Failed to record target metric: {}", e);
                }
            }
            None => warn!("No target metric declared; trials will be logged unranked"),
        }

        let plan = self.plan;
        let units = configs.enumerate().map(|(index, item)| {
            item.map(|config| TrialUnit::new(index, config, plan.device_for(index)))
                .map_err(|e| TrialError::new(index, e.to_string()))
        });

        let runner = TrialRunner::new(self.engine, self.config.checkpoint_dir());
        let mut completed = 0;
        let mut failed = Vec::new();
        let mut on_outcome = |outcome: TrialOutcome| {
            let done = completed + failed.len() + 1;
            match outcome {
                TrialOutcome::Completed(result) => {
                    let (index, device, elapsed) = (result.index, result.device, result.elapsed());
                    match run_log.append(result) {
                        Ok(()) => {
                            completed += 1;
                            info!(
                                "[{}/{}] Trial {} finished on device {:?} in {}",
                                done,
                                total,
                                index + 1,
                                device,
                                format_elapsed(elapsed)
                            );
                        }
                        Err(e) => {
                            warn!("[{}/{}] Trial {} could not be logged: {}", done, total, index + 1, e);
                            failed.push(TrialError::new(index, e.to_string()));
                        }
                    }
                }
                TrialOutcome::Failed(error) => {
                    warn!(
                        "[{}/{}] Trial {} failed: {}",
                        done,
                        total,
                        error.index + 1,
                        error.message
                    );
                    failed.push(error);
                }
            }
        };

        if self.plan.is_parallel() {
            WorkerPool::new(self.plan).run(units, &|unit: &TrialUnit| runner.run(unit), &mut on_outcome)?;
        } else {
            for unit in units {
                let outcome = match unit {
                    Ok(unit) => runner.run(&unit),
                    Err(error) => TrialOutcome::Failed(error),
                };
                on_outcome(outcome);
            }
        }

        let duration = start.elapsed();
        if let Err(e) = run_log.finish(duration) {
            warn!("Failed to finalize the experiment log: {}", e);
        }

        let best_trial = run_log.best_trial().cloned();
        if self.config.save_best() {
            match &best_trial {
                Some(best) => match retain_only(&self.config.checkpoint_dir(), &best.trial_dir) {
                    Ok(removed) => info!(
                        "Kept checkpoints of trial {}, removed {} other trial(s)",
                        best.index + 1,
                        removed
                    ),
                    Err(e) => warn!("Failed to prune checkpoints: {}", e),
                },
                None => warn!("save_best is set but no trial has a score; keeping every checkpoint"),
            }
        }

        let report = match run_log.render(&self.config.experiment_dir(), self.config.plot()) {
            Ok(path) => {
                info!("Report written to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to render the report: {}", e);
                None
            }
        };

        info!(
            "Experiment '{}' finished in {}: {} completed, {} failed",
            self.config.name(),
            format_elapsed(duration),
            completed,
            failed.len()
        );

        Ok(RunSummary {
            experiment_id: self.config.id(),
            total,
            completed,
            failed,
            duration,
            target_metric,
            best_trial,
            report,
        })
    }
}
