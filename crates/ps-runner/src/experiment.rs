//! One experiment end to end: plan once, optionally validate, then run.

use tracing::info;

use ps_planner::{DeviceDiscovery, ResourcePlanner, WorkerPlan};
use ps_report::RunLog;
use ps_types::{ExperimentConfig, GeneratorMode, PipelineGenerator, PipelineSource, SweepResult};

use crate::dispatcher::{Dispatcher, RunSummary};
use crate::engine::TrainingEngine;
use crate::validation::{ValidationPass, ValidationReport};

pub struct Experiment<S, E> {
    config: ExperimentConfig,
    plan: WorkerPlan,
    source: S,
    engine: E,
}

impl<S: PipelineSource, E: TrainingEngine> Experiment<S, E> {
    pub fn new(config: ExperimentConfig, plan: WorkerPlan, source: S, engine: E) -> Self {
        Self {
            config,
            plan,
            source,
            engine,
        }
    }

    /// Plan workers against the live host, then build the experiment.
    pub fn prepare(
        config: ExperimentConfig,
        source: S,
        engine: E,
        discovery: &dyn DeviceDiscovery,
    ) -> SweepResult<Self> {
        let plan = ResourcePlanner::plan_from_environment(&config, discovery)?;
        Ok(Self::new(config, plan, source, engine))
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn plan(&self) -> &WorkerPlan {
        &self.plan
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Dry-run every pipeline on a tiny sample. Uses its own generator so the
    /// full run starts from a fresh stream.
    pub fn validate(&self) -> SweepResult<ValidationReport> {
        Self::dry_run(&self.config, &self.source, &self.engine)
    }

    /// Validation pass without a worker plan. The pass never binds a device,
    /// so it runs even when every device is busy.
    pub fn dry_run(config: &ExperimentConfig, source: &S, engine: &E) -> SweepResult<ValidationReport> {
        let generator = source.generator(GeneratorMode::Validation)?;
        ValidationPass::new(engine, config.sample_ceiling(), config.scratch_dir()).validate(&generator)
    }

    /// Run the experiment, validating first when the configuration asks for it.
    pub fn run<L: RunLog + ?Sized>(&self, run_log: &mut L) -> SweepResult<RunSummary> {
        if self.config.do_test() {
            self.validate()?;
        }
        let generator = self.source.generator(GeneratorMode::Full)?;
        info!(
            "Experiment '{}': {} pipeline(s) on {} worker(s)",
            self.config.name(),
            generator.len(),
            self.plan.worker_count()
        );
        Dispatcher::new(&self.config, &self.plan, &self.engine).run(&generator, run_log)
    }
}
