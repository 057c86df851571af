//! pipesweep - run a pipeline search experiment

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use ps_planner::NvidiaSmi;
use ps_report::JsonRunLog;
use ps_runner::{CommandEngine, Experiment, JsonLinesSource};
use ps_types::{ExperimentConfig, ExperimentSettings, SweepError};

#[derive(Parser, Debug)]
#[command(name = "pipesweep")]
#[command(about = "Run every resolved pipeline of a search space and rank the results")]
#[command(version)]
struct Cli {
    /// Experiment settings (JSON)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Resolved pipeline configurations, one JSON document per line
    #[arg(long, short = 'p')]
    pipelines: PathBuf,

    /// Only run the validation dry run
    #[arg(long)]
    dry_run_only: bool,

    /// Device query tool
    #[arg(long, env = "PIPESWEEP_NVIDIA_SMI", default_value = "nvidia-smi")]
    nvidia_smi: PathBuf,

    /// Training engine command, given after `--`
    #[arg(last = true, required = true, value_name = "ENGINE")]
    engine: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let fatal = e
                .downcast_ref::<SweepError>()
                .is_some_and(SweepError::is_fatal);
            ExitCode::from(if fatal { 2 } else { 1 })
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = ExperimentSettings::load(&cli.config)
        .with_context(|| format!("reading experiment settings from {}", cli.config.display()))?;
    let config = ExperimentConfig::try_from(settings)
        .map_err(SweepError::from)
        .context("invalid experiment settings")?;

    let (program, args) = cli
        .engine
        .split_first()
        .context("no training engine command given")?;
    let engine = CommandEngine::new(program).with_args(args.iter().cloned());
    let source = JsonLinesSource::new(&cli.pipelines).with_scratch_root(config.scratch_dir());

    if cli.dry_run_only {
        let report = Experiment::dry_run(&config, &source, &engine)?;
        tracing::info!("{} pipeline(s) passed the dry run", report.trials);
        return Ok(());
    }

    let experiment = Experiment::prepare(config, source, engine, &NvidiaSmi::new(&cli.nvidia_smi))?;

    let mut run_log = JsonRunLog::new(experiment.config().experiment_dir());
    let summary = experiment.run(&mut run_log)?;
    tracing::info!(
        "{} of {} trial(s) completed, log at {}",
        summary.completed,
        summary.total,
        run_log.path().display()
    );
    if let Some(best) = &summary.best_trial {
        tracing::info!(
            "Best trial: {} ({})",
            best.index + 1,
            best.trial_dir.display()
        );
    }
    Ok(())
}
