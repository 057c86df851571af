//! Run Log adapter: the single writer of trial records.
//!
//! Workers never touch the log. They hand their [`TrialResult`] back to the
//! dispatcher, which appends it here in whatever order results arrive.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use ps_types::{SweepResult, TrialResult};

use crate::log::{ExperimentInfo, ExperimentLog};
use crate::report::render_report;

/// Sink for per-trial records and the final report.
pub trait RunLog {
    /// Called once before the first trial is dispatched.
    fn begin(&mut self, info: ExperimentInfo) -> SweepResult<()>;

    /// Record the target metric frozen for this run.
    fn set_target_metric(&mut self, metric: &str, metrics: &[String]) -> SweepResult<()>;

    /// Append one completed trial. Must tolerate out-of-order indices.
    fn append(&mut self, result: TrialResult) -> SweepResult<()>;

    fn finish(&mut self, total: Duration) -> SweepResult<()>;

    /// Best trial recorded so far.
    fn best_trial(&self) -> Option<&TrialResult>;

    /// Render the comparison report into `output_dir`.
    fn render(&self, output_dir: &Path, with_plot: bool) -> SweepResult<PathBuf>;
}

/// Keeps the log in memory and mirrors it to `log.json` after every change,
/// so a crashed run still leaves a readable partial log.
#[derive(Debug)]
pub struct JsonRunLog {
    path: PathBuf,
    log: Option<ExperimentLog>,
}

impl JsonRunLog {
    pub const FILE_NAME: &'static str = "log.json";

    pub fn new(experiment_dir: impl AsRef<Path>) -> Self {
        Self {
            path: experiment_dir.as_ref().join(Self::FILE_NAME),
            log: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self) -> Option<&ExperimentLog> {
        self.log.as_ref()
    }

    /// Read a previously written log.
    pub fn load(path: impl AsRef<Path>) -> SweepResult<ExperimentLog> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn log_mut(&mut self) -> SweepResult<&mut ExperimentLog> {
        self.log
            .as_mut()
            .ok_or_else(|| ps_types::internal_error!("run log used before begin()"))
    }

    fn write(&self) -> SweepResult<()> {
        let Some(log) = &self.log else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(log)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote experiment log to {}", self.path.display());
        Ok(())
    }
}

impl RunLog for JsonRunLog {
    fn begin(&mut self, info: ExperimentInfo) -> SweepResult<()> {
        self.log = Some(ExperimentLog::new(info));
        self.write()
    }

    fn set_target_metric(&mut self, metric: &str, metrics: &[String]) -> SweepResult<()> {
        let log = self.log_mut()?;
        log.experiment_info.target_metric = Some(metric.to_string());
        if log.experiment_info.metrics.is_none() && !metrics.is_empty() {
            log.experiment_info.metrics = Some(metrics.to_vec());
        }
        self.write()
    }

    fn append(&mut self, result: TrialResult) -> SweepResult<()> {
        self.log_mut()?.push(result);
        self.write()
    }

    fn finish(&mut self, total: Duration) -> SweepResult<()> {
        self.log_mut()?.experiment_info.mark_finished(total);
        self.write()
    }

    fn best_trial(&self) -> Option<&TrialResult> {
        self.log.as_ref().and_then(|log| log.best_trial())
    }

    fn render(&self, output_dir: &Path, with_plot: bool) -> SweepResult<PathBuf> {
        let log = self
            .log
            .as_ref()
            .ok_or_else(|| ps_types::internal_error!("nothing to render: run log is empty"))?;
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join("report.md");
        fs::write(&path, render_report(log, with_plot))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::tests::{log as sample_log, result};
    use ps_types::ObjectiveDirection;

    fn started(dir: &Path) -> JsonRunLog {
        let mut run_log = JsonRunLog::new(dir);
        let info = sample_log(ObjectiveDirection::Maximize).experiment_info;
        run_log.begin(info).unwrap();
        run_log
    }

    #[test]
    fn appends_are_mirrored_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = started(dir.path());

        run_log.append(result(2, Some(0.7))).unwrap();
        run_log.append(result(0, Some(0.9))).unwrap();

        let on_disk = JsonRunLog::load(run_log.path()).unwrap();
        assert_eq!(on_disk.trials.len(), 2);
        assert_eq!(on_disk.trials[0].index, 2);
        assert_eq!(run_log.best_trial().unwrap().index, 0);
    }

    #[test]
    fn target_metric_and_duration_land_in_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = started(dir.path());
        run_log
            .set_target_metric("f1", &["f1".to_string(), "accuracy".to_string()])
            .unwrap();
        run_log.finish(Duration::from_secs(3600)).unwrap();

        let on_disk = JsonRunLog::load(run_log.path()).unwrap();
        assert_eq!(on_disk.experiment_info.target_metric.as_deref(), Some("f1"));
        assert_eq!(on_disk.experiment_info.metrics.unwrap().len(), 2);
        assert_eq!(on_disk.experiment_info.full_time.as_deref(), Some("1:00:00"));
    }

    #[test]
    fn append_before_begin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = JsonRunLog::new(dir.path());
        assert!(run_log.append(result(0, None)).is_err());
    }

    #[test]
    fn render_writes_markdown_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = started(dir.path());
        run_log.append(result(0, Some(0.4))).unwrap();

        let path = run_log.render(dir.path(), true).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("| 1 | 1 | snips |"));
    }
}
