//! Markdown comparison report.

use std::fmt::Write;

use ps_types::{format_elapsed, ObjectiveDirection};

use crate::log::ExperimentLog;

const BAR_WIDTH: usize = 40;

/// Render the ranked trial table, optionally followed by a text bar chart of
/// the target metric.
pub fn render_report(log: &ExperimentLog, with_plot: bool) -> String {
    let info = &log.experiment_info;
    let metric = info.target_metric.as_deref().unwrap_or("score");
    let direction = match info.direction {
        ObjectiveDirection::Maximize => "maximize",
        ObjectiveDirection::Minimize => "minimize",
    };
    let ranked = log.ranked();

    let mut out = String::new();
    let _ = writeln!(out, "# Experiment report: {}", info.exp_name);
    let _ = writeln!(out);
    let _ = writeln!(out, "- id: `{}`", info.id);
    let _ = writeln!(out, "- date: {}", info.date);
    let _ = writeln!(
        out,
        "- pipelines: {} generated, {} completed",
        info.number_of_pipes,
        log.trials.len()
    );
    let _ = writeln!(out, "- target metric: {metric} ({direction})");
    if let Some(full_time) = &info.full_time {
        let _ = writeln!(out, "- full time: {full_time}");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "| rank | pipe | dataset | device | {metric} | time |");
    let _ = writeln!(out, "|---:|---:|---|---:|---:|---:|");
    for (rank, (trial, score)) in ranked.iter().enumerate() {
        let device = trial
            .device
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let score = score
            .map(|s| format!("{s:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            rank + 1,
            trial.index + 1,
            trial.dataset_name,
            device,
            score,
            format_elapsed(trial.elapsed())
        );
    }

    if with_plot {
        let scored: Vec<(usize, f64)> = ranked
            .iter()
            .filter_map(|(t, s)| s.map(|s| (t.index + 1, s)))
            .collect();
        let max = scored.iter().map(|(_, s)| s.abs()).fold(0.0_f64, f64::max);

        let _ = writeln!(out);
        let _ = writeln!(out, "## {metric} by pipe");
        let _ = writeln!(out);
        let _ = writeln!(out, "```text");
        for (pipe, score) in scored {
            let len = if max > 0.0 {
                ((score.abs() / max) * BAR_WIDTH as f64).round() as usize
            } else {
                0
            };
            let _ = writeln!(
                out,
                "pipe {pipe:>4} | {:<width$} {score:.4}",
                "#".repeat(len),
                width = BAR_WIDTH
            );
        }
        let _ = writeln!(out, "```");
    }

    out
}
