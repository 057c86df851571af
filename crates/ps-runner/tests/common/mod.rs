#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use ps_runner::{ExecutionMode, TrainingEngine, TrialContext};
use ps_types::{
    DataIterator, EngineError, ExperimentConfig, ExperimentSettings, PipelineConfig, ResultsRecord,
    Split,
};

/// Engine driven by fields of the pipeline configuration itself:
/// `score`, `fail`, `panic`, `sleep_ms` and `data` (the dataset served by
/// `load_data`).
#[derive(Default)]
pub struct ScriptedEngine {
    pub executions: Mutex<Vec<(usize, Option<u32>, ExecutionMode)>>,
    active: Mutex<HashMap<u32, usize>>,
    pub max_active_per_device: Mutex<HashMap<u32, usize>>,
}

impl ScriptedEngine {
    pub fn executions(&self) -> Vec<(usize, Option<u32>, ExecutionMode)> {
        let mut calls = self.executions.lock().unwrap().clone();
        calls.sort_by_key(|c| c.0);
        calls
    }

    fn enter(&self, device: Option<u32>) {
        if let Some(device) = device {
            let mut active = self.active.lock().unwrap();
            let now = active.entry(device).or_default();
            *now += 1;
            let mut max = self.max_active_per_device.lock().unwrap();
            let peak = max.entry(device).or_default();
            *peak = (*peak).max(*now);
        }
    }

    fn leave(&self, device: Option<u32>) {
        if let Some(device) = device {
            *self.active.lock().unwrap().entry(device).or_default() -= 1;
        }
    }
}

impl TrainingEngine for ScriptedEngine {
    fn load_data(
        &self,
        _ctx: &TrialContext<'_>,
        config: &PipelineConfig,
    ) -> Result<DataIterator, EngineError> {
        serde_json::from_value(config.as_json()["data"].clone()).map_err(|e| {
            EngineError::MalformedOutput {
                message: e.to_string(),
            }
        })
    }

    fn execute(
        &self,
        ctx: &TrialContext<'_>,
        config: &PipelineConfig,
        _iterator: Option<&DataIterator>,
        mode: ExecutionMode,
    ) -> Result<ResultsRecord, EngineError> {
        let doc = config.as_json();
        self.executions
            .lock()
            .unwrap()
            .push((ctx.index, ctx.device, mode));
        writeln!(&*ctx.console, "trial {} on {:?}", ctx.index, ctx.device)?;

        self.enter(ctx.device);
        if let Some(ms) = doc["sleep_ms"].as_u64() {
            thread::sleep(Duration::from_millis(ms));
        }
        self.leave(ctx.device);

        if doc["fail"].as_bool() == Some(true) {
            return Err(EngineError::InvalidConfig {
                message: format!("component of trial {} cannot be built", ctx.index),
            });
        }
        if doc["panic"].as_bool() == Some(true) {
            panic!("engine crashed in trial {}", ctx.index);
        }
        let mut results = ResultsRecord::new();
        if let Some(score) = doc["score"].as_f64() {
            results.insert(Split::Test.as_str(), "accuracy", score);
            results.insert(Split::Valid.as_str(), "accuracy", score);
        }
        Ok(results)
    }
}

pub fn pipeline(dataset: &str, extra: Value) -> PipelineConfig {
    let mut doc = json!({
        "dataset_reader": {"data_path": format!("data/{dataset}")},
        "chainer": {"pipe": []},
    });
    if let (Some(doc), Value::Object(extra)) = (doc.as_object_mut(), extra) {
        doc.extend(extra);
    }
    PipelineConfig::new(doc)
}

pub fn settings(root: &Path) -> ExperimentSettings {
    ExperimentSettings::new("sweep")
        .with_root(root)
        .with_date("2024-05-01")
}

pub fn config(settings: ExperimentSettings) -> ExperimentConfig {
    ExperimentConfig::try_from(settings).unwrap()
}
