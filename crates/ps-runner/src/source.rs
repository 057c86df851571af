//! Pipeline sources: where resolved configurations come from.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use ps_types::{
    pipeline_error, GeneratorMode, PipelineConfig, PipelineGenerator, PipelineSource, SweepResult,
};

/// Newline-delimited JSON file, one resolved pipeline per line.
///
/// The file is counted once up front and then parsed lazily, so a sweep
/// over many thousands of pipelines never holds them all in memory.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    scratch_root: Option<PathBuf>,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scratch_root: None,
        }
    }

    /// Checkpoint root injected into every configuration of the validation
    /// stream.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PipelineSource for JsonLinesSource {
    type Generator = JsonLinesGenerator;

    fn generator(&self, mode: GeneratorMode) -> SweepResult<Self::Generator> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut len = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                len += 1;
            }
        }
        let scratch_root = match mode {
            GeneratorMode::Validation => self.scratch_root.clone(),
            GeneratorMode::Full => None,
        };
        Ok(JsonLinesGenerator {
            path: self.path.clone(),
            len,
            scratch_root,
        })
    }
}

#[derive(Debug)]
pub struct JsonLinesGenerator {
    path: PathBuf,
    len: usize,
    scratch_root: Option<PathBuf>,
}

impl PipelineGenerator for JsonLinesGenerator {
    fn len(&self) -> usize {
        self.len
    }

    fn configs(&self) -> SweepResult<Box<dyn Iterator<Item = SweepResult<PipelineConfig>> + '_>> {
        let lines = BufReader::new(File::open(&self.path)?).lines();
        Ok(Box::new(JsonLines {
            lines,
            line_no: 0,
            scratch_root: self.scratch_root.as_deref(),
        }))
    }
}

struct JsonLines<'a> {
    lines: Lines<BufReader<File>>,
    line_no: usize,
    scratch_root: Option<&'a Path>,
}

impl Iterator for JsonLines<'_> {
    type Item = SweepResult<PipelineConfig>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_no += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            let config = serde_json::from_str::<serde_json::Value>(&line)
                .map(PipelineConfig::new)
                .map_err(|e| pipeline_error!("line {}: {}", self.line_no, e))
                .map(|config| match self.scratch_root {
                    Some(root) => config.with_checkpoint_root(root),
                    None => config,
                });
            return Some(config);
        }
    }
}

/// In-memory source, handy for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    configs: Vec<PipelineConfig>,
    scratch_root: Option<PathBuf>,
}

impl VecSource {
    pub fn new(configs: Vec<PipelineConfig>) -> Self {
        Self {
            configs,
            scratch_root: None,
        }
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

impl PipelineSource for VecSource {
    type Generator = VecGenerator;

    fn generator(&self, mode: GeneratorMode) -> SweepResult<Self::Generator> {
        let configs = match (mode, &self.scratch_root) {
            (GeneratorMode::Validation, Some(root)) => self
                .configs
                .iter()
                .cloned()
                .map(|c| c.with_checkpoint_root(root))
                .collect(),
            _ => self.configs.clone(),
        };
        Ok(VecGenerator { configs })
    }
}

#[derive(Debug, Clone)]
pub struct VecGenerator {
    configs: Vec<PipelineConfig>,
}

impl VecGenerator {
    pub fn new(configs: Vec<PipelineConfig>) -> Self {
        Self { configs }
    }
}

impl PipelineGenerator for VecGenerator {
    fn len(&self) -> usize {
        self.configs.len()
    }

    fn configs(&self) -> SweepResult<Box<dyn Iterator<Item = SweepResult<PipelineConfig>> + '_>> {
        Ok(Box::new(self.configs.iter().cloned().map(Ok)))
    }
}
