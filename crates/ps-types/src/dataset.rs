//! Dataset splits, data iterators and the split-composition baseline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ConfigError;

/// A named partition of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Samples of a dataset, partitioned into train/valid/test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Splits {
    pub train: Vec<serde_json::Value>,
    pub valid: Vec<serde_json::Value>,
    pub test: Vec<serde_json::Value>,
}

impl Splits {
    pub fn get(&self, split: Split) -> &[serde_json::Value] {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }

    pub fn len(&self, split: Split) -> usize {
        self.get(split).len()
    }

    pub fn is_empty(&self, split: Split) -> bool {
        self.get(split).is_empty()
    }

    /// Concatenation of train, valid and test, in that order.
    pub fn all(&self) -> Vec<serde_json::Value> {
        let mut all = Vec::with_capacity(self.train.len() + self.valid.len() + self.test.len());
        all.extend(self.train.iter().cloned());
        all.extend(self.valid.iter().cloned());
        all.extend(self.test.iter().cloned());
        all
    }
}

/// Flavour of data iterator an engine builds for a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IteratorKind {
    /// Pre-materialized splits; can be truncated.
    #[default]
    Batching,
    /// Fits and transforms online; cannot be pre-materialized.
    Fitting,
}

/// A data iterator handed to the training engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataIterator {
    #[serde(default, rename = "iterator")]
    pub kind: IteratorKind,
    #[serde(flatten)]
    pub data: Splits,
}

impl DataIterator {
    pub fn new(kind: IteratorKind, data: Splits) -> Self {
        Self { kind, data }
    }

    pub fn all(&self) -> Vec<serde_json::Value> {
        self.data.all()
    }
}

/// Per-split sample ceilings used by the validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleCeiling {
    pub train: usize,
    pub valid: usize,
    pub test: usize,
}

impl Default for SampleCeiling {
    fn default() -> Self {
        Self {
            train: 10,
            valid: 5,
            test: 5,
        }
    }
}

impl SampleCeiling {
    pub fn get(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train,
            Split::Valid => self.valid,
            Split::Test => self.test,
        }
    }
}

/// Which splits were non-empty in the first trial of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetComposition {
    pub train: bool,
    pub valid: bool,
    pub test: bool,
}

impl DatasetComposition {
    pub fn from_splits(splits: &Splits) -> Self {
        Self {
            train: !splits.train.is_empty(),
            valid: !splits.valid.is_empty(),
            test: !splits.test.is_empty(),
        }
    }

    pub fn has(&self, split: Split) -> bool {
        match split {
            Split::Train => self.train,
            Split::Valid => self.valid,
            Split::Test => self.test,
        }
    }

    /// A split that was non-empty in the baseline must stay non-empty.
    /// Splits that were empty in the baseline may appear later.
    pub fn check(&self, splits: &Splits, dataset: &str) -> Result<(), ConfigError> {
        for split in Split::ALL {
            if self.has(split) && splits.is_empty(split) {
                return Err(ConfigError::CompositionMismatch {
                    dataset: dataset.to_string(),
                    split: split.to_string(),
                });
            }
        }
        Ok(())
    }
}
