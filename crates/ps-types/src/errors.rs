use thiserror::Error;

/// Main error type for the PipeSweep system
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Device discovery error: {0}")]
    Discovery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SweepError {
    /// Fatal errors halt the run; everything else is isolated at the trial boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SweepError::Config(_))
    }
}

/// Fatal configuration errors. Any of these aborts the run (or the validation pass).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("'use_all_gpus' and 'use_multi_gpus' cannot be requested at the same time")]
    ConflictingDeviceStrategies,

    #[error("the number of workers must be at least one, got {requested}")]
    InvalidWorkerCap { requested: i64 },

    #[error("gpu memory fraction must be in (0, 1], got {fraction}")]
    InvalidMemoryFraction { fraction: String },

    #[error("'use_multi_gpus' is an empty device list")]
    EmptyDeviceRequest,

    #[error("no usable device: {reason}")]
    NoUsableDevices { reason: String },

    #[error("the file structure of dataset '{dataset}' differs from the rest datasets: '{split}' part is empty")]
    CompositionMismatch { dataset: String, split: String },

    #[error("the '{split}' part of the dataset is empty, but {requirement}")]
    EmptyEvaluationSplit { split: String, requirement: String },

    #[error("fitting-only data iterators are not supported in validation mode (trial {index})")]
    UnsupportedIterator { index: usize },

    #[error("malformed pipeline configuration: {message}")]
    MalformedPipeline { message: String },

    #[error("invalid experiment setting '{field}': {message}")]
    InvalidSetting { field: String, message: String },
}

/// An isolated failure of a single trial; logged and skipped in full-run mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("trial {index} failed: {message}")]
pub struct TrialError {
    pub index: usize,
    pub message: String,
}

impl TrialError {
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

/// Errors reported by a training engine backend.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine process failed to start: {message}")]
    SpawnFailed { message: String },

    #[error("engine exited with status {status}")]
    ExitStatus { status: String },

    #[error("engine produced malformed output: {message}")]
    MalformedOutput { message: String },

    #[error("engine rejected configuration: {message}")]
    InvalidConfig { message: String },

    #[error("engine IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for PipeSweep operations
pub type SweepResult<T> = Result<T, SweepError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Internal(format!($($arg)*))
    };
}

/// Macro for creating malformed pipeline configuration errors
#[macro_export]
macro_rules! pipeline_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Config($crate::ConfigError::MalformedPipeline {
            message: format!($($arg)*),
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::CompositionMismatch {
            dataset: "snips".to_string(),
            split: "test".to_string(),
        };

        assert!(error.to_string().contains("snips"));
        assert!(error.to_string().contains("'test'"));
    }

    #[test]
    fn test_error_conversion() {
        let sweep_error: SweepError = ConfigError::ConflictingDeviceStrategies.into();
        assert!(sweep_error.is_fatal());

        let sweep_error: SweepError = TrialError::new(3, "boom").into();
        assert!(!sweep_error.is_fatal());
        assert_eq!(sweep_error.to_string(), "Trial error: trial 3 failed: boom");
    }

    #[test]
    fn test_macros() {
        let internal = internal_error!("worker {} vanished", 2);
        assert!(matches!(internal, SweepError::Internal(_)));

        let malformed = pipeline_error!("missing field: {}", "dataset_reader");
        assert!(malformed.is_fatal());
    }
}
