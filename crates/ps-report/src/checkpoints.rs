//! Save-best pruning of trial checkpoints.

use std::fs;
use std::path::Path;
use tracing::{info, warn};

use ps_types::SweepResult;

/// Directory name reserved for validation scratch space.
pub const SCRATCH_DIR: &str = "tmp";

/// Remove every trial directory under `checkpoint_dir/<dataset>/` except
/// `keep`. Dataset directories left empty are removed too. Returns the number
/// of trial directories deleted.
pub fn retain_only(checkpoint_dir: &Path, keep: &Path) -> SweepResult<usize> {
    if !checkpoint_dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for dataset in fs::read_dir(checkpoint_dir)? {
        let dataset = dataset?.path();
        if !dataset.is_dir() || dataset.file_name().is_some_and(|n| n == SCRATCH_DIR) {
            continue;
        }
        for trial in fs::read_dir(&dataset)? {
            let trial = trial?.path();
            if !trial.is_dir() || trial == keep {
                continue;
            }
            match fs::remove_dir_all(&trial) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", trial.display(), e),
            }
        }
        if fs::read_dir(&dataset)?.next().is_none() {
            fs::remove_dir(&dataset)?;
        }
    }

    info!("Kept {}, removed {} other checkpoint(s)", keep.display(), removed);
    Ok(removed)
}
