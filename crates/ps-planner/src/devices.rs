//! Accelerator discovery.
//!
//! [`DeviceDiscovery`] is the seam the planner reads hardware through.
//! [`NvidiaSmi`] queries the NVIDIA driver tool; [`StaticDevices`] is a fixed
//! snapshot used for planning and in tests.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use ps_types::{SweepError, SweepResult};

/// Memory status of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: u32,
    pub free_memory_mb: u64,
    pub total_memory_mb: u64,
}

impl DeviceStatus {
    pub fn new(id: u32, free_memory_mb: u64, total_memory_mb: u64) -> Self {
        Self {
            id,
            free_memory_mb,
            total_memory_mb,
        }
    }

    /// A device with all of its memory free.
    pub fn idle(id: u32) -> Self {
        Self::new(id, 16_384, 16_384)
    }

    pub fn free_fraction(&self) -> f64 {
        if self.total_memory_mb == 0 {
            return 0.0;
        }
        self.free_memory_mb as f64 / self.total_memory_mb as f64
    }
}

/// Reports which devices exist and how busy they are.
pub trait DeviceDiscovery {
    fn devices(&self) -> SweepResult<Vec<DeviceStatus>>;

    fn total_devices(&self) -> SweepResult<usize> {
        Ok(self.devices()?.len())
    }

    /// Devices whose free memory fraction is at least `min_free_fraction`,
    /// optionally restricted to `restrict_to` and capped at `count_limit`.
    fn free_devices(
        &self,
        min_free_fraction: f64,
        restrict_to: Option<&[u32]>,
        count_limit: Option<usize>,
    ) -> SweepResult<Vec<u32>> {
        Ok(select_free(
            &self.devices()?,
            min_free_fraction,
            restrict_to,
            count_limit,
        ))
    }
}

/// Free-device selection shared by every discovery backend.
///
/// With `restrict_to` the result follows the order of that list; otherwise it
/// is ascending by device id. The count limit is applied last.
pub fn select_free(
    devices: &[DeviceStatus],
    min_free_fraction: f64,
    restrict_to: Option<&[u32]>,
    count_limit: Option<usize>,
) -> Vec<u32> {
    let is_free = |id: u32| {
        devices
            .iter()
            .any(|d| d.id == id && d.free_fraction() >= min_free_fraction)
    };

    let mut selected: Vec<u32> = match restrict_to {
        Some(ids) => {
            let mut out = Vec::with_capacity(ids.len());
            for &id in ids {
                if is_free(id) && !out.contains(&id) {
                    out.push(id);
                }
            }
            out
        }
        None => {
            let mut ids: Vec<u32> = devices.iter().map(|d| d.id).filter(|&id| is_free(id)).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        }
    };

    if let Some(limit) = count_limit {
        selected.truncate(limit);
    }
    selected
}

/// A fixed set of devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticDevices(pub Vec<DeviceStatus>);

impl StaticDevices {
    /// `count` idle devices with ids `0..count`.
    pub fn idle(count: u32) -> Self {
        Self((0..count).map(DeviceStatus::idle).collect())
    }
}

impl DeviceDiscovery for StaticDevices {
    fn devices(&self) -> SweepResult<Vec<DeviceStatus>> {
        Ok(self.0.clone())
    }
}

/// Discovery through `nvidia-smi`. A host without the tool has no devices.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: PathBuf,
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self {
            program: PathBuf::from("nvidia-smi"),
        }
    }
}

impl NvidiaSmi {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DeviceDiscovery for NvidiaSmi {
    fn devices(&self) -> SweepResult<Vec<DeviceStatus>> {
        let output = Command::new(&self.program)
            .args([
                "--query-gpu=index,memory.free,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} not found, assuming a CPU-only host", self.program.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            return Err(SweepError::Discovery(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `index, memory.free, memory.total` CSV rows.
pub fn parse_nvidia_smi(text: &str) -> SweepResult<Vec<DeviceStatus>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let parse_err = || SweepError::Discovery(format!("unexpected nvidia-smi row: '{line}'"));
            if fields.len() != 3 {
                return Err(parse_err());
            }
            Ok(DeviceStatus {
                id: fields[0].parse().map_err(|_| parse_err())?,
                free_memory_mb: fields[1].parse().map_err(|_| parse_err())?,
                total_memory_mb: fields[2].parse().map_err(|_| parse_err())?,
            })
        })
        .collect()
}
