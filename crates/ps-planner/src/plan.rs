//! Worker count and device assignment planning.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ps_types::{ConcurrencyMode, ConfigError, ExperimentConfig, SweepResult};

use crate::devices::DeviceDiscovery;
use crate::hardware::{clear_visible_devices, HardwareInfo};

/// Share of host CPUs that may be turned into device workers; the rest is
/// left for data loading.
const CPU_HEADROOM: f64 = 0.7;

/// How many workers run and which device each one owns.
///
/// When `devices` is non-empty, worker `k` owns `devices[k]` for its whole
/// lifetime and `worker_count == devices.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWorkerPlan")]
pub struct WorkerPlan {
    worker_count: usize,
    devices: Vec<u32>,
}

/// Unchecked serde view of a [`WorkerPlan`].
#[derive(Deserialize)]
struct RawWorkerPlan {
    worker_count: usize,
    #[serde(default)]
    devices: Vec<u32>,
}

impl TryFrom<RawWorkerPlan> for WorkerPlan {
    type Error = ConfigError;

    fn try_from(raw: RawWorkerPlan) -> Result<Self, Self::Error> {
        if raw.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCap { requested: 0 });
        }
        if raw.devices.is_empty() {
            return Ok(Self::cpu(raw.worker_count));
        }
        if raw.worker_count != raw.devices.len() {
            return Err(ConfigError::InvalidSetting {
                field: "worker_count".to_string(),
                message: format!(
                    "{} worker(s) cannot own devices {:?}",
                    raw.worker_count, raw.devices
                ),
            });
        }
        Self::on_devices(raw.devices)
    }
}

impl WorkerPlan {
    /// One worker, no device pinning.
    pub fn sequential() -> Self {
        Self {
            worker_count: 1,
            devices: Vec::new(),
        }
    }

    /// CPU-only workers sharing no device binding.
    pub fn cpu(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            devices: Vec::new(),
        }
    }

    /// One worker per device, in the given order.
    pub fn on_devices(devices: Vec<u32>) -> Result<Self, ConfigError> {
        if devices.is_empty() {
            return Err(ConfigError::NoUsableDevices {
                reason: "device plan is empty".to_string(),
            });
        }
        Ok(Self {
            worker_count: devices.len(),
            devices,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn devices(&self) -> &[u32] {
        &self.devices
    }

    pub fn uses_devices(&self) -> bool {
        !self.devices.is_empty()
    }

    pub fn is_parallel(&self) -> bool {
        self.worker_count > 1
    }

    /// Worker slot that owns trial `index` when workers are device-bound.
    pub fn device_slot(&self, index: usize) -> Option<usize> {
        if self.devices.is_empty() {
            None
        } else {
            Some(index % self.devices.len())
        }
    }

    /// Round-robin device for trial `index`: `devices[index mod d]`.
    pub fn device_for(&self, index: usize) -> Option<u32> {
        self.device_slot(index).map(|slot| self.devices[slot])
    }
}

/// Turns the requested concurrency into a [`WorkerPlan`].
pub struct ResourcePlanner;

impl ResourcePlanner {
    /// Pure planning over a hardware snapshot.
    pub fn plan(config: &ExperimentConfig, hw: &HardwareInfo) -> Result<WorkerPlan, ConfigError> {
        let plan = match config.concurrency() {
            ConcurrencyMode::Off => WorkerPlan::sequential(),
            ConcurrencyMode::AllDevices => Self::plan_all_devices(config, hw)?,
            ConcurrencyMode::ExplicitDevices(ids) => Self::plan_explicit_devices(config, hw, ids)?,
            ConcurrencyMode::FixedWorkers => Self::plan_cpu(config, hw),
        };

        debug_assert!(plan.devices.is_empty() || plan.worker_count == plan.devices.len());
        Ok(plan)
    }

    /// Probe the host, plan, and release the process-wide device restriction
    /// when a device mode was selected.
    pub fn plan_from_environment(
        config: &ExperimentConfig,
        discovery: &dyn DeviceDiscovery,
    ) -> SweepResult<WorkerPlan> {
        let hw = if config.concurrency().uses_devices() {
            HardwareInfo::detect(discovery)?
        } else {
            HardwareInfo::detect(&crate::devices::StaticDevices::default())?
        };

        let plan = Self::plan(config, &hw)?;

        if config.concurrency().uses_devices() {
            clear_visible_devices();
        }

        info!(
            "Planned {} worker(s){}",
            plan.worker_count(),
            if plan.uses_devices() {
                format!(" on devices {:?}", plan.devices())
            } else {
                String::new()
            }
        );
        Ok(plan)
    }

    fn plan_all_devices(config: &ExperimentConfig, hw: &HardwareInfo) -> Result<WorkerPlan, ConfigError> {
        let fraction = config.memory_fraction();
        let visible = hw.visible_devices.as_deref();

        let devices = match config.max_workers() {
            None => {
                let free = hw.free(fraction, visible, None);
                Self::ensure_devices(&free, hw, fraction)?;
                Self::warn_narrow_visibility(&free, visible);

                let cpu_bound = (hw.cpu_count as f64 * CPU_HEADROOM).floor() as usize;
                if cpu_bound == 0 {
                    warn!(
                        "Only {} cpu(s) available; running a single device worker",
                        hw.cpu_count
                    );
                }
                let workers = free.len().min(cpu_bound).max(1);
                free.into_iter().take(workers).collect()
            }
            Some(cap) if cap > hw.device_count() => {
                warn!(
                    "max_num_workers={} but the host has {} device(s); using {}",
                    cap,
                    hw.device_count(),
                    hw.device_count()
                );
                let free = hw.free(fraction, visible, Some(hw.device_count()));
                Self::ensure_devices(&free, hw, fraction)?;
                Self::warn_narrow_visibility(&free, visible);
                free
            }
            Some(cap) => {
                let free = hw.free(fraction, visible, Some(cap));
                Self::ensure_devices(&free, hw, fraction)?;
                if free.len() < cap {
                    warn!(
                        "max_num_workers={} but only {} device(s) are free: {:?}",
                        cap,
                        free.len(),
                        free
                    );
                }
                free
            }
        };

        WorkerPlan::on_devices(devices)
    }

    fn plan_explicit_devices(
        config: &ExperimentConfig,
        hw: &HardwareInfo,
        requested: &[u32],
    ) -> Result<WorkerPlan, ConfigError> {
        let candidates: Vec<u32> = match hw.visible_devices.as_deref() {
            Some(visible) => requested
                .iter()
                .copied()
                .filter(|id| visible.contains(id))
                .collect(),
            None => requested.to_vec(),
        };
        if candidates.is_empty() {
            return Err(ConfigError::NoUsableDevices {
                reason: format!(
                    "requested devices {:?} do not intersect visible devices {:?}",
                    requested,
                    hw.visible_devices.as_deref().unwrap_or_default()
                ),
            });
        }

        let mut devices = hw.free(config.memory_fraction(), Some(&candidates), None);
        if devices.is_empty() {
            return Err(ConfigError::NoUsableDevices {
                reason: format!(
                    "all requested devices {:?} are busy (free memory below {:.0}%)",
                    candidates,
                    config.memory_fraction() * 100.0
                ),
            });
        }
        if devices.len() < candidates.len() {
            warn!(
                "Requested devices {:?}, but only {:?} are available",
                candidates, devices
            );
        }

        if let Some(cap) = config.max_workers() {
            devices.truncate(cap);
        }

        WorkerPlan::on_devices(devices)
    }

    fn plan_cpu(config: &ExperimentConfig, hw: &HardwareInfo) -> WorkerPlan {
        let workers = match config.max_workers() {
            Some(cap) if cap > hw.cpu_count => {
                warn!(
                    "max_num_workers={} but the host has {} cpu(s); {} will be used",
                    cap, hw.cpu_count, hw.cpu_count
                );
                hw.cpu_count
            }
            Some(cap) => cap,
            None => hw.cpu_count,
        };
        WorkerPlan::cpu(workers)
    }

    fn ensure_devices(free: &[u32], hw: &HardwareInfo, fraction: f64) -> Result<(), ConfigError> {
        if free.is_empty() {
            return Err(ConfigError::NoUsableDevices {
                reason: match &hw.visible_devices {
                    Some(visible) => format!(
                        "devices {:?} are busy or absent (free memory below {:.0}%)",
                        visible,
                        fraction * 100.0
                    ),
                    None => format!(
                        "none of {} device(s) has at least {:.0}% free memory",
                        hw.device_count(),
                        fraction * 100.0
                    ),
                },
            });
        }
        Ok(())
    }

    fn warn_narrow_visibility(free: &[u32], visible: Option<&[u32]>) {
        if let Some(visible) = visible {
            if free.len() < visible.len() {
                warn!(
                    "{}=({:?}), but only {:?} are available",
                    crate::hardware::VISIBLE_DEVICES_ENV,
                    visible,
                    free
                );
            }
        }
    }
}
