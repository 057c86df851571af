//! One-shot snapshot of the host: CPU count, visible-device restriction and
//! device memory status.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, warn};

use ps_types::SweepResult;

use crate::devices::{select_free, DeviceDiscovery, DeviceStatus, StaticDevices};

/// Process-wide visible-device restriction list.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Hardware as seen once at planning time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub cpu_count: usize,
    /// `None` when the process is not restricted to a device subset.
    pub visible_devices: Option<Vec<u32>>,
    pub devices: StaticDevices,
}

impl HardwareInfo {
    pub fn new(cpu_count: usize, devices: Vec<DeviceStatus>) -> Self {
        Self {
            cpu_count,
            visible_devices: None,
            devices: StaticDevices(devices),
        }
    }

    pub fn with_visible_devices(mut self, ids: Vec<u32>) -> Self {
        self.visible_devices = Some(ids);
        self
    }

    /// Read CPU count, the visible-device variable and device status.
    pub fn detect(discovery: &dyn DeviceDiscovery) -> SweepResult<Self> {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let visible_devices = env::var(VISIBLE_DEVICES_ENV)
            .ok()
            .and_then(|raw| parse_visible_devices(&raw));
        let devices = discovery.devices()?;

        debug!(
            "Probed hardware: {} cpus, {} devices, visible {:?}",
            cpu_count,
            devices.len(),
            visible_devices
        );

        Ok(Self {
            cpu_count,
            visible_devices,
            devices: StaticDevices(devices),
        })
    }

    pub fn device_count(&self) -> usize {
        self.devices.0.len()
    }

    /// Free devices, see [`select_free`].
    pub fn free(
        &self,
        min_free_fraction: f64,
        restrict_to: Option<&[u32]>,
        count_limit: Option<usize>,
    ) -> Vec<u32> {
        select_free(&self.devices.0, min_free_fraction, restrict_to, count_limit)
    }
}

impl DeviceDiscovery for HardwareInfo {
    fn devices(&self) -> SweepResult<Vec<DeviceStatus>> {
        Ok(self.devices.0.clone())
    }
}

/// Parse a comma-separated id list. Blank means "no restriction".
/// Entries that are not integer ids (e.g. device UUIDs) are skipped.
pub fn parse_visible_devices(raw: &str) -> Option<Vec<u32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut ids = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<u32>() {
            Ok(id) => ids.push(id),
            Err(_) => warn!("Ignoring non-numeric {} entry '{}'", VISIBLE_DEVICES_ENV, entry),
        }
    }
    Some(ids)
}

/// Clear the visible-device restriction of this process so that workers bind
/// devices themselves.
pub fn clear_visible_devices() {
    env::set_var(VISIBLE_DEVICES_ENV, "");
}
