//! # ps-planner
//!
//! Resource planning for PipeSweep: discovers accelerators, reads the
//! visible-device restriction and CPU count once, and decides how many
//! workers run and which device each worker owns.

mod devices;
mod hardware;
mod plan;

pub use devices::{parse_nvidia_smi, select_free, DeviceDiscovery, DeviceStatus, NvidiaSmi, StaticDevices};
pub use hardware::{clear_visible_devices, parse_visible_devices, HardwareInfo, VISIBLE_DEVICES_ENV};
pub use plan::{ResourcePlanner, WorkerPlan};
