//! Mount configuration (spec component C8), assembled from the CLI once
//! parsed and passed down through bootstrap, the bridge, and the cache.

use std::path::PathBuf;

use crate::bootstrap::DEFAULT_BOOT_CYCLE_BUDGET;
use crate::bridge::DEFAULT_PACKET_CYCLE_BUDGET;
use crate::memory::DEFAULT_RAM_SIZE;

#[derive(Debug, Clone)]
pub struct MountConfig {
    pub driver_path: PathBuf,
    pub image_path: PathBuf,
    pub mountpoint: PathBuf,
    pub block_size_override: Option<u32>,
    pub volname: Option<String>,
    pub debug: bool,
    pub packet_cycle_budget: u64,
    pub boot_cycle_budget: u64,
    pub ram_size: usize,
    pub foreground: bool,
}

impl MountConfig {
    pub fn device_name(&self) -> String {
        self.volname.clone().unwrap_or_else(|| "DH0".to_string())
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            driver_path: PathBuf::new(),
            image_path: PathBuf::new(),
            mountpoint: PathBuf::new(),
            block_size_override: None,
            volname: None,
            debug: false,
            packet_cycle_budget: DEFAULT_PACKET_CYCLE_BUDGET,
            boot_cycle_budget: DEFAULT_BOOT_CYCLE_BUDGET,
            ram_size: DEFAULT_RAM_SIZE,
            foreground: false,
        }
    }
}
