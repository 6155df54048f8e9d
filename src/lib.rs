//! Mounts an Amiga hard-disk image by running its own filesystem handler
//! binary under m68k emulation and bridging the handler's AmigaDOS packet
//! interface to a host FUSE driver.
//!
//! The module tree mirrors the bridge's own layering: memory and CPU at the
//! bottom (C1, C11), the virtual Exec kernel and trackdisk device above
//! them (C2, C3), packet marshalling and handler bootstrap next (the wire
//! format and C4), then the synchronous packet bridge itself (C5), the
//! lock/inode cache (C6), and finally the `fuser` adapter (C7).

pub mod bootstrap;
pub mod bridge;
pub mod cache;
pub mod cli;
pub mod config;
pub mod cpu;
pub mod dospacket;
pub mod error;
pub mod exec;
pub mod fuse_adapter;
pub mod hunk;
pub mod machine;
pub mod memory;
pub mod rdb;
pub mod trackdisk;

pub use bootstrap::BootOutcome;
pub use bridge::Bridge;
pub use cache::Cache;
pub use config::MountConfig;
pub use error::AmifuseError;
pub use fuse_adapter::FuseAdapter;

/// Boots the handler and assembles the cache and adapter a mount needs,
/// stopping short of actually calling `fuser::mount2` so callers (the CLI,
/// or a test) can decide how to run it.
pub fn prepare_mount(config: &MountConfig) -> Result<FuseAdapter, AmifuseError> {
    let outcome = bootstrap::boot(
        &config.driver_path,
        &config.image_path,
        &config.device_name(),
        config.block_size_override,
        config.ram_size,
        config.boot_cycle_budget,
    )?;
    let bridge = Bridge::new(outcome.machine, config.packet_cycle_budget);
    let cache = Cache::new(bridge, outcome.root_lock);
    Ok(FuseAdapter::new(cache))
}
