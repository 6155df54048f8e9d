//! Command-line surface (spec section 6), parsed with `clap`'s derive API
//! the way the teacher's ambient tooling would, generalized from a
//! single-binary emulator invocation to the mount-style flags this crate
//! needs.

use std::path::PathBuf;

use clap::Parser;

use crate::bootstrap::DEFAULT_BOOT_CYCLE_BUDGET;
use crate::bridge::DEFAULT_PACKET_CYCLE_BUDGET;
use crate::config::MountConfig;
use crate::memory::DEFAULT_RAM_SIZE;

#[derive(Debug, Parser)]
#[command(name = "amifuse", about = "Mount an Amiga hard-disk image via its own filesystem handler")]
pub struct Cli {
    /// Path to the unmodified AmigaDOS handler binary (hunk executable).
    #[arg(long)]
    pub driver: PathBuf,

    /// Path to the Amiga hard-disk image file.
    #[arg(long)]
    pub image: PathBuf,

    /// Host directory to mount the filesystem at.
    #[arg(long)]
    pub mountpoint: PathBuf,

    /// Override the trackdisk block size (bytes); ignored if the image
    /// carries an RDB, which always wins.
    #[arg(long)]
    pub block_size: Option<u32>,

    /// Device name presented to the handler at startup (default `DH0`).
    #[arg(long)]
    pub volname: Option<String>,

    /// Raise logging to `debug` for the `amifuse` target.
    #[arg(long)]
    pub debug: bool,

    /// Per-packet cycle budget before a call times out.
    #[arg(long, default_value_t = DEFAULT_PACKET_CYCLE_BUDGET)]
    pub packet_cycles: u64,

    /// Bootstrap cycle budget before handler startup is given up on.
    #[arg(long, default_value_t = DEFAULT_BOOT_CYCLE_BUDGET)]
    pub boot_cycles: u64,

    /// Stay attached to the terminal instead of forking to the background.
    #[arg(long)]
    pub foreground: bool,
}

impl From<Cli> for MountConfig {
    fn from(cli: Cli) -> Self {
        MountConfig {
            driver_path: cli.driver,
            image_path: cli.image,
            mountpoint: cli.mountpoint,
            block_size_override: cli.block_size,
            volname: cli.volname,
            debug: cli.debug,
            packet_cycle_budget: cli.packet_cycles,
            boot_cycle_budget: cli.boot_cycles,
            ram_size: DEFAULT_RAM_SIZE,
            foreground: cli.foreground,
        }
    }
}
