//! Handler Bootstrap (spec component C4).
//!
//! Loads the handler's hunk executable, seeds the initial `ACTION_STARTUP`
//! packet, and runs the CPU until the handler has replied to it — via the
//! deferred rendezvous described in spec section 4.4: the bridge waits for
//! the handler's first `CreatePort` and hands it the startup packet there.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::dospacket::{self, layout as dp_layout, Action, PacketRequest};
use crate::error::AmifuseError;
use crate::exec::port::message_layout;
use crate::hunk::HunkFile;
use crate::machine::Machine;
use crate::rdb::RigidDiskBlock;
use crate::trackdisk::TrackdiskDevice;

/// Default bootstrap budget: 5 seconds of wall time or 200M cycles,
/// whichever is named first in spec section 4.4 — we track both and stop
/// at the first exceeded.
pub const DEFAULT_BOOT_WALL_BUDGET: Duration = Duration::from_secs(5);
pub const DEFAULT_BOOT_CYCLE_BUDGET: u64 = 200_000_000;

pub struct BootOutcome {
    pub machine: Machine,
    pub root_lock: u32,
}

/// Loads `driver_path`, opens `image_path`, and boots the handler against
/// `device_name` (e.g. `"DH0"`). Returns the running [`Machine`] and the
/// root lock from a successful startup reply.
pub fn boot(
    driver_path: &Path,
    image_path: &Path,
    device_name: &str,
    block_size_override: Option<u32>,
    ram_size: usize,
    boot_cycle_budget: u64,
) -> Result<BootOutcome, AmifuseError> {
    let started = Instant::now();

    let disk = TrackdiskDevice::open(image_path, block_size_override)?;
    let mut machine = Machine::new(ram_size, disk)?;

    let hunk_bytes = std::fs::read(driver_path).map_err(|e| AmifuseError::HandlerLoadError(e.to_string()))?;
    let hunk = HunkFile::parse(&hunk_bytes)?;

    let mut segment_addrs = Vec::with_capacity(hunk.segments.len());
    for seg in &hunk.segments {
        let addr = machine.mem.alloc(seg.alloc_size.max(4), 4)?;
        if !seg.data.is_empty() {
            machine.mem.write_bytes(addr, &seg.data)?;
        }
        segment_addrs.push(addr);
    }
    hunk.relocate(&mut machine.mem, &segment_addrs)?;

    let entry = *segment_addrs.first().ok_or_else(|| AmifuseError::HandlerLoadError("hunk file has no segments".into()))?;
    machine.core.set_pc(entry);
    let stack_top = machine.mem.alloc(64 * 1024, 4)? + 64 * 1024 - 4;
    machine.core.set_sp(stack_top);

    // Environment vector: from RDB if present, else a synthesized minimal
    // one carrying just the block size, per spec section 4.4. The device
    // already resolved the partition chain (following `rdb_PartitionList`
    // to its own block) when it opened the image.
    let env_addr = write_environment(&mut machine, machine.disk.rdb())?;

    // Startup message: ACTION_STARTUP args are (device name BSTR, env
    // vector pointer, startup message pointer) per spec section 4.4.
    let msg = machine.alloc_message()?;
    let packet_addr = msg.packet_addr();
    let devname_addr = machine.mem.alloc(32, 2)?;
    machine.mem.write_bstr(devname_addr, device_name)?;

    let req = PacketRequest::new(Action::Startup)
        .with_arg(0, devname_addr)
        .with_arg(1, env_addr)
        .with_arg(2, msg.addr);
    dospacket::write_packet(&mut machine.mem, packet_addr, machine.reply_port.0, &req)?;
    machine.mem.write_u32(msg.addr + message_layout::MN_REPLYPORT, machine.reply_port.0)?;
    machine.mem.write_u32(msg.addr + message_layout::MN_LENGTH, dp_layout::SIZE)?;

    let handler_port = machine.drive_to_handler_port(msg.addr, remaining_cycle_budget(started, boot_cycle_budget)?)?;

    machine.drive_to_reply(
        machine.reply_port,
        packet_addr,
        remaining_cycle_budget(started, boot_cycle_budget)?,
    )?;
    let _ = handler_port;

    let result = dospacket::read_result(&machine.mem, packet_addr)?;
    machine.free_message(msg);

    if !result.is_success() {
        return Err(AmifuseError::HandlerBootFailed(format!(
            "startup packet returned result1={}, result2={}",
            result.res1, result.res2
        )));
    }

    Ok(BootOutcome {
        machine,
        root_lock: result.res2,
    })
}

fn remaining_cycle_budget(started: Instant, total: u64) -> Result<u64, AmifuseError> {
    if started.elapsed() > DEFAULT_BOOT_WALL_BUDGET {
        return Err(AmifuseError::HandlerBootFailed("bootstrap exceeded wall-clock budget".into()));
    }
    Ok(total)
}

/// Writes a minimal `DosEnvec` into the heap, from RDB data if available.
fn write_environment(machine: &mut Machine, rdb: Option<&RigidDiskBlock>) -> Result<u32, AmifuseError> {
    let addr = machine.mem.alloc(20 * 4, 4)?;
    let table_size = 16u32;
    machine.mem.write_u32(addr, table_size)?;
    if let Some(rdb) = rdb {
        for (i, v) in rdb.environment.iter().enumerate().take(19) {
            machine.mem.write_u32(addr + 4 + i as u32 * 4, *v)?;
        }
    } else {
        let size_block_longs = machine.disk.block_size() / 4;
        machine.mem.write_u32(addr + 4, size_block_longs)?;
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_fails_cleanly_on_malformed_hunk() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let driver_path = tmp_dir.path().join("bad.handler");
        std::fs::write(&driver_path, [0u8, 0, 0, 0]).unwrap();

        let image_path = tmp_dir.path().join("disk.img");
        std::fs::write(&image_path, vec![0u8; 4096]).unwrap();

        let err = boot(&driver_path, &image_path, "DH0", Some(512), 1 << 20, 1_000_000).unwrap_err();
        assert!(matches!(err, AmifuseError::HandlerLoadError(_)));
    }
}
