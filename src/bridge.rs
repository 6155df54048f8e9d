//! Packet Bridge (spec component C5): the synchronous RPC between the host
//! and the running handler.
//!
//! A single `Mutex<Machine>` is the "CPU lock" spec section 5 describes:
//! whichever FUSE worker thread is executing a packet call holds it for the
//! call's entire duration, including any trackdisk I/O the handler issues
//! along the way (serviced inline by [`crate::machine::Machine`], so it
//! never needs its own lock).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::dospacket::{self, layout as dp_layout, Action, FileInfo, PacketRequest};
use crate::error::{amigados, AmifuseError};
use crate::exec::port::message_layout;
use crate::machine::Machine;

/// Default per-packet cycle budget, per spec section 4.5 ("10 seconds
/// wall / per-call configurable"). Cycle count rather than wall time, so
/// tests stay deterministic; `Bridge::new` also records a wall-clock
/// ceiling used the same way bootstrap does.
pub const DEFAULT_PACKET_CYCLE_BUDGET: u64 = 100_000_000;

/// A name longer than this is rejected without a round-trip, per spec
/// section 4.5's "names > 107 bytes are rejected ... without a round-trip".
pub const MAX_NAME_LEN: usize = 107;

pub const ACCESS_READ: u32 = 0xffff_fffe; // -2 as an unsigned long
const OFFSET_BEGINNING: u32 = 0xffff_ffff; // -1
const OFFSET_CURRENT: u32 = 0;
const OFFSET_END: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub enum SeekMode {
    Beginning,
    Current,
    End,
}

impl SeekMode {
    fn code(self) -> u32 {
        match self {
            SeekMode::Beginning => OFFSET_BEGINNING,
            SeekMode::Current => OFFSET_CURRENT,
            SeekMode::End => OFFSET_END,
        }
    }
}

/// Monotonic counters exposed for tests and `--debug` reporting (spec
/// section 8 scenario 3: "verified by bridge counter").
#[derive(Default)]
pub struct BridgeStats {
    pub packets_issued: AtomicU64,
    pub bytes_read: AtomicU64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.packets_issued.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
        )
    }
}

pub struct Bridge {
    machine: Mutex<Machine>,
    packet_cycle_budget: u64,
    pub stats: BridgeStats,
}

impl Bridge {
    pub fn new(machine: Machine, packet_cycle_budget: u64) -> Self {
        Bridge {
            machine: Mutex::new(machine),
            packet_cycle_budget,
            stats: BridgeStats::default(),
        }
    }

    fn handler_port(&self, machine: &Machine) -> Result<crate::exec::port::PortHandle, AmifuseError> {
        machine.handler_port.ok_or(AmifuseError::ProtocolViolation)
    }

    /// The core synchronous RPC described in spec section 4.5, steps 1-5.
    fn call(&self, req: PacketRequest) -> Result<(u32, u32), AmifuseError> {
        let action = req.action;
        let mut machine = self.machine.lock().expect("CPU lock poisoned");
        let handler_port = self.handler_port(&machine)?;

        let msg = machine.alloc_message()?;
        let packet_addr = msg.packet_addr();
        dospacket::write_packet(&mut machine.mem, packet_addr, machine.reply_port.0, &req)?;
        machine
            .mem
            .write_u32(msg.addr + message_layout::MN_REPLYPORT, machine.reply_port.0)?;
        machine
            .mem
            .write_u32(msg.addr + message_layout::MN_LENGTH, dp_layout::SIZE)?;

        machine.ports.put_msg(handler_port, crate::exec::port::MessageHandle(msg.addr));
        machine.handler_task.signal(1);

        self.stats.packets_issued.fetch_add(1, Ordering::Relaxed);
        log::trace!("packet dispatched: action={action} addr={packet_addr:#x}");

        machine.drive_to_reply(machine.reply_port, packet_addr, self.packet_cycle_budget)?;

        let result = dospacket::read_result(&machine.mem, packet_addr)?;
        machine.free_message(msg);
        log::debug!("packet round-trip: action={action} res1={} res2={}", result.res1, result.res2);
        Ok((result.res1, result.res2))
    }

    fn alloc_name(&self, machine: &mut Machine, name: &str) -> Result<u32, AmifuseError> {
        let addr = machine.mem.alloc(name.len() as u32 + 2, 2)?;
        machine.mem.write_bstr(addr, name)?;
        Ok(addr)
    }

    /// `LOCATE_OBJECT`: acquires a lock on `name` relative to `base_lock`
    /// (0 for the volume root). Rejects overlong names without a
    /// round-trip, per spec section 4.5.
    pub fn locate_object(&self, base_lock: u32, name: &str) -> Result<u32, AmifuseError> {
        if name.len() > MAX_NAME_LEN {
            return Err(AmifuseError::PacketError(amigados::ERROR_OBJECT_NOT_FOUND));
        }
        let name_addr = {
            let mut machine = self.machine.lock().expect("CPU lock poisoned");
            self.alloc_name(&mut machine, name)?
        };
        let req = PacketRequest::new(Action::LocateObject)
            .with_arg(0, base_lock)
            .with_arg(1, name_addr)
            .with_arg(2, ACCESS_READ);
        let (res1, _res2) = self.call(req)?;
        self.free_name(name_addr, name.len());
        if res1 == 0 {
            return Err(AmifuseError::PacketError(amigados::ERROR_OBJECT_NOT_FOUND));
        }
        Ok(res1)
    }

    fn free_name(&self, addr: u32, len: usize) {
        let mut machine = self.machine.lock().expect("CPU lock poisoned");
        machine.mem.free(addr, len as u32 + 2, 2);
    }

    /// `FREE_LOCK`.
    pub fn free_lock(&self, lock: u32) -> Result<(), AmifuseError> {
        if lock == 0 {
            return Ok(());
        }
        let req = PacketRequest::new(Action::FreeLock).with_arg(0, lock);
        self.call(req)?;
        Ok(())
    }

    /// `COPY_DIR`: duplicates a lock, used when the cache needs to keep a
    /// directory open for enumeration while also handing the original lock
    /// back to the caller.
    pub fn copy_dir(&self, lock: u32) -> Result<u32, AmifuseError> {
        let req = PacketRequest::new(Action::CopyDir).with_arg(0, lock);
        let (res1, _) = self.call(req)?;
        Ok(res1)
    }

    /// `PARENT`.
    pub fn parent(&self, lock: u32) -> Result<u32, AmifuseError> {
        let req = PacketRequest::new(Action::ParentDir).with_arg(0, lock);
        let (res1, _) = self.call(req)?;
        Ok(res1)
    }

    /// `EXAMINE_OBJECT`: populates a fresh `FileInfoBlock` for `lock`.
    pub fn examine_object(&self, lock: u32) -> Result<(u32, FileInfo), AmifuseError> {
        let fib_addr = {
            let mut machine = self.machine.lock().expect("CPU lock poisoned");
            machine.mem.alloc(dospacket::fib_layout::SIZE, 4)?
        };
        let req = PacketRequest::new(Action::ExamineObject).with_arg(0, lock).with_arg(1, fib_addr);
        let (res1, _) = self.call(req)?;
        if res1 == 0 {
            let mut machine = self.machine.lock().expect("CPU lock poisoned");
            machine.mem.free(fib_addr, dospacket::fib_layout::SIZE, 4);
            return Err(AmifuseError::PacketError(amigados::ERROR_OBJECT_NOT_FOUND));
        }
        let info = {
            let machine = self.machine.lock().expect("CPU lock poisoned");
            dospacket::read_file_info(&machine.mem, fib_addr)?
        };
        Ok((fib_addr, info))
    }

    /// `EXAMINE_NEXT`, reusing the `FileInfoBlock` from a prior `examine_object`
    /// or `examine_next` call as the iteration cursor. Returns `None` on
    /// `ERROR_NO_MORE_ENTRIES` (232), surfaced as end-of-iteration rather
    /// than an error, per spec section 4.5.
    pub fn examine_next(&self, lock: u32, fib_addr: u32) -> Result<Option<FileInfo>, AmifuseError> {
        let req = PacketRequest::new(Action::ExamineNext).with_arg(0, lock).with_arg(1, fib_addr);
        let (res1, res2) = self.call(req)?;
        if res1 == 0 {
            if res2 == amigados::ERROR_NO_MORE_ENTRIES {
                return Ok(None);
            }
            return Err(AmifuseError::PacketError(res2));
        }
        let machine = self.machine.lock().expect("CPU lock poisoned");
        Ok(Some(dospacket::read_file_info(&machine.mem, fib_addr)?))
    }

    pub fn free_fib(&self, fib_addr: u32) {
        let mut machine = self.machine.lock().expect("CPU lock poisoned");
        machine.mem.free(fib_addr, dospacket::fib_layout::SIZE, 4);
    }

    /// `FINDINPUT`: opens `name` under `dir_lock` for reading.
    pub fn find_input(&self, dir_lock: u32, name: &str) -> Result<u32, AmifuseError> {
        let (name_addr, fh_addr) = {
            let mut machine = self.machine.lock().expect("CPU lock poisoned");
            let name_addr = self.alloc_name(&mut machine, name)?;
            let fh_addr = machine.mem.alloc(4, 4)?;
            (name_addr, fh_addr)
        };
        let req = PacketRequest::new(Action::FindInput)
            .with_arg(0, fh_addr)
            .with_arg(1, dir_lock)
            .with_arg(2, name_addr);
        let (res1, _) = self.call(req)?;
        self.free_name(name_addr, name.len());
        if res1 == 0 {
            let mut machine = self.machine.lock().expect("CPU lock poisoned");
            machine.mem.free(fh_addr, 4, 4);
            return Err(AmifuseError::PacketError(amigados::ERROR_OBJECT_NOT_FOUND));
        }
        Ok(fh_addr)
    }

    /// `READ(fh, buffer, length)`: returns the bytes actually read (may be
    /// fewer than requested at EOF; zero at end of file, per spec section 8).
    pub fn read(&self, fh: u32, length: u32) -> Result<Vec<u8>, AmifuseError> {
        let buf_addr = {
            let mut machine = self.machine.lock().expect("CPU lock poisoned");
            machine.mem.alloc(length.max(1), 2)?
        };
        let req = PacketRequest::new(Action::Read).with_arg(0, fh).with_arg(1, buf_addr).with_arg(2, length);
        let (res1, _) = self.call(req)?;
        let bytes_read = res1 as i32;
        let result = if bytes_read < 0 {
            Err(AmifuseError::PacketError(amigados::ERROR_OBJECT_NOT_FOUND))
        } else {
            let machine = self.machine.lock().expect("CPU lock poisoned");
            let data = machine.mem.read_bytes(buf_addr, bytes_read as usize)?;
            self.stats.bytes_read.fetch_add(data.len() as u64, Ordering::Relaxed);
            Ok(data)
        };
        let mut machine = self.machine.lock().expect("CPU lock poisoned");
        machine.mem.free(buf_addr, length.max(1), 2);
        result
    }

    /// `ACTION_SEEK` (1008), the supplemental action from SPEC_FULL.md
    /// section 4.13. Handlers that return `ERROR_ACTION_NOT_KNOWN` leave
    /// the seek unapplied; the cache falls back to its reopen-and-discard
    /// strategy in that case.
    pub fn seek(&self, fh: u32, offset: i64, mode: SeekMode) -> Result<i64, AmifuseError> {
        let req = PacketRequest::new(Action::Seek)
            .with_arg(0, fh)
            .with_arg(1, offset as i32 as u32)
            .with_arg(2, mode.code());
        let (res1, res2) = self.call(req)?;
        if res1 == 0 {
            return Err(AmifuseError::PacketError(res2));
        }
        Ok(res1 as i32 as i64)
    }

    /// `END`: closes a file handle opened by `find_input`.
    pub fn end(&self, fh: u32) -> Result<(), AmifuseError> {
        let req = PacketRequest::new(Action::End).with_arg(0, fh);
        self.call(req)?;
        let mut machine = self.machine.lock().expect("CPU lock poisoned");
        machine.mem.free(fh, 4, 4);
        Ok(())
    }

    /// `IS_FILESYSTEM`: a startup probe, not used per-request but exposed
    /// for completeness and for the CLI's `--debug` startup banner.
    pub fn is_filesystem(&self) -> Result<bool, AmifuseError> {
        let req = PacketRequest::new(Action::IsFileSystem);
        let (res1, _) = self.call(req)?;
        Ok(res1 != 0)
    }

    pub fn block_size(&self) -> u32 {
        self.machine.lock().expect("CPU lock poisoned").disk.block_size()
    }

    pub fn geometry(&self) -> crate::trackdisk::Geometry {
        self.machine.lock().expect("CPU lock poisoned").disk.geometry()
    }
}
