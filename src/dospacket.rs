//! AmigaDOS packet definitions: action codes, the `DosPacket` struct layout,
//! and marshalling helpers shared by the bridge (C5) and the virtual Exec
//! kernel (C2).

use crate::error::AmifuseError;
use crate::memory::Memory;

/// Action codes this bridge issues or recognizes. Values are the
/// AmigaDOS-defined action numbers; names follow the AmigaDOS spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Action {
    LocateObject = 8,
    FindInput = 1005,
    Read = 82,
    End = 1007,
    ParentDir = 29,
    ExamineObject = 23,
    ExamineNext = 24,
    FreeLock = 15,
    CopyDir = 19,
    IsFileSystem = 32,
    Startup = 0,
    Seek = 1008,
}

impl Action {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Result of a packet round-trip: the two AmigaDOS result longs.
#[derive(Debug, Clone, Copy)]
pub struct PacketResult {
    pub res1: u32,
    pub res2: u32,
}

impl PacketResult {
    pub fn is_success(&self) -> bool {
        self.res1 != 0
    }
}

/// In-memory layout offsets of a `DosPacket`, matching the classic AmigaDOS
/// structure: `dp_Link, dp_Port, dp_Type, dp_Res1, dp_Res2, dp_Arg1..dp_Arg7`.
/// All fields are 32-bit longs; the packet is embedded as the payload of a
/// one-`Message` allocation (see [`crate::exec::port`]).
pub mod layout {
    pub const DP_LINK: u32 = 0;
    pub const DP_PORT: u32 = 4;
    pub const DP_TYPE: u32 = 8;
    pub const DP_RES1: u32 = 12;
    pub const DP_RES2: u32 = 16;
    pub const DP_ARG_BASE: u32 = 20;
    pub const DP_ARG_COUNT: u32 = 7;
    pub const SIZE: u32 = DP_ARG_BASE + DP_ARG_COUNT * 4;
}

/// A fully-populated packet as seen from the host side, before it is
/// marshalled into emulator RAM.
#[derive(Debug, Clone)]
pub struct PacketRequest {
    pub action: u32,
    pub args: [u32; layout::DP_ARG_COUNT as usize],
}

impl PacketRequest {
    pub fn new(action: Action) -> Self {
        PacketRequest {
            action: action.code(),
            args: [0; layout::DP_ARG_COUNT as usize],
        }
    }

    pub fn with_arg(mut self, index: usize, value: u32) -> Self {
        self.args[index] = value;
        self
    }
}

/// Writes `req` into the packet structure at `addr` (already allocated in
/// the heap region). `reply_port` is the BPTR the handler should post the
/// reply message to; it is written into `dp_Port` per the AmigaDOS message
/// convention (the port itself is embedded in the enclosing `Message`).
pub fn write_packet(mem: &mut Memory, addr: u32, reply_port: u32, req: &PacketRequest) -> Result<(), AmifuseError> {
    mem.write_u32(addr + layout::DP_PORT, reply_port)?;
    mem.write_u32(addr + layout::DP_TYPE, req.action)?;
    mem.write_u32(addr + layout::DP_RES1, 0)?;
    mem.write_u32(addr + layout::DP_RES2, 0)?;
    for (i, arg) in req.args.iter().enumerate() {
        mem.write_u32(addr + layout::DP_ARG_BASE + (i as u32) * 4, *arg)?;
    }
    Ok(())
}

/// Reads `dp_Res1`/`dp_Res2` back out of a completed packet.
pub fn read_result(mem: &Memory, addr: u32) -> Result<PacketResult, AmifuseError> {
    Ok(PacketResult {
        res1: mem.read_u32(addr + layout::DP_RES1)?,
        res2: mem.read_u32(addr + layout::DP_RES2)?,
    })
}

/// A `FileInfoBlock` projected to the fields the cache actually needs.
/// Populated from `EXAMINE_OBJECT`/`EXAMINE_NEXT` replies.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub protection: u32,
    /// Minutes/ticks since 1978-01-01, as AmigaDOS stores them; converted
    /// to a `SystemTime` only at the FUSE boundary.
    pub days: u32,
    pub minute: u32,
    pub tick: u32,
    pub comment: String,
}

/// Offsets into a `FileInfoBlock`, trimmed to the fields this bridge reads.
/// `fib_DirEntryType` positive means directory, per AmigaDOS convention.
pub mod fib_layout {
    pub const FIB_DIR_ENTRY_TYPE: u32 = 4;
    pub const FIB_FILE_NAME: u32 = 8; // BSTR, 108 bytes reserved
    pub const FIB_FILE_NAME_LEN: u32 = 108;
    pub const FIB_PROTECTION: u32 = 8 + FIB_FILE_NAME_LEN;
    pub const FIB_SIZE: u32 = FIB_PROTECTION + 4;
    pub const FIB_NUM_BLOCKS: u32 = FIB_SIZE + 4;
    pub const FIB_DATE_DAYS: u32 = FIB_NUM_BLOCKS + 4;
    pub const FIB_DATE_MINUTE: u32 = FIB_DATE_DAYS + 4;
    pub const FIB_DATE_TICK: u32 = FIB_DATE_MINUTE + 4;
    pub const FIB_COMMENT: u32 = FIB_DATE_TICK + 4; // BSTR, 80 bytes reserved
    pub const FIB_COMMENT_LEN: u32 = 80;
    pub const SIZE: u32 = FIB_COMMENT + FIB_COMMENT_LEN;
}

pub fn read_file_info(mem: &Memory, addr: u32) -> Result<FileInfo, AmifuseError> {
    use fib_layout::*;
    let entry_type = mem.read_u32(addr + FIB_DIR_ENTRY_TYPE)?;
    let name = mem.read_bstr(addr + FIB_FILE_NAME)?;
    let protection = mem.read_u32(addr + FIB_PROTECTION)?;
    let size = mem.read_u32(addr + FIB_SIZE)? as u64;
    let days = mem.read_u32(addr + FIB_DATE_DAYS)?;
    let minute = mem.read_u32(addr + FIB_DATE_MINUTE)?;
    let tick = mem.read_u32(addr + FIB_DATE_TICK)?;
    let comment = mem.read_bstr(addr + FIB_COMMENT)?;
    Ok(FileInfo {
        name,
        is_dir: (entry_type as i32) > 0,
        size,
        protection,
        days,
        minute,
        tick,
        comment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ArenaLayout;

    fn mem() -> Memory {
        let layout = ArenaLayout {
            code_base: 0,
            code_size: 0x1000,
            kernel_base: 0x1000,
            kernel_size: 0x1000,
            heap_base: 0x2000,
            heap_size: 0x2000,
        };
        Memory::new(0x4000, layout)
    }

    #[test]
    fn packet_round_trip() {
        let mut m = mem();
        let addr = m.alloc(layout::SIZE, 4).unwrap();
        let req = PacketRequest::new(Action::LocateObject).with_arg(1, 0x1234);
        write_packet(&mut m, addr, 0xaaaa, &req).unwrap();
        assert_eq!(m.read_u32(addr + layout::DP_TYPE).unwrap(), Action::LocateObject.code());
        assert_eq!(m.read_u32(addr + layout::DP_ARG_BASE + 4).unwrap(), 0x1234);
        m.write_u32(addr + layout::DP_RES1, 1).unwrap();
        m.write_u32(addr + layout::DP_RES2, 0x5678).unwrap();
        let result = read_result(&m, addr).unwrap();
        assert!(result.is_success());
        assert_eq!(result.res2, 0x5678);
    }
}
