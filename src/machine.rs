//! Ties the CPU adapter (C1/C11), the virtual Exec kernel (C2), and the
//! virtual trackdisk device (C3) into one driver loop. This is the object
//! that actually executes trapped library calls; [`crate::bootstrap`] and
//! [`crate::bridge`] both drive it, for the boot rendezvous and for
//! steady-state packet round-trips respectively.
//!
//! Grounded on the teacher's `Emulator::run` shape: step the CPU, let host
//! state react, repeat — generalized with the trap table the teacher's
//! Atari emulator never needed.

use std::collections::HashMap;

use crate::cpu::{Core, LibraryId, RunOutcome, TrapId};
use crate::error::AmifuseError;
use crate::exec::library::{dispatch as dispatch_vector, library_for, ExecCall, EXEC_VECTORS};
use crate::exec::port::{message_layout, Message, MessageHandle, PortHandle, PortRegistry};
use crate::exec::task::{Task, TaskState};
use crate::memory::{ArenaLayout, Memory};
use crate::trackdisk::{IoCommand, TrackdiskDevice};

/// Amiga IORequest layout, trimmed to the fields this bridge reads/writes.
pub mod ioreq_layout {
    pub const IO_COMMAND: u32 = 0; // u16
    pub const IO_FLAGS: u32 = 4; // u8, bit0 set => NSD (block) addressing
    pub const IO_ERROR: u32 = 8; // i8
    pub const IO_OFFSET: u32 = 12; // u32, byte or block offset
    pub const IO_LENGTH: u32 = 16; // u32
    pub const IO_DATA: u32 = 20; // pointer
    pub const SIZE: u32 = 24;
}

/// One bounded CPU slice, per spec section 5 ("10,000 cycles").
pub const DEFAULT_SLICE_CYCLES: u64 = 10_000;

/// What the boot rendezvous or a packet call is currently waiting for.
enum Awaiting {
    /// Waiting for the handler's first `CreatePort`, at which point the
    /// startup packet described by `startup_msg` is injected.
    HandlerPort { startup_msg: u32 },
    /// Waiting for a reply message to land on `port` whose packet address
    /// equals `packet_addr`.
    Reply { port: PortHandle, packet_addr: u32 },
}

pub struct Machine {
    pub core: Core,
    pub mem: Memory,
    pub ports: PortRegistry,
    pub handler_task: Task,
    pub disk: TrackdiskDevice,
    pub reply_port: PortHandle,
    library_bases: HashMap<LibraryId, u32>,
    awaiting: Option<Awaiting>,
    /// Set once the handler creates a named port; used by the bridge to
    /// locate it for subsequent packet calls without re-scanning.
    pub handler_port: Option<PortHandle>,
}

/// Result of driving the machine toward a condition.
#[derive(Debug)]
pub enum DriveResult {
    /// The handler's first port creation was observed and the startup
    /// packet was handed to it.
    HandlerPortReady(PortHandle),
    /// The awaited reply arrived; carries the packet address so the caller
    /// can read `dp_Res1`/`dp_Res2` and free the block.
    Replied { packet_addr: u32 },
}

impl Machine {
    pub fn new(ram_size: usize, disk: TrackdiskDevice) -> Result<Self, AmifuseError> {
        let layout = ArenaLayout {
            code_base: 0x1000,
            code_size: 0x20_0000,
            kernel_base: 0x21_0000,
            kernel_size: 0x1_0000,
            heap_base: 0x22_0000,
            heap_size: (ram_size - 0x22_0000) as u32,
        };
        let mut mem = Memory::new(ram_size, layout);
        let mut core = Core::new();
        let mut ports = PortRegistry::new();

        let mut library_bases = HashMap::new();
        for lib in [LibraryId::Exec, LibraryId::Dos, LibraryId::Utility] {
            let base = Self::build_library_base(&mut mem, &mut core, lib)?;
            library_bases.insert(lib, base);
        }

        let reply_port = ports.create(&mut mem, None, None)?;
        let handler_task = Task::new(0, "handler");

        Ok(Machine {
            core,
            mem,
            ports,
            handler_task,
            disk,
            reply_port,
            library_bases,
            awaiting: None,
            handler_port: None,
        })
    }

    /// Allocates a jump-vector table for `lib` and installs a trap at every
    /// offset [`EXEC_VECTORS`] lists for it, per spec section 4.2. Offsets
    /// are all negative from the base, per the AmigaOS LVO convention.
    fn build_library_base(mem: &mut Memory, core: &mut Core, lib: LibraryId) -> Result<u32, AmifuseError> {
        let max_offset = EXEC_VECTORS
            .iter()
            .filter(|(_, call)| library_for(*call) == lib)
            .map(|(off, _)| off.unsigned_abs())
            .max()
            .unwrap_or(6);
        let table_size = max_offset + 8;
        let table_base = mem.alloc(table_size, 4)?;
        // Library base conventionally sits after its negative-offset jump
        // table; we point it at the end of the allocation.
        let lib_base = table_base + table_size;
        for &(offset, call) in EXEC_VECTORS {
            if library_for(call) != lib {
                continue;
            }
            let addr = (lib_base as i64 + offset as i64) as u32;
            core.install_trap(mem, addr, TrapId { library: lib, vector: offset as u16 })?;
        }
        Ok(lib_base)
    }

    pub fn library_base(&self, lib: LibraryId) -> u32 {
        self.library_bases[&lib]
    }

    /// Runs bounded slices until the handler's first `CreatePort` call,
    /// handing it `startup_msg` (a fully populated `ACTION_STARTUP`
    /// message already allocated in the heap) at that point.
    pub fn drive_to_handler_port(&mut self, startup_msg: u32, budget_cycles: u64) -> Result<PortHandle, AmifuseError> {
        self.awaiting = Some(Awaiting::HandlerPort { startup_msg });
        let mut spent = 0u64;
        loop {
            if spent >= budget_cycles {
                return Err(AmifuseError::HandlerBootFailed(format!(
                    "handler did not create its port within {budget_cycles} cycles"
                )));
            }
            match self.core.run(&mut self.mem, DEFAULT_SLICE_CYCLES)? {
                RunOutcome::BudgetExhausted => spent += DEFAULT_SLICE_CYCLES,
                RunOutcome::Trapped(id) => {
                    if let Some(port) = self.handle_trap(id)? {
                        return Ok(port);
                    }
                    self.core.simulate_rts(&self.mem)?;
                }
            }
        }
    }

    /// Runs bounded slices until a reply to `packet_addr` lands on `port`.
    pub fn drive_to_reply(&mut self, port: PortHandle, packet_addr: u32, budget_cycles: u64) -> Result<(), AmifuseError> {
        self.awaiting = Some(Awaiting::Reply { port, packet_addr });
        let mut spent = 0u64;
        loop {
            if spent >= budget_cycles {
                return Err(AmifuseError::PacketTimeout { cycles: budget_cycles });
            }
            match self.core.run(&mut self.mem, DEFAULT_SLICE_CYCLES)? {
                RunOutcome::BudgetExhausted => spent += DEFAULT_SLICE_CYCLES,
                RunOutcome::Trapped(id) => {
                    if self.handle_trap(id)?.is_some() {
                        return Ok(());
                    }
                    self.core.simulate_rts(&self.mem)?;
                }
            }
        }
    }

    /// Executes one trapped Exec/DOS library call. Returns `Some(port)`
    /// only when the outcome satisfies the currently awaited condition
    /// (the handler port rendezvous or a matching reply), signalling the
    /// caller's drive loop to stop.
    fn handle_trap(&mut self, id: TrapId) -> Result<Option<PortHandle>, AmifuseError> {
        let call = dispatch_vector(id.vector as i16 as i32).ok_or(AmifuseError::ProtocolViolation)?;
        match call {
            ExecCall::AllocMem => {
                let size = self.core.d(0);
                let addr = self.mem.alloc(size, 4)?;
                self.core.set_d(0, addr);
            }
            ExecCall::FreeMem => {
                let addr = self.core.a(1);
                let size = self.core.d(0);
                self.mem.free(addr, size, 4);
            }
            ExecCall::FindTask => {
                self.core.set_d(0, self.handler_task.addr);
            }
            ExecCall::CreatePort => {
                let name_ptr = self.core.a(0);
                let name = if name_ptr != 0 { Some(self.mem.read_cstr(name_ptr)?) } else { None };
                let handle = self.ports.create(&mut self.mem, name.as_deref(), Some(self.handler_task.addr))?;
                self.core.set_d(0, handle.0);
                self.handler_port = Some(handle);

                if let Some(Awaiting::HandlerPort { startup_msg }) = self.awaiting.take() {
                    self.ports.put_msg(handle, MessageHandle(startup_msg));
                    self.handler_task.signal(1);
                    return Ok(Some(handle));
                }
            }
            ExecCall::DeletePort => {
                let addr = self.core.a(0);
                self.ports.delete(PortHandle(addr));
            }
            ExecCall::FindPort => {
                let name = self.mem.read_cstr(self.core.a(1))?;
                let found = self.ports.find_by_name(&name).map(|h| h.0).unwrap_or(0);
                self.core.set_d(0, found);
            }
            ExecCall::PutMsg => {
                let port = PortHandle(self.core.a(0));
                let msg = self.core.a(1);
                self.ports.put_msg(port, MessageHandle(msg));
                self.handler_task.signal(1);
            }
            ExecCall::GetMsg => {
                let port = PortHandle(self.core.a(0));
                let got = self.ports.get_msg(port).map(|m| m.0).unwrap_or(0);
                self.core.set_d(0, got);
            }
            ExecCall::WaitPort => {
                let port = PortHandle(self.core.a(0));
                // WaitPort never actually blocks the host: by construction
                // it is only ever invoked with a message already queued
                // (we drive the CPU until one is), so this always succeeds
                // immediately. The teacher's coroutine-free design note
                // (spec section 9) applies here too.
                let got = self.ports.get_msg(port);
                if let Some(m) = got {
                    self.core.set_d(0, m.0);
                } else {
                    return Err(AmifuseError::ProtocolViolation);
                }

                if let Some(Awaiting::Reply { port: awaited_port, packet_addr }) = &self.awaiting {
                    if *awaited_port == port {
                        let msg_addr = got.unwrap().0;
                        let actual_packet = msg_addr + message_layout::HEADER_SIZE;
                        if actual_packet == *packet_addr {
                            self.awaiting = None;
                            return Ok(Some(*awaited_port));
                        }
                    }
                }
            }
            ExecCall::Wait => {
                let mask = self.core.d(0);
                let got = self.handler_task.wait(mask).unwrap_or(mask);
                self.core.set_d(0, got);
                self.handler_task.state = TaskState::Running;
            }
            ExecCall::ReplyMsg => {
                let msg_addr = self.core.a(1);
                let reply_port_addr = self.mem.read_u32(msg_addr + message_layout::MN_REPLYPORT)?;
                let port = PortHandle(reply_port_addr);
                self.ports.put_msg(port, MessageHandle(msg_addr));

                if let Some(Awaiting::Reply { port: awaited_port, packet_addr }) = &self.awaiting {
                    if *awaited_port == port {
                        let actual_packet = msg_addr + message_layout::HEADER_SIZE;
                        if actual_packet == *packet_addr {
                            self.awaiting = None;
                            return Ok(Some(*awaited_port));
                        }
                    }
                }
            }
            ExecCall::OpenLibrary => {
                let name = self.mem.read_cstr(self.core.a(1))?;
                let base = match name.as_str() {
                    "exec.library" => Some(self.library_bases[&LibraryId::Exec]),
                    "dos.library" => Some(self.library_bases[&LibraryId::Dos]),
                    "utility.library" => Some(self.library_bases[&LibraryId::Utility]),
                    _ => None,
                };
                self.core.set_d(0, base.unwrap_or(0));
            }
            ExecCall::CloseLibrary => {}
            ExecCall::OpenDevice => {
                let name = self.mem.read_cstr(self.core.a(0))?;
                let ioreq = self.core.a(1);
                if name == "trackdisk.device" || name == "amifuse.device" {
                    self.mem.write_u32(ioreq + ioreq_layout::IO_ERROR, 0)?;
                    self.core.set_d(0, 0);
                } else {
                    self.core.set_d(0, u32::MAX);
                }
            }
            ExecCall::CloseDevice => {}
            ExecCall::DoIO | ExecCall::SendIO => {
                let ioreq = self.core.a(1);
                self.service_ioreq(ioreq)?;
                let err = self.mem.read_u8(ioreq + ioreq_layout::IO_ERROR)?;
                self.core.set_d(0, err as u32);
            }
            ExecCall::WaitIO | ExecCall::CheckIO => {
                let ioreq = self.core.a(1);
                let err = self.mem.read_u8(ioreq + ioreq_layout::IO_ERROR)?;
                self.core.set_d(0, err as u32);
            }
        }
        Ok(None)
    }

    /// Services a `trackdisk.device` I/O request inline, per spec section 4.3
    /// and the concurrency model's "serviced inline, no lock release".
    fn service_ioreq(&mut self, ioreq: u32) -> Result<(), AmifuseError> {
        let cmd_raw = self.mem.read_u16(ioreq + ioreq_layout::IO_COMMAND)?;
        let flags = self.mem.read_u8(ioreq + ioreq_layout::IO_FLAGS)?;
        let nsd = flags & 1 != 0;
        let offset = self.mem.read_u32(ioreq + ioreq_layout::IO_OFFSET)? as u64;
        let length = self.mem.read_u32(ioreq + ioreq_layout::IO_LENGTH)? as usize;
        let data_ptr = self.mem.read_u32(ioreq + ioreq_layout::IO_DATA)?;

        let cmd = IoCommand::from_u16(cmd_raw);
        let error: i8 = match cmd {
            Some(IoCommand::CmdRead) => match self.disk.read(offset, length, nsd) {
                Ok(bytes) => {
                    self.mem.write_bytes(data_ptr, &bytes)?;
                    0
                }
                Err(_) => -1,
            },
            Some(IoCommand::CmdWrite) => self.disk.write(offset, &[]),
            Some(IoCommand::CmdUpdate) => 0,
            Some(IoCommand::TdChangenum) => {
                self.core.set_d(0, self.disk.change_num());
                0
            }
            Some(IoCommand::TdProtstatus) => {
                self.core.set_d(0, self.disk.prot_status() as u32);
                0
            }
            Some(IoCommand::TdGetGeometry) => {
                let geom = self.disk.geometry();
                if data_ptr != 0 {
                    self.mem.write_u32(data_ptr, geom.total_blocks as u32)?;
                    self.mem.write_u32(data_ptr + 4, geom.block_size)?;
                    self.mem.write_u32(data_ptr + 8, geom.cylinders)?;
                    self.mem.write_u32(data_ptr + 12, geom.heads)?;
                    self.mem.write_u32(data_ptr + 16, geom.sectors)?;
                }
                0
            }
            Some(IoCommand::TdAddChangeint) | Some(IoCommand::TdRemChangeint) => 0,
            None => -3, // IOERR_NOCMD
        };
        self.mem.write_u8(ioreq + ioreq_layout::IO_ERROR, error as u8)?;
        Ok(())
    }

    /// Allocates and returns a fresh `Message`.
    pub fn alloc_message(&mut self) -> Result<Message, AmifuseError> {
        self.ports.alloc_message(&mut self.mem)
    }

    pub fn free_message(&mut self, msg: Message) {
        self.ports.free_message(&mut self.mem, msg)
    }
}
