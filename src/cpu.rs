//! Binds the `m68000` interpreter crate — the "generic m68k CPU emulator"
//! collaborator named in spec sections 1 and 6 — to our memory arena, and
//! implements the "trap handler keyed on instruction address" contract
//! those sections require.
//!
//! The teacher's `CPU::clock_cycle` drove a hand-rolled opcode interpreter
//! one instruction at a time and checked devices for interrupts after each
//! step; this keeps that shape (a driver loop stepping a CPU object in a
//! bounded slice, consulting host state between steps) but delegates the
//! actual instruction semantics to `m68000` and adds the trap-table check
//! the teacher's emulator never needed, since it had no host/guest boundary
//! to cross.

use std::collections::HashMap;
use std::num::Wrapping;

use m68000::cpu_details::Mc68000;
use m68000::memory_access::MemoryAccess;
use m68000::M68000;

use crate::error::AmifuseError;
use crate::memory::Memory;

/// `m68000::MemoryAccess` implemented directly over our big-endian arena,
/// so the interpreter's own fetch/decode/execute reads and writes land in
/// the same memory the bridge marshals packets through.
impl MemoryAccess for Memory {
    fn get_byte(&mut self, addr: u32) -> Option<u8> {
        self.read_u8(addr).ok()
    }

    fn get_word(&mut self, addr: u32) -> Option<u16> {
        self.read_u16(addr).ok()
    }

    fn get_long(&mut self, addr: u32) -> Option<u32> {
        self.read_u32(addr).ok()
    }

    fn set_byte(&mut self, addr: u32, value: u8) -> Option<()> {
        self.write_u8(addr, value).ok()
    }

    fn set_word(&mut self, addr: u32, value: u16) -> Option<()> {
        self.write_u16(addr, value).ok()
    }

    fn set_long(&mut self, addr: u32, value: u32) -> Option<()> {
        self.write_u32(addr, value).ok()
    }

    fn reset_instruction(&mut self) {}
}

/// A-line opcode marker written into library jump-vector slots that are
/// bound to a host trap, per spec section 6 ("A-line traps ... used to
/// intercept library calls"). The interpreter never actually executes
/// these: the driver loop always checks the trap table before stepping.
pub const ALINE_TRAP_BASE: u16 = 0xa000;

/// One library-vector slot: tags which library and which vector offset a
/// host trap address corresponds to, per the design-notes guidance (section
/// 9) to model dynamic vector dispatch as a tagged lookup rather than
/// ambient runtime dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrapId {
    pub library: LibraryId,
    pub vector: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryId {
    Exec,
    Dos,
    Utility,
}

/// Outcome of running the CPU for a bounded slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Execution stopped at an installed trap address; `TrapId` identifies it.
    Trapped(TrapId),
    /// The cycle budget for this call was exhausted.
    BudgetExhausted,
}

/// Wraps the `m68000` interpreter and the host trap table. Only this module
/// touches the `m68000` crate directly, so the rest of the bridge never has
/// to know how the underlying interpreter represents registers internally.
pub struct Core {
    cpu: M68000<Mc68000>,
    traps: HashMap<u32, TrapId>,
}

impl Core {
    pub fn new() -> Self {
        Core {
            cpu: M68000::new_no_reset(),
            traps: HashMap::new(),
        }
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.cpu.regs.pc = Wrapping(pc);
    }

    pub fn pc(&self) -> u32 {
        self.cpu.regs.pc.0
    }

    /// A7 is the stack pointer and is banked (SSP/USP); `Registers` keeps it
    /// out of the fixed `a` array, so this goes through `sp`/`sp_mut`
    /// instead of indexing `a[7]` (which only holds A0-A6).
    pub fn set_sp(&mut self, sp: u32) {
        *self.cpu.regs.sp_mut() = Wrapping(sp);
    }

    pub fn sp(&self) -> u32 {
        self.cpu.regs.sp()
    }

    pub fn d(&self, n: usize) -> u32 {
        self.cpu.regs.d[n].0
    }

    pub fn set_d(&mut self, n: usize, v: u32) {
        self.cpu.regs.d[n] = Wrapping(v);
    }

    /// `n` in 0..=7; `Registers::a` already routes 7 to the banked stack
    /// pointer, same as the real A7 alias.
    pub fn a(&self, n: usize) -> u32 {
        self.cpu.regs.a(n as u8)
    }

    pub fn set_a(&mut self, n: usize, v: u32) {
        *self.cpu.regs.a_mut(n as u8) = Wrapping(v);
    }

    /// Installs a trap at `addr`. Also writes the A-line marker opcode at
    /// that address so a disassembly of the library vector table reads as
    /// a real (if un-executed) instruction stream.
    pub fn install_trap(&mut self, mem: &mut Memory, addr: u32, id: TrapId) -> Result<(), AmifuseError> {
        mem.write_u16(addr, ALINE_TRAP_BASE | (self.traps.len() as u16 & 0x0fff))?;
        self.traps.insert(addr, id);
        Ok(())
    }

    pub fn trap_at(&self, addr: u32) -> Option<TrapId> {
        self.traps.get(&addr).copied()
    }

    /// Pops the return address the most recent `JSR`/`BSR` into a trapped
    /// vector pushed onto A7, simulating the `RTS` the real vector code
    /// would have executed, and resumes there. Called by the bridge
    /// immediately after a host trap handler finishes its work.
    pub fn simulate_rts(&mut self, mem: &Memory) -> Result<(), AmifuseError> {
        let sp = self.sp();
        let ret = mem.read_u32(sp)?;
        self.set_sp(sp + 4);
        self.set_pc(ret);
        Ok(())
    }

    /// Runs until a trap is hit, `max_cycles` is exhausted, or the
    /// interpreter cannot make progress (treated as a bus error). Mirrors
    /// the teacher's `clock_cycle`-in-a-loop shape: step, then check
    /// host-visible state, repeat.
    pub fn run(&mut self, mem: &mut Memory, max_cycles: u64) -> Result<RunOutcome, AmifuseError> {
        let mut spent: u64 = 0;
        while spent < max_cycles {
            if let Some(id) = self.trap_at(self.pc()) {
                return Ok(RunOutcome::Trapped(id));
            }
            let cycles = self.cpu.interpreter(mem);
            spent += cycles as u64;
        }
        Ok(RunOutcome::BudgetExhausted)
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}
