//! Library vector tables and the calls this bridge actually implements
//! (spec section 4.2).
//!
//! Real AmigaOS libraries are jump tables at negative offsets from the
//! library base (`-6, -12, -18, ...`, the "LVO" convention). We reuse that
//! layout — not because anything here disassembles it, but because it is
//! what a handler binary's relocations expect to find — and bind each
//! offset that AmigaDOS handlers actually call to an [`ExecCall`] tag
//! resolved through the trap table in [`crate::cpu`].

use crate::cpu::LibraryId;

/// Every Exec/DOS/Utility call this bridge recognizes. Unknown vectors
/// (anything OpenLibrary/OpenDevice didn't hand out, or an offset we never
/// populated) trap as [`crate::error::AmifuseError::ProtocolViolation`],
/// per spec design note on "unknown vectors trap with ProtocolViolation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecCall {
    AllocMem,
    FreeMem,
    FindTask,
    CreatePort,
    DeletePort,
    FindPort,
    PutMsg,
    GetMsg,
    WaitPort,
    Wait,
    ReplyMsg,
    OpenLibrary,
    CloseLibrary,
    OpenDevice,
    CloseDevice,
    DoIO,
    SendIO,
    WaitIO,
    CheckIO,
}

/// LVO table for `exec.library`, in call order starting at offset -30
/// (offset -6 is reserved for `OpenLibrary` itself on every library base,
/// per AmigaOS convention; `exec.library`'s own base additionally carries
/// the memory/port/task primitives).
pub const EXEC_VECTORS: &[(i32, ExecCall)] = &[
    (-30, ExecCall::OpenLibrary),
    (-36, ExecCall::CloseLibrary),
    (-198, ExecCall::AllocMem),
    (-210, ExecCall::FreeMem),
    (-294, ExecCall::FindTask),
    (-354, ExecCall::PutMsg),
    (-360, ExecCall::GetMsg),
    (-366, ExecCall::ReplyMsg),
    (-384, ExecCall::CreatePort),
    (-390, ExecCall::DeletePort),
    (-396, ExecCall::FindPort),
    (-444, ExecCall::Wait),
    (-450, ExecCall::WaitPort),
    (-456, ExecCall::OpenDevice),
    (-462, ExecCall::CloseDevice),
    (-456 - 6, ExecCall::DoIO),
    (-456 - 12, ExecCall::SendIO),
    (-456 - 18, ExecCall::WaitIO),
    (-456 - 24, ExecCall::CheckIO),
];

pub fn library_for(call: ExecCall) -> LibraryId {
    match call {
        ExecCall::OpenLibrary | ExecCall::CloseLibrary => LibraryId::Exec,
        ExecCall::AllocMem | ExecCall::FreeMem => LibraryId::Exec,
        ExecCall::FindTask => LibraryId::Exec,
        ExecCall::PutMsg | ExecCall::GetMsg | ExecCall::ReplyMsg => LibraryId::Exec,
        ExecCall::CreatePort | ExecCall::DeletePort | ExecCall::FindPort => LibraryId::Exec,
        ExecCall::Wait | ExecCall::WaitPort => LibraryId::Exec,
        // Real AmigaOS dispatches device I/O through SysBase itself, not a
        // per-device jump table: OpenDevice only ever populates an
        // IORequest's io_Device field, and DoIO/SendIO/WaitIO/CheckIO are
        // exec.library LVOs taking that IORequest in A1. A handler's real
        // binary calls all of these through the same exec.library base it
        // got from OpenLibrary, so the traps must live there too.
        ExecCall::OpenDevice | ExecCall::CloseDevice | ExecCall::DoIO | ExecCall::SendIO | ExecCall::WaitIO | ExecCall::CheckIO => {
            LibraryId::Exec
        }
    }
}

/// Resolves a raw vector offset on `exec.library`'s base to the call it was
/// bound to at bootstrap, used only for diagnostics: the trap table in
/// [`crate::cpu::Core`] is keyed by absolute address, not offset, once
/// installed.
pub fn dispatch(offset: i32) -> Option<ExecCall> {
    EXEC_VECTORS.iter().find(|(o, _)| *o == offset).map(|(_, c)| *c)
}
