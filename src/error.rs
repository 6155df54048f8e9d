//! Error taxonomy for the bridge, distinct from the AmigaDOS error numbers
//! carried inside `DosPacket` replies (see [`crate::dospacket`]).

use thiserror::Error;

/// Top-level error kind, per spec section 7.
#[derive(Debug, Error)]
pub enum AmifuseError {
    #[error("image unreadable or malformed: {0}")]
    ImageError(String),

    #[error("handler binary malformed: {0}")]
    HandlerLoadError(String),

    #[error("handler failed to boot: {0}")]
    HandlerBootFailed(String),

    #[error("packet timed out after {cycles} cycles")]
    PacketTimeout { cycles: u64 },

    #[error("handler returned AmigaDOS error {0}")]
    PacketError(u32),

    #[error("emulator trapped an illegal memory access at {addr:#010x}")]
    BusError { addr: u32 },

    #[error("packet reply with no matching outstanding request")]
    ProtocolViolation,

    #[error("argument error: {0}")]
    ArgumentError(String),

    #[error("FUSE mount failed: {0}")]
    MountFailed(String),
}

impl AmifuseError {
    /// Process exit code per spec section 6.
    pub fn exit_code(&self) -> i32 {
        match self {
            AmifuseError::ArgumentError(_) => 1,
            AmifuseError::HandlerLoadError(_) | AmifuseError::HandlerBootFailed(_) => 2,
            AmifuseError::MountFailed(_) => 3,
            AmifuseError::ImageError(_) => 4,
            _ => 1,
        }
    }
}

/// AmigaDOS error codes this bridge actually produces or consumes.
/// Names follow the AmigaDOS spec, not the source's numbering scheme.
pub mod amigados {
    pub const ERROR_DIR_NOT_FOUND: u32 = 204;
    pub const ERROR_OBJECT_NOT_FOUND: u32 = 205;
    pub const ERROR_OBJECT_IN_USE: u32 = 202;
    pub const ERROR_OBJECT_WRONG_TYPE: u32 = 212;
    pub const ERROR_NO_MORE_ENTRIES: u32 = 232;
    pub const ERROR_NO_DISK: u32 = 216;
    pub const ERROR_ACTION_NOT_KNOWN: u32 = 223;
    pub const ERROR_DELETE_PROTECTED: u32 = 222;
    pub const ERROR_WRITE_PROTECTED: u32 = 224;
}

/// Maps a nonzero AmigaDOS result code to a POSIX errno, per spec section 7.
///
/// `None` means the code is not really an error for the caller (end of
/// directory iteration): the cache layer is expected to intercept
/// `ERROR_NO_MORE_ENTRIES` before this function ever sees it, but it is
/// handled here too so the mapping is total.
pub fn errno_for_packet_error(code: u32, expect_dir: Option<bool>) -> Option<libc::c_int> {
    use amigados::*;
    match code {
        ERROR_NO_MORE_ENTRIES => None,
        ERROR_DIR_NOT_FOUND | ERROR_OBJECT_NOT_FOUND => Some(libc::ENOENT),
        ERROR_OBJECT_IN_USE => Some(libc::EBUSY),
        ERROR_OBJECT_WRONG_TYPE => match expect_dir {
            Some(true) => Some(libc::ENOTDIR),
            Some(false) => Some(libc::EISDIR),
            None => Some(libc::EIO),
        },
        ERROR_WRITE_PROTECTED | ERROR_DELETE_PROTECTED => Some(libc::EROFS),
        ERROR_NO_DISK => Some(libc::EIO),
        _ => Some(libc::EIO),
    }
}
