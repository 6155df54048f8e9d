//! FUSE Adapter (spec component C7): translates `fuser::Filesystem`
//! callbacks into [`crate::cache::Cache`] calls.
//!
//! `fuser` addresses files by inode number, but the cache is path-keyed (it
//! mirrors how AmigaDOS locks actually work), so this module's own job is
//! the inode/path table: `lookup` is where new inodes are minted, every
//! other callback just resolves its `ino` back to a path first.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen,
    ReplyStatfs, Request,
};
use libc::{EIO, ENOENT, ENOSYS, EROFS};

use crate::cache::{Cache, Kind};
use crate::error::{errno_for_packet_error, AmifuseError};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Seconds between the UNIX epoch (1970-01-01) and the AmigaDOS epoch
/// (1978-01-01): 2922 days, including the 1972 and 1976 leap days.
const AMIGA_EPOCH_OFFSET_SECS: u64 = 2922 * 86_400;

fn amiga_time_to_system_time(days: u32, minute: u32, tick: u32) -> SystemTime {
    let secs = AMIGA_EPOCH_OFFSET_SECS + days as u64 * 86_400 + minute as u64 * 60 + tick as u64 / 50;
    UNIX_EPOCH + Duration::from_secs(secs)
}

bitflags::bitflags! {
    /// Amiga protection bits: `R`/`W`/`E`/`D` occupy the low four bits, but
    /// they are *inverted* on disk (bit set means the permission is
    /// absent) per the AmigaDOS convention; spec section 4.7 already gives
    /// the clear-bit meaning directly, so that inversion is applied once,
    /// in `mode_for`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const DELETE = 1 << 0;
        const EXECUTE = 1 << 1;
        const WRITE = 1 << 2;
        const READ = 1 << 3;
    }
}

fn mode_for(kind: Kind, protection: u32) -> u16 {
    if kind == Kind::Dir {
        return 0o555;
    }
    let bits = Protection::from_bits_truncate(protection);
    let readable = !bits.contains(Protection::READ);
    let executable = !bits.contains(Protection::EXECUTE);
    let mut mode = 0o444;
    if !readable {
        mode = 0;
    }
    if executable {
        mode |= 0o111;
    }
    mode
}

struct Inodes {
    path_by_ino: HashMap<u64, String>,
    ino_by_path: HashMap<String, u64>,
    next_ino: AtomicU64,
}

impl Inodes {
    fn new() -> Self {
        let mut path_by_ino = HashMap::new();
        let mut ino_by_path = HashMap::new();
        path_by_ino.insert(ROOT_INO, String::new());
        ino_by_path.insert(String::new(), ROOT_INO);
        Inodes {
            path_by_ino,
            ino_by_path,
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.path_by_ino.get(&ino).cloned()
    }

    fn ino_for(&mut self, path: &str) -> u64 {
        let key = path.to_lowercase();
        if let Some(ino) = self.ino_by_path.get(&key) {
            return *ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        self.ino_by_path.insert(key, ino);
        self.path_by_ino.insert(ino, path.to_string());
        ino
    }
}

pub struct FuseAdapter {
    cache: Cache,
    inodes: Mutex<Inodes>,
}

impl FuseAdapter {
    pub fn new(cache: Cache) -> Self {
        FuseAdapter {
            cache,
            inodes: Mutex::new(Inodes::new()),
        }
    }

    fn attr_for(&self, ino: u64, entry: &crate::cache::Entry) -> FileAttr {
        let kind = if entry.kind == Kind::Dir { FileType::Directory } else { FileType::RegularFile };
        let mtime = amiga_time_to_system_time(entry.days, entry.minute, entry.tick);
        let block_size = self.cache.bridge().block_size() as u64;
        FileAttr {
            ino,
            size: entry.size,
            blocks: (entry.size + block_size.max(1) - 1) / block_size.max(1),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: mode_for(entry.kind, entry.protection),
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: block_size.max(1) as u32,
            flags: 0,
        }
    }

    fn errno_for(&self, err: &AmifuseError, expect_dir: Option<bool>) -> i32 {
        match err {
            AmifuseError::PacketError(code) => errno_for_packet_error(*code, expect_dir).unwrap_or(0),
            AmifuseError::PacketTimeout { .. } => EIO,
            AmifuseError::BusError { .. } => EIO,
            _ => EIO,
        }
    }
}

impl Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.lock().unwrap().path_for(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let child_path = if parent_path.is_empty() { name.to_string() } else { format!("{parent_path}/{name}") };

        match self.cache.stat(&child_path) {
            Ok(entry) => {
                let ino = self.inodes.lock().unwrap().ino_for(&child_path);
                reply.entry(&TTL, &self.attr_for(ino, &entry), 0);
            }
            Err(err) => reply.error(self.errno_for(&err, None)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.lock().unwrap().path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.cache.stat(&path) {
            Ok(entry) => reply.attr(&TTL, &self.attr_for(ino, &entry)),
            Err(err) => reply.error(self.errno_for(&err, None)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.lock().unwrap().path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.cache.open(&path) {
            Ok(token) => reply.opened(token, 0),
            Err(err) => reply.error(self.errno_for(&err, Some(false))),
        }
    }

    fn read(&mut self, _req: &Request, _ino: u64, fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        if offset < 0 {
            reply.error(EIO);
            return;
        }
        match self.cache.read(fh, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(self.errno_for(&err, Some(false))),
        }
    }

    fn release(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        match self.cache.release(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(self.errno_for(&err, None)),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.inodes.lock().unwrap().path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        let children = match self.cache.readdir(&path) {
            Ok(c) => c,
            Err(err) => {
                reply.error(self.errno_for(&err, Some(true)));
                return;
            }
        };

        let mut entries = vec![(ino, FileType::Directory, ".".to_string()), (ino, FileType::Directory, "..".to_string())];
        for child in &children {
            let child_path = if path.is_empty() { child.name.clone() } else { format!("{path}/{}", child.name) };
            let child_ino = self.inodes.lock().unwrap().ino_for(&child_path);
            let kind = if child.kind == Kind::Dir { FileType::Directory } else { FileType::RegularFile };
            entries.push((child_ino, kind, child.name.clone()));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let geometry = self.cache.bridge().geometry();
        // Spec section 4.7: free/available blocks are always reported as
        // zero, since this is a read-only mount of a fixed-size image.
        reply.statfs(geometry.total_blocks, 0, 0, 0, 0, geometry.block_size, 107, geometry.block_size);
    }

    fn destroy(&mut self) {
        self.cache.flush_all();
        let _ = self.cache.bridge().free_lock(self.cache.root_lock());
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // Read-only mount: attribute changes are reported back unchanged
        // rather than rejected outright, matching common read-only FUSE
        // mounts that tolerate `touch`/`chmod` no-ops from shells.
        let Some(path) = self.inodes.lock().unwrap().path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.cache.stat(&path) {
            Ok(entry) => reply.attr(&TTL, &self.attr_for(ino, &entry)),
            Err(err) => reply.error(self.errno_for(&err, None)),
        }
    }

    fn write(&mut self, _req: &Request, _ino: u64, _fh: u64, _offset: i64, _data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: fuser::ReplyWrite) {
        reply.error(EROFS);
    }

    fn mkdir(&mut self, _req: &Request, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        reply.error(EROFS);
    }

    fn unlink(&mut self, _req: &Request, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(EROFS);
    }

    fn rmdir(&mut self, _req: &Request, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(EROFS);
    }

    fn rename(&mut self, _req: &Request, _parent: u64, _name: &OsStr, _newparent: u64, _newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
        reply.error(EROFS);
    }

    fn create(&mut self, _req: &Request, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, _flags: i32, reply: fuser::ReplyCreate) {
        reply.error(ENOSYS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_for_directory_is_0555() {
        assert_eq!(mode_for(Kind::Dir, 0), 0o555);
    }

    #[test]
    fn mode_for_readable_file_is_0444() {
        assert_eq!(mode_for(Kind::File, 0), 0o444);
    }

    #[test]
    fn read_protection_bit_masks_out_read_access() {
        assert_eq!(mode_for(Kind::File, Protection::READ.bits()), 0);
    }

    #[test]
    fn execute_protection_bit_adds_exec_mode() {
        assert_eq!(mode_for(Kind::File, Protection::EXECUTE.bits()), 0o555);
    }

    #[test]
    fn amiga_epoch_matches_known_offset() {
        let t = amiga_time_to_system_time(0, 0, 0);
        assert_eq!(t.duration_since(UNIX_EPOCH).unwrap().as_secs(), AMIGA_EPOCH_OFFSET_SECS);
    }
}
