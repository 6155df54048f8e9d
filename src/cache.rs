//! Lock/Inode Cache (spec component C6).
//!
//! Maps host paths to AmigaDOS locks and caches directory listings and file
//! headers, to keep the dominant cost — packet round-trips — off the hot
//! path for repeated `stat`/`readdir` calls a FUSE mount sees constantly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::bridge::{Bridge, SeekMode};
use crate::dospacket::FileInfo;
use crate::error::AmifuseError;

/// Names answered with `ENOENT` before any packet round-trip, per spec
/// section 4.6 — load-shedding for host indexing daemons that otherwise
/// hammer every mount with the same handful of lookups.
const REJECTED_NAMES: &[&str] = &[
    ".DS_Store",
    ".Spotlight-V100",
    ".Trashes",
    ".fseventsd",
    ".hidden",
    ".metadata_never_index",
];

fn is_rejected(name: &str) -> bool {
    name.starts_with("._") || REJECTED_NAMES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Dir,
    File,
}

#[derive(Debug, Clone)]
pub struct Child {
    pub name: String,
    pub kind: Kind,
    pub size: u64,
    pub protection: u32,
    pub days: u32,
    pub minute: u32,
    pub tick: u32,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct Entry {
    /// Case-preserving Amiga path, relative to the volume root, empty for it.
    pub path: String,
    pub kind: Kind,
    pub size: u64,
    pub protection: u32,
    pub days: u32,
    pub minute: u32,
    pub tick: u32,
    pub comment: String,
    pub children: Option<Vec<Child>>,
    pub lock: Option<u32>,
    pub generation: u64,
}

impl Entry {
    fn from_file_info(path: String, info: FileInfo) -> Self {
        Entry {
            path,
            kind: if info.is_dir { Kind::Dir } else { Kind::File },
            size: info.size,
            protection: info.protection,
            days: info.days,
            minute: info.minute,
            tick: info.tick,
            comment: info.comment,
            children: None,
            lock: None,
            generation: 0,
        }
    }
}

struct OpenHandle {
    fh: u32,
    path: String,
    position: u64,
}

const HANDLE_LRU_CAPACITY: usize = 8;

pub struct Cache {
    bridge: Bridge,
    root_lock: u32,
    entries: Mutex<HashMap<String, Entry>>,
    handles: Mutex<HashMap<u64, OpenHandle>>,
    next_token: AtomicU64,
    lru_order: Mutex<Vec<u64>>,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..i].to_string(),
        None => String::new(),
    }
}

impl Cache {
    pub fn new(bridge: Bridge, root_lock: u32) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            String::new(),
            Entry {
                path: String::new(),
                kind: Kind::Dir,
                size: 0,
                protection: 0,
                days: 0,
                minute: 0,
                tick: 0,
                comment: String::new(),
                children: None,
                lock: Some(root_lock),
                generation: 0,
            },
        );
        Cache {
            bridge,
            root_lock,
            entries: Mutex::new(entries),
            handles: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            lru_order: Mutex::new(Vec::new()),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// `stat(path)`: cache hit returns immediately; a miss costs one
    /// `LOCATE_OBJECT` + `EXAMINE_OBJECT` round-trip.
    pub fn stat(&self, path: &str) -> Result<Entry, AmifuseError> {
        let rel = normalize(path);
        if rel.is_empty() {
            return Ok(self.entries.lock().unwrap().get("").unwrap().clone());
        }
        if is_rejected(basename(&rel)) {
            return Err(AmifuseError::PacketError(crate::error::amigados::ERROR_OBJECT_NOT_FOUND));
        }

        let key = rel.to_lowercase();
        if let Some(hit) = self.entries.lock().unwrap().get(&key) {
            log::trace!("cache hit: stat {rel}");
            return Ok(hit.clone());
        }
        log::debug!("cache miss: stat {rel}");

        let lock = self.bridge.locate_object(self.root_lock, &rel)?;
        let (fib_addr, info) = match self.bridge.examine_object(lock) {
            Ok(v) => v,
            Err(e) => {
                let _ = self.bridge.free_lock(lock);
                return Err(e);
            }
        };
        self.bridge.free_fib(fib_addr);

        let mut entry = Entry::from_file_info(rel.clone(), info);

        // Spec section 4.6's speculation heuristic: a directory whose
        // parent's listing is still incomplete is likely about to be
        // descended into (e.g. a recursive walk), so its lock is worth
        // holding rather than immediately released.
        let hold = entry.kind == Kind::Dir && {
            let parent_key = dirname(&rel).to_lowercase();
            self.entries
                .lock()
                .unwrap()
                .get(&parent_key)
                .map(|p| p.children.is_none())
                .unwrap_or(true)
        };
        if hold {
            entry.lock = Some(lock);
        } else {
            self.bridge.free_lock(lock)?;
        }

        self.entries.lock().unwrap().insert(key, entry.clone());
        Ok(entry)
    }

    /// `readdir(path)`: `LOCATE_OBJECT` + `EXAMINE_OBJECT` + repeated
    /// `EXAMINE_NEXT` until `ERROR_NO_MORE_ENTRIES`. Marks the directory
    /// entry's completeness flag and inserts every child into the cache.
    pub fn readdir(&self, path: &str) -> Result<Vec<Child>, AmifuseError> {
        let rel = normalize(path);
        let key = rel.to_lowercase();

        if let Some(entry) = self.entries.lock().unwrap().get(&key) {
            if let Some(children) = &entry.children {
                log::trace!("cache hit: readdir {rel}");
                return Ok(children.clone());
            }
        }
        log::debug!("cache miss: readdir {rel}");

        let held_lock = self.entries.lock().unwrap().get(&key).and_then(|e| e.lock);
        let lock = match held_lock {
            Some(l) => l,
            None => self.bridge.locate_object(self.root_lock, &rel)?,
        };

        let (fib_addr, _self_info) = self.bridge.examine_object(lock)?;
        let mut children = Vec::new();
        loop {
            match self.bridge.examine_next(lock, fib_addr) {
                Ok(Some(info)) => {
                    let child_path = if rel.is_empty() {
                        info.name.clone()
                    } else {
                        format!("{rel}/{}", info.name)
                    };
                    let child = Child {
                        name: info.name.clone(),
                        kind: if info.is_dir { Kind::Dir } else { Kind::File },
                        size: info.size,
                        protection: info.protection,
                        days: info.days,
                        minute: info.minute,
                        tick: info.tick,
                        comment: info.comment.clone(),
                    };
                    let mut entries = self.entries.lock().unwrap();
                    let gen = entries.get(&child_path.to_lowercase()).map(|e| e.generation + 1).unwrap_or(0);
                    entries.insert(
                        child_path.to_lowercase(),
                        Entry {
                            generation: gen,
                            ..Entry::from_file_info(child_path.clone(), info)
                        },
                    );
                    children.push(child);
                }
                Ok(None) => break,
                Err(e) => {
                    self.bridge.free_fib(fib_addr);
                    self.bridge.free_lock(lock)?;
                    return Err(e);
                }
            }
        }
        self.bridge.free_fib(fib_addr);
        self.bridge.free_lock(lock)?;

        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key).or_insert_with(|| Entry::from_file_info(rel.clone(), FileInfo {
            name: basename(&rel).to_string(),
            is_dir: true,
            size: 0,
            protection: 0,
            days: 0,
            minute: 0,
            tick: 0,
            comment: String::new(),
        }));
        entry.children = Some(children.clone());
        entry.lock = None;
        entry.generation += 1;

        Ok(children)
    }

    /// `open(path)`: issues `FINDINPUT` and returns an opaque handle token.
    /// Evicts the least-recently-used handle first if the LRU of at most
    /// [`HANDLE_LRU_CAPACITY`] open handles is already full.
    pub fn open(&self, path: &str) -> Result<u64, AmifuseError> {
        let rel = normalize(path);
        if is_rejected(basename(&rel)) {
            return Err(AmifuseError::PacketError(crate::error::amigados::ERROR_OBJECT_NOT_FOUND));
        }
        let fh = self.bridge.find_input(self.root_lock, &rel)?;

        self.evict_if_full()?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        log::debug!("cache open: path={rel} handle={token}");
        self.handles.lock().unwrap().insert(token, OpenHandle { fh, path: rel, position: 0 });
        self.lru_order.lock().unwrap().push(token);
        Ok(token)
    }

    fn evict_if_full(&self) -> Result<(), AmifuseError> {
        let to_evict = {
            let mut order = self.lru_order.lock().unwrap();
            if order.len() < HANDLE_LRU_CAPACITY {
                None
            } else {
                Some(order.remove(0))
            }
        };
        if let Some(token) = to_evict {
            log::trace!("cache evict: handle {token} (LRU capacity reached)");
            if let Some(handle) = self.handles.lock().unwrap().remove(&token) {
                self.bridge.end(handle.fh)?;
            }
        }
        Ok(())
    }

    /// `read(handle, off, len)`: sequential reads per handle are the fast
    /// path; a non-matching offset issues `ACTION_SEEK` (spec section 4.13)
    /// before the `READ`. If the handler answers `ERROR_ACTION_NOT_KNOWN`,
    /// falls back to reopening the file from zero and discarding up to the
    /// requested offset, per SPEC_FULL.md section 4.13's resolution of the
    /// open question.
    pub fn read(&self, token: u64, offset: u64, length: u32) -> Result<Vec<u8>, AmifuseError> {
        let fh = {
            let mut handles = self.handles.lock().unwrap();
            let handle = handles.get_mut(&token).ok_or(AmifuseError::ProtocolViolation)?;
            if handle.position != offset {
                log::trace!("cache decision: seek handle={token} from={} to={offset}", handle.position);
                match self.bridge.seek(handle.fh, offset as i64, SeekMode::Beginning) {
                    Ok(_) => handle.position = offset,
                    Err(AmifuseError::PacketError(crate::error::amigados::ERROR_ACTION_NOT_KNOWN)) => {
                        log::debug!("cache decision: handle={token} has no ACTION_SEEK, reopen+discard to {offset}");
                        self.reopen_and_discard(handle, offset)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            handle.fh
        };

        let data = self.bridge.read(fh, length)?;

        let mut handles = self.handles.lock().unwrap();
        if let Some(handle) = handles.get_mut(&token) {
            handle.position += data.len() as u64;
        }
        Ok(data)
    }

    /// Reopens `handle`'s file via a fresh `FINDINPUT` and reads forward
    /// from zero, discarding each chunk, until `handle.position` reaches
    /// `offset` or the handler reports end of file. Used when the handler
    /// has no `ACTION_SEEK` support, linearizing random reads the way
    /// spec.md section 9's open question anticipated.
    fn reopen_and_discard(&self, handle: &mut OpenHandle, offset: u64) -> Result<(), AmifuseError> {
        const DISCARD_CHUNK: u32 = 64 * 1024;
        let new_fh = self.bridge.find_input(self.root_lock, &handle.path)?;
        let _ = self.bridge.end(handle.fh);
        handle.fh = new_fh;
        handle.position = 0;
        while handle.position < offset {
            let want = (offset - handle.position).min(DISCARD_CHUNK as u64) as u32;
            let data = self.bridge.read(handle.fh, want)?;
            if data.is_empty() {
                break;
            }
            handle.position += data.len() as u64;
        }
        Ok(())
    }

    /// `release`: closes the handle via an `END` packet.
    pub fn release(&self, token: u64) -> Result<(), AmifuseError> {
        let handle = self.handles.lock().unwrap().remove(&token);
        self.lru_order.lock().unwrap().retain(|t| *t != token);
        if let Some(handle) = handle {
            self.bridge.end(handle.fh)?;
        }
        Ok(())
    }

    /// Flushes every still-open handle via `END`, used on unmount.
    pub fn flush_all(&self) {
        let tokens: Vec<u64> = self.handles.lock().unwrap().keys().copied().collect();
        for token in tokens {
            let _ = self.release(token);
        }
    }

    pub fn root_lock(&self) -> u32 {
        self.root_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_metadata_paths_without_round_trip() {
        assert!(is_rejected(".DS_Store"));
        assert!(is_rejected("._resource"));
        assert!(is_rejected(".Spotlight-V100"));
        assert!(!is_rejected("readme.txt"));
    }

    #[test]
    fn normalize_strips_leading_slash() {
        assert_eq!(normalize("/foo/bar"), "foo/bar");
        assert_eq!(normalize("/"), "");
    }

    #[test]
    fn dirname_and_basename_split_on_last_slash() {
        assert_eq!(dirname("foo/bar/baz"), "foo/bar");
        assert_eq!(basename("foo/bar/baz"), "baz");
        assert_eq!(dirname("baz"), "");
    }
}
