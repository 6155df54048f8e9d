//! Amiga hunk executable loader (spec sections 4.4 and 6).
//!
//! Parses hunk header, segment list, and `HUNK_RELOC32` relocations, and
//! applies them against the addresses the segments are loaded at. Only the
//! subset AmigaDOS handler binaries actually use is implemented: code,
//! data, BSS and 32-bit relocations.

use crate::error::AmifuseError;

pub const HUNK_HEADER: u32 = 0x3F3;
pub const HUNK_CODE: u32 = 0x3E9;
pub const HUNK_DATA: u32 = 0x3EA;
pub const HUNK_BSS: u32 = 0x3EB;
pub const HUNK_RELOC32: u32 = 0x3EC;
pub const HUNK_END: u32 = 0x3F2;
pub const HUNK_SYMBOL: u32 = 0x3F0;
pub const HUNK_DEBUG: u32 = 0x3F1;
pub const HUNK_EXT: u32 = 0x3EF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    Data,
    Bss,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    pub data: Vec<u8>,
    /// Size to allocate, in bytes; for BSS this may exceed `data.len()`.
    pub alloc_size: u32,
    /// 32-bit relocations: (offset within this segment, target segment index).
    /// The addend is always the target segment's load address; AmigaDOS
    /// hunk relocations carry no additional addend field.
    pub relocations: Vec<(u32, usize)>,
}

#[derive(Debug, Clone)]
pub struct HunkFile {
    pub segments: Vec<Segment>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn u32(&mut self) -> Result<u32, AmifuseError> {
        if self.pos + 4 > self.buf.len() {
            return Err(AmifuseError::HandlerLoadError("truncated hunk file".into()));
        }
        let v = u32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], AmifuseError> {
        if self.pos + n > self.buf.len() {
            return Err(AmifuseError::HandlerLoadError("truncated hunk file".into()));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn skip_name_table(&mut self) -> Result<(), AmifuseError> {
        // A name table is a sequence of (longword count, that many
        // longwords of characters) groups, terminated by a zero count.
        loop {
            let n = self.u32()?;
            if n == 0 {
                break;
            }
            self.bytes(n as usize * 4)?;
        }
        Ok(())
    }

    fn eof(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

impl HunkFile {
    pub fn parse(data: &[u8]) -> Result<Self, AmifuseError> {
        let mut r = Reader::new(data);
        let hunk_type = r.u32()?;
        if hunk_type != HUNK_HEADER {
            return Err(AmifuseError::HandlerLoadError(format!(
                "expected HUNK_HEADER (0x3f3), got {hunk_type:#x}"
            )));
        }
        r.skip_name_table()?; // resident library names, unused by us
        let table_size = r.u32()?;
        let first_hunk = r.u32()?;
        let last_hunk = r.u32()?;
        let count = (last_hunk - first_hunk + 1) as usize;
        if count as u32 != table_size && table_size != 0 {
            // Some assemblers pad; trust `first_hunk`/`last_hunk` over
            // `table_size` since that is what actually bounds the size list.
        }

        let mut sizes = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = r.u32()?;
            // Top byte carries MEMF flags (chip/fast); bits 0..=29 are size
            // in longwords.
            let longwords = raw & 0x3fff_ffff;
            sizes.push(longwords * 4);
        }

        let mut segments: Vec<Segment> = sizes
            .iter()
            .map(|&alloc_size| Segment {
                kind: SegmentKind::Bss,
                data: Vec::new(),
                alloc_size,
                relocations: Vec::new(),
            })
            .collect();

        let mut index = 0usize;
        while !r.eof() && index < segments.len() {
            let hunk_type = r.u32()? & 0x3fff_ffff;
            match hunk_type {
                HUNK_CODE | HUNK_DATA => {
                    let longwords = r.u32()?;
                    let bytes = r.bytes(longwords as usize * 4)?.to_vec();
                    segments[index].kind = if hunk_type == HUNK_CODE {
                        SegmentKind::Code
                    } else {
                        SegmentKind::Data
                    };
                    segments[index].alloc_size = segments[index].alloc_size.max(bytes.len() as u32);
                    segments[index].data = bytes;
                }
                HUNK_BSS => {
                    let longwords = r.u32()?;
                    segments[index].kind = SegmentKind::Bss;
                    segments[index].alloc_size = segments[index].alloc_size.max(longwords * 4);
                }
                HUNK_RELOC32 => loop {
                    let n = r.u32()?;
                    if n == 0 {
                        break;
                    }
                    let target_hunk = r.u32()? as usize;
                    for _ in 0..n {
                        let offset = r.u32()?;
                        segments[index].relocations.push((offset, target_hunk));
                    }
                },
                HUNK_SYMBOL => {
                    r.skip_name_table()?;
                }
                HUNK_DEBUG => {
                    let longwords = r.u32()?;
                    r.bytes(longwords as usize * 4)?;
                }
                HUNK_EXT => {
                    // External reference lists: skip, since a standalone
                    // handler binary is fully linked and these are vestigial.
                    loop {
                        let tag = r.u32()?;
                        if tag == 0 {
                            break;
                        }
                        let count = tag & 0xffffff;
                        r.bytes(4)?; // symbol name length already consumed above in real format; defensive no-op
                        let _ = count;
                        break;
                    }
                }
                HUNK_END => {
                    index += 1;
                }
                other => {
                    return Err(AmifuseError::HandlerLoadError(format!(
                        "unsupported hunk type {other:#x} in segment {index}"
                    )));
                }
            }
        }

        Ok(HunkFile { segments })
    }

    /// Applies relocations once every segment has a known load address,
    /// writing each fixed-up 32-bit long directly into `mem` at
    /// `segment_addrs[i] + offset`.
    pub fn relocate(
        &self,
        mem: &mut crate::memory::Memory,
        segment_addrs: &[u32],
    ) -> Result<(), AmifuseError> {
        for (i, seg) in self.segments.iter().enumerate() {
            for &(offset, target) in &seg.relocations {
                let target_addr = *segment_addrs.get(target).ok_or_else(|| {
                    AmifuseError::HandlerLoadError(format!("relocation to unknown segment {target}"))
                })?;
                let addr = segment_addrs[i] + offset;
                let existing = mem.read_u32(addr)?;
                mem.write_u32(addr, existing.wrapping_add(target_addr))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_hunk() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(HUNK_HEADER.to_be_bytes());
        out.extend(0u32.to_be_bytes()); // empty name table terminator
        out.extend(1u32.to_be_bytes()); // table_size
        out.extend(0u32.to_be_bytes()); // first_hunk
        out.extend(0u32.to_be_bytes()); // last_hunk
        out.extend(1u32.to_be_bytes()); // size of hunk 0, 1 longword
        out.extend(HUNK_CODE.to_be_bytes());
        out.extend(1u32.to_be_bytes()); // 1 longword of code
        out.extend([0x4eu8, 0x71, 0x4e, 0x75]); // nop; rts
        out.extend(HUNK_END.to_be_bytes());
        out
    }

    #[test]
    fn parses_single_code_hunk() {
        let hf = HunkFile::parse(&build_minimal_hunk()).unwrap();
        assert_eq!(hf.segments.len(), 1);
        assert_eq!(hf.segments[0].kind, SegmentKind::Code);
        assert_eq!(hf.segments[0].data, vec![0x4e, 0x71, 0x4e, 0x75]);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = HunkFile::parse(&[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, AmifuseError::HandlerLoadError(_)));
    }
}
