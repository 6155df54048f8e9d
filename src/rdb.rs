//! Rigid Disk Block parsing (spec section 6, "On-disk format").
//!
//! Reads just enough of the RDB chain to answer the questions C3/C4 need:
//! true block size, the filesystem `DosType`, and the environment vector
//! consumed by the handler's `ACTION_STARTUP` packet. Multi-partition disks
//! are out of scope (spec section 1 non-goals): only the first `PART`
//! block is consulted.

use std::fs::File;
use std::os::unix::fs::FileExt;

/// Fields pulled out of the first `PartitionBlock`'s environment vector.
#[derive(Debug, Clone)]
pub struct RigidDiskBlock {
    pub block_size: u32,
    pub dos_type: [u8; 4],
    pub low_cyl: u32,
    pub high_cyl: u32,
    pub surfaces: u32,
    pub block_per_track: u32,
    /// Raw environment vector longs (`DE_TABLESIZE` onward), passed through
    /// verbatim to the startup packet per spec section 4.4.
    pub environment: Vec<u32>,
}

const RDSK_SIGNATURE: &[u8; 4] = b"RDSK";
const PART_SIGNATURE: &[u8; 4] = b"PART";

/// `rdb_PartitionList` value meaning "no partitions chained" (`-1`).
const RDB_BLOCK_EMPTY: u32 = 0xffff_ffff;

fn be_u32(buf: &[u8], off: usize) -> Option<u32> {
    buf.get(off..off + 4).map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

/// The fields of the root `"RDSK"` block needed to locate the partition
/// chain: `rdb_BlockBytes` (the unit `rdb_PartitionList` counts in) and the
/// block number of the first `PartitionBlock`.
#[derive(Debug, Clone, Copy)]
pub struct RdbHeader {
    pub block_bytes: u32,
    pub partition_list_block: u32,
}

impl RdbHeader {
    /// Parses block 0 of the image. Returns `None` if the `"RDSK"`
    /// signature is absent (spec section 4.3: "auto-detects from the
    /// image's RDB signature ... If absent, the user-supplied override
    /// wins; otherwise 512").
    pub fn parse(block0: &[u8]) -> Option<Self> {
        if block0.len() < 4 || &block0[0..4] != RDSK_SIGNATURE {
            return None;
        }
        // rdb_BlockBytes at longword offset 16, rdb_PartitionList (block
        // number of the first PartitionBlock, in rdb_BlockBytes units) at
        // longword offset 28.
        let block_bytes = be_u32(block0, 16).unwrap_or(512).max(128);
        let partition_list_block = be_u32(block0, 28).unwrap_or(RDB_BLOCK_EMPTY);
        Some(RdbHeader { block_bytes, partition_list_block })
    }
}

impl RigidDiskBlock {
    /// Follows `header.partition_list_block` out to its actual block in
    /// `file` and parses it as a `PartitionBlock`. Unlike the root RDB
    /// block, `PartitionBlock`s live at whatever block number
    /// `rdb_PartitionList` names — never embedded in block 0 itself — so
    /// this issues a second positional read rather than searching the
    /// buffer already in hand.
    pub fn read_first_partition(file: &File, header: &RdbHeader) -> Option<Self> {
        if header.partition_list_block == RDB_BLOCK_EMPTY {
            return None;
        }
        let offset = header.partition_list_block as u64 * header.block_bytes as u64;
        let mut buf = vec![0u8; header.block_bytes as usize];
        file.read_exact_at(&mut buf, offset).ok()?;
        let part = Self::parse_partition_block(&buf)?;
        Some(RigidDiskBlock {
            block_size: header.block_bytes,
            ..part
        })
    }

    /// Parses a `PartitionBlock` (`"PART"`) starting at `buf[0..]`.
    /// `de_TableSize..de_NumBuffers` of the environment vector begin at
    /// longword offset 32 within the block (`pb_Environment`).
    pub fn parse_partition_block(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 || &buf[0..4] != PART_SIGNATURE {
            return None;
        }
        let env_base = 32 * 4;
        let mut env = Vec::new();
        let mut i = 0;
        while env_base + i * 4 + 4 <= buf.len() && i < 20 {
            env.push(be_u32(buf, env_base + i * 4)?);
            i += 1;
        }
        // DE_ table conventionally: [0]=TableSize [1]=SizeBlock [2]=SecOrg
        // [3]=Surfaces [4]=SectorsPerBlock [5]=BlocksPerTrack [6]=Reserved
        // [7]=PreAlloc [8]=Interleave [9]=LowCyl [10]=HighCyl ... [16]=DosType
        let surfaces = env.get(3).copied().unwrap_or(0);
        let block_per_track = env.get(5).copied().unwrap_or(0);
        let low_cyl = env.get(9).copied().unwrap_or(0);
        let high_cyl = env.get(10).copied().unwrap_or(0);
        let dos_type_word = env.get(16).copied().unwrap_or(0x444f5300);
        let dos_type = dos_type_word.to_be_bytes();
        let size_block_longs = env.get(1).copied().unwrap_or(128);
        Some(RigidDiskBlock {
            block_size: size_block_longs * 4,
            dos_type,
            low_cyl,
            high_cyl,
            surfaces,
            block_per_track,
            environment: env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Builds a temp image with an `RDSK` root block at block 0 and its
    /// `PartitionBlock` at the block `rdb_PartitionList` actually names
    /// (block 1 here), matching real RDB layout rather than embedding the
    /// partition block inside block 0.
    fn synthetic_rdb_image() -> tempfile::NamedTempFile {
        let block_bytes = 512u32;
        let mut block0 = vec![0u8; block_bytes as usize];
        block0[0..4].copy_from_slice(RDSK_SIGNATURE);
        block0[16..20].copy_from_slice(&block_bytes.to_be_bytes()); // rdb_BlockBytes
        block0[28..32].copy_from_slice(&1u32.to_be_bytes()); // rdb_PartitionList -> block 1

        let mut part = vec![0u8; block_bytes as usize];
        part[0..4].copy_from_slice(PART_SIGNATURE);
        let env_base = 32 * 4;
        let mut env = [0u32; 17];
        env[0] = 16; // table size
        env[1] = 128; // size block longs -> 512 bytes
        env[3] = 2; // surfaces
        env[5] = 11; // blocks per track
        env[9] = 0; // low cyl
        env[10] = 1599; // high cyl
        env[16] = u32::from_be_bytes(*b"PFS\x03");
        for (i, v) in env.iter().enumerate() {
            part[env_base + i * 4..env_base + i * 4 + 4].copy_from_slice(&v.to_be_bytes());
        }

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&block0).unwrap();
        tmp.write_all(&part).unwrap();
        tmp
    }

    #[test]
    fn follows_partition_list_to_its_own_block() {
        let tmp = synthetic_rdb_image();
        let block0 = std::fs::read(tmp.path()).unwrap()[..512].to_vec();
        let header = RdbHeader::parse(&block0).unwrap();
        assert_eq!(header.partition_list_block, 1);

        let file = std::fs::File::open(tmp.path()).unwrap();
        let rdb = RigidDiskBlock::read_first_partition(&file, &header).unwrap();
        assert_eq!(rdb.block_size, 512);
        assert_eq!(&rdb.dos_type, b"PFS\x03");
        assert_eq!(rdb.high_cyl, 1599);
    }

    #[test]
    fn absent_signature_returns_none() {
        let block0 = vec![0u8; 512];
        assert!(RdbHeader::parse(&block0).is_none());
    }

    #[test]
    fn empty_partition_list_returns_none() {
        let mut block0 = vec![0u8; 512];
        block0[0..4].copy_from_slice(RDSK_SIGNATURE);
        block0[16..20].copy_from_slice(&512u32.to_be_bytes());
        block0[28..32].copy_from_slice(&RDB_BLOCK_EMPTY.to_be_bytes());
        let header = RdbHeader::parse(&block0).unwrap();

        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = std::fs::File::open(tmp.path()).unwrap();
        assert!(RigidDiskBlock::read_first_partition(&file, &header).is_none());
    }
}
