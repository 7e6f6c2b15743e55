//! Filesystem-sniffing collaborator.
//!
//! This system never interprets partition *contents* — it only needs a
//! type tag and a reported size for a byte span, the same narrow interface
//! `partitioner::mbr_verifier` uses to read an MBR without understanding
//! anything past the partition table.

use std::io::{Read, Seek, SeekFrom};

/// Coarse filesystem family tag, detected from a superblock/boot-sector
/// magic at a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsTypeTag {
    Ext4,
    Erofs,
    F2fs,
    SquashFs,
    FatOrMbr,
    Unknown,
}

/// Result of a single sniff: the detected family and, where the format
/// encodes one, the filesystem's reported size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffResult {
    pub tag: FsTypeTag,
    pub size_bytes: u64,
}

/// Given a stream and an absolute offset, identify the filesystem starting
/// there and report its size. Implementors must not read or interpret
/// anything beyond the superblock/boot-sector magics needed to decide.
pub trait FsSniffer {
    fn sniff(&self, stream: &mut (impl Read + Seek), offset: u64) -> std::io::Result<SniffResult>;
}

/// Default sniffer applying the magic/size rules from the external
/// interface spec, in priority order: SquashFS, EROFS, EXT2/3/4, F2FS,
/// then VFAT/MBR.
pub struct MagicSniffer;

impl FsSniffer for MagicSniffer {
    fn sniff(&self, stream: &mut (impl Read + Seek), offset: u64) -> std::io::Result<SniffResult> {
        // SquashFS superblock sits at offset 0 of the partition.
        let mut head = [0u8; 48];
        stream.seek(SeekFrom::Start(offset))?;
        let n = read_best_effort(stream, &mut head)?;
        if n >= 48 {
            let magic = u32::from_le_bytes(head[0..4].try_into().unwrap());
            if magic == 0x7371_7368 {
                let size = u64::from_le_bytes(head[40..48].try_into().unwrap());
                return Ok(SniffResult { tag: FsTypeTag::SquashFs, size_bytes: size });
            }
        }
        // F2FS magic is also at offset 0, but the block-count field needs a
        // larger read window (0x48). Re-read with enough bytes.
        let mut wide = vec![0u8; 0x4c];
        stream.seek(SeekFrom::Start(offset))?;
        let n = read_best_effort(stream, &mut wide)?;
        if n >= 4 && magic_le_u32(&wide, 0) == 0xF2F5_2010 && n >= 0x48 + 4 {
            let blocks = magic_le_u32(&wide, 0x48);
            return Ok(SniffResult {
                tag: FsTypeTag::F2fs,
                size_bytes: blocks as u64 * 4096,
            });
        }

        // EROFS and EXT2/3/4 superblocks live at a fixed 1024-byte offset
        // into the partition.
        let mut sb = vec![0u8; 1024 + 64];
        stream.seek(SeekFrom::Start(offset))?;
        let n = read_best_effort(stream, &mut sb)?;
        if n >= 1024 + 48 {
            let at = |i: usize| magic_le_u32(&sb, 1024 + i);
            if at(0) == 0xE0F5_E1E2 {
                let blocks = at(44);
                let log2_blksz = sb[1024 + 12];
                let shift = if log2_blksz == 0 { 12 } else { log2_blksz as u32 };
                return Ok(SniffResult {
                    tag: FsTypeTag::Erofs,
                    size_bytes: (blocks as u64) << shift,
                });
            }
            let magic16 = u16::from_le_bytes(sb[1024 + 0x38..1024 + 0x3a].try_into().unwrap());
            if magic16 == 0xEF53 {
                let blocks_count = at(4);
                let log_block_size = at(0x18);
                let block_size = 1024u64 << log_block_size;
                return Ok(SniffResult {
                    tag: FsTypeTag::Ext4,
                    size_bytes: blocks_count as u64 * block_size,
                });
            }
        }

        // VFAT/MBR signature at the tail of the first sector.
        let mut sector = [0u8; 512];
        stream.seek(SeekFrom::Start(offset))?;
        let n = read_best_effort(stream, &mut sector)?;
        if n >= 512 && sector[510] == 0x55 && sector[511] == 0xAA {
            return Ok(SniffResult {
                tag: FsTypeTag::FatOrMbr,
                size_bytes: 0,
            });
        }

        Ok(SniffResult {
            tag: FsTypeTag::Unknown,
            size_bytes: 0,
        })
    }
}

fn magic_le_u32(buf: &[u8], at: usize) -> u32 {
    if buf.len() < at + 4 {
        return 0;
    }
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn read_best_effort(stream: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
