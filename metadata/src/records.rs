//! Record layer: fixed-layout little-endian encode/decode for every wire
//! struct. Each type implements [`Record`], a capability trait rather than
//! a shared base class — "a record type provides `encode_into`,
//! `decode_from`, and has a fixed compile-time byte size."
//!
//! No record allocates on the heap beyond the owned `String`/`Vec<u8>`
//! fields callers asked for (decoded names, opaque byte spans); encoding
//! writes directly into a caller-supplied buffer.

use byteorder::{ByteOrder, LittleEndian};

use lp_core::error::{LpError, LpResult};

use crate::buffers::{ChecksumBuffer, NameBuffer, ReservedBuffer};
use crate::constants::*;

/// A record type with a fixed, compile-time-known wire size.
pub trait Record: Sized {
    /// Exact encoded size in bytes (no padding).
    const SIZE: usize;

    /// Encode into `buf`. Panics if `buf.len() != Self::SIZE`; callers are
    /// expected to size buffers from `Self::SIZE` directly.
    fn encode_into(&self, buf: &mut [u8]);

    /// Decode from `buf`. Fails with [`LpError::InvalidData`] if
    /// `buf.len() < Self::SIZE`.
    fn decode_from(buf: &[u8]) -> LpResult<Self>;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        self.encode_into(&mut buf);
        buf
    }
}

fn require_len(buf: &[u8], needed: usize, what: &'static str) -> LpResult<()> {
    if buf.len() < needed {
        return Err(LpError::InvalidData {
            offset: 0,
            reason: format!("{what}: need {needed} bytes, got {}", buf.len()),
        });
    }
    Ok(())
}

/// Geometry block (pre-padding). Magic=0x616c4467, fixed padded size 4096.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub magic: u32,
    pub struct_size: u32,
    pub checksum: ChecksumBuffer,
    pub metadata_max_size: u32,
    pub metadata_slot_count: u32,
    pub logical_block_size: u32,
}

impl Geometry {
    /// Byte range of the checksum field within the encoded struct.
    pub const CHECKSUM_RANGE: std::ops::Range<usize> = 8..40;

    pub fn new(metadata_max_size: u32, metadata_slot_count: u32) -> Self {
        Self {
            magic: LP_METADATA_GEOMETRY_MAGIC,
            struct_size: Self::SIZE as u32,
            checksum: ChecksumBuffer::zeroed(),
            metadata_max_size,
            metadata_slot_count,
            logical_block_size: 4096,
        }
    }
}

impl Record for Geometry {
    const SIZE: usize = 4 + 4 + LP_CHECKSUM_SIZE + 4 + 4 + 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.struct_size);
        buf[8..40].copy_from_slice(self.checksum.as_span());
        LittleEndian::write_u32(&mut buf[40..44], self.metadata_max_size);
        LittleEndian::write_u32(&mut buf[44..48], self.metadata_slot_count);
        LittleEndian::write_u32(&mut buf[48..52], self.logical_block_size);
    }

    fn decode_from(buf: &[u8]) -> LpResult<Self> {
        require_len(buf, Self::SIZE, "geometry")?;
        let mut checksum = [0u8; LP_CHECKSUM_SIZE];
        checksum.copy_from_slice(&buf[8..40]);
        Ok(Self {
            magic: LittleEndian::read_u32(&buf[0..4]),
            struct_size: LittleEndian::read_u32(&buf[4..8]),
            checksum: ChecksumBuffer::from(checksum),
            metadata_max_size: LittleEndian::read_u32(&buf[40..44]),
            metadata_slot_count: LittleEndian::read_u32(&buf[44..48]),
            logical_block_size: LittleEndian::read_u32(&buf[48..52]),
        })
    }
}

/// One of the four table descriptors embedded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableDescriptor {
    pub offset: u32,
    pub num_entries: u32,
    pub entry_size: u32,
}

impl Record for TableDescriptor {
    const SIZE: usize = 12;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.offset);
        LittleEndian::write_u32(&mut buf[4..8], self.num_entries);
        LittleEndian::write_u32(&mut buf[8..12], self.entry_size);
    }

    fn decode_from(buf: &[u8]) -> LpResult<Self> {
        require_len(buf, Self::SIZE, "table descriptor")?;
        Ok(Self {
            offset: LittleEndian::read_u32(&buf[0..4]),
            num_entries: LittleEndian::read_u32(&buf[4..8]),
            entry_size: LittleEndian::read_u32(&buf[8..12]),
        })
    }
}

/// Metadata header. Magic=0x414C5030, version major=10, minor in [0,2].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub header_size: u32,
    pub header_checksum: ChecksumBuffer,
    pub tables_size: u32,
    pub tables_checksum: ChecksumBuffer,
    pub partitions: TableDescriptor,
    pub extents: TableDescriptor,
    pub groups: TableDescriptor,
    pub block_devices: TableDescriptor,
    pub flags: u32,
    pub reserved: ReservedBuffer,
}

impl Header {
    /// Byte range of the header checksum field.
    pub const CHECKSUM_RANGE: std::ops::Range<usize> = 12..44;

    pub fn new() -> Self {
        Self {
            magic: LP_METADATA_HEADER_MAGIC,
            major_version: LP_METADATA_MAJOR_VERSION,
            minor_version: 0,
            header_size: Self::SIZE as u32,
            header_checksum: ChecksumBuffer::zeroed(),
            tables_size: 0,
            tables_checksum: ChecksumBuffer::zeroed(),
            partitions: TableDescriptor::default(),
            extents: TableDescriptor::default(),
            groups: TableDescriptor::default(),
            block_devices: TableDescriptor::default(),
            flags: 0,
            reserved: ReservedBuffer::zeroed(),
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Record for Header {
    const SIZE: usize = 4 + 2 + 2 + 4 + LP_CHECKSUM_SIZE + 4 + LP_CHECKSUM_SIZE + 12 * 4 + 4 + LP_HEADER_RESERVED_BYTES;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u16(&mut buf[4..6], self.major_version);
        LittleEndian::write_u16(&mut buf[6..8], self.minor_version);
        LittleEndian::write_u32(&mut buf[8..12], self.header_size);
        buf[12..44].copy_from_slice(self.header_checksum.as_span());
        LittleEndian::write_u32(&mut buf[44..48], self.tables_size);
        buf[48..80].copy_from_slice(self.tables_checksum.as_span());
        self.partitions.encode_into(&mut buf[80..92]);
        self.extents.encode_into(&mut buf[92..104]);
        self.groups.encode_into(&mut buf[104..116]);
        self.block_devices.encode_into(&mut buf[116..128]);
        LittleEndian::write_u32(&mut buf[128..132], self.flags);
        buf[132..132 + LP_HEADER_RESERVED_BYTES].copy_from_slice(self.reserved.as_span());
    }

    fn decode_from(buf: &[u8]) -> LpResult<Self> {
        require_len(buf, Self::SIZE, "header")?;
        let mut header_checksum = [0u8; LP_CHECKSUM_SIZE];
        header_checksum.copy_from_slice(&buf[12..44]);
        let mut tables_checksum = [0u8; LP_CHECKSUM_SIZE];
        tables_checksum.copy_from_slice(&buf[48..80]);
        let mut reserved = [0u8; LP_HEADER_RESERVED_BYTES];
        reserved.copy_from_slice(&buf[132..132 + LP_HEADER_RESERVED_BYTES]);
        Ok(Self {
            magic: LittleEndian::read_u32(&buf[0..4]),
            major_version: LittleEndian::read_u16(&buf[4..6]),
            minor_version: LittleEndian::read_u16(&buf[6..8]),
            header_size: LittleEndian::read_u32(&buf[8..12]),
            header_checksum: ChecksumBuffer::from(header_checksum),
            tables_size: LittleEndian::read_u32(&buf[44..48]),
            tables_checksum: ChecksumBuffer::from(tables_checksum),
            partitions: TableDescriptor::decode_from(&buf[80..92])?,
            extents: TableDescriptor::decode_from(&buf[92..104])?,
            groups: TableDescriptor::decode_from(&buf[104..116])?,
            block_devices: TableDescriptor::decode_from(&buf[116..128])?,
            flags: LittleEndian::read_u32(&buf[128..132]),
            reserved: ReservedBuffer::from(reserved),
        })
    }
}

/// Partition record: 36-byte name, attributes, extent range, group index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub name: NameBuffer,
    pub attributes: u32,
    pub first_extent_index: u32,
    pub num_extents: u32,
    pub group_index: u32,
}

impl Record for PartitionRecord {
    const SIZE: usize = LP_NAME_BUFFER_SIZE + 4 + 4 + 4 + 4;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..36].copy_from_slice(self.name.as_span());
        LittleEndian::write_u32(&mut buf[36..40], self.attributes);
        LittleEndian::write_u32(&mut buf[40..44], self.first_extent_index);
        LittleEndian::write_u32(&mut buf[44..48], self.num_extents);
        LittleEndian::write_u32(&mut buf[48..52], self.group_index);
    }

    fn decode_from(buf: &[u8]) -> LpResult<Self> {
        require_len(buf, Self::SIZE, "partition")?;
        let mut name = NameBuffer::zeroed();
        name.0.copy_from_slice(&buf[0..36]);
        Ok(Self {
            name,
            attributes: LittleEndian::read_u32(&buf[36..40]),
            first_extent_index: LittleEndian::read_u32(&buf[40..44]),
            num_extents: LittleEndian::read_u32(&buf[44..48]),
            group_index: LittleEndian::read_u32(&buf[48..52]),
        })
    }
}

/// Extent record: sector count, target type (linear/zero), target data,
/// target source block-device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentRecord {
    pub num_sectors: u64,
    pub target_type: u32,
    pub target_data: u64,
    pub target_source: u32,
}

impl ExtentRecord {
    pub fn is_linear(&self) -> bool {
        self.target_type == LP_TARGET_TYPE_LINEAR
    }
}

impl Record for ExtentRecord {
    const SIZE: usize = 8 + 4 + 8 + 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.num_sectors);
        LittleEndian::write_u32(&mut buf[8..12], self.target_type);
        LittleEndian::write_u64(&mut buf[12..20], self.target_data);
        LittleEndian::write_u32(&mut buf[20..24], self.target_source);
    }

    fn decode_from(buf: &[u8]) -> LpResult<Self> {
        require_len(buf, Self::SIZE, "extent")?;
        Ok(Self {
            num_sectors: LittleEndian::read_u64(&buf[0..8]),
            target_type: LittleEndian::read_u32(&buf[8..12]),
            target_data: LittleEndian::read_u64(&buf[12..20]),
            target_source: LittleEndian::read_u32(&buf[20..24]),
        })
    }
}

/// Group record: name, flags, and a size ceiling (0 = unbounded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: NameBuffer,
    pub flags: u32,
    pub maximum_size: u64,
}

impl Record for GroupRecord {
    const SIZE: usize = LP_NAME_BUFFER_SIZE + 4 + 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..36].copy_from_slice(self.name.as_span());
        LittleEndian::write_u32(&mut buf[36..40], self.flags);
        LittleEndian::write_u64(&mut buf[40..48], self.maximum_size);
    }

    fn decode_from(buf: &[u8]) -> LpResult<Self> {
        require_len(buf, Self::SIZE, "group")?;
        let mut name = NameBuffer::zeroed();
        name.0.copy_from_slice(&buf[0..36]);
        Ok(Self {
            name,
            flags: LittleEndian::read_u32(&buf[36..40]),
            maximum_size: LittleEndian::read_u64(&buf[40..48]),
        })
    }
}

/// Block device record: layout of one physical backing device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDeviceRecord {
    pub first_logical_sector: u64,
    pub alignment: u32,
    pub alignment_offset: u32,
    pub size: u64,
    pub partition_name: NameBuffer,
    pub flags: u32,
}

impl Record for BlockDeviceRecord {
    const SIZE: usize = 8 + 4 + 4 + 8 + LP_NAME_BUFFER_SIZE + 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.first_logical_sector);
        LittleEndian::write_u32(&mut buf[8..12], self.alignment);
        LittleEndian::write_u32(&mut buf[12..16], self.alignment_offset);
        LittleEndian::write_u64(&mut buf[16..24], self.size);
        buf[24..60].copy_from_slice(self.partition_name.as_span());
        LittleEndian::write_u32(&mut buf[60..64], self.flags);
    }

    fn decode_from(buf: &[u8]) -> LpResult<Self> {
        require_len(buf, Self::SIZE, "block device")?;
        let mut partition_name = NameBuffer::zeroed();
        partition_name.0.copy_from_slice(&buf[24..60]);
        Ok(Self {
            first_logical_sector: LittleEndian::read_u64(&buf[0..8]),
            alignment: LittleEndian::read_u32(&buf[8..12]),
            alignment_offset: LittleEndian::read_u32(&buf[12..16]),
            size: LittleEndian::read_u64(&buf[16..24]),
            partition_name,
            flags: LittleEndian::read_u32(&buf[60..64]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_round_trips() {
        let g = Geometry::new(65536, 2);
        let encoded = g.encode();
        let decoded = Geometry::decode_from(&encoded).unwrap();
        assert_eq!(g, decoded);
    }

    #[test]
    fn extent_round_trips() {
        let e = ExtentRecord {
            num_sectors: 1024,
            target_type: LP_TARGET_TYPE_LINEAR,
            target_data: 2048,
            target_source: 0,
        };
        let encoded = e.encode();
        assert_eq!(encoded.len(), ExtentRecord::SIZE);
        let decoded = ExtentRecord::decode_from(&encoded).unwrap();
        assert_eq!(e, decoded);
    }

    #[test]
    fn decode_fails_on_short_buffer() {
        let buf = vec![0u8; ExtentRecord::SIZE - 1];
        assert!(ExtentRecord::decode_from(&buf).is_err());
    }

    #[test]
    fn partition_name_round_trips() {
        let p = PartitionRecord {
            name: NameBuffer::from("system_a"),
            attributes: LP_PARTITION_ATTR_READONLY,
            first_extent_index: 0,
            num_extents: 1,
            group_index: 0,
        };
        let decoded = PartitionRecord::decode_from(&p.encode()).unwrap();
        assert_eq!(decoded.name.get_name(), "system_a");
        assert_eq!(decoded.attributes, LP_PARTITION_ATTR_READONLY);
    }
}
