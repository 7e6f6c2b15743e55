//! Full image read (geometry discovery, header + tables parse, checksum
//! verify) and write (primary + backup geometry, N metadata slots with
//! backup copies).

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use log::{debug, error, warn};

use lp_core::error::{LpError, LpResult};

use crate::buffers::ChecksumBuffer;
use crate::checksum::{sha256, stamp_checksum};
use crate::constants::*;
use crate::model::LpMetadata;
use crate::records::{
    BlockDeviceRecord, ExtentRecord, Geometry, GroupRecord, Header, PartitionRecord, Record, TableDescriptor,
};

/// Stream extension allowing the codec to grow the underlying storage to
/// the block device's declared size before writing metadata slots near
/// the tail. `std::io::{Read,Write,Seek}` has no portable "set length"
/// operation, so this is implemented per concrete stream type.
pub trait SetLen {
    fn set_stream_len(&mut self, len: u64) -> std::io::Result<()>;
}

impl SetLen for std::fs::File {
    fn set_stream_len(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

impl SetLen for Cursor<Vec<u8>> {
    fn set_stream_len(&mut self, len: u64) -> std::io::Result<()> {
        let cur = self.get_ref().len() as u64;
        if len > cur {
            self.get_mut().resize(len as usize, 0);
        }
        Ok(())
    }
}

/// Parse and checksum-verify a single 4096-byte geometry block.
pub fn parse_geometry(buf: &[u8]) -> LpResult<Geometry> {
    if buf.len() < Geometry::SIZE {
        return Err(LpError::InvalidData {
            offset: 0,
            reason: format!("geometry block too short: {} bytes", buf.len()),
        });
    }
    let geometry = Geometry::decode_from(buf)?;
    if geometry.magic != LP_METADATA_GEOMETRY_MAGIC {
        return Err(LpError::InvalidData {
            offset: 0,
            reason: format!("bad geometry magic: {:#x}", geometry.magic),
        });
    }
    let struct_size = geometry.struct_size as usize;
    if struct_size > buf.len() || struct_size < Geometry::SIZE {
        return Err(LpError::InvalidData {
            offset: 0,
            reason: format!("geometry struct_size {struct_size} out of range"),
        });
    }
    let mut clone = buf[..struct_size].to_vec();
    clone[Geometry::CHECKSUM_RANGE].fill(0);
    let digest = sha256(&clone);
    if digest != geometry.checksum.0 {
        return Err(LpError::Checksum {
            region: "geometry",
            offset: 0,
        });
    }
    Ok(geometry)
}

/// Geometry locate-and-parse: try the three candidate absolute offsets in
/// order (primary 4096, backup 8192, legacy 0). The first one whose block
/// checksum-verifies wins; earlier failures are logged and treated as
/// soft. The metadata base offset is always 4096 — primary metadata
/// storage immediately follows the *pair* of geometry blocks regardless
/// of which copy was used to recover the geometry itself.
pub fn locate_geometry<S: Read + Seek>(stream: &mut S) -> LpResult<(Geometry, u64)> {
    let mut last_err = None;
    for &offset in LP_GEOMETRY_OFFSETS.iter() {
        debug!("trying geometry candidate at offset {offset}");
        let mut buf = vec![0u8; Geometry::SIZE.max(4096) as usize];
        if let Err(e) = stream.seek(SeekFrom::Start(offset)) {
            debug!("seek to geometry candidate {offset} failed: {e}");
            last_err = Some(LpError::Io(e));
            continue;
        }
        if let Err(e) = stream.read_exact(&mut buf) {
            debug!("read of geometry candidate {offset} failed: {e}");
            last_err = Some(LpError::Io(e));
            continue;
        }
        match parse_geometry(&buf) {
            Ok(geometry) => {
                if offset == 0 {
                    warn!("recovered geometry from legacy offset 0 (non-standard layout)");
                }
                return Ok((geometry, 4096));
            }
            Err(e) => {
                debug!("geometry candidate {offset} did not verify: {e}");
                last_err = Some(e);
            }
        }
    }
    error!("all geometry candidates exhausted");
    Err(last_err.unwrap_or_else(|| LpError::InvalidData {
        offset: 0,
        reason: "no geometry candidate available".to_string(),
    }))
}

fn decode_table<R: Record>(tables: &[u8], desc: &TableDescriptor) -> LpResult<Vec<R>> {
    let mut out = Vec::with_capacity(desc.num_entries as usize);
    let entry_size = desc.entry_size as usize;
    if entry_size < R::SIZE {
        return Err(LpError::InvalidData {
            offset: desc.offset as u64,
            reason: format!("entry_size {entry_size} smaller than record size {}", R::SIZE),
        });
    }
    for i in 0..desc.num_entries as usize {
        let start = desc.offset as usize + i * entry_size;
        let end = start + entry_size;
        if end > tables.len() {
            return Err(LpError::InvalidData {
                offset: start as u64,
                reason: "table entry runs past end of tables blob".to_string(),
            });
        }
        // Decode only the known prefix; trailing bytes (when entry_size
        // exceeds our record size) are forward-compatibility padding.
        out.push(R::decode_from(&tables[start..start + R::SIZE])?);
    }
    Ok(out)
}

/// Header and decoded tables, without a geometry — the unit this codec
/// reads/writes per slot, independent of which geometry copy located it.
pub struct MetadataTables {
    pub header: Header,
    pub partitions: Vec<PartitionRecord>,
    pub extents: Vec<ExtentRecord>,
    pub groups: Vec<GroupRecord>,
    pub block_devices: Vec<BlockDeviceRecord>,
}

/// Read the header and four tables starting at `slot_offset`, verifying
/// both checksums.
pub fn read_metadata_at<S: Read + Seek>(stream: &mut S, slot_offset: u64) -> LpResult<MetadataTables> {
    stream.seek(SeekFrom::Start(slot_offset))?;
    let mut header_buf = vec![0u8; Header::SIZE];
    stream.read_exact(&mut header_buf)?;
    let header = Header::decode_from(&header_buf)?;
    if header.magic != LP_METADATA_HEADER_MAGIC {
        return Err(LpError::InvalidData {
            offset: slot_offset,
            reason: format!("bad header magic: {:#x}", header.magic),
        });
    }
    let header_size = header.header_size as usize;
    if header_size > header_buf.len() {
        return Err(LpError::InvalidData {
            offset: slot_offset,
            reason: format!("header_size {header_size} exceeds read window"),
        });
    }
    let mut clone = header_buf[..header_size].to_vec();
    clone[Header::CHECKSUM_RANGE].fill(0);
    let digest = sha256(&clone);
    if digest != header.header_checksum.0 {
        error!("header checksum mismatch at slot offset {slot_offset}");
        return Err(LpError::Checksum {
            region: "header",
            offset: slot_offset,
        });
    }

    let mut tables = vec![0u8; header.tables_size as usize];
    stream.read_exact(&mut tables)?;
    let digest = sha256(&tables);
    if digest != header.tables_checksum.0 {
        error!("tables checksum mismatch at slot offset {slot_offset}");
        return Err(LpError::Checksum {
            region: "tables",
            offset: slot_offset + header_size as u64,
        });
    }

    let partitions: Vec<PartitionRecord> = decode_table(&tables, &header.partitions)?;
    let extents: Vec<ExtentRecord> = decode_table(&tables, &header.extents)?;
    let groups: Vec<GroupRecord> = decode_table(&tables, &header.groups)?;
    let block_devices: Vec<BlockDeviceRecord> = decode_table(&tables, &header.block_devices)?;

    Ok(MetadataTables {
        header,
        partitions,
        extents,
        groups,
        block_devices,
    })
}

/// Full image read: locate geometry, then read the metadata at the given
/// slot index.
pub fn read_image<S: Read + Seek>(stream: &mut S, slot_index: u32) -> LpResult<LpMetadata> {
    let (geometry, base) = locate_geometry(stream)?;
    let slot_offset = base + 2 * LP_METADATA_GEOMETRY_SIZE + slot_index as u64 * geometry.metadata_max_size as u64;
    let tables = read_metadata_at(stream, slot_offset)?;
    Ok(LpMetadata {
        geometry,
        header: tables.header,
        partitions: tables.partitions,
        extents: tables.extents,
        groups: tables.groups,
        block_devices: tables.block_devices,
    })
}

/// Serialize the four tables (partitions, extents, groups, block_devices,
/// in that order, contiguous) and a freshly stamped header. Returns
/// `header ‖ tables`.
pub fn serialize_metadata(metadata: &LpMetadata) -> Vec<u8> {
    let mut tables = Vec::new();
    let partitions_offset = 0u32;
    for p in &metadata.partitions {
        tables.extend_from_slice(&p.encode());
    }
    let extents_offset = tables.len() as u32;
    for e in &metadata.extents {
        tables.extend_from_slice(&e.encode());
    }
    let groups_offset = tables.len() as u32;
    for g in &metadata.groups {
        tables.extend_from_slice(&g.encode());
    }
    let block_devices_offset = tables.len() as u32;
    for d in &metadata.block_devices {
        tables.extend_from_slice(&d.encode());
    }

    let tables_checksum = sha256(&tables);

    let mut header = metadata.header.clone();
    header.magic = LP_METADATA_HEADER_MAGIC;
    header.major_version = LP_METADATA_MAJOR_VERSION;
    header.header_size = Header::SIZE as u32;
    header.tables_size = tables.len() as u32;
    header.tables_checksum = ChecksumBuffer::from(tables_checksum);
    header.partitions = TableDescriptor {
        offset: partitions_offset,
        num_entries: metadata.partitions.len() as u32,
        entry_size: PartitionRecord::SIZE as u32,
    };
    header.extents = TableDescriptor {
        offset: extents_offset,
        num_entries: metadata.extents.len() as u32,
        entry_size: ExtentRecord::SIZE as u32,
    };
    header.groups = TableDescriptor {
        offset: groups_offset,
        num_entries: metadata.groups.len() as u32,
        entry_size: GroupRecord::SIZE as u32,
    };
    header.block_devices = TableDescriptor {
        offset: block_devices_offset,
        num_entries: metadata.block_devices.len() as u32,
        entry_size: BlockDeviceRecord::SIZE as u32,
    };

    let mut header_bytes = vec![0u8; Header::SIZE];
    header.encode_into(&mut header_bytes);
    stamp_checksum(&mut header_bytes, Header::CHECKSUM_RANGE);

    let mut blob = header_bytes;
    blob.extend_from_slice(&tables);
    blob
}

fn stamped_geometry_block(geometry: &Geometry) -> Vec<u8> {
    let struct_size = geometry.struct_size as usize;
    let mut block = vec![0u8; LP_METADATA_GEOMETRY_SIZE as usize];
    geometry.encode_into(&mut block[..Geometry::SIZE]);
    stamp_checksum(&mut block[..struct_size], Geometry::CHECKSUM_RANGE);
    block
}

/// Full image write: primary + backup geometry, then every metadata slot
/// with its backup copy near the device tail.
///
/// Write order is: both geometry blocks, then for each slot index the
/// primary copy followed immediately by the backup copy — matching the
/// ordering guarantee a caller observing partial writes can rely on.
pub fn write_image<S: Read + Write + Seek + SetLen>(stream: &mut S, metadata: &LpMetadata) -> LpResult<()> {
    if let Some(device) = metadata.block_devices.first() {
        stream.set_stream_len(device.size)?;
    }

    let geometry_block = stamped_geometry_block(&metadata.geometry);
    stream.seek(SeekFrom::Start(4096))?;
    stream.write_all(&geometry_block)?;
    stream.seek(SeekFrom::Start(8192))?;
    stream.write_all(&geometry_block)?;

    let blob = serialize_metadata(metadata);
    let max_size = metadata.geometry.metadata_max_size as u64;
    if blob.len() as u64 > max_size {
        return Err(LpError::Capacity {
            reason: format!("serialized metadata {} bytes exceeds metadata_max_size {max_size}", blob.len()),
        });
    }

    let slot_count = metadata.geometry.metadata_slot_count;
    let device_size = metadata.block_devices.first().map(|d| d.size);
    for slot in 0..slot_count {
        let primary_offset = 12288 + slot as u64 * max_size;
        stream.seek(SeekFrom::Start(primary_offset))?;
        stream.write_all(&blob)?;

        if let Some(size) = device_size {
            let backup_offset = size - metadata.geometry.metadata_slot_count as u64 * max_size + slot as u64 * max_size;
            stream.seek(SeekFrom::Start(backup_offset))?;
            stream.write_all(&blob)?;
        }
    }

    Ok(())
}

#[cfg(feature = "async-io")]
pub mod asyncio {
    //! Async read/write variants. These exist purely so the caller's task
    //! isn't blocked on stream I/O; they hold no state across `.await`
    //! points beyond the stream itself, so a cancelled write leaves no
    //! partial seek state visible to anyone but the stream's owner.

    use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

    use lp_core::error::{LpError, LpResult};

    use crate::checksum::sha256;
    use crate::constants::*;
    use crate::model::LpMetadata;
    use crate::records::{BlockDeviceRecord, ExtentRecord, Geometry, GroupRecord, Header, PartitionRecord, Record};

    use super::{decode_table, parse_geometry, serialize_metadata, stamped_geometry_block};

    pub async fn locate_geometry<S: AsyncRead + AsyncSeek + Unpin>(stream: &mut S) -> LpResult<(Geometry, u64)> {
        let mut last_err = None;
        for &offset in LP_GEOMETRY_OFFSETS.iter() {
            let mut buf = vec![0u8; 4096];
            if stream.seek(std::io::SeekFrom::Start(offset)).await.is_err() {
                continue;
            }
            if stream.read_exact(&mut buf).await.is_err() {
                continue;
            }
            match parse_geometry(&buf) {
                Ok(geometry) => return Ok((geometry, 4096)),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| LpError::InvalidData {
            offset: 0,
            reason: "no geometry candidate available".to_string(),
        }))
    }

    pub async fn read_image<S: AsyncRead + AsyncSeek + Unpin>(stream: &mut S, slot_index: u32) -> LpResult<LpMetadata> {
        let (geometry, base) = locate_geometry(stream).await?;
        let slot_offset = base + 2 * LP_METADATA_GEOMETRY_SIZE + slot_index as u64 * geometry.metadata_max_size as u64;
        stream.seek(std::io::SeekFrom::Start(slot_offset)).await?;

        let mut header_buf = vec![0u8; Header::SIZE];
        stream.read_exact(&mut header_buf).await?;
        let header = Header::decode_from(&header_buf)?;
        if header.magic != LP_METADATA_HEADER_MAGIC {
            return Err(LpError::InvalidData {
                offset: slot_offset,
                reason: format!("bad header magic: {:#x}", header.magic),
            });
        }
        let header_size = header.header_size as usize;
        let mut clone = header_buf[..header_size.min(header_buf.len())].to_vec();
        clone[Header::CHECKSUM_RANGE].fill(0);
        if sha256(&clone) != header.header_checksum.0 {
            return Err(LpError::Checksum {
                region: "header",
                offset: slot_offset,
            });
        }

        let mut tables = vec![0u8; header.tables_size as usize];
        stream.read_exact(&mut tables).await?;
        if sha256(&tables) != header.tables_checksum.0 {
            return Err(LpError::Checksum {
                region: "tables",
                offset: slot_offset + header_size as u64,
            });
        }

        let partitions: Vec<PartitionRecord> = decode_table(&tables, &header.partitions)?;
        let extents: Vec<ExtentRecord> = decode_table(&tables, &header.extents)?;
        let groups: Vec<GroupRecord> = decode_table(&tables, &header.groups)?;
        let block_devices: Vec<BlockDeviceRecord> = decode_table(&tables, &header.block_devices)?;

        Ok(LpMetadata {
            geometry,
            header,
            partitions,
            extents,
            groups,
            block_devices,
        })
    }

    pub async fn write_image<S: AsyncWrite + AsyncSeek + Unpin>(stream: &mut S, metadata: &LpMetadata) -> LpResult<()> {
        let geometry_block = stamped_geometry_block(&metadata.geometry);
        stream.seek(std::io::SeekFrom::Start(4096)).await?;
        stream.write_all(&geometry_block).await?;
        stream.seek(std::io::SeekFrom::Start(8192)).await?;
        stream.write_all(&geometry_block).await?;

        let blob = serialize_metadata(metadata);
        let max_size = metadata.geometry.metadata_max_size as u64;
        if blob.len() as u64 > max_size {
            return Err(LpError::Capacity {
                reason: format!("serialized metadata {} bytes exceeds metadata_max_size {max_size}", blob.len()),
            });
        }

        let slot_count = metadata.geometry.metadata_slot_count;
        let device_size = metadata.block_devices.first().map(|d| d.size);
        for slot in 0..slot_count {
            let primary_offset = 12288 + slot as u64 * max_size;
            stream.seek(std::io::SeekFrom::Start(primary_offset)).await?;
            stream.write_all(&blob).await?;

            if let Some(size) = device_size {
                let backup_offset =
                    size - metadata.geometry.metadata_slot_count as u64 * max_size + slot as u64 * max_size;
                stream.seek(std::io::SeekFrom::Start(backup_offset)).await?;
                stream.write_all(&blob).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::NameBuffer;

    fn sample_metadata() -> LpMetadata {
        let geometry = Geometry::new(65536, 2);
        let header = Header::new();
        let block_device = BlockDeviceRecord {
            first_logical_sector: 32,
            alignment: 4096,
            alignment_offset: 0,
            size: 16 * 1024 * 1024 * 1024,
            partition_name: NameBuffer::from("super"),
            flags: 0,
        };
        let group = GroupRecord {
            name: NameBuffer::from("default"),
            flags: 0,
            maximum_size: 0,
        };
        let partition = PartitionRecord {
            name: NameBuffer::from("system_a"),
            attributes: 0,
            first_extent_index: 0,
            num_extents: 1,
            group_index: 0,
        };
        let extent = ExtentRecord {
            num_sectors: 2048,
            target_type: LP_TARGET_TYPE_LINEAR,
            target_data: 4096,
            target_source: 0,
        };
        LpMetadata {
            geometry,
            header,
            partitions: vec![partition],
            extents: vec![extent],
            groups: vec![group],
            block_devices: vec![block_device],
        }
    }

    #[test]
    fn round_trip_write_then_read() {
        let metadata = sample_metadata();
        let size = metadata.block_devices[0].size as usize;
        let mut cursor = Cursor::new(vec![0u8; size]);
        write_image(&mut cursor, &metadata).unwrap();

        let read_back = read_image(&mut cursor, 0).unwrap();
        assert_eq!(read_back.partitions.len(), 1);
        assert_eq!(read_back.partitions[0].name.get_name(), "system_a");
        assert_eq!(read_back.extents[0].target_data, 4096);
        assert_eq!(read_back.header.major_version, LP_METADATA_MAJOR_VERSION);
    }

    #[test]
    fn slot_independence() {
        let mut metadata_a = sample_metadata();
        metadata_a.geometry.metadata_slot_count = 2;
        let mut metadata_b = metadata_a.clone();
        metadata_b.partitions[0].name = NameBuffer::from("vendor_a");

        let size = metadata_a.block_devices[0].size as usize;
        let mut cursor = Cursor::new(vec![0u8; size]);

        // write slot 0's worth of data by writing metadata_a fully, then
        // overwrite only slot 1's primary region with metadata_b's blob.
        write_image(&mut cursor, &metadata_a).unwrap();
        let blob_b = serialize_metadata(&metadata_b);
        let max_size = metadata_a.geometry.metadata_max_size as u64;
        cursor.seek(SeekFrom::Start(12288 + max_size)).unwrap();
        cursor.write_all(&blob_b).unwrap();

        let slot0 = read_image(&mut cursor, 0).unwrap();
        let slot1 = read_image(&mut cursor, 1).unwrap();
        assert_eq!(slot0.partitions[0].name.get_name(), "system_a");
        assert_eq!(slot1.partitions[0].name.get_name(), "vendor_a");
    }

    #[test]
    fn backup_geometry_recovers_zeroed_primary() {
        let metadata = sample_metadata();
        let size = metadata.block_devices[0].size as usize;
        let mut cursor = Cursor::new(vec![0u8; size]);
        write_image(&mut cursor, &metadata).unwrap();

        // Zero the primary geometry block.
        cursor.seek(SeekFrom::Start(4096)).unwrap();
        cursor.write_all(&vec![0u8; 4096]).unwrap();

        let read_back = read_image(&mut cursor, 0).unwrap();
        assert_eq!(read_back.partitions[0].name.get_name(), "system_a");
    }

    #[test]
    fn corrupt_header_byte_fails_checksum() {
        // A handful of header byte offsets outside `Header::CHECKSUM_RANGE`
        // (12..44): major/minor version, tables_size, the block_devices
        // table descriptor, flags. Each should independently fail the
        // header checksum once flipped.
        for offset in [4u64, 44, 116, 128] {
            let metadata = sample_metadata();
            let size = metadata.block_devices[0].size as usize;
            let mut cursor = Cursor::new(vec![0u8; size]);
            write_image(&mut cursor, &metadata).unwrap();

            cursor.seek(SeekFrom::Start(12288 + offset)).unwrap();
            let mut b = [0u8; 1];
            cursor.read_exact(&mut b).unwrap();
            cursor.seek(SeekFrom::Start(12288 + offset)).unwrap();
            cursor.write_all(&[b[0] ^ 0xFF]).unwrap();

            let err = read_image(&mut cursor, 0).unwrap_err();
            assert!(
                matches!(err, LpError::Checksum { region: "header", .. }),
                "offset {offset} did not raise a header checksum error"
            );
        }
    }

    #[test]
    fn capacity_error_on_oversized_blob() {
        let mut metadata = sample_metadata();
        metadata.geometry.metadata_max_size = 16; // far too small
        let size = metadata.block_devices[0].size as usize;
        let mut cursor = Cursor::new(vec![0u8; size]);
        let err = write_image(&mut cursor, &metadata).unwrap_err();
        assert!(matches!(err, LpError::Capacity { .. }));
    }
}
