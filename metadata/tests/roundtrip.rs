//! End-to-end scenarios exercising the editor and codec together: a full
//! build-compact-write-read cycle, geometry/header corruption recovery
//! and rejection, and the capacity-enforcing edges of the allocator.

use std::io::{Cursor, Seek, SeekFrom, Write};

use lp_core::error::LpError;
use lp_metadata::{read_image, write_image};
use lp_metadata::{Header, Record};
use lp_metadata::LpMetadataEditor;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

fn build_s1() -> (lp_metadata::LpMetadata, u64) {
    let mut ed = LpMetadataEditor::new(16 * GIB, 65536, 2);
    ed.add_group("main", 8 * GIB).unwrap();
    ed.add_partition("system_a", "main", 0).unwrap();
    ed.add_partition("vendor_a", "main", 0).unwrap();
    ed.resize_partition("system_a", 2 * GIB).unwrap();
    ed.resize_partition("vendor_a", 512 * MIB).unwrap();
    ed.compact_partitions().unwrap();
    assert_eq!(ed.group_usage("main"), 2 * GIB + 512 * MIB);
    (ed.build(), 16 * GIB)
}

#[test]
fn s1_build_compact_write_read_round_trips() {
    let (metadata, device_size) = build_s1();
    let mut cursor = Cursor::new(vec![0u8; device_size as usize]);
    write_image(&mut cursor, &metadata).unwrap();

    let read_back = read_image(&mut cursor, 0).unwrap();
    let names: Vec<String> = read_back.partitions.iter().map(|p| p.name.get_name()).collect();
    assert_eq!(names, vec!["system_a", "vendor_a"]);
    assert_eq!(read_back.header.major_version, 10);
}

#[test]
fn s2_primary_geometry_corruption_recovers_from_backup() {
    // A handful of relative offsets inside the primary geometry block
    // (geometry starts at 4096), all outside `Geometry::CHECKSUM_RANGE`
    // (8..40): magic, struct_size, metadata_max_size, metadata_slot_count,
    // logical_block_size. Any one of them flipping should still recover
    // from the backup copy at offset 8192.
    for relative_offset in [0usize, 4, 40, 44, 48] {
        let (metadata, device_size) = build_s1();
        let mut cursor = Cursor::new(vec![0u8; device_size as usize]);
        write_image(&mut cursor, &metadata).unwrap();

        let reference = read_image(&mut cursor, 0).unwrap();

        cursor.seek(SeekFrom::Start(4096 + relative_offset as u64)).unwrap();
        cursor.write_all(&[0xFF]).unwrap();

        let recovered = read_image(&mut cursor, 0).unwrap();
        assert_eq!(recovered, reference, "offset {relative_offset} failed to recover");
    }
}

#[test]
fn s3_primary_header_corruption_raises_checksum_error() {
    // A handful of relative offsets inside the primary header, all outside
    // `Header::CHECKSUM_RANGE` (12..44): version fields, tables_size, the
    // partitions table descriptor, flags, and the reserved padding. Any
    // one of them flipping should still be caught by the tables/header
    // checksum, and the backup slot should remain unaffected.
    for relative_offset in [4usize, 44, 80, 128, 200] {
        let (metadata, device_size) = build_s1();
        let mut cursor = Cursor::new(vec![0u8; device_size as usize]);
        write_image(&mut cursor, &metadata).unwrap();

        let corrupt_at = 12288 + relative_offset as u64;
        cursor.seek(SeekFrom::Start(corrupt_at)).unwrap();
        let mut byte = [0u8; 1];
        std::io::Read::read_exact(&mut cursor, &mut byte).unwrap();
        cursor.seek(SeekFrom::Start(corrupt_at)).unwrap();
        cursor.write_all(&[byte[0] ^ 0x80]).unwrap();

        let err = read_image(&mut cursor, 0).unwrap_err();
        assert!(
            matches!(err, LpError::Checksum { region: "header", .. }),
            "offset {relative_offset} did not raise a header checksum error"
        );

        // The backup slot (slot 1) is untouched and still verifies.
        let backup = read_image(&mut cursor, 1).unwrap();
        assert_eq!(backup.partitions.len(), metadata.partitions.len());
    }
}

#[test]
fn s4_resize_block_device_succeeds_then_rejects_undersized_shrink() {
    let mut ed = LpMetadataEditor::new(GIB, 65536, 2);
    ed.add_partition("p1", "default", 0).unwrap();
    // Force a specific extent by growing from empty, then verify the
    // resulting allocation covers [first_logical_sector, +1024).
    ed.resize_partition("p1", 1024 * 512).unwrap();

    ed.resize_block_device(512 * MIB).unwrap();

    let err = ed.resize_block_device(1 * MIB).unwrap_err();
    assert!(matches!(err, LpError::Capacity { .. }));
}

#[test]
fn s5_oversized_metadata_blob_rejected_without_mutating_partition_region() {
    let mut ed = LpMetadataEditor::new(GIB, 65536, 2);
    // Pad with enough partitions that the serialized tables blow past a
    // deliberately tiny metadata_max_size.
    for i in 0..200 {
        ed.add_partition(&format!("p{i}"), "default", 0).unwrap();
    }
    let mut metadata = ed.build();
    metadata.geometry.metadata_max_size = 64;

    let mut cursor = Cursor::new(vec![0u8; GIB as usize]);
    // Sentinel bytes past the geometry region, to verify they survive a
    // rejected write untouched.
    cursor.seek(SeekFrom::Start(20000)).unwrap();
    cursor.write_all(&[0xAB; 16]).unwrap();

    let err = write_image(&mut cursor, &metadata).unwrap_err();
    assert!(matches!(err, LpError::Capacity { .. }));

    let mut sentinel = [0u8; 16];
    cursor.seek(SeekFrom::Start(20000)).unwrap();
    std::io::Read::read_exact(&mut cursor, &mut sentinel).unwrap();
    assert_eq!(sentinel, [0xAB; 16]);
}

#[test]
fn s6_partition_grow_past_group_capacity_rejected_and_unchanged() {
    let mut ed = LpMetadataEditor::new(16 * GIB, 65536, 2);
    ed.add_group("g1", GIB).unwrap();
    ed.add_partition("p1", "g1", 0).unwrap();
    ed.resize_partition("p1", 900 * MIB).unwrap();

    let err = ed.resize_partition("p1", (1.1_f64 * GIB as f64) as u64).unwrap_err();
    assert!(matches!(err, LpError::Capacity { .. }));
    assert_eq!(ed.partition("p1").unwrap().size_bytes(), 900 * MIB);
}

#[test]
fn header_size_constant_matches_record_size() {
    // Sanity check the fixture offsets above actually land inside the header.
    assert!(200 < Header::SIZE);
}
