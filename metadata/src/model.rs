//! The parsed/assembled aggregate the codec (C4) reads and writes: a
//! geometry, a header, and the four decoded tables. The layout editor
//! (C5) works against its own friendlier in-memory model (see
//! `editor::EditorModel`) and converts to/from this on `from_metadata`
//! and `build`/`export`.

use crate::records::{BlockDeviceRecord, ExtentRecord, Geometry, GroupRecord, Header, PartitionRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct LpMetadata {
    pub geometry: Geometry,
    pub header: Header,
    pub partitions: Vec<PartitionRecord>,
    pub extents: Vec<ExtentRecord>,
    pub groups: Vec<GroupRecord>,
    pub block_devices: Vec<BlockDeviceRecord>,
}
