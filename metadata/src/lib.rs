//! LP ("logical partition") metadata: fixed-field buffers, the record
//! layer, the checksum service, the full image codec, and the layout
//! editor that builds new or modified metadata prior to serialization.

pub mod buffers;
pub mod checksum;
pub mod codec;
pub mod constants;
pub mod editor;
pub mod model;
pub mod records;

pub use codec::{read_image, write_image, MetadataTables, SetLen};
pub use editor::{BlockDevice, Group, LpMetadataEditor, Partition};
pub use model::LpMetadata;
pub use records::{BlockDeviceRecord, ExtentRecord, Geometry, GroupRecord, Header, PartitionRecord, Record, TableDescriptor};
