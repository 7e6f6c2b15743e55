//! Layout editor: an in-memory builder over a logical model that admits
//! partition/group mutations while maintaining free-region accounting on
//! the underlying block device and enforcing group- and device-capacity
//! invariants. Editor validation is front-loaded: a rejected operation
//! never leaves the model partially mutated.

use std::collections::HashMap;

use lp_core::error::{LpError, LpResult};
use lp_core::sector::align_up;

use crate::buffers::NameBuffer;
use crate::constants::*;
use crate::model::LpMetadata;
use crate::records::{BlockDeviceRecord, ExtentRecord, Geometry, GroupRecord, Header, PartitionRecord};

/// A partition as tracked by the editor. The group is referenced by name
/// rather than table index: removing an unused group would otherwise
/// shift every later group's index out from under any partition that
/// still points at one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub group_name: String,
    pub attributes: u32,
    pub extents: Vec<ExtentRecord>,
}

impl Partition {
    pub fn total_sectors(&self) -> u64 {
        self.extents.iter().map(|e| e.num_sectors).sum()
    }

    pub fn linear_sectors(&self) -> u64 {
        self.extents.iter().filter(|e| e.is_linear()).map(|e| e.num_sectors).sum()
    }

    pub fn size_bytes(&self) -> u64 {
        self.total_sectors() * LP_SECTOR_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub flags: u32,
    pub maximum_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub first_logical_sector: u64,
    pub alignment: u32,
    pub alignment_offset: u32,
    pub size: u64,
    pub partition_name: String,
    pub flags: u32,
}

/// The layout editor itself.
#[derive(Debug, Clone)]
pub struct LpMetadataEditor {
    geometry: Geometry,
    partitions: Vec<Partition>,
    groups: Vec<Group>,
    block_devices: Vec<BlockDevice>,
}

fn advance_aligned(sector: u64, alignment: u32, alignment_offset: u32) -> u64 {
    if alignment == 0 {
        return sector;
    }
    let align_sectors = (alignment as u64) / LP_SECTOR_SIZE;
    if align_sectors == 0 {
        return sector;
    }
    let offset_sectors = (alignment_offset as u64) / LP_SECTOR_SIZE;
    let diff = sector as i128 - offset_sectors as i128;
    let rem = diff.rem_euclid(align_sectors as i128);
    if rem == 0 {
        sector
    } else {
        sector + (align_sectors as i128 - rem) as u64
    }
}

impl LpMetadataEditor {
    /// Fresh initialization: one block device of `device_size` bytes, one
    /// `"default"` unbounded group, no partitions.
    pub fn new(device_size: u64, metadata_max_size: u32, slot_count: u32) -> Self {
        let geometry = Geometry::new(metadata_max_size, slot_count);
        let head_reserved = 4096 + (4096 + metadata_max_size as u64 * slot_count as u64) * 2;
        let first_logical_sector = align_up(head_reserved, 4096) / LP_SECTOR_SIZE;

        let block_device = BlockDevice {
            first_logical_sector,
            alignment: 4096,
            alignment_offset: 0,
            size: device_size,
            partition_name: LP_DEFAULT_BLOCK_DEVICE_NAME.to_string(),
            flags: 0,
        };
        let default_group = Group {
            name: LP_DEFAULT_GROUP_NAME.to_string(),
            flags: 0,
            maximum_size: 0,
        };

        Self {
            geometry,
            partitions: Vec::new(),
            groups: vec![default_group],
            block_devices: vec![block_device],
        }
    }

    /// Rebuild an editor from a parsed model.
    pub fn from_metadata(model: &LpMetadata) -> Self {
        let groups: Vec<Group> = model
            .groups
            .iter()
            .map(|g| Group {
                name: g.name.get_name(),
                flags: g.flags,
                maximum_size: g.maximum_size,
            })
            .collect();

        let partitions: Vec<Partition> = model
            .partitions
            .iter()
            .map(|p| {
                let start = p.first_extent_index as usize;
                let end = start + p.num_extents as usize;
                let extents = model.extents[start..end].to_vec();
                let group_name = groups
                    .get(p.group_index as usize)
                    .map(|g| g.name.clone())
                    .unwrap_or_default();
                Partition {
                    name: p.name.get_name(),
                    group_name,
                    attributes: p.attributes,
                    extents,
                }
            })
            .collect();

        let block_devices: Vec<BlockDevice> = model
            .block_devices
            .iter()
            .map(|d| BlockDevice {
                first_logical_sector: d.first_logical_sector,
                alignment: d.alignment,
                alignment_offset: d.alignment_offset,
                size: d.size,
                partition_name: d.partition_name.get_name(),
                flags: d.flags,
            })
            .collect();

        Self {
            geometry: model.geometry,
            partitions,
            groups,
            block_devices,
        }
    }

    // ---- partition / group operations ------------------------------------

    pub fn add_partition(&mut self, name: &str, group_name: &str, attributes: u32) -> LpResult<()> {
        if self.partitions.iter().any(|p| p.name == name) {
            return Err(LpError::AlreadyExists(name.to_string()));
        }
        if !self.groups.iter().any(|g| g.name == group_name) {
            return Err(LpError::NotFound(group_name.to_string()));
        }
        self.partitions.push(Partition {
            name: name.to_string(),
            group_name: group_name.to_string(),
            attributes,
            extents: Vec::new(),
        });
        Ok(())
    }

    /// Idempotent: a no-op if `name` is not present.
    pub fn remove_partition(&mut self, name: &str) {
        self.partitions.retain(|p| p.name != name);
    }

    /// Reorders partitions to match `names`. Partitions named in `names`
    /// but absent from the model are ignored. Partitions present in the
    /// model but not named in `names` are preserved, appended after the
    /// named sequence in their prior relative order — dropping them
    /// silently would be indistinguishable from a data-loss bug to a
    /// caller of this API.
    pub fn reorder_partitions(&mut self, names: &[String]) {
        let mut remaining = std::mem::take(&mut self.partitions);
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in names {
            if let Some(pos) = remaining.iter().position(|p| &p.name == name) {
                ordered.push(remaining.remove(pos));
            }
        }
        ordered.extend(remaining);
        self.partitions = ordered;
    }

    pub fn add_group(&mut self, name: &str, max_size: u64) -> LpResult<()> {
        if self.groups.iter().any(|g| g.name == name) {
            return Err(LpError::AlreadyExists(name.to_string()));
        }
        self.groups.push(Group {
            name: name.to_string(),
            flags: 0,
            maximum_size: max_size,
        });
        Ok(())
    }

    pub fn remove_group(&mut self, name: &str) -> LpResult<()> {
        if name == LP_DEFAULT_GROUP_NAME {
            return Err(LpError::Invariant("cannot remove the default group".to_string()));
        }
        if self.partitions.iter().any(|p| p.group_name == name) {
            return Err(LpError::Invariant(format!("group {name} is in use")));
        }
        self.groups.retain(|g| g.name != name);
        Ok(())
    }

    fn group_usage_bytes(&self, group_name: &str) -> u64 {
        self.partitions
            .iter()
            .filter(|p| p.group_name == group_name)
            .map(|p| p.linear_sectors() * LP_SECTOR_SIZE)
            .sum()
    }

    /// `max_size == 0` means unbounded.
    pub fn resize_group(&mut self, name: &str, max_size: u64) -> LpResult<()> {
        if !self.groups.iter().any(|g| g.name == name) {
            return Err(LpError::NotFound(name.to_string()));
        }
        if max_size > 0 {
            let usage = self.group_usage_bytes(name);
            if usage > max_size {
                return Err(LpError::Capacity {
                    reason: format!("group {name} usage {usage} exceeds requested max {max_size}"),
                });
            }
        }
        self.groups.iter_mut().find(|g| g.name == name).unwrap().maximum_size = max_size;
        Ok(())
    }

    pub fn resize_block_device(&mut self, new_size: u64) -> LpResult<()> {
        let max_end_sector = self
            .partitions
            .iter()
            .flat_map(|p| p.extents.iter())
            .filter(|e| e.is_linear())
            .map(|e| e.target_data + e.num_sectors)
            .max()
            .unwrap_or(0);
        if new_size < max_end_sector * LP_SECTOR_SIZE {
            return Err(LpError::Capacity {
                reason: format!(
                    "new size {new_size} is below the end of the last allocated extent ({} bytes)",
                    max_end_sector * LP_SECTOR_SIZE
                ),
            });
        }
        self.block_devices[0].size = new_size;
        Ok(())
    }

    // ---- the allocator -----------------------------------------------------

    /// Free regions on block device 0, as `(start_sector, length_sectors)`
    /// pairs, ascending by start, pairwise disjoint.
    pub fn free_regions(&self) -> Vec<(u64, u64)> {
        let device = &self.block_devices[0];
        let reserved_tail_sectors =
            self.geometry.metadata_max_size as u64 * self.geometry.metadata_slot_count as u64 / LP_SECTOR_SIZE;
        let last = device.size / LP_SECTOR_SIZE - reserved_tail_sectors;

        let mut occupied: Vec<(u64, u64)> = self
            .partitions
            .iter()
            .flat_map(|p| p.extents.iter())
            .filter(|e| e.is_linear())
            .map(|e| (e.target_data, e.num_sectors))
            .collect();
        occupied.sort_by_key(|&(start, _)| start);

        let mut regions = Vec::new();
        let mut cur = device.first_logical_sector;
        for (start, len) in occupied {
            if start > cur {
                regions.push((cur, start - cur));
            }
            cur = cur.max(start + len);
        }
        if cur < last {
            regions.push((cur, last - cur));
        }
        regions
    }

    fn plan_grow(&self, needed_sectors: u64) -> Option<Vec<ExtentRecord>> {
        let device = &self.block_devices[0];
        let mut needed = needed_sectors;
        let mut planned = Vec::new();
        for (start, len) in self.free_regions() {
            if needed == 0 {
                break;
            }
            let s = advance_aligned(start, device.alignment, device.alignment_offset);
            if s >= start + len {
                continue;
            }
            let available = start + len - s;
            let alloc = available.min(needed);
            planned.push(ExtentRecord {
                num_sectors: alloc,
                target_type: LP_TARGET_TYPE_LINEAR,
                target_data: s,
                target_source: 0,
            });
            needed -= alloc;
        }
        if needed == 0 {
            Some(planned)
        } else {
            None
        }
    }

    fn shrink_extents(extents: &[ExtentRecord], budget_sectors: u64) -> Vec<ExtentRecord> {
        let mut kept = Vec::new();
        let mut used = 0u64;
        for e in extents {
            if used >= budget_sectors {
                break;
            }
            let remaining_budget = budget_sectors - used;
            if e.num_sectors <= remaining_budget {
                kept.push(*e);
                used += e.num_sectors;
            } else {
                kept.push(ExtentRecord {
                    num_sectors: remaining_budget,
                    ..*e
                });
                used += remaining_budget;
                break;
            }
        }
        kept
    }

    /// Resize a partition to `requested_size` bytes. No-op if equal to the
    /// current size. Growth is validated against group capacity and
    /// against aligned free-space availability before any extent is
    /// appended; a rejected grow leaves the partition unchanged.
    pub fn resize_partition(&mut self, name: &str, requested_size: u64) -> LpResult<()> {
        let idx = self
            .partitions
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| LpError::NotFound(name.to_string()))?;

        let current_sectors = self.partitions[idx].total_sectors();
        let requested_sectors = requested_size / LP_SECTOR_SIZE;

        if requested_sectors == current_sectors {
            return Ok(());
        }

        if requested_sectors < current_sectors {
            let new_extents = Self::shrink_extents(&self.partitions[idx].extents, requested_sectors);
            self.partitions[idx].extents = new_extents;
            return Ok(());
        }

        let group_name = self.partitions[idx].group_name.clone();
        let max_size = self.groups.iter().find(|g| g.name == group_name).map(|g| g.maximum_size).unwrap_or(0);
        if max_size > 0 {
            let current_linear_bytes = self.partitions[idx].linear_sectors() * LP_SECTOR_SIZE;
            let usage = self.group_usage_bytes(&group_name);
            let target_bytes = requested_sectors * LP_SECTOR_SIZE;
            let new_usage = usage - current_linear_bytes + target_bytes;
            if new_usage > max_size {
                return Err(LpError::Capacity {
                    reason: format!("group {group_name} usage would become {new_usage}, exceeding {max_size}"),
                });
            }
        }

        let delta = requested_sectors - current_sectors;
        match self.plan_grow(delta) {
            Some(new_extents) => {
                self.partitions[idx].extents.extend(new_extents);
                Ok(())
            }
            None => Err(LpError::Capacity {
                reason: format!("not enough aligned free space to grow {name} by {delta} sectors"),
            }),
        }
    }

    /// Replace every partition's extents with a single linear extent,
    /// packed back-to-back from `first_logical_sector`, respecting device
    /// alignment. Fails with `CapacityError` without mutating anything if
    /// the packed layout would run past the usable region — callers
    /// should `resize_block_device` first if needed.
    pub fn compact_partitions(&mut self) -> LpResult<()> {
        let device = self.block_devices[0].clone();
        let reserved_tail_sectors =
            self.geometry.metadata_max_size as u64 * self.geometry.metadata_slot_count as u64 / LP_SECTOR_SIZE;
        let upper_bound = device.size / LP_SECTOR_SIZE - reserved_tail_sectors;

        let mut cur = device.first_logical_sector;
        for p in &self.partitions {
            let sectors = p.total_sectors();
            if sectors == 0 {
                continue;
            }
            cur = advance_aligned(cur, device.alignment, device.alignment_offset);
            cur += sectors;
        }
        if cur > upper_bound {
            return Err(LpError::Capacity {
                reason: format!("compacted layout needs {cur} sectors, usable space ends at {upper_bound}"),
            });
        }

        let mut cur = device.first_logical_sector;
        for p in &mut self.partitions {
            let sectors = p.total_sectors();
            if sectors == 0 {
                continue;
            }
            cur = advance_aligned(cur, device.alignment, device.alignment_offset);
            p.extents = vec![ExtentRecord {
                num_sectors: sectors,
                target_type: LP_TARGET_TYPE_LINEAR,
                target_data: cur,
                target_source: 0,
            }];
            cur += sectors;
        }
        Ok(())
    }

    pub fn group_usage(&self, name: &str) -> u64 {
        self.group_usage_bytes(name)
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    // ---- export --------------------------------------------------------

    /// Assemble the current editor state into a wire-ready `LpMetadata`.
    /// Header table descriptors are left at defaults; the codec populates
    /// them on serialization.
    pub fn build(&self) -> LpMetadata {
        let group_index_by_name: HashMap<&str, u32> =
            self.groups.iter().enumerate().map(|(i, g)| (g.name.as_str(), i as u32)).collect();

        let mut extents = Vec::new();
        let mut partitions = Vec::with_capacity(self.partitions.len());
        for p in &self.partitions {
            let first_extent_index = extents.len() as u32;
            extents.extend(p.extents.iter().copied());
            partitions.push(PartitionRecord {
                name: NameBuffer::from(p.name.as_str()),
                attributes: p.attributes,
                first_extent_index,
                num_extents: p.extents.len() as u32,
                group_index: *group_index_by_name.get(p.group_name.as_str()).unwrap_or(&0),
            });
        }

        let groups = self
            .groups
            .iter()
            .map(|g| GroupRecord {
                name: NameBuffer::from(g.name.as_str()),
                flags: g.flags,
                maximum_size: g.maximum_size,
            })
            .collect();

        let block_devices = self
            .block_devices
            .iter()
            .map(|d| BlockDeviceRecord {
                first_logical_sector: d.first_logical_sector,
                alignment: d.alignment,
                alignment_offset: d.alignment_offset,
                size: d.size,
                partition_name: NameBuffer::from(d.partition_name.as_str()),
                flags: d.flags,
            })
            .collect();

        let header = Header::new();

        LpMetadata {
            geometry: self.geometry,
            header,
            partitions,
            extents,
            groups,
            block_devices,
        }
    }

    pub fn export(&self) -> LpMetadata {
        self.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_editor() -> LpMetadataEditor {
        LpMetadataEditor::new(1024 * 1024 * 1024, 65536, 2)
    }

    #[test]
    fn add_and_resize_partition() {
        let mut ed = new_editor();
        ed.add_group("main", 512 * 1024 * 1024).unwrap();
        ed.add_partition("system_a", "main", 0).unwrap();
        ed.resize_partition("system_a", 256 * 1024 * 1024).unwrap();
        assert_eq!(ed.partition("system_a").unwrap().size_bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn duplicate_partition_name_rejected() {
        let mut ed = new_editor();
        ed.add_partition("p1", "default", 0).unwrap();
        let err = ed.add_partition("p1", "default", 0).unwrap_err();
        assert!(matches!(err, LpError::AlreadyExists(_)));
    }

    #[test]
    fn add_partition_missing_group_rejected() {
        let mut ed = new_editor();
        let err = ed.add_partition("p1", "missing", 0).unwrap_err();
        assert!(matches!(err, LpError::NotFound(_)));
    }

    #[test]
    fn default_group_cannot_be_removed() {
        let mut ed = new_editor();
        let err = ed.remove_group("default").unwrap_err();
        assert!(matches!(err, LpError::Invariant(_)));
    }

    #[test]
    fn in_use_group_cannot_be_removed() {
        let mut ed = new_editor();
        ed.add_group("g1", 0).unwrap();
        ed.add_partition("p1", "g1", 0).unwrap();
        let err = ed.remove_group("g1").unwrap_err();
        assert!(matches!(err, LpError::Invariant(_)));
    }

    #[test]
    fn group_capacity_rejects_oversized_resize() {
        let mut ed = new_editor();
        ed.add_group("g1", 1024 * 1024 * 1024).unwrap();
        ed.add_partition("p1", "g1", 0).unwrap();
        ed.resize_partition("p1", 900 * 1024 * 1024).unwrap();
        let err = ed.resize_partition("p1", (1.1 * 1024.0 * 1024.0 * 1024.0) as u64).unwrap_err();
        assert!(matches!(err, LpError::Capacity { .. }));
        assert_eq!(ed.partition("p1").unwrap().size_bytes(), 900 * 1024 * 1024 / 512 * 512);
    }

    #[test]
    fn resize_group_below_usage_rejected() {
        let mut ed = new_editor();
        ed.add_group("g1", 0).unwrap();
        ed.add_partition("p1", "g1", 0).unwrap();
        ed.resize_partition("p1", 100 * 1024 * 1024).unwrap();
        let err = ed.resize_group("g1", 10 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, LpError::Capacity { .. }));
    }

    #[test]
    fn free_regions_are_disjoint_and_sorted() {
        let mut ed = new_editor();
        ed.add_partition("p1", "default", 0).unwrap();
        ed.add_partition("p2", "default", 0).unwrap();
        ed.resize_partition("p1", 10 * 1024 * 1024).unwrap();
        ed.resize_partition("p2", 10 * 1024 * 1024).unwrap();

        let regions = ed.free_regions();
        for w in regions.windows(2) {
            assert!(w[0].0 + w[0].1 <= w[1].0);
        }
    }

    #[test]
    fn grow_extents_are_aligned() {
        let mut ed = new_editor();
        ed.add_partition("p1", "default", 0).unwrap();
        ed.resize_partition("p1", 10 * 1024 * 1024).unwrap();
        for e in &ed.partition("p1").unwrap().extents {
            let bytes_offset = e.target_data * LP_SECTOR_SIZE;
            assert_eq!((bytes_offset - 0) % 4096, 0);
        }
    }

    #[test]
    fn compaction_produces_single_nondecreasing_extents() {
        let mut ed = new_editor();
        ed.add_partition("p1", "default", 0).unwrap();
        ed.add_partition("p2", "default", 0).unwrap();
        ed.resize_partition("p1", 10 * 1024 * 1024).unwrap();
        ed.resize_partition("p2", 5 * 1024 * 1024).unwrap();
        ed.compact_partitions().unwrap();

        let mut last_start = 0u64;
        for p in ed.partitions() {
            assert_eq!(p.extents.len(), 1);
            assert!(p.extents[0].target_data >= last_start);
            last_start = p.extents[0].target_data;
        }
    }

    #[test]
    fn reorder_preserves_unnamed_partitions_at_tail() {
        let mut ed = new_editor();
        ed.add_partition("a", "default", 0).unwrap();
        ed.add_partition("b", "default", 0).unwrap();
        ed.add_partition("c", "default", 0).unwrap();
        ed.reorder_partitions(&["c".to_string(), "a".to_string()]);
        let names: Vec<&str> = ed.partitions().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn resize_block_device_rejects_shrinking_below_used_extents() {
        let mut ed = new_editor();
        ed.add_partition("p1", "default", 0).unwrap();
        ed.resize_partition("p1", 1024 * 512).unwrap(); // 1024 sectors starting somewhere
        let max_end = ed.partition("p1").unwrap().extents[0].target_data + ed.partition("p1").unwrap().extents[0].num_sectors;

        ed.resize_block_device(max_end * 512 + 4096).unwrap();
        let err = ed.resize_block_device(max_end * 512 - 512).unwrap_err();
        assert!(matches!(err, LpError::Capacity { .. }));
    }
}
