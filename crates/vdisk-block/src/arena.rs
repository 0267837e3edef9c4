//! Physical block arena and free-list allocator
//!
//! The arena owns every physical block buffer and its metadata record.
//! Blocks are addressed by [`PhysicalBlockId`] in one contiguous range
//! `[1, N]`; internally they are spread across storage regions, which is
//! invisible to callers.
//!
//! ```text
//! id:      1 ........ 200 | 201 ............. 500
//! region:  0              | 1
//! free list (FIFO):  front → [7, 8, 9, ...] ← back (freed ids appended)
//! ```
//!
//! Each block owns an independently allocated, fixed-capacity buffer.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, warn};
use vdisk_common::{ArenaConfig, PhysicalBlockId, VolumeId};

use crate::error::{BlockError, BlockResult};
use crate::fault::{FaultInjector, NoFaults};
use crate::metadata::{AllocationState, BlockMetadata};

/// Blocks per line in the allocation map rendering
const MAP_LINE_WIDTH: usize = 25;

/// Mutable arena state, guarded by one lock
struct ArenaState {
    /// Block buffers, grouped by storage region
    regions: Vec<Vec<Box<[u8]>>>,
    /// Metadata indexed by `PhysicalBlockId::index`
    metadata: Vec<BlockMetadata>,
    /// Free block ids, allocated from the front
    free_list: VecDeque<PhysicalBlockId>,
}

/// Fixed-capacity arena of physical blocks
pub struct BlockArena {
    block_size: usize,
    block_count: u32,
    /// First arena index of each region
    region_starts: Vec<usize>,
    state: Mutex<ArenaState>,
    faults: Box<dyn FaultInjector>,
}

impl BlockArena {
    /// Create an arena from configuration
    pub fn new(config: &ArenaConfig, faults: Box<dyn FaultInjector>) -> BlockResult<Self> {
        config.validate()?;
        Ok(Self::build(config, faults))
    }

    /// Create a single-region arena with no fault injection
    ///
    /// # Panics
    ///
    /// Panics if `block_count` or `block_size` is zero.
    #[must_use]
    pub fn with_capacity(block_count: u32, block_size: usize) -> Self {
        assert!(block_count > 0, "Block count must be positive");
        assert!(block_size > 0, "Block size must be positive");
        Self::build(
            &ArenaConfig::single_region(block_count, block_size),
            Box::new(NoFaults),
        )
    }

    /// Replace the fault injector
    #[must_use]
    pub fn with_fault_injector(mut self, faults: Box<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    fn build(config: &ArenaConfig, faults: Box<dyn FaultInjector>) -> Self {
        let block_size = config.block_size;
        let mut region_starts = Vec::with_capacity(config.region_sizes.len());
        let mut regions = Vec::with_capacity(config.region_sizes.len());
        let mut start = 0usize;
        for &size in &config.region_sizes {
            region_starts.push(start);
            regions.push(
                (0..size)
                    .map(|_| vec![0u8; block_size].into_boxed_slice())
                    .collect::<Vec<_>>(),
            );
            start += size as usize;
        }

        let count = config.block_count as usize;
        Self {
            block_size,
            block_count: config.block_count,
            region_starts,
            state: Mutex::new(ArenaState {
                regions,
                metadata: vec![BlockMetadata::default(); count],
                free_list: (0..count).map(PhysicalBlockId::from_index).collect(),
            }),
            faults,
        }
    }

    /// Payload capacity of one block
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of physical blocks
    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Number of storage regions backing the arena
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.region_starts.len()
    }

    /// Number of blocks on the free list
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    fn check_id(&self, id: PhysicalBlockId) -> BlockResult<usize> {
        if id.get() == 0 || id.get() > self.block_count {
            return Err(BlockError::InvalidPhysicalId {
                id: id.get(),
                block_count: self.block_count,
            });
        }
        Ok(id.index())
    }

    /// Map an arena index to (region, offset within region)
    fn locate(&self, index: usize) -> (usize, usize) {
        let region = self.region_starts.partition_point(|&start| start <= index) - 1;
        (region, index - self.region_starts[region])
    }

    /// Allocate `count` blocks to `owner` from the front of the free list
    ///
    /// Either all `count` blocks are allocated or none are.
    pub fn allocate(&self, count: usize, owner: &VolumeId) -> BlockResult<Vec<PhysicalBlockId>> {
        let mut state = self.state.lock();
        let available = state.free_list.len();
        if count > available {
            return Err(BlockError::OutOfSpace {
                requested: count,
                available,
            });
        }

        let ids: Vec<PhysicalBlockId> = state.free_list.drain(..count).collect();
        for id in &ids {
            let meta = &mut state.metadata[id.index()];
            meta.state = AllocationState::Allocated;
            meta.owner = Some(owner.clone());
        }

        debug!(
            "Allocated {} blocks to volume {}, {} free",
            count,
            owner,
            state.free_list.len()
        );
        Ok(ids)
    }

    /// Return blocks to the free list and reset their metadata
    ///
    /// `media_error` survives the reset. Ids that are invalid or already
    /// free are skipped.
    pub fn free(&self, ids: &[PhysicalBlockId]) {
        let mut state = self.state.lock();
        let mut released = 0usize;
        for &id in ids {
            let Ok(index) = self.check_id(id) else {
                warn!("Ignoring free of invalid block {}", id);
                continue;
            };
            if state.metadata[index].is_free() {
                warn!("Ignoring free of unallocated block {}", id);
                continue;
            }
            state.metadata[index].reset();
            state.free_list.push_back(id);
            released += 1;
        }
        debug!(
            "Freed {} blocks, {} free",
            released,
            state.free_list.len()
        );
    }

    /// Copy `data` into a block's buffer
    pub fn write_raw(&self, id: PhysicalBlockId, data: &[u8]) -> BlockResult<()> {
        let index = self.check_id(id)?;
        if data.len() > self.block_size {
            return Err(BlockError::PayloadTooLarge {
                length: data.len(),
                block_size: self.block_size,
            });
        }

        let (region, offset) = self.locate(index);
        let mut state = self.state.lock();
        if state.metadata[index].media_error {
            return Err(BlockError::MediaError(id));
        }
        state.regions[region][offset][..data.len()].copy_from_slice(data);
        state.metadata[index].occupied_size = data.len();
        Ok(())
    }

    /// Copy up to `buf.len()` valid bytes out of a block
    ///
    /// Returns the number of bytes copied; a block that was never written
    /// yields 0. The fault injector is consulted before any data is copied.
    pub fn read_raw(&self, id: PhysicalBlockId, buf: &mut [u8]) -> BlockResult<usize> {
        let index = self.check_id(id)?;
        let (region, offset) = self.locate(index);
        let state = self.state.lock();
        let meta = &state.metadata[index];
        if meta.media_error {
            return Err(BlockError::MediaError(id));
        }
        if self.faults.should_fail_read(id) {
            return Err(BlockError::TransientFailure(id));
        }

        let len = buf.len().min(meta.occupied_size);
        buf[..len].copy_from_slice(&state.regions[region][offset][..len]);
        Ok(len)
    }

    /// Flag a block as permanently bad
    pub fn mark_media_error(&self, id: PhysicalBlockId) -> BlockResult<()> {
        let index = self.check_id(id)?;
        let mut state = self.state.lock();
        if !state.metadata[index].media_error {
            warn!("Marking physical block {} as bad", id);
        }
        state.metadata[index].media_error = true;
        Ok(())
    }

    /// Copy of a block's metadata record
    pub fn metadata(&self, id: PhysicalBlockId) -> BlockResult<BlockMetadata> {
        let index = self.check_id(id)?;
        Ok(self.state.lock().metadata[index].clone())
    }

    /// Copy a block's metadata and valid payload without consulting the
    /// fault injector
    pub fn capture(&self, id: PhysicalBlockId) -> BlockResult<(BlockMetadata, Bytes)> {
        let index = self.check_id(id)?;
        let (region, offset) = self.locate(index);
        let state = self.state.lock();
        let meta = state.metadata[index].clone();
        let data = Bytes::copy_from_slice(&state.regions[region][offset][..meta.occupied_size]);
        Ok((meta, data))
    }

    /// Overwrite a block's metadata and payload with a captured copy
    ///
    /// Current replica links are kept; everything else, including
    /// `media_error`, comes from `meta`.
    pub fn restore(
        &self,
        id: PhysicalBlockId,
        meta: &BlockMetadata,
        data: &[u8],
    ) -> BlockResult<()> {
        let index = self.check_id(id)?;
        if data.len() > self.block_size {
            return Err(BlockError::PayloadTooLarge {
                length: data.len(),
                block_size: self.block_size,
            });
        }

        let (region, offset) = self.locate(index);
        let mut state = self.state.lock();
        let current = &state.metadata[index];
        let restored = BlockMetadata {
            occupied_size: data.len(),
            replica_target: current.replica_target,
            replica_of: current.replica_of,
            ..meta.clone()
        };
        state.metadata[index] = restored;
        state.regions[region][offset][..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Record `replica` as the redundant copy of `primary`
    pub fn link_replica(
        &self,
        primary: PhysicalBlockId,
        replica: PhysicalBlockId,
    ) -> BlockResult<()> {
        let primary_index = self.check_id(primary)?;
        let replica_index = self.check_id(replica)?;
        let mut state = self.state.lock();
        state.metadata[primary_index].replica_target = Some(replica);
        state.metadata[replica_index].replica_of = Some(primary);
        Ok(())
    }

    /// Drop the replica link of `primary`, returning the former replica
    pub fn unlink_replica(
        &self,
        primary: PhysicalBlockId,
    ) -> BlockResult<Option<PhysicalBlockId>> {
        let index = self.check_id(primary)?;
        let mut state = self.state.lock();
        let replica = state.metadata[index].replica_target.take();
        if let Some(replica) = replica {
            state.metadata[replica.index()].replica_of = None;
        }
        Ok(replica)
    }

    /// First id in `candidates` usable as a fresh replica target
    #[must_use]
    pub fn find_replica_candidate(
        &self,
        candidates: &[PhysicalBlockId],
    ) -> Option<PhysicalBlockId> {
        let state = self.state.lock();
        candidates.iter().copied().find(|id| {
            self.check_id(*id)
                .is_ok_and(|index| state.metadata[index].is_replica_candidate())
        })
    }

    /// Owner of every physical block
    #[must_use]
    pub fn allocation_map(&self) -> AllocationMap {
        let state = self.state.lock();
        AllocationMap {
            owners: state
                .metadata
                .iter()
                .map(|meta| match (&meta.state, &meta.owner) {
                    (AllocationState::Allocated, Some(owner)) => BlockOwner::Volume(owner.clone()),
                    _ => BlockOwner::Free,
                })
                .collect(),
        }
    }
}

impl fmt::Debug for BlockArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockArena")
            .field("block_count", &self.block_count)
            .field("block_size", &self.block_size)
            .field("regions", &self.region_starts.len())
            .field("free", &self.free_count())
            .field("faults", &self.faults)
            .finish()
    }
}

/// Owner of a physical block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BlockOwner {
    Free,
    Volume(VolumeId),
}

/// Point-in-time ownership of every physical block
#[derive(Debug, Clone, Serialize)]
pub struct AllocationMap {
    owners: Vec<BlockOwner>,
}

impl AllocationMap {
    /// Owner of one block
    #[must_use]
    pub fn owner(&self, id: PhysicalBlockId) -> Option<&BlockOwner> {
        self.owners.get(id.index())
    }

    /// Iterate over (id, owner) in id order
    pub fn iter(&self) -> impl Iterator<Item = (PhysicalBlockId, &BlockOwner)> {
        self.owners
            .iter()
            .enumerate()
            .map(|(index, owner)| (PhysicalBlockId::from_index(index), owner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.owners
            .iter()
            .filter(|owner| **owner == BlockOwner::Free)
            .count()
    }

    /// Number of blocks owned by `volume`
    #[must_use]
    pub fn owned_by(&self, volume: &str) -> usize {
        self.owners
            .iter()
            .filter(|owner| matches!(owner, BlockOwner::Volume(id) if id.as_str() == volume))
            .count()
    }
}

impl fmt::Display for AllocationMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, owner) in self.owners.iter().enumerate() {
            if index > 0 {
                let separator = if index % MAP_LINE_WIDTH == 0 { "\n" } else { " " };
                f.write_str(separator)?;
            }
            match owner {
                BlockOwner::Free => f.write_str("__")?,
                BlockOwner::Volume(id) => write!(f, "{id}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FailBlock;
    use vdisk_common::EngineConfig;

    fn id(n: u32) -> PhysicalBlockId {
        PhysicalBlockId::new(n).unwrap()
    }

    fn vol(name: &str) -> VolumeId {
        VolumeId::new(name).unwrap()
    }

    #[test]
    fn test_default_arena_spans_regions() {
        let arena = BlockArena::new(&EngineConfig::default().arena, Box::new(NoFaults)).unwrap();
        assert_eq!(arena.block_count(), 500);
        assert_eq!(arena.region_count(), 2);
        assert_eq!(arena.free_count(), 500);

        // Blocks on both sides of the region boundary are independent
        for n in [1, 200, 201, 300, 500] {
            arena.write_raw(id(n), format!("block-{n}").as_bytes()).unwrap();
        }
        for n in [1, 200, 201, 300, 500] {
            let mut buf = [0u8; 16];
            let len = arena.read_raw(id(n), &mut buf).unwrap();
            assert_eq!(&buf[..len], format!("block-{n}").as_bytes());
        }
    }

    #[test]
    fn test_buffers_are_not_aliased() {
        let arena = BlockArena::with_capacity(4, 8);
        arena.write_raw(id(1), b"aaaa").unwrap();
        arena.write_raw(id(2), b"bb").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(arena.read_raw(id(1), &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"aaaa");
        assert_eq!(arena.read_raw(id(3), &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_write_validation() {
        let arena = BlockArena::with_capacity(4, 8);
        assert!(matches!(
            arena.write_raw(id(5), b"x"),
            Err(BlockError::InvalidPhysicalId { id: 5, .. })
        ));
        assert!(matches!(
            arena.write_raw(id(1), &[0u8; 9]),
            Err(BlockError::PayloadTooLarge {
                length: 9,
                block_size: 8
            })
        ));
        arena.write_raw(id(1), &[7u8; 8]).unwrap();

        arena.mark_media_error(id(1)).unwrap();
        assert_eq!(
            arena.write_raw(id(1), b"x"),
            Err(BlockError::MediaError(id(1)))
        );
        let mut buf = [0u8; 8];
        assert_eq!(
            arena.read_raw(id(1), &mut buf),
            Err(BlockError::MediaError(id(1)))
        );
    }

    #[test]
    fn test_read_truncates_to_buffer() {
        let arena = BlockArena::with_capacity(2, 100);
        arena.write_raw(id(1), b"shubham").unwrap();

        let mut small = [0u8; 2];
        assert_eq!(arena.read_raw(id(1), &mut small).unwrap(), 2);
        assert_eq!(&small, b"sh");

        let mut large = [0u8; 10];
        assert_eq!(arena.read_raw(id(1), &mut large).unwrap(), 7);
        assert_eq!(&large[..7], b"shubham");
    }

    #[test]
    fn test_injected_failure_leaves_buffer_untouched() {
        let arena =
            BlockArena::with_capacity(2, 8).with_fault_injector(Box::new(FailBlock(id(1))));
        arena.write_raw(id(1), b"data").unwrap();

        let mut buf = [9u8; 8];
        assert_eq!(
            arena.read_raw(id(1), &mut buf),
            Err(BlockError::TransientFailure(id(1)))
        );
        assert_eq!(buf, [9u8; 8]);
        // Transient failures do not set the sticky flag
        assert!(!arena.metadata(id(1)).unwrap().media_error);
    }

    #[test]
    fn test_allocate_is_fifo_and_atomic() {
        let arena = BlockArena::with_capacity(6, 8);
        let a = arena.allocate(4, &vol("A")).unwrap();
        assert_eq!(a, vec![id(1), id(2), id(3), id(4)]);
        assert_eq!(arena.free_count(), 2);

        assert_eq!(
            arena.allocate(3, &vol("B")),
            Err(BlockError::OutOfSpace {
                requested: 3,
                available: 2
            })
        );
        assert_eq!(arena.free_count(), 2);

        arena.free(&a[..2]);
        let b = arena.allocate(4, &vol("B")).unwrap();
        assert_eq!(b, vec![id(5), id(6), id(1), id(2)]);
        assert_eq!(arena.metadata(id(1)).unwrap().owner, Some(vol("B")));
    }

    #[test]
    fn test_free_resets_metadata_but_keeps_media_error() {
        let arena = BlockArena::with_capacity(2, 8);
        let ids = arena.allocate(2, &vol("A")).unwrap();
        arena.write_raw(ids[0], b"abc").unwrap();
        arena.link_replica(ids[0], ids[1]).unwrap();
        arena.mark_media_error(ids[0]).unwrap();

        arena.free(&ids);
        // Double free is ignored
        arena.free(&ids);
        assert_eq!(arena.free_count(), 2);

        let meta = arena.metadata(ids[0]).unwrap();
        assert!(meta.is_free());
        assert_eq!(meta.occupied_size, 0);
        assert!(meta.owner.is_none());
        assert!(meta.replica_target.is_none());
        assert!(meta.media_error);
        assert!(arena.metadata(ids[1]).unwrap().replica_of.is_none());
    }

    #[test]
    fn test_replica_links() {
        let arena = BlockArena::with_capacity(4, 8);
        let ids = arena.allocate(4, &vol("A")).unwrap();
        assert_eq!(arena.find_replica_candidate(&ids[2..]), Some(ids[2]));

        arena.link_replica(ids[0], ids[2]).unwrap();
        assert_eq!(arena.find_replica_candidate(&ids[2..]), Some(ids[3]));
        arena.mark_media_error(ids[3]).unwrap();
        assert_eq!(arena.find_replica_candidate(&ids[2..]), None);

        assert_eq!(arena.unlink_replica(ids[0]).unwrap(), Some(ids[2]));
        assert_eq!(arena.unlink_replica(ids[0]).unwrap(), None);
        assert_eq!(arena.find_replica_candidate(&ids[2..]), Some(ids[2]));
    }

    #[test]
    fn test_capture_and_restore() {
        let arena = BlockArena::with_capacity(3, 8);
        let ids = arena.allocate(3, &vol("A")).unwrap();
        arena.write_raw(ids[0], b"before").unwrap();
        let (meta, data) = arena.capture(ids[0]).unwrap();
        assert_eq!(&data[..], b"before");

        arena.write_raw(ids[0], b"after!!").unwrap();
        arena.link_replica(ids[0], ids[1]).unwrap();
        arena.mark_media_error(ids[0]).unwrap();

        arena.restore(ids[0], &meta, &data).unwrap();
        let restored = arena.metadata(ids[0]).unwrap();
        assert!(!restored.media_error);
        assert_eq!(restored.occupied_size, 6);
        assert_eq!(restored.replica_target, Some(ids[1]));

        let mut buf = [0u8; 8];
        let len = arena.read_raw(ids[0], &mut buf).unwrap();
        assert_eq!(&buf[..len], b"before");
    }

    #[test]
    fn test_allocation_map() {
        let arena = BlockArena::with_capacity(4, 8);
        arena.allocate(2, &vol("A")).unwrap();

        let map = arena.allocation_map();
        assert_eq!(map.len(), 4);
        assert_eq!(map.owned_by("A"), 2);
        assert_eq!(map.free_count(), 2);
        assert_eq!(map.owner(id(1)), Some(&BlockOwner::Volume(vol("A"))));
        assert_eq!(map.to_string(), "A A __ __");
    }
}
