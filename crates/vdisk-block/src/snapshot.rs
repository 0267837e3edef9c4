//! Point-in-time checkpoints of a volume's primary blocks
//!
//! A snapshot holds a copy of the metadata and valid payload of every
//! primary block, by logical position. Replica blocks are never captured.
//! Snapshots are append-only and indexed from 0 in creation order; there is
//! no pruning, so memory grows with `snapshots × logical_size × block_size`.

use bytes::Bytes;
use tracing::{debug, warn};
use vdisk_common::PhysicalBlockId;

use crate::arena::BlockArena;
use crate::error::{BlockError, BlockResult};
use crate::metadata::BlockMetadata;

/// One captured block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedBlock {
    /// Metadata at capture time, without replica links
    pub metadata: BlockMetadata,
    /// Valid payload at capture time
    pub data: Bytes,
}

/// Immutable capture of a volume's logical view
#[derive(Debug, Clone)]
pub struct Snapshot {
    index: usize,
    blocks: Vec<CapturedBlock>,
}

impl Snapshot {
    /// Position in the volume's snapshot list
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Captured blocks in logical order (logical block `n` at `n - 1`)
    #[must_use]
    pub fn blocks(&self) -> &[CapturedBlock] {
        &self.blocks
    }
}

/// Ordered snapshot list of one volume
#[derive(Debug, Default)]
pub struct SnapshotManager {
    snapshots: Vec<Snapshot>,
}

impl SnapshotManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshot at `index`
    pub fn get(&self, index: usize) -> BlockResult<&Snapshot> {
        self.snapshots
            .get(index)
            .ok_or(BlockError::InvalidSnapshotIndex {
                index,
                count: self.snapshots.len(),
            })
    }

    /// Capture `primary_blocks` and append the result; returns its index
    pub fn checkpoint(
        &mut self,
        arena: &BlockArena,
        primary_blocks: &[PhysicalBlockId],
    ) -> BlockResult<usize> {
        let blocks = primary_blocks
            .iter()
            .map(|&id| {
                let (metadata, data) = arena.capture(id)?;
                Ok(CapturedBlock {
                    metadata: metadata.logical_view(),
                    data,
                })
            })
            .collect::<BlockResult<Vec<_>>>()?;

        let index = self.snapshots.len();
        self.snapshots.push(Snapshot { index, blocks });
        debug!("Created snapshot {} of {} blocks", index, primary_blocks.len());
        Ok(index)
    }

    /// Restore `primary_blocks` from snapshot `index`
    ///
    /// Each position is restored into the block currently mapped there. A
    /// block with a replica has the restored bytes written through to it.
    /// The snapshot list itself is unchanged.
    pub fn rollback(
        &self,
        arena: &BlockArena,
        primary_blocks: &[PhysicalBlockId],
        index: usize,
    ) -> BlockResult<()> {
        let snapshot = self.get(index)?;

        for (&id, captured) in primary_blocks.iter().zip(&snapshot.blocks) {
            arena.restore(id, &captured.metadata, &captured.data)?;
            if let Some(replica) = arena.metadata(id)?.replica_target
                && let Err(err) = arena.write_raw(replica, &captured.data)
            {
                warn!(
                    "Failed to roll back replica {} of block {}: {}",
                    replica, id, err
                );
            }
        }

        debug!("Rolled back {} blocks to snapshot {}", primary_blocks.len(), index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_common::VolumeId;

    fn setup(blocks: usize) -> (BlockArena, Vec<PhysicalBlockId>) {
        let arena = BlockArena::with_capacity(16, 16);
        let ids = arena
            .allocate(blocks, &VolumeId::new("A").unwrap())
            .unwrap();
        (arena, ids)
    }

    fn read(arena: &BlockArena, id: PhysicalBlockId) -> Vec<u8> {
        let mut buf = [0u8; 16];
        let len = arena.read_raw(id, &mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn test_indices_are_sequential() {
        let (arena, ids) = setup(3);
        let mut snapshots = SnapshotManager::new();
        assert!(snapshots.is_empty());
        assert_eq!(snapshots.checkpoint(&arena, &ids).unwrap(), 0);
        assert_eq!(snapshots.checkpoint(&arena, &ids).unwrap(), 1);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots.get(1).unwrap().index(), 1);
        assert_eq!(snapshots.get(1).unwrap().blocks().len(), 3);
    }

    #[test]
    fn test_rollback_restores_bytes_and_size() {
        let (arena, ids) = setup(2);
        let mut snapshots = SnapshotManager::new();
        arena.write_raw(ids[0], b"cloud").unwrap();
        let s0 = snapshots.checkpoint(&arena, &ids).unwrap();

        arena.write_raw(ids[0], b"x").unwrap();
        arena.write_raw(ids[1], b"assignment").unwrap();
        let s1 = snapshots.checkpoint(&arena, &ids).unwrap();

        snapshots.rollback(&arena, &ids, s0).unwrap();
        assert_eq!(read(&arena, ids[0]), b"cloud");
        assert_eq!(read(&arena, ids[1]), b"");

        snapshots.rollback(&arena, &ids, s1).unwrap();
        assert_eq!(read(&arena, ids[0]), b"x");
        assert_eq!(read(&arena, ids[1]), b"assignment");
    }

    #[test]
    fn test_rollback_rejects_unknown_index() {
        let (arena, ids) = setup(1);
        let snapshots = SnapshotManager::new();
        assert_eq!(
            snapshots.rollback(&arena, &ids, 0),
            Err(BlockError::InvalidSnapshotIndex { index: 0, count: 0 })
        );
    }

    #[test]
    fn test_snapshot_excludes_replica_links_and_writes_through() {
        let (arena, ids) = setup(2);
        let mut snapshots = SnapshotManager::new();
        arena.write_raw(ids[0], b"old").unwrap();
        arena.link_replica(ids[0], ids[1]).unwrap();
        arena.write_raw(ids[1], b"old").unwrap();

        let s0 = snapshots.checkpoint(&arena, &ids[..1]).unwrap();
        assert!(snapshots.get(s0).unwrap().blocks()[0].metadata.replica_target.is_none());

        arena.write_raw(ids[0], b"new").unwrap();
        arena.write_raw(ids[1], b"new").unwrap();
        snapshots.rollback(&arena, &ids[..1], s0).unwrap();

        assert_eq!(arena.metadata(ids[0]).unwrap().replica_target, Some(ids[1]));
        assert_eq!(read(&arena, ids[0]), b"old");
        assert_eq!(read(&arena, ids[1]), b"old");
    }

    #[test]
    fn test_rollback_clears_media_error() {
        let (arena, ids) = setup(1);
        let mut snapshots = SnapshotManager::new();
        arena.write_raw(ids[0], b"good").unwrap();
        let s0 = snapshots.checkpoint(&arena, &ids).unwrap();

        arena.mark_media_error(ids[0]).unwrap();
        snapshots.rollback(&arena, &ids, s0).unwrap();
        assert_eq!(read(&arena, ids[0]), b"good");
    }
}
