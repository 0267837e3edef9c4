//! Logical volumes with write-through replication
//!
//! A volume of `logical_size` blocks draws `2 × logical_size` physical
//! blocks from the arena: the first half serves as primaries (the
//! logical→physical map), the second half is a reserve pool from which
//! replicas are assigned on first write.
//!
//! ```text
//! logical:   1    2    3          reserve pool
//! primary: [p1] [p2] [p3]        [r1] [r2] [r3]
//!            │    │                ▲    ▲
//!            └────┼────────────────┘    │   replica_target
//!                 └─────────────────────┘
//! ```
//!
//! Reads fail over to the replica exactly once. A successful failover
//! promotes the replica to primary and tries to re-silver a fresh reserve
//! block as its new replica.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use vdisk_common::{PhysicalBlockId, VolumeId};

use crate::arena::BlockArena;
use crate::error::{BlockError, BlockResult};
use crate::metrics::EngineMetrics;
use crate::snapshot::SnapshotManager;

/// Redundancy outcome of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Replication {
    /// Primary and replica both hold the data
    Mirrored,
    /// No reserve block was free; the block has no replica
    Unavailable,
    /// A replica is assigned but writing it failed
    Degraded,
}

impl Replication {
    /// Whether the data exists on two blocks
    #[must_use]
    pub fn is_mirrored(self) -> bool {
        self == Self::Mirrored
    }
}

/// Read-only description of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub id: VolumeId,
    pub logical_size: usize,
    pub primary_blocks: Vec<PhysicalBlockId>,
    pub reserve_blocks: Vec<PhysicalBlockId>,
    pub snapshot_count: usize,
}

/// A logical block space backed by arena blocks
#[derive(Debug)]
pub struct Volume {
    id: VolumeId,
    logical_size: usize,
    /// Logical block `n` lives at `primary_blocks[n - 1]`
    primary_blocks: Vec<PhysicalBlockId>,
    /// Replica pool; promoted blocks leave it
    reserve_blocks: Vec<PhysicalBlockId>,
    /// Every block allocated to this volume, released on delete
    owned_blocks: Vec<PhysicalBlockId>,
    snapshots: SnapshotManager,
    released: bool,
    arena: Arc<BlockArena>,
    metrics: Arc<EngineMetrics>,
}

impl Volume {
    /// Allocate a volume of `logical_size` blocks plus an equal reserve
    pub fn create(
        arena: Arc<BlockArena>,
        metrics: Arc<EngineMetrics>,
        id: VolumeId,
        logical_size: usize,
    ) -> BlockResult<Self> {
        if logical_size == 0 {
            return Err(BlockError::InvalidSize(
                "Volume must have at least one block".to_string(),
            ));
        }
        let physical = logical_size.checked_mul(2).ok_or_else(|| {
            BlockError::InvalidSize(format!("{logical_size} blocks is too large"))
        })?;

        let owned_blocks = arena.allocate(physical, &id)?;
        let primary_blocks = owned_blocks[..logical_size].to_vec();
        let reserve_blocks = owned_blocks[logical_size..].to_vec();

        info!(
            "Created volume {} with {} blocks ({} physical)",
            id, logical_size, physical
        );
        Ok(Self {
            id,
            logical_size,
            primary_blocks,
            reserve_blocks,
            owned_blocks,
            snapshots: SnapshotManager::new(),
            released: false,
            arena,
            metrics,
        })
    }

    #[must_use]
    pub fn id(&self) -> &VolumeId {
        &self.id
    }

    #[must_use]
    pub fn logical_size(&self) -> usize {
        self.logical_size
    }

    /// Current logical→physical map
    #[must_use]
    pub fn primary_blocks(&self) -> &[PhysicalBlockId] {
        &self.primary_blocks
    }

    #[must_use]
    pub fn reserve_blocks(&self) -> &[PhysicalBlockId] {
        &self.reserve_blocks
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    #[must_use]
    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            id: self.id.clone(),
            logical_size: self.logical_size,
            primary_blocks: self.primary_blocks.clone(),
            reserve_blocks: self.reserve_blocks.clone(),
            snapshot_count: self.snapshots.len(),
        }
    }

    fn ensure_live(&self) -> BlockResult<()> {
        if self.released {
            return Err(BlockError::VolumeNotFound(self.id.to_string()));
        }
        Ok(())
    }

    /// Resolve a 1-based logical block number to (slot, physical id)
    fn resolve(&self, block_no: usize) -> BlockResult<(usize, PhysicalBlockId)> {
        self.ensure_live()?;
        if block_no == 0 || block_no > self.logical_size {
            return Err(BlockError::InvalidBlockNumber {
                block_no,
                logical_size: self.logical_size,
            });
        }
        let slot = block_no - 1;
        Ok((slot, self.primary_blocks[slot]))
    }

    /// Physical block currently serving `block_no`
    pub fn physical_block(&self, block_no: usize) -> BlockResult<PhysicalBlockId> {
        self.resolve(block_no).map(|(_, id)| id)
    }

    /// Write `data` to logical block `block_no`
    ///
    /// Errors from the primary write are returned as-is. Once the primary
    /// holds the data the call succeeds; the returned [`Replication`] says
    /// whether a replica holds it too.
    pub fn write_block(&mut self, block_no: usize, data: &[u8]) -> BlockResult<Replication> {
        let (_, primary) = self.resolve(block_no)?;
        self.arena.write_raw(primary, data)?;
        self.metrics.record_write();

        let replica = match self.arena.metadata(primary)?.replica_target {
            Some(replica) => replica,
            None => match self.arena.find_replica_candidate(&self.reserve_blocks) {
                Some(replica) => {
                    self.arena.link_replica(primary, replica)?;
                    replica
                }
                None => {
                    warn!(
                        "No reserve block for replica of volume {} block {}",
                        self.id, block_no
                    );
                    self.metrics.record_replication_unavailable();
                    return Ok(Replication::Unavailable);
                }
            },
        };

        match self.arena.write_raw(replica, data) {
            Ok(()) => Ok(Replication::Mirrored),
            Err(err) => {
                warn!(
                    "Replica write to block {} failed for volume {} block {}: {}",
                    replica, self.id, block_no, err
                );
                self.metrics.record_replica_write_failure();
                Ok(Replication::Degraded)
            }
        }
    }

    /// Read logical block `block_no` into `buf`, returning bytes copied
    ///
    /// A failed primary read marks the primary bad and is retried once
    /// against its replica.
    pub fn read_block(&mut self, block_no: usize, buf: &mut [u8]) -> BlockResult<usize> {
        let (slot, primary) = self.resolve(block_no)?;
        match self.arena.read_raw(primary, buf) {
            Ok(len) => {
                self.metrics.record_read();
                Ok(len)
            }
            Err(err) if err.is_read_failure() => {
                warn!(
                    "Read of volume {} block {} failed on block {}: {}",
                    self.id, block_no, primary, err
                );
                self.metrics.record_primary_read_error(&err);
                self.fail_over(slot, primary, buf)
            }
            Err(err) => Err(err),
        }
    }

    fn fail_over(
        &mut self,
        slot: usize,
        primary: PhysicalBlockId,
        buf: &mut [u8],
    ) -> BlockResult<usize> {
        let block_no = slot + 1;
        self.arena.mark_media_error(primary)?;

        let Some(replica) = self.arena.metadata(primary)?.replica_target else {
            return Err(self.unrecoverable(block_no));
        };

        let mut payload = vec![0u8; self.arena.block_size()];
        let len = match self.arena.read_raw(replica, &mut payload) {
            Ok(len) => len,
            Err(err) => {
                warn!(
                    "Replica read of volume {} block {} failed on block {}: {}",
                    self.id, block_no, replica, err
                );
                self.metrics.record_replica_read_error(&err);
                self.arena.mark_media_error(replica)?;
                return Err(self.unrecoverable(block_no));
            }
        };
        payload.truncate(len);

        let copied = len.min(buf.len());
        buf[..copied].copy_from_slice(&payload[..copied]);

        // The replica becomes the primary for this slot
        self.arena.unlink_replica(primary)?;
        self.primary_blocks[slot] = replica;
        self.reserve_blocks.retain(|&id| id != replica);
        self.metrics.record_failover();
        self.metrics.record_read();
        info!(
            "Volume {} block {} failed over from {} to {}",
            self.id, block_no, primary, replica
        );

        self.resilver(replica, &payload)?;
        Ok(copied)
    }

    /// Give `primary` a fresh replica holding `payload`
    fn resilver(&self, primary: PhysicalBlockId, payload: &[u8]) -> BlockResult<()> {
        let Some(replica) = self.arena.find_replica_candidate(&self.reserve_blocks) else {
            warn!(
                "No reserve block to re-replicate block {} of volume {}",
                primary, self.id
            );
            self.metrics.record_replication_unavailable();
            return Ok(());
        };

        match self.arena.write_raw(replica, payload) {
            Ok(()) => {
                self.arena.link_replica(primary, replica)?;
                info!("Re-replicated block {} to {}", primary, replica);
            }
            Err(err) => {
                warn!("Re-replication of block {} to {} failed: {}", primary, replica, err);
                self.metrics.record_replica_write_failure();
            }
        }
        Ok(())
    }

    fn unrecoverable(&self, block_no: usize) -> BlockError {
        warn!("Volume {} block {} is unrecoverable", self.id, block_no);
        self.metrics.record_unrecoverable();
        BlockError::Unrecoverable {
            volume: self.id.clone(),
            block_no,
        }
    }

    /// Capture the primary blocks as a new snapshot
    pub fn checkpoint(&mut self) -> BlockResult<usize> {
        self.ensure_live()?;
        self.snapshots.checkpoint(&self.arena, &self.primary_blocks)
    }

    /// Restore the primary blocks from snapshot `index`
    pub fn rollback(&self, index: usize) -> BlockResult<()> {
        self.ensure_live()?;
        self.snapshots.rollback(&self.arena, &self.primary_blocks, index)
    }

    /// Return every owned block to the arena; the volume is unusable after
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.arena.free(&self.owned_blocks);
        self.released = true;
        self.primary_blocks.clear();
        self.reserve_blocks.clear();
        info!(
            "Released {} blocks of volume {}",
            self.owned_blocks.len(),
            self.id
        );
    }
}
