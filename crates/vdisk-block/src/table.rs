//! Volume registry and public operation surface

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use vdisk_common::{EngineConfig, VolumeId};

use crate::arena::{AllocationMap, BlockArena};
use crate::error::{BlockError, BlockResult};
use crate::fault;
use crate::metrics::{ArenaUsage, EngineMetrics, MetricsSnapshot};
use crate::volume::{Replication, Volume, VolumeInfo};

/// Registry of live volumes over one shared arena
///
/// Each volume sits behind its own lock, so reads, writes, checkpoints and
/// rollbacks on one volume are serialized while different volumes proceed
/// independently. The arena free list has its own lock.
pub struct VolumeTable {
    arena: Arc<BlockArena>,
    metrics: Arc<EngineMetrics>,
    volumes: RwLock<HashMap<VolumeId, Arc<Mutex<Volume>>>>,
}

impl VolumeTable {
    /// Create a table over an existing arena
    pub fn new(arena: Arc<BlockArena>) -> Self {
        Self {
            arena,
            metrics: Arc::new(EngineMetrics::new()),
            volumes: RwLock::new(HashMap::new()),
        }
    }

    /// Build the arena and fault injector described by `config`
    pub fn from_config(config: &EngineConfig) -> BlockResult<Self> {
        let faults = fault::from_config(config)?;
        let arena = BlockArena::new(&config.arena, faults)?;
        info!(
            "Block engine ready: {} blocks of {} bytes, faults {:?}",
            arena.block_count(),
            arena.block_size(),
            config.faults.mode
        );
        Ok(Self::new(Arc::new(arena)))
    }

    /// The shared arena
    #[must_use]
    pub fn arena(&self) -> &Arc<BlockArena> {
        &self.arena
    }

    fn volume(&self, id: &str) -> BlockResult<Arc<Mutex<Volume>>> {
        self.volumes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BlockError::VolumeNotFound(id.to_string()))
    }

    /// Create a volume of `logical_size` blocks
    pub fn create_volume(&self, id: &str, logical_size: usize) -> BlockResult<VolumeInfo> {
        let id = VolumeId::new(id)?;

        let mut volumes = self.volumes.write();
        if volumes.contains_key(&id) {
            return Err(BlockError::VolumeExists(id));
        }

        let volume = Volume::create(
            Arc::clone(&self.arena),
            Arc::clone(&self.metrics),
            id.clone(),
            logical_size,
        )?;
        let info = volume.info();
        volumes.insert(id, Arc::new(Mutex::new(volume)));
        Ok(info)
    }

    /// Delete a volume and return its blocks to the arena
    pub fn delete_volume(&self, id: &str) -> BlockResult<()> {
        let volume = self
            .volumes
            .write()
            .remove(id)
            .ok_or_else(|| BlockError::VolumeNotFound(id.to_string()))?;
        volume.lock().release();
        Ok(())
    }

    /// Write `data` to logical block `block_no` of volume `id`
    pub fn write_block(&self, id: &str, block_no: usize, data: &[u8]) -> BlockResult<Replication> {
        self.volume(id)?.lock().write_block(block_no, data)
    }

    /// Read logical block `block_no` of volume `id` into `buf`
    pub fn read_block(&self, id: &str, block_no: usize, buf: &mut [u8]) -> BlockResult<usize> {
        self.volume(id)?.lock().read_block(block_no, buf)
    }

    /// Snapshot volume `id`, returning the snapshot index
    pub fn checkpoint(&self, id: &str) -> BlockResult<usize> {
        let index = self.volume(id)?.lock().checkpoint()?;
        debug!("Volume {} checkpoint {}", id, index);
        Ok(index)
    }

    /// Roll volume `id` back to snapshot `index`
    pub fn rollback(&self, id: &str, index: usize) -> BlockResult<()> {
        self.volume(id)?.lock().rollback(index)?;
        info!("Volume {} rolled back to snapshot {}", id, index);
        Ok(())
    }

    /// Ownership of every physical block
    #[must_use]
    pub fn allocation_map(&self) -> AllocationMap {
        self.arena.allocation_map()
    }

    /// Describe volume `id`
    pub fn volume_info(&self, id: &str) -> BlockResult<VolumeInfo> {
        Ok(self.volume(id)?.lock().info())
    }

    /// Describe every volume, ordered by id
    #[must_use]
    pub fn list_volumes(&self) -> Vec<VolumeInfo> {
        let volumes: Vec<_> = self.volumes.read().values().cloned().collect();
        let mut infos: Vec<VolumeInfo> = volumes.iter().map(|v| v.lock().info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Number of snapshots of volume `id`
    pub fn snapshot_count(&self, id: &str) -> BlockResult<usize> {
        Ok(self.volume(id)?.lock().snapshots().len())
    }

    /// Blocks on the arena free list
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.arena.free_count()
    }

    /// Current counter values
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Arena occupancy gauges
    #[must_use]
    pub fn usage(&self) -> ArenaUsage {
        ArenaUsage {
            total_blocks: u64::from(self.arena.block_count()),
            free_blocks: self.arena.free_count() as u64,
            volumes: self.volumes.read().len() as u64,
        }
    }
}

impl Default for VolumeTable {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self::new(Arc::new(BlockArena::with_capacity(
            config.arena.block_count,
            config.arena.block_size,
        )))
    }
}
