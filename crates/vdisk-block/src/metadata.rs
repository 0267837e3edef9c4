//! Per-block metadata records

use serde::Serialize;
use vdisk_common::{PhysicalBlockId, VolumeId};

/// Allocation state of a physical block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AllocationState {
    #[default]
    Free,
    Allocated,
}

/// Metadata kept alongside every physical block buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockMetadata {
    /// Valid bytes in the buffer
    pub occupied_size: usize,
    /// Free or allocated
    pub state: AllocationState,
    /// Volume that allocated the block
    pub owner: Option<VolumeId>,
    /// Sticky bad-block flag; survives `reset`
    pub media_error: bool,
    /// Block holding this block's redundant copy
    pub replica_target: Option<PhysicalBlockId>,
    /// Primary this block is a replica of
    pub replica_of: Option<PhysicalBlockId>,
}

impl BlockMetadata {
    /// Return to the unallocated defaults, keeping `media_error`
    pub fn reset(&mut self) {
        *self = Self {
            media_error: self.media_error,
            ..Self::default()
        };
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state == AllocationState::Free
    }

    /// Usable as a fresh replica target
    #[must_use]
    pub fn is_replica_candidate(&self) -> bool {
        !self.media_error && self.replica_of.is_none() && self.replica_target.is_none()
    }

    /// Copy without replica linkage, as captured by snapshots
    #[must_use]
    pub fn logical_view(&self) -> Self {
        Self {
            replica_target: None,
            replica_of: None,
            ..self.clone()
        }
    }
}
