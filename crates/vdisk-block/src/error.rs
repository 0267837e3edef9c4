//! Block storage error types

use thiserror::Error;
use vdisk_common::{PhysicalBlockId, VolumeId};

/// Block storage error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// Volume not found
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    /// Volume already exists
    #[error("Volume already exists: {0}")]
    VolumeExists(VolumeId),

    /// Invalid volume size
    #[error("Invalid volume size: {0}")]
    InvalidSize(String),

    /// Logical block number outside the volume
    #[error("Invalid block number {block_no} for volume of {logical_size} blocks")]
    InvalidBlockNumber { block_no: usize, logical_size: usize },

    /// Physical block id outside the arena
    #[error("Invalid physical block id {id}, arena has {block_count} blocks")]
    InvalidPhysicalId { id: u32, block_count: u32 },

    /// Payload larger than one block
    #[error("Payload of {length} bytes exceeds block size {block_size}")]
    PayloadTooLarge { length: usize, block_size: usize },

    /// Not enough free blocks
    #[error("Out of space: requested {requested} blocks, {available} free")]
    OutOfSpace { requested: usize, available: usize },

    /// Physical block is flagged as bad
    #[error("Media error on physical block {0}")]
    MediaError(PhysicalBlockId),

    /// Injected read failure
    #[error("Transient read failure on physical block {0}")]
    TransientFailure(PhysicalBlockId),

    /// Both the primary and its replica failed
    #[error("Block {block_no} of volume {volume} is unrecoverable")]
    Unrecoverable { volume: VolumeId, block_no: usize },

    /// Snapshot index not present for the volume
    #[error("Invalid snapshot index {index}, volume has {count} snapshots")]
    InvalidSnapshotIndex { index: usize, count: usize },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] vdisk_common::Error),
}

impl BlockError {
    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VolumeNotFound(_))
    }

    /// Check if a failed read may be served from a replica
    #[must_use]
    pub fn is_read_failure(&self) -> bool {
        matches!(self, Self::MediaError(_) | Self::TransientFailure(_))
    }
}

/// Result type for block operations
pub type BlockResult<T> = Result<T, BlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failure_classification() {
        let id = PhysicalBlockId::from_index(0);
        assert!(BlockError::MediaError(id).is_read_failure());
        assert!(BlockError::TransientFailure(id).is_read_failure());
        assert!(
            !BlockError::PayloadTooLarge {
                length: 101,
                block_size: 100
            }
            .is_read_failure()
        );
    }

    #[test]
    fn test_not_found() {
        assert!(BlockError::VolumeNotFound("A".into()).is_not_found());
        assert!(
            !BlockError::InvalidSnapshotIndex { index: 1, count: 0 }.is_not_found()
        );
    }
}
