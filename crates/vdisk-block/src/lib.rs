//! vdisk Block Engine
//!
//! This crate provides an in-memory block storage engine: a fixed arena of
//! fixed-size physical blocks, carved into independently created logical
//! volumes with per-block replication and point-in-time snapshots.
//!
//! # Features
//!
//! - **Free-list allocation**: Volumes draw any physical blocks, FIFO
//! - **Write-through replication**: One replica per written block
//! - **Read failover**: A failed primary read is served from its replica,
//!   which is promoted and re-replicated
//! - **Snapshots**: Checkpoint and roll back a volume's logical view
//! - **Fault injection**: Pluggable transient read failures for testing
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   VolumeTable    │  create / delete / read / write / checkpoint / rollback
//! └────────┬─────────┘
//!          │ per-volume lock
//! ┌────────▼─────────┐
//! │      Volume      │  logical→physical map, replicas, SnapshotManager
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐     ┌───────────────┐
//! │    BlockArena    │────▶│ FaultInjector │
//! └──────────────────┘     └───────────────┘
//! ```

pub mod arena;
pub mod error;
pub mod fault;
pub mod metadata;
pub mod metrics;
pub mod snapshot;
pub mod table;
pub mod volume;

pub use arena::{AllocationMap, BlockArena, BlockOwner};
pub use error::{BlockError, BlockResult};
pub use fault::{FailBlock, FailOnce, FaultInjector, NoFaults, RandomFaults};
pub use metadata::{AllocationState, BlockMetadata};
pub use metrics::{ArenaUsage, EngineMetrics, MetricsSnapshot, PrometheusExporter};
pub use snapshot::{CapturedBlock, Snapshot, SnapshotManager};
pub use table::VolumeTable;
pub use volume::{Replication, Volume, VolumeInfo};

pub use vdisk_common::{
    DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE, EngineConfig, PhysicalBlockId, VolumeId,
};
