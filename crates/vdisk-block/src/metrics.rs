//! Engine counters and Prometheus exporter
//!
//! # Prometheus Metrics
//!
//! - `vdisk_blocks_written_total` - Successful primary block writes
//! - `vdisk_blocks_read_total` - Successful logical block reads
//! - `vdisk_primary_read_errors_total` - Primary reads that failed
//! - `vdisk_transient_read_errors_total` - Injected failures among all failed reads
//! - `vdisk_replica_read_errors_total` - Replica reads that failed during failover
//! - `vdisk_failovers_total` - Reads served from a replica
//! - `vdisk_unrecoverable_reads_total` - Reads with no surviving copy
//! - `vdisk_replication_unavailable_total` - Writes left without a replica
//! - `vdisk_replica_write_failures_total` - Replica writes that failed
//! - `vdisk_arena_blocks` / `vdisk_arena_free_blocks` / `vdisk_volumes` - Arena usage

use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BlockError;

/// Live counters shared by all volumes
#[derive(Debug, Default)]
pub struct EngineMetrics {
    blocks_written: AtomicU64,
    blocks_read: AtomicU64,
    primary_read_errors: AtomicU64,
    transient_read_errors: AtomicU64,
    replica_read_errors: AtomicU64,
    failovers: AtomicU64,
    unrecoverable_reads: AtomicU64,
    replication_unavailable: AtomicU64,
    replica_write_failures: AtomicU64,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_primary_read_error(&self, err: &BlockError) {
        self.primary_read_errors.fetch_add(1, Ordering::Relaxed);
        self.record_transient(err);
    }

    pub fn record_replica_read_error(&self, err: &BlockError) {
        self.replica_read_errors.fetch_add(1, Ordering::Relaxed);
        self.record_transient(err);
    }

    fn record_transient(&self, err: &BlockError) {
        if matches!(err, BlockError::TransientFailure(_)) {
            self.transient_read_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrecoverable(&self) {
        self.unrecoverable_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replication_unavailable(&self) {
        self.replication_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replica_write_failure(&self) {
        self.replica_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            primary_read_errors: self.primary_read_errors.load(Ordering::Relaxed),
            transient_read_errors: self.transient_read_errors.load(Ordering::Relaxed),
            replica_read_errors: self.replica_read_errors.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            unrecoverable_reads: self.unrecoverable_reads.load(Ordering::Relaxed),
            replication_unavailable: self.replication_unavailable.load(Ordering::Relaxed),
            replica_write_failures: self.replica_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub blocks_written: u64,
    pub blocks_read: u64,
    pub primary_read_errors: u64,
    pub transient_read_errors: u64,
    pub replica_read_errors: u64,
    pub failovers: u64,
    pub unrecoverable_reads: u64,
    pub replication_unavailable: u64,
    pub replica_write_failures: u64,
}

/// Arena occupancy gauges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArenaUsage {
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub volumes: u64,
}

/// Formats engine metrics in Prometheus text format
pub struct PrometheusExporter {
    prefix: String,
}

impl PrometheusExporter {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// Render counters and gauges
    #[must_use]
    pub fn export(&self, metrics: &MetricsSnapshot, usage: &ArenaUsage) -> String {
        let mut output = String::new();

        let counters = [
            (
                "blocks_written_total",
                "Successful primary block writes",
                metrics.blocks_written,
            ),
            (
                "blocks_read_total",
                "Successful logical block reads",
                metrics.blocks_read,
            ),
            (
                "primary_read_errors_total",
                "Primary block reads that failed",
                metrics.primary_read_errors,
            ),
            (
                "transient_read_errors_total",
                "Injected transient read failures",
                metrics.transient_read_errors,
            ),
            (
                "replica_read_errors_total",
                "Replica reads that failed during failover",
                metrics.replica_read_errors,
            ),
            (
                "failovers_total",
                "Reads served from a replica",
                metrics.failovers,
            ),
            (
                "unrecoverable_reads_total",
                "Reads with no surviving copy",
                metrics.unrecoverable_reads,
            ),
            (
                "replication_unavailable_total",
                "Writes left without a replica",
                metrics.replication_unavailable,
            ),
            (
                "replica_write_failures_total",
                "Replica writes that failed",
                metrics.replica_write_failures,
            ),
        ];
        for (name, help, value) in counters {
            self.write_help(&mut output, name, help);
            self.write_type(&mut output, name, "counter");
            self.write_metric(&mut output, name, value);
        }

        let gauges = [
            ("arena_blocks", "Physical blocks in the arena", usage.total_blocks),
            ("arena_free_blocks", "Physical blocks on the free list", usage.free_blocks),
            ("volumes", "Live volumes", usage.volumes),
        ];
        for (name, help, value) in gauges {
            self.write_help(&mut output, name, help);
            self.write_type(&mut output, name, "gauge");
            self.write_metric(&mut output, name, value);
        }

        output
    }

    fn write_help(&self, output: &mut String, name: &str, help: &str) {
        let _ = writeln!(output, "# HELP {}_{} {}", self.prefix, name, help);
    }

    fn write_type(&self, output: &mut String, name: &str, metric_type: &str) {
        let _ = writeln!(output, "# TYPE {}_{} {}", self.prefix, name, metric_type);
    }

    fn write_metric(&self, output: &mut String, name: &str, value: u64) {
        let _ = writeln!(output, "{}_{} {}", self.prefix, name, value);
    }
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new("vdisk")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_common::PhysicalBlockId;

    #[test]
    fn test_counters() {
        let metrics = EngineMetrics::new();
        let id = PhysicalBlockId::from_index(0);
        metrics.record_write();
        metrics.record_primary_read_error(&BlockError::TransientFailure(id));
        metrics.record_primary_read_error(&BlockError::MediaError(id));
        metrics.record_replica_read_error(&BlockError::TransientFailure(id));
        metrics.record_failover();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.blocks_written, 1);
        assert_eq!(snapshot.primary_read_errors, 2);
        assert_eq!(snapshot.replica_read_errors, 1);
        assert_eq!(snapshot.transient_read_errors, 2);
        assert_eq!(snapshot.failovers, 1);
        assert_eq!(snapshot.unrecoverable_reads, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsSnapshot {
            failovers: 3,
            ..MetricsSnapshot::default()
        };
        let usage = ArenaUsage {
            total_blocks: 500,
            free_blocks: 490,
            volumes: 1,
        };
        let output = PrometheusExporter::default().export(&metrics, &usage);

        assert!(output.contains("# TYPE vdisk_failovers_total counter"));
        assert!(output.contains("vdisk_failovers_total 3\n"));
        assert!(output.contains("# TYPE vdisk_arena_free_blocks gauge"));
        assert!(output.contains("vdisk_arena_free_blocks 490\n"));
        assert!(output.contains("vdisk_volumes 1\n"));
    }
}
