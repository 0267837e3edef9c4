//! vdisk demo
//!
//! Drives the block engine through scripted scenarios: the basic block API,
//! disk lifecycle with allocation maps, replicated reads under injected
//! faults, and snapshot rollback.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vdisk_block::{BlockError, PrometheusExporter, VolumeTable};
use vdisk_common::{EngineConfig, FaultMode};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "vdisk-demo", about = "vdisk block engine scenarios")]
struct Args {
    /// Engine configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "VDISK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace / debug / info / warn / error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print Prometheus metrics after the scenario
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write and read back a single block
    BlockApi,
    /// Create, fill and delete disks, printing the allocation map
    Disks,
    /// Read a replicated volume under random read faults
    Replication {
        /// Per-read failure probability
        #[arg(long, default_value_t = 0.1)]
        probability: f64,
        /// Fault RNG seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Checkpoint a volume, modify it and roll back
    Snapshot,
    /// Print the effective configuration
    Config,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = load_config(args.config.as_deref())?;

    if let Command::Replication { probability, seed } = &args.command {
        if config.faults.mode != FaultMode::None {
            warn!("Replacing configured {:?} faults", config.faults.mode);
        }
        config.faults.mode = FaultMode::Random;
        config.faults.read_error_probability = *probability;
        config.faults.seed = *seed;
    }

    if let Command::Config = args.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let table = VolumeTable::from_config(&config).context("build block engine")?;

    match args.command {
        Command::BlockApi => block_api(&table)?,
        Command::Disks => disks(&table)?,
        Command::Replication { .. } => replication(&table)?,
        Command::Snapshot => snapshot(&table)?,
        Command::Config => {}
    }

    if args.metrics {
        let exporter = PrometheusExporter::default();
        print!("{}", exporter.export(&table.metrics(), &table.usage()));
    }

    Ok(())
}

/// Defaults, then the optional file, then `VDISK__SECTION__KEY` variables
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        info!("Loading configuration from {}", path.display());
        builder = builder.add_source(config::File::from(path));
    }

    let config: EngineConfig = builder
        .add_source(
            config::Environment::with_prefix("VDISK")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("load configuration")?
        .try_deserialize()
        .context("parse configuration")?;

    config.validate().context("validate configuration")?;
    Ok(config)
}

fn read_string(
    table: &VolumeTable,
    volume: &str,
    block_no: usize,
    capacity: usize,
) -> Result<String> {
    let mut buf = vec![0u8; capacity];
    let len = table
        .read_block(volume, block_no, &mut buf)
        .with_context(|| format!("read {}:{}", volume, block_no))?;
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

fn block_api(table: &VolumeTable) -> Result<()> {
    table.create_volume("A", 5)?;
    table.write_block("A", 1, b"shubham")?;

    println!("read(10): {:?}", read_string(table, "A", 1, 10)?);
    println!("read(2):  {:?}", read_string(table, "A", 1, 2)?);

    match table.write_block("A", 1, &vec![b'x'; table.arena().block_size() + 1]) {
        Err(BlockError::PayloadTooLarge { length, block_size }) => {
            println!("oversized write rejected: {} > {}", length, block_size);
        }
        other => bail!("oversized write not rejected: {:?}", other),
    }
    Ok(())
}

fn disks(table: &VolumeTable) -> Result<()> {
    let size = table.free_blocks() / 5;

    for id in ["A", "B"] {
        let info = table.create_volume(id, size)?;
        println!("created {} with {} logical blocks", info.id, info.logical_size);
    }
    println!("{}", table.allocation_map());

    match table.create_volume("C", size) {
        Err(err @ BlockError::OutOfSpace { .. }) => println!("create C: {}", err),
        other => bail!("create C should not fit: {:?}", other),
    }

    table.write_block("A", 1, b"block one of A")?;
    table.write_block("B", size, b"last block of B")?;
    println!("A:1 = {:?}", read_string(table, "A", 1, 100)?);
    println!("B:{} = {:?}", size, read_string(table, "B", size, 100)?);

    table.delete_volume("A")?;
    println!("deleted A, {} blocks free", table.free_blocks());

    table.create_volume("C", size)?;
    table.write_block("C", 1, b"reused")?;
    println!("{}", table.allocation_map());

    for info in table.list_volumes() {
        println!(
            "{}: {} blocks, {} reserve",
            info.id,
            info.logical_size,
            info.reserve_blocks.len()
        );
    }
    Ok(())
}

fn replication(table: &VolumeTable) -> Result<()> {
    let size = table.free_blocks() / 5;
    table.create_volume("A", size)?;

    let written: Vec<usize> = (size / 2..=size).collect();
    for &block_no in &written {
        table.write_block("A", block_no, format!("block {}", block_no).as_bytes())?;
    }

    let mut unrecoverable = 0;
    for round in 0..3 {
        for &block_no in &written {
            let mut buf = [0u8; 32];
            match table.read_block("A", block_no, &mut buf) {
                Ok(_) => {}
                Err(BlockError::Unrecoverable { .. }) => unrecoverable += 1,
                Err(err) => return Err(err).context("replicated read"),
            }
        }
        let metrics = table.metrics();
        println!(
            "round {}: {} primary errors, {} failovers, {} unrecoverable",
            round, metrics.primary_read_errors, metrics.failovers, metrics.unrecoverable_reads
        );
    }

    let info = table.volume_info("A")?;
    println!(
        "{} reserve blocks left, {} unrecoverable reads",
        info.reserve_blocks.len(),
        unrecoverable
    );
    Ok(())
}

fn snapshot(table: &VolumeTable) -> Result<()> {
    table.create_volume("A", 5)?;
    let show = |label: &str| -> Result<()> {
        let blocks = (1..=5)
            .map(|n| read_string(table, "A", n, 100))
            .collect::<Result<Vec<_>>>()?;
        println!("{}: {:?}", label, blocks);
        Ok(())
    };

    table.write_block("A", 1, b"shubham")?;
    table.write_block("A", 2, b"cloud")?;
    let first = table.checkpoint("A")?;
    show("checkpoint 0")?;

    table.write_block("A", 1, b"assignment")?;
    table.write_block("A", 3, b"computing")?;
    let second = table.checkpoint("A")?;
    show("checkpoint 1")?;

    table.write_block("A", 2, b"overwritten")?;
    show("modified")?;

    table.rollback("A", first)?;
    show("rolled back to 0")?;

    table.rollback("A", second)?;
    show("rolled back to 1")?;

    println!("{} snapshots", table.snapshot_count("A")?);
    Ok(())
}
