//! Configuration types for vdisk
//!
//! All structures deserialize with defaults for missing fields, so a
//! partial file or a handful of environment overrides is enough.

use crate::error::{Error, Result};
use crate::{DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE, DEFAULT_REGION_SIZES};
use serde::{Deserialize, Serialize};

/// Root configuration for the block engine
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Physical arena sizing
    pub arena: ArenaConfig,
    /// Read fault injection
    pub faults: FaultConfig,
}

impl EngineConfig {
    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        self.arena.validate()?;
        self.faults.validate(self.arena.block_count)
    }
}

/// Physical arena sizing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Total number of physical blocks
    pub block_count: u32,
    /// Payload capacity of each block in bytes
    pub block_size: usize,
    /// Sizes of the storage regions backing the arena; must sum to `block_count`
    pub region_sizes: Vec<u32>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCK_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
            region_sizes: DEFAULT_REGION_SIZES.to_vec(),
        }
    }
}

impl ArenaConfig {
    /// Arena of `block_count` blocks in a single region
    #[must_use]
    pub fn single_region(block_count: u32, block_size: usize) -> Self {
        Self {
            block_count,
            block_size,
            region_sizes: vec![block_count],
        }
    }

    /// Check sizing constraints
    pub fn validate(&self) -> Result<()> {
        if self.block_count == 0 {
            return Err(Error::configuration("arena.block_count must be positive"));
        }
        if self.block_size == 0 {
            return Err(Error::configuration("arena.block_size must be positive"));
        }
        if self.region_sizes.is_empty() || self.region_sizes.contains(&0) {
            return Err(Error::configuration(
                "arena.region_sizes must list at least one non-empty region",
            ));
        }
        let total: u64 = self.region_sizes.iter().map(|&n| u64::from(n)).sum();
        if total != u64::from(self.block_count) {
            return Err(Error::configuration(format!(
                "arena.region_sizes sum to {total}, expected {}",
                self.block_count
            )));
        }
        Ok(())
    }
}

/// Read fault injection strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultMode {
    /// Reads never fail
    #[default]
    None,
    /// Each read fails independently with a fixed probability
    Random,
    /// Every read of one physical block fails
    FailBlock,
}

/// Fault injection configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Strategy to install
    pub mode: FaultMode,
    /// Failure probability per read (random mode)
    pub read_error_probability: f64,
    /// RNG seed (random mode)
    pub seed: u64,
    /// Physical block id to fail (fail_block mode)
    pub block: Option<u32>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            mode: FaultMode::None,
            read_error_probability: 0.1,
            seed: 0,
            block: None,
        }
    }
}

impl FaultConfig {
    fn validate(&self, block_count: u32) -> Result<()> {
        match self.mode {
            FaultMode::None => Ok(()),
            FaultMode::Random => {
                if (0.0..=1.0).contains(&self.read_error_probability) {
                    Ok(())
                } else {
                    Err(Error::configuration(format!(
                        "faults.read_error_probability {} is outside [0, 1]",
                        self.read_error_probability
                    )))
                }
            }
            FaultMode::FailBlock => match self.block {
                Some(id) if id >= 1 && id <= block_count => Ok(()),
                Some(id) => Err(Error::configuration(format!(
                    "faults.block {id} is outside [1, {block_count}]"
                ))),
                None => Err(Error::configuration(
                    "faults.block is required in fail_block mode",
                )),
            },
        }
    }
}
