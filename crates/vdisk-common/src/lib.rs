//! vdisk Common - Shared types and configuration
//!
//! This crate provides the identifier types, sizing constants, and
//! configuration structures used by the block engine and its harnesses.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ArenaConfig, EngineConfig, FaultConfig, FaultMode};
pub use error::{Error, Result};
pub use types::*;

/// Default number of physical blocks in the arena
pub const DEFAULT_BLOCK_COUNT: u32 = 500;

/// Default payload capacity of one physical block, in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 100;

/// Default split of the arena into storage regions
pub const DEFAULT_REGION_SIZES: [u32; 2] = [200, 300];
