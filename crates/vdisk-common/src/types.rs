//! Core type definitions for vdisk
//!
//! Identifiers for physical blocks and volumes. Physical block ids are
//! 1-based and stable for the lifetime of the arena.

use crate::error::{Error, Result};
use derive_more::{Display, Into};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier of a physical block in the arena (1-based)
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, Into,
)]
#[display("{_0}")]
#[serde(try_from = "u32")]
pub struct PhysicalBlockId(u32);

impl PhysicalBlockId {
    /// Create a physical block id, rejecting zero
    pub fn new(id: u32) -> Result<Self> {
        if id == 0 {
            return Err(Error::InvalidPhysicalId(id));
        }
        Ok(Self(id))
    }

    /// Create from a zero-based arena index
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    /// Get the raw id value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Zero-based index into the arena
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl TryFrom<u32> for PhysicalBlockId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl fmt::Debug for PhysicalBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalBlockId({})", self.0)
    }
}

/// Identifier of a logical volume
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(try_from = "String")]
pub struct VolumeId(String);

impl VolumeId {
    /// Create a volume id, rejecting the empty string
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidVolumeId(id));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeId({:?})", self.0)
    }
}

impl Borrow<str> for VolumeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for VolumeId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for VolumeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_physical_block_id_bounds() {
        assert!(PhysicalBlockId::new(0).is_err());
        let id = PhysicalBlockId::new(7).unwrap();
        assert_eq!(id.get(), 7);
        assert_eq!(id.index(), 6);
        assert_eq!(PhysicalBlockId::from_index(6), id);
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn test_volume_id_lookup_by_str() {
        assert!(VolumeId::new("").is_err());

        let mut map = HashMap::new();
        map.insert(VolumeId::new("A").unwrap(), 1);
        assert_eq!(map.get("A"), Some(&1));
        assert_eq!(VolumeId::try_from("A").unwrap().as_str(), "A");
    }

    #[test]
    fn test_deserialize_validates_ids() {
        let id: PhysicalBlockId = serde_json::from_str("7").unwrap();
        assert_eq!(id.index(), 6);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        assert!(serde_json::from_str::<PhysicalBlockId>("0").is_err());

        let volume: VolumeId = serde_json::from_str("\"A\"").unwrap();
        assert_eq!(volume.as_str(), "A");
        assert!(serde_json::from_str::<VolumeId>("\"\"").is_err());
    }
}
