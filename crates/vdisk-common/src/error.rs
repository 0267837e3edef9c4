//! Error types shared by vdisk components

use thiserror::Error;

/// Common result type for vdisk configuration and type handling
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for vdisk
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid physical block id: {0}")]
    InvalidPhysicalId(u32),

    #[error("invalid volume id: {0:?}")]
    InvalidVolumeId(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::configuration("bad").to_string(),
            "configuration error: bad"
        );
        assert_eq!(
            Error::InvalidPhysicalId(0).to_string(),
            "invalid physical block id: 0"
        );
    }
}
