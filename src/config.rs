//! Cache configuration

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Environment variable holding the size budget in bytes
pub const MAX_SIZE_ENV: &str = "ATTACHMENT_LRU_MAX_SIZE";

/// Size budget for a cache instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum distinct-content footprint in bytes; None or 0 is unlimited
    #[serde(default)]
    pub max_size: Option<u64>,
}

impl CacheConfig {
    /// Configuration with a size budget
    pub fn with_max_size(max_size: u64) -> Self {
        Self {
            max_size: Some(max_size),
        }
    }

    /// Unbounded configuration
    pub fn unlimited() -> Self {
        Self { max_size: None }
    }

    /// Effective limit, with 0 treated as unlimited
    pub fn limit(&self) -> Option<u64> {
        self.max_size.filter(|&size| size > 0)
    }

    /// Load from the environment; an unset variable means unlimited
    pub fn from_env() -> Result<Self> {
        Self::parse_max_size(std::env::var(MAX_SIZE_ENV).ok().as_deref())
    }

    fn parse_max_size(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::unlimited()),
            Some(raw) => raw.parse::<u64>().map(Self::with_max_size).map_err(|_| {
                CacheError::InvalidArgument(format!(
                    "{} must be a non-negative integer, got '{}'",
                    MAX_SIZE_ENV, raw
                ))
            }),
        }
    }
}
