use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    storage::header::validate_page_size,
    types::error::{RepairError, Result},
};

/// Knobs for one repair run. Every field has a default, so an empty JSON
/// object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Page size to use instead of the header's, for encrypted files.
    pub page_size: Option<u32>,
    pub reserved_bytes: Option<u8>,
    pub wal_required: bool,
    /// Snapshots kept in the factory directory.
    pub max_snapshots: usize,
    /// Cells assembled per transaction.
    pub milestone_interval: usize,
    /// Share of recorded pages whose hash may change before a table is
    /// recovered by full crawl instead of from its material.
    pub fallback_change_ratio: f64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            page_size: None,
            reserved_bytes: None,
            wal_required: false,
            max_snapshots: 3,
            milestone_interval: 1000,
            fallback_change_ratio: 0.5,
        }
    }
}

impl RepairConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| RepairError::Config {
            details: format!("Invalid JSON: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| RepairError::Config {
            details: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RepairError::Config {
            details: format!("Failed to serialize config: {}", e),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(page_size) = self.page_size {
            validate_page_size(page_size).map_err(|_| RepairError::Config {
                details: format!("page_size {} is not a valid page size", page_size),
            })?;
        }
        if self.milestone_interval == 0 {
            return Err(RepairError::Config {
                details: "milestone_interval must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.fallback_change_ratio) {
            return Err(RepairError::Config {
                details: format!(
                    "fallback_change_ratio {} is outside [0, 1]",
                    self.fallback_change_ratio
                ),
            });
        }
        Ok(())
    }
}
