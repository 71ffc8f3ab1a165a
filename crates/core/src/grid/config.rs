//! Grid configuration

use crate::error::{GridError, GridResult};
use serde::{Deserialize, Serialize};

/// Configuration for building a block grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of devices the domain is partitioned across (along z)
    pub devices: usize,
}

impl GridConfig {
    /// Configuration for `devices` devices
    pub fn with_devices(devices: usize) -> Self {
        Self { devices }
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.devices == 0 {
            return Err(GridError::invalid_domain("at least one device is required"));
        }
        Ok(())
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { devices: 1 }
    }
}
