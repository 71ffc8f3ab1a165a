//! Cell and device identifiers

use crate::core_types::Index3;
use serde::{Deserialize, Serialize};

/// Sentinel block id for "no such block"
pub const INVALID_BLOCK: u32 = u32::MAX;

/// Index of a device in the device set
pub type DeviceIdx = usize;

/// One grid element addressed as `(block id, in-block coordinate)`.
///
/// The block id is local to the device partition that owns the cell (ghost
/// blocks included). `local` components lie in `[0, side)` for a resolved
/// cell; neighbor arithmetic may temporarily leave that range before it is
/// wrapped back by the spatial index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIdx {
    /// Device-local block id
    pub block: u32,
    /// In-block coordinate
    pub local: Index3,
}

impl CellIdx {
    /// Create a cell index
    #[inline]
    pub fn new(block: u32, local: Index3) -> Self {
        Self { block, local }
    }

    /// True if the block id is the invalid sentinel
    #[inline]
    pub fn is_invalid_block(&self) -> bool {
        self.block == INVALID_BLOCK
    }
}
