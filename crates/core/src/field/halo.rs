//! Halo exchange tables
//!
//! Boundary sectors of one device are copied into the matching ghost sectors
//! of its neighbor. Because both sides order these blocks identically and the
//! sector layout is dense, every exchange is a short list of contiguous
//! memory copies computed once when the field is created.

use super::layout::{sector_base, MemoryLayout};
use crate::core_types::BlockShape;
use crate::error::{GridError, GridResult};
use crate::grid::{BlockGrid, Sector};
use crate::index::DeviceIdx;
use serde::{Deserialize, Serialize};

/// Which side of an exchange initiates the copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferMode {
    /// The owner pushes its boundary into the neighbor's ghost sector
    #[default]
    Put,
    /// The neighbor pulls the owner's boundary into its ghost sector
    Get,
}

/// Direction of an exchange relative to the sending device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaloDirection {
    /// Towards the device with the next index
    Up,
    /// Towards the device with the previous index
    Down,
}

/// One side of a memory copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferEndpoint {
    pub device: DeviceIdx,
    /// Offset into the device buffer, in bytes
    pub offset: usize,
}

/// A contiguous device-to-device copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryTransfer {
    pub dst: TransferEndpoint,
    pub src: TransferEndpoint,
    pub bytes: usize,
}

/// Precomputed exchange lists of one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HaloTable {
    /// Transfers grouped by initiating device, put mode
    put: Vec<Vec<MemoryTransfer>>,
    /// Transfers grouped by initiating device, get mode
    get: Vec<Vec<MemoryTransfer>>,
}

impl HaloTable {
    /// Compute the exchange lists of a field.
    ///
    /// # Arguments
    /// * `grid` - Grid the field lives on
    /// * `layout` - Field memory layout
    /// * `cardinality` - Components per cell
    /// * `elem_bytes` - Size of one value
    pub fn build<S: BlockShape>(
        grid: &BlockGrid<S>,
        layout: MemoryLayout,
        cardinality: usize,
        elem_bytes: usize,
    ) -> GridResult<Self> {
        let devices = grid.devices();
        let mut table = Self {
            put: vec![Vec::new(); devices],
            get: vec![Vec::new(); devices],
        };

        for device in 0..devices {
            for direction in [HaloDirection::Up, HaloDirection::Down] {
                let (neighbor, src_sector, dst_sector) = match direction {
                    HaloDirection::Up if device + 1 < devices => {
                        (device + 1, Sector::BoundaryUp, Sector::GhostDown)
                    }
                    HaloDirection::Down if device > 0 => {
                        (device - 1, Sector::BoundaryDown, Sector::GhostUp)
                    }
                    _ => continue,
                };

                let src_bounds = grid.partition(device).sectors();
                let dst_bounds = grid.partition(neighbor).sectors();
                let blocks = src_bounds.len(src_sector) as usize;
                if blocks != dst_bounds.len(dst_sector) as usize {
                    return Err(GridError::incompatible(
                        "halo",
                        format!(
                            "device {device} sends {blocks} blocks but device {neighbor} expects {}",
                            dst_bounds.len(dst_sector)
                        ),
                    ));
                }
                if blocks == 0 {
                    continue;
                }

                let src_base = sector_base::<S>(src_bounds, cardinality, src_sector);
                let dst_base = sector_base::<S>(dst_bounds, cardinality, dst_sector);
                let run = blocks * S::VOLUME;
                let transfers: Vec<MemoryTransfer> = match layout {
                    MemoryLayout::StructOfArrays => (0..cardinality)
                        .map(|comp| MemoryTransfer {
                            dst: TransferEndpoint {
                                device: neighbor,
                                offset: (dst_base + comp * run) * elem_bytes,
                            },
                            src: TransferEndpoint {
                                device,
                                offset: (src_base + comp * run) * elem_bytes,
                            },
                            bytes: run * elem_bytes,
                        })
                        .collect(),
                    MemoryLayout::ArrayOfStructs => vec![MemoryTransfer {
                        dst: TransferEndpoint {
                            device: neighbor,
                            offset: dst_base * elem_bytes,
                        },
                        src: TransferEndpoint {
                            device,
                            offset: src_base * elem_bytes,
                        },
                        bytes: run * cardinality * elem_bytes,
                    }],
                };

                table.get[neighbor].extend_from_slice(&transfers);
                table.put[device].extend(transfers);
            }
        }
        Ok(table)
    }

    /// Transfers issued by one device
    pub fn device_transfers(&self, mode: TransferMode, device: DeviceIdx) -> &[MemoryTransfer] {
        match mode {
            TransferMode::Put => &self.put[device],
            TransferMode::Get => &self.get[device],
        }
    }

    /// Every transfer of an exchange, grouped by initiating device
    pub fn transfers(&self, mode: TransferMode) -> impl Iterator<Item = &MemoryTransfer> {
        let lists = match mode {
            TransferMode::Put => &self.put,
            TransferMode::Get => &self.get,
        };
        lists.iter().flatten()
    }

    /// Number of transfers of an exchange
    pub fn len(&self, mode: TransferMode) -> usize {
        self.transfers(mode).count()
    }

    pub fn is_empty(&self) -> bool {
        self.put.iter().all(Vec::is_empty)
    }
}
