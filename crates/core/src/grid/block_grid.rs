//! Block-sparse grid partitioned across devices
//!
//! The domain is cut into `SIDE³` blocks; blocks without any active cell are
//! dropped. Surviving blocks are distributed across devices in contiguous
//! slabs along z, balanced by active cell count. Each device then orders its
//! blocks into sectors (see [`Sector`]) so that boundary and ghost data are
//! contiguous and can be exchanged with a handful of bulk copies.

use super::config::GridConfig;
use super::sector::{DataView, Sector, SectorBounds};
use super::stencil::Stencil;
use crate::core_types::index3::{in_box, iter_box};
use crate::core_types::{ActiveMask, BlockShape, Index3};
use crate::error::{GridError, GridResult};
use crate::index::spatial::morton_encode;
use crate::index::{CellIdx, DeviceIdx, SpatialIndex};
use crate::scheduler::{Launch, ProfilerScope};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Multi-device block-sparse grid
#[derive(Debug, Clone)]
pub struct BlockGrid<S: BlockShape> {
    dim: Index3,
    stencil: Stencil,
    config: GridConfig,
    halo_slabs: i32,
    slab_ranges: Vec<Range<i32>>,
    partitions: Vec<SpatialIndex<S>>,
    /// Block coordinate -> (owning device, local block id)
    owners: FxHashMap<Index3, (DeviceIdx, u32)>,
}

impl<S: BlockShape> BlockGrid<S> {
    /// Build a grid over `[0, dim)` where `active` selects domain cells.
    ///
    /// # Arguments
    /// * `dim` - Domain extent in cells
    /// * `stencil` - Union of the stencils used by computations on this grid
    /// * `config` - Device configuration
    /// * `active` - Activity predicate, evaluated once per cell in parallel
    ///
    /// # Errors
    /// [`GridError::InvalidDomain`] for empty domains or oversized stencils,
    /// [`GridError::PartitionTooThin`] when a device cannot host its halo.
    pub fn new<F>(dim: Index3, stencil: Stencil, config: GridConfig, active: F) -> GridResult<Self>
    where
        F: Fn(&Index3) -> bool + Sync,
    {
        let _scope = ProfilerScope::new("block_grid_build");
        config.validate()?;
        stencil.validate(S::SIDE)?;
        if dim.iter().any(|d| *d <= 0) {
            return Err(GridError::invalid_domain(format!(
                "domain extent ({}, {}, {}) must be positive",
                dim.x, dim.y, dim.z
            )));
        }

        let block_dim = dim.map(|d| (d + S::SIDE - 1) / S::SIDE);
        let coords: Vec<Index3> = iter_box(block_dim).collect();
        let blocks: Vec<(Index3, ActiveMask)> = coords
            .into_par_iter()
            .filter_map(|coord| {
                let origin = coord * S::SIDE;
                let mut mask = ActiveMask::new(1, S::VOLUME);
                for offset in 0..S::VOLUME {
                    let global = origin + S::local(offset);
                    if in_box(&global, &dim) && active(&global) {
                        mask.set_active(0, offset, true);
                    }
                }
                mask.any_in_block(0).then_some((coord, mask))
            })
            .collect();

        if blocks.is_empty() {
            return Err(GridError::invalid_domain("domain has no active cells"));
        }

        let devices = config.devices;
        let mut slab_cells = vec![0usize; block_dim.z as usize];
        for (coord, mask) in &blocks {
            slab_cells[coord.z as usize] += mask.count_block(0);
        }
        let slab_ranges = split_slabs(&slab_cells, devices)?;

        let halo_slabs = if devices > 1 {
            (stencil.radius() + S::SIDE - 1) / S::SIDE
        } else {
            0
        };
        for (device, range) in slab_ranges.iter().enumerate() {
            let neighbors = usize::from(device > 0) + usize::from(device + 1 < devices);
            let required = halo_slabs as usize * neighbors;
            let slabs = range.len();
            if slabs < required {
                return Err(GridError::PartitionTooThin {
                    device,
                    slabs,
                    required,
                });
            }
        }

        let mut slab_owner = vec![0usize; block_dim.z as usize];
        for (device, range) in slab_ranges.iter().enumerate() {
            for z in range.clone() {
                slab_owner[z as usize] = device;
            }
        }

        // Indices into `blocks`, per device and sector
        let mut sectors: Vec<[Vec<usize>; 5]> = (0..devices).map(|_| Default::default()).collect();
        for (i, (coord, _)) in blocks.iter().enumerate() {
            let device = slab_owner[coord.z as usize];
            let range = &slab_ranges[device];
            let up = device + 1 < devices && coord.z >= range.end - halo_slabs;
            let down = device > 0 && coord.z < range.start + halo_slabs;
            if up {
                sectors[device][Sector::BoundaryUp.position()].push(i);
                sectors[device + 1][Sector::GhostDown.position()].push(i);
            }
            if down {
                sectors[device][Sector::BoundaryDown.position()].push(i);
                sectors[device - 1][Sector::GhostUp.position()].push(i);
            }
            if !up && !down {
                sectors[device][Sector::Interior.position()].push(i);
            }
        }

        let mut partitions = Vec::with_capacity(devices);
        let mut owners = FxHashMap::default();
        for (device, mut lists) in sectors.into_iter().enumerate() {
            let mut lengths = [0u32; 5];
            let mut block_coords = Vec::new();
            let mut mask = ActiveMask::new(0, S::VOLUME);
            for sector in Sector::ALL {
                let list = &mut lists[sector.position()];
                // Ghost and boundary lists sort identically on both sides
                list.sort_by_key(|&i| {
                    let c = blocks[i].0;
                    morton_encode(c.x, c.y, c.z)
                });
                lengths[sector.position()] = list.len() as u32;
                for &i in list.iter() {
                    let (coord, block_mask) = &blocks[i];
                    if sector.is_owned() {
                        owners.insert(*coord, (device, block_coords.len() as u32));
                    }
                    block_coords.push(*coord);
                    mask.push_block_from(block_mask, 0);
                }
            }
            let bounds = SectorBounds::from_lengths(lengths);
            if bounds.owned() == 0 {
                warn!(device, "device partition owns no active blocks");
            }
            debug!(
                device,
                interior = lengths[0],
                boundary_up = lengths[1],
                ghost_up = lengths[2],
                boundary_down = lengths[3],
                ghost_down = lengths[4],
                "partition sectors"
            );
            partitions.push(SpatialIndex::new(block_coords, mask, bounds));
        }

        let grid = Self {
            dim,
            stencil,
            config,
            halo_slabs,
            slab_ranges,
            partitions,
            owners,
        };
        info!(
            dim = ?(dim.x, dim.y, dim.z),
            side = S::SIDE,
            devices,
            blocks = grid.owners.len(),
            active = grid.active_count(),
            "block grid built"
        );
        Ok(grid)
    }

    /// Domain extent in cells
    pub fn dim(&self) -> Index3 {
        self.dim
    }

    pub fn stencil(&self) -> &Stencil {
        &self.stencil
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn devices(&self) -> usize {
        self.partitions.len()
    }

    /// Block slabs exchanged with each neighboring device
    pub fn halo_slabs(&self) -> i32 {
        self.halo_slabs
    }

    /// Block z range owned by a device
    pub fn slab_range(&self, device: DeviceIdx) -> Range<i32> {
        self.slab_ranges[device].clone()
    }

    /// Spatial index of one device partition
    #[inline]
    pub fn partition(&self, device: DeviceIdx) -> &SpatialIndex<S> {
        &self.partitions[device]
    }

    pub fn partitions(&self) -> &[SpatialIndex<S>] {
        &self.partitions
    }

    /// Owning device and local cell of an active global coordinate
    pub fn locate(&self, global: &Index3) -> Option<(DeviceIdx, CellIdx)> {
        let block_coord = global.map(|c| c.div_euclid(S::SIDE));
        let &(device, block) = self.owners.get(&block_coord)?;
        let cell = CellIdx::new(block, global - block_coord * S::SIDE);
        self.partitions[device]
            .is_active(&cell)
            .then_some((device, cell))
    }

    /// True if the global coordinate is part of the domain
    pub fn is_active(&self, global: &Index3) -> bool {
        self.locate(global).is_some()
    }

    /// Number of active cells across all devices (ghosts excluded)
    pub fn active_count(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.active_count(DataView::Standard))
            .sum()
    }

    /// Number of owned blocks across all devices
    pub fn block_count(&self) -> usize {
        self.owners.len()
    }

    /// Execution span of a container running over this grid
    pub fn launch(&self, view: DataView) -> Launch {
        Launch {
            devices: self.devices(),
            view,
        }
    }
}

/// Split z slabs into one contiguous range per device, balancing active cells.
///
/// Every device receives at least one slab.
fn split_slabs(slab_cells: &[usize], devices: usize) -> GridResult<Vec<Range<i32>>> {
    let nz = slab_cells.len();
    if devices > nz {
        return Err(GridError::PartitionTooThin {
            device: nz,
            slabs: 0,
            required: 1,
        });
    }

    let total: usize = slab_cells.iter().sum();
    let mut ranges = Vec::with_capacity(devices);
    let mut start = 0usize;
    let mut acc = 0usize;
    for device in 0..devices {
        let remaining = devices - device - 1;
        let end = if remaining == 0 {
            nz
        } else {
            let target = total * (device + 1) / devices;
            let mut end = start + 1;
            acc += slab_cells[start];
            while end < nz - remaining && acc < target {
                acc += slab_cells[end];
                end += 1;
            }
            end
        };
        ranges.push(start as i32..end as i32);
        start = end;
    }
    Ok(ranges)
}
