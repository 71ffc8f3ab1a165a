//! Per-device spatial index over active blocks
//!
//! Adapted from the octree hash used for element lookups: blocks are keyed by
//! their block coordinate, ordered by Morton code inside every sector, and
//! linked to their 26 Moore neighbors through a [`BlockConnectivity`] table.
//! Neighbor resolution never touches the hash map, only the connectivity.

use super::cell::{CellIdx, INVALID_BLOCK};
use super::connectivity::{connectivity_entry, BlockConnectivity};
use crate::core_types::{ActiveMask, BlockShape, Index3};
use crate::grid::{DataView, Sector, SectorBounds};
use rustc_hash::FxHashMap;
use std::marker::PhantomData;

/// Outcome of resolving a neighbor offset from a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NghLookup {
    /// Neighbor lies in the same block
    Local(CellIdx),
    /// Neighbor lies in an adjacent block (possibly a ghost block)
    Remote(CellIdx),
    /// No block exists in that direction
    Missing,
}

impl NghLookup {
    /// Resolved cell, if any
    #[inline]
    pub fn cell(self) -> Option<CellIdx> {
        match self {
            NghLookup::Local(c) | NghLookup::Remote(c) => Some(c),
            NghLookup::Missing => None,
        }
    }
}

/// Per-axis block jump flag of an in-block coordinate that may have left
/// the block: `-1` below, `0` inside, `+1` above
#[inline(always)]
fn block_flag(v: i32, side: i32) -> i32 {
    if v < 0 {
        -1
    } else if v >= side {
        1
    } else {
        0
    }
}

/// Morton (Z-order) code of a non-negative block coordinate
pub(crate) fn morton_encode(x: i32, y: i32, z: i32) -> u64 {
    let x = u64::from(x.max(0).unsigned_abs());
    let y = u64::from(y.max(0).unsigned_abs());
    let z = u64::from(z.max(0).unsigned_abs());

    let mut result = 0u64;
    for i in 0..21 {
        // 21 bits per coordinate = 63 bits total
        result |= ((x & (1 << i)) << (2 * i))
            | ((y & (1 << i)) << (2 * i + 1))
            | ((z & (1 << i)) << (2 * i + 2));
    }
    result
}

/// Block geometry, activity and adjacency of one device partition
#[derive(Debug, Clone)]
pub struct SpatialIndex<S: BlockShape> {
    /// Block coordinate (in block units) of every local block
    block_coords: Vec<Index3>,
    mask: ActiveMask,
    connectivity: BlockConnectivity,
    sectors: SectorBounds,
    lookup: FxHashMap<Index3, u32>,
    _shape: PhantomData<S>,
}

impl<S: BlockShape> SpatialIndex<S> {
    /// Build an index from blocks already laid out in sector order.
    ///
    /// # Arguments
    /// * `block_coords` - Block coordinate of every local block
    /// * `mask` - Activity mask with one entry per local block
    /// * `sectors` - Sector bounds; `sectors.total()` must equal the block count
    pub fn new(block_coords: Vec<Index3>, mask: ActiveMask, sectors: SectorBounds) -> Self {
        debug_assert_eq!(block_coords.len(), mask.num_blocks());
        debug_assert_eq!(block_coords.len(), sectors.total() as usize);

        let lookup: FxHashMap<Index3, u32> = block_coords
            .iter()
            .enumerate()
            .map(|(id, coord)| (*coord, id as u32))
            .collect();

        let mut connectivity = BlockConnectivity::new(block_coords.len());
        for (id, coord) in block_coords.iter().enumerate() {
            for dz in -1..=1 {
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let ngh = coord + Index3::new(dx, dy, dz);
                        if let Some(&n) = lookup.get(&ngh) {
                            connectivity.set_neighbor(id as u32, connectivity_entry(dx, dy, dz), n);
                        }
                    }
                }
            }
        }

        Self {
            block_coords,
            mask,
            connectivity,
            sectors,
            lookup,
            _shape: PhantomData,
        }
    }

    /// Blocks in the partition, ghosts included
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.block_coords.len()
    }

    #[inline]
    pub fn sectors(&self) -> &SectorBounds {
        &self.sectors
    }

    #[inline]
    pub fn mask(&self) -> &ActiveMask {
        &self.mask
    }

    #[inline]
    pub fn connectivity(&self) -> &BlockConnectivity {
        &self.connectivity
    }

    /// Block coordinate (block units) of a local block
    #[inline]
    pub fn block_coord(&self, block: u32) -> Index3 {
        self.block_coords[block as usize]
    }

    /// Global coordinate of the first cell of a local block
    #[inline]
    pub fn block_origin(&self, block: u32) -> Index3 {
        self.block_coords[block as usize] * S::SIDE
    }

    /// Local block id holding the given block coordinate
    pub fn block_id(&self, block_coord: &Index3) -> Option<u32> {
        self.lookup.get(block_coord).copied()
    }

    /// Global cell coordinate of a cell
    #[inline]
    pub fn global_index(&self, cell: &CellIdx) -> Index3 {
        self.block_origin(cell.block) + cell.local
    }

    /// Resolve a global coordinate to a local cell (active or not)
    pub fn locate(&self, global: &Index3) -> Option<CellIdx> {
        let block_coord = global.map(|c| c.div_euclid(S::SIDE));
        let block = self.block_id(&block_coord)?;
        Some(CellIdx::new(block, global - block_coord * S::SIDE))
    }

    /// True if the cell belongs to the simulated domain
    #[inline]
    pub fn is_active(&self, cell: &CellIdx) -> bool {
        cell.block != INVALID_BLOCK
            && self
                .mask
                .is_active(cell.block as usize, S::offset(&cell.local))
    }

    /// Resolve the neighbor at `offset` from `cell`.
    ///
    /// The connectivity table only reaches one block away, so an offset with
    /// any component outside `[-SIDE, SIDE]` resolves to [`NghLookup::Missing`].
    #[inline]
    pub fn resolve(&self, cell: &CellIdx, offset: &Index3) -> NghLookup {
        if offset.iter().any(|o| o.abs() > S::SIDE) {
            return NghLookup::Missing;
        }
        let ngh = cell.local + offset;
        let flags = ngh.map(|c| block_flag(c, S::SIDE));
        if flags == Index3::zeros() {
            return NghLookup::Local(CellIdx::new(cell.block, ngh));
        }
        self.jump(cell.block, ngh, flags)
    }

    /// Compile-time offset variant of [`SpatialIndex::resolve`]: axes with a
    /// zero offset skip the block flag test entirely.
    #[inline]
    pub fn resolve_const<const X: i32, const Y: i32, const Z: i32>(
        &self,
        cell: &CellIdx,
    ) -> NghLookup {
        if X.abs() > S::SIDE || Y.abs() > S::SIDE || Z.abs() > S::SIDE {
            return NghLookup::Missing;
        }
        let ngh = Index3::new(cell.local.x + X, cell.local.y + Y, cell.local.z + Z);
        let fx = if X == 0 { 0 } else { block_flag(ngh.x, S::SIDE) };
        let fy = if Y == 0 { 0 } else { block_flag(ngh.y, S::SIDE) };
        let fz = if Z == 0 { 0 } else { block_flag(ngh.z, S::SIDE) };
        if fx == 0 && fy == 0 && fz == 0 {
            return NghLookup::Local(CellIdx::new(cell.block, ngh));
        }
        self.jump(cell.block, ngh, Index3::new(fx, fy, fz))
    }

    #[inline(always)]
    fn jump(&self, block: u32, ngh: Index3, flags: Index3) -> NghLookup {
        let remote = self.connectivity.neighbor(block, flags.x, flags.y, flags.z);
        if remote == INVALID_BLOCK {
            NghLookup::Missing
        } else {
            NghLookup::Remote(CellIdx::new(remote, ngh - flags * S::SIDE))
        }
    }

    /// Active neighbor at `offset`, if any
    #[inline]
    pub fn ngh_cell(&self, cell: &CellIdx, offset: &Index3) -> Option<CellIdx> {
        self.resolve(cell, offset)
            .cell()
            .filter(|n| self.is_active(n))
    }

    /// Active cells of one block
    pub fn active_cells(&self, block: u32) -> impl Iterator<Item = CellIdx> + '_ {
        self.mask
            .active_offsets(block as usize)
            .map(move |o| CellIdx::new(block, S::local(o)))
    }

    /// Active cells of every block in a view
    pub fn view_cells(&self, view: DataView) -> impl Iterator<Item = CellIdx> + '_ {
        self.sectors
            .view_ranges(view)
            .into_iter()
            .flatten()
            .flat_map(move |b| self.active_cells(b))
    }

    /// Number of active cells in a view
    pub fn active_count(&self, view: DataView) -> usize {
        self.sectors
            .view_ranges(view)
            .into_iter()
            .flatten()
            .map(|b| self.mask.count_block(b as usize))
            .sum()
    }

    /// Local blocks of one sector
    pub fn sector_blocks(&self, sector: Sector) -> std::ops::Range<u32> {
        self.sectors.range(sector)
    }
}
