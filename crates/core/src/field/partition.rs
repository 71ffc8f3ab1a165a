//! Per-device views of field memory
//!
//! A [`Partition`] is a read view holding a shared lock on one device's
//! buffer; a [`PartitionMut`] holds the exclusive lock and hands out
//! per-block mutable slices so kernels can write cells in parallel without
//! aliasing.

use super::layout::{pitch, MemoryLayout};
use super::FieldValue;
use crate::core_types::{BlockShape, Index3};
use crate::grid::{DataView, Sector, SectorBounds};
use crate::index::{CellIdx, DeviceIdx, NghLookup, SpatialIndex};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use rayon::prelude::*;

/// Result of a neighbor read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NghData<T> {
    /// Neighbor value, or the fallback when `is_valid` is false
    pub value: T,
    /// True when the neighbor exists and is active
    pub is_valid: bool,
}

impl<T> NghData<T> {
    #[inline]
    pub fn valid(value: T) -> Self {
        Self {
            value,
            is_valid: true,
        }
    }

    #[inline]
    pub fn invalid(fallback: T) -> Self {
        Self {
            value: fallback,
            is_valid: false,
        }
    }
}

/// Read view of one device partition
pub struct Partition<'a, T, S: BlockShape> {
    data: RwLockReadGuard<'a, Vec<T>>,
    index: &'a SpatialIndex<S>,
    cardinality: usize,
    layout: MemoryLayout,
    outside: T,
    device: DeviceIdx,
}

impl<'a, T: FieldValue, S: BlockShape> Partition<'a, T, S> {
    pub(crate) fn new(
        data: RwLockReadGuard<'a, Vec<T>>,
        index: &'a SpatialIndex<S>,
        cardinality: usize,
        layout: MemoryLayout,
        outside: T,
        device: DeviceIdx,
    ) -> Self {
        Self {
            data,
            index,
            cardinality,
            layout,
            outside,
            device,
        }
    }

    pub fn device(&self) -> DeviceIdx {
        self.device
    }

    pub fn index(&self) -> &'a SpatialIndex<S> {
        self.index
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Value used for reads that fall outside the domain
    pub fn outside(&self) -> T {
        self.outside
    }

    #[inline(always)]
    fn offset_of(&self, cell: &CellIdx, comp: usize) -> usize {
        debug_assert!(comp < self.cardinality);
        pitch::<S>(self.layout, self.index.sectors(), self.cardinality, cell, comp)
    }

    /// Value of component `comp` at an active cell
    #[inline]
    pub fn get(&self, cell: &CellIdx, comp: usize) -> T {
        self.data[self.offset_of(cell, comp)]
    }

    /// All components of a cell; `C` must equal the field cardinality and
    /// is used as a constant in the pitch
    #[inline]
    pub fn get_fixed<const C: usize>(&self, cell: &CellIdx) -> [T; C] {
        debug_assert_eq!(C, self.cardinality);
        let sectors = self.index.sectors();
        std::array::from_fn(|comp| self.data[pitch::<S>(self.layout, sectors, C, cell, comp)])
    }

    #[inline]
    pub fn is_active(&self, cell: &CellIdx) -> bool {
        self.index.is_active(cell)
    }

    #[inline]
    pub fn global_index(&self, cell: &CellIdx) -> Index3 {
        self.index.global_index(cell)
    }

    #[inline(always)]
    fn read_lookup(&self, lookup: NghLookup, comp: usize, fallback: T) -> NghData<T> {
        match lookup.cell() {
            Some(ngh) if self.index.is_active(&ngh) => NghData::valid(self.get(&ngh, comp)),
            _ => NghData::invalid(fallback),
        }
    }

    /// Neighbor read with the field's outside value as fallback
    #[inline]
    pub fn ngh_data(&self, cell: &CellIdx, offset: &Index3, comp: usize) -> NghData<T> {
        self.ngh_data_or(cell, offset, comp, self.outside)
    }

    /// Neighbor read with an explicit fallback for missing or inactive cells
    #[inline]
    pub fn ngh_data_or(&self, cell: &CellIdx, offset: &Index3, comp: usize, fallback: T) -> NghData<T> {
        self.read_lookup(self.index.resolve(cell, offset), comp, fallback)
    }

    /// Neighbor read with a compile-time offset
    #[inline]
    pub fn ngh_data_const<const X: i32, const Y: i32, const Z: i32>(
        &self,
        cell: &CellIdx,
        comp: usize,
    ) -> NghData<T> {
        self.read_lookup(self.index.resolve_const::<X, Y, Z>(cell), comp, self.outside)
    }
}

/// Mutable slices of one block
pub enum BlockSlices<'m, T> {
    /// One slice of `VOLUME` values per component
    Planar(Vec<&'m mut [T]>),
    /// `VOLUME * cardinality` interleaved values
    Interleaved { data: &'m mut [T], cardinality: usize },
}

/// Write handle to one cell inside a parallel kernel
pub struct CellOut<'b, 'm, T> {
    block: &'b mut BlockSlices<'m, T>,
    offset: usize,
}

impl<T: Copy> CellOut<'_, '_, T> {
    /// Current value of a component of this cell
    #[inline]
    pub fn get(&self, comp: usize) -> T {
        match &*self.block {
            BlockSlices::Planar(comps) => comps[comp][self.offset],
            BlockSlices::Interleaved { data, cardinality } => data[self.offset * cardinality + comp],
        }
    }

    #[inline]
    pub fn set(&mut self, comp: usize, value: T) {
        match &mut *self.block {
            BlockSlices::Planar(comps) => comps[comp][self.offset] = value,
            BlockSlices::Interleaved { data, cardinality } => {
                data[self.offset * *cardinality + comp] = value;
            }
        }
    }
}

/// Split a partition buffer into per-block slices, in local block order
fn split_blocks<'m, T, S: BlockShape>(
    mut rest: &'m mut [T],
    sectors: &SectorBounds,
    layout: MemoryLayout,
    cardinality: usize,
) -> Vec<BlockSlices<'m, T>> {
    let volume = S::VOLUME;
    let mut out = Vec::with_capacity(sectors.total() as usize);
    for sector in Sector::ALL {
        let len = sectors.len(sector) as usize;
        if len == 0 {
            continue;
        }
        let (region, tail) = std::mem::take(&mut rest).split_at_mut(len * volume * cardinality);
        rest = tail;
        match (sector, layout) {
            (_, MemoryLayout::ArrayOfStructs) => {
                out.extend(
                    region
                        .chunks_mut(volume * cardinality)
                        .map(|data| BlockSlices::Interleaved { data, cardinality }),
                );
            }
            (Sector::Interior, MemoryLayout::StructOfArrays) => {
                out.extend(
                    region
                        .chunks_mut(volume * cardinality)
                        .map(|chunk| BlockSlices::Planar(chunk.chunks_mut(volume).collect())),
                );
            }
            (_, MemoryLayout::StructOfArrays) => {
                let mut blocks: Vec<Vec<&'m mut [T]>> =
                    (0..len).map(|_| Vec::with_capacity(cardinality)).collect();
                for component in region.chunks_mut(volume * len) {
                    for (block, slice) in component.chunks_mut(volume).enumerate() {
                        blocks[block].push(slice);
                    }
                }
                out.extend(blocks.into_iter().map(BlockSlices::Planar));
            }
        }
    }
    out
}

/// Exclusive view of one device partition
pub struct PartitionMut<'a, T, S: BlockShape> {
    data: RwLockWriteGuard<'a, Vec<T>>,
    index: &'a SpatialIndex<S>,
    cardinality: usize,
    layout: MemoryLayout,
    device: DeviceIdx,
}

impl<'a, T: FieldValue, S: BlockShape> PartitionMut<'a, T, S> {
    pub(crate) fn new(
        data: RwLockWriteGuard<'a, Vec<T>>,
        index: &'a SpatialIndex<S>,
        cardinality: usize,
        layout: MemoryLayout,
        device: DeviceIdx,
    ) -> Self {
        Self {
            data,
            index,
            cardinality,
            layout,
            device,
        }
    }

    pub fn device(&self) -> DeviceIdx {
        self.device
    }

    pub fn index(&self) -> &'a SpatialIndex<S> {
        self.index
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    #[inline(always)]
    fn offset_of(&self, cell: &CellIdx, comp: usize) -> usize {
        debug_assert!(comp < self.cardinality);
        pitch::<S>(self.layout, self.index.sectors(), self.cardinality, cell, comp)
    }

    #[inline]
    pub fn get(&self, cell: &CellIdx, comp: usize) -> T {
        self.data[self.offset_of(cell, comp)]
    }

    #[inline]
    pub fn set(&mut self, cell: &CellIdx, comp: usize, value: T) {
        let offset = self.offset_of(cell, comp);
        self.data[offset] = value;
    }

    /// Run `kernel` on every active cell of the view, blocks in parallel
    pub fn for_each_cell<F>(&mut self, view: DataView, kernel: F)
    where
        F: Fn(CellIdx, &mut CellOut<'_, '_, T>) + Sync + Send,
    {
        self.for_each_in_sectors(|sector| view.includes(sector), kernel);
    }

    /// Run `kernel` on every active cell, ghost copies included
    pub(crate) fn for_each_local_cell<F>(&mut self, kernel: F)
    where
        F: Fn(CellIdx, &mut CellOut<'_, '_, T>) + Sync + Send,
    {
        self.for_each_in_sectors(|_| true, kernel);
    }

    fn for_each_in_sectors<P, F>(&mut self, include: P, kernel: F)
    where
        P: Fn(Sector) -> bool + Sync,
        F: Fn(CellIdx, &mut CellOut<'_, '_, T>) + Sync + Send,
    {
        let index = self.index;
        let sectors = *index.sectors();
        let mut blocks =
            split_blocks::<T, S>(&mut self.data[..], &sectors, self.layout, self.cardinality);
        blocks
            .par_iter_mut()
            .enumerate()
            .filter(|(block, _)| include(sectors.sector_of(*block as u32)))
            .for_each(|(block, slices)| {
                for offset in index.mask().active_offsets(block) {
                    let cell = CellIdx::new(block as u32, S::local(offset));
                    let mut out = CellOut {
                        block: &mut *slices,
                        offset,
                    };
                    kernel(cell, &mut out);
                }
            });
    }
}
