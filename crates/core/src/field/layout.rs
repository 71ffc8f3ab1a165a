//! Field memory layouts and pitch computation
//!
//! Interior blocks use a per-block structure-of-arrays packing, so one block
//! of one component is a contiguous run of `VOLUME` values. Halo sectors use a
//! denser per-sector packing where one component of the whole sector is
//! contiguous, which lets a halo exchange move a sector with one copy per
//! component.

use crate::core_types::BlockShape;
use crate::grid::{Sector, SectorBounds};
use crate::index::CellIdx;
use serde::{Deserialize, Serialize};

/// Ordering of the components of a multi-component field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryLayout {
    /// All cells of component 0, then component 1, ...
    #[default]
    StructOfArrays,
    /// All components of cell 0, then cell 1, ...
    ArrayOfStructs,
}

/// Construction options for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldOptions {
    pub layout: MemoryLayout,
}

impl FieldOptions {
    pub fn with_layout(layout: MemoryLayout) -> Self {
        Self { layout }
    }
}

/// Element offset of `(cell, comp)` in a partition buffer.
///
/// # Arguments
/// * `layout` - Component ordering
/// * `sectors` - Sector bounds of the partition
/// * `cardinality` - Components per cell
/// * `cell` - Resolved cell
/// * `comp` - Component
#[inline(always)]
pub fn pitch<S: BlockShape>(
    layout: MemoryLayout,
    sectors: &SectorBounds,
    cardinality: usize,
    cell: &CellIdx,
    comp: usize,
) -> usize {
    let volume = S::VOLUME;
    let offset = S::offset(&cell.local);
    let block = cell.block as usize;
    let sector = sectors.sector_of(cell.block);

    if sector == Sector::Interior {
        return match layout {
            MemoryLayout::StructOfArrays => volume * (block * cardinality + comp) + offset,
            MemoryLayout::ArrayOfStructs => (block * volume + offset) * cardinality + comp,
        };
    }

    let first = sectors.first_block(sector) as usize;
    let base = first * volume * cardinality;
    let in_sector = block - first;
    match layout {
        MemoryLayout::StructOfArrays => {
            let len = sectors.len(sector) as usize;
            base + volume * len * comp + in_sector * volume + offset
        }
        MemoryLayout::ArrayOfStructs => base + (in_sector * volume + offset) * cardinality + comp,
    }
}

/// Element offset of the first value of a sector
#[inline]
pub fn sector_base<S: BlockShape>(sectors: &SectorBounds, cardinality: usize, sector: Sector) -> usize {
    sectors.first_block(sector) as usize * S::VOLUME * cardinality
}
