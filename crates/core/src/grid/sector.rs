//! Partition sectors and data views
//!
//! Each device partition orders its blocks in contiguous sectors. Owned blocks
//! come first (interior, then the boundary slab facing the upper neighbor),
//! followed by ghost copies and the boundary slab facing the lower neighbor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Block sector of a device partition, in memory order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sector {
    /// Owned blocks that no other device needs
    Interior,
    /// Owned blocks read as ghosts by the upper neighbor
    BoundaryUp,
    /// Copies of the upper neighbor's lower boundary
    GhostUp,
    /// Owned blocks read as ghosts by the lower neighbor
    BoundaryDown,
    /// Copies of the lower neighbor's upper boundary
    GhostDown,
}

impl Sector {
    /// All sectors in memory order
    pub const ALL: [Sector; 5] = [
        Sector::Interior,
        Sector::BoundaryUp,
        Sector::GhostUp,
        Sector::BoundaryDown,
        Sector::GhostDown,
    ];

    #[inline]
    pub const fn position(self) -> usize {
        match self {
            Sector::Interior => 0,
            Sector::BoundaryUp => 1,
            Sector::GhostUp => 2,
            Sector::BoundaryDown => 3,
            Sector::GhostDown => 4,
        }
    }

    /// True for sectors whose blocks the device owns
    #[inline]
    pub const fn is_owned(self) -> bool {
        !self.is_ghost()
    }

    #[inline]
    pub const fn is_ghost(self) -> bool {
        matches!(self, Sector::GhostUp | Sector::GhostDown)
    }

    /// True for the sectors that use the dense per-sector layout
    #[inline]
    pub const fn is_halo(self) -> bool {
        !matches!(self, Sector::Interior)
    }
}

/// Subset of a partition's owned cells that a container iterates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataView {
    /// Every owned cell
    #[default]
    Standard,
    /// Owned cells that no neighbor reads as ghosts
    Internal,
    /// Owned cells in the boundary slabs
    Boundary,
}

impl DataView {
    /// True if blocks of `sector` take part in this view
    #[inline]
    pub const fn includes(self, sector: Sector) -> bool {
        match self {
            DataView::Standard => sector.is_owned(),
            DataView::Internal => matches!(sector, Sector::Interior),
            DataView::Boundary => matches!(sector, Sector::BoundaryUp | Sector::BoundaryDown),
        }
    }
}

impl fmt::Display for DataView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataView::Standard => "standard",
            DataView::Internal => "internal",
            DataView::Boundary => "boundary",
        };
        f.write_str(name)
    }
}

/// First block of every sector of one partition, plus the total block count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectorBounds {
    first: [u32; 6],
}

impl SectorBounds {
    /// Build bounds from the number of blocks in each sector (memory order)
    pub fn from_lengths(lengths: [u32; 5]) -> Self {
        let mut first = [0u32; 6];
        for (i, len) in lengths.iter().enumerate() {
            first[i + 1] = first[i] + len;
        }
        Self { first }
    }

    /// Sector containing `block`
    #[inline]
    pub fn sector_of(&self, block: u32) -> Sector {
        if block < self.first[1] {
            Sector::Interior
        } else if block < self.first[2] {
            Sector::BoundaryUp
        } else if block < self.first[3] {
            Sector::GhostUp
        } else if block < self.first[4] {
            Sector::BoundaryDown
        } else {
            Sector::GhostDown
        }
    }

    #[inline]
    pub fn first_block(&self, sector: Sector) -> u32 {
        self.first[sector.position()]
    }

    #[inline]
    pub fn len(&self, sector: Sector) -> u32 {
        let i = sector.position();
        self.first[i + 1] - self.first[i]
    }

    pub fn range(&self, sector: Sector) -> Range<u32> {
        let i = sector.position();
        self.first[i]..self.first[i + 1]
    }

    /// Total blocks including ghosts
    #[inline]
    pub fn total(&self) -> u32 {
        self.first[5]
    }

    /// Blocks the partition owns
    pub fn owned(&self) -> u32 {
        self.len(Sector::Interior) + self.len(Sector::BoundaryUp) + self.len(Sector::BoundaryDown)
    }

    /// Block ranges covered by a view, ascending
    pub fn view_ranges(&self, view: DataView) -> Vec<Range<u32>> {
        Sector::ALL
            .iter()
            .filter(|s| view.includes(**s))
            .map(|s| self.range(*s))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// True if `block` takes part in `view`
    #[inline]
    pub fn in_view(&self, block: u32, view: DataView) -> bool {
        block < self.total() && view.includes(self.sector_of(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_lookup() {
        let bounds = SectorBounds::from_lengths([4, 2, 2, 1, 1]);
        assert_eq!(bounds.total(), 10);
        assert_eq!(bounds.owned(), 7);
        assert_eq!(bounds.sector_of(0), Sector::Interior);
        assert_eq!(bounds.sector_of(3), Sector::Interior);
        assert_eq!(bounds.sector_of(4), Sector::BoundaryUp);
        assert_eq!(bounds.sector_of(6), Sector::GhostUp);
        assert_eq!(bounds.sector_of(8), Sector::BoundaryDown);
        assert_eq!(bounds.sector_of(9), Sector::GhostDown);
        assert_eq!(bounds.first_block(Sector::BoundaryDown), 8);
        assert_eq!(bounds.len(Sector::GhostUp), 2);
    }

    #[test]
    fn test_views_partition_owned_blocks() {
        let bounds = SectorBounds::from_lengths([3, 1, 1, 2, 2]);
        let count = |view| {
            bounds
                .view_ranges(view)
                .into_iter()
                .map(|r| r.len())
                .sum::<usize>()
        };
        assert_eq!(count(DataView::Standard), bounds.owned() as usize);
        assert_eq!(
            count(DataView::Internal) + count(DataView::Boundary),
            count(DataView::Standard)
        );
        assert!(!bounds.in_view(4, DataView::Standard));
        assert!(bounds.in_view(5, DataView::Boundary));
    }

    #[test]
    fn test_empty_sectors() {
        let bounds = SectorBounds::from_lengths([5, 0, 0, 0, 0]);
        assert_eq!(bounds.sector_of(4), Sector::Interior);
        assert!(bounds.view_ranges(DataView::Boundary).is_empty());
    }
}
