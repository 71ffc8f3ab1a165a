//! Multi-resolution grid hierarchy
//!
//! Level 0 is the finest level. A cell at level `l + 1` covers
//! `refinement³` cells at level `l`. Activation is closed under two rules:
//! an active fine cell makes its parent active (the parent then "has
//! children"), and a parent with any active child has all its children
//! active.

use crate::core_types::index3::{div_floor, in_box, iter_box, rem_floor};
use crate::core_types::{ActiveMask, BlockShape, Index3};
use crate::error::{GridError, GridResult};
use crate::grid::{BlockGrid, DataView, GridConfig, Stencil};
use crate::index::{CellIdx, SpatialIndex};
use crate::scheduler::ProfilerScope;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Shape of the level hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiResDescriptor {
    /// Number of levels
    pub depth: usize,
    /// Cells per axis a coarse cell is split into
    pub refinement: i32,
}

impl Default for MultiResDescriptor {
    fn default() -> Self {
        Self {
            depth: 3,
            refinement: 2,
        }
    }
}

impl MultiResDescriptor {
    pub fn new(depth: usize, refinement: i32) -> Self {
        Self { depth, refinement }
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.depth == 0 {
            return Err(GridError::invalid_domain("a hierarchy needs at least one level"));
        }
        if self.refinement < 2 {
            return Err(GridError::invalid_domain(format!(
                "refinement factor {} must be at least 2",
                self.refinement
            )));
        }
        Ok(())
    }

    /// Extent of a level given the finest extent
    pub fn level_dim(&self, finest: &Index3, level: usize) -> Index3 {
        let mut dim = *finest;
        for _ in 0..level {
            dim = dim.map(|d| (d + self.refinement - 1) / self.refinement);
        }
        dim
    }
}

#[inline]
fn linear(g: &Index3, dim: &Index3) -> usize {
    (g.x + dim.x * (g.y + dim.y * g.z)) as usize
}

/// Stack of single-device block grids linked by a refinement factor
#[derive(Debug, Clone)]
pub struct MultiResGrid<S: BlockShape> {
    descriptor: MultiResDescriptor,
    levels: Vec<BlockGrid<S>>,
    /// Per level, set for cells that have children
    refined: Vec<ActiveMask>,
}

impl<S: BlockShape> MultiResGrid<S> {
    /// Build the hierarchy.
    ///
    /// # Arguments
    /// * `finest_dim` - Extent of level 0
    /// * `descriptor` - Depth and refinement factor
    /// * `stencil` - Stencil shared by every level
    /// * `config` - Device configuration; only one device is supported
    /// * `active` - Initial activation `(level, global) -> bool`, before closure
    pub fn new<F>(
        finest_dim: Index3,
        descriptor: MultiResDescriptor,
        stencil: Stencil,
        config: GridConfig,
        active: F,
    ) -> GridResult<Self>
    where
        F: Fn(usize, &Index3) -> bool + Sync,
    {
        let _scope = ProfilerScope::new("multires_build");
        descriptor.validate()?;
        config.validate()?;
        if config.devices != 1 {
            return Err(GridError::unsupported(format!(
                "multi-resolution grids run on one device, {} requested",
                config.devices
            )));
        }

        let depth = descriptor.depth;
        let r = descriptor.refinement;
        let dims: Vec<Index3> = (0..depth).map(|l| descriptor.level_dim(&finest_dim, l)).collect();

        let mut sets: Vec<Vec<bool>> = dims
            .iter()
            .enumerate()
            .map(|(level, dim)| {
                let cells: Vec<Index3> = iter_box(*dim).collect();
                cells.par_iter().map(|g| active(level, g)).collect()
            })
            .collect();

        for level in 0..depth - 1 {
            let (fine_dim, coarse_dim) = (dims[level], dims[level + 1]);
            let parents: FxHashSet<Index3> = iter_box(fine_dim)
                .filter(|g| sets[level][linear(g, &fine_dim)])
                .map(|g| div_floor(&g, r))
                .collect();
            for parent in &parents {
                for c in iter_box(Index3::repeat(r)) {
                    let child = parent * r + c;
                    if in_box(&child, &fine_dim) {
                        sets[level][linear(&child, &fine_dim)] = true;
                    }
                }
                sets[level + 1][linear(parent, &coarse_dim)] = true;
            }
        }

        let mut levels = Vec::with_capacity(depth);
        for (level, dim) in dims.iter().enumerate() {
            let set = &sets[level];
            let grid = BlockGrid::new(*dim, stencil.clone(), config.clone(), |g| set[linear(g, dim)])?;
            levels.push(grid);
        }

        let refined = levels
            .iter()
            .enumerate()
            .map(|(level, grid)| {
                let index = grid.partition(0);
                let mut mask = ActiveMask::new(index.num_blocks(), S::VOLUME);
                if level == 0 {
                    return mask;
                }
                let (fine_set, fine_dim) = (&sets[level - 1], dims[level - 1]);
                for block in 0..index.num_blocks() as u32 {
                    for cell in index.active_cells(block) {
                        let first_child = index.global_index(&cell) * r;
                        if in_box(&first_child, &fine_dim) && fine_set[linear(&first_child, &fine_dim)] {
                            mask.set_active(block as usize, S::offset(&cell.local), true);
                        }
                    }
                }
                mask
            })
            .collect();

        let grid = Self {
            descriptor,
            levels,
            refined,
        };
        for level in 0..depth {
            info!(
                level,
                dim = ?(dims[level].x, dims[level].y, dims[level].z),
                active = grid.levels[level].active_count(),
                refined = grid.refined_count(level),
                "multires level"
            );
        }
        Ok(grid)
    }

    pub fn descriptor(&self) -> &MultiResDescriptor {
        &self.descriptor
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn refinement(&self) -> i32 {
        self.descriptor.refinement
    }

    /// Block grid of one level
    pub fn level(&self, level: usize) -> &BlockGrid<S> {
        &self.levels[level]
    }

    /// Spatial index of one level
    #[inline]
    pub fn index(&self, level: usize) -> &SpatialIndex<S> {
        self.levels[level].partition(0)
    }

    /// True if the cell is refined at the next finer level
    #[inline]
    pub fn has_children(&self, level: usize, cell: &CellIdx) -> bool {
        self.refined[level].is_active(cell.block as usize, S::offset(&cell.local))
    }

    /// True if the active same-level neighbor in `dir` has children
    #[inline]
    pub fn has_children_dir(&self, level: usize, cell: &CellIdx, dir: &Index3) -> bool {
        self.index(level)
            .ngh_cell(cell, dir)
            .is_some_and(|n| self.has_children(level, &n))
    }

    /// Number of refined cells of a level
    pub fn refined_count(&self, level: usize) -> usize {
        let mask = &self.refined[level];
        (0..mask.num_blocks()).map(|b| mask.count_block(b)).sum()
    }

    /// Position of a cell inside its parent, each component in `[0, refinement)`
    #[inline]
    pub fn child_location(&self, level: usize, cell: &CellIdx) -> Index3 {
        rem_floor(&self.index(level).global_index(cell), self.refinement())
    }

    /// Parent at `level + 1`
    pub fn parent_cell(&self, level: usize, cell: &CellIdx) -> Option<CellIdx> {
        if level + 1 >= self.depth() {
            return None;
        }
        let parent = div_floor(&self.index(level).global_index(cell), self.refinement());
        let coarse = self.index(level + 1);
        coarse.locate(&parent).filter(|p| coarse.is_active(p))
    }

    /// Child at `level - 1` at position `child` inside the cell
    #[inline]
    pub fn child_cell(&self, level: usize, cell: &CellIdx, child: &Index3) -> Option<CellIdx> {
        if level == 0 {
            return None;
        }
        let global = self.index(level).global_index(cell) * self.refinement() + child;
        let fine = self.index(level - 1);
        fine.locate(&global).filter(|c| fine.is_active(c))
    }

    /// Coarse cell at `parent + uncle_dir` on level `level + 1`
    #[inline]
    pub fn uncle_cell(&self, level: usize, cell: &CellIdx, uncle_dir: &Index3) -> Option<CellIdx> {
        if level + 1 >= self.depth() {
            return None;
        }
        let parent = div_floor(&self.index(level).global_index(cell), self.refinement());
        let coarse = self.index(level + 1);
        coarse
            .locate(&(parent + uncle_dir))
            .filter(|u| coarse.is_active(u))
    }

    /// Active cells of a level, refined ones included
    pub fn active_count(&self, level: usize) -> usize {
        self.index(level).active_count(DataView::Standard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Block2;

    fn two_level() -> MultiResGrid<Block2> {
        // Fine cells active only in the x >= 4 half
        MultiResGrid::new(
            Index3::new(8, 4, 4),
            MultiResDescriptor::new(2, 2),
            Stencil::s19_d3q19(),
            GridConfig::default(),
            |level, g| level == 1 || g.x >= 4,
        )
        .unwrap()
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(MultiResDescriptor::new(0, 2).validate().is_err());
        assert!(MultiResDescriptor::new(2, 1).validate().is_err());
        let d = MultiResDescriptor::default();
        assert_eq!(d.level_dim(&Index3::new(9, 8, 1), 1), Index3::new(5, 4, 1));
    }

    #[test]
    fn test_refinement_links() {
        let grid = two_level();
        assert_eq!(grid.depth(), 2);
        assert_eq!(grid.active_count(0), 4 * 4 * 4);
        assert_eq!(grid.active_count(1), 4 * 2 * 2);
        assert_eq!(grid.refined_count(1), 2 * 2 * 2);
        assert_eq!(grid.refined_count(0), 0);

        let coarse = grid.index(1);
        let refined = coarse.locate(&Index3::new(2, 1, 0)).unwrap();
        let plain = coarse.locate(&Index3::new(1, 1, 0)).unwrap();
        assert!(grid.has_children(1, &refined));
        assert!(!grid.has_children(1, &plain));
        assert!(grid.has_children_dir(1, &plain, &Index3::new(1, 0, 0)));

        let child = grid.child_cell(1, &refined, &Index3::new(1, 0, 1)).unwrap();
        assert_eq!(grid.index(0).global_index(&child), Index3::new(5, 2, 1));
        assert_eq!(grid.child_location(0, &child), Index3::new(1, 0, 1));
        assert_eq!(grid.parent_cell(0, &child), Some(refined));
        assert!(grid.child_cell(1, &plain, &Index3::zeros()).is_none());
        assert_eq!(
            grid.uncle_cell(0, &child, &Index3::new(-1, 0, 0)),
            Some(plain)
        );
    }

    #[test]
    fn test_activation_closure_completes_siblings() {
        // A single fine cell drags in its 7 siblings and its parent
        let grid: MultiResGrid<Block2> = MultiResGrid::new(
            Index3::new(4, 4, 4),
            MultiResDescriptor::new(2, 2),
            Stencil::s7_laplace(),
            GridConfig::default(),
            |level, g| level == 0 && *g == Index3::new(3, 3, 3),
        )
        .unwrap();
        assert_eq!(grid.active_count(0), 8);
        assert_eq!(grid.active_count(1), 1);
        assert_eq!(grid.refined_count(1), 1);
    }

    #[test]
    fn test_multi_device_is_unsupported() {
        let result: GridResult<MultiResGrid<Block2>> = MultiResGrid::new(
            Index3::new(4, 4, 8),
            MultiResDescriptor::new(2, 2),
            Stencil::s7_laplace(),
            GridConfig::with_devices(2),
            |_, _| true,
        );
        assert!(matches!(result, Err(GridError::Unsupported(_))));
    }
}
