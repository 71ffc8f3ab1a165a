//! Coarse-fine interface protocol
//!
//! Three operations keep neighboring levels consistent during a
//! non-uniform time step:
//!
//! * **Store**: refined coarse cells gather the fine populations that leave
//!   the refined region towards an unrefined coarse neighbor.
//! * **Coalesce**: unrefined coarse cells next to a refined region read
//!   those gathered populations instead of streaming from the (stale)
//!   refined neighbor.
//! * **Explode**: fine cells on the edge of the refined region read the
//!   populations entering from the coarse side directly from the coarse
//!   "uncle" cell.
//!
//! Stream can absorb explode or coalesce to save a pass.

use super::field::{MultiResField, StoreBuffer};
use super::hierarchy::MultiResGrid;
use super::lattice::{uncle_offset, Lattice};
use crate::core_types::index3::iter_box;
use crate::core_types::{BlockShape, Index3};
use crate::error::{GridError, GridResult};
use crate::field::{FieldValue, Partition};
use crate::grid::DataView;
use crate::index::CellIdx;
use crate::scheduler::{Access, Container, Pattern};
use num_traits::{Float, NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Normalisation used when a coarse cell reads gathered fine data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CoalescenceMode {
    /// Store averages over contributors; coalesce divides by the refinement
    #[default]
    Averaging,
    /// Store sums; coalesce divides by contributors times refinement
    InitialStore,
}

/// Which interface operation, if any, stream performs inline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamFusion {
    #[default]
    None,
    Explosion,
    Coalescence,
}

#[inline]
fn scalar<T: Float>(v: usize) -> T {
    <T as NumCast>::from(v).unwrap_or_else(T::nan)
}

/// Visit the fine cells whose populations cross from the refined cell `cell`
/// into its unrefined neighbor in direction `q_dir`.
///
/// Children of `cell` and of its refined neighbors qualify when one fine
/// step along `q_dir` lands them in that coarse neighbor.
fn interface_children<S: BlockShape>(
    grid: &MultiResGrid<S>,
    lattice: &Lattice,
    level: usize,
    cell: &CellIdx,
    q_dir: &Index3,
    mut visit: impl FnMut(CellIdx),
) {
    let index = grid.index(level);
    let r = grid.refinement();
    for p in 0..lattice.q() {
        let p_dir = lattice.dir(p);
        let Some(p_cell) = index.ngh_cell(cell, &p_dir) else {
            continue;
        };
        if !grid.has_children(level, &p_cell) {
            continue;
        }
        let r_dir = q_dir - p_dir;
        for c in iter_box(Index3::repeat(r)) {
            if uncle_offset(&c, q_dir, r) == r_dir {
                if let Some(child) = grid.child_cell(level, &p_cell, &c) {
                    visit(child);
                }
            }
        }
    }
}

/// Same-level pull: population `q` from the neighbor at `-dir(q)` unless it
/// is missing or refined
#[inline]
fn streamed_value<T: FieldValue, S: BlockShape>(
    grid: &MultiResGrid<S>,
    lattice: &Lattice,
    level: usize,
    pout: &Partition<'_, T, S>,
    cell: &CellIdx,
    q: usize,
) -> Option<T> {
    let dir = -lattice.dir(q);
    let ngh = pout.index().ngh_cell(cell, &dir)?;
    if grid.has_children(level, &ngh) {
        None
    } else {
        Some(pout.get(&ngh, q))
    }
}

/// Population `q` entering from a refined neighbor, read from its store slot
#[inline]
#[allow(clippy::too_many_arguments)]
fn coalesced_value<T: FieldValue + Float, S: BlockShape>(
    grid: &MultiResGrid<S>,
    lattice: &Lattice,
    level: usize,
    mode: CoalescenceMode,
    pacc: &Partition<'_, T, S>,
    pcount: &Partition<'_, T, S>,
    cell: &CellIdx,
    q: usize,
) -> Option<T> {
    let dir = -lattice.dir(q);
    let ngh = pacc.index().ngh_cell(cell, &dir)?;
    if !grid.has_children(level, &ngh) {
        return None;
    }
    let slot = pacc.get(&ngh, q);
    let refinement: T = scalar(grid.refinement() as usize);
    Some(match mode {
        CoalescenceMode::Averaging => slot / refinement,
        CoalescenceMode::InitialStore => {
            let contributors = pcount.get(&ngh, q);
            assert!(
                contributors != T::zero(),
                "coalescence at level {level} read a zero contributor count for direction {q}; \
                 run sum_store before the first step"
            );
            slot / (contributors * refinement)
        }
    })
}

/// Population `q` entering a fine cell from the coarse side, read from the uncle
#[inline]
fn exploded_value<T: FieldValue, S: BlockShape>(
    grid: &MultiResGrid<S>,
    lattice: &Lattice,
    level: usize,
    pcoarse: &Partition<'_, T, S>,
    cell: &CellIdx,
    q: usize,
) -> Option<T> {
    let dir = -lattice.dir(q);
    if grid.index(level).ngh_cell(cell, &dir).is_some() {
        return None;
    }
    let location = grid.child_location(level, cell);
    let uncle_dir = uncle_offset(&location, &dir, grid.refinement());
    let uncle = grid.uncle_cell(level, cell, &uncle_dir)?;
    Some(pcoarse.get(&uncle, q))
}

/// Builder of the interface containers of one pair of population fields
pub struct MultiResProtocol<'a, T, S: BlockShape> {
    pub grid: &'a MultiResGrid<S>,
    pub lattice: &'a Lattice,
    /// Populations after collision (read by stream)
    pub fout: &'a MultiResField<'a, T, S>,
    /// Populations after streaming (written by stream)
    pub fin: &'a MultiResField<'a, T, S>,
    pub buffer: &'a StoreBuffer<'a, T, S>,
    pub mode: CoalescenceMode,
}

impl<T, S: BlockShape> Clone for MultiResProtocol<'_, T, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, S: BlockShape> Copy for MultiResProtocol<'_, T, S> {}

impl<'a, T: FieldValue + Float, S: BlockShape> MultiResProtocol<'a, T, S> {
    fn check_level(&self, level: usize, op: &str) -> GridResult<()> {
        if level >= self.grid.depth() {
            return Err(GridError::Protocol {
                level,
                message: format!("{op} on a hierarchy of depth {}", self.grid.depth()),
            });
        }
        Ok(())
    }

    fn check_finer(&self, level: usize, op: &str) -> GridResult<()> {
        self.check_level(level, op)?;
        if level == 0 {
            return Err(GridError::Protocol {
                level,
                message: format!("{op} needs a finer level"),
            });
        }
        Ok(())
    }

    fn check_coarser(&self, level: usize, op: &str) -> GridResult<()> {
        self.check_level(level, op)?;
        if level + 1 >= self.grid.depth() {
            return Err(GridError::Protocol {
                level,
                message: format!("{op} needs a coarser level"),
            });
        }
        Ok(())
    }

    /// Gather fine populations into the store buffer of `level`.
    ///
    /// Each call is one fine sub-step. The cycle counter in component 0
    /// decides whether the call overwrites (first sub-step of a coarse step)
    /// or accumulates into the slots.
    pub fn store(&self, level: usize) -> GridResult<Container<'a>> {
        self.check_finer(level, "store")?;
        let Self {
            grid, lattice, mode, ..
        } = *self;
        let fine = self.fout.level(level - 1);
        let acc = self.buffer.accumulator.level(level);
        let r = grid.refinement() as usize;
        let accesses = vec![
            Access::read(fine, Pattern::StencilDown),
            Access::read_write(acc, Pattern::Map),
        ];
        Ok(Container::compute(
            format!("store_{level}"),
            grid.level(level).launch(DataView::Standard),
            accesses,
            move |ctx| {
                let pfine = fine.partition(ctx.device)?;
                let mut pacc = acc.partition_mut(ctx.device)?;
                let index = grid.index(level);
                pacc.for_each_cell(ctx.view, |cell, out| {
                    if !grid.has_children(level, &cell) {
                        return;
                    }
                    let counter = ToPrimitive::to_usize(&out.get(0)).unwrap_or(0);
                    let accumulate = counter % r != 0;
                    out.set(0, scalar((counter + 1) % r));

                    for q in 1..lattice.q() {
                        let q_dir = lattice.dir(q);
                        let Some(ngh) = index.ngh_cell(&cell, &q_dir) else {
                            continue;
                        };
                        if grid.has_children(level, &ngh) {
                            continue;
                        }
                        let mut sum = T::zero();
                        let mut num = 0usize;
                        interface_children(grid, lattice, level, &cell, &q_dir, |child| {
                            sum = sum + pfine.get(&child, q);
                            num += 1;
                        });
                        if num == 0 {
                            continue;
                        }
                        let contribution = match mode {
                            CoalescenceMode::Averaging => sum / scalar(num),
                            CoalescenceMode::InitialStore => sum,
                        };
                        let value = if accumulate {
                            out.get(q) + contribution
                        } else {
                            contribution
                        };
                        out.set(q, value);
                    }
                });
                Ok(())
            },
        ))
    }

    /// Count, per refined cell and direction, the fine cells feeding each
    /// store slot. Structural: run once after the grid is built.
    pub fn sum_store(&self, level: usize) -> GridResult<Container<'a>> {
        self.check_finer(level, "sum_store")?;
        let Self { grid, lattice, .. } = *self;
        let counts = self.buffer.contributors.level(level);
        Ok(Container::compute(
            format!("sum_store_{level}"),
            grid.level(level).launch(DataView::Standard),
            vec![Access::write(counts)],
            move |ctx| {
                let mut pcount = counts.partition_mut(ctx.device)?;
                let index = grid.index(level);
                pcount.for_each_cell(ctx.view, |cell, out| {
                    if !grid.has_children(level, &cell) {
                        return;
                    }
                    for q in 1..lattice.q() {
                        let q_dir = lattice.dir(q);
                        let Some(ngh) = index.ngh_cell(&cell, &q_dir) else {
                            continue;
                        };
                        if grid.has_children(level, &ngh) {
                            continue;
                        }
                        let mut num = 0usize;
                        interface_children(grid, lattice, level, &cell, &q_dir, |_| num += 1);
                        out.set(q, scalar(num));
                    }
                });
                Ok(())
            },
        ))
    }

    /// Unrefined cells of `level` next to a refined neighbor read the
    /// gathered populations. Must follow the stores of a full coarse step.
    pub fn coalesce(&self, level: usize) -> GridResult<Container<'a>> {
        self.check_finer(level, "coalesce")?;
        let Self {
            grid, lattice, mode, ..
        } = *self;
        let acc = self.buffer.accumulator.level(level);
        let counts = self.buffer.contributors.level(level);
        let fin = self.fin.level(level);
        let mut accesses = vec![Access::read(acc, Pattern::Stencil)];
        if mode == CoalescenceMode::InitialStore {
            accesses.push(Access::read(counts, Pattern::Stencil));
        }
        accesses.push(Access::read_write(fin, Pattern::Map));
        Ok(Container::compute(
            format!("coalesce_{level}"),
            grid.level(level).launch(DataView::Standard),
            accesses,
            move |ctx| {
                let pacc = acc.partition(ctx.device)?;
                let pcount = counts.partition(ctx.device)?;
                let mut pin = fin.partition_mut(ctx.device)?;
                pin.for_each_cell(ctx.view, |cell, out| {
                    if grid.has_children(level, &cell) {
                        return;
                    }
                    for q in 1..lattice.q() {
                        if let Some(v) =
                            coalesced_value(grid, lattice, level, mode, &pacc, &pcount, &cell, q)
                        {
                            out.set(q, v);
                        }
                    }
                });
                Ok(())
            },
        ))
    }

    /// Fine cells of `level` on the edge of the refined region read the
    /// populations entering from the coarse side from their uncle.
    pub fn explode(&self, level: usize) -> GridResult<Container<'a>> {
        self.check_coarser(level, "explode")?;
        let Self { grid, lattice, .. } = *self;
        let coarse = self.fout.level(level + 1);
        let fin = self.fin.level(level);
        let accesses = vec![
            Access::read(coarse, Pattern::StencilUp),
            Access::read_write(fin, Pattern::Map),
        ];
        Ok(Container::compute(
            format!("explode_{level}"),
            grid.level(level).launch(DataView::Standard),
            accesses,
            move |ctx| {
                let pcoarse = coarse.partition(ctx.device)?;
                let mut pin = fin.partition_mut(ctx.device)?;
                pin.for_each_cell(ctx.view, |cell, out| {
                    if grid.has_children(level, &cell) {
                        return;
                    }
                    for q in 1..lattice.q() {
                        if let Some(v) = exploded_value(grid, lattice, level, &pcoarse, &cell, q) {
                            out.set(q, v);
                        }
                    }
                });
                Ok(())
            },
        ))
    }

    /// Same-level streaming (pull) of `level`
    pub fn stream(&self, level: usize) -> GridResult<Container<'a>> {
        self.check_level(level, "stream")?;
        let Self { grid, lattice, .. } = *self;
        let fout = self.fout.level(level);
        let fin = self.fin.level(level);
        Ok(Container::compute(
            format!("stream_{level}"),
            grid.level(level).launch(DataView::Standard),
            vec![
                Access::read(fout, Pattern::Stencil),
                Access::read_write(fin, Pattern::Map),
            ],
            move |ctx| {
                let pout = fout.partition(ctx.device)?;
                let mut pin = fin.partition_mut(ctx.device)?;
                pin.for_each_cell(ctx.view, |cell, out| {
                    if grid.has_children(level, &cell) {
                        return;
                    }
                    for q in 0..lattice.q() {
                        if let Some(v) = streamed_value(grid, lattice, level, &pout, &cell, q) {
                            out.set(q, v);
                        }
                    }
                });
                Ok(())
            },
        ))
    }

    /// Streaming with explosion inline; explosion is skipped on the top level
    pub fn stream_fused_explosion(&self, level: usize) -> GridResult<Container<'a>> {
        self.check_level(level, "stream_fused_explosion")?;
        let Self { grid, lattice, .. } = *self;
        let fout = self.fout.level(level);
        let fin = self.fin.level(level);
        let coarse = (level + 1 < grid.depth()).then(|| self.fout.level(level + 1));
        let mut accesses = vec![Access::read(fout, Pattern::Stencil)];
        if let Some(coarse) = coarse {
            accesses.push(Access::read(coarse, Pattern::StencilUp));
        }
        accesses.push(Access::read_write(fin, Pattern::Map));
        Ok(Container::compute(
            format!("stream_explode_{level}"),
            grid.level(level).launch(DataView::Standard),
            accesses,
            move |ctx| {
                let pout = fout.partition(ctx.device)?;
                let pcoarse = coarse.map(|c| c.partition(ctx.device)).transpose()?;
                let mut pin = fin.partition_mut(ctx.device)?;
                pin.for_each_cell(ctx.view, |cell, out| {
                    if grid.has_children(level, &cell) {
                        return;
                    }
                    for q in 0..lattice.q() {
                        let value = streamed_value(grid, lattice, level, &pout, &cell, q).or_else(|| {
                            pcoarse
                                .as_ref()
                                .filter(|_| q != 0)
                                .and_then(|pc| exploded_value(grid, lattice, level, pc, &cell, q))
                        });
                        if let Some(v) = value {
                            out.set(q, v);
                        }
                    }
                });
                Ok(())
            },
        ))
    }

    /// Streaming with coalescence inline; coalescence is skipped on level 0
    pub fn stream_fused_coalescence(&self, level: usize) -> GridResult<Container<'a>> {
        self.check_level(level, "stream_fused_coalescence")?;
        let Self {
            grid, lattice, mode, ..
        } = *self;
        let fout = self.fout.level(level);
        let fin = self.fin.level(level);
        let interface = (level > 0).then(|| {
            (
                self.buffer.accumulator.level(level),
                self.buffer.contributors.level(level),
            )
        });
        let mut accesses = vec![Access::read(fout, Pattern::Stencil)];
        if let Some((acc, counts)) = interface {
            accesses.push(Access::read(acc, Pattern::Stencil));
            if mode == CoalescenceMode::InitialStore {
                accesses.push(Access::read(counts, Pattern::Stencil));
            }
        }
        accesses.push(Access::read_write(fin, Pattern::Map));
        Ok(Container::compute(
            format!("stream_coalesce_{level}"),
            grid.level(level).launch(DataView::Standard),
            accesses,
            move |ctx| {
                let pout = fout.partition(ctx.device)?;
                let partitions = match interface {
                    Some((acc, counts)) => Some((acc.partition(ctx.device)?, counts.partition(ctx.device)?)),
                    None => None,
                };
                let mut pin = fin.partition_mut(ctx.device)?;
                pin.for_each_cell(ctx.view, |cell, out| {
                    if grid.has_children(level, &cell) {
                        return;
                    }
                    for q in 0..lattice.q() {
                        let value = streamed_value(grid, lattice, level, &pout, &cell, q).or_else(|| {
                            partitions
                                .as_ref()
                                .filter(|_| q != 0)
                                .and_then(|(pacc, pcount)| {
                                    coalesced_value(grid, lattice, level, mode, pacc, pcount, &cell, q)
                                })
                        });
                        if let Some(v) = value {
                            out.set(q, v);
                        }
                    }
                });
                Ok(())
            },
        ))
    }
}
