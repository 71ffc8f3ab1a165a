//! Block shapes and per-block activity bitmasks.
//!
//! A block is a fixed-size cube of cells and the unit of both spatial indexing
//! and memory layout. The side length is a compile-time constant carried by a
//! marker type, so every pitch computation folds it into the generated code.

use super::index3::Index3;

/// Compile-time block geometry
pub trait BlockShape: Copy + Clone + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Cells per block along one axis
    const SIDE: i32;
    /// Cells per block
    const VOLUME: usize = (Self::SIDE * Self::SIDE * Self::SIDE) as usize;

    /// Linear offset of an in-block coordinate (x fastest)
    #[inline(always)]
    fn offset(local: &Index3) -> usize {
        (local.x + Self::SIDE * local.y + Self::SIDE * Self::SIDE * local.z) as usize
    }

    /// Inverse of [`BlockShape::offset`]
    #[inline(always)]
    fn local(offset: usize) -> Index3 {
        let o = offset as i32;
        Index3::new(
            o % Self::SIDE,
            (o / Self::SIDE) % Self::SIDE,
            o / (Self::SIDE * Self::SIDE),
        )
    }
}

/// 2×2×2 blocks (mostly useful for tests that want many block boundaries)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Block2;

/// 4×4×4 blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Block4;

/// 8×8×8 blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Block8;

impl BlockShape for Block2 {
    const SIDE: i32 = 2;
}

impl BlockShape for Block4 {
    const SIDE: i32 = 4;
}

impl BlockShape for Block8 {
    const SIDE: i32 = 8;
}

/// One bit per cell per block, set when the cell belongs to the simulated domain.
///
/// All blocks share one flat word buffer; block `b` owns words
/// `[b * words_per_block, (b + 1) * words_per_block)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMask {
    words_per_block: usize,
    bits: Vec<u64>,
}

impl ActiveMask {
    /// Create an all-inactive mask for `blocks` blocks of `volume` cells
    pub fn new(blocks: usize, volume: usize) -> Self {
        let words_per_block = volume.div_ceil(64);
        Self {
            words_per_block,
            bits: vec![0; blocks * words_per_block],
        }
    }

    /// Number of blocks covered by the mask
    pub fn num_blocks(&self) -> usize {
        if self.words_per_block == 0 {
            0
        } else {
            self.bits.len() / self.words_per_block
        }
    }

    #[inline]
    pub fn is_active(&self, block: usize, offset: usize) -> bool {
        let word = self.bits[block * self.words_per_block + offset / 64];
        (word >> (offset % 64)) & 1 == 1
    }

    #[inline]
    pub fn set_active(&mut self, block: usize, offset: usize, active: bool) {
        let word = &mut self.bits[block * self.words_per_block + offset / 64];
        if active {
            *word |= 1 << (offset % 64);
        } else {
            *word &= !(1 << (offset % 64));
        }
    }

    /// Number of active cells in one block
    pub fn count_block(&self, block: usize) -> usize {
        let start = block * self.words_per_block;
        self.bits[start..start + self.words_per_block]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    /// True if any cell of the block is active
    pub fn any_in_block(&self, block: usize) -> bool {
        let start = block * self.words_per_block;
        self.bits[start..start + self.words_per_block]
            .iter()
            .any(|w| *w != 0)
    }

    /// Append a copy of block `block` of `other` as a new trailing block
    pub fn push_block_from(&mut self, other: &ActiveMask, block: usize) {
        debug_assert_eq!(self.words_per_block, other.words_per_block);
        let start = block * other.words_per_block;
        self.bits
            .extend_from_slice(&other.bits[start..start + other.words_per_block]);
    }

    /// Append an all-inactive block
    pub fn push_empty_block(&mut self) {
        self.bits.resize(self.bits.len() + self.words_per_block, 0);
    }

    /// In-block offsets of the active cells of one block, ascending
    pub fn active_offsets(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        let start = block * self.words_per_block;
        self.bits[start..start + self.words_per_block]
            .iter()
            .enumerate()
            .flat_map(|(w, &word)| {
                (0..64usize)
                    .filter(move |bit| (word >> bit) & 1 == 1)
                    .map(move |bit| w * 64 + bit)
            })
    }
}
