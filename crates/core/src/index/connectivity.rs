//! Block connectivity table
//!
//! For every block, the ids of its 26 Moore neighbors (plus itself at the
//! centre entry) or [`INVALID_BLOCK`]. Entry order is the base-3 encoding
//! `(xFlag + 1) + 3 * (yFlag + 1) + 9 * (zFlag + 1)` with flags in `{-1, 0, 1}`.

use super::cell::INVALID_BLOCK;

/// Entries per block
pub const CONNECTIVITY_STRIDE: usize = 27;

/// Index of the block itself inside a connectivity row
pub const CENTER_ENTRY: usize = 13;

/// Connectivity entry for a triple of per-axis flags
#[inline(always)]
pub const fn connectivity_entry(x_flag: i32, y_flag: i32, z_flag: i32) -> usize {
    ((x_flag + 1) + 3 * (y_flag + 1) + 9 * (z_flag + 1)) as usize
}

/// Flat `blocks × 27` neighbor table, read-only after construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockConnectivity {
    table: Vec<u32>,
}

impl BlockConnectivity {
    /// Table for `blocks` blocks with every entry invalid
    pub fn new(blocks: usize) -> Self {
        Self {
            table: vec![INVALID_BLOCK; blocks * CONNECTIVITY_STRIDE],
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.table.len() / CONNECTIVITY_STRIDE
    }

    /// Neighbor of `block` in direction `(x_flag, y_flag, z_flag)`
    #[inline(always)]
    pub fn neighbor(&self, block: u32, x_flag: i32, y_flag: i32, z_flag: i32) -> u32 {
        self.table[block as usize * CONNECTIVITY_STRIDE + connectivity_entry(x_flag, y_flag, z_flag)]
    }

    /// Set a neighbor entry
    pub fn set_neighbor(&mut self, block: u32, entry: usize, neighbor: u32) {
        self.table[block as usize * CONNECTIVITY_STRIDE + entry] = neighbor;
    }

    /// Row of 27 entries of one block
    pub fn row(&self, block: u32) -> &[u32] {
        let start = block as usize * CONNECTIVITY_STRIDE;
        &self.table[start..start + CONNECTIVITY_STRIDE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_encoding() {
        assert_eq!(connectivity_entry(-1, -1, -1), 0);
        assert_eq!(connectivity_entry(0, 0, 0), CENTER_ENTRY);
        assert_eq!(connectivity_entry(1, 0, 0), 14);
        assert_eq!(connectivity_entry(0, 1, 0), 16);
        assert_eq!(connectivity_entry(0, 0, 1), 22);
        assert_eq!(connectivity_entry(1, 1, 1), 26);
    }

    #[test]
    fn test_set_and_get() {
        let mut conn = BlockConnectivity::new(2);
        assert_eq!(conn.num_blocks(), 2);
        conn.set_neighbor(1, connectivity_entry(-1, 0, 0), 0);
        assert_eq!(conn.neighbor(1, -1, 0, 0), 0);
        assert_eq!(conn.neighbor(1, 1, 0, 0), INVALID_BLOCK);
        assert_eq!(conn.row(1).len(), CONNECTIVITY_STRIDE);
    }
}
