//! Lattice direction sets
//!
//! Direction 0 is always the rest direction. `opposite[q]` is the index of
//! `-dir(q)`.

use crate::core_types::Index3;
use crate::grid::Stencil;

/// Discrete velocity set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lattice {
    name: &'static str,
    dirs: &'static [[i32; 3]],
    opposite: &'static [usize],
}

const D3Q19_DIRS: [[i32; 3]; 19] = [
    [0, 0, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0],
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 0, 1],
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [0, 1, 1],
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
];

const D3Q19_OPPOSITE: [usize; 19] = [0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13, 16, 15, 18, 17];

const D3Q27_DIRS: [[i32; 3]; 27] = [
    [0, 0, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0],
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 0, 1],
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [0, 1, 1],
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
    [1, 1, 1],
    [-1, -1, -1],
    [1, 1, -1],
    [-1, -1, 1],
    [1, -1, 1],
    [-1, 1, -1],
    [-1, 1, 1],
    [1, -1, -1],
];

const D3Q27_OPPOSITE: [usize; 27] = [
    0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13, 16, 15, 18, 17, 20, 19, 22, 21, 24, 23, 26, 25,
];

impl Lattice {
    /// Rest direction, 6 faces and 12 edges
    pub const D3Q19: Lattice = Lattice {
        name: "D3Q19",
        dirs: &D3Q19_DIRS,
        opposite: &D3Q19_OPPOSITE,
    };

    /// Full Moore neighborhood
    pub const D3Q27: Lattice = Lattice {
        name: "D3Q27",
        dirs: &D3Q27_DIRS,
        opposite: &D3Q27_OPPOSITE,
    };

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of directions
    #[inline]
    pub fn q(&self) -> usize {
        self.dirs.len()
    }

    #[inline]
    pub fn dir(&self, q: usize) -> Index3 {
        let [x, y, z] = self.dirs[q];
        Index3::new(x, y, z)
    }

    #[inline]
    pub fn opposite(&self, q: usize) -> usize {
        self.opposite[q]
    }

    /// Stencil reading every direction of the lattice
    pub fn stencil(&self) -> Stencil {
        Stencil::new((0..self.q()).map(|q| self.dir(q)))
    }
}

/// Offset, in parent-level cells, from a parent to the coarse cell reached
/// by moving one fine step `dir` from the child at `child_location`.
///
/// `child_location` is the child's position inside its parent, each
/// component in `[0, refinement)`.
#[inline]
pub fn uncle_offset(child_location: &Index3, dir: &Index3, refinement: i32) -> Index3 {
    (child_location + dir).map(|c| c.div_euclid(refinement))
}
