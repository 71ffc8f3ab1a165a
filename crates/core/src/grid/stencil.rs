//! Stencil descriptions
//!
//! A stencil is the set of neighbor offsets a computation may read. Its
//! radius decides how thick the halo between device partitions must be.

use crate::core_types::Index3;
use crate::error::{GridError, GridResult};
use serde::{Deserialize, Serialize};

/// Set of relative neighbor offsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stencil {
    points: Vec<Index3>,
}

impl Stencil {
    /// Create a stencil from explicit offsets, dropping duplicates
    pub fn new(points: impl IntoIterator<Item = Index3>) -> Self {
        let mut unique: Vec<Index3> = Vec::new();
        for p in points {
            if !unique.contains(&p) {
                unique.push(p);
            }
        }
        Self { points: unique }
    }

    /// Stencil with no neighbor reads (pure map operations)
    pub fn empty() -> Self {
        Self { points: Vec::new() }
    }

    /// Centre plus the 6 face neighbors
    pub fn s7_laplace() -> Self {
        Self::new([
            Index3::zeros(),
            Index3::new(1, 0, 0),
            Index3::new(-1, 0, 0),
            Index3::new(0, 1, 0),
            Index3::new(0, -1, 0),
            Index3::new(0, 0, 1),
            Index3::new(0, 0, -1),
        ])
    }

    /// Centre plus the 18 face and edge neighbors of the D3Q19 lattice
    pub fn s19_d3q19() -> Self {
        Self::new(moore_offsets().filter(|o| o.x.abs() + o.y.abs() + o.z.abs() <= 2))
    }

    /// Full 3×3×3 Moore neighborhood
    pub fn s27_moore() -> Self {
        Self::new(moore_offsets())
    }

    /// Append offsets of a radius-`r` box (used for wider stencils)
    pub fn with_box(mut self, radius: i32) -> Self {
        for z in -radius..=radius {
            for y in -radius..=radius {
                for x in -radius..=radius {
                    let p = Index3::new(x, y, z);
                    if !self.points.contains(&p) {
                        self.points.push(p);
                    }
                }
            }
        }
        self
    }

    pub fn points(&self) -> &[Index3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Largest absolute offset component
    pub fn radius(&self) -> i32 {
        self.points.iter().map(|p| p.x.abs().max(p.y.abs()).max(p.z.abs())).max().unwrap_or(0)
    }

    /// Check that every offset reaches at most one block away
    pub fn validate(&self, side: i32) -> GridResult<()> {
        if self.radius() > side {
            return Err(GridError::invalid_domain(format!(
                "stencil radius {} exceeds block side {side}",
                self.radius()
            )));
        }
        Ok(())
    }
}

impl Default for Stencil {
    fn default() -> Self {
        Self::s7_laplace()
    }
}

fn moore_offsets() -> impl Iterator<Item = Index3> {
    (-1..=1).flat_map(|z| (-1..=1).flat_map(move |y| (-1..=1).map(move |x| Index3::new(x, y, z))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_sizes_and_radius() {
        assert_eq!(Stencil::s7_laplace().len(), 7);
        assert_eq!(Stencil::s19_d3q19().len(), 19);
        assert_eq!(Stencil::s27_moore().len(), 27);
        assert_eq!(Stencil::s27_moore().radius(), 1);
        assert_eq!(Stencil::empty().radius(), 0);
        assert_eq!(Stencil::empty().with_box(2).radius(), 2);
    }

    #[test]
    fn test_duplicates_removed() {
        let s = Stencil::new([Index3::new(1, 0, 0), Index3::new(1, 0, 0)]);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_validate_against_block_side() {
        let wide = Stencil::empty().with_box(3);
        assert!(wide.validate(2).is_err());
        assert!(wide.validate(4).is_ok());
    }
}
