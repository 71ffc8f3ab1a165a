//! Integer vector type for grid coordinates, offsets and directions.

use nalgebra::Vector3;

/// 3D integer coordinate used for global cell positions, in-block positions,
/// block coordinates and stencil offsets.
///
/// This is a simple alias for `nalgebra::Vector3<i32>`, mirroring how the
/// floating point `Vec3` alias is used for world positions.
pub type Index3 = Vector3<i32>;

/// Per-axis Euclidean division (floor semantics for negative values)
#[inline]
pub fn div_floor(v: &Index3, d: i32) -> Index3 {
    v.map(|c| c.div_euclid(d))
}

/// Per-axis Euclidean remainder, always in `[0, d)`
#[inline]
pub fn rem_floor(v: &Index3, d: i32) -> Index3 {
    v.map(|c| c.rem_euclid(d))
}

/// Number of cells in a box of the given extent (zero if any axis is non-positive)
#[inline]
pub fn volume(dim: &Index3) -> usize {
    if dim.x <= 0 || dim.y <= 0 || dim.z <= 0 {
        return 0;
    }
    dim.x as usize * dim.y as usize * dim.z as usize
}

/// True if `idx` lies inside `[0, dim)` on every axis
#[inline]
pub fn in_box(idx: &Index3, dim: &Index3) -> bool {
    idx.x >= 0 && idx.y >= 0 && idx.z >= 0 && idx.x < dim.x && idx.y < dim.y && idx.z < dim.z
}

/// Iterate every coordinate of `[0, dim)` in x-fastest order
pub fn iter_box(dim: Index3) -> impl Iterator<Item = Index3> {
    let (nx, ny, nz) = (dim.x.max(0), dim.y.max(0), dim.z.max(0));
    (0..nz).flat_map(move |z| (0..ny).flat_map(move |y| (0..nx).map(move |x| Index3::new(x, y, z))))
}
