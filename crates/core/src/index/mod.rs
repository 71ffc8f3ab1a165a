//! Spatial index over block-sparse active domains
//!
//! Cells are addressed as `(block, in-block coordinate)`. Each device keeps a
//! [`SpatialIndex`] of its owned and ghost blocks; neighbor queries are
//! answered from a 27-entry connectivity row per block.

pub mod cell;
pub mod connectivity;
pub mod spatial;

pub use cell::{CellIdx, DeviceIdx, INVALID_BLOCK};
pub use connectivity::{connectivity_entry, BlockConnectivity, CENTER_ENTRY, CONNECTIVITY_STRIDE};
pub use spatial::{NghLookup, SpatialIndex};
