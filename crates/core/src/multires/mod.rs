//! Multi-resolution grids and the coarse-fine interface protocol

pub mod field;
pub mod hierarchy;
pub mod lattice;
pub mod protocol;
pub mod step;

pub use field::{MultiResField, StoreBuffer};
pub use hierarchy::{MultiResDescriptor, MultiResGrid};
pub use lattice::{uncle_offset, Lattice};
pub use protocol::{CoalescenceMode, MultiResProtocol, StreamFusion};
pub use step::MultiResStep;
