//! Block-Sparse Stencil Runtime
//!
//! Runtime for stencil computations on sparse 3D domains split across
//! several devices, with optional multi-resolution refinement.
//!
//! ## Layers
//!
//! - [`index`]: block-sparse spatial index and O(1) neighbor resolution
//! - [`grid`]: block grids partitioned across devices into sectors
//! - [`field`]: multi-component fields, partitions and halo exchange
//! - [`scheduler`]: containers, operation graphs and skeletons
//! - [`multires`]: level hierarchies and the store/coalesce/explode protocol

#![forbid(unsafe_code)]

// Core types and utilities
pub mod core_types;
pub mod error;

// Runtime layers
pub mod field;
pub mod grid;
pub mod index;
pub mod multires;
pub mod scheduler;

// Re-export core types
pub use core_types::{ActiveMask, Block2, Block4, Block8, BlockShape, Index3};
pub use error::{GridError, GridResult};

// Re-export runtime types
pub use field::{Field, FieldOptions, MemoryLayout, NghData, TransferMode};
pub use grid::{BlockGrid, DataView, GridConfig, Stencil};
pub use index::{CellIdx, SpatialIndex};
pub use multires::{
    CoalescenceMode, Lattice, MultiResDescriptor, MultiResField, MultiResGrid, MultiResProtocol,
    MultiResStep, StoreBuffer, StreamFusion,
};
pub use scheduler::{Access, Container, OperationGraph, Pattern, Skeleton, SkeletonOptions};
