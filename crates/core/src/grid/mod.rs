//! Block grids, stencils and partition sectors

pub mod block_grid;
pub mod config;
pub mod sector;
pub mod stencil;

pub use block_grid::BlockGrid;
pub use config::GridConfig;
pub use sector::{DataView, Sector, SectorBounds};
pub use stencil::Stencil;
