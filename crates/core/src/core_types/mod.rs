//! Core types and utilities

pub mod block;
pub mod index3;

pub use block::{ActiveMask, Block2, Block4, Block8, BlockShape};
pub use index3::Index3;
