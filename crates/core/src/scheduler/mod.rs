//! Operation graph scheduler
//!
//! Containers declare the fields they access; the scheduler derives the
//! dependency graph, inserts halo exchanges for multi-device stencils and
//! runs everything in a valid order.

pub mod container;
pub mod graph;
pub mod profiler;
pub mod skeleton;

pub use container::{
    Access, AccessMode, ComputeFn, Container, ContainerKind, ContainerType, DeviceCtx, FieldRef,
    Launch, Pattern,
};
pub use graph::{hazard_between, Dependency, Hazard, NodeId, OperationGraph};
pub use profiler::{ProfilerScope, RunTimer};
pub use skeleton::{Skeleton, SkeletonOptions};
