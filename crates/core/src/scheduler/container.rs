//! Containers: the unit of scheduling
//!
//! A container is a named operation together with the fields it touches and
//! how it touches them. Compute containers run a kernel once per device;
//! transfer containers run a field's halo exchange; sync containers are
//! barriers; graph containers nest a whole operation graph.

use super::graph::{Dependency, OperationGraph};
use super::profiler::ProfilerScope;
use crate::error::GridResult;
use crate::field::{FieldUid, TransferMode};
use crate::grid::DataView;
use crate::index::DeviceIdx;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Type-erased handle to a field, as seen by the scheduler
pub trait FieldRef: Send + Sync {
    fn uid(&self) -> FieldUid;
    fn name(&self) -> &str;
    fn devices(&self) -> usize;
    /// Execute the field's halo exchange
    fn run_halo(&self, mode: TransferMode) -> GridResult<()>;
}

/// How a container uses a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    #[inline]
    pub fn reads(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    #[inline]
    pub fn writes(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// Which cells of a field a container touches relative to the cell it computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    /// The same cell only
    Map,
    /// Neighbors on the same level, ghosts included
    Stencil,
    /// Cells on the next coarser level
    StencilUp,
    /// Cells on the next finer level
    StencilDown,
}

/// Field access declared by a container
#[derive(Clone, Copy)]
pub struct Access<'a> {
    field: &'a dyn FieldRef,
    mode: AccessMode,
    pattern: Pattern,
}

impl<'a> Access<'a> {
    pub fn new(field: &'a dyn FieldRef, mode: AccessMode, pattern: Pattern) -> Self {
        Self {
            field,
            mode,
            pattern,
        }
    }

    pub fn read(field: &'a dyn FieldRef, pattern: Pattern) -> Self {
        Self::new(field, AccessMode::Read, pattern)
    }

    pub fn write(field: &'a dyn FieldRef) -> Self {
        Self::new(field, AccessMode::Write, Pattern::Map)
    }

    pub fn read_write(field: &'a dyn FieldRef, pattern: Pattern) -> Self {
        Self::new(field, AccessMode::ReadWrite, pattern)
    }

    pub fn field(&self) -> &'a dyn FieldRef {
        self.field
    }

    pub fn uid(&self) -> FieldUid {
        self.field.uid()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }
}

impl fmt::Debug for Access<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access")
            .field("field", &self.field.name())
            .field("uid", &self.field.uid())
            .field("mode", &self.mode)
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// Devices and data view a compute container runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Launch {
    pub devices: usize,
    pub view: DataView,
}

/// Per-device execution context handed to compute bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCtx {
    pub device: DeviceIdx,
    pub view: DataView,
}

/// Kernel body of a compute container, invoked once per device
pub type ComputeFn<'a> = Box<dyn Fn(&DeviceCtx) -> GridResult<()> + Send + Sync + 'a>;

/// Container payload
pub enum ContainerKind<'a> {
    Compute { launch: Launch, body: ComputeFn<'a> },
    Transfer { field: &'a dyn FieldRef, mode: TransferMode },
    Sync,
    Graph(Box<OperationGraph<'a>>),
}

/// Payload discriminant, for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerType {
    Compute,
    Transfer,
    Sync,
    Graph,
}

/// Schedulable operation
pub struct Container<'a> {
    name: String,
    kind: ContainerKind<'a>,
    accesses: Vec<Access<'a>>,
}

impl<'a> Container<'a> {
    /// Compute container running `body` once per device.
    ///
    /// # Arguments
    /// * `name` - Name used in logs and graph dumps
    /// * `launch` - Devices and view to run on
    /// * `accesses` - Every field the body reads or writes
    /// * `body` - Per-device kernel
    pub fn compute<F>(name: impl Into<String>, launch: Launch, accesses: Vec<Access<'a>>, body: F) -> Self
    where
        F: Fn(&DeviceCtx) -> GridResult<()> + Send + Sync + 'a,
    {
        Self {
            name: name.into(),
            kind: ContainerKind::Compute {
                launch,
                body: Box::new(body),
            },
            accesses,
        }
    }

    /// Bare halo transfer of one field
    pub fn data_transfer(field: &'a dyn FieldRef, mode: TransferMode) -> Self {
        Self {
            name: format!("halo_transfer_{}", field.name()),
            kind: ContainerKind::Transfer { field, mode },
            accesses: vec![Access::read_write(field, Pattern::Map)],
        }
    }

    /// Barrier across all devices
    pub fn sync(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ContainerKind::Sync,
            accesses: Vec::new(),
        }
    }

    /// Halo update of one field as a transfer plus a barrier.
    ///
    /// In put mode the owners push first and the barrier follows; in get
    /// mode the barrier guarantees the owners are done before neighbors pull.
    pub fn halo_update(field: &'a dyn FieldRef, mode: TransferMode) -> Self {
        let mut graph = OperationGraph::new(format!("halo_{}", field.name()));
        let transfer = graph.add_node(Self::data_transfer(field, mode));
        let barrier = graph.add_node(Self::sync(format!("halo_sync_{}", field.name())));
        let (from, to) = match mode {
            TransferMode::Put => (transfer, barrier),
            TransferMode::Get => (barrier, transfer),
        };
        graph.insert_dependency(from, to, Dependency::Ordering);
        Self::from_graph(graph)
    }

    /// Nest a graph as a single container; its accesses are the union of the
    /// accesses of its nodes.
    pub fn graph(graph: OperationGraph<'a>) -> GridResult<Self> {
        graph.topological_order()?;
        Ok(Self::from_graph(graph))
    }

    pub(crate) fn from_graph(graph: OperationGraph<'a>) -> Self {
        let mut accesses: Vec<Access<'a>> = Vec::new();
        for access in graph.nodes().iter().flat_map(|c| c.accesses.iter()) {
            let seen = accesses.iter().any(|a| {
                a.uid() == access.uid() && a.mode == access.mode && a.pattern == access.pattern
            });
            if !seen {
                accesses.push(*access);
            }
        }
        Self {
            name: graph.name().to_string(),
            kind: ContainerKind::Graph(Box::new(graph)),
            accesses,
        }
    }

    pub(crate) fn into_parts(self) -> (String, ContainerKind<'a>, Vec<Access<'a>>) {
        (self.name, self.kind, self.accesses)
    }

    pub(crate) fn from_parts(name: String, kind: ContainerKind<'a>, accesses: Vec<Access<'a>>) -> Self {
        Self {
            name,
            kind,
            accesses,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ContainerKind<'a> {
        &self.kind
    }

    pub fn container_type(&self) -> ContainerType {
        match self.kind {
            ContainerKind::Compute { .. } => ContainerType::Compute,
            ContainerKind::Transfer { .. } => ContainerType::Transfer,
            ContainerKind::Sync => ContainerType::Sync,
            ContainerKind::Graph(_) => ContainerType::Graph,
        }
    }

    pub fn accesses(&self) -> &[Access<'a>] {
        &self.accesses
    }

    /// Execute the container to completion
    pub fn run(&self) -> GridResult<()> {
        match &self.kind {
            ContainerKind::Compute { launch, body } => {
                let _scope = ProfilerScope::new(self.name.clone());
                let view = launch.view;
                (0..launch.devices)
                    .into_par_iter()
                    .try_for_each(|device| body(&DeviceCtx { device, view }))
            }
            ContainerKind::Transfer { field, mode } => field.run_halo(*mode),
            ContainerKind::Sync => {
                trace!(container = %self.name, "barrier");
                Ok(())
            }
            ContainerKind::Graph(graph) => graph.run(),
        }
    }
}

impl fmt::Debug for Container<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("type", &self.container_type())
            .field("accesses", &self.accesses)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_flags() {
        assert!(AccessMode::Read.reads());
        assert!(!AccessMode::Read.writes());
        assert!(AccessMode::Write.writes());
        assert!(!AccessMode::Write.reads());
        assert!(AccessMode::ReadWrite.reads() && AccessMode::ReadWrite.writes());
    }

    #[test]
    fn test_compute_runs_once_per_device() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = AtomicUsize::new(0);
        let container = Container::compute(
            "count",
            Launch {
                devices: 3,
                view: DataView::Standard,
            },
            Vec::new(),
            |ctx| {
                assert!(ctx.device < 3);
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
        );
        container.run().unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(container.container_type(), ContainerType::Compute);
    }
}
