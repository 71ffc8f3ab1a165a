//! Skeletons: user-facing container sequences
//!
//! A skeleton takes an ordered list of containers, inserts halo updates
//! where multi-device stencil reads need fresh ghost data, builds the
//! dependency graph, flattens it and removes redundant edges. Running it
//! executes the graph; on the host backend execution completes before
//! `run` returns.

use super::container::{Access, Container, ContainerKind, FieldRef, Pattern};
use super::graph::OperationGraph;
use super::profiler::{ProfilerScope, RunTimer};
use crate::error::GridResult;
use crate::field::{FieldUid, TransferMode};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Skeleton construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonOptions {
    /// Mode of the inserted halo updates
    pub transfer_mode: TransferMode,
    /// Insert halo updates before stencil reads of stale fields
    pub auto_halo: bool,
    /// Run a transitive reduction over the final graph
    pub remove_redundant_dependencies: bool,
}

impl Default for SkeletonOptions {
    fn default() -> Self {
        Self {
            transfer_mode: TransferMode::Put,
            auto_halo: true,
            remove_redundant_dependencies: true,
        }
    }
}

/// Executable operation graph built from a container sequence
pub struct Skeleton<'a> {
    name: String,
    options: SkeletonOptions,
    graph: OperationGraph<'a>,
    timer: Mutex<RunTimer>,
}

/// Fields a container reads through a same-level stencil
fn stencil_reads<'c, 'a>(accesses: &'c [Access<'a>]) -> impl Iterator<Item = &'a dyn FieldRef> + 'c {
    accesses
        .iter()
        .filter(|a| a.mode().reads() && a.pattern() == Pattern::Stencil && a.field().devices() > 1)
        .map(Access::field)
}

impl<'a> Skeleton<'a> {
    /// Build a skeleton from containers in program order.
    ///
    /// A field is stale when it is written anywhere in the sequence, since
    /// the skeleton is meant to run repeatedly. Fields never written inside
    /// the sequence are assumed to have consistent ghosts.
    pub fn sequence(
        name: impl Into<String>,
        containers: Vec<Container<'a>>,
        options: SkeletonOptions,
    ) -> GridResult<Self> {
        let name = name.into();
        let _scope = ProfilerScope::new(format!("skeleton_build_{name}"));

        let mut stale: FxHashSet<FieldUid> = containers
            .iter()
            .flat_map(|c| c.accesses().iter())
            .filter(|a| a.mode().writes())
            .map(Access::uid)
            .collect();

        let mut expanded: Vec<Container<'a>> = Vec::with_capacity(containers.len());
        let mut inserted = 0usize;
        for container in containers {
            if let ContainerKind::Transfer { field, mode } = container.kind() {
                stale.remove(&field.uid());
                expanded.push(Container::halo_update(*field, *mode));
                continue;
            }

            if options.auto_halo {
                let mut refreshed: Vec<&'a dyn FieldRef> = Vec::new();
                for field in stencil_reads(container.accesses()) {
                    if stale.remove(&field.uid()) {
                        refreshed.push(field);
                    }
                }
                for field in refreshed {
                    debug!(skeleton = %name, field = %field.name(), before = %container.name(), "halo inserted");
                    expanded.push(Container::halo_update(field, options.transfer_mode));
                    inserted += 1;
                }
            }

            for access in container.accesses() {
                if access.mode().writes() {
                    stale.insert(access.uid());
                }
            }
            expanded.push(container);
        }

        let mut graph = OperationGraph::from_sequence(name.clone(), expanded).flatten();
        graph.topological_order()?;
        let removed = if options.remove_redundant_dependencies {
            graph.remove_redundant_dependencies()?
        } else {
            0
        };

        info!(
            skeleton = %name,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            halos = inserted,
            removed,
            "skeleton built"
        );
        Ok(Self {
            name,
            options,
            graph,
            timer: Mutex::new(RunTimer::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &SkeletonOptions {
        &self.options
    }

    pub fn graph(&self) -> &OperationGraph<'a> {
        &self.graph
    }

    /// Execute the graph once
    pub fn run(&self) -> GridResult<()> {
        let start = Instant::now();
        self.graph.run()?;
        self.timer
            .lock()
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    /// Wait for outstanding work. Host execution is synchronous, so this
    /// only marks the point in the logs.
    pub fn sync(&self) {
        debug!(skeleton = %self.name, "sync");
    }

    /// Run timing statistics
    pub fn timer(&self) -> RunTimer {
        self.timer.lock().clone()
    }

    /// Nest the skeleton inside another graph
    pub fn into_container(self) -> Container<'a> {
        Container::from_graph(self.graph)
    }
}

impl std::fmt::Debug for Skeleton<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skeleton")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}
