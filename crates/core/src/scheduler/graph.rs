//! Operation graph
//!
//! Nodes are containers, edges are "must finish before" relations. Data
//! edges are inferred from the declared field accesses of a container
//! sequence; ordering edges are added explicitly (halo barriers). Nested
//! graph containers can be flattened into their parent so that edges attach
//! to the entry and exit nodes of the nested graph.

use super::container::{Container, ContainerKind, ContainerType};
use crate::error::{GridError, GridResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Node index inside one graph
pub type NodeId = usize;

/// Data hazard between two containers touching the same field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hazard {
    ReadAfterWrite,
    WriteAfterWrite,
    WriteAfterRead,
}

impl Hazard {
    pub fn short_name(self) -> &'static str {
        match self {
            Hazard::ReadAfterWrite => "RAW",
            Hazard::WriteAfterWrite => "WAW",
            Hazard::WriteAfterRead => "WAR",
        }
    }
}

/// Reason for an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Data(Hazard),
    Ordering,
}

/// Strongest hazard between an earlier and a later container, if any
pub fn hazard_between(earlier: &Container<'_>, later: &Container<'_>) -> Option<Hazard> {
    let mut found: Option<Hazard> = None;
    for a in earlier.accesses() {
        for b in later.accesses() {
            if a.uid() != b.uid() {
                continue;
            }
            let hazard = if a.mode().writes() && b.mode().reads() {
                Some(Hazard::ReadAfterWrite)
            } else if a.mode().writes() && b.mode().writes() {
                Some(Hazard::WriteAfterWrite)
            } else if a.mode().reads() && b.mode().writes() {
                Some(Hazard::WriteAfterRead)
            } else {
                None
            };
            // Enum order ranks RAW strongest
            found = match (found, hazard) {
                (Some(f), Some(h)) => Some(f.min(h)),
                (f, h) => f.or(h),
            };
        }
    }
    found
}

/// Directed acyclic graph of containers
pub struct OperationGraph<'a> {
    name: String,
    nodes: Vec<Container<'a>>,
    edges: BTreeMap<(NodeId, NodeId), Dependency>,
}

impl<'a> OperationGraph<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Graph of a container sequence with every data hazard against every
    /// earlier conflicting container as an edge.
    pub fn from_sequence(name: impl Into<String>, containers: Vec<Container<'a>>) -> Self {
        let mut graph = Self::new(name);
        for container in containers {
            let later = graph.add_node(container);
            for earlier in 0..later {
                if let Some(hazard) = hazard_between(&graph.nodes[earlier], &graph.nodes[later]) {
                    graph.insert_dependency(earlier, later, Dependency::Data(hazard));
                }
            }
        }
        debug!(
            graph = %graph.name,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependencies inferred"
        );
        graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, container: Container<'a>) -> NodeId {
        self.nodes.push(container);
        self.nodes.len() - 1
    }

    /// Add an edge `from -> to`; an existing edge keeps its reason
    pub fn add_dependency(&mut self, from: NodeId, to: NodeId, dependency: Dependency) -> GridResult<()> {
        let count = self.nodes.len();
        if from >= count || to >= count {
            return Err(GridError::incompatible(
                &self.name,
                format!("edge {from} -> {to} references a node outside 0..{count}"),
            ));
        }
        if from == to {
            return Err(GridError::CyclicDependency {
                graph: self.name.clone(),
                container: self.nodes[from].name().to_string(),
            });
        }
        self.insert_dependency(from, to, dependency);
        Ok(())
    }

    pub(crate) fn insert_dependency(&mut self, from: NodeId, to: NodeId, dependency: Dependency) {
        self.edges.entry((from, to)).or_insert(dependency);
    }

    pub fn node(&self, id: NodeId) -> &Container<'a> {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Container<'a>] {
        &self.nodes
    }

    /// First node with the given name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|c| c.name() == name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn dependency(&self, from: NodeId, to: NodeId) -> Option<Dependency> {
        self.edges.get(&(from, to)).copied()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = (NodeId, NodeId, Dependency)> + '_ {
        self.edges.iter().map(|(&(f, t), &d)| (f, t, d))
    }

    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .range((id, 0)..(id + 1, 0))
            .map(|(&(_, t), _)| t)
            .collect()
    }

    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.edges.keys().filter(|(_, t)| *t == id).map(|&(f, _)| f).collect()
    }

    /// Nodes without incoming edges
    pub fn sources(&self) -> Vec<NodeId> {
        let targets: BTreeSet<NodeId> = self.edges.keys().map(|&(_, t)| t).collect();
        (0..self.nodes.len()).filter(|n| !targets.contains(n)).collect()
    }

    /// Nodes without outgoing edges
    pub fn sinks(&self) -> Vec<NodeId> {
        let origins: BTreeSet<NodeId> = self.edges.keys().map(|&(f, _)| f).collect();
        (0..self.nodes.len()).filter(|n| !origins.contains(n)).collect()
    }

    /// Kahn ordering; among ready nodes the lowest id runs first
    pub fn topological_order(&self) -> GridResult<Vec<NodeId>> {
        let count = self.nodes.len();
        let mut indegree = vec![0usize; count];
        let mut successors: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        for &(from, to) in self.edges.keys() {
            indegree[to] += 1;
            successors[from].push(to);
        }

        let mut ready: BTreeSet<NodeId> = (0..count).filter(|&n| indegree[n] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &next in &successors[node] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < count {
            let stuck = (0..count).find(|&n| indegree[n] > 0).unwrap_or(0);
            return Err(GridError::CyclicDependency {
                graph: self.name.clone(),
                container: self.nodes[stuck].name().to_string(),
            });
        }
        Ok(order)
    }

    /// Transitive reduction: drop every edge `u -> v` implied by a longer
    /// path. Returns the number of edges removed.
    pub fn remove_redundant_dependencies(&mut self) -> GridResult<usize> {
        let order = self.topological_order()?;
        let count = self.nodes.len();
        let words = count.div_ceil(64);
        let successors: Vec<Vec<NodeId>> = (0..count).map(|n| self.successors(n)).collect();

        let mut reach = vec![vec![0u64; words]; count];
        for &node in order.iter().rev() {
            let mut bits = vec![0u64; words];
            for &next in &successors[node] {
                bits[next / 64] |= 1 << (next % 64);
                for (b, r) in bits.iter_mut().zip(&reach[next]) {
                    *b |= *r;
                }
            }
            reach[node] = bits;
        }

        let reaches = |from: NodeId, to: NodeId| (reach[from][to / 64] >> (to % 64)) & 1 == 1;
        let redundant: Vec<(NodeId, NodeId)> = self
            .edges
            .keys()
            .filter(|&&(from, to)| {
                successors[from]
                    .iter()
                    .any(|&mid| mid != to && reaches(mid, to))
            })
            .copied()
            .collect();

        for edge in &redundant {
            self.edges.remove(edge);
        }
        debug!(graph = %self.name, removed = redundant.len(), "redundant dependencies removed");
        Ok(redundant.len())
    }

    /// Inline nested graph containers, recursively.
    ///
    /// An edge into a nested graph attaches to each of its entry nodes, an
    /// edge out of it leaves from each of its exit nodes. Empty nested graphs
    /// become a barrier so ordering through them is kept.
    pub fn flatten(self) -> Self {
        let OperationGraph { name, nodes, edges } = self;
        let mut flat = OperationGraph::new(name);
        let mut entries: Vec<Vec<NodeId>> = Vec::with_capacity(nodes.len());
        let mut exits: Vec<Vec<NodeId>> = Vec::with_capacity(nodes.len());

        for container in nodes {
            let (cname, kind, accesses) = container.into_parts();
            match kind {
                ContainerKind::Graph(sub) if sub.node_count() > 0 => {
                    let sub = (*sub).flatten();
                    let offset = flat.nodes.len();
                    entries.push(sub.sources().into_iter().map(|n| n + offset).collect());
                    exits.push(sub.sinks().into_iter().map(|n| n + offset).collect());
                    let OperationGraph {
                        nodes: sub_nodes,
                        edges: sub_edges,
                        ..
                    } = sub;
                    flat.nodes.extend(sub_nodes);
                    for ((from, to), dependency) in sub_edges {
                        flat.insert_dependency(from + offset, to + offset, dependency);
                    }
                }
                ContainerKind::Graph(_) => {
                    let id = flat.add_node(Container::sync(cname));
                    entries.push(vec![id]);
                    exits.push(vec![id]);
                }
                kind => {
                    let id = flat.add_node(Container::from_parts(cname, kind, accesses));
                    entries.push(vec![id]);
                    exits.push(vec![id]);
                }
            }
        }

        for ((from, to), dependency) in edges {
            for &x in &exits[from] {
                for &y in &entries[to] {
                    flat.insert_dependency(x, y, dependency);
                }
            }
        }
        flat
    }

    /// True if no node is itself a graph
    pub fn is_flat(&self) -> bool {
        self.nodes
            .iter()
            .all(|c| c.container_type() != ContainerType::Graph)
    }

    /// Execute every node in topological order
    pub fn run(&self) -> GridResult<()> {
        let order = self.topological_order()?;
        for id in order {
            let container = &self.nodes[id];
            debug!(graph = %self.name, container = %container.name(), "run");
            container.run()?;
        }
        Ok(())
    }

    /// Graphviz rendering for debugging
    pub fn to_dot(&self) -> String {
        let mut out = format!("digraph \"{}\" {{\n", self.name);
        for (id, container) in self.nodes.iter().enumerate() {
            let shape = match container.container_type() {
                ContainerType::Compute => "box",
                ContainerType::Transfer => "ellipse",
                ContainerType::Sync => "diamond",
                ContainerType::Graph => "box3d",
            };
            out.push_str(&format!(
                "  n{id} [label=\"{}\" shape={shape}];\n",
                container.name()
            ));
        }
        for (&(from, to), dependency) in &self.edges {
            let label = match dependency {
                Dependency::Data(hazard) => hazard.short_name(),
                Dependency::Ordering => "sync",
            };
            out.push_str(&format!("  n{from} -> n{to} [label=\"{label}\"];\n"));
        }
        out.push_str("}\n");
        out
    }

    /// Log a one-line summary of the graph
    pub fn log_summary(&self) {
        info!(
            graph = %self.name,
            nodes = self.node_count(),
            edges = self.edge_count(),
            "operation graph"
        );
    }
}

impl std::fmt::Debug for OperationGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationGraph")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .finish()
    }
}
