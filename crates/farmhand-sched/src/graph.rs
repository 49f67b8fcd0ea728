//! Dependency graph over submission specs.
//!
//! Edges point from a dependency to its dependent: the parent must finish
//! before the child may start. The graph is assembled from roots by unioning
//! their transitive dependency closures and is not modified by backends.

use std::collections::BTreeSet;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

use crate::encoding::EncodedGraph;
use crate::error::{SchedError, SchedResult};
use crate::spec::SubmissionSpec;

/// Directed acyclic graph of jobs.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Label naming the pipeline (DAG file, monitoring task).
    label: String,

    /// The DAG of jobs, nodes kept in insertion order.
    dag: DiGraph<Arc<SubmissionSpec>, ()>,

    /// Mapping from job name to node index.
    index: FxHashMap<String, NodeIndex>,

    /// Explicitly added roots, in insertion order.
    roots: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            dag: DiGraph::new(),
            index: FxHashMap::default(),
            roots: Vec::new(),
        }
    }

    /// Build a graph from a set of roots.
    pub fn from_roots<I>(label: impl Into<String>, roots: I) -> SchedResult<Self>
    where
        I: IntoIterator<Item = Arc<SubmissionSpec>>,
    {
        let mut graph = Self::new(label);
        for root in roots {
            graph.add_root(root)?;
        }
        Ok(graph)
    }

    /// Pipeline label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Insert a spec and its whole dependency closure.
    ///
    /// Nothing is inserted when the closure is rejected.
    pub fn add_root(&mut self, spec: Arc<SubmissionSpec>) -> SchedResult<()> {
        if spec.depends_on_name(spec.name()) {
            return Err(SchedError::DependencyCycle {
                job: spec.name().to_string(),
            });
        }

        let mut seen = FxHashMap::default();
        let mut fresh = Vec::new();
        self.collect_new(&spec, &mut seen, &mut fresh)?;

        for node in &fresh {
            let idx = self.dag.add_node(node.clone());
            self.index.insert(node.name().to_string(), idx);
        }
        for node in &fresh {
            let to = self.index[node.name()];
            for dep in node.dependencies() {
                let from = self.index[dep.name()];
                self.dag.update_edge(from, to, ());
            }
        }

        let root = self.index[spec.name()];
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
        Ok(())
    }

    /// Post-order walk collecting specs not yet in the graph.
    fn collect_new<'a>(
        &self,
        spec: &'a Arc<SubmissionSpec>,
        seen: &mut FxHashMap<&'a str, *const SubmissionSpec>,
        fresh: &mut Vec<Arc<SubmissionSpec>>,
    ) -> SchedResult<()> {
        if let Some(&idx) = self.index.get(spec.name()) {
            return if Arc::ptr_eq(&self.dag[idx], spec) {
                Ok(())
            } else {
                Err(SchedError::DuplicateJobName(spec.name().to_string()))
            };
        }
        match seen.get(spec.name()) {
            Some(&ptr) if ptr == Arc::as_ptr(spec) => return Ok(()),
            Some(_) => return Err(SchedError::DuplicateJobName(spec.name().to_string())),
            None => {}
        }
        seen.insert(spec.name(), Arc::as_ptr(spec));

        for dep in spec.dependencies() {
            self.collect_new(dep, seen, fresh)?;
        }
        fresh.push(spec.clone());
        Ok(())
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    /// Check if the graph has no jobs.
    pub fn is_empty(&self) -> bool {
        self.dag.node_count() == 0
    }

    /// Whether any dependency edge exists.
    pub fn has_edges(&self) -> bool {
        self.dag.edge_count() > 0
    }

    /// Get a job by name.
    pub fn get(&self, name: &str) -> Option<&Arc<SubmissionSpec>> {
        self.index.get(name).map(|&idx| &self.dag[idx])
    }

    /// All jobs in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<SubmissionSpec>> {
        self.dag.node_indices().map(move |idx| &self.dag[idx])
    }

    /// Explicitly added roots.
    pub fn roots(&self) -> Vec<&Arc<SubmissionSpec>> {
        self.roots.iter().map(|&idx| &self.dag[idx]).collect()
    }

    /// Jobs in dependency order; independent jobs keep insertion order.
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(self)
    }

    /// Jobs nothing depends on.
    pub fn leaf_set(&self) -> Vec<&Arc<SubmissionSpec>> {
        self.nodes_without(Direction::Outgoing)
    }

    /// Jobs with no dependencies.
    pub fn root_set(&self) -> Vec<&Arc<SubmissionSpec>> {
        self.nodes_without(Direction::Incoming)
    }

    fn nodes_without(&self, direction: Direction) -> Vec<&Arc<SubmissionSpec>> {
        self.dag
            .node_indices()
            .filter(|&idx| self.dag.edges_directed(idx, direction).next().is_none())
            .map(|idx| &self.dag[idx])
            .collect()
    }

    /// Direct dependencies of a job, in insertion order.
    pub fn dependencies(&self, name: &str) -> Vec<&Arc<SubmissionSpec>> {
        self.neighbours(name, Direction::Incoming)
    }

    /// Direct dependents of a job, in insertion order.
    pub fn dependents(&self, name: &str) -> Vec<&Arc<SubmissionSpec>> {
        self.neighbours(name, Direction::Outgoing)
    }

    fn neighbours(&self, name: &str, direction: Direction) -> Vec<&Arc<SubmissionSpec>> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self
            .dag
            .edges_directed(idx, direction)
            .map(|e| match direction {
                Direction::Incoming => e.source(),
                Direction::Outgoing => e.target(),
            })
            .collect();
        found.sort();
        found.into_iter().map(|i| &self.dag[i]).collect()
    }

    /// All `(dependency, dependent)` name pairs.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(NodeIndex, NodeIndex)> = self
            .dag
            .edge_references()
            .map(|e| (e.source(), e.target()))
            .collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(from, to)| (self.dag[from].name(), self.dag[to].name()))
            .collect()
    }

    /// Portable encoding of the graph structure.
    pub fn encode(&self) -> EncodedGraph {
        EncodedGraph::new(
            self.nodes().map(|n| n.name().to_string()).collect(),
            self.edges()
                .into_iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        )
    }
}

/// Lazy topological iterator (Kahn's algorithm, insertion-order tie-break).
pub struct TopologicalOrder<'g> {
    graph: &'g DependencyGraph,
    in_degree: Vec<usize>,
    ready: BTreeSet<NodeIndex>,
}

impl<'g> TopologicalOrder<'g> {
    fn new(graph: &'g DependencyGraph) -> Self {
        let in_degree: Vec<usize> = graph
            .dag
            .node_indices()
            .map(|idx| graph.dag.edges_directed(idx, Direction::Incoming).count())
            .collect();
        let ready = graph
            .dag
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        Self {
            graph,
            in_degree,
            ready,
        }
    }
}

impl<'g> Iterator for TopologicalOrder<'g> {
    type Item = &'g Arc<SubmissionSpec>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.ready.pop_first()?;
        for edge in self.graph.dag.edges_directed(idx, Direction::Outgoing) {
            let target = edge.target();
            let degree = &mut self.in_degree[target.index()];
            *degree -= 1;
            if *degree == 0 {
                self.ready.insert(target);
            }
        }
        Some(&self.graph.dag[idx])
    }
}
