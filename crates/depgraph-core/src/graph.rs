//! The dependency graph: node table, per-node accesses and edge lists.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use depgraph_types::{CmdId, ForwardAccess, FragmentAccess, MemoryAccess, Node, NodeId, RefId};

use crate::config::DependencyGraphConfig;
use crate::context::CmdRef;
use crate::fragment::RefFrag;

/// Everything recorded about one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAccesses {
    pub fragment_accesses: Vec<FragmentAccess>,
    pub memory_accesses: Vec<MemoryAccess>,
    /// Forward dependencies resolved at this node.
    pub forward_accesses: Vec<ForwardAccess>,
    /// Enclosing command node; `None` for top-level commands.
    pub parent_node: Option<NodeId>,
    /// Nodes that first made an object read by this node visible.
    pub init_cmd_nodes: Vec<NodeId>,
}

/// Diagnostic counters of one node. Kept even when access lists are discarded.
///
/// Access counters count delivered access records: a batch handed to
/// `add_dependencies` twice is counted twice, as it is appended twice to the
/// saved access lists. Edge counters count distinct edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub fragment_reads: usize,
    pub fragment_writes: usize,
    pub memory_reads: usize,
    pub memory_writes: usize,
    pub forward_closes: usize,
    pub forward_drops: usize,
    /// Outgoing edges: nodes this node depends on.
    pub dependencies: usize,
    /// Incoming edges: nodes depending on this node.
    pub dependents: usize,
}

/// Lifecycle of the reverse dependency index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseIndexState {
    /// Still accepting dependencies; no reverse index.
    Building,
    /// Reverse index materialized; the graph is frozen.
    Built,
}

/// Directed dependency graph over executed commands and observations.
///
/// `dependencies_from[n]` lists the nodes `n` depends on. Every such node was
/// allocated before `n`, so the graph is acyclic. A node never depends on its
/// own sub-command or observation nodes; that containment is `parent_node`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    config: DependencyGraphConfig,
    nodes: Vec<Node>,
    accesses: Vec<NodeAccesses>,
    stats: Vec<NodeStats>,
    commands: HashMap<CmdId, CmdRef>,
    dependencies_from: Vec<Vec<NodeId>>,
    dependencies_to: Option<Vec<Vec<NodeId>>>,
    edges: HashSet<(NodeId, NodeId)>,
    reverse_state: ReverseIndexState,
    state_refs: HashMap<RefId, RefFrag>,
}

impl DependencyGraph {
    pub fn new(config: DependencyGraphConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            accesses: Vec::new(),
            stats: Vec::new(),
            commands: HashMap::new(),
            dependencies_from: Vec::new(),
            dependencies_to: None,
            edges: HashSet::new(),
            reverse_state: ReverseIndexState::Building,
            state_refs: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DependencyGraphConfig {
        &self.config
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node.index())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId::new(i), node))
    }

    /// The command registered under `cmd_id`, as supplied by the caller.
    pub fn get_command(&self, cmd_id: CmdId) -> Option<&CmdRef> {
        self.commands.get(&cmd_id)
    }

    pub fn get_node_accesses(&self, node: NodeId) -> Option<&NodeAccesses> {
        self.accesses.get(node.index())
    }

    pub fn node_stats(&self, node: NodeId) -> Option<&NodeStats> {
        self.stats.get(node.index())
    }

    /// Visit every edge once as `(source, sink)`, where `sink` depends on
    /// `source`. Stops at the first error `f` returns.
    pub fn for_each_dependency<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(NodeId, NodeId) -> Result<(), E>,
    {
        for (sink, sources) in self.dependencies_from.iter().enumerate() {
            for &source in sources {
                f(source, NodeId::new(sink))?;
            }
        }
        Ok(())
    }

    /// Nodes `node` depends on, in insertion order.
    pub fn dependencies_from(&self, node: NodeId) -> &[NodeId] {
        self.dependencies_from
            .get(node.index())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Nodes depending on `node`. `None` unless the reverse index was built
    /// with `reverse_dependencies` enabled.
    pub fn dependencies_to(&self, node: NodeId) -> Option<&[NodeId]> {
        let index = self.dependencies_to.as_ref()?;
        Some(index.get(node.index()).map(Vec::as_slice).unwrap_or_default())
    }

    pub fn has_reverse_index(&self) -> bool {
        self.dependencies_to.is_some()
    }

    pub fn has_dependency(&self, dependent: NodeId, dependency: NodeId) -> bool {
        self.edges.contains(&(dependent, dependency))
    }

    pub fn num_dependencies(&self) -> usize {
        self.edges.len()
    }

    pub fn reverse_state(&self) -> ReverseIndexState {
        self.reverse_state
    }

    /// Where tracked object references were loaded from, as recorded by the
    /// fragment tracker. Empty until the build session finishes.
    pub fn state_refs(&self) -> &HashMap<RefId, RefFrag> {
        &self.state_refs
    }

    pub(crate) fn push_node(&mut self, node: Node, parent: Option<NodeId>) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node);
        self.accesses.push(NodeAccesses {
            parent_node: parent,
            ..NodeAccesses::default()
        });
        self.stats.push(NodeStats::default());
        self.dependencies_from.push(Vec::new());
        id
    }

    pub(crate) fn register_command(&mut self, cmd_id: CmdId, cmd: CmdRef) {
        self.commands.entry(cmd_id).or_insert(cmd);
    }

    pub(crate) fn contains(&self, node: NodeId) -> bool {
        node.index() < self.nodes.len()
    }

    /// Insert `dependent -> dependency`. Returns false for edges already
    /// present and for a `dependency` not allocated before `dependent` (the
    /// node itself or one of its descendants).
    pub(crate) fn add_edge(&mut self, dependent: NodeId, dependency: NodeId) -> bool {
        if dependency >= dependent {
            if dependency != dependent {
                trace!(%dependent, %dependency, "skipping edge onto a later node");
            }
            return false;
        }
        if !self.edges.insert((dependent, dependency)) {
            return false;
        }
        self.dependencies_from[dependent.index()].push(dependency);
        self.stats[dependent.index()].dependencies += 1;
        self.stats[dependency.index()].dependents += 1;
        true
    }

    pub(crate) fn accesses_mut(&mut self, node: NodeId) -> &mut NodeAccesses {
        &mut self.accesses[node.index()]
    }

    pub(crate) fn stats_mut(&mut self, node: NodeId) -> &mut NodeStats {
        &mut self.stats[node.index()]
    }

    pub(crate) fn set_state_refs(&mut self, state_refs: HashMap<RefId, RefFrag>) {
        self.state_refs = state_refs;
    }

    /// Materialize the inverse of `dependencies_from` and freeze the graph.
    pub(crate) fn build_reverse_index(&mut self) {
        self.reverse_state = ReverseIndexState::Built;
        if !self.config.reverse_dependencies {
            debug!("reverse dependencies not retained");
            return;
        }
        let mut index = vec![Vec::new(); self.nodes.len()];
        for (sink, sources) in self.dependencies_from.iter().enumerate() {
            for &source in sources {
                index[source.index()].push(NodeId::new(sink));
            }
        }
        debug!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "reverse dependency index built"
        );
        self.dependencies_to = Some(index);
    }
}
