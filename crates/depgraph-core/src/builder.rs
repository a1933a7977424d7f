//! Graph builder: node allocation by execution position and access ingestion.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use depgraph_types::{CmdId, CmdNode, Node, NodeId, ObsNode, Observation, RefId, SubCmdIdx};

use crate::config::DependencyGraphConfig;
use crate::context::{CmdContext, CmdRef};
use crate::error::{DepGraphError, Result};
use crate::forward::ForwardAccesses;
use crate::fragment::{FragmentAccesses, RefFrag};
use crate::graph::{DependencyGraph, NodeStats, ReverseIndexState};
use crate::memory::MemoryAccesses;

/// Owns one [`DependencyGraph`] while it is being built.
pub trait GraphBuilder: Send {
    /// Record the accesses of one command and the edges they imply.
    fn add_dependencies(
        &mut self,
        fragments: FragmentAccesses,
        memory: MemoryAccesses,
        forward: ForwardAccesses,
    ) -> Result<()>;

    /// Build the reverse index. Afterwards the graph accepts no more
    /// dependencies.
    fn build_reverse_dependencies(&mut self) -> Result<()>;

    /// Node of the command at `path` below `cmd_id` (empty path: the command
    /// itself), allocating it and its ancestors on first use.
    fn get_cmd_node_id(&mut self, cmd_id: CmdId, path: &[u64]) -> Result<NodeId>;

    /// Allocate one node per observation made by `cmd_id`.
    fn get_obs_node_ids(
        &mut self,
        cmd_id: CmdId,
        observations: &[Observation],
        is_write: bool,
    ) -> Result<Vec<NodeId>>;

    /// Register `cmd` under `cmd_id` and return the context of its node.
    fn get_cmd_context(&mut self, cmd_id: CmdId, cmd: CmdRef) -> Result<CmdContext>;

    /// Context of the sub-command at `path` below `cmd_id`.
    fn get_sub_cmd_context(&mut self, cmd_id: CmdId, path: &[u64]) -> Result<CmdContext>;

    fn get_node_stats(&mut self, node: NodeId) -> Result<NodeStats>;

    /// Snapshot of the graph built so far.
    fn get_graph(&mut self) -> Result<DependencyGraph>;

    fn set_state_refs(&mut self, state_refs: HashMap<RefId, RefFrag>) -> Result<()>;

    /// Finish building and hand over the graph.
    fn close(&mut self) -> Result<DependencyGraph>;

    fn is_closed(&self) -> bool;
}

/// Synchronous graph builder.
#[derive(Debug)]
pub struct DependencyGraphBuilder {
    graph: DependencyGraph,
    cmd_nodes: HashMap<SubCmdIdx, NodeId>,
    obs_counts: HashMap<CmdId, u64>,
    closed: bool,
}

impl DependencyGraphBuilder {
    /// `initial_cmds` rebuild the trace's initial state. They are registered
    /// under [`CmdId::initial`] ids and, with `include_initial_commands`,
    /// get root nodes ahead of every trace command.
    pub fn new(config: DependencyGraphConfig, initial_cmds: Vec<CmdRef>) -> Self {
        let mut builder = Self {
            graph: DependencyGraph::new(config),
            cmd_nodes: HashMap::new(),
            obs_counts: HashMap::new(),
            closed: false,
        };
        for (ordinal, cmd) in initial_cmds.into_iter().enumerate() {
            let cmd_id = CmdId::initial(ordinal as u64);
            builder.graph.register_command(cmd_id, cmd);
            if config.include_initial_commands {
                builder.node_for(SubCmdIdx::top_level(cmd_id));
            }
        }
        debug!(
            nodes = builder.graph.num_nodes(),
            "dependency graph builder created"
        );
        builder
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn node_for(&mut self, index: SubCmdIdx) -> NodeId {
        if let Some(&node) = self.cmd_nodes.get(&index) {
            return node;
        }
        let parent = index.parent().map(|parent| self.node_for(parent));
        let node = self.graph.push_node(
            Node::Cmd(CmdNode {
                index: index.clone(),
            }),
            parent,
        );
        trace!(%node, %index, "allocated command node");
        self.cmd_nodes.insert(index, node);
        node
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DepGraphError::AlreadyClosed {
                component: "graph builder",
            });
        }
        Ok(())
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if self.graph.contains(node) {
            Ok(())
        } else {
            Err(DepGraphError::UnknownNode(node))
        }
    }

    /// Every node referenced by the batch must exist before anything is
    /// recorded, so a rejected batch leaves the graph untouched.
    fn validate(
        &self,
        fragments: &FragmentAccesses,
        memory: &MemoryAccesses,
        forward: &ForwardAccesses,
    ) -> Result<()> {
        for access in fragments.by_node.values().flatten() {
            self.check_node(access.node)?;
            access.deps.iter().try_for_each(|&dep| self.check_node(dep))?;
        }
        for (&node, inits) in &fragments.init_cmd_nodes {
            self.check_node(node)?;
            inits.iter().try_for_each(|&init| self.check_node(init))?;
        }
        for access in memory.values().flatten() {
            self.check_node(access.node)?;
            access.deps.iter().try_for_each(|&dep| self.check_node(dep))?;
        }
        for access in forward.values().flatten() {
            self.check_node(access.nodes.open)?;
            self.check_node(access.resolving_node())?;
        }
        Ok(())
    }
}

impl GraphBuilder for DependencyGraphBuilder {
    fn add_dependencies(
        &mut self,
        fragments: FragmentAccesses,
        memory: MemoryAccesses,
        forward: ForwardAccesses,
    ) -> Result<()> {
        self.check_open()?;
        if self.graph.reverse_state() == ReverseIndexState::Built {
            let err = DepGraphError::ReverseIndexBuilt;
            warn!(error = %err, "rejecting dependency batch");
            return Err(err);
        }
        self.validate(&fragments, &memory, &forward)?;
        let save = self.graph.config().save_node_accesses;
        let before = self.graph.num_dependencies();

        for (node, accesses) in fragments.by_node {
            for access in &accesses {
                for &dep in &access.deps {
                    self.graph.add_edge(node, dep);
                }
                let stats = self.graph.stats_mut(node);
                if access.mode.is_write() {
                    stats.fragment_writes += 1;
                } else {
                    stats.fragment_reads += 1;
                }
            }
            if save {
                self.graph
                    .accesses_mut(node)
                    .fragment_accesses
                    .extend(accesses);
            }
        }
        for (node, inits) in fragments.init_cmd_nodes {
            let recorded = &mut self.graph.accesses_mut(node).init_cmd_nodes;
            for init in inits {
                if !recorded.contains(&init) {
                    recorded.push(init);
                }
            }
        }

        for (node, accesses) in memory {
            for access in &accesses {
                for &dep in &access.deps {
                    self.graph.add_edge(node, dep);
                }
                let stats = self.graph.stats_mut(node);
                if access.mode.is_write() {
                    stats.memory_writes += 1;
                } else {
                    stats.memory_reads += 1;
                }
            }
            if save {
                self.graph
                    .accesses_mut(node)
                    .memory_accesses
                    .extend(accesses);
            }
        }

        for (node, accesses) in forward {
            for access in &accesses {
                match access.edge() {
                    Some((dependent, dependency)) => {
                        self.graph.add_edge(dependent, dependency);
                        self.graph.stats_mut(node).forward_closes += 1;
                    }
                    None => self.graph.stats_mut(node).forward_drops += 1,
                }
            }
            if save {
                self.graph
                    .accesses_mut(node)
                    .forward_accesses
                    .extend(accesses);
            }
        }

        trace!(
            new_edges = self.graph.num_dependencies() - before,
            "dependency batch added"
        );
        Ok(())
    }

    fn build_reverse_dependencies(&mut self) -> Result<()> {
        self.check_open()?;
        if self.graph.reverse_state() == ReverseIndexState::Built {
            return Err(DepGraphError::ReverseIndexBuilt);
        }
        self.graph.build_reverse_index();
        Ok(())
    }

    fn get_cmd_node_id(&mut self, cmd_id: CmdId, path: &[u64]) -> Result<NodeId> {
        self.check_open()?;
        Ok(self.node_for(SubCmdIdx::nested(cmd_id, path)))
    }

    fn get_obs_node_ids(
        &mut self,
        cmd_id: CmdId,
        observations: &[Observation],
        is_write: bool,
    ) -> Result<Vec<NodeId>> {
        self.check_open()?;
        let parent = self.node_for(SubCmdIdx::top_level(cmd_id));
        let mut nodes = Vec::with_capacity(observations.len());
        for &observation in observations {
            let count = self.obs_counts.entry(cmd_id).or_insert(0);
            let index = *count;
            *count += 1;
            nodes.push(self.graph.push_node(
                Node::Obs(ObsNode {
                    cmd_id,
                    index,
                    is_write,
                    observation,
                }),
                Some(parent),
            ));
        }
        Ok(nodes)
    }

    fn get_cmd_context(&mut self, cmd_id: CmdId, cmd: CmdRef) -> Result<CmdContext> {
        self.check_open()?;
        self.graph.register_command(cmd_id, cmd);
        let index = SubCmdIdx::top_level(cmd_id);
        let node_id = self.node_for(index.clone());
        Ok(CmdContext {
            cmd_id,
            index,
            node_id,
            parent: None,
        })
    }

    fn get_sub_cmd_context(&mut self, cmd_id: CmdId, path: &[u64]) -> Result<CmdContext> {
        self.check_open()?;
        let index = SubCmdIdx::nested(cmd_id, path);
        let parent = index.parent().map(|parent| self.node_for(parent));
        let node_id = self.node_for(index.clone());
        Ok(CmdContext {
            cmd_id,
            index,
            node_id,
            parent,
        })
    }

    fn get_node_stats(&mut self, node: NodeId) -> Result<NodeStats> {
        self.graph
            .node_stats(node)
            .copied()
            .ok_or(DepGraphError::UnknownNode(node))
    }

    fn get_graph(&mut self) -> Result<DependencyGraph> {
        Ok(self.graph.clone())
    }

    fn set_state_refs(&mut self, state_refs: HashMap<RefId, RefFrag>) -> Result<()> {
        self.check_open()?;
        self.graph.set_state_refs(state_refs);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<DependencyGraph> {
        self.check_open()?;
        self.closed = true;
        let config = *self.graph.config();
        let graph = std::mem::replace(&mut self.graph, DependencyGraph::new(config));
        debug!(
            nodes = graph.num_nodes(),
            edges = graph.num_dependencies(),
            reverse = graph.has_reverse_index(),
            "dependency graph finished"
        );
        Ok(graph)
    }
}
