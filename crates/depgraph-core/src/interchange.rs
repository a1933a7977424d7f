//! Interchange form of a finished graph.
//!
//! Mirrors the graph's query surface one-to-one: every node with its
//! accesses, parent, InitCmdNodes and edges, the reverse edges when the index
//! was retained, and the tracked object references. Only encoding is
//! implemented.

use serde::Serialize;

use depgraph_types::{ForwardAccess, Fragment, FragmentAccess, MemoryAccess, Node, NodeId, RefId};

use crate::config::{DependencyGraphConfig, InterchangeFormat};
use crate::error::{DepGraphError, Result};
use crate::graph::{DependencyGraph, NodeStats};

#[derive(Debug, Serialize)]
pub struct GraphMessage<'a> {
    pub config: &'a DependencyGraphConfig,
    pub num_dependencies: usize,
    pub nodes: Vec<NodeMessage<'a>>,
    pub state_refs: Vec<StateRefMessage<'a>>,
}

#[derive(Debug, Serialize)]
pub struct NodeMessage<'a> {
    pub id: NodeId,
    #[serde(flatten)]
    pub node: &'a Node,
    /// Name of the command, for top-level command nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    pub stats: NodeStats,
    pub dependencies: &'a [NodeId],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependents: Option<&'a [NodeId]>,
    #[serde(skip_serializing_if = "is_empty")]
    pub init_cmd_nodes: &'a [NodeId],
    #[serde(skip_serializing_if = "is_empty")]
    pub fragment_accesses: &'a [FragmentAccess],
    #[serde(skip_serializing_if = "is_empty")]
    pub memory_accesses: &'a [MemoryAccess],
    #[serde(skip_serializing_if = "is_empty")]
    pub forward_accesses: &'a [ForwardAccess],
}

/// `ref_id` was loaded from `owner.fragment`.
#[derive(Debug, Serialize)]
pub struct StateRefMessage<'a> {
    pub ref_id: RefId,
    pub owner: RefId,
    pub fragment: &'a Fragment,
}

impl<'a> GraphMessage<'a> {
    pub fn from_graph(graph: &'a DependencyGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|(id, node)| {
                let accesses = graph.get_node_accesses(id);
                let command = match node {
                    Node::Cmd(cmd) if cmd.index.depth() == 0 => cmd
                        .cmd_id()
                        .and_then(|cmd_id| graph.get_command(cmd_id))
                        .map(|cmd| cmd.name()),
                    _ => None,
                };
                NodeMessage {
                    id,
                    node,
                    command,
                    parent: accesses.and_then(|a| a.parent_node),
                    stats: graph.node_stats(id).copied().unwrap_or_default(),
                    dependencies: graph.dependencies_from(id),
                    dependents: graph.dependencies_to(id),
                    init_cmd_nodes: accesses
                        .map(|a| a.init_cmd_nodes.as_slice())
                        .unwrap_or_default(),
                    fragment_accesses: accesses
                        .map(|a| a.fragment_accesses.as_slice())
                        .unwrap_or_default(),
                    memory_accesses: accesses
                        .map(|a| a.memory_accesses.as_slice())
                        .unwrap_or_default(),
                    forward_accesses: accesses
                        .map(|a| a.forward_accesses.as_slice())
                        .unwrap_or_default(),
                }
            })
            .collect();

        let mut state_refs: Vec<StateRefMessage<'a>> = graph
            .state_refs()
            .iter()
            .map(|(&ref_id, slot)| StateRefMessage {
                ref_id,
                owner: slot.ref_id,
                fragment: &slot.fragment,
            })
            .collect();
        state_refs.sort_by_key(|r| r.ref_id);

        Self {
            config: graph.config(),
            num_dependencies: graph.num_dependencies(),
            nodes,
            state_refs,
        }
    }
}

fn is_empty<T>(items: &&[T]) -> bool {
    items.is_empty()
}

/// Encode `graph` in the interchange form.
pub fn encode(graph: &DependencyGraph, format: InterchangeFormat) -> Result<String> {
    let message = GraphMessage::from_graph(graph);
    let encoded = match format {
        InterchangeFormat::Json => serde_json::to_string(&message),
        InterchangeFormat::JsonPretty => serde_json::to_string_pretty(&message),
    };
    encoded.map_err(|e| DepGraphError::Encode(e.to_string()))
}

/// Reading the interchange form back is not supported.
pub fn decode(_encoded: &str) -> Result<DependencyGraph> {
    Err(DepGraphError::Unsupported(
        "decoding a dependency graph from its interchange form".to_string(),
    ))
}
