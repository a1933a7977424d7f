//! Trace Dependency Graph
//!
//! Builds a directed dependency graph over the commands of a traced workload.
//! Nodes are executed commands, nested sub-commands and memory observations;
//! edges link each node to the earlier nodes whose writes it observed.
//!
//! - **Data model**: [`depgraph_types`] (node, fragment and access records)
//! - **Task serializers**: [`depgraph_worker`] (bounded, order-preserving pipelines)
//! - **Trackers, builder, graph**: [`depgraph_core`]
//! - **Trace replay**: [`replay`] drives a [`BuildSession`] from JSON-lines events
//!
//! See the `depgraph` binary for the command-line front end.

pub mod replay;

pub use depgraph_core;
pub use depgraph_types;
pub use depgraph_worker;

pub use depgraph_core::{
    BuildSession, DepGraphError, DependencyGraph, DependencyGraphConfig, ErrorKind,
    InterchangeFormat, NodeAccesses, NodeStats, PipelineConfig,
};
pub use replay::{build_graph, parse_events, TraceEvent};
