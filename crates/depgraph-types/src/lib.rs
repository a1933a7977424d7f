//! Shared data model for the trace dependency graph.
//!
//! This crate provides:
//! - Identifiers: `NodeId`, `CmdId`, `SubCmdIdx`, `RefId`, `PoolId`
//! - Graph nodes: `Node` (`CmdNode` / `ObsNode`) and memory `Observation`s
//! - Object fragments: `Fragment` and `MapKey`
//! - Resolved access records produced by the access trackers

pub mod access;
pub mod fragment;
pub mod ids;
pub mod node;

pub use access::{
    AccessMode, DependencyId, ForwardAccess, ForwardAccessMode, ForwardNodes, FragmentAccess,
    MemoryAccess, Span,
};
pub use fragment::{Fragment, MapKey};
pub use ids::{CmdId, NodeId, PoolId, RefId, SubCmdIdx};
pub use node::{CmdNode, MemoryRange, Node, ObsNode, Observation};
