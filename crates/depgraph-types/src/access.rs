//! Resolved access records emitted by the access trackers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fragment::Fragment;
use crate::ids::{NodeId, PoolId, RefId};

/// Read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn is_write(self) -> bool {
        matches!(self, AccessMode::Write)
    }
}

/// Inserts `dep` into a sorted dependency list, ignoring duplicates.
fn insert_sorted(deps: &mut Vec<NodeId>, dep: NodeId) {
    if let Err(pos) = deps.binary_search(&dep) {
        deps.insert(pos, dep);
    }
}

/// Access to one fragment of a tracked object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentAccess {
    pub node: NodeId,
    pub ref_id: RefId,
    pub fragment: Fragment,
    pub mode: AccessMode,
    /// Nodes this access depends on, sorted and unique.
    pub deps: Vec<NodeId>,
}

impl FragmentAccess {
    pub fn new(node: NodeId, ref_id: RefId, fragment: Fragment, mode: AccessMode) -> Self {
        Self {
            node,
            ref_id,
            fragment,
            mode,
            deps: Vec::new(),
        }
    }

    pub fn add_dep(&mut self, dep: NodeId) {
        insert_sorted(&mut self.deps, dep);
    }
}

/// Half-open byte interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Access to a byte range of a memory pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAccess {
    pub node: NodeId,
    pub pool: PoolId,
    pub span: Span,
    pub mode: AccessMode,
    /// Nodes this access depends on, sorted and unique.
    pub deps: Vec<NodeId>,
}

impl MemoryAccess {
    pub fn new(node: NodeId, pool: PoolId, span: Span, mode: AccessMode) -> Self {
        Self {
            node,
            pool,
            span,
            mode,
            deps: Vec::new(),
        }
    }

    pub fn add_dep(&mut self, dep: NodeId) {
        insert_sorted(&mut self.deps, dep);
    }
}

/// Opaque key correlating a forward dependency's open with its resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyId {
    Handle(u64),
    Named(String),
}

impl From<u64> for DependencyId {
    fn from(value: u64) -> Self {
        DependencyId::Handle(value)
    }
}

impl From<&str> for DependencyId {
    fn from(value: &str) -> Self {
        DependencyId::Named(value.to_string())
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyId::Handle(h) => write!(f, "{:#x}", h),
            DependencyId::Named(n) => write!(f, "{}", n),
        }
    }
}

/// How a forward dependency was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardAccessMode {
    /// The expected consumer arrived; an edge open -> close exists.
    Closed,
    /// The consumer never arrived; no edge.
    Dropped,
}

/// Nodes taking part in a forward dependency. Exactly one of `close` and
/// `drop` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardNodes {
    pub open: NodeId,
    pub close: Option<NodeId>,
    pub drop: Option<NodeId>,
}

/// A resolved forward dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAccess {
    pub nodes: ForwardNodes,
    pub dependency_id: DependencyId,
    pub mode: ForwardAccessMode,
}

impl ForwardAccess {
    pub fn closed(open: NodeId, close: NodeId, dependency_id: DependencyId) -> Self {
        Self {
            nodes: ForwardNodes {
                open,
                close: Some(close),
                drop: None,
            },
            dependency_id,
            mode: ForwardAccessMode::Closed,
        }
    }

    pub fn dropped(open: NodeId, drop: NodeId, dependency_id: DependencyId) -> Self {
        Self {
            nodes: ForwardNodes {
                open,
                close: None,
                drop: Some(drop),
            },
            dependency_id,
            mode: ForwardAccessMode::Dropped,
        }
    }

    /// The `(dependent, dependency)` edge implied by this access, if any.
    pub fn edge(&self) -> Option<(NodeId, NodeId)> {
        match self.mode {
            ForwardAccessMode::Closed => self.nodes.close.map(|close| (close, self.nodes.open)),
            ForwardAccessMode::Dropped => None,
        }
    }

    /// The node at which this dependency was resolved.
    pub fn resolving_node(&self) -> NodeId {
        self.nodes
            .close
            .or(self.nodes.drop)
            .unwrap_or(self.nodes.open)
    }
}
