//! Command handles and per-node execution context.

use std::fmt;
use std::sync::Arc;

use depgraph_types::{CmdId, NodeId, SubCmdIdx};

/// Caller-supplied command, passed through to graph consumers untouched.
pub trait Command: fmt::Debug + Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;
}

pub type CmdRef = Arc<dyn Command>;

/// A command known only by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCommand {
    name: String,
}

impl NamedCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn into_ref(self) -> CmdRef {
        Arc::new(self)
    }
}

impl Command for NamedCommand {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Identifies the node a begin/end bracket refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdContext {
    pub cmd_id: CmdId,
    pub index: SubCmdIdx,
    pub node_id: NodeId,
    /// Node of the enclosing command, `None` at top level.
    pub parent: Option<NodeId>,
}

impl CmdContext {
    pub fn depth(&self) -> usize {
        self.index.depth()
    }

    pub fn is_sub_cmd(&self) -> bool {
        self.depth() > 0
    }
}
