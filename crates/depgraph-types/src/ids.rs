//! Identifiers used throughout the dependency graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense, monotonically assigned graph node identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of this node in the graph's node table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of a top-level command in the trace.
///
/// Commands that rebuild the initial state of a trace live in a separate id
/// space, marked by the high bit (see [`CmdId::initial`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CmdId(pub u64);

impl CmdId {
    const INITIAL_FLAG: u64 = 1 << 63;

    /// The `ordinal`-th initial-state command.
    pub fn initial(ordinal: u64) -> Self {
        Self(ordinal | Self::INITIAL_FLAG)
    }

    pub fn is_initial(self) -> bool {
        self.0 & Self::INITIAL_FLAG != 0
    }

    /// Position within the trace (or within the initial commands).
    pub fn ordinal(self) -> u64 {
        self.0 & !Self::INITIAL_FLAG
    }
}

impl fmt::Display for CmdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initial() {
            write!(f, "init#{}", self.ordinal())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for CmdId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Hierarchical position of a command or nested sub-command.
///
/// The first element is the top-level [`CmdId`]; each following element is a
/// sub-command ordinal one level deeper (e.g. command buffers executing other
/// command buffers).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubCmdIdx(pub Vec<u64>);

impl SubCmdIdx {
    /// Position of a top-level command.
    pub fn top_level(cmd_id: CmdId) -> Self {
        Self(vec![cmd_id.0])
    }

    /// Position of a sub-command of `cmd_id`; `path` excludes the command itself.
    pub fn nested(cmd_id: CmdId, path: &[u64]) -> Self {
        let mut index = Vec::with_capacity(path.len() + 1);
        index.push(cmd_id.0);
        index.extend_from_slice(path);
        Self(index)
    }

    pub fn cmd_id(&self) -> Option<CmdId> {
        self.0.first().copied().map(CmdId)
    }

    /// Nesting depth: 0 for a top-level command.
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Position of the enclosing command, `None` for top-level commands.
    pub fn parent(&self) -> Option<SubCmdIdx> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for SubCmdIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

/// Caller-assigned identity of a tracked stateful object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(pub u64);

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref{}", self.0)
    }
}

/// Identifier of a memory pool (address space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub u32);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_cmd_ids_are_distinct_from_trace_ids() {
        let init = CmdId::initial(3);
        assert!(init.is_initial());
        assert_eq!(init.ordinal(), 3);
        assert_ne!(init, CmdId(3));
        assert!(!CmdId(3).is_initial());
        assert_eq!(init.to_string(), "init#3");
    }

    #[test]
    fn test_sub_cmd_idx_parent_chain() {
        let idx = SubCmdIdx::nested(CmdId(7), &[2, 4]);
        assert_eq!(idx.to_string(), "7.2.4");
        assert_eq!(idx.depth(), 2);
        assert_eq!(idx.cmd_id(), Some(CmdId(7)));

        let parent = idx.parent().unwrap();
        assert_eq!(parent, SubCmdIdx::nested(CmdId(7), &[2]));
        assert_eq!(parent.parent(), Some(SubCmdIdx::top_level(CmdId(7))));
        assert_eq!(SubCmdIdx::top_level(CmdId(7)).parent(), None);
    }
}
