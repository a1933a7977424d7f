//! Graph node descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{CmdId, PoolId, SubCmdIdx};

/// Contiguous byte range `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryRange {
    pub base: u64,
    pub size: u64,
}

impl MemoryRange {
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Exclusive end address (saturating at `u64::MAX`).
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// A discrete memory observation attached to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    pub pool: PoolId,
    pub range: MemoryRange,
}

impl Observation {
    pub fn new(pool: PoolId, base: u64, size: u64) -> Self {
        Self {
            pool,
            range: MemoryRange::new(base, size),
        }
    }
}

/// Node for an executed command or nested sub-command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CmdNode {
    /// Hierarchical position; `index[0]` is the top-level command id.
    pub index: SubCmdIdx,
}

impl CmdNode {
    pub fn cmd_id(&self) -> Option<CmdId> {
        self.index.cmd_id()
    }

    /// Whether this node was synthesized for an initial-state command.
    pub fn is_initial(&self) -> bool {
        self.cmd_id().is_some_and(CmdId::is_initial)
    }
}

/// Node for one memory observation made by a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObsNode {
    /// Command that made the observation.
    pub cmd_id: CmdId,
    /// Ordinal among that command's observations.
    pub index: u64,
    pub is_write: bool,
    pub observation: Observation,
}

/// A dependency graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Cmd(CmdNode),
    Obs(ObsNode),
}

impl Node {
    /// The top-level command this node belongs to.
    pub fn cmd_id(&self) -> Option<CmdId> {
        match self {
            Node::Cmd(n) => n.cmd_id(),
            Node::Obs(n) => Some(n.cmd_id),
        }
    }

    pub fn as_cmd(&self) -> Option<&CmdNode> {
        match self {
            Node::Cmd(n) => Some(n),
            Node::Obs(_) => None,
        }
    }

    pub fn as_obs(&self) -> Option<&ObsNode> {
        match self {
            Node::Obs(n) => Some(n),
            Node::Cmd(_) => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Cmd(n) => write!(f, "cmd[{}]", n.index),
            Node::Obs(n) => write!(
                f,
                "obs[{}#{} {} {}:{:#x}+{}]",
                n.cmd_id,
                n.index,
                if n.is_write { "write" } else { "read" },
                n.observation.pool,
                n.observation.range.base,
                n.observation.range.size
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_cmd_id() {
        let cmd = Node::Cmd(CmdNode {
            index: SubCmdIdx::nested(CmdId(4), &[1]),
        });
        assert_eq!(cmd.cmd_id(), Some(CmdId(4)));
        assert!(cmd.as_obs().is_none());

        let obs = Node::Obs(ObsNode {
            cmd_id: CmdId(9),
            index: 0,
            is_write: true,
            observation: Observation::new(PoolId(1), 0x100, 16),
        });
        assert_eq!(obs.cmd_id(), Some(CmdId(9)));
        assert_eq!(obs.to_string(), "obs[9#0 write pool1:0x100+16]");
    }

    #[test]
    fn test_node_serde_tagging() {
        let node = Node::Cmd(CmdNode {
            index: SubCmdIdx::top_level(CmdId::initial(0)),
        });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "cmd");
        assert!(node.as_cmd().unwrap().is_initial());
    }

    #[test]
    fn test_memory_range_end_saturates() {
        assert_eq!(MemoryRange::new(10, 5).end(), 15);
        assert_eq!(MemoryRange::new(u64::MAX - 1, 10).end(), u64::MAX);
        assert!(MemoryRange::new(3, 0).is_empty());
    }
}
