//! Begin/end bracket bookkeeping shared by the access trackers.

use depgraph_types::NodeId;

use crate::context::CmdContext;
use crate::error::{DepGraphError, Result};

/// Stack of open command brackets. The bottom entry is the top-level command;
/// notifications are attributed to the innermost entry.
#[derive(Debug, Default, Clone)]
pub(crate) struct Brackets {
    open: Vec<NodeId>,
}

impl Brackets {
    pub(crate) fn begin_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        if let Some(open) = self.open.first() {
            return Err(DepGraphError::bracket(format!(
                "begin of {} while {} is still open",
                ctx.node_id, open
            )));
        }
        self.open.push(ctx.node_id);
        Ok(())
    }

    pub(crate) fn begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        let top = self.top("begin sub-command")?;
        if sub.parent != Some(top) {
            return Err(DepGraphError::bracket(format!(
                "sub-command {} does not nest inside open node {}",
                sub.node_id, top
            )));
        }
        self.open.push(sub.node_id);
        Ok(())
    }

    pub(crate) fn end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        if self.open.len() < 2 {
            return Err(DepGraphError::bracket(format!(
                "end of sub-command {} with no open sub-command",
                sub.node_id
            )));
        }
        self.expect_top(sub.node_id)?;
        self.open.pop();
        Ok(())
    }

    pub(crate) fn end_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        match self.open.len() {
            0 => Err(DepGraphError::bracket(format!(
                "end of {} with no open command",
                ctx.node_id
            ))),
            1 => {
                self.expect_top(ctx.node_id)?;
                self.open.pop();
                Ok(())
            }
            n => Err(DepGraphError::bracket(format!(
                "end of {} with {} sub-command(s) still open",
                ctx.node_id,
                n - 1
            ))),
        }
    }

    /// Innermost open node.
    pub(crate) fn current(&self, operation: &'static str) -> Result<NodeId> {
        self.open
            .last()
            .copied()
            .ok_or(DepGraphError::NoOpenNode { operation })
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.open.is_empty()
    }

    fn top(&self, operation: &'static str) -> Result<NodeId> {
        self.current(operation)
    }

    fn expect_top(&self, node: NodeId) -> Result<()> {
        match self.open.last() {
            Some(&top) if top == node => Ok(()),
            Some(&top) => Err(DepGraphError::bracket(format!(
                "end of {} while {} is innermost",
                node, top
            ))),
            None => Err(DepGraphError::bracket(format!("end of {} with nothing open", node))),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use depgraph_types::{CmdId, NodeId, SubCmdIdx};

    use crate::context::CmdContext;

    pub(crate) fn cmd(node: u32) -> CmdContext {
        CmdContext {
            cmd_id: CmdId(node as u64),
            index: SubCmdIdx::top_level(CmdId(node as u64)),
            node_id: NodeId(node),
            parent: None,
        }
    }

    pub(crate) fn sub(parent: &CmdContext, ordinal: u64, node: u32) -> CmdContext {
        let mut index = parent.index.clone();
        index.0.push(ordinal);
        CmdContext {
            cmd_id: parent.cmd_id,
            index,
            node_id: NodeId(node),
            parent: Some(parent.node_id),
        }
    }
}
