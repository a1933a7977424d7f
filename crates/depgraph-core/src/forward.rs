//! Open/close handshakes for dependencies established outside program order.
//!
//! A node opens a dependency under an opaque id; a later node either closes it
//! (the consumer arrived: edge from the opener) or drops it (no consumer: no
//! edge). An id may have at most one pending open at a time.

use std::collections::{BTreeMap, HashMap};

use tracing::{trace, warn};

use depgraph_types::{DependencyId, ForwardAccess, NodeId};

use crate::brackets::Brackets;
use crate::context::CmdContext;
use crate::error::{DepGraphError, Result};

/// Resolved forward accesses of one command, keyed by the resolving node.
pub type ForwardAccesses = BTreeMap<NodeId, Vec<ForwardAccess>>;

/// Receives forward dependency notifications for a sequence of commands.
pub trait ForwardTracker: Send {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()>;

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<ForwardAccesses>;

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()>;

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()>;

    fn open_forward_dependency(&mut self, id: DependencyId) -> Result<()>;

    fn close_forward_dependency(&mut self, id: DependencyId) -> Result<()>;

    fn drop_forward_dependency(&mut self, id: DependencyId) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Opens never resolved, with their opening node. Only readable after
    /// [`close`](Self::close).
    fn pending(&self) -> Result<&HashMap<DependencyId, NodeId>>;
}

/// Synchronous forward dependency tracker.
#[derive(Debug, Default)]
pub struct ForwardWatcher {
    brackets: Brackets,
    open: HashMap<DependencyId, NodeId>,
    resolved: ForwardAccesses,
    closed: bool,
}

impl ForwardWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the pending open of `id`, returning `(open, resolving, id)`.
    fn resolve(
        &mut self,
        id: DependencyId,
        operation: &'static str,
    ) -> Result<(NodeId, NodeId, DependencyId)> {
        self.check_open()?;
        let node = self.brackets.current(operation)?;
        match self.open.remove(&id) {
            Some(open) => Ok((open, node, id)),
            None => {
                let err = DepGraphError::ForwardNotOpen {
                    id,
                    operation,
                    node,
                };
                warn!(error = %err, "forward dependency protocol violation");
                Err(err)
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DepGraphError::AlreadyClosed {
                component: "forward tracker",
            });
        }
        Ok(())
    }
}

impl ForwardTracker for ForwardWatcher {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        self.check_open()?;
        self.brackets.begin_cmd(ctx)
    }

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<ForwardAccesses> {
        self.check_open()?;
        self.brackets.end_cmd(ctx)?;
        let accesses = std::mem::take(&mut self.resolved);
        trace!(
            node = %ctx.node_id,
            resolved = accesses.values().map(Vec::len).sum::<usize>(),
            pending = self.open.len(),
            "forward dependencies resolved"
        );
        Ok(accesses)
    }

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        self.check_open()?;
        self.brackets.begin_sub_cmd(sub)
    }

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        self.check_open()?;
        self.brackets.end_sub_cmd(sub)
    }

    fn open_forward_dependency(&mut self, id: DependencyId) -> Result<()> {
        self.check_open()?;
        let node = self.brackets.current("forward open")?;
        if let Some(&pending) = self.open.get(&id) {
            let err = DepGraphError::ForwardAlreadyOpen { id, pending, node };
            warn!(error = %err, "forward dependency protocol violation");
            return Err(err);
        }
        self.open.insert(id, node);
        Ok(())
    }

    fn close_forward_dependency(&mut self, id: DependencyId) -> Result<()> {
        let (open, node, id) = self.resolve(id, "close")?;
        self.resolved
            .entry(node)
            .or_default()
            .push(ForwardAccess::closed(open, node, id));
        Ok(())
    }

    fn drop_forward_dependency(&mut self, id: DependencyId) -> Result<()> {
        let (open, node, id) = self.resolve(id, "drop")?;
        self.resolved
            .entry(node)
            .or_default()
            .push(ForwardAccess::dropped(open, node, id));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.open.is_empty() {
            trace!(pending = self.open.len(), "forward tracker closed with unresolved opens");
        }
        self.closed = true;
        Ok(())
    }

    fn pending(&self) -> Result<&HashMap<DependencyId, NodeId>> {
        if !self.closed {
            return Err(DepGraphError::NotClosed {
                component: "forward tracker",
            });
        }
        Ok(&self.open)
    }
}
