//! Last-writer tracking for byte ranges of memory pools.

use std::collections::{BTreeMap, HashMap};

use tracing::{trace, warn};

use depgraph_types::{AccessMode, MemoryAccess, NodeId, Observation, PoolId, Span};

use crate::brackets::Brackets;
use crate::context::CmdContext;
use crate::error::{DepGraphError, Result};
use crate::interval::IntervalMap;

/// Memory accesses of the nodes of one command, keyed by node.
pub type MemoryAccesses = BTreeMap<NodeId, Vec<MemoryAccess>>;

/// Receives memory notifications for a sequence of commands.
pub trait MemoryTracker: Send {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()>;

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<MemoryAccesses>;

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()>;

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()>;

    fn on_read_slice(&mut self, pool: PoolId, span: Span) -> Result<()>;

    fn on_write_slice(&mut self, pool: PoolId, span: Span) -> Result<()>;

    /// Reads made by observation nodes; `nodes[i]` made `observations[i]`.
    fn on_read_obs(&mut self, observations: &[Observation], nodes: &[NodeId]) -> Result<()>;

    fn on_write_obs(&mut self, observations: &[Observation], nodes: &[NodeId]) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Current writers of `pool`, ordered by address. Only readable after
    /// [`close`](Self::close).
    fn intervals(&self, pool: PoolId) -> Result<Vec<(Span, NodeId)>>;
}

/// Synchronous memory tracker.
#[derive(Debug, Default)]
pub struct MemoryWatcher {
    brackets: Brackets,
    pools: HashMap<PoolId, IntervalMap<NodeId>>,
    pending: MemoryAccesses,
    closed: bool,
}

impl MemoryWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn access(&mut self, node: NodeId, pool: PoolId, span: Span, mode: AccessMode) {
        if span.is_empty() {
            trace!(%node, %pool, %span, "ignoring empty memory access");
            return;
        }
        let mut access = MemoryAccess::new(node, pool, span, mode);
        let writers = self.pools.entry(pool).or_default();
        // Later nodes overlapping here are descendants of `node`.
        for (_, writer) in writers.overlapping(span) {
            if writer < node {
                access.add_dep(writer);
            }
        }
        if mode.is_write() {
            writers.insert(span, node);
        }
        self.pending.entry(node).or_default().push(access);
    }

    fn slice(&mut self, pool: PoolId, span: Span, mode: AccessMode) -> Result<()> {
        self.check_open()?;
        let node = self.brackets.current(if mode.is_write() {
            "memory write"
        } else {
            "memory read"
        })?;
        self.access(node, pool, span, mode);
        Ok(())
    }

    fn observations(
        &mut self,
        observations: &[Observation],
        nodes: &[NodeId],
        mode: AccessMode,
    ) -> Result<()> {
        self.check_open()?;
        self.brackets.current("memory observation")?;
        if observations.len() != nodes.len() {
            let err = DepGraphError::ObservationMismatch {
                observations: observations.len(),
                nodes: nodes.len(),
            };
            warn!(error = %err, "rejecting observation list");
            return Err(err);
        }
        for (obs, &node) in observations.iter().zip(nodes) {
            let span = Span::new(obs.range.base, obs.range.end());
            self.access(node, obs.pool, span, mode);
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DepGraphError::AlreadyClosed {
                component: "memory tracker",
            });
        }
        Ok(())
    }
}

impl MemoryTracker for MemoryWatcher {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        self.check_open()?;
        self.brackets.begin_cmd(ctx)
    }

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<MemoryAccesses> {
        self.check_open()?;
        self.brackets.end_cmd(ctx)?;
        let accesses = std::mem::take(&mut self.pending);
        trace!(
            node = %ctx.node_id,
            nodes = accesses.len(),
            "memory accesses resolved"
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

    fn on_read_slice(&mut self, pool: PoolId, span: Span) -> Result<()> {
        self.slice(pool, span, AccessMode::Read)
    }

    fn on_write_slice(&mut self, pool: PoolId, span: Span) -> Result<()> {
        self.slice(pool, span, AccessMode::Write)
    }

    fn on_read_obs(&mut self, observations: &[Observation], nodes: &[NodeId]) -> Result<()> {
        self.observations(observations, nodes, AccessMode::Read)
    }

    fn on_write_obs(&mut self, observations: &[Observation], nodes: &[NodeId]) -> Result<()> {
        self.observations(observations, nodes, AccessMode::Write)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        self.check_open()?;
        if self.brackets.is_open() {
            warn!("memory tracker closed with an open command bracket");
        }
        self.closed = true;
        Ok(())
    }

    fn intervals(&self, pool: PoolId) -> Result<Vec<(Span, NodeId)>> {
        if !self.closed {
            return Err(DepGraphError::NotClosed {
                component: "memory tracker",
            });
        }
        Ok(self
            .pools
            .get(&pool)
            .map(|map| map.iter().collect())
            .unwrap_or_default())
    }
}
