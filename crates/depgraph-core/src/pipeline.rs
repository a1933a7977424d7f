//! Asynchronous wrappers running trackers and builders on a task serializer.
//!
//! The wrapped value lives on the serializer thread. Notifications are
//! enqueued and return immediately; value-returning calls (end of command,
//! close, queries) block until every earlier notification has been applied.
//!
//! A notification that fails on the serializer thread cannot report back to
//! its caller, so the first failure is latched and returned by the next
//! value-returning call. From then on the wrapper only reports that failure.

use std::collections::HashMap;

use tracing::{debug, warn};

use depgraph_types::{CmdId, DependencyId, Fragment, NodeId, Observation, PoolId, RefId, Span};
use depgraph_worker::{SerializerConfig, TaskSerializer, Worker};

use crate::builder::{DependencyGraphBuilder, GraphBuilder};
use crate::context::{CmdContext, CmdRef};
use crate::error::{DepGraphError, Result};
use crate::forward::{ForwardAccesses, ForwardTracker, ForwardWatcher};
use crate::fragment::{FragmentAccesses, FragmentTracker, FragmentWatcher, RefFrag};
use crate::graph::{DependencyGraph, NodeStats};
use crate::memory::{MemoryAccesses, MemoryTracker, MemoryWatcher};

/// Serializer-side state: the wrapped value plus the first failure raised
/// while applying a notification.
struct Latched<T> {
    inner: T,
    fault: Option<DepGraphError>,
}

impl<T> Latched<T> {
    fn apply(&mut self, op: impl FnOnce(&mut T) -> Result<()>) {
        if self.fault.is_some() {
            return;
        }
        if let Err(err) = op(&mut self.inner) {
            warn!(error = %err, "asynchronous notification failed");
            self.fault = Some(err);
        }
    }

    fn run<R>(&mut self, op: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        op(&mut self.inner).inspect_err(|err| self.fault = Some(err.clone()))
    }
}

/// Runs `T` on its own task serializer.
pub struct AsyncTracker<T: Send + 'static> {
    worker: TaskSerializer<Latched<T>>,
    component: &'static str,
    /// The wrapped value, handed back by the serializer on close.
    closed: Option<T>,
}

pub type AsyncFragmentWatcher = AsyncTracker<FragmentWatcher>;
pub type AsyncMemoryWatcher = AsyncTracker<MemoryWatcher>;
pub type AsyncForwardWatcher = AsyncTracker<ForwardWatcher>;
pub type AsyncGraphBuilder = AsyncTracker<DependencyGraphBuilder>;

impl<T: Send + 'static> AsyncTracker<T> {
    /// Spawn a serializer thread named `component` that owns `inner`.
    pub fn new(inner: T, config: SerializerConfig, component: &'static str) -> Result<Self> {
        let worker = TaskSerializer::with_name(
            Latched { inner, fault: None },
            config,
            component,
        )?;
        debug!(
            component,
            buffer_size = config.buffer_size,
            batch_size = config.batch_size,
            "asynchronous pipeline started"
        );
        Ok(Self {
            worker,
            component,
            closed: None,
        })
    }

    /// The wrapped value, once closed.
    pub fn inner(&self) -> Option<&T> {
        self.closed.as_ref()
    }

    fn submit<F>(&mut self, op: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()> + Send + 'static,
    {
        self.check_open()?;
        self.worker
            .add_task(Box::new(move |state: &mut Latched<T>| state.apply(op)))?;
        Ok(())
    }

    fn query<R, F>(&mut self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
    {
        self.check_open()?;
        self.worker.call(move |state: &mut Latched<T>| state.run(op))?
    }

    /// Run `op` as the final task, then stop the serializer and keep the
    /// wrapped value. The serializer is stopped even when `op` or an earlier
    /// notification failed; that failure is returned afterwards.
    fn shutdown<R, F>(&mut self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
    {
        self.check_open()?;
        let outcome = self
            .worker
            .call(move |state: &mut Latched<T>| state.run(op));
        let stopped = match self.worker.close() {
            Ok(state) => {
                self.closed = Some(state.inner);
                Ok(())
            }
            Err(err) => Err(err),
        };
        debug!(
            component = self.component,
            clean = matches!(outcome, Ok(Ok(_))),
            "asynchronous pipeline closed"
        );
        let result = outcome??;
        stopped?;
        Ok(result)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.is_some() || self.worker.is_closed() {
            return Err(DepGraphError::AlreadyClosed {
                component: self.component,
            });
        }
        Ok(())
    }

    fn closed_inner(&self) -> Result<&T> {
        self.closed.as_ref().ok_or(DepGraphError::NotClosed {
            component: self.component,
        })
    }
}

impl<T: FragmentTracker + 'static> FragmentTracker for AsyncTracker<T> {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        let ctx = ctx.clone();
        self.submit(move |t| t.on_begin_cmd(&ctx))
    }

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<FragmentAccesses> {
        let ctx = ctx.clone();
        self.query(move |t| t.on_end_cmd(&ctx))
    }

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        let sub = sub.clone();
        self.submit(move |t| t.on_begin_sub_cmd(&sub))
    }

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        let sub = sub.clone();
        self.submit(move |t| t.on_end_sub_cmd(&sub))
    }

    fn on_read_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        value: Option<RefId>,
        track: bool,
    ) -> Result<()> {
        self.submit(move |t| t.on_read_frag(owner, fragment, value, track))
    }

    fn on_write_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        old: Option<RefId>,
        new: Option<RefId>,
        track: bool,
    ) -> Result<()> {
        self.submit(move |t| t.on_write_frag(owner, fragment, old, new, track))
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown(|t| FragmentTracker::close(t))
    }

    fn is_closed(&self) -> bool {
        self.worker.is_closed()
    }

    fn state_refs(&self) -> Result<&HashMap<RefId, RefFrag>> {
        self.closed_inner()?.state_refs()
    }
}

impl<T: MemoryTracker + 'static> MemoryTracker for AsyncTracker<T> {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        let ctx = ctx.clone();
        self.submit(move |t| t.on_begin_cmd(&ctx))
    }

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<MemoryAccesses> {
        let ctx = ctx.clone();
        self.query(move |t| t.on_end_cmd(&ctx))
    }

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        let sub = sub.clone();
        self.submit(move |t| t.on_begin_sub_cmd(&sub))
    }

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        let sub = sub.clone();
        self.submit(move |t| t.on_end_sub_cmd(&sub))
    }

    fn on_read_slice(&mut self, pool: PoolId, span: Span) -> Result<()> {
        self.submit(move |t| t.on_read_slice(pool, span))
    }

    fn on_write_slice(&mut self, pool: PoolId, span: Span) -> Result<()> {
        self.submit(move |t| t.on_write_slice(pool, span))
    }

    fn on_read_obs(&mut self, observations: &[Observation], nodes: &[NodeId]) -> Result<()> {
        let (observations, nodes) = (observations.to_vec(), nodes.to_vec());
        self.submit(move |t| t.on_read_obs(&observations, &nodes))
    }

    fn on_write_obs(&mut self, observations: &[Observation], nodes: &[NodeId]) -> Result<()> {
        let (observations, nodes) = (observations.to_vec(), nodes.to_vec());
        self.submit(move |t| t.on_write_obs(&observations, &nodes))
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown(|t| MemoryTracker::close(t))
    }

    fn is_closed(&self) -> bool {
        self.worker.is_closed()
    }

    fn intervals(&self, pool: PoolId) -> Result<Vec<(Span, NodeId)>> {
        self.closed_inner()?.intervals(pool)
    }
}

impl<T: ForwardTracker + 'static> ForwardTracker for AsyncTracker<T> {
    fn on_begin_cmd(&mut self, ctx: &CmdContext) -> Result<()> {
        let ctx = ctx.clone();
        self.submit(move |t| t.on_begin_cmd(&ctx))
    }

    fn on_end_cmd(&mut self, ctx: &CmdContext) -> Result<ForwardAccesses> {
        let ctx = ctx.clone();
        self.query(move |t| t.on_end_cmd(&ctx))
    }

    fn on_begin_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        let sub = sub.clone();
        self.submit(move |t| t.on_begin_sub_cmd(&sub))
    }

    fn on_end_sub_cmd(&mut self, sub: &CmdContext) -> Result<()> {
        let sub = sub.clone();
        self.submit(move |t| t.on_end_sub_cmd(&sub))
    }

    fn open_forward_dependency(&mut self, id: DependencyId) -> Result<()> {
        self.submit(move |t| t.open_forward_dependency(id))
    }

    fn close_forward_dependency(&mut self, id: DependencyId) -> Result<()> {
        self.submit(move |t| t.close_forward_dependency(id))
    }

    fn drop_forward_dependency(&mut self, id: DependencyId) -> Result<()> {
        self.submit(move |t| t.drop_forward_dependency(id))
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown(|t| ForwardTracker::close(t))
    }

    fn is_closed(&self) -> bool {
        self.worker.is_closed()
    }

    fn pending(&self) -> Result<&HashMap<DependencyId, NodeId>> {
        self.closed_inner()?.pending()
    }
}

impl<T: GraphBuilder + 'static> GraphBuilder for AsyncTracker<T> {
    fn add_dependencies(
        &mut self,
        fragments: FragmentAccesses,
        memory: MemoryAccesses,
        forward: ForwardAccesses,
    ) -> Result<()> {
        self.submit(move |b| b.add_dependencies(fragments, memory, forward))
    }

    fn build_reverse_dependencies(&mut self) -> Result<()> {
        self.submit(|b| b.build_reverse_dependencies())
    }

    fn get_cmd_node_id(&mut self, cmd_id: CmdId, path: &[u64]) -> Result<NodeId> {
        let path = path.to_vec();
        self.query(move |b| b.get_cmd_node_id(cmd_id, &path))
    }

    fn get_obs_node_ids(
        &mut self,
        cmd_id: CmdId,
        observations: &[Observation],
        is_write: bool,
    ) -> Result<Vec<NodeId>> {
        let observations = observations.to_vec();
        self.query(move |b| b.get_obs_node_ids(cmd_id, &observations, is_write))
    }

    fn get_cmd_context(&mut self, cmd_id: CmdId, cmd: CmdRef) -> Result<CmdContext> {
        self.query(move |b| b.get_cmd_context(cmd_id, cmd))
    }

    fn get_sub_cmd_context(&mut self, cmd_id: CmdId, path: &[u64]) -> Result<CmdContext> {
        let path = path.to_vec();
        self.query(move |b| b.get_sub_cmd_context(cmd_id, &path))
    }

    fn get_node_stats(&mut self, node: NodeId) -> Result<NodeStats> {
        self.query(move |b| b.get_node_stats(node))
    }

    fn get_graph(&mut self) -> Result<DependencyGraph> {
        self.query(|b| b.get_graph())
    }

    fn set_state_refs(&mut self, state_refs: HashMap<RefId, RefFrag>) -> Result<()> {
        self.submit(move |b| b.set_state_refs(state_refs))
    }

    fn close(&mut self) -> Result<DependencyGraph> {
        self.shutdown(|b| GraphBuilder::close(b))
    }

    fn is_closed(&self) -> bool {
        self.worker.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brackets::test_support::cmd;
    use crate::config::DependencyGraphConfig;
    use crate::context::NamedCommand;

    fn configs() -> [SerializerConfig; 2] {
        [SerializerConfig::immediate(8), SerializerConfig::batched(8, 3)]
    }

    #[test]
    fn test_async_fragment_watcher_matches_sync() {
        for config in configs() {
            let mut sync = FragmentWatcher::new();
            let mut async_ = AsyncFragmentWatcher::new(FragmentWatcher::new(), config, "frag")
                .unwrap();
            let trackers: [&mut dyn FragmentTracker; 2] = [&mut sync, &mut async_];
            let mut results = Vec::new();
            for t in trackers {
                let mut per_tracker = Vec::new();
                for node in 0..6u32 {
                    let ctx = cmd(node);
                    t.on_begin_cmd(&ctx).unwrap();
                    let field = Fragment::field("Buffer", if node % 2 == 0 { "a" } else { "b" });
                    t.on_read_frag(RefId(1), field.clone(), None, false).unwrap();
                    t.on_write_frag(RefId(1), field, None, None, false).unwrap();
                    per_tracker.push(t.on_end_cmd(&ctx).unwrap());
                }
                t.close().unwrap();
                results.push(per_tracker);
            }
            assert_eq!(results[0], results[1]);
        }
    }

    #[test]
    fn test_failure_is_latched_until_next_query() {
        let mut tracker = AsyncForwardWatcher::new(
            ForwardWatcher::new(),
            SerializerConfig::batched(4, 2),
            "forward",
        )
        .unwrap();
        let t: &mut dyn ForwardTracker = &mut tracker;
        let ctx = cmd(0);
        t.on_begin_cmd(&ctx).unwrap();
        // Enqueueing succeeds; the violation surfaces at end of command.
        t.close_forward_dependency(1u64.into()).unwrap();
        t.open_forward_dependency(2u64.into()).unwrap();
        let err = t.on_end_cmd(&ctx).unwrap_err();
        assert!(matches!(err, DepGraphError::ForwardNotOpen { .. }));

        // Poisoned from here on.
        assert_eq!(t.on_end_cmd(&ctx).unwrap_err(), err);
    }

    #[test]
    fn test_close_after_failure_stops_serializer() {
        let mut tracker = AsyncForwardWatcher::new(
            ForwardWatcher::new(),
            SerializerConfig::immediate(4),
            "forward",
        )
        .unwrap();
        let t: &mut dyn ForwardTracker = &mut tracker;
        t.on_begin_cmd(&cmd(0)).unwrap();
        t.close_forward_dependency(1u64.into()).unwrap();

        let err = t.close().unwrap_err();
        assert!(matches!(err, DepGraphError::ForwardNotOpen { .. }));
        assert!(matches!(
            t.close(),
            Err(DepGraphError::AlreadyClosed { .. })
        ));
        assert!(matches!(
            t.open_forward_dependency(2u64.into()),
            Err(DepGraphError::AlreadyClosed { .. })
        ));
        assert!(tracker.inner().is_some());
    }

    #[test]
    fn test_bookkeeping_readable_after_close() {
        let mut tracker =
            AsyncMemoryWatcher::new(MemoryWatcher::new(), SerializerConfig::immediate(4), "memory")
                .unwrap();
        let t: &mut dyn MemoryTracker = &mut tracker;
        let ctx = cmd(0);
        t.on_begin_cmd(&ctx).unwrap();
        t.on_write_slice(PoolId(0), Span::new(0, 16)).unwrap();
        t.on_end_cmd(&ctx).unwrap();
        assert!(matches!(
            t.intervals(PoolId(0)),
            Err(DepGraphError::NotClosed { .. })
        ));

        t.close().unwrap();
        assert_eq!(
            t.intervals(PoolId(0)).unwrap(),
            vec![(Span::new(0, 16), NodeId(0))]
        );
        assert!(matches!(
            t.on_begin_cmd(&cmd(1)),
            Err(DepGraphError::AlreadyClosed { .. })
        ));
        assert!(tracker.inner().is_some());
    }

    #[test]
    fn test_async_builder() {
        let inner = DependencyGraphBuilder::new(DependencyGraphConfig::default(), Vec::new());
        let mut builder =
            AsyncGraphBuilder::new(inner, SerializerConfig::immediate(4), "builder").unwrap();
        let b: &mut dyn GraphBuilder = &mut builder;
        let ctx = b
            .get_cmd_context(CmdId(0), NamedCommand::new("draw").into_ref())
            .unwrap();
        assert_eq!(ctx.node_id, NodeId(0));
        assert_eq!(b.get_cmd_node_id(CmdId(0), &[2]).unwrap(), NodeId(1));
        assert_eq!(b.get_graph().unwrap().num_nodes(), 2);

        b.build_reverse_dependencies().unwrap();
        let graph = b.close().unwrap();
        assert_eq!(graph.num_nodes(), 2);
        assert!(b.close().is_err());
    }
}
