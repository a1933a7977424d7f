//! Build session: drives the three trackers and the graph builder from one
//! stream of command notifications.

use tracing::{debug, info_span};

use depgraph_types::{CmdId, DependencyId, Fragment, NodeId, Observation, PoolId, RefId, Span};

use crate::builder::{DependencyGraphBuilder, GraphBuilder};
use crate::config::{DependencyGraphConfig, PipelineConfig};
use crate::context::{CmdContext, CmdRef};
use crate::error::{DepGraphError, Result};
use crate::forward::{ForwardTracker, ForwardWatcher};
use crate::fragment::{FragmentTracker, FragmentWatcher};
use crate::graph::{DependencyGraph, NodeStats};
use crate::memory::{MemoryTracker, MemoryWatcher};
use crate::pipeline::{
    AsyncForwardWatcher, AsyncFragmentWatcher, AsyncGraphBuilder, AsyncMemoryWatcher,
};

/// One graph build.
///
/// Each tracker and the builder either run inline or on their own serializer
/// thread, as selected by [`PipelineConfig`]. The resulting graph is the same
/// either way.
pub struct BuildSession {
    config: DependencyGraphConfig,
    fragments: Box<dyn FragmentTracker>,
    memory: Box<dyn MemoryTracker>,
    forward: Box<dyn ForwardTracker>,
    builder: Box<dyn GraphBuilder>,
    /// Open top-level command followed by open sub-commands, outermost first.
    open: Vec<CmdContext>,
    commands: usize,
}

impl BuildSession {
    pub fn new(
        config: DependencyGraphConfig,
        pipeline: PipelineConfig,
        initial_cmds: Vec<CmdRef>,
    ) -> Result<Self> {
        let builder = DependencyGraphBuilder::new(config, initial_cmds);
        let session = if pipeline.is_async() {
            let trackers = pipeline.tracker_serializer();
            Self {
                config,
                fragments: Box::new(AsyncFragmentWatcher::new(
                    FragmentWatcher::new(),
                    trackers,
                    "depgraph-fragments",
                )?),
                memory: Box::new(AsyncMemoryWatcher::new(
                    MemoryWatcher::new(),
                    trackers,
                    "depgraph-memory",
                )?),
                forward: Box::new(AsyncForwardWatcher::new(
                    ForwardWatcher::new(),
                    trackers,
                    "depgraph-forward",
                )?),
                builder: Box::new(AsyncGraphBuilder::new(
                    builder,
                    pipeline.builder_serializer(),
                    "depgraph-builder",
                )?),
                open: Vec::new(),
                commands: 0,
            }
        } else {
            Self {
                config,
                fragments: Box::new(FragmentWatcher::new()),
                memory: Box::new(MemoryWatcher::new()),
                forward: Box::new(ForwardWatcher::new()),
                builder: Box::new(builder),
                open: Vec::new(),
                commands: 0,
            }
        };
        debug!(mode = ?pipeline.mode, "build session started");
        Ok(session)
    }

    pub fn config(&self) -> &DependencyGraphConfig {
        &self.config
    }

    /// Innermost open command or sub-command.
    pub fn current(&self) -> Option<&CmdContext> {
        self.open.last()
    }

    pub fn begin_cmd(&mut self, cmd_id: CmdId, cmd: CmdRef) -> Result<CmdContext> {
        if let Some(open) = self.open.first() {
            return Err(DepGraphError::bracket(format!(
                "begin of command {} while command {} is still open",
                cmd_id, open.cmd_id
            )));
        }
        let ctx = self.builder.get_cmd_context(cmd_id, cmd)?;
        self.fragments.on_begin_cmd(&ctx)?;
        self.memory.on_begin_cmd(&ctx)?;
        self.forward.on_begin_cmd(&ctx)?;
        self.open.push(ctx.clone());
        Ok(ctx)
    }

    /// Open the sub-command at `path` below the current top-level command.
    /// `path` must extend the innermost open position by one level.
    pub fn begin_sub_cmd(&mut self, path: &[u64]) -> Result<CmdContext> {
        let cmd_id = self.top("begin sub-command")?.cmd_id;
        let ctx = self.builder.get_sub_cmd_context(cmd_id, path)?;
        self.fragments.on_begin_sub_cmd(&ctx)?;
        self.memory.on_begin_sub_cmd(&ctx)?;
        self.forward.on_begin_sub_cmd(&ctx)?;
        self.open.push(ctx.clone());
        Ok(ctx)
    }

    pub fn end_sub_cmd(&mut self) -> Result<()> {
        if self.open.len() < 2 {
            return Err(DepGraphError::bracket(
                "end of sub-command with no open sub-command",
            ));
        }
        let ctx = self.open.pop().ok_or(DepGraphError::NoOpenNode {
            operation: "end sub-command",
        })?;
        self.fragments.on_end_sub_cmd(&ctx)?;
        self.memory.on_end_sub_cmd(&ctx)?;
        self.forward.on_end_sub_cmd(&ctx)
    }

    /// Close the current command and record its accesses in the graph.
    pub fn end_cmd(&mut self) -> Result<NodeId> {
        if self.open.len() > 1 {
            return Err(DepGraphError::bracket(format!(
                "end of command with {} sub-command(s) still open",
                self.open.len() - 1
            )));
        }
        let ctx = self.open.pop().ok_or(DepGraphError::NoOpenNode {
            operation: "end command",
        })?;
        // Every tracker sees the end bracket, even after another one failed.
        let fragments = self.fragments.on_end_cmd(&ctx);
        let memory = self.memory.on_end_cmd(&ctx);
        let forward = self.forward.on_end_cmd(&ctx);
        self.builder.add_dependencies(fragments?, memory?, forward?)?;
        self.commands += 1;
        Ok(ctx.node_id)
    }

    pub fn read_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        value: Option<RefId>,
        track: bool,
    ) -> Result<()> {
        self.fragments.on_read_frag(owner, fragment, value, track)
    }

    pub fn write_frag(
        &mut self,
        owner: RefId,
        fragment: Fragment,
        old: Option<RefId>,
        new: Option<RefId>,
        track: bool,
    ) -> Result<()> {
        self.fragments.on_write_frag(owner, fragment, old, new, track)
    }

    pub fn read_memory(&mut self, pool: PoolId, span: Span) -> Result<()> {
        self.memory.on_read_slice(pool, span)
    }

    pub fn write_memory(&mut self, pool: PoolId, span: Span) -> Result<()> {
        self.memory.on_write_slice(pool, span)
    }

    /// Allocate observation nodes for the current command and record their
    /// reads. Returns the new nodes, one per observation.
    pub fn read_observations(&mut self, observations: &[Observation]) -> Result<Vec<NodeId>> {
        self.observations(observations, false)
    }

    pub fn write_observations(&mut self, observations: &[Observation]) -> Result<Vec<NodeId>> {
        self.observations(observations, true)
    }

    fn observations(
        &mut self,
        observations: &[Observation],
        is_write: bool,
    ) -> Result<Vec<NodeId>> {
        let cmd_id = self.top("memory observation")?.cmd_id;
        let nodes = self
            .builder
            .get_obs_node_ids(cmd_id, observations, is_write)?;
        if is_write {
            self.memory.on_write_obs(observations, &nodes)?;
        } else {
            self.memory.on_read_obs(observations, &nodes)?;
        }
        Ok(nodes)
    }

    pub fn open_forward(&mut self, id: DependencyId) -> Result<()> {
        self.forward.open_forward_dependency(id)
    }

    pub fn close_forward(&mut self, id: DependencyId) -> Result<()> {
        self.forward.close_forward_dependency(id)
    }

    pub fn drop_forward(&mut self, id: DependencyId) -> Result<()> {
        self.forward.drop_forward_dependency(id)
    }

    pub fn node_stats(&mut self, node: NodeId) -> Result<NodeStats> {
        self.builder.get_node_stats(node)
    }

    /// Copy of the graph as built so far.
    pub fn graph_snapshot(&mut self) -> Result<DependencyGraph> {
        self.builder.get_graph()
    }

    /// Close every pipeline and return the finished graph.
    ///
    /// All four pipelines are closed even when the session failed; the first
    /// error is returned.
    pub fn finish(mut self) -> Result<DependencyGraph> {
        let _span = info_span!("finish", commands = self.commands).entered();
        let graph = self.close_pipelines()?;
        debug!(
            nodes = graph.num_nodes(),
            edges = graph.num_dependencies(),
            "build session finished"
        );
        Ok(graph)
    }

    fn close_pipelines(&mut self) -> Result<DependencyGraph> {
        let unbalanced = match self.open.last() {
            Some(open) => Err(DepGraphError::bracket(format!(
                "session finished while {} is still open",
                open.node_id
            ))),
            None => Ok(()),
        };
        let fragments = self.fragments.close();
        let memory = self.memory.close();
        let forward = self.forward.close();
        let prepared = unbalanced.and(fragments).and(memory).and(forward).and_then(|()| {
            let state_refs = self.fragments.state_refs()?.clone();
            self.builder.set_state_refs(state_refs)?;
            if self.config.reverse_dependencies {
                self.builder.build_reverse_dependencies()?;
            }
            Ok(())
        });
        match prepared {
            Ok(()) => self.builder.close(),
            Err(err) => {
                if let Err(close_err) = self.builder.close() {
                    debug!(error = %close_err, "builder close after failed session");
                }
                Err(err)
            }
        }
    }

    fn top(&self, operation: &'static str) -> Result<&CmdContext> {
        self.open
            .first()
            .ok_or(DepGraphError::NoOpenNode { operation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NamedCommand;

    fn sessions() -> Vec<BuildSession> {
        [
            PipelineConfig::synchronous(),
            PipelineConfig::asynchronous(16, 1),
            PipelineConfig::asynchronous(16, 4),
        ]
        .into_iter()
        .map(|pipeline| {
            BuildSession::new(DependencyGraphConfig::default(), pipeline, Vec::new()).unwrap()
        })
        .collect()
    }

    fn cmd(name: &str) -> CmdRef {
        NamedCommand::new(name).into_ref()
    }

    #[test]
    fn test_fragment_then_memory_scenario() {
        for mut s in sessions() {
            s.begin_cmd(CmdId(0), cmd("write")).unwrap();
            s.write_frag(RefId(1), Fragment::field("Image", "layout"), None, None, true)
                .unwrap();
            let c0 = s.end_cmd().unwrap();

            s.begin_cmd(CmdId(1), cmd("read")).unwrap();
            s.read_frag(RefId(1), Fragment::field("Image", "layout"), None, false)
                .unwrap();
            s.read_memory(PoolId(0), Span::new(50, 150)).unwrap();
            let c1 = s.end_cmd().unwrap();

            s.begin_cmd(CmdId(2), cmd("copy")).unwrap();
            s.write_memory(PoolId(0), Span::new(100, 200)).unwrap();
            let c2 = s.end_cmd().unwrap();

            let graph = s.finish().unwrap();
            assert!(graph.has_dependency(c1, c0));
            assert!(!graph.has_dependency(c1, c2));
            assert!(!graph.has_dependency(c2, c1));
            assert_eq!(graph.num_dependencies(), 1);
        }
    }

    #[test]
    fn test_sub_commands_and_observations() {
        for mut s in sessions() {
            let top = s.begin_cmd(CmdId(0), cmd("submit")).unwrap();
            let sub = s.begin_sub_cmd(&[0]).unwrap();
            assert_eq!(sub.parent, Some(top.node_id));
            let obs = s
                .write_observations(&[Observation::new(PoolId(2), 0, 64)])
                .unwrap();
            s.end_sub_cmd().unwrap();
            s.end_cmd().unwrap();

            s.begin_cmd(CmdId(1), cmd("map")).unwrap();
            s.read_memory(PoolId(2), Span::new(0, 8)).unwrap();
            let reader = s.end_cmd().unwrap();

            let stats = s.node_stats(reader).unwrap();
            assert_eq!(stats.memory_reads, 1);
            let graph = s.finish().unwrap();
            assert_eq!(graph.dependencies_from(reader), obs.as_slice());
            assert_eq!(
                graph.get_node_accesses(obs[0]).unwrap().parent_node,
                Some(top.node_id)
            );
        }
    }

    #[test]
    fn test_bracket_misuse() {
        let mut s = BuildSession::new(
            DependencyGraphConfig::default(),
            PipelineConfig::synchronous(),
            Vec::new(),
        )
        .unwrap();
        assert!(s.end_cmd().is_err());
        assert!(s.begin_sub_cmd(&[0]).is_err());
        s.begin_cmd(CmdId(0), cmd("a")).unwrap();
        assert!(s.begin_cmd(CmdId(1), cmd("b")).is_err());
        assert!(s.end_sub_cmd().is_err());
        s.begin_sub_cmd(&[0]).unwrap();
        assert!(s.end_cmd().is_err());
        s.end_sub_cmd().unwrap();
        s.end_cmd().unwrap();
        assert_eq!(s.graph_snapshot().unwrap().num_nodes(), 2);
    }

    #[test]
    fn test_finish_with_open_command_fails() {
        let mut s = BuildSession::new(
            DependencyGraphConfig::default(),
            PipelineConfig::asynchronous(8, 2),
            Vec::new(),
        )
        .unwrap();
        s.begin_cmd(CmdId(0), cmd("a")).unwrap();
        assert!(matches!(
            s.finish(),
            Err(DepGraphError::BracketMismatch { .. })
        ));
    }

    #[test]
    fn test_failed_session_closes_every_pipeline() {
        // Asynchronous sessions only: there the violation is latched and
        // surfaces again on close.
        for mut s in sessions().into_iter().skip(1) {
            s.begin_cmd(CmdId(0), cmd("wait")).unwrap();
            s.close_forward(DependencyId::from(3u64)).unwrap();
            let violation = s.end_cmd().unwrap_err();
            assert!(matches!(violation, DepGraphError::ForwardNotOpen { .. }));
            assert!(s.current().is_none());
            assert!(s.close_pipelines().is_err());
            assert!(s.fragments.is_closed());
            assert!(s.memory.is_closed());
            assert!(s.forward.is_closed());
            assert!(s.builder.is_closed());
        }
    }

    #[test]
    fn test_finish_builds_reverse_index_and_state_refs() {
        let config = DependencyGraphConfig::default().with_reverse_dependencies(true);
        let mut s = BuildSession::new(config, PipelineConfig::asynchronous(8, 2), Vec::new())
            .unwrap();
        s.begin_cmd(CmdId(0), cmd("bind")).unwrap();
        s.write_frag(RefId(1), Fragment::field("Set", "binding"), None, Some(RefId(2)), true)
            .unwrap();
        let a = s.end_cmd().unwrap();
        s.begin_cmd(CmdId(1), cmd("use")).unwrap();
        s.read_frag(RefId(2), Fragment::Complete, None, false).unwrap();
        let b = s.end_cmd().unwrap();

        let graph = s.finish().unwrap();
        assert_eq!(graph.dependencies_to(a).unwrap(), &[b]);
        assert_eq!(graph.state_refs()[&RefId(2)].ref_id, RefId(1));
    }
}
