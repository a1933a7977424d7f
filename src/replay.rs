//! Replay of recorded trace events through a [`BuildSession`].
//!
//! Traces are JSON lines, one [`TraceEvent`] per line, tagged by `"event"`:
//!
//! ```text
//! {"event": "begin_cmd", "cmd_id": 0, "name": "vkCmdCopyBuffer"}
//! {"event": "write_memory", "pool": 1, "start": 0, "end": 256}
//! {"event": "end_cmd"}
//! ```
//!
//! `initial_cmd` events register the commands that rebuild the initial state
//! and must come before everything else.

use std::io::BufRead;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use depgraph_core::{
    BuildSession, CmdRef, DependencyGraph, DependencyGraphConfig, NamedCommand, PipelineConfig,
};
use depgraph_types::{CmdId, DependencyId, Fragment, Observation, PoolId, RefId, Span};

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    InitialCmd {
        name: String,
    },
    BeginCmd {
        cmd_id: u64,
        name: String,
    },
    EndCmd,
    /// `path` is relative to the open top-level command.
    BeginSubCmd {
        path: Vec<u64>,
    },
    EndSubCmd,
    ReadFrag {
        owner: RefId,
        fragment: Fragment,
        #[serde(default)]
        value: Option<RefId>,
        #[serde(default)]
        track: bool,
    },
    WriteFrag {
        owner: RefId,
        fragment: Fragment,
        #[serde(default)]
        old: Option<RefId>,
        #[serde(default)]
        new: Option<RefId>,
        #[serde(default)]
        track: bool,
    },
    ReadMemory {
        pool: PoolId,
        start: u64,
        end: u64,
    },
    WriteMemory {
        pool: PoolId,
        start: u64,
        end: u64,
    },
    ReadObservations {
        observations: Vec<Observation>,
    },
    WriteObservations {
        observations: Vec<Observation>,
    },
    OpenForward {
        id: DependencyId,
    },
    CloseForward {
        id: DependencyId,
    },
    DropForward {
        id: DependencyId,
    },
}

impl TraceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::InitialCmd { .. } => "initial_cmd",
            TraceEvent::BeginCmd { .. } => "begin_cmd",
            TraceEvent::EndCmd => "end_cmd",
            TraceEvent::BeginSubCmd { .. } => "begin_sub_cmd",
            TraceEvent::EndSubCmd => "end_sub_cmd",
            TraceEvent::ReadFrag { .. } => "read_frag",
            TraceEvent::WriteFrag { .. } => "write_frag",
            TraceEvent::ReadMemory { .. } => "read_memory",
            TraceEvent::WriteMemory { .. } => "write_memory",
            TraceEvent::ReadObservations { .. } => "read_observations",
            TraceEvent::WriteObservations { .. } => "write_observations",
            TraceEvent::OpenForward { .. } => "open_forward",
            TraceEvent::CloseForward { .. } => "close_forward",
            TraceEvent::DropForward { .. } => "drop_forward",
        }
    }

    fn apply(self, session: &mut BuildSession) -> Result<()> {
        let result = match self {
            TraceEvent::InitialCmd { .. } => {
                bail!("initial commands must precede all other events")
            }
            TraceEvent::BeginCmd { cmd_id, name } => session
                .begin_cmd(CmdId(cmd_id), NamedCommand::new(name).into_ref())
                .map(drop),
            TraceEvent::EndCmd => session.end_cmd().map(drop),
            TraceEvent::BeginSubCmd { path } => session.begin_sub_cmd(&path).map(drop),
            TraceEvent::EndSubCmd => session.end_sub_cmd(),
            TraceEvent::ReadFrag {
                owner,
                fragment,
                value,
                track,
            } => session.read_frag(owner, fragment, value, track),
            TraceEvent::WriteFrag {
                owner,
                fragment,
                old,
                new,
                track,
            } => session.write_frag(owner, fragment, old, new, track),
            TraceEvent::ReadMemory { pool, start, end } => {
                session.read_memory(pool, Span::new(start, end))
            }
            TraceEvent::WriteMemory { pool, start, end } => {
                session.write_memory(pool, Span::new(start, end))
            }
            TraceEvent::ReadObservations { observations } => {
                session.read_observations(&observations).map(drop)
            }
            TraceEvent::WriteObservations { observations } => {
                session.write_observations(&observations).map(drop)
            }
            TraceEvent::OpenForward { id } => session.open_forward(id),
            TraceEvent::CloseForward { id } => session.close_forward(id),
            TraceEvent::DropForward { id } => session.drop_forward(id),
        };
        Ok(result?)
    }
}

/// Parse JSON-lines trace events. Blank lines are skipped.
pub fn parse_events<R: BufRead>(reader: R) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read trace line {}", index + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = serde_json::from_str(line)
            .with_context(|| format!("invalid trace event on line {}", index + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Replay `events` through a fresh [`BuildSession`] and return the graph.
pub fn build_graph(
    events: Vec<TraceEvent>,
    config: DependencyGraphConfig,
    pipeline: PipelineConfig,
) -> Result<DependencyGraph> {
    let leading = events
        .iter()
        .take_while(|e| matches!(e, TraceEvent::InitialCmd { .. }))
        .count();
    let mut events = events.into_iter();
    let initial_cmds: Vec<CmdRef> = events
        .by_ref()
        .take(leading)
        .filter_map(|e| match e {
            TraceEvent::InitialCmd { name } => Some(NamedCommand::new(name).into_ref()),
            _ => None,
        })
        .collect();
    debug!(initial = initial_cmds.len(), "replaying trace");

    let mut session = BuildSession::new(config, pipeline, initial_cmds)
        .context("failed to start build session")?;
    let mut replayed = 0usize;
    for (offset, event) in events.enumerate() {
        let position = leading + offset + 1;
        let name = event.name();
        event
            .apply(&mut session)
            .with_context(|| format!("event {} ({}) rejected", position, name))?;
        replayed += 1;
    }

    let graph = session.finish().context("failed to finish dependency graph")?;
    info!(
        events = replayed,
        nodes = graph.num_nodes(),
        edges = graph.num_dependencies(),
        "dependency graph built"
    );
    Ok(graph)
}
